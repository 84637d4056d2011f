//! Befehls-Handler – beantworten Anfragen der Gegenseite
//!
//! Die Verbindung reicht jede eingehende `Request`-Zeile an
//! [`BefehlsHandler::anfrage`] weiter und schickt die [`Rueckmeldung`] mit
//! derselben Sequenz-ID zurueck. Zugestellte und unbekannte Antworten werden
//! ueber [`BefehlsHandler::antwort`] bzw. [`BefehlsHandler::bestaetigung`]
//! gemeldet.

use std::sync::Arc;

use async_trait::async_trait;
use tvlink_core::ServerInfo;
use tvlink_observability::TvlinkMetrics;
use tvlink_protocol::control::{self, AuthAnfrage};
use tvlink_protocol::SequenceId;

use crate::connection::VerbindungsKontext;
use crate::error::RegistryError;
use crate::registry::SessionRegistry;

/// Was auf eine Anfrage zurueckgeschickt wird
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rueckmeldung {
    Response(Vec<String>),
    Approve(Vec<String>),
    /// Keine Antwort senden
    Keine,
}

impl Rueckmeldung {
    pub fn ok<I, S>(daten: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Response(control::ok_argv(daten))
    }

    pub fn fail(meldung: impl Into<String>) -> Self {
        Self::Response(control::fail_argv(meldung))
    }
}

/// Anwendungsschicht einer Verbindung
#[async_trait]
pub trait BefehlsHandler: Send + Sync {
    /// Anfrage der Gegenseite (argv ist nie leer)
    async fn anfrage(
        &self,
        ctx: &mut VerbindungsKontext,
        seq: SequenceId,
        argv: Vec<String>,
    ) -> Rueckmeldung;

    /// `Response` auf eine eigene Anfrage, `zugestellt = false` bei unbekannter ID
    fn antwort(&self, ctx: &VerbindungsKontext, seq: SequenceId, zugestellt: bool) {
        if !zugestellt {
            tracing::debug!(peer = %ctx.handle().peer(), seq = %seq, "Response ohne offene Anfrage");
        }
    }

    /// `Approve` auf eine eigene Anfrage, `zugestellt = false` bei unbekannter ID
    fn bestaetigung(&self, ctx: &VerbindungsKontext, seq: SequenceId, zugestellt: bool) {
        if !zugestellt {
            tracing::debug!(peer = %ctx.handle().peer(), seq = %seq, "Approve ohne offene Anfrage");
        }
    }
}

// ---------------------------------------------------------------------------
// ServerBefehlsHandler
// ---------------------------------------------------------------------------

/// Befehle, die der Server beantwortet
///
/// | Befehl            | anonym | angemeldet |
/// |-------------------|--------|------------|
/// | `auth`            | ja     | `fail`     |
/// | `ping`            | ja     | ja         |
/// | `get_server_info` | `fail` | ja         |
/// | `get_channels`    | `fail` | ja         |
pub struct ServerBefehlsHandler {
    registry: Arc<SessionRegistry>,
    server_info: ServerInfo,
    metriken: TvlinkMetrics,
}

impl ServerBefehlsHandler {
    pub fn neu(
        registry: Arc<SessionRegistry>,
        server_info: ServerInfo,
        metriken: TvlinkMetrics,
    ) -> Self {
        Self {
            registry,
            server_info,
            metriken,
        }
    }

    async fn auth(&self, ctx: &mut VerbindungsKontext, argv: &[String]) -> Rueckmeldung {
        let peer = ctx.handle().peer();

        if ctx.ist_angemeldet() {
            tracing::warn!(peer = %peer, "Erneute Anmeldung auf angemeldeter Verbindung");
            return Rueckmeldung::fail(control::BEREITS_ANGEMELDET);
        }

        let anfrage = match AuthAnfrage::aus_argv(argv) {
            Ok(anfrage) => anfrage,
            Err(e) => {
                tracing::debug!(peer = %peer, fehler = %e, "Ungueltige Anmeldeanfrage");
                self.metriken.auth_failures_total.inc();
                return Rueckmeldung::fail(control::AUTH_FEHLGESCHLAGEN);
            }
        };

        let (user_id, profil) = match self
            .registry
            .anmeldedaten_aufloesen(&anfrage.credential)
            .await
        {
            Ok(ergebnis) => ergebnis,
            Err(e) => {
                tracing::info!(peer = %peer, login = %anfrage.credential.login(), fehler = %e, "Anmeldung fehlgeschlagen");
                self.metriken.auth_failures_total.inc();
                return Rueckmeldung::fail(control::AUTH_FEHLGESCHLAGEN);
            }
        };

        let device_id = anfrage.device_id;
        match self
            .registry
            .geraet_registrieren(user_id, device_id.clone(), ctx.handle().clone())
        {
            Ok(()) => {}
            Err(e @ RegistryError::DoppeltesGeraet { .. }) => {
                tracing::warn!(peer = %peer, fehler = %e, "Anmeldung abgelehnt");
                return Rueckmeldung::fail(control::GERAET_VERBUNDEN);
            }
            Err(e) => {
                tracing::error!(peer = %peer, fehler = %e, "Registrierung fehlgeschlagen");
                return Rueckmeldung::fail(control::AUTH_FEHLGESCHLAGEN);
            }
        }

        let bandbreite = profil.effektive_bandbreite(anfrage.credential.bandwidth());
        if let Err(e) = ctx.anmelden(user_id, device_id, bandbreite) {
            // Nicht erreichbar, solange oben auf ist_angemeldet geprueft wird
            let _ = self.registry.verbindung_entfernen(ctx.handle().id());
            tracing::error!(peer = %peer, fehler = %e, "Identitaetswechsel fehlgeschlagen");
            return Rueckmeldung::fail(control::AUTH_FEHLGESCHLAGEN);
        }

        tracing::info!(
            peer = %peer,
            user_id = %user_id,
            login = %profil.login,
            bandbreite,
            "Anmeldung erfolgreich"
        );
        Rueckmeldung::Response(control::auth_ok_argv(user_id))
    }

    fn server_info(&self) -> Rueckmeldung {
        match control::server_info_argv(&self.server_info) {
            Ok(argv) => Rueckmeldung::Response(argv),
            Err(e) => {
                tracing::error!(fehler = %e, "ServerInfo nicht serialisierbar");
                Rueckmeldung::fail("internal error")
            }
        }
    }

    async fn kanaele(&self, ctx: &VerbindungsKontext) -> Rueckmeldung {
        let Some(user_id) = ctx.user_id() else {
            return Rueckmeldung::fail(control::NICHT_ANGEMELDET);
        };
        let kanaele = self
            .registry
            .profil(user_id)
            .await
            .map(|p| p.kanaele)
            .unwrap_or_default();

        match control::kanaele_argv(&kanaele) {
            Ok(argv) => Rueckmeldung::Response(argv),
            Err(e) => {
                tracing::error!(user_id = %user_id, fehler = %e, "Kanalliste nicht serialisierbar");
                Rueckmeldung::fail("internal error")
            }
        }
    }
}

#[async_trait]
impl BefehlsHandler for ServerBefehlsHandler {
    async fn anfrage(
        &self,
        ctx: &mut VerbindungsKontext,
        seq: SequenceId,
        argv: Vec<String>,
    ) -> Rueckmeldung {
        let name = argv.first().map(String::as_str).unwrap_or_default();

        match name {
            control::PING => Rueckmeldung::Approve(vec![control::PONG.to_string()]),
            control::AUTH => self.auth(ctx, &argv).await,
            _ if !ctx.ist_angemeldet() => {
                tracing::debug!(peer = %ctx.handle().peer(), seq = %seq, befehl = %name, "Befehl vor Anmeldung abgelehnt");
                Rueckmeldung::fail(control::NICHT_ANGEMELDET)
            }
            control::GET_SERVER_INFO => self.server_info(),
            control::GET_CHANNELS => self.kanaele(ctx).await,
            _ => {
                tracing::debug!(peer = %ctx.handle().peer(), seq = %seq, befehl = %name, "Unbekannter Befehl");
                Rueckmeldung::fail(control::UNBEKANNTER_BEFEHL)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::VerbindungsHandle;
    use tokio::sync::mpsc;
    use tvlink_auth::{password::passwort_hashen_mit, HashKosten, SpeicherCredentialStore};
    use tvlink_core::{ChannelInfo, UserId, UserProfile};
    use tvlink_protocol::command::argv;

    struct Aufbau {
        handler: ServerBefehlsHandler,
        registry: Arc<SessionRegistry>,
        metriken: TvlinkMetrics,
    }

    fn aufbau() -> Aufbau {
        let store = SpeicherCredentialStore::mit_kosten(HashKosten::minimal());
        let mut profil = UserProfile::neu(UserId(42), "bob");
        profil.max_bandbreite = 500;
        profil.kanaele = vec![ChannelInfo {
            id: "1".into(),
            name: "Das Erste".into(),
            url: "http://tv.local/1.m3u8".into(),
        }];
        store
            .mit_hash_einfuegen(profil, passwort_hashen_mit("pw", HashKosten::minimal()).unwrap())
            .unwrap();

        let registry = Arc::new(SessionRegistry::neu(Arc::new(store)));
        let metriken = TvlinkMetrics::neu().unwrap();
        let handler = ServerBefehlsHandler::neu(
            Arc::clone(&registry),
            ServerInfo {
                bandwidth_host: "bw.local:5201".into(),
            },
            metriken.clone(),
        );
        Aufbau {
            handler,
            registry,
            metriken,
        }
    }

    fn kontext() -> VerbindungsKontext {
        let (tx, _rx) = mpsc::channel(1);
        VerbindungsKontext::neu(VerbindungsHandle::neu("127.0.0.1:6000".parse().unwrap(), tx))
    }

    async fn anfrage(a: &Aufbau, ctx: &mut VerbindungsKontext, args: &[&str]) -> Rueckmeldung {
        a.handler
            .anfrage(ctx, SequenceId(1), argv(args.iter().copied()))
            .await
    }

    #[tokio::test]
    async fn ping_auch_ohne_anmeldung() {
        let a = aufbau();
        let mut ctx = kontext();
        assert_eq!(
            anfrage(&a, &mut ctx, &["ping"]).await,
            Rueckmeldung::Approve(argv(["pong"]))
        );
    }

    #[tokio::test]
    async fn anmeldung_registriert_geraet() {
        let a = aufbau();
        let mut ctx = kontext();

        let antwort = anfrage(&a, &mut ctx, &["auth", "bob", "pw", "1000", "tv"]).await;
        assert_eq!(antwort, Rueckmeldung::ok(["42"]));
        assert_eq!(ctx.user_id(), Some(UserId(42)));
        assert!(matches!(
            ctx.identitaet(),
            crate::connection::Identitaet::Angemeldet { bandbreite: 500, .. }
        ));
        assert!(a.registry.ist_registriert(UserId(42), &"tv".into()));
    }

    #[tokio::test]
    async fn falsche_anmeldung_bleibt_anonym() {
        let a = aufbau();
        let mut ctx = kontext();

        let falsch = anfrage(&a, &mut ctx, &["auth", "bob", "falsch", "0", "tv"]).await;
        let unbekannt = anfrage(&a, &mut ctx, &["auth", "alice", "pw", "0", "tv"]).await;
        assert_eq!(falsch, Rueckmeldung::fail(control::AUTH_FEHLGESCHLAGEN));
        assert_eq!(falsch, unbekannt);
        assert!(!ctx.ist_angemeldet());
        assert_eq!(a.metriken.auth_failures_total.get(), 2);

        // Neuer Versuch ist erlaubt
        let ok = anfrage(&a, &mut ctx, &["auth", "bob", "pw", "0", "tv"]).await;
        assert_eq!(ok, Rueckmeldung::ok(["42"]));
    }

    #[tokio::test]
    async fn kaputte_auth_argumente() {
        let a = aufbau();
        let mut ctx = kontext();
        let antwort = anfrage(&a, &mut ctx, &["auth", "bob"]).await;
        assert_eq!(antwort, Rueckmeldung::fail(control::AUTH_FEHLGESCHLAGEN));
    }

    #[tokio::test]
    async fn zweite_anmeldung_wird_abgelehnt() {
        let a = aufbau();
        let mut ctx = kontext();
        anfrage(&a, &mut ctx, &["auth", "bob", "pw", "0", "tv"]).await;

        let nochmal = anfrage(&a, &mut ctx, &["auth", "bob", "pw", "0", "handy"]).await;
        assert_eq!(nochmal, Rueckmeldung::fail(control::BEREITS_ANGEMELDET));
        assert_eq!(a.registry.geraete_von(UserId(42)).len(), 1);
    }

    #[tokio::test]
    async fn gleiches_geraet_auf_zweiter_verbindung() {
        let a = aufbau();
        let mut erste = kontext();
        let mut zweite = kontext();

        anfrage(&a, &mut erste, &["auth", "bob", "pw", "0", "tv"]).await;
        let antwort = anfrage(&a, &mut zweite, &["auth", "bob", "pw", "0", "tv"]).await;

        assert_eq!(antwort, Rueckmeldung::fail(control::GERAET_VERBUNDEN));
        assert!(!zweite.ist_angemeldet());
        assert_eq!(
            a.registry.geraet_finden(UserId(42), &"tv".into()).unwrap().id(),
            erste.handle().id()
        );
    }

    #[tokio::test]
    async fn befehle_vor_anmeldung() {
        let a = aufbau();
        let mut ctx = kontext();
        for befehl in ["get_server_info", "get_channels", "irgendwas"] {
            assert_eq!(
                anfrage(&a, &mut ctx, &[befehl]).await,
                Rueckmeldung::fail(control::NICHT_ANGEMELDET)
            );
        }
    }

    #[tokio::test]
    async fn befehle_nach_anmeldung() {
        let a = aufbau();
        let mut ctx = kontext();
        anfrage(&a, &mut ctx, &["auth", "bob", "pw", "0", "tv"]).await;

        let Rueckmeldung::Response(info) = anfrage(&a, &mut ctx, &["get_server_info"]).await else {
            panic!("Response erwartet");
        };
        let daten = control::antwort_auswerten(&info).unwrap();
        assert_eq!(
            control::server_info_auswerten(daten).unwrap().bandwidth_host,
            "bw.local:5201"
        );

        let Rueckmeldung::Response(kanaele) = anfrage(&a, &mut ctx, &["get_channels"]).await else {
            panic!("Response erwartet");
        };
        let daten = control::antwort_auswerten(&kanaele).unwrap();
        assert_eq!(control::kanaele_auswerten(daten).unwrap()[0].name, "Das Erste");

        assert_eq!(
            anfrage(&a, &mut ctx, &["irgendwas"]).await,
            Rueckmeldung::fail(control::UNBEKANNTER_BEFEHL)
        );
    }
}
