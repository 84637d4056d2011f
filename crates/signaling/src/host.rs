//! Server-Host – bindet den TCP-Socket und besitzt alle Verbindungen
//!
//! Der Host besitzt die [`SessionRegistry`] und die Accept-Loop. Jede
//! angenommene Verbindung laeuft als eigener Task in einem `JoinSet`, damit
//! `stoppen` auf das Ende aller Verbindungen warten kann.
//!
//! ## Lebenszyklus
//! ```text
//! Idle -> Starting -> Running -> Stopping -> Stopped
//!            ^                                  |
//!            +------------- starten ------------+
//! ```
//! `stoppen` ist idempotent. Ein `stoppen` waehrend `Starting` bricht den
//! Start ab, sobald der Socket gebunden ist. Aus `Stopped` ist nur ein
//! erneutes `starten` moeglich.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tvlink_auth::CredentialStore;
use tvlink_core::{DeviceId, ServerInfo, UserId};
use tvlink_observability::TvlinkMetrics;
use tvlink_protocol::control;

use crate::connection::{Verbindung, VerbindungsKonfig};
use crate::correlator::Antwort;
use crate::error::{SignalingError, SignalingResult};
use crate::handlers::{BefehlsHandler, ServerBefehlsHandler};
use crate::registry::SessionRegistry;

/// Zustand des Hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostZustand {
    Idle,
    /// Socket wird gebunden
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Konfiguration des Hosts
#[derive(Debug, Clone)]
pub struct HostKonfig {
    pub bind_addr: SocketAddr,
    pub max_verbindungen: usize,
    pub server_info: ServerInfo,
    pub verbindung: VerbindungsKonfig,
}

impl Default for HostKonfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7878)),
            max_verbindungen: 512,
            server_info: ServerInfo::default(),
            verbindung: VerbindungsKonfig::default(),
        }
    }
}

struct Lauf {
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
    lokale_addr: SocketAddr,
}

/// Top-Level-Besitzer von Accept-Loop und Registry
pub struct ServerHost {
    konfig: HostKonfig,
    registry: Arc<SessionRegistry>,
    handler: Arc<dyn BefehlsHandler>,
    metriken: TvlinkMetrics,
    zustand: watch::Sender<HostZustand>,
    lauf: Mutex<Option<Lauf>>,
}

impl ServerHost {
    /// Erstellt einen Host mit dem Standard-Befehlshandler
    pub fn neu(konfig: HostKonfig, store: Arc<dyn CredentialStore>, metriken: TvlinkMetrics) -> Self {
        let registry = Arc::new(SessionRegistry::neu(store));
        let handler = Arc::new(ServerBefehlsHandler::neu(
            Arc::clone(&registry),
            konfig.server_info.clone(),
            metriken.clone(),
        ));
        Self::mit_handler(konfig, registry, handler, metriken)
    }

    /// Erstellt einen Host mit eigenem Befehlshandler
    pub fn mit_handler(
        konfig: HostKonfig,
        registry: Arc<SessionRegistry>,
        handler: Arc<dyn BefehlsHandler>,
        metriken: TvlinkMetrics,
    ) -> Self {
        let (zustand, _) = watch::channel(HostZustand::Idle);
        Self {
            konfig,
            registry,
            handler,
            metriken,
            zustand,
            lauf: Mutex::new(None),
        }
    }

    pub fn zustand(&self) -> HostZustand {
        *self.zustand.borrow()
    }

    /// Empfaenger fuer Zustandswechsel
    pub fn zustand_abonnieren(&self) -> watch::Receiver<HostZustand> {
        self.zustand.subscribe()
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Tatsaechlich gebundene Adresse (bei Port 0 der vergebene Port)
    pub fn lokale_adresse(&self) -> Option<SocketAddr> {
        self.lauf.lock().as_ref().map(|l| l.lokale_addr)
    }

    /// Bindet den Socket und startet die Accept-Loop
    ///
    /// Nur aus `Idle` oder `Stopped` erlaubt.
    pub async fn starten(&self) -> SignalingResult<SocketAddr> {
        let mut vorher = HostZustand::Idle;
        let erlaubt = self.zustand.send_if_modified(|z| {
            vorher = *z;
            if matches!(z, HostZustand::Idle | HostZustand::Stopped) {
                *z = HostZustand::Starting;
                true
            } else {
                false
            }
        });
        if !erlaubt {
            return Err(SignalingError::UngueltigerZustand(format!(
                "starten im Zustand {vorher:?}"
            )));
        }

        let gebunden = match TcpListener::bind(self.konfig.bind_addr).await {
            Ok(listener) => listener.local_addr().map(|addr| (listener, addr)),
            Err(e) => Err(e),
        };
        match gebunden {
            Ok((listener, lokale_addr)) => self.lauf_installieren(listener, lokale_addr),
            Err(e) => {
                // Ein zwischenzeitliches stoppen wartet auf Stopped
                self.zustand.send_modify(|z| {
                    *z = if *z == HostZustand::Starting {
                        vorher
                    } else {
                        HostZustand::Stopped
                    };
                });
                Err(e.into())
            }
        }
    }

    /// Startet die Accept-Loop, falls der Start nicht inzwischen abgebrochen wurde
    fn lauf_installieren(
        &self,
        listener: TcpListener,
        lokale_addr: SocketAddr,
    ) -> SignalingResult<SocketAddr> {
        let mut lauf = self.lauf.lock();
        let laeuft = self.zustand.send_if_modified(|z| {
            if *z == HostZustand::Starting {
                *z = HostZustand::Running;
                true
            } else {
                false
            }
        });
        if !laeuft {
            drop(lauf);
            drop(listener);
            self.zustand.send_replace(HostZustand::Stopped);
            tracing::info!(adresse = %lokale_addr, "Start durch stoppen abgebrochen");
            return Err(SignalingError::UngueltigerZustand(
                "waehrend des Starts gestoppt".to_string(),
            ));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept = AcceptLoop {
            listener,
            konfig: self.konfig.clone(),
            registry: Arc::clone(&self.registry),
            handler: Arc::clone(&self.handler),
            metriken: self.metriken.clone(),
        };
        let accept_task = tokio::spawn(accept.ausfuehren(shutdown_rx));
        *lauf = Some(Lauf {
            shutdown_tx,
            accept_task,
            lokale_addr,
        });

        tracing::info!(adresse = %lokale_addr, "tvlink Server-Host gestartet");
        Ok(lokale_addr)
    }

    /// Stoppt Accept-Loop und alle Verbindungen
    ///
    /// Laufende Befehle werden noch zu Ende bearbeitet. Danach sind alle
    /// Verbindungen getrennt und die Registry ist leer. Mehrfacher Aufruf
    /// ist wirkungslos.
    pub async fn stoppen(&self) {
        let mut vorher = HostZustand::Idle;
        let stoppt = self.zustand.send_if_modified(|z| {
            vorher = *z;
            if matches!(z, HostZustand::Running | HostZustand::Starting) {
                *z = HostZustand::Stopping;
                true
            } else {
                false
            }
        });
        if !stoppt {
            tracing::debug!(zustand = ?vorher, "stoppen ohne Wirkung");
            return;
        }

        if vorher == HostZustand::Starting {
            // starten bemerkt den Abbruch nach dem Binden und setzt Stopped
            let mut zustand_rx = self.zustand.subscribe();
            let _ = zustand_rx.wait_for(|z| *z == HostZustand::Stopped).await;
            tracing::info!("tvlink Server-Host vor dem Start gestoppt");
            return;
        }

        let lauf = self.lauf.lock().take();
        if let Some(lauf) = lauf {
            tracing::info!("Server-Host: Shutdown eingeleitet");
            let _ = lauf.shutdown_tx.send(true);
            if let Err(e) = lauf.accept_task.await {
                tracing::error!(fehler = %e, "Accept-Task abgebrochen");
            }
        }

        let rest = self.registry.alle_entfernen();
        if !rest.is_empty() {
            tracing::warn!(anzahl = rest.len(), "Registry nach Shutdown nicht leer");
        }

        self.zustand.send_replace(HostZustand::Stopped);
        tracing::info!("tvlink Server-Host gestoppt");
    }

    /// Startet den Host und wartet, bis er gestoppt wurde
    pub async fn ausfuehren(&self) -> SignalingResult<()> {
        let mut zustand_rx = self.zustand.subscribe();
        self.starten().await?;
        zustand_rx
            .wait_for(|z| *z == HostZustand::Stopped)
            .await
            .map_err(|_| SignalingError::intern("Zustandskanal geschlossen"))?;
        Ok(())
    }

    /// Sendet eine Anfrage an ein bestimmtes Geraet und wartet auf die Antwort
    pub async fn an_geraet_senden(
        &self,
        user_id: UserId,
        device_id: &DeviceId,
        argv: Vec<String>,
    ) -> SignalingResult<Antwort> {
        let handle = self.registry.geraet_finden(user_id, device_id)?;
        handle.anfrage(argv).await
    }

    /// Meldet einem Geraet, dass sich seine Kanalliste geaendert hat
    pub async fn kanaele_pushen(
        &self,
        user_id: UserId,
        device_id: &DeviceId,
    ) -> SignalingResult<Antwort> {
        self.an_geraet_senden(
            user_id,
            device_id,
            vec![control::CHANNELS_CHANGED.to_string()],
        )
        .await
    }

    /// Meldet allen Geraeten eines Benutzers eine geaenderte Kanalliste
    ///
    /// Gibt die Anzahl der Geraete zurueck, die bestaetigt haben.
    pub async fn kanaele_an_benutzer_pushen(&self, user_id: UserId) -> usize {
        let mut bestaetigt = 0;
        for device_id in self.registry.geraete_von(user_id) {
            match self.kanaele_pushen(user_id, &device_id).await {
                Ok(_) => bestaetigt += 1,
                Err(e) => {
                    tracing::warn!(user_id = %user_id, device_id = %device_id, fehler = %e, "Kanal-Push fehlgeschlagen");
                }
            }
        }
        bestaetigt
    }
}

impl Drop for ServerHost {
    fn drop(&mut self) {
        if let Some(lauf) = self.lauf.get_mut().take() {
            let _ = lauf.shutdown_tx.send(true);
        }
    }
}

// ---------------------------------------------------------------------------
// Accept-Loop
// ---------------------------------------------------------------------------

struct AcceptLoop {
    listener: TcpListener,
    konfig: HostKonfig,
    registry: Arc<SessionRegistry>,
    handler: Arc<dyn BefehlsHandler>,
    metriken: TvlinkMetrics,
}

impl AcceptLoop {
    async fn ausfuehren(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut verbindungen = JoinSet::new();

        loop {
            tokio::select! {
                // Neue eingehende Verbindung
                ergebnis = self.listener.accept() => {
                    match ergebnis {
                        Ok((stream, peer_addr)) => {
                            if verbindungen.len() >= self.konfig.max_verbindungen {
                                tracing::warn!(
                                    peer = %peer_addr,
                                    max = self.konfig.max_verbindungen,
                                    "Server voll – Verbindung abgelehnt"
                                );
                                drop(stream);
                                continue;
                            }
                            if let Err(e) = stream.set_nodelay(true) {
                                tracing::debug!(peer = %peer_addr, fehler = %e, "TCP_NODELAY nicht setzbar");
                            }

                            let verbindung = Verbindung::neu(
                                self.konfig.verbindung.clone(),
                                Arc::clone(&self.handler),
                                Arc::clone(&self.registry),
                                self.metriken.clone(),
                            );
                            verbindungen.spawn(verbindung.verarbeiten(stream, peer_addr, shutdown_rx.clone()));
                        }
                        Err(e) => {
                            tracing::error!(fehler = %e, "TCP-Accept-Fehler");
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        }
                    }
                }

                // Beendete Verbindungs-Tasks einsammeln
                Some(ergebnis) = verbindungen.join_next(), if !verbindungen.is_empty() => {
                    if let Err(e) = ergebnis {
                        tracing::error!(fehler = %e, "Verbindungs-Task abgebrochen");
                    }
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Accept-Loop: Shutdown-Signal empfangen");
                        break;
                    }
                }
            }
        }

        // Listener schliessen, dann auf alle Verbindungen warten
        drop(self.listener);
        tracing::debug!(anzahl = verbindungen.len(), "Warte auf Verbindungs-Tasks");
        while let Some(ergebnis) = verbindungen.join_next().await {
            if let Err(e) = ergebnis {
                tracing::error!(fehler = %e, "Verbindungs-Task abgebrochen");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tvlink_auth::{HashKosten, SpeicherCredentialStore};

    fn host() -> ServerHost {
        let konfig = HostKonfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..HostKonfig::default()
        };
        ServerHost::neu(
            konfig,
            Arc::new(SpeicherCredentialStore::mit_kosten(HashKosten::minimal())),
            TvlinkMetrics::neu().unwrap(),
        )
    }

    #[tokio::test]
    async fn lebenszyklus() {
        let host = host();
        assert_eq!(host.zustand(), HostZustand::Idle);
        assert!(host.lokale_adresse().is_none());

        let addr = host.starten().await.unwrap();
        assert_eq!(host.zustand(), HostZustand::Running);
        assert_ne!(addr.port(), 0);
        assert_eq!(host.lokale_adresse(), Some(addr));

        // Doppelstart wird abgelehnt
        assert!(matches!(
            host.starten().await,
            Err(SignalingError::UngueltigerZustand(_))
        ));

        host.stoppen().await;
        assert_eq!(host.zustand(), HostZustand::Stopped);
        assert!(host.lokale_adresse().is_none());

        // Idempotent
        host.stoppen().await;
        assert_eq!(host.zustand(), HostZustand::Stopped);

        // Neustart aus Stopped
        host.starten().await.unwrap();
        assert_eq!(host.zustand(), HostZustand::Running);
        host.stoppen().await;
    }

    #[tokio::test]
    async fn stoppen_vor_starten_ist_wirkungslos() {
        let host = host();
        host.stoppen().await;
        assert_eq!(host.zustand(), HostZustand::Idle);
    }

    #[tokio::test]
    async fn ausfuehren_endet_nach_stoppen() {
        let host = Arc::new(host());
        let laeufer = {
            let host = Arc::clone(&host);
            tokio::spawn(async move { host.ausfuehren().await })
        };

        let mut zustand = host.zustand_abonnieren();
        zustand
            .wait_for(|z| *z == HostZustand::Running)
            .await
            .unwrap();
        host.stoppen().await;

        laeufer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn belegter_port_laesst_zustand_unveraendert() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let konfig = HostKonfig {
            bind_addr: blocker.local_addr().unwrap(),
            ..HostKonfig::default()
        };
        let host = ServerHost::neu(
            konfig,
            Arc::new(SpeicherCredentialStore::neu()),
            TvlinkMetrics::neu().unwrap(),
        );

        assert!(matches!(host.starten().await, Err(SignalingError::Io(_))));
        assert_eq!(host.zustand(), HostZustand::Idle);
    }

    #[tokio::test]
    async fn stoppen_waehrend_des_bindens_bricht_start_ab() {
        let host = Arc::new(host());
        host.zustand.send_replace(HostZustand::Starting);

        let stopper = {
            let host = Arc::clone(&host);
            tokio::spawn(async move { host.stoppen().await })
        };
        host.zustand_abonnieren()
            .wait_for(|z| *z == HostZustand::Stopping)
            .await
            .unwrap();

        // Bind ist fertig, stoppen kam dazwischen
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(matches!(
            host.lauf_installieren(listener, addr),
            Err(SignalingError::UngueltigerZustand(_))
        ));

        tokio::time::timeout(std::time::Duration::from_secs(5), stopper)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(host.zustand(), HostZustand::Stopped);
        assert!(host.lokale_adresse().is_none());
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());

        // Danach normal startbar und stoppbar
        host.starten().await.unwrap();
        assert_eq!(host.zustand(), HostZustand::Running);
        host.stoppen().await;
        assert_eq!(host.zustand(), HostZustand::Stopped);
    }

    #[tokio::test]
    async fn gleichzeitiges_starten_und_stoppen() {
        let host = host();
        let (gestartet, ()) = tokio::join!(host.starten(), host.stoppen());

        // Je nach Reihenfolge lief der Host kurz oder gar nicht, danach nie mehr
        assert_eq!(host.zustand(), HostZustand::Stopped);
        assert!(host.lokale_adresse().is_none());
        if let Ok(addr) = gestartet {
            assert!(tokio::net::TcpStream::connect(addr).await.is_err());
        }
    }

    #[tokio::test]
    async fn senden_an_unbekanntes_geraet() {
        let host = host();
        let fehler = host
            .kanaele_pushen(UserId(1), &DeviceId::from("tv"))
            .await
            .unwrap_err();
        assert!(matches!(
            fehler,
            SignalingError::Registry(crate::error::RegistryError::NichtGefunden(_))
        ));
        assert_eq!(host.kanaele_an_benutzer_pushen(UserId(1)).await, 0);
    }
}
