//! ClientService – Verbindung eines Geraets zum tvlink-Server
//!
//! Der Socket gehoert einem eigenen tokio-Task. Das Frontend stellt
//! Auftraege ueber den [`ClientService`] in dessen Queue und bekommt
//! Ergebnisse als [`ClientEreignis`] ueber einen `mpsc`-Kanal zurueck.
//!
//! Direkt nach dem Verbindungsaufbau meldet sich der Task mit den
//! konfigurierten Anmeldedaten an. Pings des Servers werden mit
//! `Approve pong` beantwortet, `channels_changed` wird bestaetigt und als
//! [`ClientEreignis::KanaeleGeaendert`] weitergereicht.

use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::codec::Framed;
use tvlink_core::{AuthCredential, ChannelInfo, DeviceId, ServerInfo, TvlinkError, UserId};
use tvlink_protocol::control::{self, AuthAnfrage};
use tvlink_protocol::{Command, ProtokollResult, ZeilenCodec};
use tvlink_signaling::{Abbruch, AnfrageErgebnis, AntwortCallback, Eingang, RequestCorrelator};

use crate::error::{ClientError, ClientResult};

const AUFTRAG_QUEUE: usize = 32;
const AUSGANG_QUEUE: usize = 64;
const SCHREIBER_NACHLAUF: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ClientKonfig {
    /// host:port des Servers
    pub server_addr: String,
    pub credential: AuthCredential,
    pub device_id: DeviceId,
    pub anfrage_timeout: Duration,
    /// Takt fuer die Fristenpruefung offener Anfragen
    pub pruef_intervall: Duration,
    pub max_zeilenlaenge: usize,
}

impl ClientKonfig {
    pub fn neu(
        server_addr: impl Into<String>,
        credential: AuthCredential,
        device_id: impl Into<DeviceId>,
    ) -> Self {
        Self {
            server_addr: server_addr.into(),
            credential,
            device_id: device_id.into(),
            anfrage_timeout: Duration::from_secs(30),
            pruef_intervall: Duration::from_secs(1),
            max_zeilenlaenge: tvlink_protocol::wire::DEFAULT_MAX_ZEILENLAENGE,
        }
    }
}

// ---------------------------------------------------------------------------
// Ereignisse und Auftraege
// ---------------------------------------------------------------------------

/// Ereignisse fuer das Frontend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEreignis {
    /// TCP-Verbindung steht, Anmeldung laeuft
    Verbunden,
    Angemeldet { user_id: UserId },
    /// Server hat abgelehnt oder die Anfrage wurde abgebrochen
    AnmeldungFehlgeschlagen { meldung: String },
    ServerInfo(ServerInfo),
    Kanaele(Vec<ChannelInfo>),
    /// Server meldet eine geaenderte Kanalliste
    KanaeleGeaendert,
    /// Eine Anfrage des Frontends ist gescheitert
    Fehler(String),
    Getrennt { grund: String },
}

#[derive(Debug)]
enum ClientAuftrag {
    ServerInfo,
    Kanaele,
    Trennen,
}

// ---------------------------------------------------------------------------
// ClientService
// ---------------------------------------------------------------------------

/// Handle auf die laufende Server-Verbindung
///
/// Wird der Service verworfen, schliesst der Task die Verbindung.
pub struct ClientService {
    auftraege: mpsc::Sender<ClientAuftrag>,
    task: JoinHandle<()>,
}

impl ClientService {
    /// Baut die Verbindung auf und startet die Anmeldung im Hintergrund
    ///
    /// Fehler beim Verbindungsaufbau kommen direkt zurueck, alles Weitere
    /// ueber `ereignisse`.
    pub async fn verbinden(
        konfig: ClientKonfig,
        ereignisse: mpsc::Sender<ClientEreignis>,
    ) -> ClientResult<Self> {
        if !konfig.credential.ist_gueltig() || konfig.device_id.as_str().is_empty() {
            return Err(TvlinkError::Konfiguration(
                "Login und Geraete-ID duerfen nicht leer sein".to_string(),
            )
            .into());
        }

        tracing::info!(server = %konfig.server_addr, device_id = %konfig.device_id, "Verbinde mit Server");
        let stream = TcpStream::connect(&konfig.server_addr)
            .await
            .map_err(|e| TvlinkError::Verbindung(format!("{}: {e}", konfig.server_addr)))?;
        stream.set_nodelay(true)?;
        tracing::info!(server = %konfig.server_addr, "TCP-Verbindung hergestellt");

        let (auftrag_tx, auftrag_rx) = mpsc::channel(AUFTRAG_QUEUE);
        let sitzung = Sitzung {
            konfig,
            ereignisse,
        };
        let task = tokio::spawn(sitzung.ausfuehren(stream, auftrag_tx.clone(), auftrag_rx));

        Ok(Self {
            auftraege: auftrag_tx,
            task,
        })
    }

    /// Fragt die Server-Informationen ab, Ergebnis kommt als [`ClientEreignis::ServerInfo`]
    pub async fn server_info_anfragen(&self) -> ClientResult<()> {
        self.einreihen(ClientAuftrag::ServerInfo).await
    }

    /// Fragt die Kanalliste ab, Ergebnis kommt als [`ClientEreignis::Kanaele`]
    pub async fn kanaele_anfragen(&self) -> ClientResult<()> {
        self.einreihen(ClientAuftrag::Kanaele).await
    }

    /// Fordert das Schliessen der Verbindung an
    pub fn trennen(&self) -> bool {
        self.auftraege.try_send(ClientAuftrag::Trennen).is_ok()
    }

    pub fn ist_beendet(&self) -> bool {
        self.task.is_finished()
    }

    /// Wartet bis der Verbindungs-Task beendet ist
    pub async fn beendet(self) {
        if let Err(e) = self.task.await {
            tracing::warn!(fehler = %e, "Client-Task abgebrochen");
        }
    }

    async fn einreihen(&self, auftrag: ClientAuftrag) -> ClientResult<()> {
        self.auftraege
            .send(auftrag)
            .await
            .map_err(|_| ClientError::NichtVerbunden)
    }
}

// ---------------------------------------------------------------------------
// Verbindungs-Task
// ---------------------------------------------------------------------------

type Correlator = RequestCorrelator<mpsc::Sender<Command>>;

struct Sitzung {
    konfig: ClientKonfig,
    ereignisse: mpsc::Sender<ClientEreignis>,
}

impl Sitzung {
    async fn ausfuehren(
        self,
        stream: TcpStream,
        trenn_tx: mpsc::Sender<ClientAuftrag>,
        mut auftrag_rx: mpsc::Receiver<ClientAuftrag>,
    ) {
        let framed = Framed::new(
            stream,
            ZeilenCodec::with_max_laenge(self.konfig.max_zeilenlaenge),
        );
        let (mut sink, mut zeilen) = framed.split();

        let (ausgang_tx, mut ausgang_rx) = mpsc::channel::<Command>(AUSGANG_QUEUE);
        let (schreibfehler_tx, mut schreibfehler_rx) = mpsc::channel::<std::io::Error>(1);
        let mut schreiber = tokio::spawn(async move {
            while let Some(befehl) = ausgang_rx.recv().await {
                if let Err(e) = sink.send(befehl).await {
                    let _ = schreibfehler_tx.try_send(e);
                    return;
                }
            }
            let _ = sink.close().await;
        });

        let mut correlator = RequestCorrelator::neu(ausgang_tx);
        melden(&self.ereignisse, ClientEreignis::Verbunden);

        let mut pruefung = tokio::time::interval(self.konfig.pruef_intervall);
        pruefung.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let grund: String = match self.anmelden(&mut correlator, trenn_tx) {
            Err(e) => format!("Anmeldung nicht sendbar: {e}"),
            Ok(()) => loop {
                tokio::select! {
                    zeile = zeilen.next() => {
                        match zeile {
                            Some(Ok(Ok(zeile))) => {
                                if let Err(e) = self.zeile_verarbeiten(&mut correlator, &zeile) {
                                    break format!("Antwort nicht sendbar: {e}");
                                }
                            }
                            Some(Ok(Err(e))) => {
                                tracing::warn!(fehler = %e, "Ungueltige Zeile vom Server verworfen");
                            }
                            Some(Err(e)) => break format!("Lesefehler: {e}"),
                            None => break "vom Server getrennt".to_string(),
                        }
                    }

                    Some(e) = schreibfehler_rx.recv() => {
                        break format!("Schreiben fehlgeschlagen: {e}");
                    }

                    auftrag = auftrag_rx.recv() => {
                        let befehl = match auftrag {
                            Some(ClientAuftrag::ServerInfo) => control::GET_SERVER_INFO,
                            Some(ClientAuftrag::Kanaele) => control::GET_CHANNELS,
                            Some(ClientAuftrag::Trennen) => break "Trennung angefordert".to_string(),
                            None => break "Service verworfen".to_string(),
                        };
                        let callback = self.abfrage_callback(befehl.to_string());
                        let frist = Instant::now() + self.konfig.anfrage_timeout;
                        if let Err(e) = correlator.senden_mit_frist(vec![befehl.to_string()], frist, callback) {
                            break format!("Anfrage nicht sendbar: {e}");
                        }
                    }

                    _ = pruefung.tick() => {
                        let abgelaufen = correlator.abgelaufene_abbrechen(Instant::now());
                        if abgelaufen > 0 {
                            tracing::debug!(abgelaufen, "Anfragen ohne Antwort abgelaufen");
                        }
                    }
                }
            },
        };

        correlator.alle_abbrechen(Abbruch::VerbindungGeschlossen);
        drop(correlator);
        if tokio::time::timeout(SCHREIBER_NACHLAUF, &mut schreiber)
            .await
            .is_err()
        {
            schreiber.abort();
        }

        tracing::info!(server = %self.konfig.server_addr, grund = %grund, "Verbindung zum Server beendet");
        // Das letzte Ereignis darf nicht verloren gehen
        let _ = self.ereignisse.send(ClientEreignis::Getrennt { grund }).await;
    }

    /// Schickt die `auth`-Anfrage, bei Ablehnung trennt sich der Task selbst
    fn anmelden(
        &self,
        correlator: &mut Correlator,
        trenn_tx: mpsc::Sender<ClientAuftrag>,
    ) -> tvlink_signaling::SignalingResult<()> {
        let anfrage = AuthAnfrage::neu(
            self.konfig.credential.clone(),
            self.konfig.device_id.clone(),
        );
        let ereignisse = self.ereignisse.clone();
        let callback: AntwortCallback = Box::new(move |_, ergebnis| {
            let ereignis = match auth_auswerten(ergebnis) {
                Ok(user_id) => {
                    tracing::info!(user_id = %user_id, "Anmeldung erfolgreich");
                    ClientEreignis::Angemeldet { user_id }
                }
                Err(meldung) => {
                    tracing::warn!(meldung = %meldung, "Anmeldung fehlgeschlagen");
                    let _ = trenn_tx.try_send(ClientAuftrag::Trennen);
                    ClientEreignis::AnmeldungFehlgeschlagen { meldung }
                }
            };
            melden(&ereignisse, ereignis);
        });
        let frist = Instant::now() + self.konfig.anfrage_timeout;
        correlator
            .senden_mit_frist(anfrage.to_argv(), frist, callback)
            .map(|_| ())
    }

    /// Wertet die Antwort auf `get_server_info` bzw. `get_channels` aus
    fn abfrage_callback(&self, befehl: String) -> AntwortCallback {
        let ereignisse = self.ereignisse.clone();
        Box::new(move |_, ergebnis| {
            let ereignis = match abfrage_auswerten(&befehl, ergebnis) {
                Ok(ereignis) => ereignis,
                Err(meldung) => {
                    tracing::warn!(befehl = %befehl, meldung = %meldung, "Anfrage fehlgeschlagen");
                    ClientEreignis::Fehler(format!("{befehl}: {meldung}"))
                }
            };
            melden(&ereignisse, ereignis);
        })
    }

    fn zeile_verarbeiten(
        &self,
        correlator: &mut Correlator,
        zeile: &str,
    ) -> tvlink_signaling::SignalingResult<()> {
        match correlator.eingang_verarbeiten(zeile) {
            Ok(Eingang::Anfrage { seq, argv }) => match argv.first().map(String::as_str).unwrap_or_default() {
                control::PING => correlator.bestaetigen(seq, vec![control::PONG.to_string()])?,
                control::CHANNELS_CHANGED => {
                    correlator.bestaetigen(seq, Vec::new())?;
                    melden(&self.ereignisse, ClientEreignis::KanaeleGeaendert);
                }
                name => {
                    tracing::debug!(seq = %seq, befehl = %name, "Unbekannte Anfrage vom Server");
                    correlator.antworten(seq, control::fail_argv(control::UNBEKANNTER_BEFEHL))?;
                }
            },
            Ok(Eingang::Zugestellt { .. }) => {}
            Ok(Eingang::Unbekannt { seq, art }) => {
                tracing::debug!(seq = %seq, art = %art, "Antwort ohne offene Anfrage verworfen");
            }
            Err(e) => {
                tracing::warn!(fehler = %e, "Ungueltige Zeile vom Server verworfen");
            }
        }
        Ok(())
    }
}

fn auth_auswerten(ergebnis: AnfrageErgebnis) -> Result<UserId, String> {
    let antwort = ergebnis.map_err(|abbruch| abbruch.to_string())?;
    let daten = control::antwort_auswerten(&antwort.argv)?;
    control::auth_ok_auswerten(daten).map_err(|e| e.to_string())
}

fn abfrage_auswerten(befehl: &str, ergebnis: AnfrageErgebnis) -> Result<ClientEreignis, String> {
    let antwort = ergebnis.map_err(|abbruch| abbruch.to_string())?;
    let daten = control::antwort_auswerten(&antwort.argv)?;
    let ereignis: ProtokollResult<ClientEreignis> = match befehl {
        control::GET_SERVER_INFO => control::server_info_auswerten(daten).map(ClientEreignis::ServerInfo),
        _ => control::kanaele_auswerten(daten).map(ClientEreignis::Kanaele),
    };
    ereignis.map_err(|e| e.to_string())
}

/// Stellt ein Ereignis zu, ohne den Verbindungs-Task zu blockieren
fn melden(ereignisse: &mpsc::Sender<ClientEreignis>, ereignis: ClientEreignis) {
    match ereignisse.try_send(ereignis) {
        Ok(()) => {}
        Err(TrySendError::Full(ereignis)) => {
            tracing::warn!(ereignis = ?ereignis, "Ereignis-Queue voll, Ereignis verworfen");
        }
        Err(TrySendError::Closed(_)) => {}
    }
}
