//! Verbindung – ein tokio-Task pro TCP-Verbindung
//!
//! Der Task besitzt den Socket, den [`RequestCorrelator`] und die Identitaet
//! der Verbindung. Eingehende Zeilen werden strikt in Ankunftsreihenfolge
//! verarbeitet. Andere Tasks greifen nie direkt auf den Socket zu, sondern
//! reichen Auftraege ueber einen [`VerbindungsHandle`] ein.
//!
//! ## Identitaet
//! ```text
//! Anonym --auth ok--> Angemeldet(user, geraet)
//! ```
//! Der Wechsel passiert hoechstens einmal und wird nie rueckgaengig gemacht.
//!
//! ## Zeitgrenzen
//! - Ohne Anmeldung nach `auth_timeout` wird getrennt
//! - Angemeldete Verbindungen bekommen alle `keepalive` einen Ping
//! - Ohne eingehende Zeile fuer `verbindungs_timeout` wird getrennt
//! - Offene Anfragen laufen nach `anfrage_timeout` ab
//!
//! ## Ausgang
//! Antworten laufen ueber eine begrenzte Queue zum Writer-Task. Ist sie voll,
//! liest die Gegenseite nicht mit und wird getrennt. Eine Antwort, die laenger
//! als `max_zeilenlaenge` waere, wird durch `fail response too large` ersetzt.
//! Scheitert der Writer, endet die Verbindung sofort.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::codec::Framed;
use tvlink_core::{DeviceId, UserId, VerbindungsId};
use tvlink_observability::TvlinkMetrics;
use tvlink_protocol::{control, encode_line, BefehlsArt, Command, ProtokollFehler, ZeilenCodec};

use crate::correlator::{Abbruch, AnfrageErgebnis, Antwort, Eingang, RequestCorrelator};
use crate::error::{SignalingError, SignalingResult};
use crate::handlers::{BefehlsHandler, Rueckmeldung};
use crate::registry::SessionRegistry;

/// Groesse der Auftrags-Queue pro Verbindung
const AUFTRAG_QUEUE: usize = 64;
/// Groesse der Ausgangs-Queue zum Writer-Task
const AUSGANG_QUEUE: usize = 256;
/// So lange darf der Writer nach dem Verbindungsende noch Restdaten senden
const SCHREIBER_NACHLAUF: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Zeitgrenzen und Limits einer Verbindung
#[derive(Debug, Clone)]
pub struct VerbindungsKonfig {
    pub auth_timeout: Duration,
    pub keepalive: Duration,
    pub verbindungs_timeout: Duration,
    pub anfrage_timeout: Duration,
    /// Takt fuer Fristen-, Timeout- und Keepalive-Pruefung
    pub pruef_intervall: Duration,
    /// Mehr aufeinanderfolgende kaputte Zeilen trennen die Verbindung
    pub max_protokollfehler: u32,
    pub max_zeilenlaenge: usize,
}

impl Default for VerbindungsKonfig {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(10),
            keepalive: Duration::from_secs(30),
            verbindungs_timeout: Duration::from_secs(90),
            anfrage_timeout: Duration::from_secs(30),
            pruef_intervall: Duration::from_secs(1),
            max_protokollfehler: 8,
            max_zeilenlaenge: tvlink_protocol::wire::DEFAULT_MAX_ZEILENLAENGE,
        }
    }
}

// ---------------------------------------------------------------------------
// Identitaet und Kontext
// ---------------------------------------------------------------------------

/// Identitaet einer Verbindung
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identitaet {
    Anonym,
    Angemeldet {
        user_id: UserId,
        device_id: DeviceId,
        /// Effektive Bandbreite nach Profilgrenze
        bandbreite: u64,
    },
}

/// Zustand einer Verbindung, wie ihn die Befehls-Handler sehen
#[derive(Debug)]
pub struct VerbindungsKontext {
    handle: VerbindungsHandle,
    identitaet: Identitaet,
}

impl VerbindungsKontext {
    pub fn neu(handle: VerbindungsHandle) -> Self {
        Self {
            handle,
            identitaet: Identitaet::Anonym,
        }
    }

    pub fn handle(&self) -> &VerbindungsHandle {
        &self.handle
    }

    pub fn identitaet(&self) -> &Identitaet {
        &self.identitaet
    }

    pub fn ist_angemeldet(&self) -> bool {
        matches!(self.identitaet, Identitaet::Angemeldet { .. })
    }

    pub fn user_id(&self) -> Option<UserId> {
        match &self.identitaet {
            Identitaet::Angemeldet { user_id, .. } => Some(*user_id),
            Identitaet::Anonym => None,
        }
    }

    /// Wechselt von Anonym zu Angemeldet, nur einmal moeglich
    pub fn anmelden(
        &mut self,
        user_id: UserId,
        device_id: DeviceId,
        bandbreite: u64,
    ) -> SignalingResult<()> {
        if self.ist_angemeldet() {
            return Err(SignalingError::BereitsAngemeldet);
        }
        self.identitaet = Identitaet::Angemeldet {
            user_id,
            device_id,
            bandbreite,
        };
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// VerbindungsHandle
// ---------------------------------------------------------------------------

/// Auftrag an einen Verbindungs-Task
#[derive(Debug)]
pub enum Auftrag {
    /// Anfrage an die Gegenseite senden, Ergebnis ueber `antwort`
    Anfrage {
        argv: Vec<String>,
        frist: Option<Duration>,
        antwort: oneshot::Sender<AnfrageErgebnis>,
    },
    /// Verbindung schliessen
    Trennen,
}

/// Adresse eines Verbindungs-Tasks
///
/// Clone ist billig. Alle Operationen laufen ueber eine begrenzte Queue in
/// den Task der Verbindung.
#[derive(Clone)]
pub struct VerbindungsHandle {
    id: VerbindungsId,
    peer: SocketAddr,
    auftraege: mpsc::Sender<Auftrag>,
}

impl VerbindungsHandle {
    pub fn neu(peer: SocketAddr, auftraege: mpsc::Sender<Auftrag>) -> Self {
        Self {
            id: VerbindungsId::new(),
            peer,
            auftraege,
        }
    }

    pub fn id(&self) -> VerbindungsId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Sendet eine Anfrage und wartet auf die Antwort (Standardfrist)
    pub async fn anfrage(&self, argv: Vec<String>) -> SignalingResult<Antwort> {
        self.anfrage_mit_frist(argv, None).await
    }

    /// Sendet eine Anfrage mit eigener Frist und wartet auf die Antwort
    pub async fn anfrage_mit_frist(
        &self,
        argv: Vec<String>,
        frist: Option<Duration>,
    ) -> SignalingResult<Antwort> {
        let empfaenger = self.anfrage_einreihen(argv, frist).await?;
        match empfaenger.await {
            Ok(Ok(antwort)) => Ok(antwort),
            Ok(Err(abbruch)) => Err(SignalingError::Abgebrochen(abbruch)),
            // Task beendet, bevor der Auftrag bearbeitet wurde
            Err(_) => Err(SignalingError::Abgebrochen(Abbruch::VerbindungGeschlossen)),
        }
    }

    /// Reiht eine Anfrage ein, ohne auf die Antwort zu warten
    pub async fn anfrage_einreihen(
        &self,
        argv: Vec<String>,
        frist: Option<Duration>,
    ) -> SignalingResult<oneshot::Receiver<AnfrageErgebnis>> {
        if argv.is_empty() {
            return Err(ProtokollFehler::AnfrageOhneArgumente.into());
        }
        let (antwort, empfaenger) = oneshot::channel();
        self.auftraege
            .send(Auftrag::Anfrage {
                argv,
                frist,
                antwort,
            })
            .await
            .map_err(|_| SignalingError::VerbindungGetrennt)?;
        Ok(empfaenger)
    }

    /// Fordert das Schliessen der Verbindung an
    ///
    /// Gibt `false` zurueck, wenn der Task bereits beendet ist oder die
    /// Queue voll ist.
    pub fn trennen(&self) -> bool {
        self.auftraege.try_send(Auftrag::Trennen).is_ok()
    }

    pub fn ist_geschlossen(&self) -> bool {
        self.auftraege.is_closed()
    }
}

impl PartialEq for VerbindungsHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for VerbindungsHandle {}

impl std::fmt::Debug for VerbindungsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerbindungsHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Verbindung
// ---------------------------------------------------------------------------

type Correlator = RequestCorrelator<mpsc::Sender<Command>>;

/// Verarbeitet eine einzelne Verbindung in einem eigenen Task
pub struct Verbindung {
    konfig: VerbindungsKonfig,
    handler: Arc<dyn BefehlsHandler>,
    registry: Arc<SessionRegistry>,
    metriken: TvlinkMetrics,
}

impl Verbindung {
    pub fn neu(
        konfig: VerbindungsKonfig,
        handler: Arc<dyn BefehlsHandler>,
        registry: Arc<SessionRegistry>,
        metriken: TvlinkMetrics,
    ) -> Self {
        Self {
            konfig,
            handler,
            registry,
            metriken,
        }
    }

    /// Verarbeitungsschleife bis Trennung, Timeout oder Shutdown
    ///
    /// Beim Ende werden alle offenen Anfragen abgebrochen und die
    /// Verbindung aus der Registry entfernt.
    pub async fn verarbeiten<S>(
        self,
        stream: S,
        peer_addr: SocketAddr,
        mut shutdown_rx: watch::Receiver<bool>,
    ) where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (auftrag_tx, mut auftrag_rx) = mpsc::channel(AUFTRAG_QUEUE);
        let mut ctx = VerbindungsKontext::neu(VerbindungsHandle::neu(peer_addr, auftrag_tx));
        let verbindung = ctx.handle().id();

        let framed = Framed::new(
            stream,
            ZeilenCodec::with_max_laenge(self.konfig.max_zeilenlaenge),
        );
        let (mut sink, mut zeilen) = framed.split();

        // Writer-Task: leert die Ausgangs-Queue auf den Socket und meldet
        // einen Schreibfehler an die Verarbeitungsschleife
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

        let start = Instant::now();
        let mut letzter_empfang = start;
        let mut naechster_ping = start + self.konfig.keepalive;
        let mut fehler_in_folge: u32 = 0;
        let mut offen_gemeldet: i64 = 0;

        let mut pruefung = tokio::time::interval(self.konfig.pruef_intervall);
        pruefung.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.metriken.connections_total.inc();
        self.metriken.anonymous_connections.inc();
        tracing::info!(peer = %peer_addr, verbindung = %verbindung, "Neue Verbindung");

        let grund: &'static str = loop {
            tokio::select! {
                // Eingehende Zeile
                zeile = zeilen.next() => {
                    match zeile {
                        Some(Ok(zeile)) => {
                            letzter_empfang = Instant::now();
                            let ergebnis = match zeile {
                                Ok(zeile) => self.zeile_verarbeiten(&mut correlator, &mut ctx, &zeile).await,
                                Err(e) => Err(SignalingError::Protokoll(e)),
                            };
                            match ergebnis {
                                Ok(()) => fehler_in_folge = 0,
                                Err(SignalingError::Protokoll(e)) => {
                                    fehler_in_folge += 1;
                                    self.metriken.protocol_errors_total.inc();
                                    tracing::warn!(
                                        peer = %peer_addr,
                                        fehler = %e,
                                        in_folge = fehler_in_folge,
                                        "Ungueltige Befehlszeile verworfen"
                                    );
                                    if fehler_in_folge > self.konfig.max_protokollfehler {
                                        break "zu viele Protokollfehler";
                                    }
                                }
                                Err(SignalingError::AusgangVoll) => {
                                    tracing::warn!(peer = %peer_addr, "Ausgangs-Queue voll, Gegenseite liest nicht");
                                    break "Ausgangs-Queue voll";
                                }
                                Err(e) => {
                                    tracing::warn!(peer = %peer_addr, fehler = %e, "Antwort nicht sendbar");
                                    break "Senden fehlgeschlagen";
                                }
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(peer = %peer_addr, fehler = %e, "Lesefehler");
                            break "Lesefehler";
                        }
                        None => break "von der Gegenseite getrennt",
                    }
                }

                // Writer-Task gescheitert
                Some(e) = schreibfehler_rx.recv() => {
                    tracing::warn!(peer = %peer_addr, fehler = %e, "Schreiben fehlgeschlagen");
                    break "Schreiben fehlgeschlagen";
                }

                // Auftrag eines anderen Tasks
                Some(auftrag) = auftrag_rx.recv() => {
                    match auftrag {
                        Auftrag::Anfrage { argv, frist, antwort } => {
                            let frist = Instant::now() + frist.unwrap_or(self.konfig.anfrage_timeout);
                            let callback = Box::new(move |_, ergebnis| {
                                let _ = antwort.send(ergebnis);
                            });
                            match correlator.senden_mit_frist(argv, frist, callback) {
                                Ok(seq) => {
                                    self.metriken.requests_sent_total.inc();
                                    tracing::debug!(peer = %peer_addr, seq = %seq, "Anfrage an Gegenseite gesendet");
                                }
                                Err(e) => {
                                    tracing::warn!(peer = %peer_addr, fehler = %e, "Anfrage nicht sendbar");
                                    break "Senden fehlgeschlagen";
                                }
                            }
                        }
                        Auftrag::Trennen => break "Trennung angefordert",
                    }
                }

                // Fristen, Timeouts, Keepalive
                _ = pruefung.tick() => {
                    let jetzt = Instant::now();
                    correlator.abgelaufene_abbrechen(jetzt);

                    if !ctx.ist_angemeldet() && jetzt.duration_since(start) >= self.konfig.auth_timeout {
                        break "keine Anmeldung innerhalb der Frist";
                    }
                    if jetzt.duration_since(letzter_empfang) >= self.konfig.verbindungs_timeout {
                        break "Verbindungs-Timeout";
                    }
                    if ctx.ist_angemeldet() && jetzt >= naechster_ping {
                        naechster_ping = jetzt + self.konfig.keepalive;
                        let frist = jetzt + self.konfig.verbindungs_timeout;
                        if correlator
                            .senden_mit_frist(vec![control::PING.to_string()], frist, Box::new(|_, _| {}))
                            .is_err()
                        {
                            break "Ping-Senden fehlgeschlagen";
                        }
                    }
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break "Server faehrt herunter";
                    }
                }
            }

            offen_gemeldet = self.offene_melden(&correlator, offen_gemeldet);
        };

        // Cleanup beim Verbindungsende
        let abgebrochen = correlator.alle_abbrechen(Abbruch::VerbindungGeschlossen);
        self.offene_melden(&correlator, offen_gemeldet);

        match ctx.identitaet() {
            Identitaet::Angemeldet { .. } => {
                self.metriken.connected_devices.dec();
                if let Err(e) = self.registry.verbindung_entfernen(verbindung) {
                    tracing::debug!(verbindung = %verbindung, fehler = %e, "Verbindung nicht in Registry");
                }
            }
            Identitaet::Anonym => self.metriken.anonymous_connections.dec(),
        }

        // Ausgangs-Queue schliessen, Writer sendet Restdaten und schliesst den Socket
        drop(correlator);
        if tokio::time::timeout(SCHREIBER_NACHLAUF, &mut schreiber)
            .await
            .is_err()
        {
            schreiber.abort();
        }

        tracing::info!(
            peer = %peer_addr,
            verbindung = %verbindung,
            grund,
            abgebrochen,
            "Verbindung beendet"
        );
    }

    async fn zeile_verarbeiten(
        &self,
        correlator: &mut Correlator,
        ctx: &mut VerbindungsKontext,
        zeile: &str,
    ) -> SignalingResult<()> {
        match correlator.eingang_verarbeiten(zeile)? {
            Eingang::Anfrage { seq, argv } => {
                let name = argv.first().map(String::as_str).unwrap_or_default();
                let befehl = control::befehl_label(name);
                self.metriken.requests_total.with_label_values(&[befehl]).inc();
                tracing::trace!(peer = %ctx.handle().peer(), seq = %seq, befehl = %name, "Anfrage empfangen");

                let war_angemeldet = ctx.ist_angemeldet();
                let rueckmeldung = self.handler.anfrage(ctx, seq, argv).await;
                if !war_angemeldet && ctx.ist_angemeldet() {
                    self.metriken.anonymous_connections.dec();
                    self.metriken.connected_devices.inc();
                }

                let antwort = match rueckmeldung {
                    Rueckmeldung::Response(argv) => Command::Response { seq, argv },
                    Rueckmeldung::Approve(argv) => Command::Approve { seq, argv },
                    Rueckmeldung::Keine => return Ok(()),
                };

                let laenge = encode_line(&antwort).len();
                if laenge > self.konfig.max_zeilenlaenge {
                    tracing::warn!(
                        peer = %ctx.handle().peer(),
                        seq = %seq,
                        befehl,
                        laenge,
                        max = self.konfig.max_zeilenlaenge,
                        "Antwort zu gross, sende fail"
                    );
                    correlator.antworten(seq, control::fail_argv(control::ANTWORT_ZU_GROSS))?;
                    return Ok(());
                }
                match antwort {
                    Command::Approve { argv, .. } => correlator.bestaetigen(seq, argv)?,
                    andere => correlator.antworten(seq, andere.into_argv())?,
                }
            }
            Eingang::Zugestellt { seq, art } => match art {
                BefehlsArt::Approve => self.handler.bestaetigung(ctx, seq, true),
                _ => self.handler.antwort(ctx, seq, true),
            },
            Eingang::Unbekannt { seq, art } => match art {
                BefehlsArt::Approve => self.handler.bestaetigung(ctx, seq, false),
                _ => self.handler.antwort(ctx, seq, false),
            },
        }
        Ok(())
    }

    /// Gleicht die Gauge fuer offene Anfragen mit dem Correlator ab
    fn offene_melden(&self, correlator: &Correlator, gemeldet: i64) -> i64 {
        let aktuell = correlator.offene_anzahl() as i64;
        if aktuell != gemeldet {
            self.metriken.pending_requests.add(aktuell - gemeldet);
        }
        aktuell
    }
}
