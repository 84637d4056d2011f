//! Request-Correlator – Protokoll-Engine einer einzelnen Verbindung
//!
//! Vergibt Sequenz-IDs, haelt die Tabelle offener Anfragen und ordnet
//! eingehende `Response`/`Approve`-Zeilen der passenden Anfrage zu.
//! Eingehende `Request`-Zeilen gibt er an den Aufrufer zurueck, der sie an
//! den Befehls-Handler weiterreicht.
//!
//! Der Correlator gehoert genau einem Verbindungs-Task. Zaehler und Tabelle
//! brauchen deshalb keine Sperre.
//!
//! ## Garantien
//! - Sequenz-IDs beginnen bei 1 und steigen streng monoton
//! - Jeder Callback wird genau einmal aufgerufen: mit der Antwort oder mit
//!   einem [`Abbruch`]
//! - Antworten auf unbekannte IDs veraendern die Tabelle nicht

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::mpsc;
use tvlink_protocol::{decode_line, BefehlsArt, Command, ProtokollResult, SequenceId};

use crate::error::{SignalingError, SignalingResult};

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Schreibseite einer Verbindung aus Sicht des Correlators
pub trait Transport: Send {
    /// Reicht einen Befehl zum Senden weiter, ohne zu blockieren
    fn schreiben(&mut self, befehl: Command) -> SignalingResult<()>;
}

/// Ausgangs-Queue zum Writer-Task der Verbindung
///
/// Eine volle Queue wird nicht abgewartet: der Aufrufer trennt die
/// Verbindung.
impl Transport for mpsc::Sender<Command> {
    fn schreiben(&mut self, befehl: Command) -> SignalingResult<()> {
        self.try_send(befehl).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SignalingError::AusgangVoll,
            mpsc::error::TrySendError::Closed(_) => SignalingError::VerbindungGetrennt,
        })
    }
}

/// Puffert alle Befehle, z.B. fuer Tests
impl Transport for Vec<Command> {
    fn schreiben(&mut self, befehl: Command) -> SignalingResult<()> {
        self.push(befehl);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Ergebnisse
// ---------------------------------------------------------------------------

/// Grund, aus dem eine offene Anfrage ohne Antwort beendet wurde
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abbruch {
    /// Verbindung wurde geschlossen
    VerbindungGeschlossen,
    /// Frist abgelaufen
    Zeitueberschreitung,
    /// Explizit abgebrochen
    Abgebrochen,
}

impl std::fmt::Display for Abbruch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VerbindungGeschlossen => f.write_str("Verbindung geschlossen"),
            Self::Zeitueberschreitung => f.write_str("Zeitueberschreitung"),
            Self::Abgebrochen => f.write_str("abgebrochen"),
        }
    }
}

/// Antwort der Gegenseite auf eine Anfrage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Antwort {
    /// `Response` oder `Approve`
    pub art: BefehlsArt,
    pub argv: Vec<String>,
}

/// Ergebnis einer Anfrage: Antwort oder Abbruch
pub type AnfrageErgebnis = Result<Antwort, Abbruch>;

/// Abschluss-Callback einer offenen Anfrage
pub type AntwortCallback = Box<dyn FnOnce(SequenceId, AnfrageErgebnis) + Send>;

/// Was eine eingehende Zeile bewirkt hat
#[derive(Debug, PartialEq, Eq)]
pub enum Eingang {
    /// Antwort wurde einer offenen Anfrage zugestellt
    Zugestellt { seq: SequenceId, art: BefehlsArt },
    /// Antwort ohne offene Anfrage (unbekannt oder doppelt), verworfen
    Unbekannt { seq: SequenceId, art: BefehlsArt },
    /// Anfrage der Gegenseite, muss vom Handler beantwortet werden
    Anfrage { seq: SequenceId, argv: Vec<String> },
}

struct OffeneAnfrage {
    callback: AntwortCallback,
    frist: Option<Instant>,
}

// ---------------------------------------------------------------------------
// RequestCorrelator
// ---------------------------------------------------------------------------

/// Protokoll-Engine einer Verbindung
pub struct RequestCorrelator<T: Transport> {
    transport: T,
    naechste_seq: u64,
    offen: HashMap<SequenceId, OffeneAnfrage>,
}

impl<T: Transport> RequestCorrelator<T> {
    pub fn neu(transport: T) -> Self {
        Self {
            transport,
            naechste_seq: 1,
            offen: HashMap::new(),
        }
    }

    /// Vergibt die naechste Sequenz-ID, ohne etwas zu senden
    ///
    /// Fuer Aufrufer, die erst mit [`abonnieren`](Self::abonnieren) einen
    /// Callback registrieren und dann selbst senden.
    pub fn naechste_sequenz(&mut self) -> SignalingResult<SequenceId> {
        let seq = SequenceId(self.naechste_seq);
        self.naechste_seq = self
            .naechste_seq
            .checked_add(1)
            .ok_or(SignalingError::SequenzErschoepft)?;
        Ok(seq)
    }

    /// Sendet eine Anfrage und registriert den Callback fuer die Antwort
    ///
    /// Blockiert nicht. Schlaegt das Schreiben fehl, wird der Callback sofort
    /// mit [`Abbruch::VerbindungGeschlossen`] aufgerufen.
    pub fn senden(
        &mut self,
        argv: Vec<String>,
        callback: AntwortCallback,
    ) -> SignalingResult<SequenceId> {
        self.senden_intern(argv, None, callback)
    }

    /// Wie [`senden`](Self::senden), aber mit Frist fuer die Antwort
    pub fn senden_mit_frist(
        &mut self,
        argv: Vec<String>,
        frist: Instant,
        callback: AntwortCallback,
    ) -> SignalingResult<SequenceId> {
        self.senden_intern(argv, Some(frist), callback)
    }

    fn senden_intern(
        &mut self,
        argv: Vec<String>,
        frist: Option<Instant>,
        callback: AntwortCallback,
    ) -> SignalingResult<SequenceId> {
        if argv.is_empty() {
            return Err(SignalingError::Protokoll(
                tvlink_protocol::ProtokollFehler::AnfrageOhneArgumente,
            ));
        }
        let seq = self.naechste_sequenz()?;
        self.offen.insert(seq, OffeneAnfrage { callback, frist });

        if let Err(e) = self.transport.schreiben(Command::Request { seq, argv }) {
            if let Some(anfrage) = self.offen.remove(&seq) {
                (anfrage.callback)(seq, Err(Abbruch::VerbindungGeschlossen));
            }
            return Err(e);
        }
        tracing::trace!(seq = %seq, offen = self.offen.len(), "Anfrage gesendet");
        Ok(seq)
    }

    /// Registriert einen Callback fuer eine selbst gewaehlte Sequenz-ID
    ///
    /// Abgelehnt, wenn fuer die ID bereits eine Anfrage offen ist oder
    /// danach keine ID mehr frei waere. Spaeter vergebene IDs liegen immer
    /// oberhalb der abonnierten.
    pub fn abonnieren(&mut self, seq: SequenceId, callback: AntwortCallback) -> SignalingResult<()> {
        self.registrieren(seq, None, callback)
    }

    pub fn abonnieren_mit_frist(
        &mut self,
        seq: SequenceId,
        frist: Instant,
        callback: AntwortCallback,
    ) -> SignalingResult<()> {
        self.registrieren(seq, Some(frist), callback)
    }

    fn registrieren(
        &mut self,
        seq: SequenceId,
        frist: Option<Instant>,
        callback: AntwortCallback,
    ) -> SignalingResult<()> {
        if self.offen.contains_key(&seq) {
            return Err(SignalingError::SequenzBelegt(seq));
        }
        if seq.0 >= self.naechste_seq {
            self.naechste_seq = seq.0.checked_add(1).ok_or(SignalingError::SequenzErschoepft)?;
        }
        self.offen.insert(seq, OffeneAnfrage { callback, frist });
        Ok(())
    }

    /// Schreibt eine Anfrage mit vorher vergebener ID (ohne Callback)
    pub fn anfrage_schreiben(&mut self, seq: SequenceId, argv: Vec<String>) -> SignalingResult<()> {
        self.transport.schreiben(Command::Request { seq, argv })
    }

    /// Beantwortet eine Anfrage der Gegenseite mit `Response`
    pub fn antworten(&mut self, seq: SequenceId, argv: Vec<String>) -> SignalingResult<()> {
        self.transport.schreiben(Command::Response { seq, argv })
    }

    /// Bestaetigt eine Anfrage der Gegenseite mit `Approve`
    pub fn bestaetigen(&mut self, seq: SequenceId, argv: Vec<String>) -> SignalingResult<()> {
        self.transport.schreiben(Command::Approve { seq, argv })
    }

    /// Verarbeitet eine eingehende Zeile
    ///
    /// Eine nicht dekodierbare Zeile ist ein Protokollfehler und laesst die
    /// Tabelle unveraendert.
    pub fn eingang_verarbeiten(&mut self, zeile: &str) -> ProtokollResult<Eingang> {
        let befehl = decode_line(zeile)?;
        let seq = befehl.seq();
        let art = befehl.art();

        match befehl {
            Command::Request { seq, argv } => Ok(Eingang::Anfrage { seq, argv }),
            Command::Response { argv, .. } | Command::Approve { argv, .. } => {
                match self.offen.remove(&seq) {
                    Some(anfrage) => {
                        (anfrage.callback)(seq, Ok(Antwort { art, argv }));
                        Ok(Eingang::Zugestellt { seq, art })
                    }
                    None => {
                        tracing::debug!(seq = %seq, art = %art, "Antwort ohne offene Anfrage verworfen");
                        Ok(Eingang::Unbekannt { seq, art })
                    }
                }
            }
        }
    }

    /// Bricht eine offene Anfrage ab
    ///
    /// Gibt `false` zurueck, wenn fuer die ID nichts offen war.
    pub fn abbrechen(&mut self, seq: SequenceId) -> bool {
        match self.offen.remove(&seq) {
            Some(anfrage) => {
                (anfrage.callback)(seq, Err(Abbruch::Abgebrochen));
                true
            }
            None => false,
        }
    }

    /// Beendet alle Anfragen, deren Frist vor `jetzt` liegt
    pub fn abgelaufene_abbrechen(&mut self, jetzt: Instant) -> usize {
        let abgelaufen: Vec<SequenceId> = self
            .offen
            .iter()
            .filter(|(_, a)| a.frist.is_some_and(|f| f <= jetzt))
            .map(|(seq, _)| *seq)
            .collect();

        for seq in &abgelaufen {
            if let Some(anfrage) = self.offen.remove(seq) {
                tracing::debug!(seq = %seq, "Anfrage-Frist abgelaufen");
                (anfrage.callback)(*seq, Err(Abbruch::Zeitueberschreitung));
            }
        }
        abgelaufen.len()
    }

    /// Beendet alle offenen Anfragen mit dem angegebenen Grund
    ///
    /// Danach ist die Tabelle leer. Aufrufreihenfolge: aufsteigende IDs.
    pub fn alle_abbrechen(&mut self, grund: Abbruch) -> usize {
        let mut offen: Vec<_> = self.offen.drain().collect();
        offen.sort_by_key(|(seq, _)| *seq);
        let anzahl = offen.len();
        for (seq, anfrage) in offen {
            (anfrage.callback)(seq, Err(grund));
        }
        anzahl
    }

    pub fn offene_anzahl(&self) -> usize {
        self.offen.len()
    }

    pub fn ist_offen(&self, seq: SequenceId) -> bool {
        self.offen.contains_key(&seq)
    }

    /// Naechster Fristablauf, falls eine Anfrage eine Frist hat
    pub fn naechste_frist(&self) -> Option<Instant> {
        self.offen.values().filter_map(|a| a.frist).min()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: Transport> Drop for RequestCorrelator<T> {
    fn drop(&mut self) {
        if !self.offen.is_empty() {
            self.alle_abbrechen(Abbruch::VerbindungGeschlossen);
        }
    }
}
