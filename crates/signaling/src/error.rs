//! Fehlertypen fuer Correlator, Registry und Host

use thiserror::Error;
use tvlink_core::{DeviceId, UserId};
use tvlink_protocol::{ProtokollFehler, SequenceId};

use crate::correlator::Abbruch;

/// Fehler der Session-Registry
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// (User, Geraet) ist bereits registriert
    #[error("Geraet {device_id} von Benutzer {user_id} ist bereits verbunden")]
    DoppeltesGeraet { user_id: UserId, device_id: DeviceId },

    /// Eintrag nicht vorhanden (nicht fatal)
    #[error("Nicht gefunden: {0}")]
    NichtGefunden(String),

    /// Anmeldung fehlgeschlagen, bewusst ohne Grund
    #[error("Authentifizierung fehlgeschlagen")]
    AuthentifizierungFehlgeschlagen,
}

/// Fehlertyp fuer den Signaling-Service
#[derive(Debug, Error)]
pub enum SignalingError {
    /// IO-Fehler (TCP, Socket)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Ungueltige Befehlszeile
    #[error("Protokollfehler: {0}")]
    Protokoll(#[from] ProtokollFehler),

    /// Registry-Fehler
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Fuer diese Sequenz-ID wartet bereits eine Anfrage
    #[error("Sequenz-ID {0} ist bereits vergeben")]
    SequenzBelegt(SequenceId),

    /// Verbindung bereits angemeldet (Identitaet wechselt nur einmal)
    #[error("Verbindung ist bereits angemeldet")]
    BereitsAngemeldet,

    /// Ausgangs-Queue voll, die Gegenseite liest nicht schnell genug
    #[error("Ausgangs-Queue voll")]
    AusgangVoll,

    /// Sequenz-IDs erschoepft, die Verbindung muss neu aufgebaut werden
    #[error("Sequenz-IDs erschoepft")]
    SequenzErschoepft,

    /// Verbindung wurde getrennt
    #[error("Verbindung getrennt")]
    VerbindungGetrennt,

    /// Anfrage ohne Antwort beendet
    #[error("Anfrage abgebrochen: {0}")]
    Abgebrochen(Abbruch),

    /// Operation im aktuellen Host-Zustand nicht erlaubt
    #[error("Ungueltiger Host-Zustand: {0}")]
    UngueltigerZustand(String),

    /// Interner Fehler
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl SignalingError {
    /// Erstellt einen internen Fehler
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }
}

/// Result-Typ fuer den Signaling-Service
pub type SignalingResult<T> = Result<T, SignalingError>;
