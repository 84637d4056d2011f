//! Fehlertypen fuer tvlink
//!
//! Zentraler Fehler-Enum fuer Zustaende die crate-uebergreifend auftreten.
//! Untermodule definieren eigene Fehler und konvertieren bei Bedarf via `#[from]`.

use thiserror::Error;

/// Globaler Result-Alias fuer tvlink
pub type Result<T> = std::result::Result<T, TvlinkError>;

/// Crate-uebergreifende Fehler
#[derive(Debug, Error)]
pub enum TvlinkError {
    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = TvlinkError::Verbindung("127.0.0.1:7878: connection refused".into());
        assert_eq!(
            e.to_string(),
            "Verbindung fehlgeschlagen: 127.0.0.1:7878: connection refused"
        );
        assert_eq!(
            TvlinkError::Konfiguration("device_id fehlt".into()).to_string(),
            "Konfigurationsfehler: device_id fehlt"
        );
    }
}
