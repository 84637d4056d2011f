//! Fehlertypen fuer das Befehlsprotokoll

use thiserror::Error;

/// Fehler beim Dekodieren oder Auswerten einer Befehlszeile
#[derive(Debug, Error)]
pub enum ProtokollFehler {
    #[error("Leere Befehlszeile")]
    LeereZeile,

    #[error("Ungueltige Sequenz-ID: '{0}'")]
    UngueltigeSequenz(String),

    #[error("Befehlsart fehlt")]
    FehlendeArt,

    #[error("Unbekannte Befehlsart: '{0}'")]
    UnbekannteArt(String),

    #[error("Request ohne Argumente")]
    AnfrageOhneArgumente,

    #[error("Ungueltige Escape-Sequenz in '{0}'")]
    UngueltigesEscape(String),

    #[error("Zeile ist kein gueltiges UTF-8 (Byte {position})")]
    UngueltigesUtf8 { position: usize },

    #[error("Zeile zu lang: {laenge} Bytes (Maximum: {max} Bytes)")]
    ZeileZuLang { laenge: usize, max: usize },

    #[error("Ungueltige Argumente fuer '{befehl}': {grund}")]
    UngueltigeArgumente { befehl: String, grund: String },

    #[error("JSON-Fehler: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtokollFehler {
    pub fn argumente(befehl: &str, grund: impl Into<String>) -> Self {
        Self::UngueltigeArgumente {
            befehl: befehl.to_string(),
            grund: grund.into(),
        }
    }
}

/// Result-Alias fuer das Befehlsprotokoll
pub type ProtokollResult<T> = Result<T, ProtokollFehler>;
