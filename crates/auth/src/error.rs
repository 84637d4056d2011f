//! Fehlertypen fuer den Credential-Store

use thiserror::Error;

/// Alle moeglichen Fehler beim Aufloesen und Verwalten von Anmeldedaten
///
/// `UnbekannterBenutzer` und `FalschesPasswort` bleiben hier getrennt,
/// nach aussen werden sie zu einer einzigen Meldung zusammengefasst.
#[derive(Debug, Error)]
pub enum AuthError {
    // --- Passwort ---
    #[error("Passwort-Hashing fehlgeschlagen: {0}")]
    PasswortHashing(String),

    // --- Authentifizierung ---
    #[error("Anmeldedaten ungueltig (Login leer)")]
    UngueltigeAnmeldedaten,

    #[error("Unbekannter Benutzer: {0}")]
    UnbekannterBenutzer(String),

    #[error("Falsches Passwort fuer Benutzer: {0}")]
    FalschesPasswort(String),

    // --- Benutzerverwaltung ---
    #[error("Benutzername bereits vergeben: {0}")]
    BenutzernameVergeben(String),

    #[error("User-ID bereits vergeben: {0}")]
    UserIdVergeben(u64),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl AuthError {
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Fehler die auf falsche Anmeldedaten des Clients zurueckgehen
    pub fn ist_anmeldefehler(&self) -> bool {
        matches!(
            self,
            Self::UngueltigeAnmeldedaten | Self::UnbekannterBenutzer(_) | Self::FalschesPasswort(_)
        )
    }
}

/// Result-Alias fuer den Credential-Store
pub type AuthResult<T> = Result<T, AuthError>;
