//! tvlink-auth – Credential-Store und Passwort-Hashing
//!
//! Dieses Crate implementiert:
//! - Passwort-Hashing mit Argon2id
//! - den `CredentialStore`-Trait, ueber den der Server Anmeldedaten
//!   zu einer User-ID und einem Profil aufloest
//! - einen In-Memory-Store (`SpeicherCredentialStore`), befuellbar aus der
//!   Server-Konfiguration

pub mod error;
pub mod password;
pub mod store;

// Bequeme Re-Exporte
pub use error::{AuthError, AuthResult};
pub use password::{passwort_hashen, passwort_verifizieren, HashKosten};
pub use store::{BenutzerKonfig, CredentialStore, SpeicherCredentialStore};
