//! Passwort-Hashing mit Argon2id
//!
//! Gespeichert wird der PHC-String (Algorithmus, Parameter, Salt, Hash).
//! Die Verifikation liest die Parameter aus dem gespeicherten Hash, sodass
//! sich die Kosten fuer neue Hashes aendern lassen ohne alte zu entwerten.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params, Version,
};

use crate::error::AuthError;

/// Kostenparameter fuer neue Argon2id-Hashes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashKosten {
    /// Speicher in KiB
    pub m_cost: u32,
    /// Iterationen
    pub t_cost: u32,
    /// Parallelismus
    pub p_cost: u32,
}

impl Default for HashKosten {
    /// OWASP-Empfehlung: 64 MiB, 3 Iterationen, 1 Thread
    fn default() -> Self {
        Self {
            m_cost: 64 * 1024,
            t_cost: 3,
            p_cost: 1,
        }
    }
}

impl HashKosten {
    /// Minimale Kosten, nur fuer Tests und lokale Entwicklung
    pub fn minimal() -> Self {
        Self {
            m_cost: Params::MIN_M_COST.max(8),
            t_cost: 1,
            p_cost: 1,
        }
    }

    fn argon2(&self) -> Result<Argon2<'static>, AuthError> {
        let params = Params::new(self.m_cost, self.t_cost, self.p_cost, None)
            .map_err(|e| AuthError::PasswortHashing(format!("Argon2-Parameter ungueltig: {e}")))?;
        Ok(Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Hasht ein Passwort mit Argon2id (Standardkosten) und zufaelligem Salt
pub fn passwort_hashen(passwort: &str) -> Result<String, AuthError> {
    passwort_hashen_mit(passwort, HashKosten::default())
}

/// Hasht ein Passwort mit den angegebenen Kosten
pub fn passwort_hashen_mit(passwort: &str, kosten: HashKosten) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);

    kosten
        .argon2()?
        .hash_password(passwort.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::PasswortHashing(e.to_string()))
}

/// Prueft ob ein String ein parsebarer PHC-Hash ist
pub fn hash_pruefen(hash: &str) -> Result<(), AuthError> {
    PasswordHash::new(hash)
        .map(|_| ())
        .map_err(|e| AuthError::PasswortHashing(format!("Ungueltiges Hash-Format: {e}")))
}

/// Verifiziert ein Passwort gegen einen gespeicherten PHC-Hash
///
/// Gibt `true` zurueck wenn das Passwort korrekt ist.
pub fn passwort_verifizieren(passwort: &str, hash: &str) -> Result<bool, AuthError> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AuthError::PasswortHashing(format!("Ungueltiges Hash-Format: {e}")))?;

    match Argon2::default().verify_password(passwort.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(AuthError::PasswortHashing(e.to_string())),
    }
}
