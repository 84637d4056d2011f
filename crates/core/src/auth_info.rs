//! Anmeldedaten eines Geraets
//!
//! `AuthCredential` ist ein unveraenderlicher Wert aus Login, Passwort und
//! Bandbreitenlimit. Er wird entweder aus einer `auth`-Anfrage auf dem Draht
//! oder aus der lokalen Client-Konfiguration gebaut.

use serde::{Deserialize, Serialize};

/// Bandbreite in kbit/s
pub type Bandbreite = u64;

/// Login, Passwort und Bandbreitenlimit
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthCredential {
    login: String,
    password: String,
    #[serde(default)]
    bandwidth: Bandbreite,
}

impl AuthCredential {
    pub fn neu(login: impl Into<String>, password: impl Into<String>, bandwidth: Bandbreite) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
            bandwidth,
        }
    }

    /// Gueltig genau dann wenn der Login nicht leer ist
    pub fn ist_gueltig(&self) -> bool {
        !self.login.is_empty()
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn bandwidth(&self) -> Bandbreite {
        self.bandwidth
    }
}

// Passwort taucht nie in Logs auf
impl std::fmt::Debug for AuthCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthCredential")
            .field("login", &self.login)
            .field("password", &"***")
            .field("bandwidth", &self.bandwidth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gueltig_nur_mit_login() {
        assert!(AuthCredential::neu("bob", "pw", 1000).ist_gueltig());
        assert!(AuthCredential::neu("bob", "", 0).ist_gueltig());
        assert!(!AuthCredential::neu("", "pw", 1000).ist_gueltig());
        assert!(!AuthCredential::default().ist_gueltig());
    }

    #[test]
    fn debug_verbirgt_passwort() {
        let ausgabe = format!("{:?}", AuthCredential::neu("bob", "geheim", 5));
        assert!(ausgabe.contains("bob"));
        assert!(!ausgabe.contains("geheim"));
    }

    #[test]
    fn bandbreite_fehlt_in_json() {
        let cred: AuthCredential =
            serde_json::from_str(r#"{"login":"bob","password":"pw"}"#).unwrap();
        assert_eq!(cred.bandwidth(), 0);
        assert_eq!(cred.login(), "bob");
    }
}
