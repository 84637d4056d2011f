//! Profil- und Server-Informationen des Control-Kanals
//!
//! Diese Werte werden als JSON-Argumente ueber den Draht geschickt
//! (`get_server_info`, `get_channels`).

use serde::{Deserialize, Serialize};

use crate::auth_info::Bandbreite;
use crate::types::UserId;

/// Informationen die der Server jedem angemeldeten Client mitteilt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// host:port des Bandbreiten-Messpunkts
    #[serde(default)]
    pub bandwidth_host: String,
}

/// Ein TV-Kanal aus dem Benutzerprofil
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    pub url: String,
}

/// Profil eines Benutzers wie es der Credential-Store liefert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    pub login: String,
    /// Maximale Bandbreite in kbit/s (0 = unbegrenzt)
    #[serde(default)]
    pub max_bandbreite: Bandbreite,
    #[serde(default)]
    pub kanaele: Vec<ChannelInfo>,
}

impl UserProfile {
    pub fn neu(user_id: UserId, login: impl Into<String>) -> Self {
        Self {
            user_id,
            login: login.into(),
            max_bandbreite: 0,
            kanaele: Vec::new(),
        }
    }

    /// Effektive Bandbreite: Wunsch des Geraets, begrenzt durch das Profil
    pub fn effektive_bandbreite(&self, angefragt: Bandbreite) -> Bandbreite {
        match (self.max_bandbreite, angefragt) {
            (0, a) => a,
            (max, 0) => max,
            (max, a) => a.min(max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_info_json() {
        let info = ServerInfo {
            bandwidth_host: "10.0.0.1:5201".into(),
        };
        let json = serde_json::to_string(&info).unwrap();
        assert_eq!(json, r#"{"bandwidth_host":"10.0.0.1:5201"}"#);
        let leer: ServerInfo = serde_json::from_str("{}").unwrap();
        assert!(leer.bandwidth_host.is_empty());
    }

    #[test]
    fn bandbreite_wird_begrenzt() {
        let mut profil = UserProfile::neu(UserId(1), "bob");
        assert_eq!(profil.effektive_bandbreite(1000), 1000);

        profil.max_bandbreite = 500;
        assert_eq!(profil.effektive_bandbreite(1000), 500);
        assert_eq!(profil.effektive_bandbreite(200), 200);
        assert_eq!(profil.effektive_bandbreite(0), 500);
    }
}
