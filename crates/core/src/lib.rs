//! tvlink-core – Gemeinsame Typen und Fehlertypen
//!
//! Dieses Crate stellt die Wertetypen bereit, die von Server, Client und
//! Protokoll gemeinsam genutzt werden: Identifikatoren, Anmeldedaten und
//! die Profil-/Server-Informationen die ueber den Control-Kanal gehen.

pub mod auth_info;
pub mod error;
pub mod server_info;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use auth_info::AuthCredential;
pub use error::{Result, TvlinkError};
pub use server_info::{ChannelInfo, ServerInfo, UserProfile};
pub use types::{DeviceId, UserId, VerbindungsId};
