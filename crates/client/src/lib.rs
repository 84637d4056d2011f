//! tvlink-client – Geraeteseite des Control-Kanals
//!
//! [`ClientService`] haelt die TCP-Verbindung zum Server in einem eigenen
//! Task, meldet das Geraet an und liefert alles Weitere als
//! [`ClientEreignis`] an das Frontend.

pub mod error;
pub mod service;

pub use error::{ClientError, ClientResult};
pub use service::{ClientEreignis, ClientKonfig, ClientService};
