//! tvlink-signaling – Control-Kanal zwischen Server und Geraeten
//!
//! Dieser Crate implementiert die Protokoll-Engine und die Sitzungsverwaltung
//! des tvlink Control-Kanals: Anfragen korrelieren, Geraete anmelden,
//! Verbindungen verwalten.
//!
//! ## Architektur
//!
//! ```text
//! ServerHost (Accept-Loop, Lebenszyklus)
//!     |
//!     +-- SessionRegistry (User-ID -> Geraete -> VerbindungsHandle)
//!     |       |
//!     |       +-- CredentialStore (extern, Anmeldedaten aufloesen)
//!     |
//!     v
//! Verbindung (pro TCP-Verbindung ein Task)
//!     |  Identitaet: Anonym -> Angemeldet(user, geraet)
//!     |
//!     +-- RequestCorrelator (Sequenz-IDs, offene Anfragen)
//!     +-- BefehlsHandler    (auth, ping, get_server_info, get_channels)
//! ```
//!
//! Andere Tasks erreichen eine Verbindung nur ueber ihren
//! [`VerbindungsHandle`], der Auftraege in die Queue des Verbindungs-Tasks
//! stellt.

pub mod connection;
pub mod correlator;
pub mod error;
pub mod handlers;
pub mod host;
pub mod registry;

// Bequeme Re-Exporte
pub use connection::{Identitaet, Verbindung, VerbindungsHandle, VerbindungsKonfig, VerbindungsKontext};
pub use correlator::{Abbruch, AnfrageErgebnis, Antwort, AntwortCallback, Eingang, RequestCorrelator, Transport};
pub use error::{RegistryError, SignalingError, SignalingResult};
pub use handlers::{BefehlsHandler, Rueckmeldung, ServerBefehlsHandler};
pub use host::{HostKonfig, HostZustand, ServerHost};
pub use registry::SessionRegistry;
