//! tvlink-protocol – Befehlsprotokoll des Control-Kanals
//!
//! Jede Zeile auf dem Draht ist ein Befehl der Form
//!
//! ```text
//! <sequenz-id> <Request|Response|Approve> <arg0> <arg1> ...\n
//! ```
//!
//! - [`command`]: strukturierter Befehl (Art + Sequenz-ID + Argumente)
//! - [`codec`]: Text <-> Befehl (inkl. Escaping der Argumente)
//! - [`wire`]: tokio-util Codec fuer `Framed`
//! - [`control`]: Befehlsnamen und Payload-Helfer der Anwendung

pub mod codec;
pub mod command;
pub mod control;
pub mod error;
pub mod wire;

pub use codec::{decode_line, encode_line};
pub use command::{BefehlsArt, Command, SequenceId};
pub use error::{ProtokollFehler, ProtokollResult};
pub use wire::ZeilenCodec;
