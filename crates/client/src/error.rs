//! Fehlertypen des Clients

use thiserror::Error;
use tvlink_core::TvlinkError;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Tvlink(#[from] TvlinkError),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Der Verbindungs-Task laeuft nicht mehr
    #[error("Nicht mit Server verbunden")]
    NichtVerbunden,
}
