//! Error types for voltaic-core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid element: {0}")]
    InvalidElement(String),

    #[error("unknown pin: {0}")]
    UnknownPin(String),

    #[error("pin already connected: {0}")]
    PinAlreadyConnected(String),

    #[error("unconnected terminal: element {element}, branch {branch}")]
    UnconnectedTerminal { element: usize, branch: usize },

    #[error("invalid circuit: {0}")]
    InvalidCircuit(String),
}

pub type Result<T> = std::result::Result<T, Error>;
