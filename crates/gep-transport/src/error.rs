//! Errors raised by the command-channel transport

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("bind failed: {0}")]
    BindFailed(String),

    #[error("accept failed: {0}")]
    AcceptFailed(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("{0}")]
    SendFailed(String),

    #[error("{0}")]
    ReceiveFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("not connected")]
    NotConnected,
}

impl From<gep_core::Error> for TransportError {
    fn from(e: gep_core::Error) -> Self {
        TransportError::Protocol(e.to_string())
    }
}
