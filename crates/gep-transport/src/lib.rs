//! GEP Transport
//!
//! The command channel between a publisher and its subscribers. A [`TcpServer`] accepts
//! connections and splits each into a [`TcpSender`] backed by a writer task and a
//! [`TcpReceiver`] that reads one command frame per call.

pub mod error;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use tcp::{TcpConfig, TcpReceiver, TcpSender, TcpServer};
pub use traits::{TransportEvent, TransportReceiver, TransportSender, TransportServer};
