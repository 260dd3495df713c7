//! GEP Publisher
//!
//! Publishes time-series measurements to subscribers over the Gateway Exchange Protocol.
//!
//! - [`DataPublisher`] accepts subscribers, holds the metadata catalog and routes measurements
//! - [`ClientConnection`] runs one subscriber's command channel
//! - [`CallbackDispatcher`] delivers status, error and connection events on a dedicated thread
//!
//! ```no_run
//! use gep_publisher::{DataPublisher, PublisherConfig};
//!
//! # async fn run() -> gep_publisher::Result<()> {
//! let publisher = DataPublisher::new(PublisherConfig::default())?;
//! publisher.on_status_message(|message| println!("{}", message));
//! publisher.serve("0.0.0.0:6165").await?;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
mod handlers;
pub mod ids;
pub mod measurement;
pub mod publisher;

pub use catalog::Catalog;
pub use config::PublisherConfig;
pub use connection::{CipherKeys, ClientConnection, ConnectionHandle, ConnectionSettings, ConnectionState};
pub use dispatcher::CallbackDispatcher;
pub use error::{PublisherError, Result};
pub use ids::{IdSource, RandomIds, SequentialIds};
pub use measurement::Measurement;
pub use publisher::DataPublisher;
