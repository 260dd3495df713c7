//! Publisher error types
//!
//! Handler failures are rendered with `Display` straight into the `Failed` response sent to
//! the subscriber, so these messages are part of the protocol surface.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PublisherError>;

#[derive(Error, Debug)]
pub enum PublisherError {
    #[error("Not enough buffer was provided to parse client data subscription.")]
    SubscriptionBufferTooSmall,

    #[error("Client request for remotely synchronized data subscription was denied. Data publisher currently does not allow for synchronized subscriptions.")]
    SynchronizedSubscription,

    #[error("Cannot initialize client data subscription without a connection string.")]
    MissingConnectionString,

    #[error("Compact measurement format supports at most {limit} signals but the subscription selected {selected}.")]
    CompactSubscriptionTooLarge { selected: usize, limit: usize },

    #[error("Failed to process client data subscription due to exception: {0}")]
    Subscription(String),

    /// Subscription filter expression could not be parsed or evaluated
    #[error("{0}")]
    Filter(#[from] gep_metadata::FilterError),

    #[error("Not enough buffer was provided to parse client operational modes.")]
    OperationalModesBufferTooSmall,

    #[error("\"{connection}\" sent an unrecognized server command: 0x{command:02X}")]
    UnrecognizedCommand { connection: String, command: u8 },

    #[error("Meta-data refresh has been disallowed by the DataPublisher.")]
    MetadataRefreshDisallowed,

    #[error("DataPublisher only supports common serialization format")]
    UnsupportedSerializationFormat,

    #[error("Failed to transfer meta-data due to exception: {0}")]
    MetadataTransfer(String),

    #[error("Cipher index must be 0 or 1")]
    InvalidCipherIndex(usize),

    #[error("Cannot change security mode once publisher has been connected")]
    SecurityModeLocked,

    #[error("Cannot change node ID once publisher has been connected")]
    NodeIdLocked,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(#[from] gep_transport::TransportError),

    #[error("{0}")]
    Core(#[from] gep_core::Error),

    #[error("metadata error: {0}")]
    Metadata(#[from] gep_metadata::MetadataError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
