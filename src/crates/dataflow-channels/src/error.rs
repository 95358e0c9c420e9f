//! Error types for channel operations.

use thiserror::Error;

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Errors that can occur while updating or reading a channel.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Attempted to read a channel that has never been written to.
    #[error("channel is empty")]
    Empty,

    /// An update violated the channel's arity or shape contract
    /// (e.g. more than one value delivered to a last-value channel).
    #[error("invalid channel update: {0}")]
    Invalid(String),

    /// A snapshot could not be restored into the channel.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}
