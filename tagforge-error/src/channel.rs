use thiserror::Error;

/// Failures reported by a tag channel while accepting or discarding
/// operation requests.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel not connected")]
    NotConnected,
    #[error("channel rejected request: {0}")]
    Rejected(String),
    #[error("device queue overflow ({pending} pending)")]
    QueueOverflow { pending: usize },
    #[error("channel transport error: {0}")]
    Transport(String),
}
