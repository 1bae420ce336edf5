/// Failure reported by the relay client capability.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("relay: {message}")]
pub struct RelayError {
    pub message: String,
}

impl RelayError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Errors returned by [`crate::Bus`] operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum BusError {
    #[error("not connected")]
    NotConnected,

    #[error("connect timed out after {secs}s")]
    ConnectTimeout { secs: u64 },

    #[error("connect cancelled")]
    Cancelled,

    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl BusError {
    /// Returns `true` for faults a later attempt may get past. Cancellation
    /// is final.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}
