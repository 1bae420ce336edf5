use dchat_bus::BusError;

/// Errors loading or validating a [`crate::GatewayConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("account {account}: {reason}")]
    Invalid { account: String, reason: String },

    #[error("unknown account: {0}")]
    UnknownAccount(String),
}

impl ConfigError {
    pub(crate) fn invalid(account: &str, reason: impl Into<String>) -> Self {
        Self::Invalid { account: account.to_string(), reason: reason.into() }
    }
}

/// Failure reported by a host collaborator (pairing store, reply dispatcher).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{component}: {message}")]
pub struct CollaboratorError {
    pub component: &'static str,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(component: &'static str, message: impl Into<String>) -> Self {
        Self { component, message: message.into() }
    }
}

/// Errors delivering a reply back onto the relay.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
}
