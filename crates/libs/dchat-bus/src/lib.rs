//! Connection bus for one dchat account.
//!
//! The relay network client (connection setup, sub-link multiplexing,
//! ledger subscriptions) is an external capability described by the
//! [`RelayConnector`] / [`RelayClient`] traits. [`Bus`] owns one such client
//! and adds the bridge's rules on top of it:
//!
//! - a linear state machine (`Disconnected -> Connecting -> Connected`)
//! - a 30 second connect ceiling raced against the caller's cancellation
//! - a connected precondition on every send and ledger call
//! - inbound frames forwarded in arrival order as [`InboundFrame`]s
//! - unconditional, error-swallowing teardown

pub mod bus;
pub mod error;
pub mod relay;

pub use bus::{Bus, ConnectionState, InboundFrame, CONNECT_TIMEOUT, MSG_HOLDING_SECONDS};
pub use error::{BusError, RelayError};
pub use relay::{
    Credentials, FramePayload, RelayClient, RelayConnector, RelayFrame, RelayLink, SendOptions,
    SubscriberSet, SubscribersQuery,
};
