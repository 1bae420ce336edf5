//! Per-account orchestration for the dchat relay bridge.
//!
//! Each configured account runs as one [`AccountSession`] that exclusively
//! owns a [`dchat_bus::Bus`] and a [`dchat_wire::DedupCache`]. The session
//! connects (retrying with backoff), subscribes its topics and feeds every
//! inbound frame through the pipeline:
//!
//! ```text
//! normalize sender -> parse -> dedup gate -> decode -> receipt
//!     -> DM policy (direct chats only) -> reply dispatch
//! ```
//!
//! The host runtime plugs in through two collaborator traits,
//! [`PairingStore`] and [`ReplyDispatcher`]. [`Gateway`] supervises one
//! session task per enabled account.

pub mod collab;
pub mod config;
pub mod error;
pub mod gateway;
pub mod outbound;
pub mod policy;
pub mod session;

pub use collab::{InboundContext, PairingRequest, PairingStore, ReplyDispatcher};
pub use config::{AccountConfig, GatewayConfig};
pub use error::{CollaboratorError, ConfigError, DeliveryError};
pub use gateway::{Collaborators, Gateway};
pub use outbound::{chunk_text, ReplyRoute, ReplySink};
pub use policy::{evaluate_dm, is_allowed, merge_allow_from, DmDecision, DmPolicy};
pub use session::AccountSession;
