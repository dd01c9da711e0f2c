//! Bamboo Core
//!
//! Protocol-agnostic kernel for the bamboo mesh runtime:
//! - Canonical message shape and wire framing (`envelope`, `wire`, `builder`)
//! - Key/capability registry with revision-based staleness (`keys`)
//! - Per-peer topic-membership tables (`subscription`)
//! - ACK/RESP correlation core (`correlation`)
//! - Background HELLO announcer (`discovery`)
//! - Runtime tunables (`config`)
//! - Error types (`error`)
//!
//! This crate knows nothing about how bytes actually move between peers —
//! that contract is `bamboo::transport::Transport`, defined one layer up.

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod builder;
pub mod config;
pub mod correlation;
pub mod discovery;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod subscription;
pub mod wire;

pub mod prelude {
    pub use crate::builder::MessageBuilder;
    pub use crate::config::RuntimeConfig;
    pub use crate::correlation::{Correlator, PendingTransaction, RequestOutcome};
    pub use crate::discovery::{Announce, Announcer};
    pub use crate::envelope::{Envelope, Message, MsgType, PeerId};
    pub use crate::error::{BambooError, Result};
    pub use crate::keys::KeyRegistry;
    pub use crate::subscription::SubscriptionTable;
    pub use crate::wire::{pack_frame, unpack_frame};
}
