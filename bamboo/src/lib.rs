//! # Bamboo
//!
//! A transport-agnostic peer-to-peer messaging runtime for small mesh
//! deployments (dozens of nodes, cooperative not adversarial).
//!
//! ## Architecture
//!
//! - **`bamboo-core`**: the protocol kernel — envelope & wire framing, the
//!   key/capability registry, per-peer subscription tables, the ACK/RESP
//!   correlation core, and the background HELLO announcer. Runtime-agnostic:
//!   it knows nothing about how bytes move between peers.
//! - **`bamboo`** (this crate): defines the [`Transport`] contract and wires
//!   the kernel into a usable [`Runtime`].
//!
//! ## What a node can do
//!
//! - Issue keyed request/response calls to a named peer, with at-most-one
//!   send and ACK-then-RESP correlation (`Runtime::request`,
//!   `Runtime::request_peer`).
//! - Publish topics that fan out to known subscribers, or fall back to
//!   broadcast when none are known (`Runtime::publish`).
//! - Discover peers, their served keys, capabilities, and topic
//!   subscriptions via a periodic HELLO broadcast.
//!
//! Concrete transports (peer-group multicast, a message broker, plain TCP)
//! are out of scope for this workspace — bring your own by implementing
//! [`Transport`]. The `testing` feature gates an in-process
//! [`testing::LoopbackTransport`] used by this crate's own integration
//! tests; it is not a production transport.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! # #[cfg(feature = "testing")]
//! # async fn example() -> bamboo_core::error::Result<()> {
//! use bamboo::testing::LoopbackTransport;
//! use bamboo::Runtime;
//! use bamboo_core::config::RuntimeConfig;
//! use serde_json::{Map, Value};
//!
//! let transport = LoopbackTransport::new("demo-net", "node-a");
//! let node = Runtime::new("node-a", transport, RuntimeConfig::fast_test());
//! node.start().await?;
//!
//! node.on("perf.echo", |msg| async move {
//!     Ok(Value::Object(msg.envelope.payload))
//! });
//!
//! node.publish("demo.topic", Map::new()).await?;
//! node.stop().await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::future_not_send)]

pub mod dev_tracing;
pub mod runtime;
pub mod transport;

#[cfg(feature = "testing")]
pub mod testing;

pub use bamboo_core::prelude::*;
pub use runtime::Runtime;
pub use transport::{Dest, ReceiveCallback, Transport};
