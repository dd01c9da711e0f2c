//! Background HELLO announcer.
//!
//! Transport-agnostic: the announcer only knows how to tick on a schedule
//! and invoke an [`Announce`] sink. `Runtime` (the facade crate) is the sink
//! that actually builds and sends the HELLO frame — this module never talks
//! to a `Transport` directly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{select, FutureExt};
use tracing::{debug, info};

use crate::config::MIN_DISCOVERY_INTERVAL_SECS;

/// Something that can emit a HELLO when the announcer ticks.
#[async_trait]
pub trait Announce: Send + Sync {
    async fn announce(&self);
}

/// Handle to a running announcer task. Dropping this handle does not stop
/// the task — call [`Announcer::stop`] for a clean, cooperative shutdown.
pub struct Announcer {
    stop_tx: flume::Sender<()>,
}

impl Announcer {
    /// Start the announcer: one immediate announce, then one every
    /// `interval_secs` (floored to [`MIN_DISCOVERY_INTERVAL_SECS`]).
    pub fn start<A: Announce + 'static>(sink: Arc<A>, interval_secs: u64) -> Self {
        let interval = Duration::from_secs(interval_secs.max(MIN_DISCOVERY_INTERVAL_SECS));
        let (stop_tx, stop_rx) = flume::bounded::<()>(0);

        info!(interval_secs = interval.as_secs(), "discovery announcer starting");

        compio::runtime::spawn(async move {
            sink.announce().await;
            loop {
                select! {
                    _ = compio::time::sleep(interval).fuse() => {
                        sink.announce().await;
                    }
                    _ = stop_rx.recv_async().fuse() => break,
                }
            }
            debug!("discovery announcer stopped");
        })
        .detach();

        Self { stop_tx }
    }

    /// Request a cooperative stop by closing the signal channel. Woken at
    /// the top of the current wait, so shutdown is never delayed beyond one
    /// in-flight tick.
    pub fn stop(self) {
        drop(self.stop_tx);
    }
}
