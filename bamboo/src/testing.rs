//! In-process loopback transport used by this crate's own integration tests.
//!
//! Not a production transport — concrete transports are someone else's
//! problem. A process-wide table maps a `(network, peer)` pair to an inbox,
//! so two [`LoopbackTransport`]s constructed with the same network name can
//! reach each other without a real socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;

use bamboo_core::envelope::PeerId;

use crate::transport::{Dest, ReceiveCallback, Transport};

type Inbox = flume::Sender<(PeerId, Bytes)>;
type Network = DashMap<PeerId, Inbox>;

static REGISTRY: Lazy<DashMap<String, Network>> = Lazy::new(DashMap::new);

/// An in-process transport keyed by a network name plus this peer's id.
pub struct LoopbackTransport {
    network: String,
    peer: PeerId,
    inbox: flume::Receiver<(PeerId, Bytes)>,
    callback: Arc<Mutex<Option<ReceiveCallback>>>,
    stop_flag: Arc<AtomicBool>,
    mtu: Option<usize>,
}

impl LoopbackTransport {
    /// Join `network` as `peer`. Any number of peers may join the same
    /// network; `Dest::Broadcast` reaches every other peer already joined.
    #[must_use]
    pub fn new(network: impl Into<String>, peer: impl Into<PeerId>) -> Arc<Self> {
        Self::with_mtu(network, peer, None)
    }

    /// Same as [`Self::new`], but caps framed message size so the oversize
    /// guard in `Runtime::request` can be exercised.
    #[must_use]
    pub fn with_mtu(network: impl Into<String>, peer: impl Into<PeerId>, mtu: Option<usize>) -> Arc<Self> {
        let network = network.into();
        let peer = peer.into();
        let (tx, rx) = flume::unbounded();
        REGISTRY.entry(network.clone()).or_default().insert(peer.clone(), tx);

        Arc::new(Self {
            network,
            peer,
            inbox: rx,
            callback: Arc::new(Mutex::new(None)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            mtu,
        })
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        if let Some(network) = REGISTRY.get(&self.network) {
            network.remove(&self.peer);
        }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, dest: Dest, frame: Bytes) -> std::io::Result<()> {
        let Some(network) = REGISTRY.get(&self.network) else {
            return Ok(());
        };

        match dest {
            Dest::Peer(peer) => {
                if let Some(inbox) = network.get(&peer) {
                    let _ = inbox.send((self.peer.clone(), frame));
                }
            }
            Dest::Broadcast => {
                for entry in network.iter() {
                    if *entry.key() == self.peer {
                        continue;
                    }
                    let _ = entry.value().send((self.peer.clone(), frame.clone()));
                }
            }
        }
        Ok(())
    }

    fn on_receive(&self, cb: ReceiveCallback) {
        *self.callback.lock().unwrap() = Some(cb);
    }

    async fn start(&self) -> std::io::Result<()> {
        let inbox = self.inbox.clone();
        let callback = self.callback.clone();
        let stop_flag = self.stop_flag.clone();
        stop_flag.store(false, Ordering::Relaxed);

        compio::runtime::spawn(async move {
            loop {
                if stop_flag.load(Ordering::Relaxed) {
                    break;
                }
                match inbox.recv_async().await {
                    Ok((source, frame)) => {
                        if let Some(cb) = callback.lock().unwrap().as_ref() {
                            cb(source, frame);
                        }
                    }
                    Err(_) => break,
                }
            }
        })
        .detach();

        Ok(())
    }

    async fn stop(&self) -> std::io::Result<()> {
        self.stop_flag.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn mtu(&self) -> Option<usize> {
        self.mtu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[compio::test]
    async fn unknown_peer_is_a_silent_no_op() {
        let t = LoopbackTransport::new("loopback-test-unknown", "ghost-sender");
        t.send(Dest::Peer(PeerId::from("nobody")), Bytes::from_static(b"hi"))
            .await
            .unwrap();
    }

    #[compio::test]
    async fn broadcast_excludes_sender() {
        let a = LoopbackTransport::new("loopback-test-bcast", "a");
        let b = LoopbackTransport::new("loopback-test-bcast", "b");

        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        b.on_receive(Box::new(move |src, frame| {
            received_clone.lock().unwrap().push((src, frame));
        }));
        b.start().await.unwrap();

        a.send(Dest::Broadcast, Bytes::from_static(b"hello")).await.unwrap();
        compio::time::sleep(std::time::Duration::from_millis(20)).await;

        let got = received.lock().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].0, PeerId::from("a"));
    }
}
