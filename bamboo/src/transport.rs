//! The `Transport` contract: the opaque bidirectional frame mover `Runtime`
//! is built on top of.

use std::sync::Arc;

use async_trait::async_trait;
use bamboo_core::envelope::PeerId;
use bytes::Bytes;

/// A send destination: a named peer, or the absent-`destid` broadcast
/// sentinel. Kept as its own type rather than overloading the peer-id
/// string namespace with a broadcast literal, per the wire contract's
/// "absent `destid` ⇒ broadcast" rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dest {
    Peer(PeerId),
    Broadcast,
}

/// Callback a `Transport` invokes for each inbound frame: `(source, frame)`.
pub type ReceiveCallback = Box<dyn Fn(PeerId, Bytes) + Send + Sync>;

/// A transport is an opaque, bidirectional frame mover.
///
/// A transport MAY deliver the same frame at most once; duplicate delivery
/// is not required to be handled by implementations of this trait.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send a framed payload to `dest`. Must be safely callable from
    /// multiple execution contexts concurrently.
    async fn send(&self, dest: Dest, frame: Bytes) -> std::io::Result<()>;

    /// Install the single callback invoked for every inbound frame.
    fn on_receive(&self, cb: ReceiveCallback);

    async fn start(&self) -> std::io::Result<()>;

    async fn stop(&self) -> std::io::Result<()>;

    /// Maximum frame size this transport can carry, if it imposes one.
    /// `None` means no oversize guard is applied.
    fn mtu(&self) -> Option<usize> {
        None
    }
}

/// An `Arc`-wrapped transport is itself a transport: `Runtime<T>` is generic
/// over `T: Transport`, and transport constructors (e.g.
/// `testing::LoopbackTransport::new`) hand back `Arc<Self>` so the same
/// handle can be shared between the `Runtime` and anything else holding a
/// reference to it.
#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, dest: Dest, frame: Bytes) -> std::io::Result<()> {
        T::send(self, dest, frame).await
    }

    fn on_receive(&self, cb: ReceiveCallback) {
        T::on_receive(self, cb);
    }

    async fn start(&self) -> std::io::Result<()> {
        T::start(self).await
    }

    async fn stop(&self) -> std::io::Result<()> {
        T::stop(self).await
    }

    fn mtu(&self) -> Option<usize> {
        T::mtu(self)
    }
}
