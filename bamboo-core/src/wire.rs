//! Frame encoding: header JSON + optional `\n\n` separator + optional binary blob.
//!
//! A frame is never fragmented mid-header by contract — a full frame arrives
//! as one transport delivery — so decoding is a single split, not an
//! incremental decoder like a stream-oriented codec.

use bytes::{Bytes, BytesMut};

use crate::envelope::{Envelope, Message};
use crate::error::{BambooError, Result};

/// The two-byte separator between header JSON and an optional binary blob.
const SEP: &[u8] = b"\n\n";

/// Encode a [`Message`] into its on-wire frame.
///
/// The header is compact JSON (no pretty-printing), matching the reference
/// implementation's `separators=(",", ":")`.
pub fn pack_frame(msg: &Message) -> Result<Bytes> {
    let header = serde_json::to_vec(&msg.envelope)?;

    let mut buf = BytesMut::with_capacity(header.len() + msg.binary.as_ref().map_or(0, |b| b.len() + SEP.len()));
    buf.extend_from_slice(&header);

    if let Some(binary) = &msg.binary {
        buf.extend_from_slice(SEP);
        buf.extend_from_slice(binary);
    }

    Ok(buf.freeze())
}

/// Decode a frame into a [`Message`].
///
/// Splits at the FIRST occurrence of `\n\n`; absence of the separator means
/// a header-only frame with no binary. Unknown header fields or missing
/// required fields surface as [`BambooError::Decode`] — the dispatcher is
/// responsible for treating that as a silent drop, per the wire contract.
pub fn unpack_frame(frame: &[u8]) -> Result<Message> {
    let (header, binary) = match find_separator(frame) {
        Some(at) => (&frame[..at], Some(Bytes::copy_from_slice(&frame[at + SEP.len()..]))),
        None => (frame, None),
    };

    let envelope: Envelope = serde_json::from_slice(header)?;
    Ok(Message { envelope, binary })
}

fn find_separator(frame: &[u8]) -> Option<usize> {
    frame.windows(SEP.len()).position(|w| w == SEP)
}

impl From<BambooError> for std::io::Error {
    fn from(err: BambooError) -> Self {
        match err {
            BambooError::Transport(io_err) => io_err,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MessageBuilder;
    use crate::envelope::PeerId;

    #[test]
    fn round_trips_header_only_frame() {
        let msg = MessageBuilder::new("a").hello([], [], [], 1).build().unwrap();
        let frame = pack_frame(&msg).unwrap();
        let decoded = unpack_frame(&frame).unwrap();
        assert_eq!(decoded.envelope.transid, msg.envelope.transid);
        assert!(decoded.binary.is_none());
    }

    #[test]
    fn round_trips_binary_without_separator_bytes() {
        let msg = MessageBuilder::new("a")
            .req("k", Default::default())
            .to(Some(PeerId::from("b")))
            .binary(Bytes::from_static(b"plain payload"))
            .build()
            .unwrap();
        let frame = pack_frame(&msg).unwrap();
        let decoded = unpack_frame(&frame).unwrap();
        assert_eq!(decoded.binary.unwrap(), Bytes::from_static(b"plain payload"));
    }

    #[test]
    fn round_trips_binary_containing_separator_bytes() {
        let msg = MessageBuilder::new("a")
            .req("k", Default::default())
            .to(Some(PeerId::from("b")))
            .binary(Bytes::from_static(b"before\n\nafter"))
            .build()
            .unwrap();
        let frame = pack_frame(&msg).unwrap();
        let decoded = unpack_frame(&frame).unwrap();
        assert_eq!(decoded.binary.unwrap(), Bytes::from_static(b"before\n\nafter"));
    }

    #[test]
    fn unknown_header_field_fails_decode() {
        let bad = br#"{"version":1,"type":"REQ","transid":"t","time":"now","sourceid":"a","bogus":1}"#;
        assert!(unpack_frame(bad).is_err());
    }
}
