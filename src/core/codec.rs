//! Tokio codec framing [`Packet`]s over a byte stream.
//!
//! The decoder waits until a whole frame (header plus declared payload) is
//! buffered, then splits it off without copying the remainder. A declared
//! length above the payload limit is an error: the stream cannot be
//! resynchronised after it, so the connection is expected to close.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::config::MAX_PAYLOAD_SIZE;
use crate::core::packet::{Header, Packet, HEADER_SIZE};
use crate::error::{ProtocolError, Result};

#[derive(Debug, Default, Clone, Copy)]
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = Header::parse(&src[..HEADER_SIZE])?;
        let frame_len = HEADER_SIZE + header.payload_length as usize;

        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(frame_len);
        Packet::from_bytes(&frame).map(Some)
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        if item.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::OversizedPacket(item.payload.len()));
        }
        item.write_to(dst);
        Ok(())
    }
}
