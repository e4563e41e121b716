//! Packet layout and whole-frame encoding.
//!
//! ```text
//! 0        2          4                6                10
//! +--------+----------+----------------+----------------+---------...
//! |service |integrity | transaction id | payload length | payload
//! +--------+----------+----------------+----------------+---------...
//! ```
//!
//! Every header field is big-endian. `integrity` is the CRC-16 of the payload
//! and is advisory: a mismatch never makes a frame undecodable.

use bytes::{Buf, BufMut, BytesMut};
use tracing::trace;

use crate::config::MAX_PAYLOAD_SIZE;
use crate::core::checksum::crc16;
use crate::error::{ProtocolError, Result};

/// Fixed header size: service(2) + integrity(2) + transaction id(2) + length(4).
pub const HEADER_SIZE: usize = 10;

/// Decoded header fields, already converted to host order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub service: u16,
    pub integrity: u16,
    pub transaction_id: u16,
    pub payload_length: u32,
}

impl Header {
    /// Parse the header from the start of `data` without touching the payload.
    ///
    /// # Errors
    /// `InvalidHeader` when fewer than [`HEADER_SIZE`] bytes are present,
    /// `OversizedPacket` when the declared length exceeds the payload limit.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(ProtocolError::InvalidHeader);
        }

        let mut buf = &data[..HEADER_SIZE];
        let header = Header {
            service: buf.get_u16(),
            integrity: buf.get_u16(),
            transaction_id: buf.get_u16(),
            payload_length: buf.get_u32(),
        };

        if header.payload_length as usize > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::OversizedPacket(header.payload_length as usize));
        }

        Ok(header)
    }
}

/// One protocol frame: header plus opaque payload.
///
/// The payload is never interpreted here; typed access lives in
/// [`crate::protocol::message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub service: u16,
    pub integrity: u16,
    pub transaction_id: u16,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a packet, computing the integrity field over the payload.
    pub fn new(service: u16, transaction_id: u16, payload: Vec<u8>) -> Self {
        Self {
            service,
            integrity: crc16(&payload),
            transaction_id,
            payload,
        }
    }

    /// Number of payload bytes following the header.
    #[inline]
    pub fn payload_length(&self) -> usize {
        self.payload.len()
    }

    /// Whether the integrity field matches the payload as received.
    pub fn checksum_matches(&self) -> bool {
        self.integrity == crc16(&self.payload)
    }

    /// Encode a complete frame in one step.
    pub fn encode(service: u16, transaction_id: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
        out.put_u16(service);
        out.put_u16(crc16(payload));
        out.put_u16(transaction_id);
        out.put_u32(payload.len() as u32);
        out.extend_from_slice(payload);
        out
    }

    /// Decode a complete frame. Alias of [`Packet::from_bytes`].
    pub fn decode(data: &[u8]) -> Result<Self> {
        Self::from_bytes(data)
    }

    /// Serialize the packet as it was built, preserving its integrity field.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        self.put_header(&mut out);
        out.extend_from_slice(&self.payload);
        out
    }

    /// Append the serialized packet to a codec buffer.
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE + self.payload.len());
        self.put_header(dst);
        dst.extend_from_slice(&self.payload);
    }

    fn put_header<B: BufMut>(&self, dst: &mut B) {
        dst.put_u16(self.service);
        dst.put_u16(self.integrity);
        dst.put_u16(self.transaction_id);
        dst.put_u32(self.payload.len() as u32);
    }

    /// Parse a frame whose payload must be exactly the bytes after the header.
    ///
    /// # Errors
    /// - `InvalidHeader` for a buffer shorter than the header
    /// - `OversizedPacket` when the declared length exceeds the limit
    /// - `MalformedFrame` when the declared length differs from the bytes supplied
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let header = Header::parse(data)?;
        let declared = header.payload_length as usize;
        let actual = data.len() - HEADER_SIZE;

        if declared != actual {
            return Err(ProtocolError::MalformedFrame { declared, actual });
        }

        trace!(
            service = header.service,
            transaction_id = header.transaction_id,
            length = declared,
            "Decoded packet"
        );

        Ok(Self {
            service: header.service,
            integrity: header.integrity,
            transaction_id: header.transaction_id,
            payload: data[HEADER_SIZE..].to_vec(),
        })
    }
}
