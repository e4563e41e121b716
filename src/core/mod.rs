//! # Core Protocol Components
//!
//! Low-level packet handling: framing, integrity checksum and the stream codec.
//!
//! ## Components
//! - **Checksum**: CRC-16 over the payload bytes
//! - **Packet**: Binary frame with a fixed big-endian header
//! - **Codec**: Tokio codec for framing over byte streams
//!
//! ## Wire Format
//! ```text
//! [Service(2)] [Integrity(2)] [TransactionId(2)] [Length(4)] [Payload(N)]
//! ```
//!
//! ## Limits
//! - Maximum payload size: 32 MiB, checked before allocation
//! - The integrity field is computed on encode but only advisory on receive

pub mod checksum;
pub mod codec;
pub mod packet;
