//! # tds-framing
//!
//! Packet framing for TDS over a byte stream.
//!
//! [`TdsCodec`] plugs into tokio-util's codec framework and turns a byte
//! stream into [`Packet`]s (and back). [`MessageAssembler`] joins the
//! packets of one message into a single payload, ready for
//! [`tds_wire::ResponseDispatcher::dispatch`].
//!
//! ```text
//! bytes → TdsCodec (packet framing) → MessageAssembler → ResponseDispatcher
//! ```
//!
//! ```rust
//! use bytes::BytesMut;
//! use tds_framing::{MessageAssembler, TdsCodec};
//! use tds_wire::{PacketType, frame_with_packet_size};
//! use tokio_util::codec::Decoder;
//!
//! let payload = vec![0xAB; 1500];
//! let mut wire = BytesMut::from(&frame_with_packet_size(PacketType::TabularResult, &payload, 512)[..]);
//!
//! let mut codec = TdsCodec::new();
//! let mut assembler = MessageAssembler::new();
//! let mut message = None;
//! while let Some(packet) = codec.decode(&mut wire).unwrap() {
//!     message = assembler.push(packet).unwrap();
//! }
//! assert_eq!(message.unwrap().payload.len(), 1500);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod message;
pub mod packet_codec;

pub use error::FramingError;
pub use message::{DEFAULT_MAX_MESSAGE_SIZE, Message, MessageAssembler};
pub use packet_codec::{Packet, TdsCodec};
