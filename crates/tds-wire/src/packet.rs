//! TDS packet header and message framing.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// TDS packet header size in bytes.
pub const PACKET_HEADER_SIZE: usize = 8;

/// Maximum TDS packet size (64KB - 1).
pub const MAX_PACKET_SIZE: usize = 65535;

/// Smallest packet size a server will negotiate.
pub const MIN_PACKET_SIZE: usize = 512;

/// Default TDS packet size.
pub const DEFAULT_PACKET_SIZE: usize = 4096;

/// TDS packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// SQL batch request.
    SqlBatch = 0x01,
    /// Pre-TDS7 login packet.
    PreTds7Login = 0x02,
    /// Remote procedure call.
    Rpc = 0x03,
    /// Tabular response (every server reply).
    TabularResult = 0x04,
    /// Attention signal.
    Attention = 0x06,
    /// Bulk load data.
    BulkLoad = 0x07,
    /// Federated authentication token.
    FedAuthToken = 0x08,
    /// Transaction manager request.
    TransactionManager = 0x0E,
    /// TDS7+ login packet.
    Tds7Login = 0x10,
    /// SSPI authentication.
    Sspi = 0x11,
    /// Pre-login packet.
    PreLogin = 0x12,
}

impl PacketType {
    /// Create a packet type from a raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x01 => Ok(Self::SqlBatch),
            0x02 => Ok(Self::PreTds7Login),
            0x03 => Ok(Self::Rpc),
            0x04 => Ok(Self::TabularResult),
            0x06 => Ok(Self::Attention),
            0x07 => Ok(Self::BulkLoad),
            0x08 => Ok(Self::FedAuthToken),
            0x0E => Ok(Self::TransactionManager),
            0x10 => Ok(Self::Tds7Login),
            0x11 => Ok(Self::Sspi),
            0x12 => Ok(Self::PreLogin),
            _ => Err(ProtocolError::InvalidPacketType(value)),
        }
    }
}

bitflags! {
    /// TDS packet status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PacketStatus: u8 {
        /// Normal packet, more packets to follow.
        const NORMAL = 0x00;
        /// End of message (last packet).
        const END_OF_MESSAGE = 0x01;
        /// Ignore this event (used for attention acknowledgment).
        const IGNORE_EVENT = 0x02;
        /// Reset connection (SQL Server 2000+).
        const RESET_CONNECTION = 0x08;
        /// Reset connection but keep transaction state.
        const RESET_CONNECTION_KEEP_TRANSACTION = 0x10;
    }
}

/// TDS packet header.
///
/// Every TDS packet begins with an 8-byte header. All fields are single
/// bytes except `length` and `channel`, which are big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Type of packet.
    pub packet_type: PacketType,
    /// Status flags.
    pub status: PacketStatus,
    /// Total packet length including header.
    pub length: u16,
    /// Channel (server process id on replies, zero on requests).
    pub channel: u16,
    /// Packet sequence number (wraps at 255).
    pub packet_id: u8,
    /// Window (unused, always 0).
    pub window: u8,
}

impl PacketHeader {
    /// Create a new packet header with zero channel, packet id and window.
    #[must_use]
    pub const fn new(packet_type: PacketType, status: PacketStatus, length: u16) -> Self {
        Self {
            packet_type,
            status,
            length,
            channel: 0,
            packet_id: 0,
            window: 0,
        }
    }

    /// Parse a packet header from bytes.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < PACKET_HEADER_SIZE {
            return Err(ProtocolError::IncompletePacket {
                expected: PACKET_HEADER_SIZE,
                actual: src.remaining(),
            });
        }

        let packet_type = PacketType::from_u8(src.get_u8())?;
        let status_byte = src.get_u8();
        let status = PacketStatus::from_bits(status_byte)
            .ok_or(ProtocolError::InvalidPacketStatus(status_byte))?;
        let length = src.get_u16();
        let channel = src.get_u16();
        let packet_id = src.get_u8();
        let window = src.get_u8();

        Ok(Self {
            packet_type,
            status,
            length,
            channel,
            packet_id,
            window,
        })
    }

    /// Encode the packet header to bytes.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.packet_type as u8);
        dst.put_u8(self.status.bits());
        dst.put_u16(self.length);
        dst.put_u16(self.channel);
        dst.put_u8(self.packet_id);
        dst.put_u8(self.window);
    }

    /// Get the payload length (total length minus header).
    #[must_use]
    pub const fn payload_length(&self) -> usize {
        self.length.saturating_sub(PACKET_HEADER_SIZE as u16) as usize
    }

    /// Check if this is the last packet in a message.
    #[must_use]
    pub const fn is_end_of_message(&self) -> bool {
        self.status.contains(PacketStatus::END_OF_MESSAGE)
    }

    /// Set the packet ID (sequence number).
    #[must_use]
    pub const fn with_packet_id(mut self, id: u8) -> Self {
        self.packet_id = id;
        self
    }
}

/// Wrap a message payload in a TDS packet header.
///
/// Produces one packet with `END_OF_MESSAGE` status, zero channel, packet id
/// and window, and `length = 8 + payload.len()`. Payloads that cannot fit in
/// a single maximum-size packet are split as [`frame_with_packet_size`] does.
#[must_use]
pub fn frame(packet_type: PacketType, payload: &[u8]) -> Bytes {
    frame_with_packet_size(packet_type, payload, MAX_PACKET_SIZE)
}

/// Wrap a message payload in as many packets as the negotiated packet size
/// requires.
///
/// Every packet but the last carries `NORMAL` status; the last carries
/// `END_OF_MESSAGE`. Packet ids count up from zero and wrap. `packet_size`
/// is clamped to `MIN_PACKET_SIZE..=MAX_PACKET_SIZE`.
#[must_use]
pub fn frame_with_packet_size(packet_type: PacketType, payload: &[u8], packet_size: usize) -> Bytes {
    let packet_size = packet_size.clamp(MIN_PACKET_SIZE, MAX_PACKET_SIZE);
    let max_payload = packet_size - PACKET_HEADER_SIZE;
    let packet_count = payload.len().div_ceil(max_payload).max(1);

    let mut buf = BytesMut::with_capacity(payload.len() + packet_count * PACKET_HEADER_SIZE);
    let mut chunks = payload.chunks(max_payload).peekable();
    let mut packet_id: u8 = 0;

    if chunks.peek().is_none() {
        PacketHeader::new(packet_type, PacketStatus::END_OF_MESSAGE, PACKET_HEADER_SIZE as u16)
            .encode(&mut buf);
    }

    while let Some(chunk) = chunks.next() {
        let status = if chunks.peek().is_some() {
            PacketStatus::NORMAL
        } else {
            PacketStatus::END_OF_MESSAGE
        };
        // chunk.len() <= MAX_PACKET_SIZE - 8, so the sum always fits in u16
        let length = (PACKET_HEADER_SIZE + chunk.len()) as u16;
        PacketHeader::new(packet_type, status, length)
            .with_packet_id(packet_id)
            .encode(&mut buf);
        buf.put_slice(chunk);
        packet_id = packet_id.wrapping_add(1);
    }

    tracing::trace!(
        packet_type = ?packet_type,
        payload_len = payload.len(),
        packet_count,
        "framed TDS message"
    );

    buf.freeze()
}
