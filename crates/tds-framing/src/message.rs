//! TDS message reassembly.
//!
//! A message can span multiple packets; the last one carries the
//! `END_OF_MESSAGE` status flag. The assembler buffers payloads until then.

use bytes::{Bytes, BytesMut};
use tds_wire::{PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType};

use crate::error::FramingError;
use crate::packet_codec::Packet;

/// Default limit on a reassembled message payload (64 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// A complete TDS message reassembled from one or more packets.
#[derive(Debug, Clone)]
pub struct Message {
    /// Header of the first packet, with `END_OF_MESSAGE` status.
    pub header: PacketHeader,
    /// The complete message payload (all packets combined).
    pub payload: Bytes,
}

impl Message {
    /// Create a new message from a single packet.
    #[must_use]
    pub fn from_packet(packet: Packet) -> Self {
        let mut header = packet.header;
        header.status |= PacketStatus::END_OF_MESSAGE;
        Self {
            header,
            payload: packet.payload.freeze(),
        }
    }

    /// The packet type of this message.
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        self.header.packet_type
    }

    /// Get the message payload length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the message is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Reassembles multiple TDS packets into complete messages.
#[derive(Debug)]
pub struct MessageAssembler {
    buffer: BytesMut,
    /// Header of the first packet of the message being assembled.
    first: Option<PacketHeader>,
    packet_count: usize,
    max_message_size: usize,
}

impl MessageAssembler {
    /// Create a new message assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a new message assembler with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            first: None,
            packet_count: 0,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Limit the reassembled payload size.
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Current payload size limit.
    #[must_use]
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Push a packet into the assembler.
    ///
    /// Returns `Ok(Some(message))` when this packet completes a message and
    /// `Ok(None)` when more packets are needed. A packet whose type differs
    /// from the message in progress, or one that takes the payload past the
    /// size limit, is an error and discards the partial message.
    pub fn push(&mut self, packet: Packet) -> Result<Option<Message>, FramingError> {
        let first = match self.first {
            Some(first) if first.packet_type != packet.header.packet_type => {
                self.clear();
                return Err(FramingError::MixedMessage {
                    expected: first.packet_type,
                    actual: packet.header.packet_type,
                });
            }
            Some(first) => first,
            None => {
                self.first = Some(packet.header);
                packet.header
            }
        };

        let size = self.buffer.len() + packet.payload.len();
        if size > self.max_message_size {
            self.clear();
            return Err(FramingError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }

        self.buffer.extend_from_slice(&packet.payload);
        self.packet_count += 1;

        tracing::trace!(
            packet_type = ?packet.header.packet_type,
            packet_count = self.packet_count,
            buffer_len = self.buffer.len(),
            is_eom = packet.is_end_of_message(),
            "assembling message"
        );

        if !packet.is_end_of_message() {
            return Ok(None);
        }

        let mut header = first;
        header.status = packet.header.status;
        header.length = u16::try_from(PACKET_HEADER_SIZE + self.buffer.len()).unwrap_or(u16::MAX);

        self.first = None;
        self.packet_count = 0;
        Ok(Some(Message {
            header,
            payload: self.buffer.split().freeze(),
        }))
    }

    /// Check if the assembler has partial data buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.first.is_some()
    }

    /// Get the number of packets accumulated so far.
    #[must_use]
    pub fn packet_count(&self) -> usize {
        self.packet_count
    }

    /// Get the current buffer length.
    #[must_use]
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Clear any partial message data.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.first = None;
        self.packet_count = 0;
    }
}

impl Default for MessageAssembler {
    fn default() -> Self {
        Self::new()
    }
}
