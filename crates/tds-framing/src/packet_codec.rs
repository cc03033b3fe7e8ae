//! TDS packet codec implementation.

use bytes::{BufMut, BytesMut};
use tds_wire::{MAX_PACKET_SIZE, MIN_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::FramingError;

/// A TDS packet with header and payload.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Packet header.
    pub header: PacketHeader,
    /// Packet payload (excluding header).
    pub payload: BytesMut,
}

impl Packet {
    /// Create a new packet with the given header and payload.
    #[must_use]
    pub fn new(header: PacketHeader, payload: BytesMut) -> Self {
        Self { header, payload }
    }

    /// Get the total packet size including header.
    #[must_use]
    pub fn total_size(&self) -> usize {
        PACKET_HEADER_SIZE + self.payload.len()
    }

    /// Check if this is the last packet in a message.
    #[must_use]
    pub fn is_end_of_message(&self) -> bool {
        self.header.is_end_of_message()
    }
}

/// TDS packet codec for tokio-util framing.
///
/// Decoding trusts the big-endian length in each header and waits until the
/// whole packet is buffered. Encoding rewrites the header length and stamps
/// a sequence number on every outgoing packet.
#[derive(Debug)]
pub struct TdsCodec {
    max_packet_size: usize,
    packet_id: u8,
}

impl TdsCodec {
    /// Create a new TDS codec accepting packets up to [`MAX_PACKET_SIZE`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
            packet_id: 1,
        }
    }

    /// Limit packets to the negotiated size, clamped to
    /// `MIN_PACKET_SIZE..=MAX_PACKET_SIZE`.
    #[must_use]
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size.clamp(MIN_PACKET_SIZE, MAX_PACKET_SIZE);
        self
    }

    /// Current maximum packet size.
    #[must_use]
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    fn next_packet_id(&mut self) -> u8 {
        let id = self.packet_id;
        self.packet_id = self.packet_id.wrapping_add(1);
        if self.packet_id == 0 {
            self.packet_id = 1;
        }
        id
    }

    /// Restart packet numbering, as at the start of a new request.
    pub fn reset_packet_id(&mut self) {
        self.packet_id = 1;
    }
}

impl Default for TdsCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for TdsCodec {
    type Item = Packet;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < PACKET_HEADER_SIZE {
            return Ok(None);
        }

        let length = usize::from(u16::from_be_bytes([src[2], src[3]]));
        if length < PACKET_HEADER_SIZE {
            return Err(FramingError::InvalidLength(length));
        }
        if length > self.max_packet_size {
            return Err(FramingError::PacketTooLarge {
                size: length,
                max: self.max_packet_size,
            });
        }

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let mut packet = src.split_to(length);
        let header = PacketHeader::decode(&mut &packet[..PACKET_HEADER_SIZE])?;
        let payload = packet.split_off(PACKET_HEADER_SIZE);

        tracing::trace!(
            packet_type = ?header.packet_type,
            length = length,
            is_eom = header.is_end_of_message(),
            "decoded TDS packet"
        );

        Ok(Some(Packet::new(header, payload)))
    }
}

impl Encoder<Packet> for TdsCodec {
    type Error = FramingError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let total_length = item.total_size();
        if total_length > self.max_packet_size {
            return Err(FramingError::PacketTooLarge {
                size: total_length,
                max: self.max_packet_size,
            });
        }

        dst.reserve(total_length);

        let mut header = item.header;
        // max_packet_size <= u16::MAX
        header.length = total_length as u16;
        header.packet_id = self.next_packet_id();
        header.encode(dst);
        dst.put_slice(&item.payload);

        tracing::trace!(
            packet_type = ?header.packet_type,
            length = total_length,
            packet_id = header.packet_id,
            "encoded TDS packet"
        );

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_wire::{PacketStatus, PacketType};

    fn raw_packet(packet_type: PacketType, length: u16, payload: &[u8]) -> BytesMut {
        let mut data = BytesMut::new();
        data.put_u8(packet_type as u8);
        data.put_u8(PacketStatus::END_OF_MESSAGE.bits());
        data.put_u16(length);
        data.put_u16(0x0034); // channel (spid)
        data.put_u8(1);
        data.put_u8(0);
        data.put_slice(payload);
        data
    }

    #[test]
    fn test_decode_packet() {
        let mut codec = TdsCodec::new();
        let mut data = raw_packet(PacketType::TabularResult, 12, b"test");

        let packet = codec.decode(&mut data).unwrap().unwrap();
        assert_eq!(packet.header.packet_type, PacketType::TabularResult);
        assert_eq!(packet.header.channel, 0x0034);
        assert!(packet.is_end_of_message());
        assert_eq!(&packet.payload[..], b"test");
        assert!(data.is_empty());
    }

    #[test]
    fn test_decode_leaves_following_bytes() {
        let mut codec = TdsCodec::new();
        let mut data = raw_packet(PacketType::TabularResult, 10, b"ab");
        data.put_slice(&[0x04, 0x01]);

        let packet = codec.decode(&mut data).unwrap().unwrap();
        assert_eq!(&packet.payload[..], b"ab");
        assert_eq!(&data[..], &[0x04, 0x01]);
        assert!(codec.decode(&mut data).unwrap().is_none());
    }

    #[test]
    fn test_incomplete_packet() {
        let mut codec = TdsCodec::new();
        // claims 12 bytes, payload missing
        let mut data = raw_packet(PacketType::SqlBatch, 12, b"");
        assert!(codec.decode(&mut data).unwrap().is_none());
        assert_eq!(data.len(), PACKET_HEADER_SIZE);
    }

    #[test]
    fn test_length_shorter_than_header() {
        let mut codec = TdsCodec::new();
        let mut data = raw_packet(PacketType::TabularResult, 4, b"");
        assert!(matches!(
            codec.decode(&mut data),
            Err(FramingError::InvalidLength(4))
        ));
    }

    #[test]
    fn test_packet_over_negotiated_size() {
        let mut codec = TdsCodec::new().with_max_packet_size(512);
        let mut data = raw_packet(PacketType::TabularResult, 600, b"");
        assert!(matches!(
            codec.decode(&mut data),
            Err(FramingError::PacketTooLarge { size: 600, max: 512 })
        ));
    }

    #[test]
    fn test_unknown_packet_type() {
        let mut codec = TdsCodec::new();
        let mut data = raw_packet(PacketType::TabularResult, 8, b"");
        data[0] = 0x99;
        assert!(matches!(
            codec.decode(&mut data),
            Err(FramingError::Protocol(_))
        ));
    }

    #[test]
    fn test_max_packet_size_is_clamped() {
        assert_eq!(TdsCodec::new().with_max_packet_size(1).max_packet_size(), MIN_PACKET_SIZE);
        assert_eq!(
            TdsCodec::new().with_max_packet_size(1 << 20).max_packet_size(),
            MAX_PACKET_SIZE
        );
    }

    #[test]
    fn test_encode_packet() {
        let mut codec = TdsCodec::new();
        let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 0);

        let mut dst = BytesMut::new();
        codec
            .encode(Packet::new(header, BytesMut::from(&b"test"[..])), &mut dst)
            .unwrap();
        codec
            .encode(Packet::new(header, BytesMut::from(&b"x"[..])), &mut dst)
            .unwrap();

        assert_eq!(&dst[..8], &[0x01, 0x01, 0x00, 0x0C, 0x00, 0x00, 0x01, 0x00]);
        assert_eq!(&dst[8..12], b"test");
        assert_eq!(dst[12 + 6], 2);
    }

    #[test]
    fn test_encode_too_large() {
        let mut codec = TdsCodec::new().with_max_packet_size(512);
        let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 0);
        let packet = Packet::new(header, BytesMut::from(&[0u8; 600][..]));
        let mut dst = BytesMut::new();
        assert!(codec.encode(packet, &mut dst).is_err());
        assert!(dst.is_empty());
    }
}
