//! Framing error types.

use thiserror::Error;

/// Errors raised while splitting a byte stream into TDS packets.
#[derive(Debug, Error)]
pub enum FramingError {
    /// The packet header declares a length shorter than the header itself.
    #[error("invalid packet header: declared length {0}")]
    InvalidLength(usize),

    /// The packet exceeds the configured maximum size.
    #[error("packet too large: {size} bytes (max {max})")]
    PacketTooLarge {
        /// Declared or computed packet size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A reassembled message exceeds the configured maximum size.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Payload size the message would reach.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A packet of a different type arrived before the current message ended.
    #[error("packet type changed mid-message: {expected:?} then {actual:?}")]
    MixedMessage {
        /// Type of the message being assembled.
        expected: tds_wire::PacketType,
        /// Type of the offending packet.
        actual: tds_wire::PacketType,
    },

    /// The header could not be parsed.
    #[error("protocol error: {0}")]
    Protocol(#[from] tds_wire::ProtocolError),

    /// Transport error surfaced through the codec.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
