//! Error types for TDS encoding and response handling.

use thiserror::Error;

use crate::dispatch::ProtocolState;
use crate::packet::PacketType;
use crate::token::ServerError;

/// Byte-level decoding failures.
///
/// These are raised while reading server bytes: packet headers, pre-login
/// responses and token streams.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Fewer bytes were available than the structure requires.
    #[error("incomplete packet: expected {expected} bytes, got {actual}")]
    IncompletePacket {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Unknown packet type byte.
    #[error("invalid packet type: 0x{0:02X}")]
    InvalidPacketType(u8),

    /// Status byte with undefined bits set.
    #[error("invalid packet status: 0x{0:02X}")]
    InvalidPacketStatus(u8),

    /// Unknown pre-login option tag.
    #[error("invalid pre-login option: 0x{0:02X}")]
    InvalidPreloginOption(u8),

    /// Unknown token type byte.
    #[error("invalid token type: 0x{0:02X}")]
    InvalidTokenType(u8),

    /// Data ended in the middle of a structure.
    #[error("unexpected end of data")]
    UnexpectedEof,

    /// UTF-16 text could not be decoded.
    #[error("string encoding error: {0}")]
    StringEncoding(String),

    /// A field carried a value outside its defined range.
    #[error("invalid value {value} for field {field}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: u32,
    },

    /// A row arrived before any column metadata.
    #[error("{0} token requires column metadata")]
    MissingMetadata(&'static str),

    /// A reply lacked a token it must carry.
    #[error("expected {0} token")]
    MissingToken(&'static str),
}

/// Errors surfaced by the request encoders and the response dispatcher.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Login fields are missing or malformed. Caller contract violation.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(&'static str),

    /// The type encoder could not represent a parameter value.
    #[error("unsupported type for parameter '{name}': {reason}")]
    UnsupportedParameterType {
        /// Parameter name.
        name: String,
        /// Reason reported by the type encoder.
        reason: String,
    },

    /// Parameter name cannot be carried in a one-byte length prefix.
    #[error("parameter name too long: {0}")]
    InvalidParameterName(String),

    /// Procedure name cannot be carried in a two-byte length prefix.
    #[error("procedure name too long: {} UTF-16 code units", .0.encode_utf16().count())]
    InvalidProcedureName(String),

    /// The server answered with an ERROR token.
    #[error("server error {}: {}", .0.number, .0.message)]
    ServerError(ServerError),

    /// A message arrived in a protocol state that defines no transition for it.
    #[error("unexpected {packet_type:?} message in {state:?} state")]
    UnexpectedMessage {
        /// State the session was in.
        state: ProtocolState,
        /// Type of the offending packet.
        packet_type: PacketType,
    },

    /// The token stream could not be parsed at all.
    #[error("malformed response: {0}")]
    MalformedResponse(#[from] ProtocolError),
}

impl CodecError {
    /// Whether this is a protocol-level error: a server error token or an
    /// out-of-state message.
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::ServerError(_) | Self::UnexpectedMessage { .. })
    }

    /// Whether the connection can no longer be trusted after this error.
    ///
    /// A malformed response means the byte stream is out of sync; a server
    /// error of severity 20 or higher means the server closed the session.
    #[must_use]
    pub fn is_connection_fatal(&self) -> bool {
        match self {
            Self::MalformedResponse(_) => true,
            Self::ServerError(err) => err.is_fatal(),
            _ => false,
        }
    }

    /// Whether the caller supplied bad input to an encoder.
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials(_)
                | Self::UnsupportedParameterType { .. }
                | Self::InvalidParameterName(_)
                | Self::InvalidProcedureName(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(class: u8) -> ServerError {
        ServerError {
            number: 208,
            state: 1,
            class,
            message: "Invalid object name 'missing'.".into(),
            server: "db01".into(),
            procedure: String::new(),
            line: 1,
        }
    }

    #[test]
    fn test_protocol_error_classification() {
        let err = CodecError::ServerError(server_error(16));
        assert!(err.is_protocol_error());
        assert!(!err.is_connection_fatal());

        let err = CodecError::UnexpectedMessage {
            state: ProtocolState::Prelogin,
            packet_type: PacketType::TabularResult,
        };
        assert!(err.is_protocol_error());
        assert!(!err.is_caller_error());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(CodecError::ServerError(server_error(20)).is_connection_fatal());
        assert!(CodecError::MalformedResponse(ProtocolError::UnexpectedEof).is_connection_fatal());
        assert!(!CodecError::InvalidCredentials("username is empty").is_connection_fatal());
    }

    #[test]
    fn test_display() {
        let err = CodecError::ServerError(server_error(16));
        assert_eq!(
            err.to_string(),
            "server error 208: Invalid object name 'missing'."
        );
        let err = CodecError::from(ProtocolError::InvalidTokenType(0x42));
        assert_eq!(err.to_string(), "malformed response: invalid token type: 0x42");
    }
}
