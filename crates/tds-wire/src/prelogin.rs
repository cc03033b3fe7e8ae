//! TDS pre-login negotiation.
//!
//! The pre-login message is the first exchange on a connection. The client
//! offers a single `VERSION` option; servers accept the absence of the
//! other optional fields (encryption, instance, thread id, MARS, trace id).
//!
//! ```text
//! +------+-----------+-----------+------+------------------------------+
//! | 0x00 | offset BE | length BE | 0xFF | major minor build(BE) sub(BE)|
//! +------+-----------+-----------+------+------------------------------+
//!   option descriptor (5 bytes)  terminator    VERSION value (6 bytes)
//! ```
//!
//! Offsets are measured from the start of the payload, so the first value
//! begins right after the descriptor table and its terminator.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::packet::{PacketType, frame};

/// Size of one option descriptor: tag, offset, length.
const OPTION_DESCRIPTOR_SIZE: usize = 5;

/// Size of the VERSION option value.
const VERSION_VALUE_SIZE: u16 = 6;

/// Pre-login option tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PreLoginOption {
    /// Version information.
    Version = 0x00,
    /// Encryption negotiation.
    Encryption = 0x01,
    /// Instance name (for named instances).
    Instance = 0x02,
    /// Thread ID.
    ThreadId = 0x03,
    /// MARS (Multiple Active Result Sets) support.
    Mars = 0x04,
    /// Trace ID for distributed tracing.
    TraceId = 0x05,
    /// Federated authentication required.
    FedAuthRequired = 0x06,
    /// Nonce for encryption.
    Nonce = 0x07,
    /// Terminator (end of options).
    Terminator = 0xFF,
}

impl PreLoginOption {
    /// Create from raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x00 => Ok(Self::Version),
            0x01 => Ok(Self::Encryption),
            0x02 => Ok(Self::Instance),
            0x03 => Ok(Self::ThreadId),
            0x04 => Ok(Self::Mars),
            0x05 => Ok(Self::TraceId),
            0x06 => Ok(Self::FedAuthRequired),
            0x07 => Ok(Self::Nonce),
            0xFF => Ok(Self::Terminator),
            _ => Err(ProtocolError::InvalidPreloginOption(value)),
        }
    }
}

/// Encryption level reported in a pre-login response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EncryptionLevel {
    /// Encryption is off.
    Off = 0x00,
    /// Encryption is on.
    On = 0x01,
    /// Encryption is not supported.
    #[default]
    NotSupported = 0x02,
    /// Encryption is required.
    Required = 0x03,
}

impl EncryptionLevel {
    /// Create from raw byte value. Unknown values map to `Off`.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x01 => Self::On,
            0x02 => Self::NotSupported,
            0x03 => Self::Required,
            _ => Self::Off,
        }
    }

    /// Check if the server insists on TLS.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        matches!(self, Self::On | Self::Required)
    }
}

/// Version structure carried by the VERSION option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreLoginVersion {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Build number.
    pub build: u16,
    /// Sub-build number.
    pub sub_build: u16,
}

impl PreLoginVersion {
    /// Create a version value.
    #[must_use]
    pub const fn new(major: u8, minor: u8, build: u16, sub_build: u16) -> Self {
        Self {
            major,
            minor,
            build,
            sub_build,
        }
    }

    fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.major);
        dst.put_u8(self.minor);
        dst.put_u16(self.build);
        dst.put_u16(self.sub_build);
    }

    fn decode(mut src: &[u8]) -> Self {
        let major = src.get_u8();
        let minor = src.get_u8();
        let build = src.get_u16();
        let sub_build = if src.remaining() >= 2 { src.get_u16() } else { 0 };
        Self::new(major, minor, build, sub_build)
    }
}

impl Default for PreLoginVersion {
    /// This library's own version.
    fn default() -> Self {
        Self::new(0, 1, 0, 0)
    }
}

/// Client pre-login request.
#[derive(Debug, Clone, Default)]
pub struct PreLogin {
    /// Client version offered in the VERSION option.
    pub version: PreLoginVersion,
}

impl PreLogin {
    /// Create a pre-login request carrying the default client version.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the client version.
    #[must_use]
    pub fn with_version(mut self, version: PreLoginVersion) -> Self {
        self.version = version;
        self
    }

    /// Encode the pre-login payload (without packet header).
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let table_size = (OPTION_DESCRIPTOR_SIZE + 1) as u16;
        let mut buf = BytesMut::with_capacity(table_size as usize + VERSION_VALUE_SIZE as usize);

        buf.put_u8(PreLoginOption::Version as u8);
        buf.put_u16(table_size);
        buf.put_u16(VERSION_VALUE_SIZE);
        buf.put_u8(PreLoginOption::Terminator as u8);
        self.version.encode(&mut buf);

        buf.freeze()
    }

    /// Encode the pre-login request as a framed packet (type `0x12`).
    #[must_use]
    pub fn encode_packet(&self) -> Bytes {
        frame(PacketType::PreLogin, &self.encode())
    }
}

/// Server pre-login response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreLoginResponse {
    /// Server product version.
    pub version: Option<PreLoginVersion>,
    /// Encryption level the server selected.
    pub encryption: EncryptionLevel,
    /// Instance name, if echoed.
    pub instance: Option<String>,
    /// Server thread id.
    pub thread_id: Option<u32>,
    /// Whether MARS is enabled.
    pub mars: bool,
    /// Whether federated authentication is required.
    pub fed_auth_required: bool,
}

impl PreLoginResponse {
    /// Decode a pre-login response payload.
    ///
    /// Option offsets are absolute from the start of the payload. Options
    /// whose offset or length fall outside the payload are ignored.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut src = payload;
        let mut options = Vec::new();

        loop {
            if !src.has_remaining() {
                return Err(ProtocolError::UnexpectedEof);
            }
            let tag = src.get_u8();
            if tag == PreLoginOption::Terminator as u8 {
                break;
            }
            if src.remaining() < 4 {
                return Err(ProtocolError::UnexpectedEof);
            }
            let offset = src.get_u16() as usize;
            let length = src.get_u16() as usize;
            options.push((PreLoginOption::from_u8(tag)?, offset, length));
        }

        let mut response = Self::default();
        for (option, offset, length) in options {
            let Some(value) = payload.get(offset..offset + length) else {
                continue;
            };

            match option {
                PreLoginOption::Version if length >= 4 => {
                    response.version = Some(PreLoginVersion::decode(value));
                }
                PreLoginOption::Encryption if length >= 1 => {
                    response.encryption = EncryptionLevel::from_u8(value[0]);
                }
                PreLoginOption::Instance if length > 0 => {
                    let name = value.split(|&b| b == 0).next().unwrap_or_default();
                    if let Ok(s) = core::str::from_utf8(name) {
                        if !s.is_empty() {
                            response.instance = Some(s.to_string());
                        }
                    }
                }
                PreLoginOption::ThreadId if length >= 4 => {
                    response.thread_id = Some((&value[..4]).get_u32());
                }
                PreLoginOption::Mars if length >= 1 => {
                    response.mars = value[0] != 0;
                }
                PreLoginOption::FedAuthRequired if length >= 1 => {
                    response.fed_auth_required = value[0] != 0;
                }
                _ => {}
            }
        }

        Ok(response)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_prelogin_encode_layout() {
        let prelogin = PreLogin::new().with_version(PreLoginVersion::new(9, 0, 0x0102, 0x0304));
        let encoded = prelogin.encode();

        assert_eq!(
            &encoded[..],
            &[
                0x00, 0x00, 0x06, 0x00, 0x06, // VERSION descriptor
                0xFF, // terminator
                0x09, 0x00, 0x01, 0x02, 0x03, 0x04, // value
            ]
        );
    }

    #[test]
    fn test_prelogin_packet_type() {
        let packet = PreLogin::new().encode_packet();
        assert_eq!(packet[0], PacketType::PreLogin as u8);
        assert_eq!(u16::from_be_bytes([packet[2], packet[3]]), 8 + 12);
    }

    #[test]
    fn test_response_decode_out_of_order_options() {
        let mut buf = BytesMut::new();
        let header_size: u16 = 3 * 5 + 1;

        buf.put_u8(PreLoginOption::Encryption as u8);
        buf.put_u16(header_size);
        buf.put_u16(1);
        buf.put_u8(PreLoginOption::Version as u8);
        buf.put_u16(header_size + 1);
        buf.put_u16(6);
        buf.put_u8(PreLoginOption::Mars as u8);
        buf.put_u16(header_size + 7);
        buf.put_u16(1);
        buf.put_u8(PreLoginOption::Terminator as u8);

        buf.put_u8(0x03);
        buf.put_slice(&[0x10, 0x00, 0x10, 0x68, 0x00, 0x00]);
        buf.put_u8(0x00);

        let response = PreLoginResponse::decode(&buf).unwrap();
        assert_eq!(response.encryption, EncryptionLevel::Required);
        assert!(response.encryption.is_required());
        assert_eq!(response.version, Some(PreLoginVersion::new(16, 0, 0x1068, 0)));
        assert!(!response.mars);
    }

    #[test]
    fn test_response_decode_instance() {
        let mut buf = BytesMut::new();
        buf.put_u8(PreLoginOption::Instance as u8);
        buf.put_u16(6);
        buf.put_u16(4);
        buf.put_u8(PreLoginOption::Terminator as u8);
        buf.put_slice(b"SQL\0");

        let response = PreLoginResponse::decode(&buf).unwrap();
        assert_eq!(response.instance.as_deref(), Some("SQL"));
    }

    #[test]
    fn test_response_ignores_out_of_bounds_option() {
        let mut buf = BytesMut::new();
        buf.put_u8(PreLoginOption::ThreadId as u8);
        buf.put_u16(200);
        buf.put_u16(4);
        buf.put_u8(PreLoginOption::Terminator as u8);

        let response = PreLoginResponse::decode(&buf).unwrap();
        assert_eq!(response.thread_id, None);
    }

    #[test]
    fn test_response_missing_terminator() {
        let buf = [0x00u8, 0x00, 0x06];
        assert_eq!(
            PreLoginResponse::decode(&buf),
            Err(ProtocolError::UnexpectedEof)
        );
    }

    #[test]
    fn test_response_unknown_option() {
        let buf = [0x42u8, 0x00, 0x06, 0x00, 0x00, 0xFF];
        assert_eq!(
            PreLoginResponse::decode(&buf),
            Err(ProtocolError::InvalidPreloginOption(0x42))
        );
    }
}
