//! TDS LOGIN7 packet construction.
//!
//! The LOGIN7 message authenticates a SQL login and sets up the session.
//!
//! ## Packet Structure
//!
//! ```text
//! offset  size
//!      0     4  total length (LE), counts itself
//!      4    32  fixed block: version, packet size, program version, pid,
//!               connection id, flag bytes, time zone, LCID
//!     36    58  offset/length table, one {u16 offset, u16 units} pair per
//!               variable field, plus client id and long SSPI length
//!     94     *  variable data, UTF-16LE, in table order
//! ```
//!
//! Offsets count from the start of the length prefix. Lengths are counted in
//! UTF-16 code units, so a character outside the BMP counts twice and the
//! offset cursor (in bytes) always advances by exactly `2 * units`.
//!
//! ## Security Note
//!
//! The password is obfuscated, not encrypted. Only TLS protects it in transit.

use core::fmt;

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{utf16_bytes, utf16_len};
use crate::error::CodecError;
use crate::obfuscate::obfuscate;
use crate::packet::{DEFAULT_PACKET_SIZE, PacketType, frame};
use crate::version::TdsVersion;

/// Size of the total-length prefix.
const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of the fixed block that follows the length prefix.
const FIXED_BLOCK_SIZE: usize = 32;

/// Size of the offset/length table.
const OFFSET_TABLE_SIZE: usize = 58;

/// Byte offset of the first variable field.
pub const LOGIN7_HEADER_SIZE: usize = LENGTH_PREFIX_SIZE + FIXED_BLOCK_SIZE + OFFSET_TABLE_SIZE;

/// Unit count written for the database field when no database is given.
pub const EMPTY_DATABASE_UNITS: u16 = 0x00AC;

/// Longest value, in UTF-16 code units, the server accepts for a login field.
pub const MAX_FIELD_UNITS: usize = 128;

bitflags! {
    /// LOGIN7 option flags 1.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionFlags1: u8 {
        /// Big-endian byte order.
        const BYTE_ORDER_BE = 0x01;
        /// EBCDIC character set.
        const CHAR_EBCDIC = 0x02;
        /// VAX floating point.
        const FLOAT_VAX = 0x04;
        /// ND5000 floating point.
        const FLOAT_ND5000 = 0x08;
        /// Dump/load off.
        const DUMP_LOAD_OFF = 0x10;
        /// Warn when the initial database changes.
        const USE_DB = 0x20;
        /// Fail the login if the initial database cannot be used.
        const INIT_DB_FATAL = 0x40;
        /// Warn when the language changes.
        const SET_LANG = 0x80;
    }
}

bitflags! {
    /// LOGIN7 option flags 2.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionFlags2: u8 {
        /// Fail the login if the initial language cannot be set.
        const INIT_LANG_FATAL = 0x01;
        /// ODBC client.
        const ODBC = 0x02;
        /// Server-to-server login.
        const USER_SERVER = 0x10;
        /// Replication login.
        const USER_REMUSER = 0x20;
        /// Integrated (SSPI) security.
        const INTEGRATED_SECURITY = 0x80;
    }
}

bitflags! {
    /// LOGIN7 type flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeFlags: u8 {
        /// T-SQL dialect.
        const SQL_TSQL = 0x01;
        /// OLE DB client.
        const OLEDB = 0x10;
        /// Read-only application intent.
        const READ_ONLY_INTENT = 0x20;
    }
}

bitflags! {
    /// LOGIN7 option flags 3.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionFlags3: u8 {
        /// Change password request.
        const CHANGE_PASSWORD = 0x01;
        /// User instance.
        const USER_INSTANCE = 0x02;
        /// Binary XML.
        const SEND_YUKON_BINARY_XML = 0x04;
        /// Accept unknown collations.
        const UNKNOWN_COLLATION_HANDLING = 0x08;
        /// Feature extension block present.
        const EXTENSION = 0x10;
    }
}

/// LOGIN7 request builder.
#[derive(Clone)]
pub struct Login7 {
    /// TDS version to request.
    pub tds_version: TdsVersion,
    /// Requested packet size.
    pub packet_size: u32,
    /// Client program version.
    pub client_prog_version: u32,
    /// Client process ID.
    pub client_pid: u32,
    /// Connection ID.
    pub connection_id: u32,
    /// Option flags 1.
    pub option_flags1: OptionFlags1,
    /// Option flags 2.
    pub option_flags2: OptionFlags2,
    /// Type flags.
    pub type_flags: TypeFlags,
    /// Option flags 3.
    pub option_flags3: OptionFlags3,
    /// Client time zone offset in minutes.
    pub client_timezone: i32,
    /// Client LCID.
    pub client_lcid: u32,
    /// Client machine name.
    pub hostname: String,
    /// SQL login name.
    pub username: String,
    /// SQL login password.
    pub password: String,
    /// Client library name.
    pub library_name: String,
    /// Initial language.
    pub language: String,
    /// Initial database.
    pub database: String,
}

impl Default for Login7 {
    fn default() -> Self {
        Self {
            tds_version: TdsVersion::V7_4,
            packet_size: DEFAULT_PACKET_SIZE as u32,
            client_prog_version: 0,
            client_pid: std::process::id(),
            connection_id: 0,
            option_flags1: OptionFlags1::USE_DB | OptionFlags1::INIT_DB_FATAL,
            option_flags2: OptionFlags2::INIT_LANG_FATAL | OptionFlags2::ODBC,
            type_flags: TypeFlags::empty(),
            option_flags3: OptionFlags3::UNKNOWN_COLLATION_HANDLING,
            client_timezone: 0,
            client_lcid: 0x0409,
            hostname: String::new(),
            username: String::new(),
            password: String::new(),
            library_name: String::from("tds-wire"),
            language: String::new(),
            database: String::new(),
        }
    }
}

impl fmt::Debug for Login7 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Login7")
            .field("tds_version", &self.tds_version)
            .field("packet_size", &self.packet_size)
            .field("client_pid", &self.client_pid)
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("library_name", &self.library_name)
            .field("language", &self.language)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl Login7 {
    /// Create a new LOGIN7 builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the TDS version.
    #[must_use]
    pub fn with_tds_version(mut self, version: TdsVersion) -> Self {
        self.tds_version = version;
        self
    }

    /// Set SQL authentication credentials.
    #[must_use]
    pub fn with_sql_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self.option_flags2.remove(OptionFlags2::INTEGRATED_SECURITY);
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the client machine name.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Set the initial language.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set the client library name.
    #[must_use]
    pub fn with_library_name(mut self, library_name: impl Into<String>) -> Self {
        self.library_name = library_name.into();
        self
    }

    /// Set the requested packet size.
    #[must_use]
    pub fn with_packet_size(mut self, packet_size: u32) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Set the client process id.
    #[must_use]
    pub fn with_client_pid(mut self, pid: u32) -> Self {
        self.client_pid = pid;
        self
    }

    /// Declare read-only application intent.
    #[must_use]
    pub fn with_read_only_intent(mut self, read_only: bool) -> Self {
        self.type_flags.set(TypeFlags::READ_ONLY_INTENT, read_only);
        self
    }

    fn validate(&self) -> Result<(), CodecError> {
        if self.username.is_empty() {
            return Err(CodecError::InvalidCredentials("username is empty"));
        }
        if self.password.is_empty() {
            return Err(CodecError::InvalidCredentials("password is empty"));
        }

        let limits = [
            (&self.hostname, "hostname is longer than 128 characters"),
            (&self.username, "username is longer than 128 characters"),
            (&self.password, "password is longer than 128 characters"),
            (&self.library_name, "library name is longer than 128 characters"),
            (&self.language, "language is longer than 128 characters"),
            (&self.database, "database is longer than 128 characters"),
        ];
        for (value, reason) in limits {
            if utf16_len(value) > MAX_FIELD_UNITS {
                return Err(CodecError::InvalidCredentials(reason));
            }
        }
        Ok(())
    }

    /// Lay out the variable fields in table order.
    ///
    /// The first pass fixes every field's byte content and unit count; the
    /// offsets are then assigned left to right from a running cursor.
    fn layout(&self) -> Vec<VariableField> {
        let database = if self.database.is_empty() {
            FieldData::Sentinel(EMPTY_DATABASE_UNITS)
        } else {
            FieldData::text(&self.database)
        };

        let mut fields = vec![
            VariableField::new(FieldData::text(&self.hostname)),
            VariableField::new(FieldData::text(&self.username)),
            VariableField::new(FieldData::password(&self.password)),
            VariableField::new(FieldData::Placeholder), // app name
            VariableField::new(FieldData::Placeholder), // server name
            VariableField::new(FieldData::Placeholder), // unused / extension
            VariableField::new(FieldData::text(&self.library_name)),
            VariableField::new(FieldData::text(&self.language)),
            VariableField::new(database),
            VariableField::new(FieldData::Placeholder), // SSPI
            VariableField::new(FieldData::Placeholder), // attach db file
            VariableField::new(FieldData::Placeholder), // change password
        ];

        let mut cursor = LOGIN7_HEADER_SIZE;
        for field in &mut fields {
            match field.data {
                FieldData::Placeholder => {}
                FieldData::Sentinel(_) => field.offset = cursor as u16,
                FieldData::Bytes { ref bytes, .. } => {
                    field.offset = cursor as u16;
                    cursor += bytes.len();
                }
            }
        }
        fields
    }

    /// Encode the LOGIN7 payload, including its 4-byte length prefix.
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        self.validate()?;
        let fields = self.layout();

        let variable_len: usize = fields.iter().map(VariableField::byte_len).sum();
        let total_length = LOGIN7_HEADER_SIZE + variable_len;
        let mut buf = BytesMut::with_capacity(total_length);

        buf.put_u32_le(total_length as u32);
        buf.put_u32_le(self.tds_version.raw());
        buf.put_u32_le(self.packet_size);
        buf.put_u32_le(self.client_prog_version);
        buf.put_u32_le(self.client_pid);
        buf.put_u32_le(self.connection_id);
        buf.put_u8(self.option_flags1.bits());
        buf.put_u8(self.option_flags2.bits());
        buf.put_u8(self.type_flags.bits());
        buf.put_u8(self.option_flags3.bits());
        buf.put_i32_le(self.client_timezone);
        buf.put_u32_le(self.client_lcid);

        let (before_client_id, after_client_id) = fields.split_at(9);
        for field in before_client_id {
            field.encode_entry(&mut buf);
        }
        buf.put_slice(&[0u8; 6]);
        for field in after_client_id {
            field.encode_entry(&mut buf);
        }
        // long SSPI length
        buf.put_u32_le(0);

        debug_assert_eq!(buf.len(), LOGIN7_HEADER_SIZE);
        for field in &fields {
            if let FieldData::Bytes { bytes, .. } = &field.data {
                buf.put_slice(bytes);
            }
        }

        tracing::trace!(
            tds_version = %self.tds_version,
            packet_size = self.packet_size,
            length = total_length,
            has_database = !self.database.is_empty(),
            "encoded LOGIN7"
        );

        Ok(buf.freeze())
    }

    /// Encode and frame as a LOGIN7 packet (type `0x10`).
    pub fn encode_packet(&self) -> Result<Bytes, CodecError> {
        Ok(frame(PacketType::Tds7Login, &self.encode()?))
    }
}

/// Content of one variable field.
enum FieldData {
    /// Emitted as zero offset, zero length.
    Placeholder,
    /// Offset at the cursor, fixed unit count, no bytes.
    Sentinel(u16),
    /// Encoded bytes and their UTF-16 unit count.
    Bytes { bytes: Vec<u8>, units: u16 },
}

impl FieldData {
    fn text(s: &str) -> Self {
        let bytes = utf16_bytes(s);
        let units = (bytes.len() / 2) as u16;
        Self::Bytes { bytes, units }
    }

    fn password(s: &str) -> Self {
        let plain = utf16_bytes(s);
        let units = (plain.len() / 2) as u16;
        Self::Bytes {
            bytes: obfuscate(&plain),
            units,
        }
    }
}

/// One entry of the offset/length table with its data.
struct VariableField {
    offset: u16,
    data: FieldData,
}

impl VariableField {
    const fn new(data: FieldData) -> Self {
        Self { offset: 0, data }
    }

    fn units(&self) -> u16 {
        match self.data {
            FieldData::Placeholder => 0,
            FieldData::Sentinel(units) | FieldData::Bytes { units, .. } => units,
        }
    }

    fn byte_len(&self) -> usize {
        match &self.data {
            FieldData::Bytes { bytes, .. } => bytes.len(),
            _ => 0,
        }
    }

    fn encode_entry(&self, dst: &mut impl BufMut) {
        dst.put_u16_le(self.offset);
        dst.put_u16_le(self.units());
    }
}
