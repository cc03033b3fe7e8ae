//! TDS token stream decoding.
//!
//! Every server reply carries a stream of tokens: column metadata, rows,
//! errors, informational messages, environment changes and completion
//! markers. [`TokenStreamReader`] walks a whole reply payload and collects
//! the tokens into a [`TokenSet`] for the response dispatcher.
//!
//! ## Token Structure
//!
//! Each token begins with a 1-byte token type identifier, followed by
//! token-specific data. Some tokens have fixed lengths, some carry a length
//! prefix, and rows can only be parsed with the preceding column metadata.

use bytes::{Buf, Bytes, BytesMut};

use crate::codec::{read_b_varchar, read_us_varchar, require, skip, token_body};
use crate::error::{CodecError, ProtocolError};
use crate::types::{ColumnFlags, TypeId, ValueLength};
use crate::version::TdsVersion;

/// Token type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenType {
    /// Column metadata (COLMETADATA).
    ColMetaData = 0x81,
    /// Error message (ERROR).
    Error = 0xAA,
    /// Informational message (INFO).
    Info = 0xAB,
    /// Login acknowledgment (LOGINACK).
    LoginAck = 0xAD,
    /// Row data (ROW).
    Row = 0xD1,
    /// Null bitmap compressed row (NBCROW).
    NbcRow = 0xD2,
    /// Environment change (ENVCHANGE).
    EnvChange = 0xE3,
    /// SSPI authentication (SSPI).
    Sspi = 0xED,
    /// Done (DONE).
    Done = 0xFD,
    /// Done in procedure (DONEINPROC).
    DoneInProc = 0xFF,
    /// Done procedure (DONEPROC).
    DoneProc = 0xFE,
    /// Return status (RETURNSTATUS).
    ReturnStatus = 0x79,
    /// Return value (RETURNVALUE).
    ReturnValue = 0xAC,
    /// Order (ORDER).
    Order = 0xA9,
    /// Feature extension acknowledgment (FEATUREEXTACK).
    FeatureExtAck = 0xAE,
    /// Session state (SESSIONSTATE).
    SessionState = 0xE4,
    /// Federated authentication info (FEDAUTHINFO).
    FedAuthInfo = 0xEE,
    /// Column info (COLINFO).
    ColInfo = 0xA5,
    /// Table name (TABNAME).
    TabName = 0xA4,
}

impl TokenType {
    /// Create a token type from a raw byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x81 => Some(Self::ColMetaData),
            0xAA => Some(Self::Error),
            0xAB => Some(Self::Info),
            0xAD => Some(Self::LoginAck),
            0xD1 => Some(Self::Row),
            0xD2 => Some(Self::NbcRow),
            0xE3 => Some(Self::EnvChange),
            0xED => Some(Self::Sspi),
            0xFD => Some(Self::Done),
            0xFF => Some(Self::DoneInProc),
            0xFE => Some(Self::DoneProc),
            0x79 => Some(Self::ReturnStatus),
            0xAC => Some(Self::ReturnValue),
            0xA9 => Some(Self::Order),
            0xAE => Some(Self::FeatureExtAck),
            0xE4 => Some(Self::SessionState),
            0xEE => Some(Self::FedAuthInfo),
            0xA5 => Some(Self::ColInfo),
            0xA4 => Some(Self::TabName),
            _ => None,
        }
    }
}

/// SQL Server collation: LCID plus sort id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Collation {
    /// Locale id and comparison flags.
    pub lcid: u32,
    /// Sort id.
    pub sort_id: u8,
}

impl Collation {
    fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        require(src, 5)?;
        let lcid = src.get_u32_le();
        let sort_id = src.get_u8();
        Ok(Self { lcid, sort_id })
    }
}

/// Type-specific metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeInfo {
    /// Maximum length for variable-length types.
    pub max_length: Option<u32>,
    /// Precision for numeric types.
    pub precision: Option<u8>,
    /// Scale for numeric and time types.
    pub scale: Option<u8>,
    /// Collation for string types.
    pub collation: Option<Collation>,
}

impl TypeInfo {
    /// Decode the type info that follows a type byte.
    pub fn decode(src: &mut impl Buf, type_id: TypeId) -> Result<Self, ProtocolError> {
        let info = match type_id {
            TypeId::Null
            | TypeId::Int1
            | TypeId::Bit
            | TypeId::Int2
            | TypeId::Int4
            | TypeId::Int8
            | TypeId::Float4
            | TypeId::Float8
            | TypeId::Money
            | TypeId::Money4
            | TypeId::DateTime
            | TypeId::DateTime4
            | TypeId::Date => Self::default(),

            TypeId::IntN
            | TypeId::BitN
            | TypeId::FloatN
            | TypeId::MoneyN
            | TypeId::DateTimeN
            | TypeId::Guid
            | TypeId::Char
            | TypeId::VarChar
            | TypeId::Binary
            | TypeId::VarBinary => {
                require(src, 1)?;
                Self {
                    max_length: Some(u32::from(src.get_u8())),
                    ..Self::default()
                }
            }

            TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
                require(src, 3)?;
                Self {
                    max_length: Some(u32::from(src.get_u8())),
                    precision: Some(src.get_u8()),
                    scale: Some(src.get_u8()),
                    collation: None,
                }
            }

            TypeId::BigVarChar | TypeId::BigChar | TypeId::NVarChar | TypeId::NChar => {
                require(src, 2)?;
                let max_length = u32::from(src.get_u16_le());
                Self {
                    max_length: Some(max_length),
                    collation: Some(Collation::decode(src)?),
                    ..Self::default()
                }
            }

            TypeId::BigVarBinary | TypeId::BigBinary => {
                require(src, 2)?;
                Self {
                    max_length: Some(u32::from(src.get_u16_le())),
                    ..Self::default()
                }
            }

            TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => {
                require(src, 1)?;
                Self {
                    scale: Some(src.get_u8()),
                    ..Self::default()
                }
            }

            TypeId::Text | TypeId::NText | TypeId::Image => {
                require(src, 4)?;
                let max_length = src.get_u32_le();
                let collation = if type_id.has_collation() {
                    Some(Collation::decode(src)?)
                } else {
                    None
                };
                // table name: part count, then one US_VARCHAR per part
                require(src, 1)?;
                for _ in 0..src.get_u8() {
                    read_us_varchar(src)?;
                }
                Self {
                    max_length: Some(max_length),
                    collation,
                    ..Self::default()
                }
            }

            TypeId::Xml => {
                require(src, 1)?;
                if src.get_u8() != 0 {
                    read_b_varchar(src)?;
                    read_b_varchar(src)?;
                    read_us_varchar(src)?;
                }
                Self::default()
            }

            TypeId::Udt => {
                require(src, 2)?;
                let max_length = u32::from(src.get_u16_le());
                read_b_varchar(src)?;
                read_b_varchar(src)?;
                read_b_varchar(src)?;
                read_us_varchar(src)?;
                Self {
                    max_length: Some(max_length),
                    ..Self::default()
                }
            }

            TypeId::Variant => {
                require(src, 4)?;
                Self {
                    max_length: Some(src.get_u32_le()),
                    ..Self::default()
                }
            }

            TypeId::Tvp => return Err(ProtocolError::InvalidTokenType(TypeId::Tvp as u8)),
        };
        Ok(info)
    }
}

/// Column definition within metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnData {
    /// Column name.
    pub name: String,
    /// Column data type.
    pub type_id: TypeId,
    /// Column flags.
    pub flags: ColumnFlags,
    /// User type ID.
    pub user_type: u32,
    /// Type-specific metadata.
    pub type_info: TypeInfo,
}

impl ColumnData {
    /// Check if this column is nullable.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.flags.contains(ColumnFlags::NULLABLE)
    }

    fn value_length(&self) -> ValueLength {
        self.type_id.value_length(self.type_info.max_length)
    }
}

/// Column metadata token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColMetaData {
    /// Column definitions.
    pub columns: Vec<ColumnData>,
}

impl ColMetaData {
    /// Column count marking "no metadata".
    pub const NO_METADATA: u16 = 0xFFFF;

    /// Decode a COLMETADATA token body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        require(src, 2)?;
        let column_count = src.get_u16_le();
        if column_count == Self::NO_METADATA {
            return Ok(Self::default());
        }

        let mut columns = Vec::with_capacity(column_count as usize);
        for _ in 0..column_count {
            require(src, 7)?;
            let user_type = src.get_u32_le();
            let flags = ColumnFlags::from_bits_truncate(src.get_u16_le());
            let type_byte = src.get_u8();
            let type_id = TypeId::from_u8(type_byte).ok_or(ProtocolError::InvalidField {
                field: "column type",
                value: u32::from(type_byte),
            })?;
            let type_info = TypeInfo::decode(src, type_id)?;
            let name = read_b_varchar(src)?;

            columns.push(ColumnData {
                name,
                type_id,
                flags,
                user_type,
                type_info,
            });
        }

        Ok(Self { columns })
    }

    /// Get the number of columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Check if this represents no metadata.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// One row of undecoded column values.
///
/// Each value holds the data bytes without their length prefix; `None` is
/// SQL NULL. PLP values are reassembled from their chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    /// Column values in metadata order.
    pub values: Vec<Option<Bytes>>,
}

impl RawRow {
    /// Decode a ROW token body.
    pub fn decode(src: &mut impl Buf, metadata: &ColMetaData) -> Result<Self, ProtocolError> {
        let values = metadata
            .columns
            .iter()
            .map(|col| read_value(src, col.type_id, col.value_length()))
            .collect::<Result<_, _>>()?;
        Ok(Self { values })
    }

    /// Decode an NBCROW token body.
    ///
    /// A bitmap with one bit per column precedes the values; columns whose
    /// bit is set are NULL and are not present in the data.
    pub fn decode_nbc(src: &mut impl Buf, metadata: &ColMetaData) -> Result<Self, ProtocolError> {
        let bitmap_len = metadata.columns.len().div_ceil(8);
        require(src, bitmap_len)?;
        let bitmap = src.copy_to_bytes(bitmap_len);

        let mut values = Vec::with_capacity(metadata.columns.len());
        for (i, col) in metadata.columns.iter().enumerate() {
            if bitmap[i / 8] & (1 << (i % 8)) != 0 {
                values.push(None);
            } else {
                values.push(read_value(src, col.type_id, col.value_length())?);
            }
        }
        Ok(Self { values })
    }

    /// Value bytes of a column, `None` when NULL or out of range.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Bytes> {
        self.values.get(index).and_then(Option::as_ref)
    }

    /// Whether a column is NULL. Out-of-range columns count as NULL.
    #[must_use]
    pub fn is_null(&self, index: usize) -> bool {
        self.get(index).is_none()
    }
}

const PLP_NULL: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// Read one length-prefixed value and strip its prefix.
pub(crate) fn read_value(
    src: &mut impl Buf,
    type_id: TypeId,
    length: ValueLength,
) -> Result<Option<Bytes>, ProtocolError> {
    match length {
        ValueLength::Fixed(size) => {
            require(src, size)?;
            Ok(Some(src.copy_to_bytes(size)))
        }
        ValueLength::Byte => {
            require(src, 1)?;
            let len = src.get_u8();
            let legacy = matches!(
                type_id,
                TypeId::Char | TypeId::VarChar | TypeId::Binary | TypeId::VarBinary
            );
            // legacy strings use 0xFF for NULL, the nullable fixed types use 0
            if (legacy && len == 0xFF) || (!legacy && len == 0) {
                return Ok(None);
            }
            take(src, len as usize)
        }
        ValueLength::UShort => {
            require(src, 2)?;
            match src.get_u16_le() {
                0xFFFF => Ok(None),
                len => take(src, len as usize),
            }
        }
        ValueLength::Long => {
            require(src, 4)?;
            match src.get_u32_le() {
                0xFFFF_FFFF => Ok(None),
                len => take(src, len as usize),
            }
        }
        ValueLength::Plp => {
            require(src, 8)?;
            if src.get_u64_le() == PLP_NULL {
                return Ok(None);
            }
            let mut value = BytesMut::new();
            loop {
                require(src, 4)?;
                let chunk_len = src.get_u32_le() as usize;
                if chunk_len == 0 {
                    break;
                }
                require(src, chunk_len)?;
                value.extend_from_slice(&src.copy_to_bytes(chunk_len));
            }
            Ok(Some(value.freeze()))
        }
        ValueLength::TextPtr => {
            require(src, 1)?;
            let ptr_len = src.get_u8() as usize;
            if ptr_len == 0 {
                return Ok(None);
            }
            // text pointer, then 8-byte timestamp
            skip(src, ptr_len + 8)?;
            require(src, 4)?;
            let len = src.get_u32_le() as usize;
            take(src, len)
        }
    }
}

fn take(src: &mut impl Buf, len: usize) -> Result<Option<Bytes>, ProtocolError> {
    require(src, len)?;
    Ok(Some(src.copy_to_bytes(len)))
}

bitflags::bitflags! {
    /// DONE token status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DoneStatus: u16 {
        /// More results follow.
        const MORE = 0x0001;
        /// The statement failed.
        const ERROR = 0x0002;
        /// A transaction is in progress.
        const IN_XACT = 0x0004;
        /// The row count is valid.
        const COUNT = 0x0010;
        /// Attention acknowledgment.
        const ATTN = 0x0020;
        /// A server error terminated the statement.
        const SRVERROR = 0x0100;
    }
}

/// Which member of the DONE family a completion came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneKind {
    /// End of a SQL statement.
    Done,
    /// End of a stored procedure.
    DoneProc,
    /// End of a statement within a stored procedure.
    DoneInProc,
}

/// Statement completion marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Done {
    /// Token that carried this completion.
    pub kind: DoneKind,
    /// Status flags.
    pub status: DoneStatus,
    /// Current command.
    pub cur_cmd: u16,
    /// Row count, meaningful when `status` has `COUNT`.
    pub row_count: u64,
}

impl Done {
    /// Size of a DONE token body in bytes.
    pub const SIZE: usize = 12;

    /// Decode a DONE, DONEPROC or DONEINPROC body.
    pub fn decode(src: &mut impl Buf, kind: DoneKind) -> Result<Self, ProtocolError> {
        if src.remaining() < Self::SIZE {
            return Err(ProtocolError::IncompletePacket {
                expected: Self::SIZE,
                actual: src.remaining(),
            });
        }
        Ok(Self {
            kind,
            status: DoneStatus::from_bits_truncate(src.get_u16_le()),
            cur_cmd: src.get_u16_le(),
            row_count: src.get_u64_le(),
        })
    }

    /// Row count when the server marked it valid.
    #[must_use]
    pub fn rows_affected(&self) -> Option<u64> {
        self.status
            .contains(DoneStatus::COUNT)
            .then_some(self.row_count)
    }

    /// Whether more results follow.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.status.contains(DoneStatus::MORE)
    }

    /// Whether the statement failed.
    #[must_use]
    pub const fn has_error(&self) -> bool {
        self.status.contains(DoneStatus::ERROR)
    }
}

/// Server error message (ERROR token).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// Error number.
    pub number: i32,
    /// Error state.
    pub state: u8,
    /// Error severity class.
    pub class: u8,
    /// Error message text.
    pub message: String,
    /// Server name.
    pub server: String,
    /// Procedure name.
    pub procedure: String,
    /// Line number.
    pub line: i32,
}

impl ServerError {
    /// Decode an ERROR token body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let info = ServerInfo::decode(src)?;
        Ok(Self {
            number: info.number,
            state: info.state,
            class: info.class,
            message: info.message,
            server: info.server,
            procedure: info.procedure,
            line: info.line,
        })
    }

    /// Check if this is a fatal error (severity >= 20).
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.class >= 20
    }

    /// Check if this error aborted the batch (severity >= 16).
    #[must_use]
    pub const fn is_batch_abort(&self) -> bool {
        self.class >= 16
    }
}

/// Server informational message (INFO token).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// Info number.
    pub number: i32,
    /// Info state.
    pub state: u8,
    /// Info class (severity).
    pub class: u8,
    /// Info message text.
    pub message: String,
    /// Server name.
    pub server: String,
    /// Procedure name.
    pub procedure: String,
    /// Line number.
    pub line: i32,
}

impl ServerInfo {
    /// Decode an INFO token body. ERROR shares this layout.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let mut body = token_body(src)?;
        require(&body, 6)?;
        let number = body.get_i32_le();
        let state = body.get_u8();
        let class = body.get_u8();

        let message = read_us_varchar(&mut body)?;
        let server = read_b_varchar(&mut body)?;
        let procedure = read_b_varchar(&mut body)?;

        require(&body, 4)?;
        let line = body.get_i32_le();

        Ok(Self {
            number,
            state,
            class,
            message,
            server,
            procedure,
            line,
        })
    }
}

/// Login acknowledgment token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAck {
    /// Interface type (1 = SQL).
    pub interface: u8,
    /// TDS version the server selected.
    pub tds_version: TdsVersion,
    /// Server program name.
    pub prog_name: String,
    /// Server program version: major, minor, build high, build low.
    pub prog_version: [u8; 4],
}

impl LoginAck {
    /// Decode a LOGINACK token body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let mut body = token_body(src)?;
        require(&body, 5)?;
        let interface = body.get_u8();
        // sent big-endian, unlike the LOGIN7 field
        let tds_version = TdsVersion::new(body.get_u32());
        let prog_name = read_b_varchar(&mut body)?;

        require(&body, 4)?;
        let mut prog_version = [0u8; 4];
        body.copy_to_slice(&mut prog_version);

        Ok(Self {
            interface,
            tds_version,
            prog_name,
            prog_version,
        })
    }

    /// Decode the LOGINACK carried in a login response payload.
    ///
    /// The reply to LOGIN7 is a token stream. An ERROR token in it (a failed
    /// login) is returned as [`CodecError::ServerError`]; a stream without
    /// LOGINACK is malformed.
    pub fn from_payload(payload: Bytes) -> Result<Self, CodecError> {
        let mut set = TokenStreamReader.read(payload)?;
        if !set.errors.is_empty() {
            return Err(CodecError::ServerError(set.errors.swap_remove(0)));
        }
        set.login_ack
            .ok_or(CodecError::MalformedResponse(ProtocolError::MissingToken("LOGINACK")))
    }
}

/// Environment change type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EnvChangeType {
    /// Database changed.
    Database = 1,
    /// Language changed.
    Language = 2,
    /// Character set changed.
    CharacterSet = 3,
    /// Packet size changed.
    PacketSize = 4,
    /// Unicode data sorting locale ID.
    UnicodeSortingLocalId = 5,
    /// Unicode comparison flags.
    UnicodeComparisonFlags = 6,
    /// SQL collation.
    SqlCollation = 7,
    /// Begin transaction.
    BeginTransaction = 8,
    /// Commit transaction.
    CommitTransaction = 9,
    /// Rollback transaction.
    RollbackTransaction = 10,
    /// Enlist DTC transaction.
    EnlistDtcTransaction = 11,
    /// Defect DTC transaction.
    DefectTransaction = 12,
    /// Real-time log shipping.
    RealTimeLogShipping = 13,
    /// Promote transaction.
    PromoteTransaction = 15,
    /// Transaction manager address.
    TransactionManagerAddress = 16,
    /// Transaction ended.
    TransactionEnded = 17,
    /// Reset connection completion acknowledgment.
    ResetConnectionCompletionAck = 18,
    /// User instance started.
    UserInstanceStarted = 19,
    /// Routing information.
    Routing = 20,
}

impl EnvChangeType {
    /// Create from raw byte value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Database),
            2 => Some(Self::Language),
            3 => Some(Self::CharacterSet),
            4 => Some(Self::PacketSize),
            5 => Some(Self::UnicodeSortingLocalId),
            6 => Some(Self::UnicodeComparisonFlags),
            7 => Some(Self::SqlCollation),
            8 => Some(Self::BeginTransaction),
            9 => Some(Self::CommitTransaction),
            10 => Some(Self::RollbackTransaction),
            11 => Some(Self::EnlistDtcTransaction),
            12 => Some(Self::DefectTransaction),
            13 => Some(Self::RealTimeLogShipping),
            15 => Some(Self::PromoteTransaction),
            16 => Some(Self::TransactionManagerAddress),
            17 => Some(Self::TransactionEnded),
            18 => Some(Self::ResetConnectionCompletionAck),
            19 => Some(Self::UserInstanceStarted),
            20 => Some(Self::Routing),
            _ => None,
        }
    }

    const fn is_binary(self) -> bool {
        matches!(
            self,
            Self::SqlCollation
                | Self::BeginTransaction
                | Self::CommitTransaction
                | Self::RollbackTransaction
                | Self::EnlistDtcTransaction
                | Self::DefectTransaction
                | Self::PromoteTransaction
                | Self::TransactionManagerAddress
                | Self::TransactionEnded
                | Self::ResetConnectionCompletionAck
        )
    }
}

/// Environment change value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvChangeValue {
    /// Text value.
    String(String),
    /// Binary value.
    Binary(Bytes),
}

/// Environment change token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvChange {
    /// Type of environment change.
    pub env_type: EnvChangeType,
    /// New value.
    pub new_value: EnvChangeValue,
    /// Old value.
    pub old_value: EnvChangeValue,
}

impl EnvChange {
    /// Decode an ENVCHANGE token body.
    ///
    /// Routing changes and other layouts this codec does not interpret keep
    /// their raw bytes as the new value.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        require(src, 2)?;
        let length = src.get_u16_le() as usize;
        if length == 0 {
            return Err(ProtocolError::InvalidField {
                field: "envchange length",
                value: 0,
            });
        }
        require(src, length)?;
        let mut body = src.copy_to_bytes(length);

        let type_byte = body.get_u8();
        let env_type = EnvChangeType::from_u8(type_byte).ok_or(ProtocolError::InvalidField {
            field: "envchange type",
            value: u32::from(type_byte),
        })?;

        if env_type == EnvChangeType::Routing {
            return Ok(Self {
                env_type,
                new_value: EnvChangeValue::Binary(body),
                old_value: EnvChangeValue::Binary(Bytes::new()),
            });
        }

        let (new_value, old_value) = if env_type.is_binary() {
            (read_b_varbyte(&mut body)?, read_b_varbyte(&mut body)?)
        } else {
            (
                EnvChangeValue::String(read_b_varchar(&mut body)?),
                EnvChangeValue::String(read_b_varchar(&mut body)?),
            )
        };

        Ok(Self {
            env_type,
            new_value,
            old_value,
        })
    }

    /// Get the new database name if this is a database change.
    #[must_use]
    pub fn new_database(&self) -> Option<&str> {
        match (&self.env_type, &self.new_value) {
            (EnvChangeType::Database, EnvChangeValue::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Get the negotiated packet size if this is a packet size change.
    #[must_use]
    pub fn new_packet_size(&self) -> Option<usize> {
        match (&self.env_type, &self.new_value) {
            (EnvChangeType::PacketSize, EnvChangeValue::String(s)) => s.parse().ok(),
            _ => None,
        }
    }

    /// Get the transaction descriptor if this begins a transaction.
    #[must_use]
    pub fn begin_transaction(&self) -> Option<u64> {
        match (&self.env_type, &self.new_value) {
            (EnvChangeType::BeginTransaction, EnvChangeValue::Binary(b)) if b.len() == 8 => {
                let mut b = b.clone();
                Some(b.get_u64_le())
            }
            _ => None,
        }
    }
}

fn read_b_varbyte(src: &mut Bytes) -> Result<EnvChangeValue, ProtocolError> {
    require(src, 1)?;
    let len = src.get_u8() as usize;
    require(src, len)?;
    Ok(EnvChangeValue::Binary(src.split_to(len)))
}

/// Column ordering information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Ordered column indices.
    pub columns: Vec<u16>,
}

impl Order {
    /// Decode an ORDER token body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        require(src, 2)?;
        let length = src.get_u16_le() as usize;
        require(src, length)?;
        if length % 2 != 0 {
            return Err(ProtocolError::InvalidField {
                field: "ORDER length",
                value: length as u32,
            });
        }
        let columns = (0..length / 2).map(|_| src.get_u16_le()).collect();
        Ok(Self { columns })
    }
}

/// Output parameter value from a stored procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnValue {
    /// Parameter ordinal.
    pub param_ordinal: u16,
    /// Parameter name.
    pub param_name: String,
    /// Status (1 = output parameter, 2 = user-defined function result).
    pub status: u8,
    /// Value column description.
    pub column: ColumnData,
    /// Value bytes without length prefix, `None` for NULL.
    pub value: Option<Bytes>,
}

impl ReturnValue {
    /// Decode a RETURNVALUE token body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        require(src, 2)?;
        let param_ordinal = src.get_u16_le();
        let param_name = read_b_varchar(src)?;

        require(src, 1 + 4 + 2 + 1)?;
        let status = src.get_u8();
        let user_type = src.get_u32_le();
        let flags = ColumnFlags::from_bits_truncate(src.get_u16_le());
        let type_byte = src.get_u8();
        let type_id = TypeId::from_u8(type_byte).ok_or(ProtocolError::InvalidField {
            field: "return value type",
            value: u32::from(type_byte),
        })?;
        let type_info = TypeInfo::decode(src, type_id)?;

        let column = ColumnData {
            name: param_name.clone(),
            type_id,
            flags,
            user_type,
            type_info,
        };
        let value = read_value(src, type_id, column.value_length())?;

        Ok(Self {
            param_ordinal,
            param_name,
            status,
            column,
            value,
        })
    }
}

/// One result set: column metadata and the rows that followed it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    /// Column metadata.
    pub columns: ColMetaData,
    /// Rows in arrival order.
    pub rows: Vec<RawRow>,
}

/// Everything decoded from one reply payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenSet {
    /// Result sets in arrival order.
    pub result_sets: Vec<ResultSet>,
    /// Every DONE family token in arrival order.
    pub done: Vec<Done>,
    /// ERROR tokens.
    pub errors: Vec<ServerError>,
    /// INFO tokens.
    pub infos: Vec<ServerInfo>,
    /// ENVCHANGE tokens.
    pub env_changes: Vec<EnvChange>,
    /// RETURNSTATUS of the last procedure.
    pub return_status: Option<i32>,
    /// RETURNVALUE tokens.
    pub return_values: Vec<ReturnValue>,
    /// LOGINACK, if the reply carried one.
    pub login_ack: Option<LoginAck>,
    /// ORDER of the last result set.
    pub order: Option<Order>,
}

impl TokenSet {
    /// The final completion marker.
    #[must_use]
    pub fn completion(&self) -> Option<&Done> {
        self.done.last()
    }

    /// The first error token, if any.
    #[must_use]
    pub fn first_error(&self) -> Option<&ServerError> {
        self.errors.first()
    }
}

/// Turns a reply payload into a [`TokenSet`].
///
/// The response dispatcher delegates token parsing through this trait so a
/// caller can substitute its own reader.
pub trait TokenStreamDecoder {
    /// Decode a whole reply payload.
    fn decode(&self, payload: Bytes) -> Result<TokenSet, ProtocolError>;
}

/// Default token stream reader.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenStreamReader;

impl TokenStreamReader {
    /// Decode a whole reply payload.
    pub fn read(&self, mut payload: Bytes) -> Result<TokenSet, ProtocolError> {
        let mut set = TokenSet::default();

        while payload.has_remaining() {
            let type_byte = payload.get_u8();
            let token_type =
                TokenType::from_u8(type_byte).ok_or(ProtocolError::InvalidTokenType(type_byte))?;

            match token_type {
                TokenType::ColMetaData => {
                    let columns = ColMetaData::decode(&mut payload)?;
                    set.result_sets.push(ResultSet {
                        columns,
                        rows: Vec::new(),
                    });
                }
                TokenType::Row | TokenType::NbcRow => {
                    let result_set = set
                        .result_sets
                        .last_mut()
                        .ok_or(ProtocolError::MissingMetadata(if token_type == TokenType::Row {
                            "ROW"
                        } else {
                            "NBCROW"
                        }))?;
                    let row = if token_type == TokenType::Row {
                        RawRow::decode(&mut payload, &result_set.columns)?
                    } else {
                        RawRow::decode_nbc(&mut payload, &result_set.columns)?
                    };
                    result_set.rows.push(row);
                }
                TokenType::Done => set.done.push(Done::decode(&mut payload, DoneKind::Done)?),
                TokenType::DoneProc => {
                    set.done.push(Done::decode(&mut payload, DoneKind::DoneProc)?);
                }
                TokenType::DoneInProc => {
                    set.done.push(Done::decode(&mut payload, DoneKind::DoneInProc)?);
                }
                TokenType::Error => set.errors.push(ServerError::decode(&mut payload)?),
                TokenType::Info => set.infos.push(ServerInfo::decode(&mut payload)?),
                TokenType::EnvChange => set.env_changes.push(EnvChange::decode(&mut payload)?),
                TokenType::LoginAck => set.login_ack = Some(LoginAck::decode(&mut payload)?),
                TokenType::Order => set.order = Some(Order::decode(&mut payload)?),
                TokenType::ReturnStatus => {
                    require(&payload, 4)?;
                    set.return_status = Some(payload.get_i32_le());
                }
                TokenType::ReturnValue => {
                    set.return_values.push(ReturnValue::decode(&mut payload)?);
                }
                TokenType::Sspi | TokenType::ColInfo | TokenType::TabName => {
                    require(&payload, 2)?;
                    let length = payload.get_u16_le() as usize;
                    skip(&mut payload, length)?;
                }
                TokenType::SessionState | TokenType::FedAuthInfo => {
                    require(&payload, 4)?;
                    let length = payload.get_u32_le() as usize;
                    skip(&mut payload, length)?;
                }
                TokenType::FeatureExtAck => skip_feature_ext_ack(&mut payload)?,
            }
        }

        tracing::trace!(
            result_sets = set.result_sets.len(),
            errors = set.errors.len(),
            done = set.done.len(),
            "decoded token stream"
        );

        Ok(set)
    }
}

impl TokenStreamDecoder for TokenStreamReader {
    fn decode(&self, payload: Bytes) -> Result<TokenSet, ProtocolError> {
        self.read(payload)
    }
}

fn skip_feature_ext_ack(src: &mut impl Buf) -> Result<(), ProtocolError> {
    loop {
        require(src, 1)?;
        if src.get_u8() == 0xFF {
            return Ok(());
        }
        require(src, 4)?;
        let length = src.get_u32_le() as usize;
        skip(src, length)?;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec::{utf16_len, write_utf16_string};
    use bytes::BufMut;

    fn put_b_varchar(buf: &mut BytesMut, s: &str) {
        buf.put_u8(utf16_len(s) as u8);
        write_utf16_string(buf, s);
    }

    fn error_token(number: i32, class: u8, message: &str) -> BytesMut {
        let mut body = BytesMut::new();
        body.put_i32_le(number);
        body.put_u8(1);
        body.put_u8(class);
        body.put_u16_le(utf16_len(message) as u16);
        write_utf16_string(&mut body, message);
        put_b_varchar(&mut body, "db01");
        put_b_varchar(&mut body, "");
        body.put_i32_le(1);

        let mut token = BytesMut::new();
        token.put_u8(TokenType::Error as u8);
        token.put_u16_le(body.len() as u16);
        token.extend_from_slice(&body);
        token
    }

    fn int_column_metadata(name: &str) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(TokenType::ColMetaData as u8);
        buf.put_u16_le(1);
        buf.put_u32_le(0);
        buf.put_u16_le(0x0001);
        buf.put_u8(TypeId::IntN as u8);
        buf.put_u8(4);
        put_b_varchar(&mut buf, name);
        buf
    }

    fn done_token(status: DoneStatus, row_count: u64) -> [u8; 13] {
        let mut out = [0u8; 13];
        out[0] = TokenType::Done as u8;
        out[1..3].copy_from_slice(&status.bits().to_le_bytes());
        out[3..5].copy_from_slice(&0xC1u16.to_le_bytes());
        out[5..].copy_from_slice(&row_count.to_le_bytes());
        out
    }

    #[test]
    fn test_done_decode() {
        let data = done_token(DoneStatus::COUNT, 5);
        let mut cursor = &data[1..];
        let done = Done::decode(&mut cursor, DoneKind::Done).unwrap();
        assert_eq!(done.rows_affected(), Some(5));
        assert_eq!(done.cur_cmd, 193);
        assert!(!done.has_more());
    }

    #[test]
    fn test_done_without_count() {
        let data = done_token(DoneStatus::MORE | DoneStatus::ERROR, 7);
        let mut cursor = &data[1..];
        let done = Done::decode(&mut cursor, DoneKind::Done).unwrap();
        assert_eq!(done.rows_affected(), None);
        assert!(done.has_more());
        assert!(done.has_error());
    }

    #[test]
    fn test_colmetadata_no_columns() {
        let mut cursor: &[u8] = &[0xFF, 0xFF];
        let meta = ColMetaData::decode(&mut cursor).unwrap();
        assert!(meta.is_empty());
    }

    #[test]
    fn test_colmetadata_nvarchar_column() {
        let mut data = BytesMut::new();
        data.put_u16_le(1);
        data.put_u32_le(0);
        data.put_u16_le(0x0001);
        data.put_u8(TypeId::NVarChar as u8);
        data.put_u16_le(100);
        data.extend_from_slice(&[0x09, 0x04, 0xD0, 0x00, 0x34]);
        put_b_varchar(&mut data, "name");

        let mut cursor: &[u8] = &data;
        let meta = ColMetaData::decode(&mut cursor).unwrap();
        let col = &meta.columns[0];
        assert_eq!(col.name, "name");
        assert_eq!(col.type_id, TypeId::NVarChar);
        assert_eq!(col.type_info.max_length, Some(100));
        assert_eq!(
            col.type_info.collation,
            Some(Collation {
                lcid: 0x00D0_0409,
                sort_id: 0x34
            })
        );
        assert!(col.is_nullable());
    }

    #[test]
    fn test_select_one_reply() {
        let mut data = int_column_metadata("");
        data.put_u8(TokenType::Row as u8);
        data.put_u8(4);
        data.put_i32_le(1);
        data.extend_from_slice(&done_token(DoneStatus::COUNT, 1));

        let set = TokenStreamReader.read(data.freeze()).unwrap();
        assert_eq!(set.result_sets.len(), 1);
        let rows = &set.result_sets[0].rows;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(0).unwrap().as_ref(), &1i32.to_le_bytes());
        assert_eq!(set.completion().unwrap().rows_affected(), Some(1));
        assert!(set.errors.is_empty());
    }

    #[test]
    fn test_null_intn_value() {
        let mut data = int_column_metadata("n");
        data.put_u8(TokenType::Row as u8);
        data.put_u8(0);

        let set = TokenStreamReader.read(data.freeze()).unwrap();
        assert!(set.result_sets[0].rows[0].is_null(0));
    }

    #[test]
    fn test_nbcrow_bitmap() {
        let mut data = BytesMut::new();
        data.put_u8(TokenType::ColMetaData as u8);
        data.put_u16_le(2);
        for name in ["a", "b"] {
            data.put_u32_le(0);
            data.put_u16_le(0x0001);
            data.put_u8(TypeId::IntN as u8);
            data.put_u8(4);
            put_b_varchar(&mut data, name);
        }
        data.put_u8(TokenType::NbcRow as u8);
        data.put_u8(0b0000_0001);
        data.put_u8(4);
        data.put_i32_le(9);

        let set = TokenStreamReader.read(data.freeze()).unwrap();
        let row = &set.result_sets[0].rows[0];
        assert!(row.is_null(0));
        assert_eq!(row.get(1).unwrap().as_ref(), &9i32.to_le_bytes());
    }

    #[test]
    fn test_plp_value_reassembled() {
        let mut data = BytesMut::new();
        data.put_u8(TokenType::ColMetaData as u8);
        data.put_u16_le(1);
        data.put_u32_le(0);
        data.put_u16_le(0x0001);
        data.put_u8(TypeId::BigVarBinary as u8);
        data.put_u16_le(0xFFFF);
        put_b_varchar(&mut data, "blob");
        data.put_u8(TokenType::Row as u8);
        data.put_u64_le(5);
        data.put_u32_le(2);
        data.extend_from_slice(b"ab");
        data.put_u32_le(3);
        data.extend_from_slice(b"cde");
        data.put_u32_le(0);

        let set = TokenStreamReader.read(data.freeze()).unwrap();
        assert_eq!(set.result_sets[0].rows[0].get(0).unwrap().as_ref(), b"abcde");
    }

    #[test]
    fn test_row_without_metadata() {
        let data = Bytes::from_static(&[0xD1, 0x04, 0x01, 0x00, 0x00, 0x00]);
        assert_eq!(
            TokenStreamReader.read(data),
            Err(ProtocolError::MissingMetadata("ROW"))
        );
    }

    #[test]
    fn test_error_token_collected() {
        let mut data = error_token(208, 16, "Invalid object name 'nope'.");
        data.extend_from_slice(&done_token(DoneStatus::ERROR, 0));

        let set = TokenStreamReader.read(data.freeze()).unwrap();
        let err = set.first_error().unwrap();
        assert_eq!(err.number, 208);
        assert_eq!(err.message, "Invalid object name 'nope'.");
        assert_eq!(err.server, "db01");
        assert!(err.is_batch_abort());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_unknown_token() {
        let data = Bytes::from_static(&[0x42]);
        assert_eq!(
            TokenStreamReader.read(data),
            Err(ProtocolError::InvalidTokenType(0x42))
        );
    }

    #[test]
    fn test_truncated_done() {
        let data = Bytes::from_static(&[0xFD, 0x00, 0x00]);
        assert!(matches!(
            TokenStreamReader.read(data),
            Err(ProtocolError::IncompletePacket { expected: 12, .. })
        ));
    }

    #[test]
    fn test_env_change_database() {
        let mut body = BytesMut::new();
        body.put_u8(EnvChangeType::Database as u8);
        put_b_varchar(&mut body, "sales");
        put_b_varchar(&mut body, "master");

        let mut data = BytesMut::new();
        data.put_u8(TokenType::EnvChange as u8);
        data.put_u16_le(body.len() as u16);
        data.extend_from_slice(&body);

        let set = TokenStreamReader.read(data.freeze()).unwrap();
        assert_eq!(set.env_changes[0].new_database(), Some("sales"));
    }

    #[test]
    fn test_env_change_begin_transaction() {
        let mut body = BytesMut::new();
        body.put_u8(EnvChangeType::BeginTransaction as u8);
        body.put_u8(8);
        body.put_u64_le(0x1122_3344);
        body.put_u8(0);

        let mut data = BytesMut::new();
        data.put_u16_le(body.len() as u16);
        data.extend_from_slice(&body);

        let mut cursor = &data[..];
        let change = EnvChange::decode(&mut cursor).unwrap();
        assert_eq!(change.begin_transaction(), Some(0x1122_3344));
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_login_ack_from_payload() {
        let mut body = BytesMut::new();
        body.put_u8(1);
        body.put_u32(TdsVersion::V7_4.raw());
        put_b_varchar(&mut body, "Microsoft SQL Server");
        body.extend_from_slice(&[16, 0, 0x10, 0x68]);

        let mut data = BytesMut::new();
        data.put_u8(TokenType::LoginAck as u8);
        data.put_u16_le(body.len() as u16);
        data.extend_from_slice(&body);
        data.extend_from_slice(&done_token(DoneStatus::empty(), 0));

        let ack = LoginAck::from_payload(data.freeze()).unwrap();
        assert_eq!(ack.tds_version, TdsVersion::V7_4);
        assert_eq!(ack.prog_name, "Microsoft SQL Server");
        assert_eq!(ack.prog_version, [16, 0, 0x10, 0x68]);
    }

    #[test]
    fn test_failed_login_surfaces_server_error() {
        let mut data = error_token(18456, 14, "Login failed for user 'sa'.");
        data.extend_from_slice(&done_token(DoneStatus::ERROR, 0));

        match LoginAck::from_payload(data.freeze()) {
            Err(CodecError::ServerError(err)) => {
                assert_eq!(err.number, 18456);
                assert_eq!(err.class, 14);
                assert_eq!(err.message, "Login failed for user 'sa'.");
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[test]
    fn test_login_reply_without_ack_is_malformed() {
        let data = BytesMut::from(&done_token(DoneStatus::empty(), 0)[..]);
        assert!(matches!(
            LoginAck::from_payload(data.freeze()),
            Err(CodecError::MalformedResponse(ProtocolError::MissingToken("LOGINACK")))
        ));
    }

    #[test]
    fn test_login_ack_trailing_fields_skipped() {
        let mut body = BytesMut::new();
        body.put_u8(1);
        body.put_u32(TdsVersion::V7_4.raw());
        put_b_varchar(&mut body, "srv");
        body.extend_from_slice(&[16, 0, 0, 1]);
        // fields appended by a newer server
        body.extend_from_slice(&[0xEE, 0xEE, 0xEE]);

        let mut data = BytesMut::new();
        data.put_u8(TokenType::LoginAck as u8);
        data.put_u16_le(body.len() as u16);
        data.extend_from_slice(&body);
        data.extend_from_slice(&done_token(DoneStatus::COUNT, 9));

        let set = TokenStreamReader.read(data.freeze()).unwrap();
        assert_eq!(set.login_ack.as_ref().unwrap().prog_name, "srv");
        assert_eq!(set.completion().unwrap().rows_affected(), Some(9));
    }

    #[test]
    fn test_info_trailing_fields_skipped() {
        let mut token = error_token(5701, 0, "Changed database context.");
        token[0] = TokenType::Info as u8;
        let length = u16::from_le_bytes([token[1], token[2]]) + 2;
        token[1..3].copy_from_slice(&length.to_le_bytes());
        token.extend_from_slice(&[0xEE, 0xEE]);
        token.extend_from_slice(&done_token(DoneStatus::empty(), 0));

        let set = TokenStreamReader.read(token.freeze()).unwrap();
        assert_eq!(set.infos[0].number, 5701);
        assert_eq!(set.done.len(), 1);
    }

    #[test]
    fn test_token_body_shorter_than_declared() {
        let mut token = error_token(208, 16, "x");
        token.truncate(token.len() - 2);
        assert!(matches!(
            TokenStreamReader.read(token.freeze()),
            Err(ProtocolError::IncompletePacket { .. })
        ));
    }

    #[test]
    fn test_order_odd_length_rejected() {
        let mut cursor: &[u8] = &[0x03, 0x00, 0x01, 0x00, 0x02];
        assert!(matches!(
            Order::decode(&mut cursor),
            Err(ProtocolError::InvalidField { field: "ORDER length", value: 3 })
        ));

        let mut cursor: &[u8] = &[0x04, 0x00, 0x01, 0x00, 0x02, 0x00];
        assert_eq!(Order::decode(&mut cursor).unwrap().columns, vec![1, 2]);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_return_status_and_value() {
        let mut data = BytesMut::new();
        data.put_u8(TokenType::ReturnValue as u8);
        data.put_u16_le(1);
        put_b_varchar(&mut data, "@out");
        data.put_u8(1);
        data.put_u32_le(0);
        data.put_u16_le(0x0001);
        data.put_u8(TypeId::IntN as u8);
        data.put_u8(4);
        data.put_u8(4);
        data.put_i32_le(42);
        data.put_u8(TokenType::ReturnStatus as u8);
        data.put_i32_le(0);

        let set = TokenStreamReader.read(data.freeze()).unwrap();
        assert_eq!(set.return_status, Some(0));
        let rv = &set.return_values[0];
        assert_eq!(rv.param_name, "@out");
        assert_eq!(rv.value.as_ref().unwrap().as_ref(), &42i32.to_le_bytes());
    }

    #[test]
    fn test_skipped_tokens() {
        let mut data = BytesMut::new();
        data.put_u8(TokenType::FeatureExtAck as u8);
        data.put_u8(0x04);
        data.put_u32_le(1);
        data.put_u8(0x01);
        data.put_u8(0xFF);
        data.put_u8(TokenType::SessionState as u8);
        data.put_u32_le(2);
        data.put_u16_le(0);
        data.extend_from_slice(&done_token(DoneStatus::empty(), 0));

        let set = TokenStreamReader.read(data.freeze()).unwrap();
        assert_eq!(set.done.len(), 1);
    }
}
