//! TDS data type identifiers and value length classes.
//!
//! The same type byte appears in COLMETADATA, in RPC parameter descriptors
//! and in RETURNVALUE tokens. How a value of a given type is length-prefixed
//! on the wire is captured by [`ValueLength`].

use bitflags::bitflags;

/// Sentinel max length marking a `(MAX)` column sent as PLP.
pub const MAX_LENGTH_PLP: u32 = 0xFFFF;

/// TDS data type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    /// Null type.
    Null = 0x1F,
    /// 8-bit unsigned integer.
    Int1 = 0x30,
    /// Bit (boolean).
    Bit = 0x32,
    /// 16-bit signed integer.
    Int2 = 0x34,
    /// 32-bit signed integer.
    Int4 = 0x38,
    /// 64-bit signed integer.
    Int8 = 0x7F,
    /// 32-bit floating point.
    Float4 = 0x3B,
    /// 64-bit floating point.
    Float8 = 0x3E,
    /// 8-byte money.
    Money = 0x3C,
    /// 4-byte money.
    Money4 = 0x7A,
    /// 8-byte datetime.
    DateTime = 0x3D,
    /// 4-byte small datetime.
    DateTime4 = 0x3A,

    /// Nullable GUID.
    Guid = 0x24,
    /// Nullable integer of 1, 2, 4 or 8 bytes.
    IntN = 0x26,
    /// Legacy decimal.
    Decimal = 0x37,
    /// Legacy numeric.
    Numeric = 0x3F,
    /// Nullable bit.
    BitN = 0x68,
    /// Decimal.
    DecimalN = 0x6A,
    /// Numeric.
    NumericN = 0x6C,
    /// Nullable float of 4 or 8 bytes.
    FloatN = 0x6D,
    /// Nullable money.
    MoneyN = 0x6E,
    /// Nullable datetime.
    DateTimeN = 0x6F,

    /// Legacy fixed-length character.
    Char = 0x2F,
    /// Legacy variable-length character.
    VarChar = 0x27,
    /// Legacy fixed-length binary.
    Binary = 0x2D,
    /// Legacy variable-length binary.
    VarBinary = 0x25,

    /// Variable-length character.
    BigVarChar = 0xA7,
    /// Variable-length binary.
    BigVarBinary = 0xA5,
    /// Fixed-length character.
    BigChar = 0xAF,
    /// Fixed-length binary.
    BigBinary = 0xAD,

    /// Fixed-length Unicode character.
    NChar = 0xEF,
    /// Variable-length Unicode character.
    NVarChar = 0xE7,

    /// Text (deprecated).
    Text = 0x23,
    /// Image (deprecated).
    Image = 0x22,
    /// NText (deprecated).
    NText = 0x63,

    /// Date (3 bytes).
    Date = 0x28,
    /// Time with variable scale.
    Time = 0x29,
    /// DateTime2 with variable scale.
    DateTime2 = 0x2A,
    /// DateTimeOffset with variable scale.
    DateTimeOffset = 0x2B,

    /// SQL Variant.
    Variant = 0x62,
    /// User-defined type.
    Udt = 0xF0,
    /// XML.
    Xml = 0xF1,
    /// Table-valued parameter.
    Tvp = 0xF3,
}

impl TypeId {
    /// Create a type ID from a raw byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        let id = match value {
            0x1F => Self::Null,
            0x30 => Self::Int1,
            0x32 => Self::Bit,
            0x34 => Self::Int2,
            0x38 => Self::Int4,
            0x7F => Self::Int8,
            0x3B => Self::Float4,
            0x3E => Self::Float8,
            0x3C => Self::Money,
            0x7A => Self::Money4,
            0x3D => Self::DateTime,
            0x3A => Self::DateTime4,
            0x24 => Self::Guid,
            0x26 => Self::IntN,
            0x37 => Self::Decimal,
            0x3F => Self::Numeric,
            0x68 => Self::BitN,
            0x6A => Self::DecimalN,
            0x6C => Self::NumericN,
            0x6D => Self::FloatN,
            0x6E => Self::MoneyN,
            0x6F => Self::DateTimeN,
            0x2F => Self::Char,
            0x27 => Self::VarChar,
            0x2D => Self::Binary,
            0x25 => Self::VarBinary,
            0xA7 => Self::BigVarChar,
            0xA5 => Self::BigVarBinary,
            0xAF => Self::BigChar,
            0xAD => Self::BigBinary,
            0xEF => Self::NChar,
            0xE7 => Self::NVarChar,
            0x23 => Self::Text,
            0x22 => Self::Image,
            0x63 => Self::NText,
            0x28 => Self::Date,
            0x29 => Self::Time,
            0x2A => Self::DateTime2,
            0x2B => Self::DateTimeOffset,
            0x62 => Self::Variant,
            0xF0 => Self::Udt,
            0xF1 => Self::Xml,
            0xF3 => Self::Tvp,
            _ => return None,
        };
        Some(id)
    }

    /// Fixed value size in bytes for types sent without a length prefix.
    #[must_use]
    pub const fn fixed_size(&self) -> Option<usize> {
        match self {
            Self::Null => Some(0),
            Self::Int1 | Self::Bit => Some(1),
            Self::Int2 => Some(2),
            Self::Int4 | Self::Float4 | Self::Money4 | Self::DateTime4 => Some(4),
            Self::Int8 | Self::Float8 | Self::Money | Self::DateTime => Some(8),
            _ => None,
        }
    }

    /// Whether values of this type carry a collation in their metadata.
    #[must_use]
    pub const fn has_collation(&self) -> bool {
        matches!(
            self,
            Self::BigVarChar | Self::BigChar | Self::NVarChar | Self::NChar | Self::Text | Self::NText
        )
    }

    /// How a value of this type is length-prefixed in a row or parameter.
    ///
    /// `max_length` is the declared maximum from the type info; `(MAX)`
    /// variants of the 2-byte-length types switch to PLP.
    #[must_use]
    pub fn value_length(&self, max_length: Option<u32>) -> ValueLength {
        if let Some(size) = self.fixed_size() {
            return ValueLength::Fixed(size);
        }
        match self {
            Self::BigVarChar | Self::BigVarBinary | Self::NVarChar
                if max_length == Some(MAX_LENGTH_PLP) =>
            {
                ValueLength::Plp
            }
            Self::BigVarChar
            | Self::BigVarBinary
            | Self::BigChar
            | Self::BigBinary
            | Self::NVarChar
            | Self::NChar => ValueLength::UShort,
            Self::Text | Self::NText | Self::Image => ValueLength::TextPtr,
            Self::Xml | Self::Udt => ValueLength::Plp,
            Self::Variant => ValueLength::Long,
            _ => ValueLength::Byte,
        }
    }
}

/// Length-prefix class of a value on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueLength {
    /// No prefix; always this many bytes.
    Fixed(usize),
    /// 1-byte length. Zero is NULL for nullable fixed types, `0xFF` for
    /// legacy character and binary types.
    Byte,
    /// 2-byte length, `0xFFFF` is NULL.
    UShort,
    /// 4-byte length, `0xFFFFFFFF` is NULL.
    Long,
    /// Partially length-prefixed: 8-byte total then chunks.
    Plp,
    /// Legacy text pointer, timestamp and 4-byte length.
    TextPtr,
}

bitflags! {
    /// Column flags from COLMETADATA.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ColumnFlags: u16 {
        /// Column is nullable.
        const NULLABLE = 0x0001;
        /// Comparison is case-sensitive.
        const CASE_SENSITIVE = 0x0002;
        /// Column can be written.
        const UPDATEABLE = 0x0004;
        /// Updateability is unknown.
        const UPDATEABLE_UNKNOWN = 0x0008;
        /// Identity column.
        const IDENTITY = 0x0010;
        /// Computed column.
        const COMPUTED = 0x0020;
        /// Fixed-length CLR type.
        const FIXED_LEN_CLR_TYPE = 0x0100;
        /// Sparse column set.
        const SPARSE_COLUMN_SET = 0x0200;
        /// Always Encrypted column.
        const ENCRYPTED = 0x0400;
        /// Hidden column.
        const HIDDEN = 0x2000;
        /// Key column.
        const KEY = 0x4000;
        /// Nullability unknown.
        const NULLABLE_UNKNOWN = 0x8000;
    }
}
