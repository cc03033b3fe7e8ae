//! Type conversion error types.

use thiserror::Error;

/// Errors raised while encoding parameter values or decoding row values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    /// Value is out of range for the wire type.
    #[error("value out of range for {target_type}")]
    OutOfRange {
        /// Target type name.
        target_type: &'static str,
    },

    /// Value bytes have a length the type does not allow.
    #[error("invalid {type_name} length: {length}")]
    InvalidLength {
        /// Type name.
        type_name: &'static str,
        /// Length seen.
        length: usize,
    },

    /// Invalid encoding in string data.
    #[error("invalid string encoding: {0}")]
    InvalidEncoding(String),

    /// Invalid date/time value.
    #[error("invalid date/time: {0}")]
    InvalidDateTime(String),

    /// Invalid decimal value.
    #[error("invalid decimal: {0}")]
    InvalidDecimal(String),

    /// Unsupported type conversion.
    #[error("unsupported conversion from {from} to {to}")]
    UnsupportedConversion {
        /// Source type.
        from: String,
        /// Target type.
        to: &'static str,
    },
}
