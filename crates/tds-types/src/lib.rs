//! # tds-types
//!
//! SQL Server value types for `tds-wire`.
//!
//! [`SqlTypeEncoder`] implements the [`tds_wire::TypeEncoder`] seam for
//! [`SqlValue`], so RPC requests can carry typed parameters. The decode side
//! turns the raw row values produced by the token stream reader back into
//! [`SqlValue`]s.
//!
//! ## Features
//!
//! - `chrono` (default): Enable date/time type support via chrono
//! - `uuid` (default): Enable UUID type support
//! - `decimal` (default): Enable decimal type support via rust_decimal
//!
//! ## Type Mappings
//!
//! | SQL Server Type | Rust Type |
//! |-----------------|-----------|
//! | `BIT` | `bool` |
//! | `TINYINT` | `u8` |
//! | `SMALLINT` | `i16` |
//! | `INT` | `i32` |
//! | `BIGINT` | `i64` |
//! | `REAL` | `f32` |
//! | `FLOAT` | `f64` |
//! | `DECIMAL`/`NUMERIC`/`MONEY` | `rust_decimal::Decimal` |
//! | `NCHAR`/`NVARCHAR` | `String` |
//! | `VARBINARY` | `bytes::Bytes` |
//! | `DATE` | `chrono::NaiveDate` |
//! | `TIME` | `chrono::NaiveTime` |
//! | `DATETIME2` | `chrono::NaiveDateTime` |
//! | `DATETIMEOFFSET` | `chrono::DateTime<FixedOffset>` |
//! | `UNIQUEIDENTIFIER` | `uuid::Uuid` |

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod decode;
pub mod encode;
pub mod error;
pub mod procedure;
pub mod value;

pub use decode::{decode_row, decode_utf16_string, decode_value};
pub use encode::{SqlTypeEncoder, sql_declaration};
pub use error::TypeError;
pub use procedure::{execute, execute_sql, param_declarations, prepare, unprepare};
pub use value::SqlValue;
