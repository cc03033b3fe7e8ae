//! RPC parameter encoding for [`SqlValue`].
//!
//! [`SqlTypeEncoder`] is the [`TypeEncoder`] implementation the RPC encoder
//! calls for every parameter. Each value maps to one nullable wire type:
//!
//! | Value | Wire type | Declaration |
//! |-------|-----------|-------------|
//! | `Null` | INTN(4), length 0 | `int` |
//! | `Bool` | BITN(1) | `bit` |
//! | integers | INTN(1/2/4/8) | `tinyint` .. `bigint` |
//! | `Float`/`Double` | FLTN(4/8) | `real`/`float` |
//! | `String` | NVARCHAR(4000), PLP above 4000 units | `nvarchar(4000)`/`nvarchar(max)` |
//! | `Binary` | BIGVARBINARY(8000), PLP above 8000 bytes | `varbinary(8000)`/`varbinary(max)` |
//! | `Uuid` | GUID(16) | `uniqueidentifier` |
//! | `Decimal` | DECIMALN(17, 38, s) | `decimal(38, s)` |
//! | `Date` .. `DateTimeOffset` | DATEN, TIMEN(7), DATETIME2N(7), DATETIMEOFFSETN(7) | |
//!
//! XML values are rejected.

use bytes::{BufMut, Bytes, BytesMut};
use tds_wire::types::{MAX_LENGTH_PLP, TypeId};
use tds_wire::{TypeDescriptor, TypeEncoder};

use crate::error::TypeError;
use crate::value::SqlValue;

/// Longest NVARCHAR value, in bytes, sent with a 2-byte length.
pub const NVARCHAR_MAX_BYTES: usize = 8000;

/// Longest VARBINARY value sent with a 2-byte length.
pub const VARBINARY_MAX_BYTES: usize = 8000;

/// Collation sent with character parameters: LCID 0x0409, CI_AS, sort id 52.
pub const DEFAULT_COLLATION: [u8; 5] = [0x09, 0x04, 0xD0, 0x00, 0x34];

/// Fractional-second scale used for every time-bearing parameter.
const TIME_SCALE: u8 = 7;

/// PLP NULL marker.
const PLP_NULL: u64 = u64::MAX;

/// Encodes [`SqlValue`] parameters for RPC requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlTypeEncoder;

impl SqlTypeEncoder {
    /// Create an encoder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl TypeEncoder<SqlValue> for SqlTypeEncoder {
    type Error = TypeError;

    fn encode_data_type(&self, value: &SqlValue) -> Result<TypeDescriptor, TypeError> {
        let (type_id, info): (TypeId, Bytes) = match value {
            SqlValue::Null | SqlValue::Int(_) => (TypeId::IntN, Bytes::from_static(&[4])),
            SqlValue::Bool(_) => (TypeId::BitN, Bytes::from_static(&[1])),
            SqlValue::TinyInt(_) => (TypeId::IntN, Bytes::from_static(&[1])),
            SqlValue::SmallInt(_) => (TypeId::IntN, Bytes::from_static(&[2])),
            SqlValue::BigInt(_) => (TypeId::IntN, Bytes::from_static(&[8])),
            SqlValue::Float(_) => (TypeId::FloatN, Bytes::from_static(&[4])),
            SqlValue::Double(_) => (TypeId::FloatN, Bytes::from_static(&[8])),
            SqlValue::String(s) => {
                let mut info = BytesMut::with_capacity(7);
                if is_plp_string(s) {
                    info.put_u16_le(MAX_LENGTH_PLP as u16);
                } else {
                    info.put_u16_le(NVARCHAR_MAX_BYTES as u16);
                }
                info.put_slice(&DEFAULT_COLLATION);
                (TypeId::NVarChar, info.freeze())
            }
            SqlValue::Binary(b) => {
                let max = if b.len() > VARBINARY_MAX_BYTES {
                    MAX_LENGTH_PLP as u16
                } else {
                    VARBINARY_MAX_BYTES as u16
                };
                (TypeId::BigVarBinary, Bytes::copy_from_slice(&max.to_le_bytes()))
            }
            #[cfg(feature = "decimal")]
            SqlValue::Decimal(d) => (
                TypeId::DecimalN,
                Bytes::copy_from_slice(&[17, 38, d.scale() as u8]),
            ),
            #[cfg(feature = "uuid")]
            SqlValue::Uuid(_) => (TypeId::Guid, Bytes::from_static(&[16])),
            #[cfg(feature = "chrono")]
            SqlValue::Date(_) => (TypeId::Date, Bytes::new()),
            #[cfg(feature = "chrono")]
            SqlValue::Time(_) => (TypeId::Time, Bytes::from_static(&[TIME_SCALE])),
            #[cfg(feature = "chrono")]
            SqlValue::DateTime(_) => (TypeId::DateTime2, Bytes::from_static(&[TIME_SCALE])),
            #[cfg(feature = "chrono")]
            SqlValue::DateTimeOffset(_) => {
                (TypeId::DateTimeOffset, Bytes::from_static(&[TIME_SCALE]))
            }
            SqlValue::Xml(_) => return Err(unsupported(value)),
        };
        Ok(TypeDescriptor::new(type_id as u8, info))
    }

    fn encode_data(&self, descriptor: &TypeDescriptor, value: &SqlValue) -> Result<Bytes, TypeError> {
        let mut buf = BytesMut::new();
        match value {
            SqlValue::Null => buf.put_u8(0),
            SqlValue::Bool(v) => buf.put_slice(&[1, u8::from(*v)]),
            SqlValue::TinyInt(v) => buf.put_slice(&[1, *v]),
            SqlValue::SmallInt(v) => {
                buf.put_u8(2);
                buf.put_i16_le(*v);
            }
            SqlValue::Int(v) => {
                buf.put_u8(4);
                buf.put_i32_le(*v);
            }
            SqlValue::BigInt(v) => {
                buf.put_u8(8);
                buf.put_i64_le(*v);
            }
            SqlValue::Float(v) => {
                buf.put_u8(4);
                buf.put_f32_le(*v);
            }
            SqlValue::Double(v) => {
                buf.put_u8(8);
                buf.put_f64_le(*v);
            }
            SqlValue::String(s) => {
                let data: Vec<u8> = s.encode_utf16().flat_map(u16::to_le_bytes).collect();
                if is_plp(descriptor) {
                    put_plp(&mut buf, &data);
                } else {
                    buf.put_u16_le(data.len() as u16);
                    buf.put_slice(&data);
                }
            }
            SqlValue::Binary(b) => {
                if is_plp(descriptor) {
                    put_plp(&mut buf, b);
                } else {
                    buf.put_u16_le(b.len() as u16);
                    buf.put_slice(b);
                }
            }
            #[cfg(feature = "decimal")]
            SqlValue::Decimal(d) => {
                buf.put_u8(17);
                encode_decimal(*d, &mut buf);
            }
            #[cfg(feature = "uuid")]
            SqlValue::Uuid(u) => {
                buf.put_u8(16);
                encode_uuid(*u, &mut buf);
            }
            #[cfg(feature = "chrono")]
            SqlValue::Date(d) => {
                buf.put_u8(3);
                encode_date(*d, &mut buf)?;
            }
            #[cfg(feature = "chrono")]
            SqlValue::Time(t) => {
                buf.put_u8(5);
                encode_time(*t, &mut buf);
            }
            #[cfg(feature = "chrono")]
            SqlValue::DateTime(dt) => {
                buf.put_u8(8);
                encode_time(dt.time(), &mut buf);
                encode_date(dt.date(), &mut buf)?;
            }
            #[cfg(feature = "chrono")]
            SqlValue::DateTimeOffset(dto) => {
                buf.put_u8(10);
                encode_datetimeoffset(*dto, &mut buf)?;
            }
            SqlValue::Xml(_) => return Err(unsupported(value)),
        }
        Ok(buf.freeze())
    }
}

/// Type declaration of a value as written in an `sp_executesql` parameter
/// list, such as `int` or `nvarchar(max)`.
pub fn sql_declaration(value: &SqlValue) -> Result<String, TypeError> {
    let declaration = match value {
        SqlValue::Null | SqlValue::Int(_) => "int".to_owned(),
        SqlValue::Bool(_) => "bit".to_owned(),
        SqlValue::TinyInt(_) => "tinyint".to_owned(),
        SqlValue::SmallInt(_) => "smallint".to_owned(),
        SqlValue::BigInt(_) => "bigint".to_owned(),
        SqlValue::Float(_) => "real".to_owned(),
        SqlValue::Double(_) => "float".to_owned(),
        SqlValue::String(s) if is_plp_string(s) => "nvarchar(max)".to_owned(),
        SqlValue::String(_) => format!("nvarchar({})", NVARCHAR_MAX_BYTES / 2),
        SqlValue::Binary(b) if b.len() > VARBINARY_MAX_BYTES => "varbinary(max)".to_owned(),
        SqlValue::Binary(_) => format!("varbinary({VARBINARY_MAX_BYTES})"),
        #[cfg(feature = "decimal")]
        SqlValue::Decimal(d) => format!("decimal(38, {})", d.scale()),
        #[cfg(feature = "uuid")]
        SqlValue::Uuid(_) => "uniqueidentifier".to_owned(),
        #[cfg(feature = "chrono")]
        SqlValue::Date(_) => "date".to_owned(),
        #[cfg(feature = "chrono")]
        SqlValue::Time(_) => format!("time({TIME_SCALE})"),
        #[cfg(feature = "chrono")]
        SqlValue::DateTime(_) => format!("datetime2({TIME_SCALE})"),
        #[cfg(feature = "chrono")]
        SqlValue::DateTimeOffset(_) => format!("datetimeoffset({TIME_SCALE})"),
        SqlValue::Xml(_) => return Err(unsupported(value)),
    };
    Ok(declaration)
}

fn unsupported(value: &SqlValue) -> TypeError {
    TypeError::UnsupportedConversion {
        from: value.type_name().to_owned(),
        to: "RPC parameter",
    }
}

fn is_plp_string(s: &str) -> bool {
    s.encode_utf16().count() * 2 > NVARCHAR_MAX_BYTES
}

fn is_plp(descriptor: &TypeDescriptor) -> bool {
    descriptor.info.get(..2) == Some(&(MAX_LENGTH_PLP as u16).to_le_bytes()[..])
}

/// Write a PLP value as a single chunk followed by the terminator.
fn put_plp(buf: &mut BytesMut, data: &[u8]) {
    debug_assert_ne!(data.len() as u64, PLP_NULL);
    buf.put_u64_le(data.len() as u64);
    if !data.is_empty() {
        buf.put_u32_le(data.len() as u32);
        buf.put_slice(data);
    }
    buf.put_u32_le(0);
}

/// Encode a UUID in SQL Server's mixed-endian format.
///
/// The first three groups are little-endian, the last 8 bytes as-is.
#[cfg(feature = "uuid")]
pub fn encode_uuid(uuid: uuid::Uuid, buf: &mut BytesMut) {
    let (d1, d2, d3, d4) = uuid.as_fields();
    buf.put_u32_le(d1);
    buf.put_u16_le(d2);
    buf.put_u16_le(d3);
    buf.put_slice(d4);
}

/// Encode a decimal as sign byte plus 16-byte little-endian magnitude.
#[cfg(feature = "decimal")]
pub fn encode_decimal(decimal: rust_decimal::Decimal, buf: &mut BytesMut) {
    buf.put_u8(u8::from(!decimal.is_sign_negative()));
    buf.put_u128_le(decimal.mantissa().unsigned_abs());
}

/// Encode a DATE as 3-byte little-endian days since 0001-01-01.
#[cfg(feature = "chrono")]
pub fn encode_date(date: chrono::NaiveDate, buf: &mut BytesMut) -> Result<(), TypeError> {
    use chrono::Datelike;

    let days = date.num_days_from_ce() - 1;
    if !(0..=0x00FF_FFFF).contains(&days) {
        return Err(TypeError::OutOfRange { target_type: "DATE" });
    }
    buf.put_slice(&days.to_le_bytes()[..3]);
    Ok(())
}

/// Encode a TIME(7) as 5-byte little-endian 100-nanosecond ticks.
#[cfg(feature = "chrono")]
pub fn encode_time(time: chrono::NaiveTime, buf: &mut BytesMut) {
    use chrono::Timelike;

    // leap seconds carry nanosecond() >= 1e9
    let nanos = u64::from(time.nanosecond().min(999_999_999));
    let ticks = u64::from(time.num_seconds_from_midnight()) * 10_000_000 + nanos / 100;
    buf.put_slice(&ticks.to_le_bytes()[..5]);
}

/// Encode a DATETIMEOFFSET(7): UTC time, UTC date, offset in minutes.
#[cfg(feature = "chrono")]
pub fn encode_datetimeoffset(
    datetime: chrono::DateTime<chrono::FixedOffset>,
    buf: &mut BytesMut,
) -> Result<(), TypeError> {
    let utc = datetime.naive_utc();
    encode_time(utc.time(), buf);
    encode_date(utc.date(), buf)?;
    let offset_minutes = datetime.offset().local_minus_utc() / 60;
    buf.put_i16_le(offset_minutes as i16);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn encode(value: &SqlValue) -> (TypeDescriptor, Bytes) {
        let descriptor = SqlTypeEncoder.encode_data_type(value).unwrap();
        let data = SqlTypeEncoder.encode_data(&descriptor, value).unwrap();
        (descriptor, data)
    }

    #[test]
    fn test_encode_int() {
        let (descriptor, data) = encode(&SqlValue::Int(42));
        assert_eq!(descriptor.type_id, 0x26);
        assert_eq!(&descriptor.info[..], &[4]);
        assert_eq!(&data[..], &[4, 42, 0, 0, 0]);
    }

    #[test]
    fn test_encode_null() {
        let (descriptor, data) = encode(&SqlValue::Null);
        assert_eq!(descriptor.type_id, 0x26);
        assert_eq!(&data[..], &[0]);
        assert_eq!(sql_declaration(&SqlValue::Null).unwrap(), "int");
    }

    #[test]
    fn test_encode_bigint() {
        let (_, data) = encode(&SqlValue::BigInt(0x0102_0304_0506_0708));
        assert_eq!(&data[..], &[8, 0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_encode_bit() {
        let (descriptor, data) = encode(&SqlValue::Bool(true));
        assert_eq!(descriptor.type_id, 0x68);
        assert_eq!(&data[..], &[1, 1]);
    }

    #[test]
    fn test_encode_short_string() {
        let (descriptor, data) = encode(&SqlValue::from("AB"));
        assert_eq!(descriptor.type_id, 0xE7);
        assert_eq!(&descriptor.info[..2], &8000u16.to_le_bytes());
        assert_eq!(&descriptor.info[2..], &DEFAULT_COLLATION);
        assert_eq!(&data[..], &[4, 0, 0x41, 0, 0x42, 0]);
    }

    #[test]
    fn test_encode_long_string_as_plp() {
        let value = SqlValue::String("x".repeat(4001));
        let (descriptor, data) = encode(&value);
        assert_eq!(&descriptor.info[..2], &[0xFF, 0xFF]);
        assert_eq!(&data[..8], &8002u64.to_le_bytes());
        assert_eq!(&data[8..12], &8002u32.to_le_bytes());
        assert_eq!(&data[data.len() - 4..], &[0, 0, 0, 0]);
        assert_eq!(data.len(), 8 + 4 + 8002 + 4);
        assert_eq!(sql_declaration(&value).unwrap(), "nvarchar(max)");
    }

    #[test]
    fn test_encode_binary() {
        let (descriptor, data) = encode(&SqlValue::from(vec![1u8, 2, 3]));
        assert_eq!(descriptor.type_id, 0xA5);
        assert_eq!(&data[..], &[3, 0, 1, 2, 3]);

        let large = SqlValue::from(vec![0u8; 8001]);
        let (descriptor, _) = encode(&large);
        assert_eq!(&descriptor.info[..], &[0xFF, 0xFF]);
    }

    #[test]
    fn test_xml_is_rejected() {
        let value = SqlValue::Xml("<a/>".into());
        assert!(matches!(
            SqlTypeEncoder.encode_data_type(&value),
            Err(TypeError::UnsupportedConversion { .. })
        ));
        assert!(sql_declaration(&value).is_err());
    }

    #[cfg(feature = "uuid")]
    #[test]
    fn test_encode_uuid() {
        let uuid = uuid::Uuid::parse_str("12345678-1234-5678-1234-567812345678").unwrap();
        let (_, data) = encode(&SqlValue::Uuid(uuid));
        assert_eq!(
            &data[..],
            &[
                16, // length
                0x78, 0x56, 0x34, 0x12, // first group reversed
                0x34, 0x12, // second group reversed
                0x78, 0x56, // third group reversed
                0x12, 0x34, 0x56, 0x78, 0x12, 0x34, 0x56, 0x78,
            ]
        );
    }

    #[cfg(feature = "decimal")]
    #[test]
    fn test_encode_decimal() {
        let value = SqlValue::Decimal(rust_decimal::Decimal::new(-12345, 2));
        let (descriptor, data) = encode(&value);
        assert_eq!(&descriptor.info[..], &[17, 38, 2]);
        assert_eq!(data[0], 17);
        assert_eq!(data[1], 0);
        assert_eq!(&data[2..4], &12345u16.to_le_bytes());
        assert_eq!(sql_declaration(&value).unwrap(), "decimal(38, 2)");
    }

    #[cfg(feature = "chrono")]
    #[test]
    fn test_encode_date() {
        let mut buf = BytesMut::new();
        encode_date(chrono::NaiveDate::from_ymd_opt(1, 1, 2).unwrap(), &mut buf).unwrap();
        assert_eq!(&buf[..], &[1, 0, 0]);
    }

    #[cfg(feature = "chrono")]
    #[test]
    fn test_encode_datetime2() {
        let dt = chrono::NaiveDate::from_ymd_opt(1, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 1)
            .unwrap();
        let (descriptor, data) = encode(&SqlValue::DateTime(dt));
        assert_eq!(descriptor.type_id, 0x2A);
        assert_eq!(data[0], 8);
        assert_eq!(&data[1..6], &[0x80, 0x96, 0x98, 0x00, 0x00]);
        assert_eq!(&data[6..], &[0, 0, 0]);
    }

    #[cfg(feature = "chrono")]
    #[test]
    fn test_encode_datetimeoffset_uses_utc() {
        let offset = chrono::FixedOffset::east_opt(2 * 3600).unwrap();
        let dto = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(2, 0, 0)
            .unwrap()
            .and_local_timezone(offset)
            .unwrap();
        let (_, data) = encode(&SqlValue::DateTimeOffset(dto));
        assert_eq!(data[0], 10);
        // 02:00 +02:00 is midnight UTC
        assert_eq!(&data[1..6], &[0, 0, 0, 0, 0]);
        assert_eq!(&data[9..11], &120i16.to_le_bytes());
    }
}
