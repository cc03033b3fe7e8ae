//! Decoding raw row values into [`SqlValue`].
//!
//! The token stream reader in `tds-wire` leaves every column value as the
//! bytes between its length prefix and the next value. This module gives
//! those bytes a type using the column metadata.

use bytes::Bytes;
use tds_wire::token::{ColMetaData, ColumnData, RawRow};
use tds_wire::types::TypeId;

use crate::error::TypeError;
use crate::value::SqlValue;

/// Decode every value of a row.
pub fn decode_row(metadata: &ColMetaData, row: &RawRow) -> Result<Vec<SqlValue>, TypeError> {
    metadata
        .columns
        .iter()
        .zip(&row.values)
        .map(|(column, value)| decode_value(column, value.as_ref()))
        .collect()
}

/// Decode one column value. `None` is SQL NULL.
pub fn decode_value(column: &ColumnData, raw: Option<&Bytes>) -> Result<SqlValue, TypeError> {
    let Some(data) = raw else {
        return Ok(SqlValue::Null);
    };
    let scale = column.type_info.scale.unwrap_or(7);

    match column.type_id {
        TypeId::Null => Ok(SqlValue::Null),
        TypeId::Bit | TypeId::BitN => Ok(SqlValue::Bool(fixed::<1>(data, "BIT")?[0] != 0)),
        TypeId::Int1 | TypeId::Int2 | TypeId::Int4 | TypeId::Int8 | TypeId::IntN => {
            decode_int(data)
        }
        TypeId::Float4 | TypeId::Float8 | TypeId::FloatN => decode_float(data),

        TypeId::NVarChar | TypeId::NChar | TypeId::NText => {
            decode_utf16_string(data).map(SqlValue::String)
        }
        TypeId::BigVarChar | TypeId::BigChar | TypeId::VarChar | TypeId::Char | TypeId::Text => {
            Ok(SqlValue::String(decode_single_byte(data)))
        }
        TypeId::Xml => decode_utf16_string(data).map(SqlValue::Xml),

        TypeId::BigVarBinary
        | TypeId::BigBinary
        | TypeId::VarBinary
        | TypeId::Binary
        | TypeId::Image
        | TypeId::Udt
        | TypeId::Variant => Ok(SqlValue::Binary(data.clone())),

        #[cfg(feature = "uuid")]
        TypeId::Guid => decode_guid(data),

        #[cfg(feature = "decimal")]
        TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
            decode_decimal(data, scale)
        }
        #[cfg(feature = "decimal")]
        TypeId::Money | TypeId::Money4 | TypeId::MoneyN => decode_money(data),

        #[cfg(feature = "chrono")]
        TypeId::Date => Ok(SqlValue::Date(decode_date(data)?)),
        #[cfg(feature = "chrono")]
        TypeId::Time => Ok(SqlValue::Time(decode_time(data, scale)?)),
        #[cfg(feature = "chrono")]
        TypeId::DateTime2 => {
            let (time, date) = split_time(data, scale)?;
            Ok(SqlValue::DateTime(decode_date(date)?.and_time(decode_time(time, scale)?)))
        }
        #[cfg(feature = "chrono")]
        TypeId::DateTimeOffset => decode_datetimeoffset(data, scale),
        #[cfg(feature = "chrono")]
        TypeId::DateTime | TypeId::DateTime4 | TypeId::DateTimeN => decode_datetime(data),

        other => Err(TypeError::UnsupportedConversion {
            from: format!("{other:?}"),
            to: "SqlValue",
        }),
    }
}

fn fixed<const N: usize>(data: &[u8], type_name: &'static str) -> Result<[u8; N], TypeError> {
    data.try_into().map_err(|_| TypeError::InvalidLength {
        type_name,
        length: data.len(),
    })
}

fn decode_int(data: &[u8]) -> Result<SqlValue, TypeError> {
    match data.len() {
        1 => Ok(SqlValue::TinyInt(data[0])),
        2 => Ok(SqlValue::SmallInt(i16::from_le_bytes(fixed(data, "SMALLINT")?))),
        4 => Ok(SqlValue::Int(i32::from_le_bytes(fixed(data, "INT")?))),
        8 => Ok(SqlValue::BigInt(i64::from_le_bytes(fixed(data, "BIGINT")?))),
        length => Err(TypeError::InvalidLength {
            type_name: "INTN",
            length,
        }),
    }
}

fn decode_float(data: &[u8]) -> Result<SqlValue, TypeError> {
    match data.len() {
        4 => Ok(SqlValue::Float(f32::from_le_bytes(fixed(data, "REAL")?))),
        8 => Ok(SqlValue::Double(f64::from_le_bytes(fixed(data, "FLOAT")?))),
        length => Err(TypeError::InvalidLength {
            type_name: "FLTN",
            length,
        }),
    }
}

/// Decode a UTF-16LE string from bytes.
pub fn decode_utf16_string(data: &[u8]) -> Result<String, TypeError> {
    if data.len() % 2 != 0 {
        return Err(TypeError::InvalidEncoding(
            "UTF-16 data must have even length".to_string(),
        ));
    }

    let utf16: Vec<u16> = data
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .collect();

    String::from_utf16(&utf16).map_err(|e| TypeError::InvalidEncoding(e.to_string()))
}

/// Single-byte character data: UTF-8 when valid, lossy otherwise.
fn decode_single_byte(data: &[u8]) -> String {
    match std::str::from_utf8(data) {
        Ok(s) => s.to_owned(),
        Err(_) => {
            tracing::debug!(length = data.len(), "non UTF-8 character data decoded lossily");
            String::from_utf8_lossy(data).into_owned()
        }
    }
}

#[cfg(feature = "uuid")]
fn decode_guid(data: &[u8]) -> Result<SqlValue, TypeError> {
    let bytes: [u8; 16] = fixed(data, "UNIQUEIDENTIFIER")?;
    let d1 = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let d2 = u16::from_le_bytes([bytes[4], bytes[5]]);
    let d3 = u16::from_le_bytes([bytes[6], bytes[7]]);
    let mut d4 = [0u8; 8];
    d4.copy_from_slice(&bytes[8..]);
    Ok(SqlValue::Uuid(uuid::Uuid::from_fields(d1, d2, d3, &d4)))
}

#[cfg(feature = "decimal")]
fn decode_decimal(data: &[u8], scale: u8) -> Result<SqlValue, TypeError> {
    use rust_decimal::Decimal;

    let Some((&sign, magnitude)) = data.split_first() else {
        return Err(TypeError::InvalidLength {
            type_name: "DECIMAL",
            length: 0,
        });
    };
    if magnitude.len() > 16 {
        return Err(TypeError::InvalidLength {
            type_name: "DECIMAL",
            length: data.len(),
        });
    }

    let mut mantissa_bytes = [0u8; 16];
    mantissa_bytes[..magnitude.len()].copy_from_slice(magnitude);
    let mantissa = i128::try_from(u128::from_le_bytes(mantissa_bytes))
        .map_err(|e| TypeError::InvalidDecimal(e.to_string()))?;
    let mantissa = if sign == 0 { -mantissa } else { mantissa };

    Decimal::try_from_i128_with_scale(mantissa, u32::from(scale))
        .map(SqlValue::Decimal)
        .map_err(|e| TypeError::InvalidDecimal(e.to_string()))
}

#[cfg(feature = "decimal")]
fn decode_money(data: &[u8]) -> Result<SqlValue, TypeError> {
    use rust_decimal::Decimal;

    let units = match data.len() {
        4 => i64::from(i32::from_le_bytes(fixed(data, "SMALLMONEY")?)),
        8 => {
            // high 32 bits first
            let high = i64::from(i32::from_le_bytes([data[0], data[1], data[2], data[3]]));
            let low = i64::from(u32::from_le_bytes([data[4], data[5], data[6], data[7]]));
            (high << 32) | low
        }
        length => {
            return Err(TypeError::InvalidLength {
                type_name: "MONEY",
                length,
            });
        }
    };
    Ok(SqlValue::Decimal(Decimal::new(units, 4)))
}

#[cfg(feature = "chrono")]
fn decode_date(data: &[u8]) -> Result<chrono::NaiveDate, TypeError> {
    let bytes: [u8; 3] = fixed(data, "DATE")?;
    let days = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]);
    chrono::NaiveDate::from_num_days_from_ce_opt(days + 1)
        .ok_or_else(|| TypeError::InvalidDateTime(format!("day {days} out of range")))
}

/// Number of bytes a time value of the given scale occupies.
#[cfg(feature = "chrono")]
fn time_bytes_for_scale(scale: u8) -> usize {
    match scale {
        0..=2 => 3,
        3..=4 => 4,
        _ => 5,
    }
}

#[cfg(feature = "chrono")]
fn split_time(data: &[u8], scale: u8) -> Result<(&[u8], &[u8]), TypeError> {
    let time_len = time_bytes_for_scale(scale);
    if data.len() < time_len + 3 {
        return Err(TypeError::InvalidLength {
            type_name: "DATETIME2",
            length: data.len(),
        });
    }
    let (time, rest) = data.split_at(time_len);
    Ok((time, &rest[..3]))
}

#[cfg(feature = "chrono")]
fn decode_time(data: &[u8], scale: u8) -> Result<chrono::NaiveTime, TypeError> {
    if data.len() != time_bytes_for_scale(scale) {
        return Err(TypeError::InvalidLength {
            type_name: "TIME",
            length: data.len(),
        });
    }
    let mut ticks_bytes = [0u8; 8];
    ticks_bytes[..data.len()].copy_from_slice(data);
    let ticks = u64::from_le_bytes(ticks_bytes);

    let nanos = ticks * 10u64.pow(9 - u32::from(scale.min(7)));
    let secs = u32::try_from(nanos / 1_000_000_000)
        .map_err(|_| TypeError::InvalidDateTime(format!("{ticks} ticks past midnight")))?;
    chrono::NaiveTime::from_num_seconds_from_midnight_opt(secs, (nanos % 1_000_000_000) as u32)
        .ok_or_else(|| TypeError::InvalidDateTime(format!("{ticks} ticks past midnight")))
}

#[cfg(feature = "chrono")]
fn decode_datetimeoffset(data: &[u8], scale: u8) -> Result<SqlValue, TypeError> {
    let (time, date) = split_time(data, scale)?;
    let offset_at = time.len() + date.len();
    let offset_bytes: [u8; 2] = fixed(&data[offset_at..], "DATETIMEOFFSET")?;
    let offset_minutes = i16::from_le_bytes(offset_bytes);

    let utc = decode_date(date)?.and_time(decode_time(time, scale)?);
    let offset = chrono::FixedOffset::east_opt(i32::from(offset_minutes) * 60)
        .ok_or_else(|| TypeError::InvalidDateTime(format!("invalid offset: {offset_minutes}")))?;

    Ok(SqlValue::DateTimeOffset(
        chrono::DateTime::from_naive_utc_and_offset(utc, offset),
    ))
}

/// DATETIME (days since 1900 + 1/300 s ticks) or SMALLDATETIME (days + minutes).
#[cfg(feature = "chrono")]
fn decode_datetime(data: &[u8]) -> Result<SqlValue, TypeError> {
    let (days, nanos) = match data.len() {
        8 => {
            let days = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
            let ticks = u64::from(u32::from_le_bytes([data[4], data[5], data[6], data[7]]));
            (i64::from(days), ticks * 1_000_000_000 / 300)
        }
        4 => {
            let days = u16::from_le_bytes([data[0], data[1]]);
            let minutes = u64::from(u16::from_le_bytes([data[2], data[3]]));
            (i64::from(days), minutes * 60 * 1_000_000_000)
        }
        length => {
            return Err(TypeError::InvalidLength {
                type_name: "DATETIME",
                length,
            });
        }
    };

    let invalid = || TypeError::InvalidDateTime(format!("day {days} out of range"));
    let base = chrono::NaiveDate::from_ymd_opt(1900, 1, 1).ok_or_else(invalid)?;
    let date = base
        .checked_add_signed(chrono::TimeDelta::days(days))
        .ok_or_else(invalid)?;
    let time = chrono::NaiveTime::from_num_seconds_from_midnight_opt(
        (nanos / 1_000_000_000) as u32,
        (nanos % 1_000_000_000) as u32,
    )
    .ok_or_else(|| TypeError::InvalidDateTime("time of day out of range".to_string()))?;

    Ok(SqlValue::DateTime(date.and_time(time)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_wire::token::TypeInfo;
    use tds_wire::types::ColumnFlags;

    fn column(type_id: TypeId, type_info: TypeInfo) -> ColumnData {
        ColumnData {
            name: "c".into(),
            type_id,
            flags: ColumnFlags::NULLABLE,
            user_type: 0,
            type_info,
        }
    }

    fn decode(type_id: TypeId, data: &'static [u8]) -> SqlValue {
        decode_value(&column(type_id, TypeInfo::default()), Some(&Bytes::from_static(data)))
            .unwrap()
    }

    #[test]
    fn test_decode_integers() {
        assert_eq!(decode(TypeId::Int4, &[42, 0, 0, 0]), SqlValue::Int(42));
        assert_eq!(decode(TypeId::IntN, &[7]), SqlValue::TinyInt(7));
        assert_eq!(decode(TypeId::IntN, &[0xFF, 0xFF]), SqlValue::SmallInt(-1));
        assert!(
            decode_value(
                &column(TypeId::IntN, TypeInfo::default()),
                Some(&Bytes::from_static(&[1, 2, 3]))
            )
            .is_err()
        );
    }

    #[test]
    fn test_decode_null() {
        let col = column(TypeId::NVarChar, TypeInfo::default());
        assert_eq!(decode_value(&col, None).unwrap(), SqlValue::Null);
    }

    #[test]
    fn test_decode_strings() {
        assert_eq!(
            decode(TypeId::NVarChar, &[0x41, 0x00, 0x42, 0x00]),
            SqlValue::String("AB".into())
        );
        assert_eq!(decode(TypeId::BigVarChar, b"abc"), SqlValue::String("abc".into()));
    }

    #[test]
    fn test_decode_utf16_odd_length() {
        assert!(matches!(
            decode_utf16_string(&[0x41]),
            Err(TypeError::InvalidEncoding(_))
        ));
    }

    #[cfg(feature = "decimal")]
    #[test]
    fn test_decode_decimal() {
        let info = TypeInfo {
            max_length: Some(5),
            precision: Some(9),
            scale: Some(2),
            collation: None,
        };
        let value = decode_value(
            &column(TypeId::DecimalN, info),
            Some(&Bytes::from_static(&[0, 0x39, 0x30, 0, 0])),
        )
        .unwrap();
        assert_eq!(value, SqlValue::Decimal(rust_decimal::Decimal::new(-12345, 2)));
    }

    #[cfg(feature = "decimal")]
    #[test]
    fn test_decode_money() {
        let value = decode(TypeId::Money4, &[0x10, 0x27, 0, 0]);
        assert_eq!(value, SqlValue::Decimal(rust_decimal::Decimal::new(10000, 4)));
    }

    #[cfg(feature = "chrono")]
    #[test]
    fn test_decode_datetime2() {
        let info = TypeInfo {
            scale: Some(7),
            ..TypeInfo::default()
        };
        let value = decode_value(
            &column(TypeId::DateTime2, info),
            Some(&Bytes::from_static(&[0x80, 0x96, 0x98, 0, 0, 1, 0, 0])),
        )
        .unwrap();
        let expected = chrono::NaiveDate::from_ymd_opt(1, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 1)
            .unwrap();
        assert_eq!(value, SqlValue::DateTime(expected));
    }

    #[cfg(feature = "chrono")]
    #[test]
    fn test_decode_legacy_datetime() {
        // 1900-01-02 00:00:01
        let value = decode(TypeId::DateTime, &[1, 0, 0, 0, 44, 1, 0, 0]);
        let expected = chrono::NaiveDate::from_ymd_opt(1900, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 1)
            .unwrap();
        assert_eq!(value, SqlValue::DateTime(expected));
    }

    #[cfg(feature = "uuid")]
    #[test]
    fn test_decode_guid() {
        let value = decode(
            TypeId::Guid,
            &[
                0x78, 0x56, 0x34, 0x12, 0x34, 0x12, 0x78, 0x56, 0x12, 0x34, 0x56, 0x78, 0x12,
                0x34, 0x56, 0x78,
            ],
        );
        let expected = uuid::Uuid::parse_str("12345678-1234-5678-1234-567812345678").unwrap();
        assert_eq!(value, SqlValue::Uuid(expected));
    }
}
