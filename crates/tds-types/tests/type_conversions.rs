//! Parameter encoding and row decoding edge cases.
//!
//! Tests edge cases for:
//! - NULL handling
//! - Unicode boundary conditions
//! - PLP switch-over for large values
//! - Values flowing through a full RPC request and back out of a row

#![allow(clippy::unwrap_used)]

use bytes::{BufMut, Bytes, BytesMut};
use proptest::prelude::*;
use tds_types::{SqlTypeEncoder, SqlValue, TypeError, decode_value, execute_sql};
use tds_wire::token::{ColumnData, TypeInfo};
use tds_wire::types::{ColumnFlags, TypeId};
use tds_wire::{CodecError, RpcParam, TypeEncoder};

fn encode(value: &SqlValue) -> (u8, Bytes, Bytes) {
    let descriptor = SqlTypeEncoder.encode_data_type(value).unwrap();
    let data = SqlTypeEncoder.encode_data(&descriptor, value).unwrap();
    (descriptor.type_id, descriptor.info, data)
}

fn column(type_id: TypeId, max_length: Option<u32>) -> ColumnData {
    ColumnData {
        name: "c".into(),
        type_id,
        flags: ColumnFlags::NULLABLE,
        user_type: 0,
        type_info: TypeInfo {
            max_length,
            scale: Some(7),
            ..TypeInfo::default()
        },
    }
}

// ============================================================================
// NULL Handling Edge Cases
// ============================================================================

mod null_handling {
    use super::*;

    #[test]
    fn test_null_parameter_is_empty_intn() {
        let (type_id, info, data) = encode(&SqlValue::Null);
        assert_eq!(type_id, TypeId::IntN as u8);
        assert_eq!(&info[..], &[4]);
        assert_eq!(&data[..], &[0]);
    }

    #[test]
    fn test_option_none_is_null() {
        assert!(SqlValue::from(None::<i32>).is_null());
        assert_eq!(SqlValue::from(Some(5i32)), SqlValue::Int(5));
    }

    #[test]
    fn test_null_row_value() {
        let value = decode_value(&column(TypeId::IntN, Some(4)), None).unwrap();
        assert_eq!(value, SqlValue::Null);
    }
}

// ============================================================================
// Unicode Handling
// ============================================================================

mod unicode_handling {
    use super::*;

    #[test]
    fn test_empty_string() {
        let (_, _, data) = encode(&SqlValue::from(""));
        assert_eq!(&data[..], &[0, 0]);
    }

    #[test]
    fn test_supplementary_plane_counts_two_units() {
        let (_, _, data) = encode(&SqlValue::from("😀"));
        assert_eq!(u16::from_le_bytes([data[0], data[1]]), 4);
    }

    #[test]
    fn test_plp_threshold_in_code_units() {
        // 4000 units fit in NVARCHAR(4000), 4001 do not
        let (_, info, _) = encode(&SqlValue::String("é".repeat(4000)));
        assert_eq!(&info[..2], &8000u16.to_le_bytes());
        let (_, info, _) = encode(&SqlValue::String("é".repeat(4001)));
        assert_eq!(&info[..2], &[0xFF, 0xFF]);
    }

    proptest! {
        #[test]
        fn nvarchar_value_decodes_back(s in "\\PC{0,100}") {
            let (_, _, data) = encode(&SqlValue::String(s.clone()));
            let raw = data.slice(2..);
            let decoded = decode_value(&column(TypeId::NVarChar, Some(8000)), Some(&raw)).unwrap();
            prop_assert_eq!(decoded, SqlValue::String(s));
        }

        #[test]
        fn bigint_value_decodes_back(v in any::<i64>()) {
            let (_, _, data) = encode(&SqlValue::BigInt(v));
            let raw = data.slice(1..);
            let decoded = decode_value(&column(TypeId::IntN, Some(8)), Some(&raw)).unwrap();
            prop_assert_eq!(decoded, SqlValue::BigInt(v));
        }
    }
}

// ============================================================================
// Through an RPC request
// ============================================================================

mod rpc_integration {
    use super::*;

    #[test]
    fn test_execute_sql_payload() {
        let request = execute_sql(
            "SELECT @id",
            vec![RpcParam::new("@id", SqlValue::Int(7))],
        )
        .unwrap();
        let payload = request.encode(&SqlTypeEncoder).unwrap();

        // ALL_HEADERS, proc id 10, no options
        assert_eq!(&payload[22..28], &[0xFF, 0xFF, 0x0A, 0x00, 0x00, 0x00]);

        // final parameter: "@id", no flags, INTN(4), value 7
        let mut tail = BytesMut::new();
        tail.put_u8(3);
        for unit in "@id".encode_utf16() {
            tail.put_u16_le(unit);
        }
        tail.put_slice(&[0x00, 0x26, 4, 4, 7, 0, 0, 0]);
        assert!(payload.ends_with(&tail));
    }

    #[test]
    fn test_xml_parameter_surfaces_as_unsupported() {
        let request = tds_wire::RpcRequest::by_id(tds_wire::ProcId::ExecuteSql)
            .param(RpcParam::new("@x", SqlValue::Xml("<a/>".into())));
        let err = request.encode(&SqlTypeEncoder).unwrap_err();
        match err {
            CodecError::UnsupportedParameterType { name, reason } => {
                assert_eq!(name, "@x");
                assert_eq!(
                    reason,
                    TypeError::UnsupportedConversion {
                        from: "XML".into(),
                        to: "RPC parameter",
                    }
                    .to_string()
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

// ============================================================================
// Date and time
// ============================================================================

#[cfg(feature = "chrono")]
mod date_time {
    use super::*;

    #[test]
    fn test_date_before_year_one_is_rejected() {
        let date = chrono::NaiveDate::from_ymd_opt(0, 12, 31).unwrap();
        let value = SqlValue::Date(date);
        let descriptor = SqlTypeEncoder.encode_data_type(&value).unwrap();
        assert!(matches!(
            SqlTypeEncoder.encode_data(&descriptor, &value),
            Err(TypeError::OutOfRange { .. })
        ));
    }

    proptest! {
        #[test]
        fn date_value_decodes_back(days in 0i32..3_652_059) {
            let date = chrono::NaiveDate::from_num_days_from_ce_opt(days + 1).unwrap();
            let (_, _, data) = encode(&SqlValue::Date(date));
            let raw = data.slice(1..);
            let decoded = decode_value(&column(TypeId::Date, None), Some(&raw)).unwrap();
            prop_assert_eq!(decoded, SqlValue::Date(date));
        }
    }
}
