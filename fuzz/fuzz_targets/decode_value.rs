#![no_main]

use arbitrary::Arbitrary;
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use tds_wire::{ColumnData, ColumnFlags, TypeId, TypeInfo};

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    type_id: u8,
    max_length: Option<u32>,
    scale: Option<u8>,
    precision: Option<u8>,
    data: Option<Vec<u8>>,
}

fuzz_target!(|input: FuzzInput| {
    let Some(type_id) = TypeId::from_u8(input.type_id) else {
        return;
    };
    let column = ColumnData {
        name: String::new(),
        type_id,
        flags: ColumnFlags::NULLABLE,
        user_type: 0,
        type_info: TypeInfo {
            max_length: input.max_length,
            precision: input.precision,
            scale: input.scale,
            collation: None,
        },
    };
    let raw = input.data.map(Bytes::from);
    let _ = tds_types::decode_value(&column, raw.as_ref());
});
