#![no_main]

use arbitrary::Arbitrary;
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use tds_wire::{PacketHeader, PacketStatus, PacketType, ProtocolState, ResponseDispatcher};

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    logging_in: bool,
    payload: Vec<u8>,
}

fuzz_target!(|input: FuzzInput| {
    let state = if input.logging_in {
        ProtocolState::LoggingIn
    } else {
        ProtocolState::Ready
    };
    let header = PacketHeader::new(PacketType::TabularResult, PacketStatus::END_OF_MESSAGE, 0);
    let _ = ResponseDispatcher::new().dispatch(state, &header, Bytes::from(input.payload));
});
