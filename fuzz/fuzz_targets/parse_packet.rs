#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tds_framing::{MessageAssembler, TdsCodec};
use tds_wire::PacketHeader;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    let mut cursor = data;
    let _ = PacketHeader::decode(&mut cursor);

    // Framing over an arbitrary byte stream
    let mut codec = TdsCodec::new();
    let mut assembler = MessageAssembler::new();
    let mut stream = BytesMut::from(data);
    while let Ok(Some(packet)) = codec.decode(&mut stream) {
        if assembler.push(packet).is_err() {
            break;
        }
    }
});
