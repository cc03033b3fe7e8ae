#![no_main]

use libfuzzer_sys::fuzz_target;
use tds_wire::PreLoginResponse;

fuzz_target!(|data: &[u8]| {
    // Server-controlled input
    let _ = PreLoginResponse::decode(data);
});
