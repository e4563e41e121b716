#![no_main]

use libfuzzer_sys::fuzz_target;
use telescope_control::protocol::message::decode_text;
use telescope_control::Packet;

fuzz_target!(|data: &[u8]| {
    // Frame and text decoding must reject garbage without panicking
    if let Ok(packet) = Packet::decode(data) {
        let _ = packet.checksum_matches();
        let _ = decode_text(&packet.payload);
    }
});
