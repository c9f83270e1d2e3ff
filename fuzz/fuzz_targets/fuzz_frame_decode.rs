#![no_main]

use libfuzzer_sys::fuzz_target;
use trivia_sync_client::frame::{self, Packet};
use trivia_sync_client::protocol::ServerEvent;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Whole WebSocket frames, as the transport sees them.
    if let Ok(Packet::Event { data, .. }) = frame::decode(text) {
        let _ = ServerEvent::from_frame(&data);
    }

    // Bare event arrays, as the session loop sees them.
    let _ = ServerEvent::from_frame(text);
});
