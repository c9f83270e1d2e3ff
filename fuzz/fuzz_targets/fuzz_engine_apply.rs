#![no_main]

use libfuzzer_sys::fuzz_target;
use tokio::time::Instant;
use trivia_sync_client::protocol::ServerEvent;
use trivia_sync_client::SyncEngine;

// Newline-separated event arrays applied in order. Whatever the sequence,
// rules must not panic and accessors must stay consistent.
fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let mut engine = SyncEngine::default();
    let now = Instant::now();
    for line in text.lines() {
        if let Ok(event) = ServerEvent::from_frame(line) {
            let before = engine.snapshot().revision;
            let applied = engine.apply(&event, now).is_applied();
            assert_eq!(applied, engine.snapshot().revision != before);
        }
        let snapshot = engine.snapshot();
        let _ = snapshot.phase();
        let _ = snapshot.me();
        let _ = snapshot.players_remaining();
        if snapshot.answer_locked() {
            assert!(snapshot.helps_locked());
        }
    }
});
