#![no_main]

use libfuzzer_sys::fuzz_target;
use lore_discord::parse_discord_messages;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    if let Ok(items) = parse_discord_messages(&raw) {
        for pair in items.windows(2) {
            assert!(pair[0].created_at >= pair[1].created_at);
        }
        for item in &items {
            assert!(!item.id.trim().is_empty());
        }
    }
});
