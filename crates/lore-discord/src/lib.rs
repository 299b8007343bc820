//! Discord REST channel history as a [`lore_ingest::HistorySource`].

mod history;

pub use history::{
    compare_discord_message_ids, parse_discord_messages, DiscordHistoryConfig,
    DiscordHistorySource, DEFAULT_DISCORD_API_BASE, MAX_DISCORD_PAGE_SIZE,
};
