//! Foundational low-level utilities shared across lore crates.
//!
//! Provides the atomic file-write helper used by file-backed stores, unix time helpers,
//! and the retry classification and fixed-delay policy used by every remote collaborator.

pub mod atomic_io;
pub mod retry;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use retry::{
    is_rate_limited_status, parse_retry_after_ms, should_retry_status, FixedDelayRetry,
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS,
};
pub use time_utils::{current_unix_timestamp_ms, elapsed_ms_since};
