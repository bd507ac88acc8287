//! Utility modules.

pub mod file;
pub mod retry;
pub mod text;

pub use file::{calculate_checksum, read_text_document};
pub use retry::{RetryConfig, RetryResult, Retryable, with_retry};
pub use text::{MIN_VIABLE_CONTENT, char_len, truncate_at_word};
