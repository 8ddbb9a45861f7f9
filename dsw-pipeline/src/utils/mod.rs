//! Utility modules for dsw-pipeline

pub mod db_retry;
pub mod retry;

pub use db_retry::retry_on_lock;
pub use retry::{retry_rate_limited, RATE_LIMIT_BACKOFF};
