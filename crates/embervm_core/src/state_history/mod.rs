mod log;
pub use log::{STATE_HISTORY_LOG_MAGIC, StateHistoryError, StateHistoryLog};
