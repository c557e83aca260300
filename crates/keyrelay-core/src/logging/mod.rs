//! Debug logging

pub mod file_logger;

pub use file_logger::{
    clear_log, debug, error, info, is_enabled, log, log_file_path, set_enabled, set_min_level,
    trace, warn, LogLevel,
};
