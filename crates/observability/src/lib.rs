//! Tracing and logging setup shared by every binary and test harness.

/// Initialize process-wide tracing with the format chosen by
/// `LPNFLOW_LOG_FORMAT` (JSON unless set to `pretty`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init_with(LogFormat::from_env());
}

/// Tracing configuration (filters, formats).
pub mod tracing;

pub use self::tracing::{InitError, LogFormat, init_for_tests, init_with, try_init_with};
