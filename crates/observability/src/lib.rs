//! Tracing and logging setup shared by the game binary and tools.

/// Initialize process-wide logging.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init(target: LogTarget) -> anyhow::Result<()> {
    tracing::init(target)
}

/// Tracing configuration (filters, writers).
pub mod tracing;

pub use crate::tracing::LogTarget;
