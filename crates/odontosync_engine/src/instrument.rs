//! Logging and timing wrappers composed around engine operations.

use crate::error::SyncResult;
use std::time::{Duration, Instant};
use tracing::{debug, debug_span, warn};

/// Runs `f` inside a span named after `operation`, logging its outcome.
///
/// Successes are logged at debug with the elapsed time; failures at warn with
/// the error kind and message. The result is returned untouched.
pub fn with_logging<T, F>(operation: &'static str, f: F) -> SyncResult<T>
where
    F: FnOnce() -> SyncResult<T>,
{
    let span = debug_span!("op", operation);
    let _entered = span.enter();

    let (result, elapsed) = with_timing(f);
    match &result {
        Ok(_) => debug!(
            operation,
            elapsed_ms = elapsed.as_millis() as u64,
            "operation succeeded"
        ),
        Err(err) => warn!(
            operation,
            kind = %err.kind(),
            error = err.message(),
            elapsed_ms = elapsed.as_millis() as u64,
            "operation failed"
        ),
    }
    result
}

/// Runs `f` and returns its output along with how long it took.
pub fn with_timing<T, F>(f: F) -> (T, Duration)
where
    F: FnOnce() -> T,
{
    let start = Instant::now();
    let out = f();
    (out, start.elapsed())
}
