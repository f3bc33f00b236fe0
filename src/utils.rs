use std::time::{Duration, Instant};

/// Format a `Duration` as a human-readable string with automatic unit scaling.
///
/// Produces output like `1.94ms`, `2.34s`, `150.00µs` using Rust's Debug format.
pub fn fmt_duration(d: Duration) -> String {
    format!("{d:.2?}")
}

/// Log a warning if a sync step for `username` took longer than `threshold`.
pub fn log_if_slow(start: Instant, threshold: Duration, step: &str, username: &str) {
    let elapsed = start.elapsed();
    if elapsed > threshold {
        tracing::warn!(
            username,
            step,
            duration = fmt_duration(elapsed),
            "slow sync step"
        );
    }
}
