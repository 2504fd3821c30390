//! Timeout enforcement.
//!
//! # Responsibilities
//! - Race a protected operation against its execution deadline
//! - Report which side settled first, exactly once
//!
//! # Design Decisions
//! - Uses Tokio's timer; the timer is dropped as soon as the operation settles
//! - The operation runs as its own task. On timeout the task is detached, not
//!   aborted: it keeps running in the background and its eventual result is
//!   discarded. Work that must stop on timeout has to enforce its own deadline.
//! - A panicking operation is reported, never propagated

use std::future::Future;
use std::time::Duration;

/// How a raced operation ended.
#[derive(Debug)]
pub enum RaceOutcome<T, E> {
    /// The operation settled before the deadline.
    Completed(Result<T, E>),
    /// The deadline fired first.
    TimedOut,
    /// The operation task died without producing a result.
    Aborted(String),
}

/// Run `operation` with a deadline of `limit`.
pub async fn race_with_timeout<F, T, E>(operation: F, limit: Duration) -> RaceOutcome<T, E>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let mut task = tokio::spawn(operation);

    tokio::select! {
        biased;
        joined = &mut task => match joined {
            Ok(result) => RaceOutcome::Completed(result),
            Err(e) if e.is_panic() => RaceOutcome::Aborted("operation panicked".to_string()),
            Err(_) => RaceOutcome::Aborted("operation cancelled".to_string()),
        },
        _ = tokio::time::sleep(limit) => {
            tracing::debug!(timeout_ms = limit.as_millis() as u64, "Operation deadline elapsed, detaching task");
            RaceOutcome::TimedOut
        }
    }
}
