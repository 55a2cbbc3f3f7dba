//! Heartbeat bridge
//!
//! Runs one slow unit of work on its own task while the caller consumes a
//! stream of frames: `Open`, then a `Heartbeat` per elapsed interval, then
//! exactly one terminal item (the work's value, or its error as `Err`).
//!
//! The worker is spawned when [`bridge`] is called, not when the stream is
//! first polled. Dropping the stream detaches the worker; it runs to
//! completion and its result is discarded.

use futures::Stream;
use std::any::Any;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// One non-terminal or successful terminal item of a bridged stream
#[derive(Debug, Clone, PartialEq)]
pub enum Frame<T> {
    /// Emitted before any waiting
    Open,
    /// Work still running
    Heartbeat,
    /// Work finished
    Result(T),
}

/// Terminal failure of a bridged stream
#[derive(Debug, Error)]
pub enum BridgeError<E> {
    /// The work returned an error
    #[error(transparent)]
    Work(E),

    /// The worker task panicked or was cancelled
    #[error("worker failed: {0}")]
    Worker(String),
}

/// Bridge an async unit of work.
///
/// Must be called from within a tokio runtime.
pub fn bridge<F, T, E>(
    work: F,
    interval: Duration,
) -> impl Stream<Item = Result<Frame<T>, BridgeError<E>>>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    frames(tokio::spawn(work), interval)
}

/// Bridge a synchronous, blocking unit of work (runs on the blocking pool)
pub fn bridge_blocking<F, T, E>(
    work: F,
    interval: Duration,
) -> impl Stream<Item = Result<Frame<T>, BridgeError<E>>>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    frames(tokio::task::spawn_blocking(work), interval)
}

fn frames<T, E>(
    mut handle: JoinHandle<Result<T, E>>,
    interval: Duration,
) -> impl Stream<Item = Result<Frame<T>, BridgeError<E>>>
where
    T: Send + 'static,
    E: Send + 'static,
{
    async_stream::stream! {
        yield Ok(Frame::Open);

        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                joined = &mut handle => {
                    match joined {
                        Ok(Ok(value)) => yield Ok(Frame::Result(value)),
                        Ok(Err(err)) => yield Err(BridgeError::Work(err)),
                        Err(join_err) => yield Err(BridgeError::Worker(describe_join_error(join_err))),
                    }
                    break;
                }

                _ = ticker.tick() => {
                    yield Ok(Frame::Heartbeat);
                }
            }
        }
    }
}

fn describe_join_error(err: JoinError) -> String {
    if err.is_cancelled() {
        return "worker task was cancelled".to_string();
    }
    match err.try_into_panic() {
        Ok(payload) => format!("worker panicked: {}", panic_message(payload.as_ref())),
        Err(err) => err.to_string(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
