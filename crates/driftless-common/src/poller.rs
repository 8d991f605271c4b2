//! Readiness poller shared by every step that waits for an external system.
//!
//! The check runs once immediately, then on every tick of a fixed interval,
//! until it succeeds, the timeout elapses, or the context is cancelled. A check
//! that is already running is never interrupted; cancellation and the deadline
//! are observed between checks. Checks must be bounded (one API call).

use std::{future::Future, time::Duration};

use tokio::time::{Instant, MissedTickBehavior};
use tracing::trace;

use crate::{
    context::OpContext,
    error::{DriftError, DriftResult},
};

const MIN_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitSpec {
    pub interval: Duration,
    pub timeout: Duration,
}

impl WaitSpec {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub const fn secs(interval: u64, timeout: u64) -> Self {
        Self::new(Duration::from_secs(interval), Duration::from_secs(timeout))
    }
}

/// Waits until `check` returns true.
pub async fn poll_until<F, Fut>(
    ctx: &OpContext,
    what: &str,
    spec: WaitSpec,
    mut check: F,
) -> DriftResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    poll_for(ctx, what, spec, || {
        let fut = check();
        async move { fut.await.then_some(()) }
    })
    .await
}

/// Waits until `check` produces a value and returns it.
pub async fn poll_for<T, F, Fut>(
    ctx: &OpContext,
    what: &str,
    spec: WaitSpec,
    mut check: F,
) -> DriftResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let started = Instant::now();
    if ctx.is_cancelled() {
        return Err(cancelled(what, started, spec));
    }
    if let Some(value) = check().await {
        return Ok(value);
    }

    let interval = spec.interval.max(MIN_INTERVAL);
    let deadline = tokio::time::sleep_until(started + spec.timeout);
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval_at(started + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancellation().cancelled() => return Err(cancelled(what, started, spec)),
            _ = &mut deadline => {
                return Err(DriftError::Timeout {
                    what: what.to_string(),
                    elapsed: started.elapsed(),
                    timeout: spec.timeout,
                });
            }
            _ = ticker.tick() => {
                if let Some(value) = check().await {
                    return Ok(value);
                }
                trace!(what, elapsed = ?started.elapsed(), "condition not met yet");
            }
        }
    }
}

fn cancelled(what: &str, started: Instant, spec: WaitSpec) -> DriftError {
    DriftError::Cancelled {
        what: what.to_string(),
        elapsed: started.elapsed(),
        timeout: spec.timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[tokio::test(start_paused = true)]
    async fn succeeds_without_waiting_when_already_ready() {
        let ctx = OpContext::default();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let started = Instant::now();

        poll_until(&ctx, "ready", WaitSpec::secs(30, 300), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            true
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn returns_the_value_once_available() {
        let ctx = OpContext::default();
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        let endpoint = poll_for(&ctx, "endpoint", WaitSpec::secs(5, 60), move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            (n >= 3).then(|| "203.0.113.42".to_string())
        })
        .await
        .unwrap();

        assert_eq!(endpoint, "203.0.113.42");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_condition_never_holds() {
        let ctx = OpContext::default();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let started = Instant::now();

        let err = poll_until(&ctx, "never", WaitSpec::secs(1, 10), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            false
        })
        .await
        .unwrap_err();

        match err {
            DriftError::Timeout {
                what,
                elapsed,
                timeout,
            } => {
                assert_eq!(what, "never");
                assert_eq!(timeout, Duration::from_secs(10));
                assert!(elapsed >= Duration::from_secs(10));
                assert!(elapsed < Duration::from_secs(11));
            }
            other => panic!("expected timeout, got {other}"),
        }
        assert!(started.elapsed() >= Duration::from_secs(10));
        let calls = calls.load(Ordering::SeqCst);
        assert!((10..=11).contains(&calls), "unexpected call count {calls}");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_is_distinct_from_timeout() {
        let ctx = OpContext::default();
        let token = ctx.cancellation().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            token.cancel();
        });

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let err = poll_until(&ctx, "nodes", WaitSpec::secs(1, 300), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                false
            }
        })
        .await
        .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!err.is_timeout());
        let seen = calls.load(Ordering::SeqCst);

        // no further checks after the poller returned
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_never_checks() {
        let ctx = OpContext::default();
        ctx.cancellation().cancel();
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        let err = poll_until(&ctx, "deployments", WaitSpec::secs(1, 300), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            true
        })
        .await
        .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
