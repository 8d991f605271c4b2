//! The operation context threaded through every engine call.
//!
//! It carries the cancellation signal and the status sink. The sink is a pure
//! side channel: nothing in the engine reads back from it, and a [`NullSink`]
//! produces the same behavior as any other sink.

use std::{collections::BTreeMap, fmt, future::Future, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{DriftError, DriftResult},
    resource::ResourceKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Started,
    Finished,
    Info,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    pub severity: Severity,
    pub kind: ResourceKind,
    pub action: String,
    pub phase: Phase,
    pub metadata: BTreeMap<String, String>,
}

pub trait StatusSink: Send + Sync {
    fn emit(&self, event: &StatusEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl StatusSink for NullSink {
    fn emit(&self, _event: &StatusEvent) {}
}

/// Forwards status events to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn emit(&self, event: &StatusEvent) {
        let phase = match event.phase {
            Phase::Started => "started",
            Phase::Finished => "finished",
            Phase::Info => "info",
        };
        let meta = format!("{:?}", event.metadata);
        match event.severity {
            Severity::Debug => debug!(kind = %event.kind, action = %event.action, phase, meta = %meta),
            Severity::Info => info!(kind = %event.kind, action = %event.action, phase, meta = %meta),
            Severity::Warning => warn!(kind = %event.kind, action = %event.action, phase, meta = %meta),
            Severity::Error => error!(kind = %event.kind, action = %event.action, phase, meta = %meta),
        }
    }
}

#[derive(Clone)]
pub struct OpContext {
    cancel: CancellationToken,
    sink: Arc<dyn StatusSink>,
}

impl fmt::Debug for OpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Default for OpContext {
    fn default() -> Self {
        Self::new(CancellationToken::new(), Arc::new(NullSink))
    }
}

impl OpContext {
    pub fn new(cancel: CancellationToken, sink: Arc<dyn StatusSink>) -> Self {
        Self { cancel, sink }
    }

    pub fn with_sink(sink: Arc<dyn StatusSink>) -> Self {
        Self::new(CancellationToken::new(), sink)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn emit<I, K, V>(
        &self,
        severity: Severity,
        kind: ResourceKind,
        action: &str,
        phase: Phase,
        metadata: I,
    ) where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.sink.emit(&StatusEvent {
            severity,
            kind,
            action: action.to_string(),
            phase,
            metadata: metadata
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        });
    }

    pub fn info(&self, kind: ResourceKind, action: &str, identity: &str) {
        self.emit(
            Severity::Info,
            kind,
            action,
            Phase::Info,
            [("identity", identity)],
        );
    }

    pub fn warning(&self, kind: ResourceKind, action: &str, message: &str) {
        self.emit(
            Severity::Warning,
            kind,
            action,
            Phase::Info,
            [("message", message)],
        );
    }

    /// Runs `fut` between a started and a finished event. Once the context is
    /// cancelled no new step starts.
    pub async fn track<T, F>(
        &self,
        kind: ResourceKind,
        action: &str,
        identity: &str,
        fut: F,
    ) -> DriftResult<T>
    where
        F: Future<Output = DriftResult<T>>,
    {
        if self.is_cancelled() {
            return Err(DriftError::Cancelled {
                what: format!("{action} {kind} {identity}"),
                elapsed: Duration::ZERO,
                timeout: Duration::ZERO,
            });
        }
        self.emit(
            Severity::Info,
            kind,
            action,
            Phase::Started,
            [("identity", identity)],
        );
        let result = fut.await;
        match &result {
            Ok(_) => self.emit(
                Severity::Info,
                kind,
                action,
                Phase::Finished,
                [("identity", identity.to_string())],
            ),
            Err(e) => self.emit(
                Severity::Error,
                kind,
                action,
                Phase::Finished,
                [
                    ("identity", identity.to_string()),
                    ("error", e.to_string()),
                ],
            ),
        }
        result
    }

    /// Sleeps for `duration` unless cancelled first.
    pub async fn sleep(&self, what: &str, duration: Duration) -> DriftResult<()> {
        let started = tokio::time::Instant::now();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DriftError::Cancelled {
                what: what.to_string(),
                elapsed: started.elapsed(),
                timeout: duration,
            }),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<StatusEvent>>,
    }

    impl StatusSink for RecordingSink {
        fn emit(&self, event: &StatusEvent) {
            self.events.lock().push(event.clone());
        }
    }

    #[tokio::test]
    async fn track_emits_start_and_finish() {
        let sink = Arc::new(RecordingSink::default());
        let ctx = OpContext::with_sink(sink.clone());

        let value = ctx
            .track(ResourceKind::Vpc, "create", "demo", async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);

        let events = sink.events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].phase, Phase::Started);
        assert_eq!(events[1].phase, Phase::Finished);
        assert_eq!(events[1].severity, Severity::Info);
    }

    #[tokio::test]
    async fn track_marks_failures_as_errors() {
        let sink = Arc::new(RecordingSink::default());
        let ctx = OpContext::with_sink(sink.clone());

        let res: DriftResult<()> = ctx
            .track(ResourceKind::Vpc, "delete", "vpc-1", async {
                Err(DriftError::validation("x", "nope"))
            })
            .await;
        assert!(res.is_err());

        let events = sink.events.lock();
        assert_eq!(events[1].severity, Severity::Error);
        assert!(events[1].metadata.get("error").unwrap().contains("nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_returns_cancelled_when_token_fires() {
        let ctx = OpContext::default();
        ctx.cancellation().cancel();
        let err = ctx
            .sleep("sweep interval", Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_context_starts_no_step() {
        let sink = Arc::new(RecordingSink::default());
        let ctx = OpContext::with_sink(sink.clone());
        ctx.cancellation().cancel();

        let res: DriftResult<()> = ctx
            .track(ResourceKind::Vpc, "create", "demo", async {
                panic!("step must not run")
            })
            .await;
        assert!(res.unwrap_err().is_cancelled());
        assert!(sink.events.lock().is_empty());
    }
}
