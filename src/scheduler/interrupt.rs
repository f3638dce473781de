//! Interrupt classification and external (caller-driven) cancellation
//! (spec §4.5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::time::timeout;

/// Why a run paused instead of running to completion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PauseReason {
    /// `with_interrupt_before` fired for this node.
    StaticBefore,
    /// `with_interrupt_after` fired for this node.
    StaticAfter,
    /// A node body raised [`crate::node::InterruptError`].
    Dynamic,
    /// A caller requested the pause out-of-band via [`RunCancellation`], or
    /// an optional deadline elapsed.
    External,
}

/// Distinguishes the three interrupt trigger mechanisms named by the spec
/// for diagnostics and event tagging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterruptKind {
    StaticBefore,
    StaticAfter,
    Dynamic,
    External,
}

impl From<&PauseReason> for InterruptKind {
    fn from(reason: &PauseReason) -> Self {
        match reason {
            PauseReason::StaticBefore => InterruptKind::StaticBefore,
            PauseReason::StaticAfter => InterruptKind::StaticAfter,
            PauseReason::Dynamic => InterruptKind::Dynamic,
            PauseReason::External => InterruptKind::External,
        }
    }
}

/// A cooperative, caller-held handle that requests the scheduler pause at
/// the next superstep boundary, optionally bounded by a deadline.
///
/// Checked between supersteps rather than mid-dispatch: the scheduler
/// never aborts a task already running, it only declines to plan the next
/// step (spec §4.5 "External": "caller-driven pause with optional
/// timeout").
#[derive(Clone)]
pub struct RunCancellation {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
    deadline: Option<Duration>,
    requested_at: Arc<Mutex<Option<Instant>>>,
}

impl Default for RunCancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl RunCancellation {
    pub fn new() -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
            deadline: None,
            requested_at: Arc::new(Mutex::new(None)),
        }
    }

    #[must_use]
    pub fn with_timeout(deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::new()
        }
    }

    /// Marks the cancellation requested; the next superstep boundary check
    /// will pause the run. If this cancellation carries a deadline, a
    /// dispatch already in flight gets that long to finish gracefully
    /// before the scheduler force-cancels it (spec §4.8).
    pub fn request(&self) {
        let first_request = !self.requested.swap(true, Ordering::SeqCst);
        if first_request {
            *self.requested_at.lock().unwrap() = Some(Instant::now());
        }
        self.notify.notify_waiters();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Time left before an in-flight dispatch must be force-cancelled:
    /// `None` when no deadline is configured, or when no request has been
    /// made yet. Once the grace period has elapsed this returns
    /// `Some(Duration::ZERO)` rather than `None`, so the caller still
    /// forces a cancellation rather than waiting indefinitely.
    pub(crate) fn remaining_forced(&self) -> Option<Duration> {
        let deadline = self.deadline?;
        let requested_at = (*self.requested_at.lock().unwrap())?;
        Some(deadline.saturating_sub(requested_at.elapsed()))
    }

    /// Awaits either an explicit `request()` or the configured deadline,
    /// whichever comes first. Intended for a supervisor task that wants to
    /// request cancellation after a wall-clock budget without polling.
    pub async fn wait(&self) {
        match self.deadline {
            Some(deadline) => {
                let _ = timeout(deadline, self.notify.notified()).await;
                self.requested.store(true, Ordering::SeqCst);
            }
            None => self.notify.notified().await,
        }
    }

    /// Resolves once a configured deadline has actually elapsed following a
    /// request, for the scheduler to race against an in-flight dispatch.
    /// Never resolves when no deadline is configured, so a caller can
    /// always select it against dispatch progress without special-casing
    /// the no-timeout case. Polls rather than relying on a single
    /// `Notify` wakeup, since `request()` may already have fired before
    /// this future is ever polled.
    pub(crate) async fn wait_forced(&self) {
        if self.deadline.is_none() {
            std::future::pending::<()>().await;
            return;
        }
        loop {
            match self.remaining_forced() {
                Some(remaining) if remaining.is_zero() => return,
                Some(remaining) => tokio::time::sleep(remaining).await,
                None => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_marks_requested() {
        let cancellation = RunCancellation::new();
        assert!(!cancellation.is_requested());
        cancellation.request();
        assert!(cancellation.is_requested());
    }

    #[test]
    fn remaining_forced_is_none_without_a_deadline_or_before_any_request() {
        let cancellation = RunCancellation::new();
        assert_eq!(cancellation.remaining_forced(), None);
        cancellation.request();
        assert_eq!(cancellation.remaining_forced(), None);
    }

    #[test]
    fn remaining_forced_counts_down_from_the_first_request() {
        let cancellation = RunCancellation::with_timeout(Duration::from_secs(30));
        assert_eq!(cancellation.remaining_forced(), None, "no request yet");
        cancellation.request();
        let remaining = cancellation.remaining_forced().expect("deadline configured and requested");
        assert!(remaining <= Duration::from_secs(30) && remaining > Duration::from_secs(25));
    }
}
