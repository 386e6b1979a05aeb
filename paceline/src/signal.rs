use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::sync::watch::{Receiver, Sender, channel};

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The interrupt future handed to the executor resolved (usually Ctrl+C).
    Interrupted,
    DurationElapsed,
    TransactionLimit,
    WorkerFailed,
    CollectorFailed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Interrupted => "interrupted",
            Self::DurationElapsed => "duration elapsed",
            Self::TransactionLimit => "transaction limit reached",
            Self::WorkerFailed => "worker connection failed",
            Self::CollectorFailed => "wait event collection failed",
        })
    }
}

/// Broadcast-once stop notification.
///
/// Every task holds its own clone and observes the signal without consuming it
/// for the others. The first [`trigger`](Self::trigger) wins; later calls are
/// ignored, so whichever stop source fires first is the one reported.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<Sender<Option<StopReason>>>,
    rx: Receiver<Option<StopReason>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, rx) = channel(None);
        Self { tx: Arc::new(tx), rx }
    }

    /// Fires the signal. Returns `true` only for the call that actually fired it.
    pub fn trigger(&self, reason: StopReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    /// Non-blocking check.
    pub fn is_triggered(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<StopReason> {
        *self.rx.borrow()
    }

    /// Resolves once the signal has fired (immediately if it already has).
    pub async fn triggered(&mut self) -> StopReason {
        loop {
            if let Some(reason) = *self.rx.borrow_and_update() {
                return reason;
            }
            // The sender lives as long as `self`, so this cannot fail.
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn first_trigger_wins() {
        let signal = StopSignal::new();
        assert!(!signal.is_triggered());

        assert!(signal.trigger(StopReason::DurationElapsed));
        assert!(!signal.trigger(StopReason::Interrupted));
        assert_eq!(signal.reason(), Some(StopReason::DurationElapsed));
    }

    #[test]
    fn clones_share_the_signal() {
        let a = StopSignal::new();
        let b = a.clone();
        b.trigger(StopReason::TransactionLimit);
        assert!(a.is_triggered());
        assert_eq!(a.reason(), Some(StopReason::TransactionLimit));
    }

    #[tokio::test]
    async fn every_waiter_is_woken() {
        let signal = StopSignal::new();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let mut s = signal.clone();
                tokio::spawn(async move { s.triggered().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(5)).await;
        signal.trigger(StopReason::Interrupted);

        for w in waiters {
            assert_eq!(w.await.unwrap(), StopReason::Interrupted);
        }
    }

    #[tokio::test]
    async fn late_waiter_returns_immediately() {
        let mut signal = StopSignal::new();
        signal.trigger(StopReason::WorkerFailed);
        assert_eq!(signal.triggered().await, StopReason::WorkerFailed);
    }
}
