use std::{
    collections::{BTreeMap, HashMap},
    future::Future,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;

use crate::{
    error::ConnectionError,
    signal::{StopReason, StopSignal},
};

/// Point-in-time distribution: wait event label → number of sessions waiting on it.
pub type WaitEventSnapshot = HashMap<String, u64>;

/// Anything that can tell how many sessions currently wait on what.
///
/// Labels are whatever the server reports; the set is open-ended and version
/// dependent, so they stay plain strings.
pub trait WaitEventSource: Send + 'static {
    fn snapshot(&mut self) -> impl Future<Output = Result<WaitEventSnapshot, ConnectionError>> + Send;

    fn close(self) -> impl Future<Output = Result<(), ConnectionError>> + Send;
}

/// Running sum of wait event snapshots.
///
/// This adds up samples, it does not weight them by time: an event seen in five
/// polls by two sessions counts ten, however long each wait really lasted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WaitEventTally {
    counts: BTreeMap<String, u64>,
}

impl WaitEventTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one snapshot into the tally.
    pub fn consume(&mut self, snapshot: WaitEventSnapshot) {
        for (label, count) in snapshot {
            *self.counts.entry(label).or_insert(0) += count;
        }
    }

    pub fn get(&self, label: &str) -> u64 {
        self.counts.get(label).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Labels in lexical order with their cumulative counts.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts.iter().map(|(label, count)| (label.as_str(), *count))
    }
}

/// Polls `source` every `interval` until `stop` fires, then closes it.
///
/// The first poll happens immediately. A failing source fires the stop signal
/// with [`StopReason::CollectorFailed`] and ends the run.
pub async fn collect_wait_events<W: WaitEventSource>(
    mut source: W,
    interval: Duration,
    mut stop: StopSignal,
) -> Result<WaitEventTally, ConnectionError> {
    let mut tally = WaitEventTally::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut polls = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = stop.triggered() => break,
            _ = ticker.tick() => {}
        }
        match source.snapshot().await {
            Ok(snapshot) => {
                tally.consume(snapshot);
                polls += 1;
            }
            Err(e) => {
                tracing::error!("wait event collection failed: {e}");
                stop.trigger(StopReason::CollectorFailed);
                return Err(e);
            }
        }
    }

    tracing::debug!(polls, "wait event collector stopped");
    if let Err(e) = source.close().await {
        tracing::warn!("closing wait event connection: {e}");
    }
    Ok(tally)
}
