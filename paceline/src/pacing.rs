use std::{
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};

/// Which set of counters a transaction is accounted to.
///
/// A worker reads the window once, when it draws a transaction, and books every
/// statement of that transaction and the transaction itself into it. A
/// transaction that straddles the end of the warm-up therefore stays whole in
/// the warm-up counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    WarmUp,
    Measured,
}

/// Shared pacing knobs and progress counters of a replay run.
///
/// One instance is created per run and handed to every worker and to the rate
/// controller behind an `Arc`. The delay has a single writer (the controller)
/// and the counters only ever grow, so relaxed atomics are enough: readers
/// only need a recent value, not a consistent snapshot.
///
/// Work done while the pool is still being launched goes to separate warm-up
/// counters; [`start_measuring`](Self::start_measuring) switches new
/// transactions over to the measured ones, which start at zero.
#[derive(Debug, Default)]
pub struct PacingState {
    delay_us: AtomicU64,
    measuring: AtomicBool,
    statements: AtomicU64,
    transactions: AtomicU64,
    warmup_statements: AtomicU64,
    warmup_transactions: AtomicU64,
}

impl PacingState {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay_us: AtomicU64::new(as_micros(delay)),
            ..Self::default()
        }
    }

    /// Current inter-transaction delay in microseconds.
    pub fn delay_us(&self) -> u64 {
        self.delay_us.load(Ordering::Relaxed)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_micros(self.delay_us())
    }

    pub fn set_delay_us(&self, delay_us: u64) {
        self.delay_us.store(delay_us, Ordering::Relaxed);
    }

    /// Ends the warm-up. Transactions drawn from now on are measured.
    pub fn start_measuring(&self) {
        self.measuring.store(true, Ordering::Release);
    }

    pub fn window(&self) -> Window {
        if self.measuring.load(Ordering::Acquire) {
            Window::Measured
        } else {
            Window::WarmUp
        }
    }

    /// Measured statements.
    pub fn statements(&self) -> u64 {
        self.statements.load(Ordering::Relaxed)
    }

    /// Measured transactions.
    pub fn transactions(&self) -> u64 {
        self.transactions.load(Ordering::Relaxed)
    }

    pub fn warmup_statements(&self) -> u64 {
        self.warmup_statements.load(Ordering::Relaxed)
    }

    pub fn warmup_transactions(&self) -> u64 {
        self.warmup_transactions.load(Ordering::Relaxed)
    }

    /// Counts one executed statement and returns the new total of its window.
    pub fn record_statement(&self, window: Window) -> u64 {
        let counter = match window {
            Window::WarmUp => &self.warmup_statements,
            Window::Measured => &self.statements,
        };
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Counts one completed transaction and returns the new total of its window.
    pub fn record_transaction(&self, window: Window) -> u64 {
        let counter = match window {
            Window::WarmUp => &self.warmup_transactions,
            Window::Measured => &self.transactions,
        };
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

fn as_micros(delay: Duration) -> u64 {
    u64::try_from(delay.as_micros()).unwrap_or(u64::MAX)
}
