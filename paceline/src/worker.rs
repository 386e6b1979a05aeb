//! Replay workers.
//!
//! A worker owns one connection for its whole life and loops: draw a
//! transaction, send its statements in order, pause, count, repeat. It checks
//! the stop signal after every statement so shutdown never waits for the rest
//! of a long transaction.
use std::{sync::Arc, time::Duration};

use rand::{SeedableRng, rngs::StdRng};
use tokio::task::JoinHandle;

use crate::{
    connection::Connection,
    dataset::Dataset,
    error::{ExecuteError, ReplayError},
    pacing::{PacingState, Window},
    signal::{StopReason, StopSignal},
    think::ThinkTime,
};

/// State shared by every worker of a run.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub dataset: Arc<Dataset>,
    pub pacing: Arc<PacingState>,
    pub think_time: ThinkTime,
    pub dataset_fraction: f64,
    pub transaction_limit: Option<u64>,
    pub stop: StopSignal,
}

/// Spawns worker `id` on the current runtime.
///
/// The connection is closed on every way out of the loop, including a fatal
/// connection error. Should the task panic, dropping the connection releases it.
pub fn spawn_worker<C: Connection>(
    id: usize,
    connection: C,
    ctx: WorkerContext,
    seed: Option<u64>,
) -> JoinHandle<Result<(), ReplayError>> {
    tokio::spawn(async move {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut connection = connection;
        tracing::debug!("Worker {id} started.");

        let outcome = replay_loop(id, &mut connection, &ctx, rng).await;
        if let Err(e) = connection.close().await {
            tracing::warn!("Worker {id} failed to close its connection: {e}");
        }

        tracing::debug!("Worker {id} shutting down.");
        outcome
    })
}

async fn replay_loop<C: Connection>(
    id: usize,
    connection: &mut C,
    ctx: &WorkerContext,
    mut rng: StdRng,
) -> Result<(), ReplayError> {
    let mut stop = ctx.stop.clone();
    loop {
        if stop.is_triggered() {
            return Ok(());
        }

        let window = ctx.pacing.window();
        let xact_id = ctx.dataset.sample(&mut rng, ctx.dataset_fraction);
        let mut paused = false;

        for statement in ctx.dataset[xact_id].replay() {
            match connection.execute(statement).await {
                Ok(_) => {}
                // Replay measures load, not correctness: rejected statements are
                // counted like any other.
                Err(ExecuteError::Statement(e)) => {
                    tracing::debug!(worker = id, xact = xact_id, "statement failed: {e}");
                }
                Err(ExecuteError::Connection(source)) => {
                    tracing::error!(worker = id, "{source}");
                    ctx.stop.trigger(StopReason::WorkerFailed);
                    return Err(ReplayError::Connection { worker: id, source });
                }
            }
            ctx.pacing.record_statement(window);

            if ctx.think_time.is_enabled() {
                paused |= pause(ctx.think_time.sample(&mut rng), &mut stop).await;
            }
            if stop.is_triggered() {
                return Ok(());
            }
        }

        paused |= pause(ctx.pacing.delay(), &mut stop).await;
        let done = ctx.pacing.record_transaction(window);
        // Only measured work counts towards the budget.
        if window == Window::Measured
            && ctx.transaction_limit.is_some_and(|limit| done >= limit)
            && ctx.stop.trigger(StopReason::TransactionLimit)
        {
            tracing::info!("Transaction limit reached, stop clients");
        }

        if !paused {
            tokio::task::yield_now().await;
        }
    }
}

/// Sleeps for `duration` unless the stop signal fires first.
/// Returns whether the task actually suspended.
async fn pause(duration: Duration, stop: &mut StopSignal) -> bool {
    if duration.is_zero() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = stop.triggered() => {}
    }
    true
}
