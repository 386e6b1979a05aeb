//! Executor: orchestration of a replay run.
//!
//! [`ReplayExecutor::exec`] owns the whole life of a run:
//!
//! 1. Validate the [`ReplayConfig`] and refuse an empty dataset.
//! 2. Open one connection per client and spawn a worker for it, spreading
//!    the launches over `start_stagger`. A connection that cannot be opened
//!    aborts the run before it starts: workers already launched are stopped and
//!    joined, and the error is returned.
//! 3. Once every worker is running, switch the pacing counters from warm-up to
//!    measured. Transactions drawn during the stagger stay in the warm-up
//!    counters and count neither towards the averages nor the budget.
//! 4. Spawn the rate controller and the wait event collector.
//! 5. Wait for the first stop source: the interrupt future, the duration
//!    timer, the transaction budget or a fatal error in a worker or in the
//!    collector. They all go through the same [`StopSignal`], so the first
//!    one is the reason reported.
//! 6. Join every worker, then the controller and the collector, and build the
//!    [`RunReport`].
//!
//! Nothing here exits the process or installs signal handlers; the caller
//! passes whatever "please stop" future it has (`tokio::signal::ctrl_c` in the
//! command-line tool).
use std::{future::Future, sync::Arc};

use futures::future::join_all;
use tokio::{task::JoinHandle, time::Instant};
use typed_builder::TypedBuilder;

use crate::{
    config::ReplayConfig,
    connection::Connector,
    controller::{ControllerSettings, RateController, RunSummary, rate_controller_task},
    dataset::Dataset,
    error::ReplayError,
    pacing::PacingState,
    report::RunReport,
    signal::{StopReason, StopSignal},
    wait_events::{WaitEventSource, collect_wait_events},
    worker::{WorkerContext, spawn_worker},
};

type WorkerHandle = JoinHandle<Result<(), ReplayError>>;

/// Replays a dataset through connections obtained from `connector`.
///
/// ```rust,no_run
/// # #[cfg(feature = "postgres")]
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// use std::sync::Arc;
/// use paceline::{ReplayConfig, ReplayExecutor, parse_file, postgres::{PgConnector, PgWaitEvents}};
///
/// let dsn = "user=postgres dbname=postgres";
/// let dataset = Arc::new(parse_file("transactions.log")?);
/// let executor = ReplayExecutor::builder()
///     .config(ReplayConfig::builder().clients(10).target_tps(200.0).build())
///     .connector(PgConnector::new(dsn))
///     .build();
///
/// let wait_events = PgWaitEvents::connect(dsn).await?;
/// let report = executor
///     .exec(dataset, wait_events, async {
///         let _ = tokio::signal::ctrl_c().await;
///     })
///     .await?;
/// println!("{:.0} tps", report.summary.average_tps);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, TypedBuilder)]
pub struct ReplayExecutor<C> {
    #[builder(default)]
    pub config: ReplayConfig,
    pub connector: C,
}

impl<C: Connector> ReplayExecutor<C> {
    /// Runs until a stop source fires and returns the run's report.
    ///
    /// `interrupt` resolving stops the run with [`StopReason::Interrupted`];
    /// pass `std::future::pending()` to rely on the duration or the
    /// transaction budget alone.
    pub async fn exec<W, I>(
        &self,
        dataset: Arc<Dataset>,
        wait_events: W,
        interrupt: I,
    ) -> Result<RunReport, ReplayError>
    where
        W: WaitEventSource,
        I: Future<Output = ()>,
    {
        let config = &self.config;
        config.validate()?;
        if dataset.is_empty() {
            return Err(ReplayError::EmptyDataset);
        }

        let pacing = Arc::new(PacingState::new(config.transaction_delay));
        let stop = StopSignal::new();
        let ctx = WorkerContext {
            dataset,
            pacing: Arc::clone(&pacing),
            think_time: config.think_time.clone(),
            dataset_fraction: config.dataset_fraction,
            transaction_limit: config.transaction_limit,
            stop: stop.clone(),
        };
        tokio::pin!(interrupt);

        tracing::info!("Spawning {} workers...", config.clients);
        let mut handles = Vec::with_capacity(config.clients);
        let launched = tokio::select! {
            res = self.launch(&ctx, &mut handles) => res,
            _ = &mut interrupt => {
                fire(&stop, StopReason::Interrupted);
                Ok(())
            }
        };
        if let Err(e) = launched {
            fire(&stop, StopReason::WorkerFailed);
            for joined in join_all(handles).await {
                if let Ok(Err(other)) = joined {
                    tracing::debug!("worker stopped during aborted launch: {other}");
                }
            }
            return Err(e);
        }

        pacing.start_measuring();
        let started = Instant::now();
        tracing::info!(
            warmup_transactions = pacing.warmup_transactions(),
            "All workers launched"
        );

        let controller = tokio::spawn(rate_controller_task(
            RateController::new(config.target_tps, config.slow_start_factor),
            Arc::clone(&pacing),
            ControllerSettings {
                report_interval: config.report_interval,
                duration: config.duration,
                clients: config.clients,
            },
            started,
            stop.clone(),
        ));
        let collector = tokio::spawn(collect_wait_events(
            wait_events,
            config.wait_event_interval,
            stop.clone(),
        ));

        let deadline = async {
            match config.duration {
                Some(duration) => tokio::time::sleep_until(started + duration).await,
                None => std::future::pending().await,
            }
        };
        let mut watcher = stop.clone();
        let reason = tokio::select! {
            reason = watcher.triggered() => reason,
            _ = &mut interrupt => fire(&stop, StopReason::Interrupted),
            _ = deadline => fire(&stop, StopReason::DurationElapsed),
        };
        tracing::info!("Stop clients: {reason}");

        let mut failure = None;
        for joined in join_all(handles).await {
            if let Err(e) = joined? {
                failure.get_or_insert(e);
            }
        }
        // Workers may finish a transaction after the controller saw the stop;
        // totals are taken again once they are all joined.
        let elapsed = controller.await?.elapsed;
        let summary = RunSummary::capture(&pacing, elapsed);
        let wait_events = collector.await?.map_err(ReplayError::WaitEvents);

        if let Some(e) = failure {
            return Err(e);
        }
        Ok(RunReport {
            clients: config.clients,
            stop_reason: reason,
            summary,
            wait_events: wait_events?,
        })
    }

    async fn launch(
        &self,
        ctx: &WorkerContext,
        handles: &mut Vec<WorkerHandle>,
    ) -> Result<(), ReplayError> {
        let gap = self.config.launch_gap();
        for id in 0..self.config.clients {
            if id > 0 && !gap.is_zero() {
                tokio::time::sleep(gap).await;
            }
            if ctx.stop.is_triggered() {
                break;
            }
            let connection = self
                .connector
                .connect()
                .await
                .map_err(|source| ReplayError::Connection { worker: id, source })?;
            let seed = self.config.seed.map(|seed| seed.wrapping_add(id as u64));
            handles.push(spawn_worker(id, connection, ctx.clone(), seed));
        }
        Ok(())
    }
}

/// Triggers `stop` and returns the reason that actually won.
fn fire(stop: &StopSignal, reason: StopReason) -> StopReason {
    stop.trigger(reason);
    stop.reason().unwrap_or(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        connection::Connection,
        error::{ConfigError, ConnectionError, ExecuteError},
        parser::parse_reader,
        wait_events::WaitEventSnapshot,
    };

    struct NeverConnects;

    struct Unused;

    impl Connection for Unused {
        async fn execute(&mut self, _: &str) -> Result<u64, ExecuteError> {
            unreachable!("no connection is ever opened")
        }

        async fn close(self) -> Result<(), ConnectionError> {
            Ok(())
        }
    }

    impl Connector for NeverConnects {
        type Connection = Unused;

        async fn connect(&self) -> Result<Unused, ConnectionError> {
            Err(ConnectionError::new("connection refused"))
        }
    }

    struct NoWaitEvents;

    impl WaitEventSource for NoWaitEvents {
        async fn snapshot(&mut self) -> Result<WaitEventSnapshot, ConnectionError> {
            Ok(WaitEventSnapshot::new())
        }

        async fn close(self) -> Result<(), ConnectionError> {
            Ok(())
        }
    }

    fn dataset(log: &str) -> Arc<Dataset> {
        Arc::new(parse_reader(log.as_bytes()).unwrap())
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_connecting() {
        let executor = ReplayExecutor::builder()
            .config(ReplayConfig::builder().clients(0).build())
            .connector(NeverConnects)
            .build();

        let result = executor
            .exec(dataset("SELECT 1;\n"), NoWaitEvents, std::future::pending())
            .await;
        assert!(matches!(
            result,
            Err(ReplayError::Config(ConfigError::NoClients))
        ));
    }

    #[tokio::test]
    async fn empty_dataset_is_rejected() {
        let executor = ReplayExecutor::builder().connector(NeverConnects).build();

        let result = executor
            .exec(dataset("\n\n"), NoWaitEvents, std::future::pending())
            .await;
        assert!(matches!(result, Err(ReplayError::EmptyDataset)));
    }

    #[tokio::test]
    async fn connect_failure_aborts_the_launch() {
        let executor = ReplayExecutor::builder()
            .config(ReplayConfig::builder().clients(3).build())
            .connector(NeverConnects)
            .build();

        let result = executor
            .exec(dataset("SELECT 1;\n"), NoWaitEvents, std::future::pending())
            .await;
        assert!(matches!(
            result,
            Err(ReplayError::Connection { worker: 0, .. })
        ));
    }

    #[test]
    fn fire_reports_the_first_reason() {
        let stop = StopSignal::new();
        assert_eq!(
            fire(&stop, StopReason::TransactionLimit),
            StopReason::TransactionLimit
        );
        assert_eq!(
            fire(&stop, StopReason::Interrupted),
            StopReason::TransactionLimit
        );
    }
}
