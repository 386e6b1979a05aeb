use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, ensure};
use clap::{Parser, ValueEnum};
use paceline::{
    JsonReporter, ReplayConfig, ReplayExecutor, Reporter, StdoutReporter, ThinkTime, parse_file,
    postgres::{PgConnector, PgWaitEvents},
};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(name = "paceline")]
#[command(about = "Replay captured SQL transactions against PostgreSQL at a controlled rate", long_about = None)]
#[command(version)]
struct Cli {
    /// Number of concurrent clients, each with its own connection
    #[arg(long, default_value_t = 100)]
    clients: usize,

    /// Connection string (libpq key/value or URI)
    #[arg(long, env = "PACELINE_CONSTR", default_value = "user=postgres dbname=postgres")]
    constr: String,

    /// Fraction of the dataset clients draw transactions from
    #[arg(long, default_value_t = 1.0)]
    dataset_fraction: f64,

    /// Log at debug level
    #[arg(long)]
    debug: bool,

    /// Seconds over which client launches are spread
    #[arg(long, default_value_t = 0)]
    delay_start: u64,

    /// Initial delay between two transactions of a client, in milliseconds
    #[arg(long, default_value_t = 5.0)]
    delay_xact: f64,

    /// Test length in seconds, 0 to run until interrupted
    #[arg(long, default_value_t = 0)]
    duration: u64,

    /// Seconds between two status lines
    #[arg(long, default_value_t = 1)]
    interval: u64,

    /// Transaction log to replay
    #[arg(long)]
    query_file: PathBuf,

    /// Aggressiveness of the rate controller
    #[arg(long, default_value_t = 1.6)]
    slow_start_factor: f64,

    /// Minimum pause after each statement, in milliseconds
    #[arg(long, default_value_t = 5)]
    think_time_min: u64,

    /// Maximum pause after each statement, in milliseconds (0 disables think time)
    #[arg(long, default_value_t = 5)]
    think_time_max: u64,

    /// Target transactions per second, 0 for no target
    #[arg(long, default_value_t = 0.0)]
    tps: f64,

    /// Milliseconds between two wait event samples
    #[arg(long, default_value_t = 500)]
    we_interval: u64,

    /// Stop after this many transactions
    #[arg(long)]
    transactions: Option<u64>,

    /// Seed for reproducible transaction sampling
    #[arg(long)]
    seed: Option<u64>,

    /// Final report format
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

impl Cli {
    fn replay_config(&self) -> anyhow::Result<ReplayConfig> {
        ensure!(
            self.delay_xact.is_finite() && self.delay_xact >= 0.0,
            "--delay-xact must be a non-negative number of milliseconds, got {}",
            self.delay_xact
        );

        let transaction_delay = Duration::try_from_secs_f64(self.delay_xact / 1_000.0)
            .with_context(|| format!("--delay-xact {} is out of range", self.delay_xact))?;

        let config = ReplayConfig {
            clients: self.clients,
            dataset_fraction: self.dataset_fraction,
            start_stagger: Duration::from_secs(self.delay_start),
            transaction_delay,
            duration: (self.duration > 0).then(|| Duration::from_secs(self.duration)),
            transaction_limit: self.transactions,
            report_interval: Duration::from_secs(self.interval),
            think_time: ThinkTime::uniform(self.think_time_min, self.think_time_max),
            target_tps: self.tps,
            slow_start_factor: self.slow_start_factor,
            wait_event_interval: Duration::from_millis(self.we_interval),
            seed: self.seed,
        };
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = cli.replay_config().context("invalid settings")?;

    info!("Start parsing {}", cli.query_file.display());
    let path = cli.query_file.clone();
    let dataset = tokio::task::spawn_blocking(move || parse_file(&path))
        .await?
        .with_context(|| format!("cannot load {}", cli.query_file.display()))?;
    info!(
        "Parsing done, {} transactions found",
        dataset.transaction_count()
    );

    let wait_events = PgWaitEvents::connect(&cli.constr)
        .await
        .context("cannot open the wait event connection")?;

    let executor = ReplayExecutor::builder()
        .config(config)
        .connector(PgConnector::new(cli.constr.clone()))
        .build();

    let report = executor
        .exec(Arc::new(dataset), wait_events, interrupted())
        .await
        .context("replay failed")?;

    match cli.format {
        Format::Text => StdoutReporter.report(&report).await?,
        Format::Json => JsonReporter.report(&report).await?,
    }
    Ok(())
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    fmt().with_env_filter(filter).with_target(false).init();
}

async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("cannot listen for Ctrl+C, only the duration will stop the test: {e}");
        std::future::pending::<()>().await;
    }
    info!("Received interrupt");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_follow_the_library() {
        let cli = Cli::try_parse_from(["paceline", "--query-file", "xacts.log"]).unwrap();
        let config = cli.replay_config().unwrap();
        let defaults = ReplayConfig::default();

        assert_eq!(cli.format, Format::Text);
        assert_eq!(config.clients, defaults.clients);
        assert_eq!(config.transaction_delay, defaults.transaction_delay);
        assert_eq!(config.think_time, defaults.think_time);
        assert_eq!(config.report_interval, defaults.report_interval);
        assert_eq!(config.wait_event_interval, defaults.wait_event_interval);
        assert_eq!(config.duration, None);
        assert_eq!(config.transaction_limit, None);
    }

    #[test]
    fn flags_map_onto_the_config() {
        let cli = Cli::try_parse_from([
            "paceline",
            "--query-file=xacts.log",
            "--clients=8",
            "--delay-xact=0.5",
            "--delay-start=4",
            "--duration=60",
            "--think-time-min=0",
            "--think-time-max=0",
            "--tps=250",
            "--transactions=1000",
            "--format=json",
        ])
        .unwrap();
        let config = cli.replay_config().unwrap();

        assert_eq!(cli.format, Format::Json);
        assert_eq!(config.clients, 8);
        assert_eq!(config.transaction_delay, Duration::from_micros(500));
        assert_eq!(config.launch_gap(), Duration::from_millis(500));
        assert_eq!(config.duration, Some(Duration::from_secs(60)));
        assert!(!config.think_time.is_enabled());
        assert_eq!(config.target_tps, 250.0);
        assert_eq!(config.transaction_limit, Some(1000));
    }

    #[test]
    fn bad_values_are_refused() {
        for args in [
            ["paceline", "--query-file=x", "--clients=0"],
            ["paceline", "--query-file=x", "--delay-xact=-1"],
            ["paceline", "--query-file=x", "--delay-xact=1e300"],
            ["paceline", "--query-file=x", "--dataset-fraction=2"],
            ["paceline", "--query-file=x", "--interval=0"],
        ] {
            let cli = Cli::try_parse_from(args).unwrap();
            assert!(cli.replay_config().is_err(), "{args:?}");
        }
    }
}
