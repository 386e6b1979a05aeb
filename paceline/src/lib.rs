//! Paceline: replay captured SQL transactions against a database at a
//! controlled rate.
//!
//! Paceline reads a log of recorded statements, groups them back into the
//! transactions they belonged to and has a pool of concurrent clients replay
//! randomly drawn transactions. A feedback loop adjusts the pause between
//! transactions until the pool settles on a target throughput, while a
//! separate connection samples what the server's sessions are waiting on.
//!
//! # Architecture
//!
//! The main building blocks are:
//!
//! - [`parser`]: turns a transaction log into a [`Dataset`]. A small state
//!   machine tracks `BEGIN`/`COMMIT`/`ROLLBACK` and multi-line statements and
//!   rejects logs whose structure makes no sense.
//! - [`ReplayExecutor`]: launches the workers, runs the rate controller and
//!   the wait event collector and stops everything when the first stop source
//!   fires.
//! - [`Connector`] / [`Connection`]: the seam to the database. The `postgres`
//!   feature provides [`postgres::PgConnector`].
//! - [`WaitEventSource`]: where wait event samples come from
//!   ([`postgres::PgWaitEvents`] for PostgreSQL).
//! - [`RunReport`] and [`Reporter`]: the outcome of a run and where it goes.
//!
//! # Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "postgres")]
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use std::{sync::Arc, time::Duration};
//!
//! use paceline::{
//!     ReplayConfig, ReplayExecutor, Reporter, StdoutReporter, parse_file,
//!     postgres::{PgConnector, PgWaitEvents},
//! };
//!
//! let dsn = "host=localhost user=postgres dbname=bench";
//! let dataset = Arc::new(parse_file("captured.log")?);
//!
//! let executor = ReplayExecutor::builder()
//!     .config(
//!         ReplayConfig::builder()
//!             .clients(32)
//!             .target_tps(1_000.0)
//!             .duration(Some(Duration::from_secs(300)))
//!             .build(),
//!     )
//!     .connector(PgConnector::new(dsn))
//!     .build();
//!
//! let report = executor
//!     .exec(dataset, PgWaitEvents::connect(dsn).await?, std::future::pending())
//!     .await?;
//! StdoutReporter.report(&report).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Feature flags
//!
//! - `postgres`: PostgreSQL connector and wait event source over
//!   `tokio-postgres`. (Enabled by default)

/// Replay settings
pub mod config;
/// Database seam
pub mod connection;
/// Feedback loop on the inter-transaction delay
pub mod controller;
pub mod dataset;
pub mod error;
/// Orchestration of a run
pub mod executor;
pub mod pacing;
/// Transaction log parsing
pub mod parser;
#[cfg(feature = "postgres")]
pub mod postgres;
/// Run reports and reporters
pub mod report;
pub mod signal;
pub mod think;
pub mod wait_events;
/// Replay agents
pub mod worker;

pub use config::ReplayConfig;
pub use connection::{Connection, Connector};
pub use controller::RunSummary;
pub use dataset::{Dataset, Transaction};
pub use error::{ConfigError, ConnectionError, ExecuteError, ParseError, ReplayError, ReportError};
pub use executor::ReplayExecutor;
pub use parser::{parse_file, parse_reader};
pub use report::{JsonReporter, Reporter, RunReport, StdoutReporter};
pub use signal::{StopReason, StopSignal};
pub use think::ThinkTime;
pub use wait_events::{WaitEventSource, WaitEventTally};
