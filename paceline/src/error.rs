use std::{io, path::PathBuf};

use thiserror::Error;

use crate::parser::{Action, Phase};

/// The transaction log could not be turned into a dataset.
///
/// Every variant is fatal: replay never starts from a partially parsed log.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("cannot open query log {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read query log at line {line}: {source}")]
    Read {
        line: usize,
        #[source]
        source: io::Error,
    },

    #[error("line {line} is not valid UTF-8")]
    InvalidUtf8 { line: usize },

    #[error("line {line}: {source}")]
    Transition {
        line: usize,
        #[source]
        source: IllegalTransition,
    },
}

/// An action that the parser state machine does not accept in its current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("action {action:?} is illegal in state {from:?}")]
pub struct IllegalTransition {
    pub action: Action,
    pub from: Phase,
}

/// The link to the target is gone (or could never be established).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("connection failed: {message}")]
pub struct ConnectionError {
    pub message: String,
}

impl ConnectionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Outcome of a failed `Connection::execute`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecuteError {
    /// The target rejected this statement. Replay carries on.
    #[error("statement rejected: {0}")]
    Statement(String),

    /// The connection itself is unusable. Fatal for the worker holding it.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Invalid replay settings, detected before anything is allocated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("at least one client is required")]
    NoClients,

    #[error("dataset fraction must be in (0, 1], got {0}")]
    DatasetFraction(f64),

    #[error("think time minimum ({min}ms) is greater than its maximum ({max}ms)")]
    ThinkTimeRange { min: u64, max: u64 },

    #[error("target tps must be a finite, non-negative number, got {0}")]
    TargetTps(f64),

    #[error("slow start factor must be a finite, positive number, got {0}")]
    SlowStartFactor(f64),

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("transaction limit must be greater than zero")]
    ZeroTransactionLimit,
}

/// Errors that end a replay run.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("the dataset contains no transactions")]
    EmptyDataset,

    #[error("worker {worker}: {source}")]
    Connection {
        worker: usize,
        #[source]
        source: ConnectionError,
    },

    #[error("wait event collector: {0}")]
    WaitEvents(#[source] ConnectionError),

    #[error("replay task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Failures while writing a [`RunReport`](crate::report::RunReport) out.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("writing report: {0}")]
    Io(#[from] io::Error),

    #[error("encoding report: {0}")]
    Json(#[from] serde_json::Error),
}
