//! The seam between the replay engine and the database under test.
//!
//! The engine only needs to open a connection, send it statement strings and
//! close it. Anything that can do that implements [`Connector`] and
//! [`Connection`]; the PostgreSQL implementation lives in
//! [`crate::postgres`].
//!
//! Implementations must not keep server-side prepared statements between
//! calls: replay commonly runs through a connection pooler that multiplexes
//! sessions and cannot carry that state.
use std::future::Future;

use crate::error::{ConnectionError, ExecuteError};

/// Opens connections to the target. Shared by the executor across all launches.
pub trait Connector: Send + Sync {
    type Connection: Connection;

    fn connect(&self) -> impl Future<Output = Result<Self::Connection, ConnectionError>> + Send;
}

/// One live session on the target, owned by exactly one worker.
pub trait Connection: Send + 'static {
    /// Runs one statement and returns the number of affected rows.
    ///
    /// A rejected statement is [`ExecuteError::Statement`]; a broken link is
    /// [`ExecuteError::Connection`].
    fn execute(&mut self, statement: &str)
    -> impl Future<Output = Result<u64, ExecuteError>> + Send;

    fn close(self) -> impl Future<Output = Result<(), ConnectionError>> + Send;
}
