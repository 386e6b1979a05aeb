//! PostgreSQL target over `tokio-postgres`.
//!
//! Everything goes through the simple query protocol so replay works behind
//! transaction-pooling middleware such as pgbouncer: no statement is ever
//! prepared on the server.
use std::collections::HashMap;

use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};

use crate::{
    connection::{Connection, Connector},
    error::{ConnectionError, ExecuteError},
    wait_events::{WaitEventSnapshot, WaitEventSource},
};

/// Connects with a libpq-style DSN or URI, e.g. `user=postgres dbname=postgres`.
#[derive(Debug, Clone)]
pub struct PgConnector {
    dsn: String,
}

impl PgConnector {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self { dsn: dsn.into() }
    }
}

impl Connector for PgConnector {
    type Connection = PgConnection;

    async fn connect(&self) -> Result<PgConnection, ConnectionError> {
        let (client, driver) = open(&self.dsn).await?;
        Ok(PgConnection { client, driver })
    }
}

pub struct PgConnection {
    client: Client,
    driver: JoinHandle<()>,
}

impl Connection for PgConnection {
    async fn execute(&mut self, statement: &str) -> Result<u64, ExecuteError> {
        match self.client.simple_query(statement).await {
            Ok(messages) => Ok(affected_rows(&messages)),
            Err(e) if e.is_closed() || self.client.is_closed() || e.as_db_error().is_none() => {
                Err(ConnectionError::new(e.to_string()).into())
            }
            Err(e) => Err(ExecuteError::Statement(e.to_string())),
        }
    }

    async fn close(self) -> Result<(), ConnectionError> {
        // Dropping the client sends Terminate; the driver then finishes on its own.
        drop(self.client);
        self.driver
            .await
            .map_err(|e| ConnectionError::new(format!("connection driver failed: {e}")))
    }
}

fn affected_rows(messages: &[SimpleQueryMessage]) -> u64 {
    messages
        .iter()
        .map(|m| match m {
            SimpleQueryMessage::CommandComplete(rows) => *rows,
            _ => 0,
        })
        .sum()
}

async fn open(dsn: &str) -> Result<(Client, JoinHandle<()>), ConnectionError> {
    let (client, connection) = tokio_postgres::connect(dsn, NoTls)
        .await
        .map_err(|e| ConnectionError::new(format!("{e} (connection params: {dsn})")))?;
    let driver = tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!("connection closed with error: {e}");
        }
    });
    Ok((client, driver))
}

// Wait events are grouped per type and event; `pg_stat_activity` gained
// `backend_type` in 10, which lets us leave background workers out.
const WAIT_EVENTS_96: &str = "SELECT wait_event_type || '-' || wait_event AS wait_event, \
     count(*)::text AS count \
     FROM pg_stat_activity \
     WHERE wait_event IS NOT NULL \
     GROUP BY wait_event_type, wait_event";

const WAIT_EVENTS_10: &str = "SELECT wait_event_type || '-' || wait_event AS wait_event, \
     count(*)::text AS count \
     FROM pg_stat_activity \
     WHERE wait_event IS NOT NULL AND backend_type = 'client backend' \
     GROUP BY wait_event_type, wait_event";

const SERVER_VERSION: &str =
    "SELECT setting FROM pg_catalog.pg_settings WHERE name = 'server_version_num'";

/// Samples `pg_stat_activity` on a dedicated connection.
pub struct PgWaitEvents {
    client: Client,
    driver: JoinHandle<()>,
    query: &'static str,
}

impl PgWaitEvents {
    /// Connects and picks the sampling query for the server's version.
    pub async fn connect(dsn: &str) -> Result<Self, ConnectionError> {
        let (client, driver) = open(dsn).await?;
        let version = first_value(&client, SERVER_VERSION)
            .await?
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or_else(|| ConnectionError::new("cannot read server_version_num"))?;
        let query = wait_event_query(version).ok_or_else(|| {
            ConnectionError::new(format!(
                "server version {version} has no wait events (9.6 or later required)"
            ))
        })?;
        tracing::debug!(version, "wait event collector connected");
        Ok(Self {
            client,
            driver,
            query,
        })
    }
}

fn wait_event_query(server_version_num: u32) -> Option<&'static str> {
    match server_version_num {
        100_000.. => Some(WAIT_EVENTS_10),
        90_600.. => Some(WAIT_EVENTS_96),
        _ => None,
    }
}

async fn first_value(client: &Client, query: &str) -> Result<Option<String>, ConnectionError> {
    let messages = client
        .simple_query(query)
        .await
        .map_err(|e| ConnectionError::new(e.to_string()))?;
    Ok(messages.iter().find_map(|m| match m {
        SimpleQueryMessage::Row(row) => row.get(0).map(str::to_owned),
        _ => None,
    }))
}

impl WaitEventSource for PgWaitEvents {
    async fn snapshot(&mut self) -> Result<WaitEventSnapshot, ConnectionError> {
        let messages = self
            .client
            .simple_query(self.query)
            .await
            .map_err(|e| ConnectionError::new(e.to_string()))?;

        let mut snapshot = HashMap::new();
        for message in &messages {
            if let SimpleQueryMessage::Row(row) = message {
                let (Some(label), Some(count)) = (row.get(0), row.get(1)) else {
                    continue;
                };
                let count = count.parse::<u64>().map_err(|e| {
                    ConnectionError::new(format!("unexpected wait event count {count:?}: {e}"))
                })?;
                *snapshot.entry(label.to_owned()).or_insert(0) += count;
            }
        }
        Ok(snapshot)
    }

    async fn close(self) -> Result<(), ConnectionError> {
        drop(self.client);
        self.driver
            .await
            .map_err(|e| ConnectionError::new(format!("connection driver failed: {e}")))
    }
}
