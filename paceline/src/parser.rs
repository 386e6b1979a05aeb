//! Query log → [`Dataset`].
//!
//! The log is a flat list of statement fragments, one per physical line, with no
//! markers between sessions other than `BEGIN`, `COMMIT`/`ROLLBACK` and the
//! semicolon that ends a statement. Each line is classified into an [`Action`]
//! with a handful of regular expressions (this is deliberately not a SQL
//! grammar), and the actions drive a small state machine that decides when a
//! new transaction starts and when a line continues the previous statement.
//!
//! ```text
//! BEGIN                  -> Begin           tx 1: ["BEGIN"]
//! SELECT *               -> MultilineQuery  tx 1: ["BEGIN", "SELECT *"]
//! FROM t;                -> Query           tx 1: ["BEGIN", "SELECT * FROM t;"]
//! COMMIT;                -> CommitRollback  tx 1 terminator: "COMMIT;"
//! SELECT now();          -> Query           tx 2: ["SELECT now();"]
//! ```
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
    sync::LazyLock,
};

use regex::Regex;

use crate::{
    dataset::Dataset,
    error::{IllegalTransition, ParseError},
};

static BEGIN: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)^[ \t]*BEGIN"));
static COMMIT: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)^[ \t]*COMMIT"));
static ROLLBACK: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)^[ \t]*ROLLBACK"));
static ROLLBACK_TO_SAVEPOINT: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)^[ \t]*ROLLBACK[ \t]+TO[ \t]+SAVEPOINT"));
static STATEMENT_END: LazyLock<Regex> = LazyLock::new(|| compile(r";[ \t]*(--.*)?$"));

fn compile(pattern: &str) -> Regex {
    // Patterns are literals above; a failure here is a programming error.
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid line pattern {pattern}: {e}"))
}

/// What a line means to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Begin,
    Query,
    MultilineQuery,
    CommitRollback,
}

/// Classification of one physical line of the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Action(Action),
    /// Whitespace only. Never reaches the state machine.
    Blank,
}

/// Classifies a single line. Checks run in a fixed order, so a line starting with
/// `BEGIN` is a `Begin` even when it also ends with a semicolon.
pub fn classify_line(line: &str) -> LineKind {
    let action = if BEGIN.is_match(line) {
        Action::Begin
    } else if ROLLBACK_TO_SAVEPOINT.is_match(line) {
        Action::Query
    } else if COMMIT.is_match(line) || ROLLBACK.is_match(line) {
        Action::CommitRollback
    } else if STATEMENT_END.is_match(line) {
        Action::Query
    } else if line.trim().is_empty() {
        return LineKind::Blank;
    } else {
        Action::MultilineQuery
    };
    LineKind::Action(action)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Query,
    MultilineQuery,
    NewTransaction,
    TransactionInProgress,
    EndTransaction,
    Error,
}

/// Transient state of the transaction state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseState {
    pub phase: Phase,
    pub transaction_count: usize,
    pub transaction_open: bool,
}

impl Default for ParseState {
    fn default() -> Self {
        Self {
            phase: Phase::Init,
            transaction_count: 0,
            transaction_open: false,
        }
    }
}

impl ParseState {
    /// Applies `action` and returns the id of the transaction the line belongs to.
    ///
    /// An illegal action moves the machine to [`Phase::Error`], where every later
    /// action fails as well.
    pub fn apply(&mut self, action: Action) -> Result<usize, IllegalTransition> {
        use Action as A;
        use Phase as P;

        let next = match (self.phase, action) {
            (P::Init | P::Query | P::EndTransaction, A::Begin) => {
                self.transaction_count += 1;
                self.transaction_open = true;
                P::NewTransaction
            }
            (P::Init | P::Query | P::EndTransaction, A::Query) => {
                self.transaction_count += 1;
                P::Query
            }
            // A multi-line statement outside an explicit transaction is its own
            // transaction, whatever came before it.
            (P::Init | P::Query | P::EndTransaction, A::MultilineQuery) => {
                self.transaction_count += 1;
                P::MultilineQuery
            }
            (P::MultilineQuery, A::Query) if self.transaction_open => P::TransactionInProgress,
            (P::MultilineQuery, A::Query) => P::Query,
            (
                P::MultilineQuery | P::NewTransaction | P::TransactionInProgress,
                A::MultilineQuery,
            ) => P::MultilineQuery,
            (P::NewTransaction | P::TransactionInProgress, A::Query) => P::TransactionInProgress,
            (P::NewTransaction | P::TransactionInProgress, A::CommitRollback) => {
                self.transaction_open = false;
                P::EndTransaction
            }
            (from, action) => {
                self.phase = P::Error;
                return Err(IllegalTransition { action, from });
            }
        };
        self.phase = next;
        Ok(self.transaction_count)
    }
}

/// Incremental, single-pass builder of a [`Dataset`].
#[derive(Debug, Default)]
pub struct TransactionParser {
    state: ParseState,
    dataset: Dataset,
    line: usize,
}

impl TransactionParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ParseState {
        &self.state
    }

    /// Feeds one complete line (without its line terminator).
    pub fn feed_line(&mut self, line: &str) -> Result<(), ParseError> {
        self.line += 1;
        tracing::trace!(lineno = self.line, "Query: {line}");

        let action = match classify_line(line) {
            LineKind::Blank => return Ok(()),
            LineKind::Action(action) => action,
        };

        let previous = self.state.phase;
        let id = self
            .state
            .apply(action)
            .map_err(|source| ParseError::Transition {
                line: self.line,
                source,
            })?;

        let xact = self.dataset.slot_mut(id);
        if previous == Phase::MultilineQuery {
            xact.extend_last(line);
        } else if action == Action::CommitRollback {
            xact.set_terminator(line.to_owned());
        } else {
            xact.push_statement(line.to_owned());
        }
        Ok(())
    }

    /// Reads `reader` to the end, one line at a time. Lines may be of any length.
    pub fn read_from<R: BufRead>(&mut self, mut reader: R) -> Result<(), ParseError> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .map_err(|source| ParseError::Read {
                    line: self.line + 1,
                    source,
                })?;
            if read == 0 {
                return Ok(());
            }
            if buf.last() == Some(&b'\n') {
                buf.pop();
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
            }
            let line = std::str::from_utf8(&buf)
                .map_err(|_| ParseError::InvalidUtf8 { line: self.line + 1 })?;
            self.feed_line(line)?;
        }
    }

    pub fn finish(self) -> Dataset {
        self.dataset
    }
}

/// Parses a whole log from any buffered reader.
pub fn parse_reader<R: BufRead>(reader: R) -> Result<Dataset, ParseError> {
    let mut parser = TransactionParser::new();
    parser.read_from(reader)?;
    Ok(parser.finish())
}

/// Parses the query log at `path`.
pub fn parse_file(path: impl AsRef<Path>) -> Result<Dataset, ParseError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| ParseError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    parse_reader(BufReader::new(file))
}
