use std::ops::Index;

use rand::Rng;

/// One replay unit: the statements of a captured session, in recorded order.
///
/// An explicit transaction keeps its closing `COMMIT`/`ROLLBACK` line apart from
/// the statement list as its `terminator`. It is still replayed, last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    statements: Vec<String>,
    terminator: Option<String>,
}

impl Transaction {
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn terminator(&self) -> Option<&str> {
        self.terminator.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty() && self.terminator.is_none()
    }

    /// Everything a worker sends for this transaction, in order.
    pub fn replay(&self) -> impl Iterator<Item = &str> {
        self.statements
            .iter()
            .map(String::as_str)
            .chain(self.terminator.as_deref())
    }

    pub(crate) fn push_statement(&mut self, statement: String) {
        self.statements.push(statement);
    }

    /// Glues a continuation line onto the statement being built.
    pub(crate) fn extend_last(&mut self, fragment: &str) {
        match self.statements.last_mut() {
            Some(last) => {
                last.push(' ');
                last.push_str(fragment);
            }
            None => self.statements.push(fragment.to_owned()),
        }
    }

    pub(crate) fn set_terminator(&mut self, line: String) {
        self.terminator = Some(line);
    }
}

/// Dense, read-only mapping from transaction id to [`Transaction`].
///
/// Id 0 is a sentinel that stays empty and is never sampled; parsed transactions
/// live at `1..=transaction_count()`. Once built, a dataset is shared between
/// workers behind an `Arc` and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    transactions: Vec<Transaction>,
}

impl Default for Dataset {
    fn default() -> Self {
        Self {
            transactions: vec![Transaction::default()],
        }
    }
}

impl Dataset {
    /// Number of slots, sentinel included.
    pub fn slot_count(&self) -> usize {
        self.transactions.len()
    }

    /// True when there is nothing to replay.
    pub fn is_empty(&self) -> bool {
        self.transaction_count() == 0
    }

    /// Number of replayable transactions.
    pub fn transaction_count(&self) -> usize {
        self.transactions.len() - 1
    }

    pub fn get(&self, id: usize) -> Option<&Transaction> {
        self.transactions.get(id)
    }

    /// Iterates over replayable transactions with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Transaction)> {
        self.transactions.iter().enumerate().skip(1)
    }

    /// Highest id a worker may draw when restricted to `fraction` of the dataset.
    ///
    /// The result is never below 1, so a tiny fraction still replays the first
    /// transaction rather than nothing.
    pub fn sample_bound(&self, fraction: f64) -> usize {
        let count = self.transaction_count();
        let bound = (count as f64 * fraction).floor() as usize;
        bound.clamp(1, count.max(1))
    }

    /// Picks a transaction id uniformly from `1..=sample_bound(fraction)`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, fraction: f64) -> usize {
        rng.gen_range(1..=self.sample_bound(fraction))
    }

    /// Slot for `id`, growing the dataset so every id up to it exists.
    pub(crate) fn slot_mut(&mut self, id: usize) -> &mut Transaction {
        if id >= self.transactions.len() {
            self.transactions.resize_with(id + 1, Transaction::default);
        }
        &mut self.transactions[id]
    }
}

impl Index<usize> for Dataset {
    type Output = Transaction;

    fn index(&self, id: usize) -> &Transaction {
        &self.transactions[id]
    }
}
