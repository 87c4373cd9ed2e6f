//! Accumulates the outcome of a multi-statement run.
//!
//! The last statement that produced a result set wins; affected rows are
//! summed over the whole batch.

use crate::models::{QueryColumn, QueryResult, Row};
use std::time::Instant;

#[derive(Debug)]
pub(crate) struct Batch {
    start: Instant,
    result_set: Option<(Vec<QueryColumn>, Vec<Row>)>,
    affected_rows: u64,
}

impl Batch {
    pub(crate) fn start() -> Self {
        Self {
            start: Instant::now(),
            result_set: None,
            affected_rows: 0,
        }
    }

    /// Records a statement that returned rows.
    pub(crate) fn rows(&mut self, columns: Vec<QueryColumn>, rows: Vec<Row>) {
        self.result_set = Some((columns, rows));
    }

    /// Records a statement that changed rows.
    pub(crate) fn affected(&mut self, count: u64) {
        self.affected_rows = self.affected_rows.saturating_add(count);
    }

    /// Ends the batch with a failure; earlier results are discarded.
    pub(crate) fn fail(self, error: impl std::fmt::Display) -> QueryResult {
        QueryResult::from_error(error).timed(self.start)
    }

    pub(crate) fn finish(self) -> QueryResult {
        let mut result = match self.result_set {
            Some((columns, rows)) => QueryResult::with_rows(columns, rows),
            None => QueryResult::default(),
        };
        result.affected_rows = self.affected_rows;
        result.timed(self.start)
    }
}
