//! Batched, transactional loading into a relational sink.
//!
//! Rows are written in fixed-size batches, each one multi-row `INSERT` inside
//! its own transaction. A rejected batch is rolled back, written to the audit
//! log, and skipped; a lost connection halts the load. Batches committed
//! before a halt stay committed and the summary records where it stopped.

use std::{ops::Range, path::Path};

use chrono::Local;
use log::{error, info, warn};
use rusqlite::{Connection, ErrorCode};
use serde::Serialize;
use thiserror::Error;

use crate::{
    dataset::TabularDataset,
    error::{PipelineError, PipelineResult},
    io_utils::AppendLog,
    schema::TableSchema,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("connection lost: {0}")]
    Connection(String),
    #[error("{0}")]
    Statement(String),
}

/// Destination store able to run SQL text and bracket it in transactions.
pub trait RelationalSink {
    fn execute(&mut self, sql: &str) -> Result<(), SinkError>;

    fn begin(&mut self) -> Result<(), SinkError> {
        self.execute("BEGIN")
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        self.execute("COMMIT")
    }

    fn rollback(&mut self) -> Result<(), SinkError> {
        self.execute("ROLLBACK")
    }
}

#[derive(Debug)]
pub struct SqliteSink {
    connection: Connection,
}

impl SqliteSink {
    pub fn open(path: &Path) -> PipelineResult<Self> {
        let connection = Connection::open(path)
            .map_err(|err| PipelineError::ConnectionFailure(format!("{path:?}: {err}")))?;
        Ok(Self { connection })
    }

    pub fn open_in_memory() -> PipelineResult<Self> {
        let connection = Connection::open_in_memory()
            .map_err(|err| PipelineError::ConnectionFailure(err.to_string()))?;
        Ok(Self { connection })
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

fn classify(err: rusqlite::Error) -> SinkError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                ErrorCode::CannotOpen
                    | ErrorCode::NotADatabase
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::DatabaseCorrupt
                    | ErrorCode::DiskFull
            ) =>
        {
            SinkError::Connection(err.to_string())
        }
        _ => SinkError::Statement(err.to_string()),
    }
}

impl RelationalSink for SqliteSink {
    fn execute(&mut self, sql: &str) -> Result<(), SinkError> {
        self.connection.execute_batch(sql).map_err(classify)
    }
}

/// Progress of one load run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchInsertState {
    /// Current batch, `[start, end)` over dataset rows.
    pub start: usize,
    pub end: usize,
    pub rows_committed: usize,
    pub rows_failed: usize,
    pub batches_committed: usize,
    pub batches_failed: usize,
    pub transaction_open: bool,
}

/// Receives the load state after every batch.
pub trait ProgressSink {
    fn batch_finished(&mut self, state: &BatchInsertState, total_rows: usize);
}

impl<F> ProgressSink for F
where
    F: FnMut(&BatchInsertState, usize),
{
    fn batch_finished(&mut self, state: &BatchInsertState, total_rows: usize) {
        self(state, total_rows)
    }
}

/// Default progress reporting: one log line per batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn batch_finished(&mut self, state: &BatchInsertState, total_rows: usize) {
        info!(
            "Processed rows {}/{} ({} committed, {} failed)",
            state.end, total_rows, state.rows_committed, state.rows_failed
        );
    }
}

/// A batch the sink rejected, 1-based inclusive row range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedBatch {
    pub start: usize,
    pub end: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub table: String,
    pub rows_total: usize,
    pub rows_committed: usize,
    pub rows_failed: usize,
    pub batches_committed: usize,
    pub batches_failed: usize,
    pub failures: Vec<FailedBatch>,
    /// Why the load stopped early, when the connection was lost.
    pub halted: Option<String>,
}

impl LoadSummary {
    /// Rows never attempted because the load halted.
    pub fn rows_unprocessed(&self) -> usize {
        self.rows_total
            .saturating_sub(self.rows_committed + self.rows_failed)
    }
}

pub struct BatchLoader<S> {
    sink: S,
    batch_size: usize,
    audit_log: Option<AppendLog>,
}

impl<S: RelationalSink> BatchLoader<S> {
    pub fn new(sink: S, batch_size: usize) -> Self {
        Self {
            sink,
            batch_size: batch_size.max(1),
            audit_log: None,
        }
    }

    pub fn with_audit_log(mut self, log: AppendLog) -> Self {
        self.audit_log = Some(log);
        self
    }

    /// Runs the table DDL. Safe to repeat.
    pub fn create_table(&mut self, schema: &TableSchema) -> PipelineResult<()> {
        self.sink
            .execute(&schema.create_table_sql())
            .map_err(|err| match err {
                SinkError::Connection(message) => PipelineError::ConnectionFailure(message),
                SinkError::Statement(message) => PipelineError::SchemaRejected(message),
            })?;
        info!("Ensured table '{}' exists", schema.table);
        Ok(())
    }

    /// Loads every row. Rejected batches are counted and audited; a lost
    /// connection stops the run and is reported through
    /// [`LoadSummary::halted`] with the counts reached so far.
    pub fn load(
        &mut self,
        dataset: &TabularDataset,
        schema: &TableSchema,
        progress: &mut dyn ProgressSink,
    ) -> PipelineResult<LoadSummary> {
        let positions = schema
            .columns
            .iter()
            .map(|column| {
                dataset
                    .column_index(&column.name)
                    .ok_or_else(|| PipelineError::ColumnAbsent(column.name.clone()))
            })
            .collect::<PipelineResult<Vec<_>>>()?;
        let prefix = schema.insert_prefix();
        let total = dataset.row_count();
        let mut state = BatchInsertState::default();
        let mut failures = Vec::new();
        let mut halted = None;

        for start in (0..total).step_by(self.batch_size) {
            let end = (start + self.batch_size).min(total);
            state.start = start;
            state.end = end;
            let outcome =
                self.insert_batch(&prefix, dataset, schema, &positions, start..end, &mut state);
            match outcome {
                Ok(()) => {
                    state.rows_committed += end - start;
                    state.batches_committed += 1;
                }
                Err(err) if !err.is_fatal() => {
                    state.rows_failed += end - start;
                    state.batches_failed += 1;
                    error!("{err}");
                    let message = match err {
                        PipelineError::BatchInsertFailure { message, .. } => message,
                        other => other.to_string(),
                    };
                    let failure = FailedBatch {
                        start: start + 1,
                        end,
                        message,
                    };
                    self.record_failure(&failure)?;
                    failures.push(failure);
                }
                Err(err) => {
                    error!(
                        "Load halted at rows {}-{}: {err}; {} row(s) already committed",
                        start + 1,
                        end,
                        state.rows_committed
                    );
                    halted = Some(match err {
                        PipelineError::ConnectionFailure(message) => message,
                        other => other.to_string(),
                    });
                    break;
                }
            }
            progress.batch_finished(&state, total);
        }

        if state.batches_failed > 0 {
            warn!(
                "{} batch(es) covering {} row(s) were not loaded",
                state.batches_failed, state.rows_failed
            );
        }
        Ok(LoadSummary {
            table: schema.table.clone(),
            rows_total: total,
            rows_committed: state.rows_committed,
            rows_failed: state.rows_failed,
            batches_committed: state.batches_committed,
            batches_failed: state.batches_failed,
            failures,
            halted,
        })
    }

    fn insert_batch(
        &mut self,
        prefix: &str,
        dataset: &TabularDataset,
        schema: &TableSchema,
        positions: &[usize],
        rows: Range<usize>,
        state: &mut BatchInsertState,
    ) -> PipelineResult<()> {
        let statement = build_insert(prefix, dataset, schema, positions, rows.clone())?;
        self.sink.begin().map_err(|err| batch_error(err, &rows))?;
        state.transaction_open = true;
        let outcome = self
            .sink
            .execute(&statement)
            .and_then(|()| self.sink.commit());
        match outcome {
            Ok(()) => {
                state.transaction_open = false;
                Ok(())
            }
            Err(err) => {
                let rollback = self.sink.rollback();
                state.transaction_open = false;
                if let Err(SinkError::Connection(message)) = rollback {
                    return Err(PipelineError::ConnectionFailure(message));
                }
                Err(batch_error(err, &rows))
            }
        }
    }

    fn record_failure(&mut self, failure: &FailedBatch) -> PipelineResult<()> {
        if let Some(log) = self.audit_log.as_mut() {
            log.append(&format!(
                "{} rows {}-{}: {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                failure.start,
                failure.end,
                failure.message
            ))?;
        }
        Ok(())
    }
}

fn batch_error(err: SinkError, rows: &Range<usize>) -> PipelineError {
    match err {
        SinkError::Connection(message) => PipelineError::ConnectionFailure(message),
        SinkError::Statement(message) => PipelineError::BatchInsertFailure {
            start: rows.start + 1,
            end: rows.end,
            message,
        },
    }
}

fn build_insert(
    prefix: &str,
    dataset: &TabularDataset,
    schema: &TableSchema,
    positions: &[usize],
    rows: Range<usize>,
) -> PipelineResult<String> {
    let (first, last) = (rows.start + 1, rows.end);
    let mut statement = String::from(prefix);
    for (offset, row_idx) in rows.enumerate() {
        let row = &dataset.rows()[row_idx];
        let mut literals = Vec::with_capacity(positions.len());
        for (column, &position) in schema.columns.iter().zip(positions) {
            let literal = column.literal(&row[position]).ok_or_else(|| {
                PipelineError::BatchInsertFailure {
                    start: first,
                    end: last,
                    message: format!(
                        "row {} has non-integer identifier '{}'",
                        row_idx + 1,
                        row[position]
                    ),
                }
            })?;
            literals.push(literal);
        }
        if offset > 0 {
            statement.push_str(",\n");
        }
        statement.push('(');
        statement.push_str(&literals.join(", "));
        statement.push(')');
    }
    statement.push(';');
    Ok(statement)
}
