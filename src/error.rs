use std::{io, path::PathBuf};

use thiserror::Error;

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Failure kinds surfaced by the ingest stages.
///
/// Structural problems (unreadable source, malformed rows in strict mode,
/// lost sink connections) halt a run. Cell-level coercion failures never
/// appear here; they are counted on the dataset instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Source {path:?} could not be read: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("No encoding could be detected for {bytes} byte(s) of input")]
    EncodingUndetected { bytes: usize },
    #[error("Row at line {line} has {found} field(s) but the header declares {expected}")]
    MalformedRow {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("Column '{0}' appears more than once")]
    DuplicateColumn(String),
    #[error("Column '{0}' not found")]
    ColumnAbsent(String),
    #[error("Batch covering rows {start}-{end} failed: {message}")]
    BatchInsertFailure {
        start: usize,
        end: usize,
        message: String,
    },
    #[error("Lost connection to the relational sink: {0}")]
    ConnectionFailure(String),
    #[error("Relational sink rejected the table definition: {0}")]
    SchemaRejected(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Failed to write {path:?}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),
}

impl PipelineError {
    /// Whether the run must stop when this error is raised.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            PipelineError::ColumnAbsent(_) | PipelineError::BatchInsertFailure { .. }
        )
    }
}
