//! Stage functions shared by the subcommands.
//!
//! A run reads bytes, resolves them to UTF-8, parses a [`TabularDataset`],
//! cleans its structure, analyzes it, and loads it. Each stage takes the
//! [`PipelineConfig`] explicitly; none of them touch the command line.

use std::{path::Path, sync::OnceLock};

use log::{debug, info, warn};
use regex::Regex;

use crate::{
    config::{ColumnStorage, PipelineConfig},
    data::ValueKind,
    dataset::{ParseMode, TabularDataset},
    encoding::{EncodingResolver, ResolvedText},
    error::PipelineResult,
    io_utils::{self, AppendLog},
    loader::{BatchLoader, LoadSummary, ProgressSink, RelationalSink},
    quality::{QualityAnalyzer, QualityReport},
    schema::{SqlType, TableSchema, sanitize_table_name},
};

static INDEX_COLUMN: OnceLock<Option<Regex>> = OnceLock::new();

/// Columns such as `Unnamed: 0` left behind by spreadsheet or dataframe exports.
fn is_index_artifact(name: &str) -> bool {
    if name.trim().is_empty() {
        return true;
    }
    INDEX_COLUMN
        .get_or_init(|| Regex::new(r"^Unnamed: \d+$").ok())
        .as_ref()
        .is_some_and(|regex| regex.is_match(name))
}

pub fn normalize_source(path: &Path, config: &PipelineConfig) -> PipelineResult<ResolvedText> {
    let resolver = EncodingResolver::from_labels(&config.encodings)?;
    let resolved = resolver.resolve_path(path)?;
    info!(
        "Resolved {:?} as {} ({} line(s), {} repaired, {} problematic)",
        path,
        resolved.encoding.name(),
        resolved.report.total_lines,
        resolved.report.repaired.len(),
        resolved.report.problematic.len()
    );
    if !resolved.report.problematic.is_empty() {
        warn!(
            "Lines decoded with substitution: {:?}",
            resolved.report.problematic_line_numbers()
        );
    }
    Ok(resolved)
}

pub fn parse_dataset(
    text: &str,
    delimiter: u8,
    config: &PipelineConfig,
) -> PipelineResult<TabularDataset> {
    let mode = if config.lenient {
        ParseMode::Lenient
    } else {
        ParseMode::Strict
    };
    let dataset = TabularDataset::parse(text, delimiter, mode)?;
    let stats = dataset.parse_stats();
    info!(
        "Parsed {} row(s) across {} column(s); {} NA token(s) normalized",
        stats.rows,
        dataset.columns().len(),
        stats.total_na_tokens()
    );
    if stats.padded_rows + stats.truncated_rows > 0 {
        warn!(
            "Adjusted ragged rows: {} padded, {} truncated",
            stats.padded_rows, stats.truncated_rows
        );
    }
    Ok(dataset)
}

/// Drops index artefact and configured columns, then makes sure the row
/// identifier exists. Returns the dropped column names.
pub fn preprocess(
    dataset: &mut TabularDataset,
    config: &PipelineConfig,
) -> PipelineResult<Vec<String>> {
    let doomed = dataset
        .columns()
        .iter()
        .filter(|name| {
            **name != config.identifier_column
                && (is_index_artifact(name) || config.drop_columns.contains(name))
        })
        .cloned()
        .collect::<Vec<_>>();
    for name in &doomed {
        dataset.drop_column(name)?;
        debug!("Dropped column '{name}'");
    }
    if dataset.ensure_row_identifier(&config.identifier_column)? {
        info!(
            "Added identifier column '{}' (1..={})",
            config.identifier_column,
            dataset.row_count()
        );
    }
    Ok(doomed)
}

/// Reads, normalizes, parses, and preprocesses a source file.
pub fn prepare(
    path: &Path,
    delimiter: u8,
    config: &PipelineConfig,
) -> PipelineResult<(ResolvedText, TabularDataset)> {
    let resolved = normalize_source(path, config)?;
    let mut dataset = parse_dataset(&resolved.text, delimiter, config)?;
    preprocess(&mut dataset, config)?;
    Ok((resolved, dataset))
}

pub fn analyze(dataset: &TabularDataset, config: &PipelineConfig) -> QualityReport {
    QualityAnalyzer::from_config(&config.rules).analyze(dataset)
}

/// Restricts the dataset to rows of the configured hospitals. An empty
/// hospital list keeps every row.
pub fn restrict_to_entities(
    dataset: TabularDataset,
    config: &PipelineConfig,
) -> PipelineResult<TabularDataset> {
    if config.rules.hospitals.is_empty() {
        return Ok(dataset);
    }
    let subset = dataset
        .filter_in(&config.rules.hospital_column, &config.rules.hospitals)?
        .to_dataset();
    info!(
        "Kept {} of {} row(s) for {} hospital(s)",
        subset.row_count(),
        dataset.row_count(),
        config.rules.hospitals.len()
    );
    Ok(subset)
}

/// Writes the dataset as UTF-8 CSV with `NA` for missing cells.
pub fn export_dataset(
    dataset: &TabularDataset,
    path: &Path,
    delimiter: u8,
) -> PipelineResult<()> {
    let writer = io_utils::create_output(path)?;
    dataset.write_csv(writer, delimiter)
}

/// Table name from the override when given, otherwise from the source stem.
pub fn table_name_for(source: &Path, config: &PipelineConfig) -> String {
    match &config.load.table_name {
        Some(name) => sanitize_table_name(name),
        None => sanitize_table_name(
            source
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or_default(),
        ),
    }
}

pub fn infer_schema(
    dataset: &TabularDataset,
    table: &str,
    config: &PipelineConfig,
) -> PipelineResult<TableSchema> {
    TableSchema::infer(dataset, table, config.load.sample_rows, config.load.storage)
}

/// Creates the table and loads every row. With inferred storage, typed
/// columns are coerced in place first so unconvertible cells load as NULL.
pub fn load<S: RelationalSink>(
    dataset: &mut TabularDataset,
    schema: &TableSchema,
    config: &PipelineConfig,
    sink: S,
    audit_log: Option<AppendLog>,
    progress: &mut dyn ProgressSink,
) -> PipelineResult<LoadSummary> {
    if config.load.storage == ColumnStorage::Inferred {
        for column in schema.columns.iter().filter(|c| !c.primary_key) {
            let kind = match column.declared {
                SqlType::Integer => ValueKind::Integer,
                SqlType::Decimal => ValueKind::Decimal,
                SqlType::Timestamp => ValueKind::Date,
                SqlType::Varchar(_) | SqlType::Text => continue,
            };
            let failures = dataset.coerce_column(&column.name, kind)?;
            if failures > 0 {
                warn!(
                    "{failures} value(s) in '{}' do not fit {} and load as NULL",
                    column.name, column.declared
                );
            }
        }
    }
    let mut loader = BatchLoader::new(sink, config.load.batch_size);
    if let Some(log) = audit_log {
        loader = loader.with_audit_log(log);
    }
    loader.create_table(schema)?;
    let summary = loader.load(dataset, schema, progress)?;
    info!(
        "Loaded {}/{} row(s) into '{}'",
        summary.rows_committed, summary.rows_total, summary.table
    );
    if summary.halted.is_some() {
        warn!(
            "{} row(s) were not attempted after the load halted",
            summary.rows_unprocessed()
        );
    }
    Ok(summary)
}
