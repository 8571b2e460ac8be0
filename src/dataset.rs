//! In-memory table of tagged cells.
//!
//! [`TabularDataset`] is built once from normalized UTF-8 text and then handed
//! between stages. Analyzer rules borrow it immutably; preprocessing and the
//! loader take it mutably to coerce or restructure columns. Every mutation
//! clears the per-column profile cache.

use std::{
    collections::{BTreeMap, HashSet},
    io::Write,
    sync::OnceLock,
};

use log::debug;

use crate::{
    data::{MISSING_TOKEN, Value, ValueKind, strip_quotes},
    error::{PipelineError, PipelineResult},
    profile::ColumnTypeProfile,
};

/// How to treat rows whose field count differs from the header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParseMode {
    #[default]
    Strict,
    /// Pad short rows with `Missing`, truncate long ones, and count both.
    Lenient,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub rows: usize,
    pub padded_rows: usize,
    pub truncated_rows: usize,
    /// Per-column count of `NA` tokens normalized to `Missing`.
    pub na_tokens: BTreeMap<String, usize>,
}

impl ParseStats {
    pub fn total_na_tokens(&self) -> usize {
        self.na_tokens.values().sum()
    }
}

#[derive(Debug, Clone)]
pub struct TabularDataset {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    identifier: Option<usize>,
    profiles: Vec<OnceLock<ColumnTypeProfile>>,
    stats: ParseStats,
}

impl TabularDataset {
    pub fn new(columns: Vec<String>) -> PipelineResult<Self> {
        let mut seen = HashSet::new();
        for name in &columns {
            if !seen.insert(name.as_str()) {
                return Err(PipelineError::DuplicateColumn(name.clone()));
            }
        }
        let profiles = columns.iter().map(|_| OnceLock::new()).collect();
        Ok(Self {
            columns,
            rows: Vec::new(),
            identifier: None,
            profiles,
            stats: ParseStats::default(),
        })
    }

    /// Parses delimited UTF-8 text whose first record is the header.
    pub fn parse(text: &str, delimiter: u8, mode: ParseMode) -> PipelineResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(delimiter)
            .double_quote(true)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut records = reader.records();
        let header = match records.next() {
            Some(record) => record?,
            None => {
                return Err(PipelineError::MalformedRow {
                    line: 1,
                    expected: 0,
                    found: 0,
                });
            }
        };
        let columns = header
            .iter()
            .map(|name| strip_quotes(name.trim()).to_string())
            .collect::<Vec<_>>();
        let mut dataset = Self::new(columns)?;
        let width = dataset.columns.len();

        for record in records {
            let record = record?;
            let line = record
                .position()
                .map(|pos| pos.line() as usize)
                .unwrap_or(dataset.rows.len() + 2);
            let found = record.len();
            if found != width {
                match mode {
                    ParseMode::Strict => {
                        return Err(PipelineError::MalformedRow {
                            line,
                            expected: width,
                            found,
                        });
                    }
                    ParseMode::Lenient if found < width => dataset.stats.padded_rows += 1,
                    ParseMode::Lenient => dataset.stats.truncated_rows += 1,
                }
                debug!("Adjusted row at line {line} from {found} to {width} field(s)");
            }
            let mut row = Vec::with_capacity(width);
            for (idx, field) in record.iter().take(width).enumerate() {
                let value = Value::from_raw(field);
                if value.is_missing() && strip_quotes(field) == MISSING_TOKEN {
                    *dataset
                        .stats
                        .na_tokens
                        .entry(dataset.columns[idx].clone())
                        .or_insert(0) += 1;
                }
                row.push(value);
            }
            row.resize(width, Value::Missing);
            dataset.rows.push(row);
        }
        dataset.stats.rows = dataset.rows.len();
        Ok(dataset)
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> PipelineResult<()> {
        if row.len() != self.columns.len() {
            return Err(PipelineError::MalformedRow {
                line: self.rows.len() + 2,
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        self.invalidate();
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn parse_stats(&self) -> &ParseStats {
        &self.stats
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    fn require(&self, name: &str) -> PipelineResult<usize> {
        self.column_index(name)
            .ok_or_else(|| PipelineError::ColumnAbsent(name.to_string()))
    }

    /// Cells of `name` in row order.
    pub fn column_values(&self, name: &str) -> PipelineResult<impl Iterator<Item = &Value> + '_> {
        let idx = self.require(name)?;
        Ok(self.rows.iter().map(move |row| &row[idx]))
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&Value> {
        self.rows.get(row).and_then(|cells| cells.get(column))
    }

    /// Profile of the column, computed on first use and cached until the
    /// dataset is mutated.
    pub fn profile(&self, name: &str) -> PipelineResult<&ColumnTypeProfile> {
        let idx = self.require(name)?;
        Ok(self.profiles[idx]
            .get_or_init(|| ColumnTypeProfile::from_cells(self.rows.iter().map(|row| &row[idx]))))
    }

    /// Profile over at most `limit` leading rows (0 means every row). Not cached.
    pub fn sampled_profile(&self, name: &str, limit: usize) -> PipelineResult<ColumnTypeProfile> {
        if limit == 0 || limit >= self.rows.len() {
            return self.profile(name).cloned();
        }
        let idx = self.require(name)?;
        Ok(ColumnTypeProfile::from_cells(
            self.rows.iter().take(limit).map(|row| &row[idx]),
        ))
    }

    fn invalidate(&mut self) {
        self.profiles = self.columns.iter().map(|_| OnceLock::new()).collect();
    }

    /// Rewrites every cell of `name` as `kind`; returns how many present
    /// cells failed to convert and were replaced by `Missing`.
    pub fn coerce_column(&mut self, name: &str, kind: ValueKind) -> PipelineResult<usize> {
        let idx = self.require(name)?;
        let mut failures = 0usize;
        for row in &mut self.rows {
            let cell = &mut row[idx];
            let was_present = !cell.is_absent();
            let coerced = cell.coerce(kind);
            if was_present && coerced.is_missing() {
                failures += 1;
            }
            *cell = coerced;
        }
        self.invalidate();
        debug!("Coerced column '{name}' to {kind}: {failures} non-conforming cell(s)");
        Ok(failures)
    }

    pub fn drop_column(&mut self, name: &str) -> PipelineResult<()> {
        let idx = self.require(name)?;
        self.columns.remove(idx);
        for row in &mut self.rows {
            row.remove(idx);
        }
        self.identifier = match self.identifier {
            Some(id) if id == idx => None,
            Some(id) if id > idx => Some(id - 1),
            other => other,
        };
        self.invalidate();
        Ok(())
    }

    pub fn rename_column(&mut self, old: &str, new: &str) -> PipelineResult<()> {
        let idx = self.require(old)?;
        if old != new && self.column_index(new).is_some() {
            return Err(PipelineError::DuplicateColumn(new.to_string()));
        }
        if let Some(count) = self.stats.na_tokens.remove(old) {
            self.stats.na_tokens.insert(new.to_string(), count);
        }
        self.columns[idx] = new.to_string();
        self.invalidate();
        Ok(())
    }

    /// Marks `name` as the row identifier, inserting a 1-based integer column
    /// at position 0 when the dataset does not carry one yet.
    pub fn ensure_row_identifier(&mut self, name: &str) -> PipelineResult<bool> {
        if let Some(idx) = self.column_index(name) {
            self.identifier = Some(idx);
            return Ok(false);
        }
        self.columns.insert(0, name.to_string());
        for (position, row) in self.rows.iter_mut().enumerate() {
            row.insert(0, Value::Integer(position as i64 + 1));
        }
        self.identifier = Some(0);
        self.invalidate();
        Ok(true)
    }

    pub fn identifier_column(&self) -> Option<&str> {
        self.identifier.map(|idx| self.columns[idx].as_str())
    }

    /// Identifier of the row at `index`: the identifier cell when it holds an
    /// integer, the 1-based position otherwise.
    pub fn row_id(&self, index: usize) -> i64 {
        self.identifier
            .and_then(|col| self.cell(index, col))
            .and_then(|cell| match cell.coerce(ValueKind::Integer) {
                Value::Integer(id) => Some(id),
                _ => None,
            })
            .unwrap_or(index as i64 + 1)
    }

    /// Rows whose `column` value is one of `keys`, in original order.
    pub fn filter_in<'a>(&'a self, column: &str, keys: &[String]) -> PipelineResult<RowView<'a>> {
        let idx = self.require(column)?;
        let wanted = keys.iter().map(String::as_str).collect::<HashSet<_>>();
        let indices = self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| wanted.contains(row[idx].as_display().trim()))
            .map(|(position, _)| position)
            .collect();
        Ok(RowView {
            dataset: self,
            indices,
        })
    }

    pub fn write_csv<W: Write>(&self, writer: W, delimiter: u8) -> PipelineResult<()> {
        self.view_all().write_csv(writer, delimiter)
    }

    fn view_all(&self) -> RowView<'_> {
        RowView {
            dataset: self,
            indices: (0..self.rows.len()).collect(),
        }
    }
}

/// Read-only subset of a dataset's rows.
#[derive(Debug, Clone)]
pub struct RowView<'a> {
    dataset: &'a TabularDataset,
    indices: Vec<usize>,
}

impl<'a> RowView<'a> {
    pub fn rows(&self) -> impl Iterator<Item = &'a [Value]> + '_ {
        self.indices
            .iter()
            .map(move |&idx| self.dataset.rows[idx].as_slice())
    }

    /// Copies the selected rows into a standalone dataset. Its parse stats
    /// only carry the subset's row count; source-level tallies stay behind.
    pub fn to_dataset(&self) -> TabularDataset {
        let source = self.dataset;
        TabularDataset {
            columns: source.columns.clone(),
            rows: self.rows().map(<[Value]>::to_vec).collect(),
            identifier: source.identifier,
            profiles: source.columns.iter().map(|_| OnceLock::new()).collect(),
            stats: ParseStats {
                rows: self.indices.len(),
                ..ParseStats::default()
            },
        }
    }

    pub fn write_csv<W: Write>(&self, writer: W, delimiter: u8) -> PipelineResult<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_writer(writer);
        writer.write_record(&self.dataset.columns)?;
        for row in self.rows() {
            writer.write_record(row.iter().map(|cell| match cell {
                Value::Missing => MISSING_TOKEN.to_string(),
                other => other.as_display(),
            }))?;
        }
        writer.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "IDADE,CGC_HOSP,DT_INTER\n34,\"HUSE\",20200501\nNA,HU,20200502\n,HUSE,bad\n";

    #[test]
    fn parse_builds_rows_and_counts_na_tokens() {
        let dataset = TabularDataset::parse(SAMPLE, b',', ParseMode::Strict).expect("parse");
        assert_eq!(dataset.columns(), &["IDADE", "CGC_HOSP", "DT_INTER"]);
        assert_eq!(dataset.row_count(), 3);
        assert_eq!(dataset.rows()[0][1], Value::Text("HUSE".to_string()));
        assert_eq!(dataset.rows()[1][0], Value::Missing);
        assert_eq!(dataset.rows()[2][0], Value::Text(String::new()));
        assert_eq!(dataset.parse_stats().na_tokens.get("IDADE"), Some(&1));
    }

    #[test]
    fn strict_parse_rejects_ragged_rows() {
        let err = TabularDataset::parse("a,b\n1,2\n3\n", b',', ParseMode::Strict)
            .expect_err("ragged row");
        match err {
            PipelineError::MalformedRow {
                line,
                expected,
                found,
            } => {
                assert_eq!(line, 3);
                assert_eq!(expected, 2);
                assert_eq!(found, 1);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn lenient_parse_pads_and_truncates() {
        let dataset = TabularDataset::parse("a,b\n1\n1,2,3\n", b',', ParseMode::Lenient)
            .expect("lenient parse");
        assert_eq!(dataset.row_count(), 2);
        assert_eq!(dataset.rows()[0], vec![Value::Text("1".into()), Value::Missing]);
        assert_eq!(dataset.rows()[1].len(), 2);
        assert_eq!(dataset.parse_stats().padded_rows, 1);
        assert_eq!(dataset.parse_stats().truncated_rows, 1);
    }

    #[test]
    fn duplicate_headers_are_rejected() {
        let err = TabularDataset::parse("a,a\n1,2\n", b',', ParseMode::Strict).expect_err("dup");
        assert!(matches!(err, PipelineError::DuplicateColumn(name) if name == "a"));
    }

    #[test]
    fn coerce_column_counts_failures_and_refreshes_profile() {
        let mut dataset = TabularDataset::parse(SAMPLE, b',', ParseMode::Strict).expect("parse");
        assert_eq!(dataset.profile("DT_INTER").expect("profile").invalid, 1);
        let failures = dataset
            .coerce_column("DT_INTER", ValueKind::Date)
            .expect("coerce");
        assert_eq!(failures, 1);
        let profile = dataset.profile("DT_INTER").expect("profile");
        assert_eq!(profile.missing, 1);
        assert_eq!(profile.date, 2);
        assert!(matches!(
            dataset.coerce_column("NOPE", ValueKind::Date),
            Err(PipelineError::ColumnAbsent(_))
        ));
    }

    #[test]
    fn structural_edits_preserve_rows() {
        let mut dataset = TabularDataset::parse(SAMPLE, b',', ParseMode::Strict).expect("parse");
        dataset.rename_column("IDADE", "AGE").expect("rename");
        dataset.drop_column("DT_INTER").expect("drop");
        assert_eq!(dataset.columns(), &["AGE", "CGC_HOSP"]);
        assert_eq!(dataset.row_count(), 3);
        assert_eq!(dataset.rows()[0][0], Value::Text("34".to_string()));
        assert!(matches!(
            dataset.rename_column("AGE", "CGC_HOSP"),
            Err(PipelineError::DuplicateColumn(_))
        ));
    }

    #[test]
    fn synthetic_identifier_is_one_based() {
        let mut dataset = TabularDataset::parse(SAMPLE, b',', ParseMode::Strict).expect("parse");
        assert!(dataset.ensure_row_identifier("identificador").expect("id"));
        assert_eq!(dataset.columns()[0], "identificador");
        assert_eq!(dataset.row_id(2), 3);
        assert!(!dataset.ensure_row_identifier("identificador").expect("id"));
    }

    #[test]
    fn filter_in_keeps_order_without_mutation() {
        let dataset = TabularDataset::parse(SAMPLE, b',', ParseMode::Strict).expect("parse");
        let view = dataset
            .filter_in("CGC_HOSP", &["HUSE".to_string()])
            .expect("filter");
        assert_eq!(view.indices, vec![0, 2]);
        assert_eq!(dataset.row_count(), 3);
        let subset = view.to_dataset();
        assert_eq!(subset.row_count(), 2);
        assert_eq!(subset.parse_stats().rows, 2);
        assert_eq!(subset.parse_stats().total_na_tokens(), 0);
        assert_eq!(dataset.parse_stats().rows, 3);
    }

    #[test]
    fn write_csv_emits_na_for_missing() {
        let dataset = TabularDataset::parse(SAMPLE, b',', ParseMode::Strict).expect("parse");
        let mut buffer = Vec::new();
        dataset.write_csv(&mut buffer, b',').expect("write");
        let text = String::from_utf8(buffer).expect("utf8");
        assert!(text.starts_with("IDADE,CGC_HOSP,DT_INTER\n"));
        assert!(text.contains("NA,HU,20200502"));
    }
}
