//! Plain-text and JSON rendering of analysis and run results.

use std::{collections::BTreeMap, fmt::Write as _, path::Path};

use anyhow::{Context, Result};
use itertools::Itertools;
use serde::Serialize;

use crate::{
    io_utils,
    loader::LoadSummary,
    lookup::EntityLookup,
    quality::{Completeness, QualityReport, RuleOutcome},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportOptions {
    /// Incompleteness percentage above which a warning is printed.
    pub incompleteness_warning: f64,
    /// Flagged rows listed per rule; the rest are only counted.
    pub max_listed_rows: usize,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            incompleteness_warning: 50.0,
            max_listed_rows: 20,
        }
    }
}

/// Aligned text table; numeric cells are right-aligned.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths = headers.iter().map(|h| h.chars().count()).collect::<Vec<_>>();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }
    let mut output = String::new();
    let header = headers.iter().map(|h| h.to_string()).collect::<Vec<_>>();
    push_row(&mut output, &header, &widths);
    let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    push_row(&mut output, &rule, &widths);
    for row in rows {
        push_row(&mut output, row, &widths);
    }
    output
}

fn push_row(output: &mut String, cells: &[String], widths: &[usize]) {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, &width)| {
            let cell = cell.replace(['\n', '\r', '\t'], " ");
            if !cell.is_empty() && cell.parse::<f64>().is_ok() {
                format!("{cell:>width$}")
            } else {
                format!("{cell:<width$}")
            }
        })
        .collect::<Vec<_>>()
        .join("  ");
    let _ = writeln!(output, "{}", line.trim_end());
}

pub fn render_quality_report(
    report: &QualityReport,
    lookup: &dyn EntityLookup,
    options: &ReportOptions,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Quality report over {} row(s)", report.total_rows);
    for finding in &report.findings {
        let _ = writeln!(out);
        let _ = write!(out, "[{}] ", finding.rule);
        match &finding.outcome {
            RuleOutcome::Flagged { rows, percentage } => {
                let _ = writeln!(out, "{} row(s) flagged ({percentage:.2}%)", rows.len());
                if !rows.is_empty() {
                    let listed = rows
                        .iter()
                        .take(options.max_listed_rows)
                        .map(|row| vec![row.row_id.to_string(), row.value.clone()])
                        .collect::<Vec<_>>();
                    out.push_str(&render_table(&["row", "value"], &listed));
                    if rows.len() > listed.len() {
                        let _ = writeln!(out, "... {} more", rows.len() - listed.len());
                    }
                }
            }
            RuleOutcome::Metric {
                absent,
                total,
                percentage,
            } => {
                let _ = write!(out, "{absent}/{total} absent ({percentage:.2}%)");
                if *percentage > options.incompleteness_warning {
                    let _ = write!(
                        out,
                        "  WARNING: above {:.0}%",
                        options.incompleteness_warning
                    );
                }
                let _ = writeln!(out);
            }
            RuleOutcome::Tally { columns } => {
                let _ = writeln!(out, "{} column(s)", columns.len());
                let rows = columns
                    .iter()
                    .map(|tally| {
                        vec![
                            tally.column.clone(),
                            tally.kind.to_string(),
                            tally.absent.to_string(),
                            tally.invalid.to_string(),
                        ]
                    })
                    .collect::<Vec<_>>();
                out.push_str(&render_table(&["column", "kind", "absent", "invalid"], &rows));
            }
            RuleOutcome::Volume { entities } => {
                let low = entities.iter().filter(|e| e.low_volume).count();
                let _ = writeln!(out, "{} entit(ies), {low} below minimum volume", entities.len());
                let rows = entities
                    .iter()
                    .map(|entity| {
                        vec![
                            lookup.label(&entity.entity),
                            entity.count.to_string(),
                            if entity.low_volume { "LOW" } else { "ok" }.to_string(),
                        ]
                    })
                    .collect::<Vec<_>>();
                out.push_str(&render_table(&["entity", "rows", "volume"], &rows));
            }
            RuleOutcome::Timeliness {
                years,
                oldest,
                stale,
            } => match oldest {
                Some(oldest) => {
                    let _ = writeln!(
                        out,
                        "years {}; oldest {oldest}{}",
                        years.iter().join(", "),
                        if *stale { " (outdated)" } else { "" }
                    );
                }
                None => {
                    let _ = writeln!(out, "no parseable years");
                }
            },
            RuleOutcome::NotApplicable { missing_columns } => {
                let _ = writeln!(
                    out,
                    "not applicable: missing column(s) {}",
                    missing_columns.join(", ")
                );
            }
        }
    }
    out
}

pub fn render_completeness(entries: &[Completeness]) -> String {
    let rows = entries
        .iter()
        .map(|entry| {
            vec![
                entry.column.clone(),
                entry.absent.to_string(),
                format!("{:.2}", entry.percentage),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&["column", "absent", "percent"], &rows)
}

/// Outcome of one invocation, printed and logged at the end of every run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub rows_processed: usize,
    pub encoding: Option<String>,
    pub problematic_lines: usize,
    pub flagged_per_rule: BTreeMap<String, usize>,
    pub load: Option<LoadSummary>,
}

impl RunSummary {
    pub fn record_quality(&mut self, report: &QualityReport) {
        for finding in &report.findings {
            if let Some(count) = finding.flagged_rows() {
                self.flagged_per_rule.insert(finding.rule.clone(), count);
            }
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Rows processed: {}", self.rows_processed);
        if let Some(encoding) = &self.encoding {
            let _ = writeln!(
                out,
                "Source encoding: {encoding} ({} problematic line(s))",
                self.problematic_lines
            );
        }
        for (rule, count) in &self.flagged_per_rule {
            let _ = writeln!(out, "Flagged by {rule}: {count}");
        }
        if let Some(load) = &self.load {
            let _ = writeln!(
                out,
                "Loaded into '{}': {} row(s) committed, {} row(s) in {} failed batch(es)",
                load.table, load.rows_committed, load.rows_failed, load.batches_failed
            );
            if let Some(reason) = &load.halted {
                let _ = writeln!(
                    out,
                    "Load halted ({reason}): {} row(s) not attempted",
                    load.rows_unprocessed()
                );
            }
        }
        out
    }
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Serializing report")?;
    io_utils::write_text(path, &json)
        .with_context(|| format!("Writing JSON report to {path:?}"))?;
    Ok(())
}
