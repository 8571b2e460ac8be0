//! Rule-based data-quality checks.
//!
//! Each [`Rule`] reads a [`TabularDataset`] without mutating it and yields one
//! [`QualityFinding`]. Rules share no state, so [`QualityAnalyzer`] evaluates
//! them on the rayon pool; results come back in registry order. A rule whose
//! columns are absent reports [`RuleOutcome::NotApplicable`] instead of an
//! empty finding.

use itertools::Itertools;
use log::{debug, info};
use rayon::prelude::*;
use serde::Serialize;

use crate::{
    config::RuleConfig,
    data::{Value, ValueKind},
    dataset::TabularDataset,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Rule {
    /// Numeric values outside `[min, max]` are noise.
    Range { column: String, min: f64, max: f64 },
    /// Numeric values strictly above `threshold` are outliers.
    UpperBound { column: String, threshold: f64 },
    Incompleteness { column: String },
    /// `later` must not precede `earlier`.
    TemporalOrder { later: String, earlier: String },
    TypeTally,
    EntityVolume {
        column: String,
        entities: Vec<String>,
        minimum: usize,
    },
    Timeliness { column: String, minimum_year: i32 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlaggedRow {
    pub row_id: i64,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnTally {
    pub column: String,
    pub kind: ValueKind,
    pub absent: usize,
    /// Present cells that do not parse as `kind`; zero for text columns.
    pub invalid: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityVolume {
    pub entity: String,
    pub count: usize,
    pub low_volume: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RuleOutcome {
    Flagged {
        rows: Vec<FlaggedRow>,
        percentage: f64,
    },
    Metric {
        absent: usize,
        total: usize,
        percentage: f64,
    },
    Tally { columns: Vec<ColumnTally> },
    Volume { entities: Vec<EntityVolume> },
    Timeliness {
        years: Vec<i32>,
        oldest: Option<i32>,
        stale: bool,
    },
    NotApplicable { missing_columns: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityFinding {
    pub rule: String,
    pub outcome: RuleOutcome,
}

impl QualityFinding {
    pub fn is_applicable(&self) -> bool {
        !matches!(self.outcome, RuleOutcome::NotApplicable { .. })
    }

    /// Rows flagged by row-level rules; `None` for scalar and tally rules.
    pub fn flagged_rows(&self) -> Option<usize> {
        match &self.outcome {
            RuleOutcome::Flagged { rows, .. } => Some(rows.len()),
            _ => None,
        }
    }

    pub fn has_warnings(&self) -> bool {
        match &self.outcome {
            RuleOutcome::Flagged { rows, .. } => !rows.is_empty(),
            RuleOutcome::Volume { entities } => entities.iter().any(|e| e.low_volume),
            RuleOutcome::Timeliness { stale, .. } => *stale,
            RuleOutcome::Tally { columns } => columns.iter().any(|c| c.invalid > 0),
            RuleOutcome::Metric { .. } | RuleOutcome::NotApplicable { .. } => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub total_rows: usize,
    pub findings: Vec<QualityFinding>,
}

impl QualityReport {
    pub fn finding(&self, rule: &str) -> Option<&QualityFinding> {
        self.findings.iter().find(|finding| finding.rule == rule)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completeness {
    pub column: String,
    pub absent: usize,
    pub percentage: f64,
}

impl Rule {
    pub fn id(&self) -> String {
        match self {
            Rule::Range { column, .. } => format!("range:{column}"),
            Rule::UpperBound { column, .. } => format!("upper_bound:{column}"),
            Rule::Incompleteness { column } => format!("incompleteness:{column}"),
            Rule::TemporalOrder { later, earlier } => {
                format!("temporal_order:{later}>={earlier}")
            }
            Rule::TypeTally => "type_tally".to_string(),
            Rule::EntityVolume { column, .. } => format!("entity_volume:{column}"),
            Rule::Timeliness { column, .. } => format!("timeliness:{column}"),
        }
    }

    fn required_columns(&self) -> Vec<&str> {
        match self {
            Rule::Range { column, .. }
            | Rule::UpperBound { column, .. }
            | Rule::Incompleteness { column }
            | Rule::EntityVolume { column, .. }
            | Rule::Timeliness { column, .. } => vec![column.as_str()],
            Rule::TemporalOrder { later, earlier } => vec![later.as_str(), earlier.as_str()],
            Rule::TypeTally => Vec::new(),
        }
    }

    pub fn evaluate(&self, dataset: &TabularDataset) -> QualityFinding {
        let missing_columns = self
            .required_columns()
            .into_iter()
            .filter(|column| dataset.column_index(column).is_none())
            .map(str::to_string)
            .collect::<Vec<_>>();
        let outcome = if missing_columns.is_empty() {
            self.evaluate_present(dataset)
        } else {
            debug!("Rule {} not applicable: missing {:?}", self.id(), missing_columns);
            RuleOutcome::NotApplicable { missing_columns }
        };
        QualityFinding {
            rule: self.id(),
            outcome,
        }
    }

    fn evaluate_present(&self, dataset: &TabularDataset) -> RuleOutcome {
        match self {
            Rule::Range { column, min, max } => {
                flag_numeric(dataset, column, |value| value < *min || value > *max)
            }
            Rule::UpperBound { column, threshold } => {
                flag_numeric(dataset, column, |value| value > *threshold)
            }
            Rule::Incompleteness { column } => {
                let (absent, total, percentage) = incompleteness(dataset, column);
                RuleOutcome::Metric {
                    absent,
                    total,
                    percentage,
                }
            }
            Rule::TemporalOrder { later, earlier } => temporal_order(dataset, later, earlier),
            Rule::TypeTally => RuleOutcome::Tally {
                columns: type_tally(dataset),
            },
            Rule::EntityVolume {
                column,
                entities,
                minimum,
            } => RuleOutcome::Volume {
                entities: entity_volume(dataset, column, entities, *minimum),
            },
            Rule::Timeliness {
                column,
                minimum_year,
            } => timeliness(dataset, column, *minimum_year),
        }
    }
}

fn column_cells<'a>(dataset: &'a TabularDataset, column: &str) -> Vec<&'a Value> {
    dataset
        .column_values(column)
        .map(Iterator::collect)
        .unwrap_or_default()
}

fn percentage_of(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

fn flag_numeric<F>(dataset: &TabularDataset, column: &str, violates: F) -> RuleOutcome
where
    F: Fn(f64) -> bool,
{
    let rows = column_cells(dataset, column)
        .into_iter()
        .enumerate()
        .filter_map(|(idx, cell)| {
            let numeric = cell.coerce(ValueKind::Decimal);
            let value = numeric.as_f64()?;
            violates(value).then(|| FlaggedRow {
                row_id: dataset.row_id(idx),
                value: numeric.as_display(),
            })
        })
        .collect::<Vec<_>>();
    let percentage = percentage_of(rows.len(), dataset.row_count());
    RuleOutcome::Flagged { rows, percentage }
}

fn incompleteness(dataset: &TabularDataset, column: &str) -> (usize, usize, f64) {
    let total = dataset.row_count();
    let absent = column_cells(dataset, column)
        .into_iter()
        .filter(|cell| cell.is_absent())
        .count();
    (absent, total, percentage_of(absent, total))
}

fn temporal_order(dataset: &TabularDataset, later: &str, earlier: &str) -> RuleOutcome {
    let later_cells = column_cells(dataset, later);
    let earlier_cells = column_cells(dataset, earlier);
    let rows = later_cells
        .iter()
        .zip(earlier_cells.iter())
        .enumerate()
        .filter_map(|(idx, (later_cell, earlier_cell))| {
            let later_date = later_cell.coerce(ValueKind::Date).as_date()?;
            let earlier_date = earlier_cell.coerce(ValueKind::Date).as_date()?;
            (later_date < earlier_date).then(|| FlaggedRow {
                row_id: dataset.row_id(idx),
                value: format!(
                    "{} < {}",
                    later_date.format("%Y-%m-%d"),
                    earlier_date.format("%Y-%m-%d")
                ),
            })
        })
        .collect::<Vec<_>>();
    let percentage = percentage_of(rows.len(), dataset.row_count());
    RuleOutcome::Flagged { rows, percentage }
}

fn type_tally(dataset: &TabularDataset) -> Vec<ColumnTally> {
    dataset
        .columns()
        .par_iter()
        .filter_map(|column| {
            let profile = dataset.profile(column).ok()?;
            let kind = profile.dominant();
            Some(ColumnTally {
                column: column.clone(),
                kind,
                absent: profile.missing,
                invalid: if kind == ValueKind::Text {
                    0
                } else {
                    profile.invalid
                },
            })
        })
        .collect()
}

fn entity_volume(
    dataset: &TabularDataset,
    column: &str,
    entities: &[String],
    minimum: usize,
) -> Vec<EntityVolume> {
    let counts = column_cells(dataset, column)
        .into_iter()
        .map(|cell| cell.as_display().trim().to_string())
        .filter(|key| !key.is_empty())
        .counts();
    let targets = if entities.is_empty() {
        counts.keys().cloned().sorted().collect::<Vec<_>>()
    } else {
        entities.to_vec()
    };
    targets
        .into_iter()
        .map(|entity| {
            let count = counts.get(&entity).copied().unwrap_or(0);
            EntityVolume {
                low_volume: count < minimum,
                entity,
                count,
            }
        })
        .collect()
}

fn timeliness(dataset: &TabularDataset, column: &str, minimum_year: i32) -> RuleOutcome {
    let years = column_cells(dataset, column)
        .into_iter()
        // Float-formatted years such as `2019.0` count.
        .filter_map(|cell| match cell.coerce(ValueKind::Decimal).coerce(ValueKind::Integer) {
            Value::Integer(year) => i32::try_from(year).ok(),
            _ => None,
        })
        .sorted_unstable()
        .dedup()
        .collect::<Vec<_>>();
    let oldest = years.first().copied();
    RuleOutcome::Timeliness {
        stale: oldest.is_some_and(|year| year < minimum_year),
        oldest,
        years,
    }
}

/// Absent count and percentage for every column.
pub fn completeness_report(dataset: &TabularDataset) -> Vec<Completeness> {
    dataset
        .columns()
        .iter()
        .map(|column| {
            let (absent, _, percentage) = incompleteness(dataset, column);
            Completeness {
                column: column.clone(),
                absent,
                percentage,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct QualityAnalyzer {
    rules: Vec<Rule>,
}

impl QualityAnalyzer {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// The admission-record battery: age noise, stay outliers, incompleteness,
    /// discharge/admission order, type tally, hospital volume, timeliness.
    pub fn from_config(config: &RuleConfig) -> Self {
        let mut rules = vec![
            Rule::Range {
                column: config.age_column.clone(),
                min: config.age_min,
                max: config.age_max,
            },
            Rule::UpperBound {
                column: config.stay_column.clone(),
                threshold: config.stay_max,
            },
        ];
        rules.extend(
            config
                .incompleteness_columns
                .iter()
                .map(|column| Rule::Incompleteness {
                    column: column.clone(),
                }),
        );
        rules.extend([
            Rule::TemporalOrder {
                later: config.discharge_column.clone(),
                earlier: config.admission_column.clone(),
            },
            Rule::TypeTally,
            Rule::EntityVolume {
                column: config.hospital_column.clone(),
                entities: config.hospitals.clone(),
                minimum: config.minimum_volume,
            },
            Rule::Timeliness {
                column: config.year_column.clone(),
                minimum_year: config.minimum_year,
            },
        ]);
        Self::new(rules)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn analyze(&self, dataset: &TabularDataset) -> QualityReport {
        let findings = self
            .rules
            .par_iter()
            .map(|rule| rule.evaluate(dataset))
            .collect::<Vec<_>>();
        info!(
            "Evaluated {} rule(s) over {} row(s)",
            findings.len(),
            dataset.row_count()
        );
        QualityReport {
            total_rows: dataset.row_count(),
            findings,
        }
    }
}
