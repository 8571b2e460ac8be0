//! Per-column type profiling.
//!
//! A [`ColumnTypeProfile`] counts how many cells of a column parse under each
//! semantic kind. Analyzer rules read the dominant kind from it and the
//! schema loader reads the lossless kind.

use serde::Serialize;

use crate::data::{Value, ValueKind};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColumnTypeProfile {
    pub total: usize,
    pub missing: usize,
    pub integer: usize,
    pub decimal: usize,
    pub date: usize,
    pub text: usize,
    pub max_text_len: usize,
    pub invalid: usize,
    dominant: Option<ValueKind>,
}

impl ColumnTypeProfile {
    /// Profiles the given cells. `invalid` counts present cells that do not
    /// parse into the dominant kind.
    pub fn from_cells<'a, I>(cells: I) -> Self
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let mut profile = Self::default();
        let mut present = Vec::new();
        for cell in cells {
            profile.total += 1;
            if cell.is_absent() {
                profile.missing += 1;
                continue;
            }
            profile.observe(cell);
            present.push(cell);
        }
        let dominant = profile.majority_kind();
        profile.dominant = Some(dominant);
        if dominant != ValueKind::Text {
            profile.invalid = present
                .iter()
                .filter(|cell| !cell.conforms_to(dominant))
                .count();
        }
        profile
    }

    fn observe(&mut self, cell: &Value) {
        self.text += 1;
        self.max_text_len = self.max_text_len.max(cell.as_display().chars().count());
        if cell.conforms_to(ValueKind::Integer) {
            self.integer += 1;
        }
        if cell.conforms_to(ValueKind::Decimal) {
            self.decimal += 1;
        }
        if cell.conforms_to(ValueKind::Date) {
            self.date += 1;
        }
    }

    pub fn present(&self) -> usize {
        self.total - self.missing
    }

    fn majority(&self, count: usize) -> bool {
        count > 0 && count * 2 > self.present()
    }

    fn majority_kind(&self) -> ValueKind {
        if self.present() == 0 {
            ValueKind::Text
        } else if self.majority(self.date) {
            ValueKind::Date
        } else if self.majority(self.integer) {
            ValueKind::Integer
        } else if self.majority(self.decimal) {
            ValueKind::Decimal
        } else {
            ValueKind::Text
        }
    }

    /// Kind parsed by more than half of the present cells, `Text` otherwise.
    /// Dates win over integers so compact `YYYYMMDD` columns read as dates.
    pub fn dominant(&self) -> ValueKind {
        self.dominant.unwrap_or(ValueKind::Text)
    }

    /// Most specific kind every present cell parses into without loss.
    pub fn lossless(&self) -> ValueKind {
        let present = self.present();
        if present == 0 {
            ValueKind::Text
        } else if self.date == present {
            ValueKind::Date
        } else if self.integer == present {
            ValueKind::Integer
        } else if self.decimal == present {
            ValueKind::Decimal
        } else {
            ValueKind::Text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(raw: &[&str]) -> Vec<Value> {
        raw.iter().map(|value| Value::from_raw(value)).collect()
    }

    #[test]
    fn integer_column_is_lossless_integer() {
        let values = cells(&["1", "2", "NA", "30"]);
        let profile = ColumnTypeProfile::from_cells(&values);
        assert_eq!(profile.total, 4);
        assert_eq!(profile.missing, 1);
        assert_eq!(profile.integer, 3);
        assert_eq!(profile.lossless(), ValueKind::Integer);
        assert_eq!(profile.dominant(), ValueKind::Integer);
        assert_eq!(profile.invalid, 0);
    }

    #[test]
    fn mixed_column_counts_invalid_against_majority() {
        let values = cells(&["10", "11", "x", "12", ""]);
        let profile = ColumnTypeProfile::from_cells(&values);
        assert_eq!(profile.dominant(), ValueKind::Integer);
        assert_eq!(profile.lossless(), ValueKind::Text);
        assert_eq!(profile.invalid, 1);
        assert_eq!(profile.missing, 1);
    }

    #[test]
    fn decimals_promote_integers() {
        let values = cells(&["1", "2.5", "3.25"]);
        let profile = ColumnTypeProfile::from_cells(&values);
        assert_eq!(profile.lossless(), ValueKind::Decimal);
        assert_eq!(profile.dominant(), ValueKind::Decimal);
    }

    #[test]
    fn text_column_has_no_invalid_cells() {
        let values = cells(&["HUSE", "HU-UFS", "Cirurgia"]);
        let profile = ColumnTypeProfile::from_cells(&values);
        assert_eq!(profile.dominant(), ValueKind::Text);
        assert_eq!(profile.invalid, 0);
        assert_eq!(profile.max_text_len, 8);
    }

    #[test]
    fn compact_dates_are_not_integers() {
        let values = cells(&["20200501", "20191231", "NA"]);
        let profile = ColumnTypeProfile::from_cells(&values);
        assert_eq!(profile.integer, 2);
        assert_eq!(profile.lossless(), ValueKind::Date);
        assert_eq!(profile.dominant(), ValueKind::Date);
    }

    #[test]
    fn empty_column_defaults_to_text() {
        let profile = ColumnTypeProfile::from_cells(&Vec::<Value>::new());
        assert_eq!(profile.present(), 0);
        assert_eq!(profile.lossless(), ValueKind::Text);
    }
}
