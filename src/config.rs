//! Run configuration.
//!
//! A [`PipelineConfig`] is built once per invocation (defaults, then an
//! optional YAML file, then command-line overrides) and passed by reference
//! to every stage.

use std::{fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::io_utils;

pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_SAMPLE_ROWS: usize = 2000;
pub const DEFAULT_IDENTIFIER: &str = "identificador";
pub const DEFAULT_TEXT_WIDTH: usize = 255;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Encoding labels tried per line after the detected encoding.
    pub encodings: Vec<String>,
    pub identifier_column: String,
    /// Columns dropped before analysis (spreadsheet index artefacts).
    pub drop_columns: Vec<String>,
    pub lenient: bool,
    pub rules: RuleConfig,
    pub load: LoadConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            encodings: vec![
                "utf-8".to_string(),
                "latin1".to_string(),
                "windows-1250".to_string(),
            ],
            identifier_column: DEFAULT_IDENTIFIER.to_string(),
            drop_columns: vec!["Unnamed: 0".to_string()],
            lenient: false,
            rules: RuleConfig::default(),
            load: LoadConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuleConfig {
    pub age_column: String,
    pub age_min: f64,
    pub age_max: f64,
    pub stay_column: String,
    pub stay_max: f64,
    pub incompleteness_columns: Vec<String>,
    pub admission_column: String,
    pub discharge_column: String,
    pub hospital_column: String,
    pub hospitals: Vec<String>,
    pub minimum_volume: usize,
    pub year_column: String,
    pub minimum_year: i32,
    /// Incompleteness percentage above which a column is called out.
    pub incompleteness_warning: f64,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            age_column: "IDADE".to_string(),
            age_min: 0.0,
            age_max: 120.0,
            stay_column: "QT_DIARIAS".to_string(),
            stay_max: 365.0,
            incompleteness_columns: vec!["DIAG_SECUN".to_string()],
            admission_column: "DT_INTER".to_string(),
            discharge_column: "DT_SAIDA".to_string(),
            hospital_column: "CGC_HOSP".to_string(),
            hospitals: Vec::new(),
            minimum_volume: 100,
            year_column: "ANO_CMPT".to_string(),
            minimum_year: 2010,
            incompleteness_warning: 50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoadConfig {
    pub batch_size: usize,
    pub sample_rows: usize,
    pub table_name: Option<String>,
    pub storage: ColumnStorage,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            sample_rows: DEFAULT_SAMPLE_ROWS,
            table_name: None,
            storage: ColumnStorage::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ColumnStorage {
    BoundedText { width: usize },
    Inferred,
}

impl Default for ColumnStorage {
    fn default() -> Self {
        ColumnStorage::BoundedText {
            width: DEFAULT_TEXT_WIDTH,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config {path:?}"))?;
        let config: PipelineConfig = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing config {path:?}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Serializing config")
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.load.batch_size > 0, "Batch size must be positive");
        ensure!(
            self.rules.age_min <= self.rules.age_max,
            "Age range minimum ({}) exceeds maximum ({})",
            self.rules.age_min,
            self.rules.age_max
        );
        ensure!(
            !self.identifier_column.trim().is_empty(),
            "Identifier column name cannot be empty"
        );
        if let ColumnStorage::BoundedText { width } = self.load.storage {
            ensure!(width > 0, "Bounded text width must be positive");
        }
        for label in &self.encodings {
            io_utils::resolve_encoding(Some(label))?;
        }
        Ok(())
    }
}
