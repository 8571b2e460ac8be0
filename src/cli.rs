use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Normalize, check, and load hospital admission extracts",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Detect the source encoding and write a clean UTF-8 copy plus a repair report
    Normalize(NormalizeArgs),
    /// Run the data-quality rules and print a report
    Analyze(AnalyzeArgs),
    /// Infer a table schema and load the rows into SQLite in batches
    Load(LoadArgs),
    /// Normalize, analyze, and load in one pass
    Run(RunArgs),
}

/// Options shared by every subcommand that reads a source extract.
#[derive(Debug, Args)]
pub struct SourceArgs {
    /// Input extract (any encoding)
    #[arg(short, long)]
    pub input: PathBuf,
    /// YAML configuration file; flags below override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Field delimiter (supports ',', 'tab', ';', '|'); defaults from the extension
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Fallback encodings tried per line, in order (e.g. latin1,windows-1250)
    #[arg(long = "encodings", value_delimiter = ',')]
    pub encodings: Vec<String>,
    /// Pad or truncate rows with the wrong field count instead of failing
    #[arg(long)]
    pub lenient: bool,
}

#[derive(Debug, Args)]
pub struct NormalizeArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// Normalized UTF-8 output (defaults to <input>_utf8.csv)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Encoding repair report (defaults to <input>_encoding_report.txt)
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// Restrict analysis to these hospital codes (overrides the configured list)
    #[arg(long = "only-entities", value_delimiter = ',')]
    pub only_entities: Vec<String>,
    /// YAML mapping of hospital code to display name
    #[arg(long = "entity-names")]
    pub entity_names: Option<PathBuf>,
    /// Also print absent counts for every column
    #[arg(long)]
    pub completeness: bool,
    /// Write findings as JSON to this path
    #[arg(long)]
    pub json: Option<PathBuf>,
    /// Flagged rows listed per rule
    #[arg(long, default_value_t = 20)]
    pub max_rows: usize,
    /// Write the analyzed rows (after cleanup and entity filtering) as UTF-8 CSV
    #[arg(long)]
    pub export: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum StorageMode {
    /// Every non-key column as VARCHAR(width)
    Bounded,
    /// Column types inferred from the data
    Inferred,
}

#[derive(Debug, Args)]
pub struct TargetArgs {
    /// SQLite database file (created when missing)
    #[arg(short, long)]
    pub database: PathBuf,
    /// Destination table (defaults to the sanitized input file stem)
    #[arg(long)]
    pub table: Option<String>,
    /// Rows per transaction
    #[arg(long = "batch-size")]
    pub batch_size: Option<usize>,
    /// Rows sampled when inferring column types (0 means full scan)
    #[arg(long = "sample-rows")]
    pub sample_rows: Option<usize>,
    /// Column storage policy
    #[arg(long, value_enum)]
    pub storage: Option<StorageMode>,
    /// Width of bounded text columns
    #[arg(long)]
    pub width: Option<usize>,
    /// Log of rejected batches (defaults to <database>_load_errors.log)
    #[arg(long = "audit-log")]
    pub audit_log: Option<PathBuf>,
    /// Generated DDL (defaults to <database>_schema.sql)
    #[arg(long)]
    pub ddl: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct LoadArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    #[command(flatten)]
    pub target: TargetArgs,
    /// Normalized UTF-8 output (defaults to <input>_utf8.csv)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Quality report text file (printed to stdout when omitted)
    #[arg(long = "quality-report")]
    pub quality_report: Option<PathBuf>,
    /// YAML mapping of hospital code to display name
    #[arg(long = "entity-names")]
    pub entity_names: Option<PathBuf>,
    /// Write the run summary as JSON to this path
    #[arg(long = "summary-json")]
    pub summary_json: Option<PathBuf>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\\t" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "semicolon" | ";" => Ok(b';'),
        "pipe" | "|" => Ok(b'|'),
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (None, _) => Err("Delimiter cannot be empty".to_string()),
                (Some(_), Some(_)) => Err("Delimiter must be a single character".to_string()),
                (Some(ch), None) if !ch.is_ascii() => Err("Delimiter must be ASCII".to_string()),
                (Some(ch), None) => Ok(ch as u8),
            }
        }
    }
}
