//! I/O helpers shared by the pipeline stages.
//!
//! - **Source reading**: whole-file byte reads mapped to
//!   [`PipelineError::SourceUnreadable`].
//! - **Encoding labels**: resolution via `encoding_rs`, defaulting to UTF-8.
//! - **Delimiters**: extension-based detection (`.tsv` → tab, otherwise comma)
//!   with manual override.
//! - **Artifacts**: UTF-8 text outputs (normalized table, reports, DDL) and the
//!   append-only audit log.

use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Result, anyhow};
use encoding_rs::{Encoding, UTF_8};

use crate::error::{PipelineError, PipelineResult};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub fn read_source(path: &Path) -> PipelineResult<Vec<u8>> {
    fs::read(path).map_err(|source| PipelineError::SourceUnreadable {
        path: path.to_path_buf(),
        source,
    })
}

pub fn read_utf8_source(path: &Path) -> PipelineResult<String> {
    let bytes = read_source(path)?;
    let (text, _, _) = UTF_8.decode(&bytes);
    Ok(text.into_owned())
}

pub fn write_text(path: &Path, contents: &str) -> PipelineResult<()> {
    let output_error = |source| PipelineError::Output {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = BufWriter::new(File::create(path).map_err(output_error)?);
    writer.write_all(contents.as_bytes()).map_err(output_error)?;
    writer.flush().map_err(output_error)
}

pub fn create_output(path: &Path) -> PipelineResult<BufWriter<File>> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|source| PipelineError::Output {
            path: path.to_path_buf(),
            source,
        })
}

/// Appends lines to a plain-text log file, creating it on first use.
#[derive(Debug)]
pub struct AppendLog {
    path: PathBuf,
    file: File,
}

impl AppendLog {
    pub fn open(path: &Path) -> PipelineResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| PipelineError::Output {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn append(&mut self, line: &str) -> PipelineResult<()> {
        writeln!(self.file, "{line}").map_err(|source| PipelineError::Output {
            path: self.path.clone(),
            source,
        })
    }
}

/// Path next to `base` with its extension replaced by `suffix`.
pub fn sibling_path(base: &Path, suffix: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("output");
    base.with_file_name(format!("{stem}{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn latin1_label_resolves_to_windows_1252() {
        let encoding = resolve_encoding(Some("latin1")).expect("label");
        assert_eq!(encoding, encoding_rs::WINDOWS_1252);
        assert_eq!(resolve_encoding(None).expect("default"), UTF_8);
        assert!(resolve_encoding(Some("klingon")).is_err());
    }

    #[test]
    fn delimiter_follows_extension_unless_overridden() {
        assert_eq!(resolve_input_delimiter(Path::new("a.tsv"), None), b'\t');
        assert_eq!(resolve_input_delimiter(Path::new("a.csv"), None), b',');
        assert_eq!(resolve_input_delimiter(Path::new("a.tsv"), Some(b';')), b';');
    }

    #[test]
    fn missing_source_is_unreadable() {
        let dir = tempdir().expect("temp dir");
        let err = read_source(&dir.path().join("absent.csv")).expect_err("missing");
        assert!(matches!(err, PipelineError::SourceUnreadable { .. }));
    }

    #[test]
    fn append_log_accumulates_lines() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("audit.log");
        {
            let mut log = AppendLog::open(&path).expect("open");
            log.append("first").expect("append");
        }
        let mut log = AppendLog::open(&path).expect("reopen");
        log.append("second").expect("append");
        let contents = fs::read_to_string(&path).expect("read log");
        assert_eq!(contents, "first\nsecond\n");
    }

    #[test]
    fn sibling_path_swaps_extension() {
        assert_eq!(
            sibling_path(Path::new("/tmp/SIHAIH.csv"), "_utf8.csv"),
            PathBuf::from("/tmp/SIHAIH_utf8.csv")
        );
    }
}
