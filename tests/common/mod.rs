#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use encoding_rs::WINDOWS_1252;
use tempfile::{TempDir, tempdir};

pub const HEADER: &str =
    "\"Unnamed: 0\",ANO_CMPT,CGC_HOSP,IDADE,QT_DIARIAS,DT_INTER,DT_SAIDA,DIAG_SECUN,MUNIC_RES";

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Writes `contents` as UTF-8 and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.join(name);
        fs::write(&path, contents).expect("write temp file contents");
        path
    }

    /// Writes `contents` encoded as windows-1252 (the `latin1` label).
    pub fn write_latin1(&self, name: &str, contents: &str) -> PathBuf {
        let (bytes, _, unmappable) = WINDOWS_1252.encode(contents);
        assert!(!unmappable, "fixture must be representable in latin1");
        self.write_bytes(name, &bytes)
    }
}

/// Admission extract with one clean row per index and a handful of
/// deliberate problems:
/// - row 2: age 130 (out of range)
/// - row 3: 400 days of stay (outlier)
/// - row 4: discharge before admission
/// - odd rows: secondary diagnosis missing
pub fn admissions_extract(rows: usize) -> String {
    let mut text = String::from(HEADER);
    text.push('\n');
    for idx in 1..=rows {
        let age = if idx == 2 { 130 } else { 20 + idx % 50 };
        let stay = if idx == 3 { 400 } else { 1 + idx % 10 };
        let (admitted, discharged) = if idx == 4 {
            ("20200510", "20200501")
        } else {
            ("20200501", "20200505")
        };
        let diagnosis = if idx % 2 == 1 { "NA" } else { "J189" };
        let hospital = if idx % 3 == 0 { "0002534" } else { "2816210" };
        text.push_str(&format!(
            "{},2019,{hospital},{age},{stay},{admitted},{discharged},{diagnosis},Aracaju\n",
            idx - 1
        ));
    }
    text
}
