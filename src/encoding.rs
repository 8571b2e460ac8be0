//! Encoding detection and line-level repair.
//!
//! The resolver turns raw bytes of any encoding into UTF-8 text with the same
//! number of lines:
//!
//! - **Detection**: a statistical detector (`chardetng` by default) proposes
//!   the most likely encoding for the whole stream.
//! - **Validation**: the proposal (then UTF-8) is accepted when the complete
//!   stream decodes without replacement and re-encodes to identical bytes.
//! - **Repair**: otherwise every line is decoded on its own, trying the
//!   detected encoding and then the configured fallbacks in order. A legacy
//!   guess for a stream that also holds valid multi-byte UTF-8 lines puts
//!   UTF-8 first instead. Lines no candidate can round-trip are decoded with
//!   replacement characters and reported as problematic.
//! - **Sanitizing**: control characters other than tab are stripped from
//!   every line.

use std::{fmt::Write as _, path::Path};

use chardetng::EncodingDetector as ChardetEngine;
use encoding_rs::{Encoding, UTF_8};
use log::{debug, info, warn};

use crate::{
    error::{PipelineError, PipelineResult},
    io_utils,
};

/// Best guess of a statistical detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub encoding: &'static Encoding,
    pub confident: bool,
}

/// Source of the stream-level encoding guess.
pub trait Detector: Send + Sync {
    fn detect(&self, bytes: &[u8]) -> Option<Detection>;
}

/// Byte-frequency detector backed by `chardetng`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChardetDetector;

impl Detector for ChardetDetector {
    fn detect(&self, bytes: &[u8]) -> Option<Detection> {
        if bytes.is_empty() {
            return None;
        }
        let mut engine = ChardetEngine::new();
        engine.feed(bytes, true);
        let (encoding, confident) = engine.guess_assess(None, true);
        Some(Detection {
            encoding,
            confident,
        })
    }
}

/// Detector that always answers with a fixed encoding.
#[derive(Debug, Clone, Copy)]
pub struct FixedDetector(pub &'static Encoding);

impl Detector for FixedDetector {
    fn detect(&self, bytes: &[u8]) -> Option<Detection> {
        (!bytes.is_empty()).then_some(Detection {
            encoding: self.0,
            confident: true,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingCandidate {
    pub encoding: &'static Encoding,
    pub round_trips: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairedLine {
    pub line_number: usize,
    pub encoding: &'static Encoding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProblemLine {
    pub line_number: usize,
    pub encoding: &'static Encoding,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub total_lines: usize,
    pub repaired: Vec<RepairedLine>,
    pub problematic: Vec<ProblemLine>,
    pub control_chars_removed: usize,
}

impl RepairReport {
    pub fn problematic_line_numbers(&self) -> Vec<usize> {
        self.problematic.iter().map(|line| line.line_number).collect()
    }

    /// Plain-text rendering written next to the normalized output.
    pub fn render(&self, encoding: &'static Encoding) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Encoding repair report");
        let _ = writeln!(out, "{}", "-".repeat(50));
        let _ = writeln!(out, "Resolved encoding: {}", encoding.name());
        let _ = writeln!(out, "Total lines processed: {}", self.total_lines);
        let _ = writeln!(out, "Problematic lines: {}", self.problematic.len());
        let _ = writeln!(out, "Repaired lines: {}", self.repaired.len());
        let _ = writeln!(
            out,
            "Control characters removed: {}",
            self.control_chars_removed
        );
        let _ = writeln!(out, "{}", "-".repeat(50));
        for line in &self.repaired {
            let _ = writeln!(
                out,
                "Line {}: repaired as {}",
                line.line_number,
                line.encoding.name()
            );
        }
        for line in &self.problematic {
            let _ = writeln!(
                out,
                "Line {}: substituted under {}",
                line.line_number,
                line.encoding.name()
            );
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedText {
    pub encoding: &'static Encoding,
    /// Whether the whole stream round-tripped under `encoding`.
    pub lossless: bool,
    pub candidates: Vec<EncodingCandidate>,
    pub text: String,
    pub report: RepairReport,
}

impl ResolvedText {
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.text.lines()
    }
}

pub struct EncodingResolver {
    fallbacks: Vec<&'static Encoding>,
    detector: Box<dyn Detector>,
}

impl EncodingResolver {
    pub fn new(fallbacks: Vec<&'static Encoding>) -> Self {
        Self {
            fallbacks,
            detector: Box::new(ChardetDetector),
        }
    }

    /// Resolves the fallback list from encoding labels such as `latin1`.
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> PipelineResult<Self> {
        let fallbacks = labels
            .iter()
            .map(|label| {
                io_utils::resolve_encoding(Some(label.as_ref()))
                    .map_err(|err| PipelineError::Config(err.to_string()))
            })
            .collect::<PipelineResult<Vec<_>>>()?;
        Ok(Self::new(fallbacks))
    }

    pub fn with_detector(mut self, detector: Box<dyn Detector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn resolve_path(&self, path: &Path) -> PipelineResult<ResolvedText> {
        let bytes = io_utils::read_source(path)?;
        info!("Read {} byte(s) from {:?}", bytes.len(), path);
        self.resolve(&bytes)
    }

    pub fn resolve(&self, bytes: &[u8]) -> PipelineResult<ResolvedText> {
        if let Some((bom_encoding, bom_len)) = Encoding::for_bom(bytes)
            && bom_encoding != UTF_8
        {
            return Ok(self.resolve_wide(&bytes[bom_len..], bom_encoding));
        }
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);

        let detection = self
            .detector
            .detect(bytes)
            .ok_or(PipelineError::EncodingUndetected { bytes: bytes.len() })?;
        debug!(
            "Detector proposed {} (confident: {})",
            detection.encoding.name(),
            detection.confident
        );

        // A single-byte guess always round-trips, turning UTF-8 lines into mojibake.
        let mixed = detection.encoding != UTF_8 && has_utf8_multibyte_line(bytes);
        let mut candidates = Vec::new();
        let mut stream_order = vec![detection.encoding];
        if detection.encoding != UTF_8 {
            stream_order.push(UTF_8);
        }
        for encoding in stream_order {
            let decoded = round_trip(bytes, encoding);
            candidates.push(EncodingCandidate {
                encoding,
                round_trips: decoded.is_some(),
            });
            if mixed && encoding == detection.encoding {
                continue;
            }
            if let Some(text) = decoded {
                info!("Input round-trips cleanly as {}", encoding.name());
                let (lines, report) = sanitize_lines(split_lines(&text).map(str::to_string));
                return Ok(ResolvedText {
                    encoding,
                    lossless: true,
                    candidates,
                    text: join_lines(lines, bytes.ends_with(b"\n")),
                    report,
                });
            }
        }

        let primary = if mixed { UTF_8 } else { detection.encoding };
        if mixed {
            warn!(
                "Input mixes UTF-8 lines with {}; repairing line by line",
                detection.encoding.name()
            );
        } else {
            warn!(
                "Input does not round-trip as {}; repairing line by line",
                detection.encoding.name()
            );
        }
        let order = self.line_candidates(primary, detection.encoding);
        let mut repaired = Vec::new();
        let mut problematic = Vec::new();
        let mut decoded_lines = Vec::new();
        for (idx, line) in split_byte_lines(bytes).enumerate() {
            let line_number = idx + 1;
            let mut resolved = None;
            for &encoding in &order {
                if let Some(text) = round_trip(line, encoding) {
                    resolved = Some((encoding, text));
                    break;
                }
            }
            match resolved {
                Some((encoding, text)) => {
                    if encoding != primary {
                        repaired.push(RepairedLine {
                            line_number,
                            encoding,
                        });
                    }
                    decoded_lines.push(text);
                }
                None => {
                    let (text, _) = primary.decode_without_bom_handling(line);
                    problematic.push(ProblemLine {
                        line_number,
                        encoding: primary,
                    });
                    decoded_lines.push(text.into_owned());
                }
            }
        }
        let (lines, mut report) = sanitize_lines(decoded_lines.into_iter());
        report.repaired = repaired;
        report.problematic = problematic;
        info!(
            "Repaired {} line(s); {} line(s) remain problematic",
            report.repaired.len(),
            report.problematic.len()
        );
        Ok(ResolvedText {
            encoding: primary,
            lossless: false,
            candidates,
            text: join_lines(lines, bytes.ends_with(b"\n")),
            report,
        })
    }

    fn line_candidates(
        &self,
        primary: &'static Encoding,
        detected: &'static Encoding,
    ) -> Vec<&'static Encoding> {
        let mut order = vec![primary];
        for &encoding in [detected, UTF_8].iter().chain(self.fallbacks.iter()) {
            if !order.contains(&encoding) {
                order.push(encoding);
            }
        }
        order
    }

    /// UTF-16 input announced by a BOM cannot be split on raw newline bytes,
    /// so it is decoded as a whole and lines carrying replacements are flagged.
    fn resolve_wide(&self, bytes: &[u8], encoding: &'static Encoding) -> ResolvedText {
        let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
        let raw_lines = split_lines(&text).map(str::to_string).collect::<Vec<_>>();
        let problematic = raw_lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line.contains('\u{FFFD}'))
            .map(|(idx, _)| ProblemLine {
                line_number: idx + 1,
                encoding,
            })
            .collect();
        let (lines, mut report) = sanitize_lines(raw_lines.into_iter());
        report.problematic = problematic;
        ResolvedText {
            encoding,
            lossless: !had_errors,
            candidates: vec![EncodingCandidate {
                encoding,
                round_trips: !had_errors,
            }],
            text: join_lines(lines, text.ends_with('\n')),
            report,
        }
    }
}

impl Default for EncodingResolver {
    fn default() -> Self {
        Self::new(vec![UTF_8, encoding_rs::WINDOWS_1252, encoding_rs::WINDOWS_1250])
    }
}

fn has_utf8_multibyte_line(bytes: &[u8]) -> bool {
    split_byte_lines(bytes).any(|line| !line.is_ascii() && std::str::from_utf8(line).is_ok())
}

/// Decodes without replacement and checks that re-encoding yields `bytes`.
fn round_trip(bytes: &[u8], encoding: &'static Encoding) -> Option<String> {
    let text = encoding.decode_without_bom_handling_and_without_replacement(bytes)?;
    let (encoded, used, unmappable) = encoding.encode(&text);
    if unmappable || used != encoding || encoded.as_ref() != bytes {
        return None;
    }
    Some(text.into_owned())
}

fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    let body = text.strip_suffix('\n').unwrap_or(text);
    let empty = body.is_empty() && text.is_empty();
    body.split('\n').filter(move |_| !empty)
}

fn split_byte_lines(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
    let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    let empty = bytes.is_empty();
    body.split(|b| *b == b'\n').filter(move |_| !empty)
}

fn sanitize_lines<I>(lines: I) -> (Vec<String>, RepairReport)
where
    I: Iterator<Item = String>,
{
    let mut report = RepairReport::default();
    let cleaned = lines
        .map(|line| {
            report.total_lines += 1;
            let before = line.chars().count();
            let kept = strip_control_chars(&line);
            report.control_chars_removed += before - kept.chars().count();
            kept
        })
        .collect();
    (cleaned, report)
}

/// Removes control characters except tab, which separates fields in TSV input.
pub fn strip_control_chars(line: &str) -> String {
    line.chars().filter(|c| *c == '\t' || !c.is_control()).collect()
}

fn join_lines(lines: Vec<String>, trailing_newline: bool) -> String {
    let mut text = lines.join("\n");
    if trailing_newline && !lines.is_empty() {
        text.push('\n');
    }
    text
}
