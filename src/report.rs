//! Structured log records for scan reports.
//!
//! The scanner set emits machine-readable summaries at shutdown: per-scanner
//! timing and per-recorder feature counts. The [`ReportSink`] trait decouples
//! the core from the report format; [`JsonReportWriter`] is the bundled
//! implementation, writing one JSON object per record class. Drivers with a
//! DFXML writer implement the trait over it instead.

use std::io::{self, Write};

use serde::Serialize;

/// Timing stats for one scanner across the whole scan.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ScannerStatRecord {
    pub name: String,
    /// Total nanoseconds spent inside the scanner's `scan` hook.
    pub ns: u64,
    /// Number of invocations.
    pub calls: u64,
}

/// Feature count for one recorder.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct FeatureCountRecord {
    pub name: String,
    pub count: u64,
}

/// Receiver for end-of-scan summaries.
pub trait ReportSink: Send {
    fn scanner_stats(&mut self, stats: &[ScannerStatRecord]) -> io::Result<()>;
    fn feature_counts(&mut self, counts: &[FeatureCountRecord]) -> io::Result<()>;
}

/// Writes each record class as a single JSON line.
pub struct JsonReportWriter<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> JsonReportWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Consumes the writer, returning the underlying output.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_line(&mut self, value: &impl Serialize) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, value)?;
        writeln!(self.out)
    }
}

impl<W: Write + Send> ReportSink for JsonReportWriter<W> {
    fn scanner_stats(&mut self, stats: &[ScannerStatRecord]) -> io::Result<()> {
        #[derive(Serialize)]
        struct Line<'a> {
            scanner_stats: &'a [ScannerStatRecord],
        }
        self.write_line(&Line { scanner_stats: stats })
    }

    fn feature_counts(&mut self, counts: &[FeatureCountRecord]) -> io::Result<()> {
        #[derive(Serialize)]
        struct Line<'a> {
            feature_files: &'a [FeatureCountRecord],
        }
        self.write_line(&Line { feature_files: counts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_lines_roundtrip() {
        let mut w = JsonReportWriter::new(Vec::new());
        w.scanner_stats(&[ScannerStatRecord { name: "zip".into(), ns: 1200, calls: 3 }]).unwrap();
        w.feature_counts(&[FeatureCountRecord { name: "email".into(), count: 7 }]).unwrap();
        let text = String::from_utf8(w.into_inner()).unwrap();
        let mut lines = text.lines();
        let stats: serde_json::Value = serde_json::from_str(lines.next().unwrap()).unwrap();
        assert_eq!(stats["scanner_stats"][0]["calls"], 3);
        let counts: serde_json::Value = serde_json::from_str(lines.next().unwrap()).unwrap();
        assert_eq!(counts["feature_files"][0]["count"], 7);
    }
}
