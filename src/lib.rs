//! Forensic scanning core with bounded buffer views and explicit provenance.
//!
//! The crate is the engine room of a digital-forensics scanner: opaque
//! binary inputs are wrapped in bounded, position-tagged buffer views and
//! dispatched through a set of registered content scanners, which record
//! what they find — with full positional provenance — into named feature
//! recorders. Scanners that decode embedded content (archives, hibernation
//! files, encodings) feed the decoded bytes back in as child buffers, so a
//! feature's position reads like a story: `1000-HIBER-33423-ZIP-9`.
//!
//! High-level flow (single buffer):
//! 1) Wrap the bytes in an [`SBuf`] with their [`Pos0`].
//! 2) `process_sbuf` gates the buffer (depth cap, ngram suppression,
//!    seen-before dedup) and calls each enabled scanner.
//! 3) Scanners write features through [`FeatureRecorder`]s: quoting,
//!    stop-list routing, histogram tallies, optional carving.
//! 4) Recursive scanners hand decoded children back to step 2.
//!
//! Lifecycle: a [`ScannerSet`] moves `INIT → ENABLED → SCAN → SHUTDOWN`;
//! scanners register in INIT, enable/disable commands resolve into ENABLED,
//! buffers flow in SCAN, and histograms materialize at SHUTDOWN.

pub mod config;
pub mod errors;
pub mod hasher;
pub mod histogram;
pub mod pos0;
pub mod recorder;
pub mod recorder_set;
pub mod report;
pub mod sbuf;
pub mod scanner;
pub mod scanner_set;
pub mod stdx;
pub mod stoplist;

pub use config::{Command, DebugFlags, ScannerCommand, ScannerConfig, NO_INPUT, NO_OUTDIR};
pub use errors::{RecorderError, SbufError, ScanError, ScannerSetError};
pub use hasher::Hasher;
pub use histogram::{FeatureHistogram, HistogramDef, HistogramEntry, HistogramFlags};
pub use pos0::Pos0;
pub use recorder::{
    unquote_string, valid_dosname, validate_or_escape_utf8, CarveMode, CarveOutcome,
    FeatureRecorder, FeatureRecorderDef, RecorderFlags,
};
pub use recorder_set::{
    FeatureRecorderSet, RecorderSetFlags, ALERT_RECORDER_NAME, STOPPED_RECORDER_NAME,
};
pub use report::{FeatureCountRecord, JsonReportWriter, ReportSink, ScannerStatRecord};
pub use sbuf::{ByteOrder, SBuf};
pub use scanner::{Phase, ScanParams, Scanner, ScannerFlags, ScannerInfo};
pub use scanner_set::{ScannerSet, DEFAULT_MAX_DEPTH, DEFAULT_MAX_NGRAM, MAX_DEPTH_REACHED_FEATURE};
pub use stoplist::StopList;
