//! The scanner contract: what a content scanner declares and receives.
//!
//! A scanner is a value implementing [`Scanner`]: it describes itself once
//! through [`Scanner::info`] (name, flags, the recorders and histograms it
//! will write), optionally reads its knobs in [`Scanner::configure`], and
//! then processes one buffer per [`Scanner::scan`] call. Scanners write
//! features by recorder name through the [`ScanParams`] handed to them, and
//! recursive scanners feed decoded children back into the set with
//! [`ScanParams::recurse`].
//!
//! Scan failures are values, not unwinds: return a [`ScanError`] and the
//! dispatch loop records it on the alert recorder without disturbing sibling
//! scanners. A panicking scanner is likewise contained (and reported as an
//! unknown exception), but that is the backstop, not the API.

use std::fmt;
use std::sync::Arc;

use crate::config::ScannerConfig;
use crate::errors::{RecorderError, ScanError};
use crate::histogram::HistogramDef;
use crate::recorder::{FeatureRecorder, FeatureRecorderDef};
use crate::sbuf::SBuf;
use crate::scanner_set::ScannerSet;

/// Lifecycle phase of a scanner set, strictly monotonic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Scanners register; recorders and histograms are declared.
    Init,
    /// Enable/disable commands have been applied; recorders exist.
    Enabled,
    /// Buffers are being dispatched.
    Scan,
    /// Scanners have been told to wind down; histograms are materializing.
    Shutdown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "INIT",
            Phase::Enabled => "ENABLED",
            Phase::Scan => "SCAN",
            Phase::Shutdown => "SHUTDOWN",
        };
        f.write_str(name)
    }
}

/// Dispatch-gating flags declared by a scanner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScannerFlags {
    /// Enabled without an explicit enable command.
    pub default_enabled: bool,
    /// Immune to the `all` bulk enable/disable command.
    pub no_all: bool,
    /// Hidden from the usage listing.
    pub no_usage: bool,
    /// Runs even when the buffer is a repeating ngram.
    pub scan_ngram_buffer: bool,
    /// Runs only on depth-0 (undecoded) buffers.
    pub depth0_only: bool,
    /// Runs even on buffers whose content hash was seen before.
    pub scan_seen_before: bool,
    /// This scanner searches for user-supplied patterns.
    pub find_scanner: bool,
}

impl Default for ScannerFlags {
    fn default() -> Self {
        Self {
            default_enabled: true,
            no_all: false,
            no_usage: false,
            scan_ngram_buffer: false,
            depth0_only: false,
            scan_seen_before: false,
            find_scanner: false,
        }
    }
}

/// Metadata fixed at registration.
#[derive(Clone, Debug, Default)]
pub struct ScannerInfo {
    pub name: String,
    pub author: String,
    pub description: String,
    pub url: String,
    pub version: String,
    /// Path stage this scanner contributes when it recurses, e.g. `ZIP`.
    pub path_prefix: String,
    /// Feature recorders this scanner writes to.
    pub feature_defs: Vec<FeatureRecorderDef>,
    /// Histograms this scanner wants over its recorders.
    pub histogram_defs: Vec<HistogramDef>,
    pub flags: ScannerFlags,
}

impl ScannerInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), flags: ScannerFlags::default(), ..Self::default() }
    }
}

/// A content scanner.
///
/// Implementations must be `Send + Sync`: one scanner value serves every
/// worker thread, so per-buffer state belongs on the stack of `scan`, not in
/// `self`.
pub trait Scanner: Send + Sync {
    /// Registration metadata. Called once, during `add_scanner`.
    fn info(&self) -> ScannerInfo;

    /// Reads scanner knobs from the configuration. Called once, during
    /// registration, before `info`.
    fn configure(&mut self, _config: &mut ScannerConfig) {}

    /// Processes one buffer. Failures are contained by the dispatch loop.
    fn scan(&self, sp: &ScanParams<'_>) -> Result<(), ScanError>;

    /// Called once at set shutdown, after the last buffer.
    fn shutdown(&self) {}
}

/// Everything a scanner receives for one buffer.
pub struct ScanParams<'a> {
    phase: Phase,
    sbuf: &'a SBuf,
    set: &'a ScannerSet,
}

impl<'a> ScanParams<'a> {
    pub(crate) fn new(phase: Phase, sbuf: &'a SBuf, set: &'a ScannerSet) -> Self {
        Self { phase, sbuf, set }
    }

    /// The current phase (always [`Phase::Scan`] inside `scan`).
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The buffer to scan.
    pub fn sbuf(&self) -> &SBuf {
        self.sbuf
    }

    /// Looks up a feature recorder declared in some scanner's info.
    pub fn named_feature_recorder(
        &self,
        name: &str,
    ) -> Result<Arc<FeatureRecorder>, RecorderError> {
        self.set.named_feature_recorder(name)
    }

    /// The input file name configured for this scan, if any.
    pub fn input_fname(&self) -> Option<std::path::PathBuf> {
        self.set.get_input_fname()
    }

    /// Feeds a decoded child buffer back through the full dispatch loop.
    ///
    /// The child should carry a position derived with
    /// [`Pos0::push_stage`](crate::pos0::Pos0::push_stage) so its provenance
    /// names this scanner's `path_prefix`. Ownership transfers to the set;
    /// the child is gone when this returns.
    pub fn recurse(&self, child: SBuf) {
        self.set.process_sbuf(child);
    }
}
