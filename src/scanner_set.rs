//! The scanner set: registration, phase machine, and the dispatch loop.
//!
//! A [`ScannerSet`] owns the registered scanners, the feature-recorder set
//! they write through, and the run-time policy for dispatch: recursion depth
//! cap, ngram suppression, seen-buffer dedup, and per-scanner failure
//! isolation. It moves through the phases
//! `INIT → ENABLED → SCAN → SHUTDOWN`, strictly forward; calling an
//! operation in the wrong phase panics, because that is a driver bug, not a
//! data condition.
//!
//! # Dispatch
//! `process_sbuf` takes ownership of a buffer, runs every enabled scanner
//! that passes the gating flags, and drops the buffer on return. Scanners
//! may recurse by handing decoded children back through
//! [`ScanParams::recurse`]; the depth cap turns runaway recursion into a
//! `MAX_DEPTH_REACHED` alert instead of a stack of work.
//!
//! # Concurrency
//! Registration happens exclusively (`&mut self`) during INIT; dispatch
//! takes `&self` and may run on any number of worker threads. Per-scanner
//! stats and the dedup counters are atomics; everything else scanners touch
//! during SCAN is read-only.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use tracing::{debug, error, warn};

use crate::config::{Command, DebugFlags, ScannerCommand, ScannerConfig};
use crate::errors::{RecorderError, ScannerSetError};
use crate::recorder::FeatureRecorder;
use crate::recorder_set::{FeatureRecorderSet, RecorderSetFlags};
use crate::report::{ReportSink, ScannerStatRecord};
use crate::sbuf::SBuf;
use crate::scanner::{Phase, ScanParams, Scanner, ScannerInfo};
use crate::stoplist::StopList;

/// Feature text of the alert written when the recursion depth cap is hit.
pub const MAX_DEPTH_REACHED_FEATURE: &str = "MAX_DEPTH_REACHED";

/// Default recursion depth cap.
pub const DEFAULT_MAX_DEPTH: u32 = 7;

/// Default largest ngram period checked for constant-buffer suppression.
pub const DEFAULT_MAX_NGRAM: usize = 10;

/// Per-scanner dispatch stats. Written with relaxed atomics from the
/// dispatch loop; read at shutdown.
#[derive(Debug, Default)]
struct ScannerStats {
    ns: AtomicU64,
    calls: AtomicU64,
}

struct RegisteredScanner {
    scanner: Box<dyn Scanner>,
    info: ScannerInfo,
    enabled: bool,
    stats: ScannerStats,
}

/// A set of scanners plus the recorder set they write through.
pub struct ScannerSet {
    config: ScannerConfig,
    fs: FeatureRecorderSet,
    /// Registration order is dispatch order.
    scanners: Vec<RegisteredScanner>,
    phase: Phase,
    debug: DebugFlags,
    report: Option<Mutex<Box<dyn ReportSink>>>,

    max_depth: u32,
    max_ngram: usize,
    /// Alert on duplicate buffers instead of just counting them.
    dup_data_alerts: bool,

    max_depth_seen: AtomicU32,
    dup_bytes_encountered: AtomicU64,
    sbufs_processed: AtomicU64,
}

impl ScannerSet {
    /// Creates a scanner set in INIT phase.
    ///
    /// Captures the `SCANNER_SET_DEBUG_*` environment into plain flags here;
    /// nothing reads the environment afterwards. `report` receives the
    /// end-of-scan summaries; pass `None` to skip them.
    pub fn new(
        config: ScannerConfig,
        mut recorder_flags: RecorderSetFlags,
        stop_list: Option<StopList>,
        report: Option<Box<dyn ReportSink>>,
    ) -> Result<Self, ScannerSetError> {
        let debug = DebugFlags::from_env();
        recorder_flags.log_writes |= debug.scanner;
        let fs = FeatureRecorderSet::new(recorder_flags, &config, stop_list)?;
        Ok(Self {
            config,
            fs,
            scanners: Vec::new(),
            phase: Phase::Init,
            debug,
            report: report.map(Mutex::new),
            max_depth: DEFAULT_MAX_DEPTH,
            max_ngram: DEFAULT_MAX_NGRAM,
            dup_data_alerts: false,
            max_depth_seen: AtomicU32::new(0),
            dup_bytes_encountered: AtomicU64::new(0),
            sbufs_processed: AtomicU64::new(0),
        })
    }

    fn require_phase(&self, expected: Phase, op: &str) {
        assert!(
            self.phase == expected,
            "{op} can only be run in phase {expected}, current phase is {}",
            self.phase
        );
    }

    /// The current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The debug switches captured at construction.
    pub fn debug_flags(&self) -> DebugFlags {
        self.debug
    }

    /// Sets the recursion depth cap. INIT only.
    pub fn set_max_depth(&mut self, max_depth: u32) {
        self.require_phase(Phase::Init, "set_max_depth");
        self.max_depth = max_depth;
    }

    /// Sets the largest ngram period checked. INIT only.
    pub fn set_max_ngram(&mut self, max_ngram: usize) {
        self.require_phase(Phase::Init, "set_max_ngram");
        self.max_ngram = max_ngram;
    }

    /// Enables `DUP SBUF` alerts for previously-seen buffers. INIT only.
    pub fn set_dup_data_alerts(&mut self, on: bool) {
        self.require_phase(Phase::Init, "set_dup_data_alerts");
        self.dup_data_alerts = on;
    }

    /// Registers a scanner: configures it, collects its info, and enables it
    /// if its flags say so. INIT only.
    ///
    /// # Panics
    /// Panics on duplicate registration or an empty scanner name — both are
    /// contract violations by the driver or the scanner.
    pub fn add_scanner(&mut self, mut scanner: Box<dyn Scanner>) {
        self.require_phase(Phase::Init, "add_scanner");
        scanner.configure(&mut self.config);
        let info = scanner.info();
        assert!(!info.name.is_empty(), "scanner registered without a name in its info");
        assert!(
            !self.scanners.iter().any(|s| s.info.name == info.name),
            "scanner already added: {:?}",
            info.name
        );
        if self.debug.register {
            debug!(scanner = %info.name, "add_scanner");
        }
        let enabled = info.flags.default_enabled;
        self.scanners.push(RegisteredScanner {
            scanner,
            info,
            enabled,
            stats: ScannerStats::default(),
        });
    }

    /// Registers several scanners in order. INIT only.
    pub fn add_scanners(&mut self, scanners: impl IntoIterator<Item = Box<dyn Scanner>>) {
        for scanner in scanners {
            self.add_scanner(scanner);
        }
    }

    /// Applies the queued enable/disable commands, then creates the alert
    /// recorder and every recorder and histogram declared by the enabled
    /// scanners. Transitions INIT → ENABLED.
    ///
    /// A command naming an unknown scanner is an error; a bulk
    /// `ALL_SCANNERS` command skips scanners flagged `no_all`. Multiple
    /// scanners declaring the same recorder or histogram merge silently.
    pub fn apply_scanner_commands(&mut self) -> Result<(), ScannerSetError> {
        self.require_phase(Phase::Init, "apply_scanner_commands");

        let commands = self.config.scanner_commands.clone();
        for ScannerCommand { name, command } in commands {
            let enable = command == Command::Enable;
            if name == ScannerCommand::ALL_SCANNERS {
                for s in self.scanners.iter_mut() {
                    if !s.info.flags.no_all {
                        s.enabled = enable;
                    }
                }
            } else {
                let s = self
                    .scanners
                    .iter_mut()
                    .find(|s| s.info.name == name)
                    .ok_or(ScannerSetError::NoSuchScanner(name))?;
                s.enabled = enable;
            }
        }

        self.fs.create_alert_recorder().map_err(ScannerSetError::from)?;
        for s in self.scanners.iter().filter(|s| s.enabled) {
            for def in &s.info.feature_defs {
                self.fs.get_or_create_feature_recorder(def.clone())?;
            }
            for def in &s.info.histogram_defs {
                self.fs.histogram_add(def.clone())?;
            }
        }

        self.phase = Phase::Enabled;
        Ok(())
    }

    /// Transitions ENABLED → SCAN.
    pub fn phase_scan(&mut self) {
        self.require_phase(Phase::Enabled, "phase_scan");
        self.phase = Phase::Scan;
    }

    /// Processes one buffer through every enabled scanner, then drops it.
    /// SCAN only.
    ///
    /// Gating, in order: the depth cap (alert and return), ngram buffers
    /// (skipped by scanners without `scan_ngram_buffer`), depth-0-only
    /// scanners on decoded buffers, and previously-seen content (skipped by
    /// scanners without `scan_seen_before`). Scanner failures and panics are
    /// written to the alert recorder and contained.
    pub fn process_sbuf(&self, sbuf: SBuf) {
        self.require_phase(Phase::Scan, "process_sbuf");
        self.sbufs_processed.fetch_add(1, Ordering::Relaxed);

        if sbuf.depth() >= self.max_depth {
            self.write_alert(&sbuf, MAX_DEPTH_REACHED_FEATURE.as_bytes(), b"");
        } else {
            self.dispatch(&sbuf);
        }

        let live = sbuf.children();
        if live != 0 {
            error!(%sbuf, children = live, "scanner leaked a child view of a processed sbuf");
            debug_assert!(live == 0, "sbuf dropped with {live} live children");
        }
    }

    fn dispatch(&self, sbuf: &SBuf) {
        self.max_depth_seen.fetch_max(sbuf.depth(), Ordering::Relaxed);

        let seen_before = self.fs.check_previously_processed(sbuf);
        if seen_before {
            if self.dup_data_alerts {
                let feature = format!("DUP SBUF {}", sbuf.hash_with(self.fs.hasher()));
                let context = format!("<buflen>{}</buflen>", sbuf.len());
                self.write_alert(sbuf, feature.as_bytes(), context.as_bytes());
            }
            self.dup_bytes_encountered.fetch_add(sbuf.len() as u64, Ordering::Relaxed);
        }

        let ngram_size = sbuf.find_ngram_size(self.max_ngram);

        if self.debug.dump_data {
            let _ = sbuf.hex_dump(&mut std::io::stderr());
        }
        if self.debug.no_scanners {
            return;
        }

        for s in &self.scanners {
            if !s.enabled {
                continue;
            }
            if ngram_size > 0 && !s.info.flags.scan_ngram_buffer {
                continue;
            }
            if sbuf.depth() > 0 && s.info.flags.depth0_only {
                continue;
            }
            if seen_before && !s.info.flags.scan_seen_before {
                continue;
            }

            if self.debug.print_steps {
                debug!(pos0 = %sbuf.pos0(), scanner = %s.info.name, "calling scanner");
            }
            let started = Instant::now();
            let outcome =
                catch_unwind(AssertUnwindSafe(|| {
                    let sp = ScanParams::new(Phase::Scan, sbuf, self);
                    s.scanner.scan(&sp)
                }));
            let elapsed = started.elapsed();
            s.stats.ns.fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
            s.stats.calls.fetch_add(1, Ordering::Relaxed);
            if self.debug.print_steps {
                debug!(pos0 = %sbuf.pos0(), scanner = %s.info.name, ?elapsed, "scanner returned");
            }

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(
                        scanner = %s.info.name, pos0 = %sbuf.pos0(), bufsize = sbuf.len(),
                        %err, "scanner failed"
                    );
                    let feature = format!("scanner={}", s.info.name);
                    let context = format!("<exception>{err}</exception>");
                    self.write_alert(sbuf, feature.as_bytes(), context.as_bytes());
                }
                Err(_panic) => {
                    warn!(
                        scanner = %s.info.name, pos0 = %sbuf.pos0(), bufsize = sbuf.len(),
                        "scanner panicked"
                    );
                    let feature = format!("scanner={}", s.info.name);
                    self.write_alert(
                        sbuf,
                        feature.as_bytes(),
                        b"<unknown_exception></unknown_exception>",
                    );
                }
            }
        }
    }

    /// Best-effort alert write; a suppressed alert recorder drops alerts.
    fn write_alert(&self, sbuf: &SBuf, feature: &[u8], context: &[u8]) {
        if let Ok(alerts) = self.fs.get_alert_recorder() {
            if let Err(err) = alerts.write(sbuf.pos0(), feature, context) {
                error!(%err, "alert recorder write failed");
            }
        }
    }

    /// Shuts the set down: scanner hooks, recorder flush, histogram
    /// materialization, stats to the report sink. Transitions
    /// SCAN → SHUTDOWN.
    pub fn shutdown(&mut self) -> Result<(), ScannerSetError> {
        self.require_phase(Phase::Scan, "shutdown");
        self.phase = Phase::Shutdown;

        for s in self.scanners.iter().filter(|s| s.enabled) {
            s.scanner.shutdown();
        }

        self.fs.feature_recorders_shutdown().map_err(ScannerSetError::from)?;
        self.fs.histograms_generate().map_err(ScannerSetError::from)?;

        if let Some(report) = &self.report {
            let stats: Vec<ScannerStatRecord> = self
                .scanners
                .iter()
                .map(|s| ScannerStatRecord {
                    name: s.info.name.clone(),
                    ns: s.stats.ns.load(Ordering::Relaxed),
                    calls: s.stats.calls.load(Ordering::Relaxed),
                })
                .collect();
            let mut sink = report.lock().unwrap();
            sink.scanner_stats(&stats).map_err(RecorderError::Io)?;
            self.fs.dump_name_count_stats(sink.as_mut()).map_err(RecorderError::Io)?;
        }
        Ok(())
    }

    /// Whether the named scanner is currently enabled.
    pub fn is_scanner_enabled(&self, name: &str) -> Result<bool, ScannerSetError> {
        self.scanners
            .iter()
            .find(|s| s.info.name == name)
            .map(|s| s.enabled)
            .ok_or_else(|| ScannerSetError::NoSuchScanner(name.to_string()))
    }

    /// Names of the enabled scanners, in registration order.
    pub fn get_enabled_scanners(&self) -> Vec<String> {
        self.scanners.iter().filter(|s| s.enabled).map(|s| s.info.name.clone()).collect()
    }

    /// Whether any enabled scanner is a find scanner.
    pub fn is_find_scanner_enabled(&self) -> bool {
        self.scanners.iter().any(|s| s.enabled && s.info.flags.find_scanner)
    }

    /// Registration metadata for the named scanner.
    pub fn scanner_info(&self, name: &str) -> Option<&ScannerInfo> {
        self.scanners.iter().find(|s| s.info.name == name).map(|s| &s.info)
    }

    /// Writes a usage listing of scanners to `out`.
    ///
    /// Scanners flagged `no_usage` are omitted from the enable/disable
    /// listing; `detailed` adds the full per-scanner metadata block.
    pub fn info_scanners(
        &self,
        out: &mut dyn std::io::Write,
        detailed: bool,
        enable_opt: char,
        disable_opt: char,
    ) -> std::io::Result<()> {
        let mut enabled_names = Vec::new();
        let mut disabled_names = Vec::new();
        for s in &self.scanners {
            if detailed {
                writeln!(out, "Scanner Name: {}{}", s.info.name, if s.enabled { " (ENABLED)" } else { "" })?;
                if !s.info.author.is_empty() {
                    writeln!(out, "Author: {}", s.info.author)?;
                }
                if !s.info.description.is_empty() {
                    writeln!(out, "Description: {}", s.info.description)?;
                }
                if !s.info.url.is_empty() {
                    writeln!(out, "URL: {}", s.info.url)?;
                }
                if !s.info.version.is_empty() {
                    writeln!(out, "Scanner Version: {}", s.info.version)?;
                }
                let features: Vec<&str> =
                    s.info.feature_defs.iter().map(|d| d.name.as_str()).collect();
                writeln!(
                    out,
                    "Feature Names: {}",
                    if features.is_empty() { "(none)".to_string() } else { features.join(", ") }
                )?;
                writeln!(out, "------------------------------------------------")?;
            }
            if s.info.flags.no_usage {
                continue;
            }
            if s.enabled {
                enabled_names.push(s.info.name.clone());
            } else {
                disabled_names.push(s.info.name.clone());
            }
        }
        if !enabled_names.is_empty() {
            writeln!(out, "These scanners enabled; disable with -{disable_opt}:")?;
            for name in &enabled_names {
                writeln!(out, "   -{disable_opt} {name} - disable scanner {name}")?;
            }
        }
        if !disabled_names.is_empty() {
            disabled_names.sort();
            writeln!(out, "These scanners disabled; enable with -{enable_opt}:")?;
            for name in &disabled_names {
                writeln!(out, "   -{enable_opt} {name} - enable scanner {name}")?;
            }
        }
        Ok(())
    }

    /// Looks up a feature recorder by name.
    pub fn named_feature_recorder(
        &self,
        name: &str,
    ) -> Result<std::sync::Arc<FeatureRecorder>, RecorderError> {
        self.fs.named_feature_recorder(name)
    }

    /// The recorder set this scanner set writes through.
    pub fn feature_recorder_set(&self) -> &FeatureRecorderSet {
        &self.fs
    }

    /// Recorder names in creation order.
    pub fn feature_file_list(&self) -> Vec<String> {
        self.fs.feature_file_list()
    }

    /// Total histograms across all recorders.
    pub fn histogram_count(&self) -> usize {
        self.fs.histogram_count()
    }

    /// Number of recorders in the set.
    pub fn feature_recorder_count(&self) -> usize {
        self.fs.feature_recorder_count()
    }

    /// Per-recorder feature counts to the structured log.
    pub fn dump_name_count_stats(&self, sink: &mut dyn ReportSink) -> std::io::Result<()> {
        self.fs.dump_name_count_stats(sink)
    }

    /// The configured input file name, if any.
    pub fn get_input_fname(&self) -> Option<PathBuf> {
        self.config.input_path()
    }

    /// Deepest recursion level dispatched so far.
    pub fn get_max_depth_seen(&self) -> u32 {
        self.max_depth_seen.load(Ordering::Relaxed)
    }

    /// Total bytes of previously-seen buffers encountered.
    pub fn dup_bytes_encountered(&self) -> u64 {
        self.dup_bytes_encountered.load(Ordering::Relaxed)
    }

    /// Total buffers fed through `process_sbuf`, including recursive ones.
    pub fn sbufs_processed(&self) -> u64 {
        self.sbufs_processed.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ScannerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScannerSet")
            .field("phase", &self.phase)
            .field("scanners", &self.scanners.iter().map(|s| &s.info.name).collect::<Vec<_>>())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}
