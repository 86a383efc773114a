//! End-to-end scenarios for the scanner set: registration, gating,
//! recursion, and failure isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use forescan::{
    Command, FeatureRecorderDef, Pos0, RecorderSetFlags, SBuf, ScanError, ScanParams,
    Scanner, ScannerCommand, ScannerConfig, ScannerInfo, ScannerSet,
};

fn read_lines(path: &std::path::Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => text.lines().map(str::to_string).collect(),
        Err(_) => Vec::new(),
    }
}

/// Writes one fixed feature per buffer to its own recorder.
struct EchoScanner {
    name: &'static str,
    calls: Arc<AtomicUsize>,
    scan_ngram_buffer: bool,
}

impl EchoScanner {
    fn boxed(name: &'static str, calls: &Arc<AtomicUsize>) -> Box<dyn Scanner> {
        Box::new(Self { name, calls: Arc::clone(calls), scan_ngram_buffer: false })
    }
}

impl Scanner for EchoScanner {
    fn info(&self) -> ScannerInfo {
        let mut info = ScannerInfo::new(self.name);
        info.feature_defs.push(FeatureRecorderDef::new(self.name));
        info.flags.scan_ngram_buffer = self.scan_ngram_buffer;
        info
    }

    fn scan(&self, sp: &ScanParams<'_>) -> Result<(), ScanError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let recorder = sp.named_feature_recorder(self.name)?;
        recorder.write(sp.sbuf().pos0(), b"hit", b"")?;
        Ok(())
    }
}

fn set_with(
    outdir: &std::path::Path,
    scanners: Vec<Box<dyn Scanner>>,
) -> ScannerSet {
    let config = ScannerConfig::with_outdir(outdir.to_str().unwrap());
    let mut set =
        ScannerSet::new(config, RecorderSetFlags::default(), None, None).unwrap();
    set.add_scanners(scanners);
    set.apply_scanner_commands().unwrap();
    set.phase_scan();
    set
}

#[test]
fn single_scanner_writes_one_line() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    // A 16-byte constant buffer is a repeating ngram, so the scanner must
    // opt in to seeing it.
    let echo = Box::new(EchoScanner {
        name: "echo",
        calls: Arc::clone(&calls),
        scan_ngram_buffer: true,
    });
    let mut set = set_with(dir.path(), vec![echo]);

    set.process_sbuf(SBuf::from_vec(Pos0::at(0), vec![b'a'; 16]));
    set.shutdown().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let lines = read_lines(&dir.path().join("echo.txt"));
    assert_eq!(lines, vec!["0\thit\t".to_string()]);
}

#[test]
fn ngram_buffers_skip_scanners_that_opted_out() {
    let dir = tempfile::tempdir().unwrap();
    let alpha_calls = Arc::new(AtomicUsize::new(0));
    let beta_calls = Arc::new(AtomicUsize::new(0));

    let alpha = EchoScanner::boxed("alpha", &alpha_calls);
    let beta = Box::new(EchoScanner {
        name: "beta",
        calls: Arc::clone(&beta_calls),
        scan_ngram_buffer: true,
    });

    let mut set = set_with(dir.path(), vec![alpha, beta]);
    set.process_sbuf(SBuf::from_vec(Pos0::at(0), vec![0x41; 1024]));
    set.shutdown().unwrap();

    assert_eq!(alpha_calls.load(Ordering::SeqCst), 0);
    assert_eq!(beta_calls.load(Ordering::SeqCst), 1);
}

/// Decodes (pretends to) and recurses until stopped by the depth cap.
struct RecursingScanner {
    calls: Arc<AtomicUsize>,
}

impl Scanner for RecursingScanner {
    fn info(&self) -> ScannerInfo {
        let mut info = ScannerInfo::new("rek");
        info.path_prefix = "REK".to_string();
        info
    }

    fn scan(&self, sp: &ScanParams<'_>) -> Result<(), ScanError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let child_pos = sp.sbuf().pos0().push_stage("REK");
        // Vary the decoded bytes per level so the seen-set never dedups the
        // children out of the recursion.
        let mut decoded = sp.sbuf().bytes().to_vec();
        decoded.push(sp.sbuf().depth() as u8);
        sp.recurse(SBuf::from_vec(child_pos, decoded));
        Ok(())
    }
}

#[test]
fn depth_cap_alerts_and_stops_recursion() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let config = ScannerConfig::with_outdir(dir.path().to_str().unwrap());
    let mut set =
        ScannerSet::new(config, RecorderSetFlags::default(), None, None).unwrap();
    set.set_max_depth(2);
    set.add_scanner(Box::new(RecursingScanner { calls: Arc::clone(&calls) }));
    set.apply_scanner_commands().unwrap();
    set.phase_scan();

    set.process_sbuf(SBuf::from_str("seed"));
    set.shutdown().unwrap();

    // Depth 0 and 1 run the scanner; the depth-2 child only alerts.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(set.get_max_depth_seen(), 1);

    let alerts = read_lines(&dir.path().join("alerts.txt"));
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].contains("MAX_DEPTH_REACHED"), "alert was: {}", alerts[0]);
    assert!(alerts[0].starts_with("0-REK-0-REK-0\t"), "alert was: {}", alerts[0]);
}

/// Fails on every buffer.
struct FailingScanner;

impl Scanner for FailingScanner {
    fn info(&self) -> ScannerInfo {
        ScannerInfo::new("bad")
    }

    fn scan(&self, _sp: &ScanParams<'_>) -> Result<(), ScanError> {
        Err(ScanError::failed("synthetic failure"))
    }
}

#[test]
fn scanner_failure_is_isolated_from_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let good1_calls = Arc::new(AtomicUsize::new(0));
    let good2_calls = Arc::new(AtomicUsize::new(0));

    let mut set = set_with(
        dir.path(),
        vec![
            EchoScanner::boxed("good1", &good1_calls),
            Box::new(FailingScanner),
            EchoScanner::boxed("good2", &good2_calls),
        ],
    );
    set.process_sbuf(SBuf::from_vec(Pos0::at(0), (0..4096).map(|i| i as u8).collect()));
    set.shutdown().unwrap();

    assert_eq!(good1_calls.load(Ordering::SeqCst), 1);
    assert_eq!(good2_calls.load(Ordering::SeqCst), 1);
    assert_eq!(read_lines(&dir.path().join("good1.txt")).len(), 1);
    assert_eq!(read_lines(&dir.path().join("good2.txt")).len(), 1);

    let alerts = read_lines(&dir.path().join("alerts.txt"));
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].contains("scanner=bad"));
    assert!(alerts[0].contains("<exception>synthetic failure</exception>"));
}

/// Panics on every buffer; the dispatch loop must contain it.
struct PanickingScanner;

impl Scanner for PanickingScanner {
    fn info(&self) -> ScannerInfo {
        ScannerInfo::new("panicky")
    }

    fn scan(&self, _sp: &ScanParams<'_>) -> Result<(), ScanError> {
        panic!("scanner bug");
    }
}

#[test]
fn scanner_panic_becomes_unknown_exception_alert() {
    let dir = tempfile::tempdir().unwrap();
    let good_calls = Arc::new(AtomicUsize::new(0));
    let mut set = set_with(
        dir.path(),
        vec![Box::new(PanickingScanner), EchoScanner::boxed("good", &good_calls)],
    );
    set.process_sbuf(SBuf::from_str("some bytes"));
    set.shutdown().unwrap();

    assert_eq!(good_calls.load(Ordering::SeqCst), 1);
    let alerts = read_lines(&dir.path().join("alerts.txt"));
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].contains("scanner=panicky"));
    assert!(alerts[0].contains("<unknown_exception></unknown_exception>"));
}

#[test]
fn seen_buffers_are_skipped_and_counted() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let config = ScannerConfig::with_outdir(dir.path().to_str().unwrap());
    let mut set =
        ScannerSet::new(config, RecorderSetFlags::default(), None, None).unwrap();
    set.set_dup_data_alerts(true);
    set.add_scanner(EchoScanner::boxed("echo", &calls));
    set.apply_scanner_commands().unwrap();
    set.phase_scan();

    set.process_sbuf(SBuf::from_str("the very same bytes"));
    set.process_sbuf(SBuf::from_str("the very same bytes"));
    set.shutdown().unwrap();

    // Second dispatch was deduped: scanner ran once, duplicate was counted
    // and alerted.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(set.dup_bytes_encountered(), "the very same bytes".len() as u64);
    let alerts = read_lines(&dir.path().join("alerts.txt"));
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].contains("DUP SBUF "));
    assert!(alerts[0].contains("<buflen>19</buflen>"));
}

#[test]
fn enable_disable_commands_resolve_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let a = Arc::new(AtomicUsize::new(0));
    let b = Arc::new(AtomicUsize::new(0));
    let mut config = ScannerConfig::with_outdir(dir.path().to_str().unwrap());
    config.push_scanner_command(ScannerCommand::ALL_SCANNERS, Command::Disable);
    config.push_scanner_command("keeper", Command::Enable);

    let mut set =
        ScannerSet::new(config, RecorderSetFlags::default(), None, None).unwrap();
    set.add_scanner(EchoScanner::boxed("keeper", &a));
    set.add_scanner(EchoScanner::boxed("dropped", &b));
    set.apply_scanner_commands().unwrap();

    assert!(set.is_scanner_enabled("keeper").unwrap());
    assert!(!set.is_scanner_enabled("dropped").unwrap());
    assert_eq!(set.get_enabled_scanners(), vec!["keeper".to_string()]);

    set.phase_scan();
    set.process_sbuf(SBuf::from_str("payload"));
    assert_eq!(a.load(Ordering::SeqCst), 1);
    assert_eq!(b.load(Ordering::SeqCst), 0);
    set.shutdown().unwrap();
}

#[test]
fn command_for_unknown_scanner_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut config = ScannerConfig::with_outdir(dir.path().to_str().unwrap());
    config.push_scanner_command("no_such", Command::Enable);

    let mut set =
        ScannerSet::new(config, RecorderSetFlags::default(), None, None).unwrap();
    set.add_scanner(EchoScanner::boxed("echo", &calls));
    let err = set.apply_scanner_commands().unwrap_err();
    assert!(err.to_string().contains("no_such"), "err was: {err}");
}

#[test]
#[should_panic(expected = "process_sbuf can only be run in phase SCAN")]
fn process_before_phase_scan_panics() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut set = ScannerSet::new(
        ScannerConfig::default(),
        RecorderSetFlags::default(),
        None,
        None,
    )
    .unwrap();
    set.add_scanner(EchoScanner::boxed("echo", &calls));
    set.process_sbuf(SBuf::from_str("too early"));
}

#[test]
#[should_panic(expected = "scanner already added")]
fn duplicate_registration_panics() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut set = ScannerSet::new(
        ScannerConfig::default(),
        RecorderSetFlags::default(),
        None,
        None,
    )
    .unwrap();
    set.add_scanner(EchoScanner::boxed("echo", &calls));
    set.add_scanner(EchoScanner::boxed("echo", &calls));
}

#[test]
#[should_panic(expected = "add_scanner can only be run in phase INIT")]
fn late_registration_panics() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut set = ScannerSet::new(
        ScannerConfig::default(),
        RecorderSetFlags::default(),
        None,
        None,
    )
    .unwrap();
    set.apply_scanner_commands().unwrap();
    set.add_scanner(EchoScanner::boxed("echo", &calls));
}

#[test]
fn shutdown_reports_stats_per_scanner() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let shared: std::sync::Arc<std::sync::Mutex<Vec<u8>>> = Default::default();

    struct SharedSink(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);
    impl std::io::Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let sink = forescan::JsonReportWriter::new(SharedSink(Arc::clone(&shared)));
    let config = ScannerConfig::with_outdir(dir.path().to_str().unwrap());
    let mut set =
        ScannerSet::new(config, RecorderSetFlags::default(), None, Some(Box::new(sink)))
            .unwrap();
    set.add_scanner(EchoScanner::boxed("echo", &calls));
    set.apply_scanner_commands().unwrap();
    set.phase_scan();
    set.process_sbuf(SBuf::from_str("abc"));
    set.process_sbuf(SBuf::from_str("def"));
    set.shutdown().unwrap();

    let text = String::from_utf8(shared.lock().unwrap().clone()).unwrap();
    let mut lines = text.lines();
    let stats: serde_json::Value = serde_json::from_str(lines.next().unwrap()).unwrap();
    assert_eq!(stats["scanner_stats"][0]["name"], "echo");
    assert_eq!(stats["scanner_stats"][0]["calls"], 2);
    let counts: serde_json::Value = serde_json::from_str(lines.next().unwrap()).unwrap();
    let names: Vec<&str> = counts["feature_files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"echo"));
    assert!(names.contains(&"alerts"));
}
