//! Recorder pipeline behaviors: quoting flags, context windows, margin
//! suppression, stop-list routing, histograms, and carve caching.

use forescan::{
    CarveMode, CarveOutcome, FeatureRecorderDef, FeatureRecorderSet, HistogramDef, Pos0,
    RecorderFlags, RecorderSetFlags, SBuf, ScannerConfig, StopList,
};

fn file_set(dir: &std::path::Path, stop_list: Option<StopList>) -> FeatureRecorderSet {
    let config = ScannerConfig::with_outdir(dir.to_str().unwrap());
    FeatureRecorderSet::new(RecorderSetFlags::default(), &config, stop_list).unwrap()
}

fn read_lines(path: &std::path::Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => text.lines().map(str::to_string).collect(),
        Err(_) => Vec::new(),
    }
}

#[test]
fn default_quoting_escapes_bad_utf8_and_backslashes() {
    let dir = tempfile::tempdir().unwrap();
    let set = file_set(dir.path(), None);
    let rec = set.create_feature_recorder(FeatureRecorderDef::new("raw")).unwrap();
    rec.write(&Pos0::at(5), b"a\\b\xff", b"ctx\tafter").unwrap();
    rec.flush().unwrap();

    let lines = read_lines(&dir.path().join("raw.txt"));
    assert_eq!(lines, vec!["5\ta\\\\b\\xFF\tctx\\x09after".to_string()]);
}

#[test]
fn xml_flag_leaves_backslashes_alone() {
    let dir = tempfile::tempdir().unwrap();
    let set = file_set(dir.path(), None);
    let def = FeatureRecorderDef::new("xmlish")
        .with_flags(RecorderFlags { xml: true, ..RecorderFlags::default() });
    let rec = set.create_feature_recorder(def).unwrap();
    rec.write(&Pos0::at(0), b"<v>a\\b</v>", b"\xc3(").unwrap();
    rec.flush().unwrap();

    let lines = read_lines(&dir.path().join("xmlish.txt"));
    assert_eq!(lines, vec!["0\t<v>a\\b</v>\t\\xC3(".to_string()]);
}

#[test]
fn no_context_omits_second_tab() {
    let dir = tempfile::tempdir().unwrap();
    let set = file_set(dir.path(), None);
    let def = FeatureRecorderDef::new("bare")
        .with_flags(RecorderFlags { no_context: true, ..RecorderFlags::default() });
    let rec = set.create_feature_recorder(def).unwrap();
    rec.write(&Pos0::at(3), b"feat", b"ignored").unwrap();
    rec.flush().unwrap();

    assert_eq!(read_lines(&dir.path().join("bare.txt")), vec!["3\tfeat".to_string()]);
}

#[test]
fn zero_length_features_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let set = file_set(dir.path(), None);
    let rec = set.create_feature_recorder(FeatureRecorderDef::new("empty")).unwrap();
    rec.write(&Pos0::at(0), b"", b"context").unwrap();
    rec.flush().unwrap();
    assert_eq!(rec.features_written(), 0);
    assert!(read_lines(&dir.path().join("empty.txt")).is_empty());
}

#[test]
fn write_buf_builds_context_window_and_drops_margin() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ScannerConfig::with_outdir(dir.path().to_str().unwrap());
    config.context_window_default = 4;
    let set = FeatureRecorderSet::new(RecorderSetFlags::default(), &config, None).unwrap();
    let rec = set.create_feature_recorder(FeatureRecorderDef::new("win")).unwrap();

    // Page covers the first 24 bytes; the rest is margin.
    let sbuf = SBuf::from_vec_paged(
        Pos0::at(100),
        b"0123456789abcdefghijklmnopqrstuv".to_vec(),
        24,
    );

    // In-page write: window clamps at the buffer edges.
    rec.write_buf(&sbuf, 10, 3).unwrap();
    // Margin write: silently dropped, the neighboring page owns it.
    rec.write_buf(&sbuf, 26, 2).unwrap();
    // Out-of-range write: dropped with a note.
    rec.write_buf(&sbuf, 99, 1).unwrap();
    // Length overrunning the end is clamped.
    rec.write_buf(&sbuf, 0, 2).unwrap();
    rec.flush().unwrap();

    let lines = read_lines(&dir.path().join("win.txt"));
    assert_eq!(
        lines,
        vec![
            "110\tabc\t6789abcdefg".to_string(),
            "100\t01\t012345".to_string(),
        ]
    );
    assert_eq!(rec.features_written(), 2);
}

#[test]
fn stop_listed_features_route_to_stopped_recorder() {
    let dir = tempfile::tempdir().unwrap();
    let mut stop_list = StopList::new();
    stop_list.add_feature("spam");
    let set = file_set(dir.path(), Some(stop_list));

    let rec = set.create_feature_recorder(FeatureRecorderDef::new("url")).unwrap();
    rec.histogram_add(HistogramDef::new("url", "histogram")).unwrap();

    rec.write(&Pos0::at(7), b"spam", b"around spam here").unwrap();
    rec.write(&Pos0::at(9), b"ham", b"").unwrap();
    set.feature_recorders_shutdown().unwrap();

    // The stop-listed feature landed in stopped.txt, not url.txt; the
    // recorder still counted it, but its histogram never saw it.
    let stopped = read_lines(&dir.path().join("stopped.txt"));
    assert_eq!(stopped.len(), 1);
    assert!(stopped[0].contains("spam"));

    let url = read_lines(&dir.path().join("url.txt"));
    assert_eq!(url.len(), 1);
    assert!(url[0].contains("ham"));

    assert_eq!(rec.features_written(), 2);
    let report = rec.histogram_report(0).unwrap();
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].feature, "ham");
}

#[test]
fn histograms_materialize_at_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let set = file_set(dir.path(), None);
    let rec = set.create_feature_recorder(FeatureRecorderDef::new("email")).unwrap();
    rec.histogram_add(HistogramDef::new("email", "histogram")).unwrap();
    rec.histogram_add(HistogramDef::new("email", "domains").with_pattern(r"@([\w.]+)"))
        .unwrap();
    // The same definition again merges silently.
    rec.histogram_add(HistogramDef::new("email", "histogram")).unwrap();
    assert_eq!(rec.histogram_count(), 2);

    rec.write(&Pos0::at(0), b"a@x.com", b"").unwrap();
    rec.write(&Pos0::at(9), b"b@x.com", b"").unwrap();
    rec.write(&Pos0::at(30), b"a@x.com", b"").unwrap();
    set.feature_recorders_shutdown().unwrap();
    set.histograms_generate().unwrap();

    let hist = read_lines(&dir.path().join("email_histogram.txt"));
    assert_eq!(hist, vec!["2\ta@x.com".to_string(), "1\tb@x.com".to_string()]);
    let domains = read_lines(&dir.path().join("email_domains.txt"));
    assert_eq!(domains, vec!["3\tx.com".to_string()]);
}

#[test]
#[should_panic(expected = "histogram added to recorder")]
fn histogram_add_after_first_write_panics() {
    let dir = tempfile::tempdir().unwrap();
    let set = file_set(dir.path(), None);
    let rec = set.create_feature_recorder(FeatureRecorderDef::new("late")).unwrap();
    rec.write(&Pos0::at(0), b"feature", b"").unwrap();
    let _ = rec.histogram_add(HistogramDef::new("late", "histogram"));
}

#[test]
#[should_panic(expected = "pedantic: raw feature contains tab")]
fn pedantic_mode_rejects_raw_whitespace() {
    let dir = tempfile::tempdir().unwrap();
    let config = ScannerConfig::with_outdir(dir.path().to_str().unwrap());
    let flags = RecorderSetFlags { pedantic: true, ..RecorderSetFlags::default() };
    let set = FeatureRecorderSet::new(flags, &config, None).unwrap();
    let rec = set.create_feature_recorder(FeatureRecorderDef::new("strict")).unwrap();
    let _ = rec.write(&Pos0::at(0), b"has\ttab", b"");
}

#[test]
fn carve_writes_once_per_content_hash() {
    let dir = tempfile::tempdir().unwrap();
    let set = file_set(dir.path(), None);
    let rec = set.create_feature_recorder(FeatureRecorderDef::new("carved")).unwrap();
    rec.set_carve_mode(CarveMode::All);

    let header = SBuf::from_vec(Pos0::at(0), b"HDR!".to_vec());
    let data = SBuf::from_vec(Pos0::new("512-GZIP", 64), b"carved payload".to_vec());

    let first = rec.carve(&header, &data, ".bin", 0).unwrap();
    let relpath = match first {
        CarveOutcome::Carved(path) => path,
        other => panic!("expected Carved, got {other:?}"),
    };
    assert_eq!(relpath, "carved/000/512-GZIP-64.bin");
    let on_disk = dir.path().join(&relpath);
    assert_eq!(std::fs::read(&on_disk).unwrap(), b"HDR!carved payload");

    // Identical content elsewhere: no second file, a CACHED record.
    let dup = SBuf::from_vec(Pos0::new("9000-ZIP", 3), b"carved payload".to_vec());
    assert_eq!(rec.carve(&header, &dup, ".bin", 0).unwrap(), CarveOutcome::Cached);
    assert_eq!(rec.carved_file_count(), 1);

    rec.flush().unwrap();
    let lines = read_lines(&dir.path().join("carved.txt"));
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("<filename>carved/000/512-GZIP-64.bin</filename>"));
    assert!(lines[0].contains("<hashdigest type='sha1'>"));
    assert!(lines[1].starts_with("9000-ZIP-3\tCACHED\t"));
    assert!(!lines[1].contains("<filename>"));
}

#[test]
fn carve_mode_gates_by_encoding() {
    let dir = tempfile::tempdir().unwrap();
    let set = file_set(dir.path(), None);
    let rec = set.create_feature_recorder(FeatureRecorderDef::new("zipc")).unwrap();
    // Default mode is Encoded.
    rec.set_do_not_carve_encoding("ZIP");

    let header = SBuf::from_vec(Pos0::at(0), Vec::new());

    // Unencoded data: path is empty, nothing to carve.
    let plain = SBuf::from_vec(Pos0::at(100), b"plain".to_vec());
    assert_eq!(rec.carve(&header, &plain, ".zip", 0).unwrap(), CarveOutcome::NotCarved);

    // Innermost stage is the carver's own encoding: skipped.
    let own = SBuf::from_vec(Pos0::new("100-ZIP", 0), b"member".to_vec());
    assert_eq!(rec.carve(&header, &own, ".zip", 0).unwrap(), CarveOutcome::NotCarved);

    // Encoded under something else: carved.
    let buried = SBuf::from_vec(Pos0::new("1000-HIBER-33423-ZIP-7-XOR", 0), b"hidden".to_vec());
    assert!(matches!(
        rec.carve(&header, &buried, ".zip", 0).unwrap(),
        CarveOutcome::Carved(_)
    ));

    // CarveMode::None turns everything off.
    rec.set_carve_mode(CarveMode::None);
    let more = SBuf::from_vec(Pos0::new("64-GZIP", 0), b"other".to_vec());
    assert_eq!(rec.carve(&header, &more, ".zip", 0).unwrap(), CarveOutcome::NotCarved);
}

#[test]
fn carve_stamps_mtime() {
    let dir = tempfile::tempdir().unwrap();
    let set = file_set(dir.path(), None);
    let rec = set.create_feature_recorder(FeatureRecorderDef::new("stamped")).unwrap();
    rec.set_carve_mode(CarveMode::All);

    let header = SBuf::from_vec(Pos0::at(0), Vec::new());
    let data = SBuf::from_vec(Pos0::at(0), b"timed".to_vec());
    let mtime = 1_600_000_000i64;
    let outcome = rec.carve(&header, &data, ".dat", mtime).unwrap();
    let CarveOutcome::Carved(relpath) = outcome else { panic!("not carved") };

    let meta = std::fs::metadata(dir.path().join(relpath)).unwrap();
    let modified = meta
        .modified()
        .unwrap()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_secs();
    assert_eq!(modified, mtime as u64);
}

#[test]
fn disabled_set_carves_nothing() {
    let config = ScannerConfig::default(); // NO_OUTDIR
    let set = FeatureRecorderSet::new(RecorderSetFlags::default(), &config, None).unwrap();
    let rec = set.create_feature_recorder(FeatureRecorderDef::new("off")).unwrap();
    rec.set_carve_mode(CarveMode::All);
    let header = SBuf::from_vec(Pos0::at(0), Vec::new());
    let data = SBuf::from_vec(Pos0::at(0), b"bytes".to_vec());
    assert_eq!(rec.carve(&header, &data, ".bin", 0).unwrap(), CarveOutcome::NotCarved);
    assert_eq!(rec.carved_file_count(), 0);
}
