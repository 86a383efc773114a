//! The feature-recorder set: recorders keyed by name, plus shared state.
//!
//! One set owns every recorder in a scan: the name→recorder map (written
//! only during init, read-only after), the seen-sbuf dedup set, the
//! configured hasher, the optional stop-list with its dedicated recorder,
//! and the well-known `alerts` recorder for out-of-band messages.
//!
//! Constructing a set with a real output directory creates the directory
//! and verifies it is writable up front; failures there are fatal because
//! nothing downstream can recover from an unwritable sink. Constructing
//! with [`NO_OUTDIR`](crate::config::NO_OUTDIR) disables every recorder in
//! the set: writes validate and count nothing, and no file is ever created.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use ahash::AHashMap;

use crate::config::ScannerConfig;
use crate::errors::RecorderError;
use crate::hasher::Hasher;
use crate::recorder::{FeatureRecorder, FeatureRecorderDef, FeatureSink, FileSink, NullSink};
use crate::report::{FeatureCountRecord, ReportSink};
use crate::sbuf::SBuf;
use crate::stdx::AtomicSet;
use crate::stoplist::StopList;

/// Name of the distinguished alert recorder.
pub const ALERT_RECORDER_NAME: &str = "alerts";

/// Name of the recorder receiving stop-listed features.
pub const STOPPED_RECORDER_NAME: &str = "stopped";

/// Behavior flags for a recorder set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecorderSetFlags {
    /// Validate aggressively and treat scanner sloppiness as fatal.
    pub pedantic: bool,
    /// Do not create the alert recorder.
    pub no_alert: bool,
    /// Record to tab-separated text files.
    pub record_files: bool,
    /// Record to an SQL backend (mutually exclusive with `record_files`).
    pub record_sql: bool,
    /// Log every feature write (driven by `SCANNER_SET_DEBUG_SCANNER`).
    pub log_writes: bool,
}

impl Default for RecorderSetFlags {
    fn default() -> Self {
        Self {
            pedantic: false,
            no_alert: false,
            record_files: true,
            record_sql: false,
            log_writes: false,
        }
    }
}

/// State shared by every recorder in a set.
pub(crate) struct SetCore {
    pub disabled: bool,
    pub pedantic: bool,
    pub log_writes: bool,
    pub outdir: Option<PathBuf>,
    pub input_fname: Option<PathBuf>,
    pub hasher: Hasher,
    pub stop_list: Option<StopList>,
    pub context_window: usize,
}

/// A collection of feature recorders keyed by name.
pub struct FeatureRecorderSet {
    core: Arc<SetCore>,
    flags: RecorderSetFlags,
    recorders: Mutex<AHashMap<String, Arc<FeatureRecorder>>>,
    /// Insertion order, for deterministic iteration in reports.
    order: Mutex<Vec<String>>,
    seen_set: AtomicSet,
}

impl FeatureRecorderSet {
    /// Creates a set from the scan configuration.
    ///
    /// `stop_list` routes matching features to the [`STOPPED_RECORDER_NAME`]
    /// recorder, which is created here so it exists before any scanner
    /// recorder does. Configuring a stop-list while `no_alert` suppresses
    /// the alerts recorder is an error: divergent stop-list setups fail
    /// here, at construction, not mid-scan.
    pub fn new(
        flags: RecorderSetFlags,
        config: &ScannerConfig,
        stop_list: Option<StopList>,
    ) -> Result<Self, RecorderError> {
        if flags.record_files && flags.record_sql {
            return Err(RecorderError::BackendConflict);
        }
        if !flags.record_files && !flags.record_sql {
            return Err(RecorderError::NoBackend);
        }
        // Stop-list divergence: stop-listed features are reported through
        // the alert machinery, so a stop-list with the alerts recorder
        // suppressed has nowhere coherent to route.
        if flags.no_alert && stop_list.is_some() {
            return Err(RecorderError::StopListRecorder(
                "alerts recorder suppressed by no_alert".to_string(),
            ));
        }

        let outdir = config.outdir_path();
        let disabled = outdir.is_none();
        if let Some(dir) = &outdir {
            std::fs::create_dir_all(dir).map_err(|source| RecorderError::CannotCreateOutdir {
                path: dir.clone(),
                source,
            })?;
            // Probe writability now; a read-only tree must fail loudly
            // before a single scanner runs.
            let probe = dir.join(".forescan-writable");
            match std::fs::write(&probe, b"") {
                Ok(()) => {
                    let _ = std::fs::remove_file(&probe);
                }
                Err(_) => return Err(RecorderError::OutdirNotWritable(dir.clone())),
            }
        }

        let core = Arc::new(SetCore {
            disabled,
            pedantic: flags.pedantic,
            log_writes: flags.log_writes,
            outdir,
            input_fname: config.input_path(),
            hasher: Hasher::from_name(&config.hash_algorithm)?,
            stop_list,
            context_window: config.context_window_default,
        });

        let set = Self {
            core,
            flags,
            recorders: Mutex::new(AHashMap::new()),
            order: Mutex::new(Vec::new()),
            seen_set: AtomicSet::new(),
        };

        if set.core.stop_list.is_some() {
            set.create_feature_recorder(FeatureRecorderDef::new(STOPPED_RECORDER_NAME))
                .map_err(|err| RecorderError::StopListRecorder(err.to_string()))?;
        }
        Ok(set)
    }

    /// The hasher shared by dedup and carving.
    pub fn hasher(&self) -> &Hasher {
        &self.core.hasher
    }

    /// Whether the whole set is disabled (`NO_OUTDIR`).
    pub fn is_disabled(&self) -> bool {
        self.core.disabled
    }

    /// The input file name this set was configured with, if any.
    pub fn input_fname(&self) -> Option<&PathBuf> {
        self.core.input_fname.as_ref()
    }

    fn make_sink(&self, name: &str) -> Box<dyn FeatureSink> {
        match &self.core.outdir {
            Some(dir) if self.flags.record_files => Box::new(FileSink::new(dir.clone(), name)),
            _ => Box::new(NullSink),
        }
    }

    /// Creates a recorder; a second creation under the same name is an
    /// error. Wires the stop-list recorder into the new recorder (but never
    /// into the stoplist recorder itself).
    pub fn create_feature_recorder(
        &self,
        def: FeatureRecorderDef,
    ) -> Result<Arc<FeatureRecorder>, RecorderError> {
        let mut recorders = self.recorders.lock().unwrap();
        if recorders.contains_key(&def.name) {
            return Err(RecorderError::DuplicateRecorder(def.name.clone()));
        }
        let name = def.name.clone();
        let sink = self.make_sink(&name);
        let recorder = Arc::new(FeatureRecorder::new(def, Arc::clone(&self.core), sink));
        if self.core.stop_list.is_some() && name != STOPPED_RECORDER_NAME {
            if let Some(stopped) = recorders.get(STOPPED_RECORDER_NAME) {
                let _ = recorder.stop_list_recorder.set(Arc::clone(stopped));
            }
        }
        recorders.insert(name.clone(), Arc::clone(&recorder));
        self.order.lock().unwrap().push(name);
        Ok(recorder)
    }

    /// Returns the existing recorder under `def.name`, creating it if
    /// needed. This is how multiple scanners declare the same recorder
    /// without an error.
    pub fn get_or_create_feature_recorder(
        &self,
        def: FeatureRecorderDef,
    ) -> Result<Arc<FeatureRecorder>, RecorderError> {
        if let Ok(existing) = self.named_feature_recorder(&def.name) {
            return Ok(existing);
        }
        self.create_feature_recorder(def)
    }

    /// Looks up a recorder by name.
    pub fn named_feature_recorder(&self, name: &str) -> Result<Arc<FeatureRecorder>, RecorderError> {
        self.recorders
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| RecorderError::NoSuchRecorder(name.to_string()))
    }

    /// Creates the alert recorder unless suppressed by `no_alert`.
    pub fn create_alert_recorder(&self) -> Result<(), RecorderError> {
        if !self.flags.no_alert {
            self.get_or_create_feature_recorder(FeatureRecorderDef::new(ALERT_RECORDER_NAME))?;
        }
        Ok(())
    }

    /// The well-known `alerts` recorder.
    pub fn get_alert_recorder(&self) -> Result<Arc<FeatureRecorder>, RecorderError> {
        self.named_feature_recorder(ALERT_RECORDER_NAME)
    }

    /// Hashes the sbuf and inserts the digest into the seen set, returning
    /// whether it was present before. The test and insert are one atomic
    /// operation.
    pub fn check_previously_processed(&self, sbuf: &SBuf) -> bool {
        self.seen_set.check_and_insert(sbuf.hash_with(&self.core.hasher))
    }

    /// Number of distinct sbufs seen so far.
    pub fn seen_count(&self) -> usize {
        self.seen_set.len()
    }

    /// Dispatches a histogram definition to its recorder.
    pub fn histogram_add(&self, def: crate::histogram::HistogramDef) -> Result<(), RecorderError> {
        let recorder = self.named_feature_recorder(&def.feature)?;
        recorder.histogram_add(def)
    }

    /// Total histograms across all recorders.
    pub fn histogram_count(&self) -> usize {
        self.for_each_in_order(|r| r.histogram_count()).into_iter().sum()
    }

    /// Number of recorders in the set.
    pub fn feature_recorder_count(&self) -> usize {
        self.recorders.lock().unwrap().len()
    }

    /// Recorder names in creation order.
    pub fn feature_file_list(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }

    fn for_each_in_order<T>(&self, f: impl Fn(&FeatureRecorder) -> T) -> Vec<T> {
        let names = self.order.lock().unwrap().clone();
        let recorders = self.recorders.lock().unwrap();
        names.iter().filter_map(|n| recorders.get(n)).map(|r| f(r.as_ref())).collect()
    }

    /// Flushes every recorder.
    pub fn feature_recorders_shutdown(&self) -> Result<(), RecorderError> {
        for result in self.for_each_in_order(|r| r.shutdown()) {
            result?;
        }
        Ok(())
    }

    /// Materializes every histogram on every recorder.
    pub fn histograms_generate(&self) -> Result<(), RecorderError> {
        for result in self.for_each_in_order(|r| r.histogram_flush_all()) {
            result?;
        }
        Ok(())
    }

    /// Writes per-recorder feature counts to the structured log sink.
    pub fn dump_name_count_stats(&self, sink: &mut dyn ReportSink) -> std::io::Result<()> {
        let records: Vec<FeatureCountRecord> = self
            .for_each_in_order(|r| FeatureCountRecord {
                name: r.name().to_string(),
                count: r.features_written(),
            });
        sink.feature_counts(&records)
    }
}

impl std::fmt::Debug for FeatureRecorderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureRecorderSet")
            .field("recorders", &self.feature_file_list())
            .field("disabled", &self.core.disabled)
            .field("hasher", &self.core.hasher)
            .finish()
    }
}
