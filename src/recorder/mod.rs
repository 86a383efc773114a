//! Feature recorders: named, validated sinks for discovered features.
//!
//! A recorder owns the full write pipeline for one feature class (emails,
//! URLs, carved objects, ...): validation, quoting, stop-list routing,
//! histogram tallies, and finally the backend sink. Carving — writing a byte
//! range out as a standalone artifact — also lives here, with an
//! at-most-once-per-content-hash guarantee.
//!
//! # Write pipeline
//! 1. Disabled set: return silently.
//! 2. Pedantic mode: length bounds and forbidden-whitespace checks on the
//!    raw bytes; violations panic (they are scanner bugs).
//! 3. Quote to UTF-8 per the recorder flags (default escapes invalid bytes
//!    and backslashes; `xml` escapes invalid bytes only; `no_quote` neither).
//! 4. Truncate feature and context to their configured maxima.
//! 5. Drop features that quoted to nothing.
//! 6. Route stop-listed features to the stoplist recorder instead.
//! 7. Tally the attached histograms.
//! 8. Emit `(pos0, feature, context)` through the sink.
//!
//! The `features_written` counter reflects every feature this recorder
//! accepted at step 5, including those later routed to the stop-list; the
//! histograms and the primary sink only see non-stopped features.
//!
//! # Concurrency
//! Counters are atomics, the sink sits behind a mutex, each histogram locks
//! itself, and the carve cache is an atomic test-and-insert set. Recorders
//! are shared by reference from many scanner threads.

pub mod quote;
mod sink;

pub use quote::{unquote_string, valid_dosname, validate_or_escape_utf8};
pub use sink::{FeatureSink, FileSink, NullSink};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tracing::{debug, warn};

use crate::errors::RecorderError;
use crate::histogram::{FeatureHistogram, HistogramDef};
use crate::pos0::Pos0;
use crate::recorder_set::SetCore;
use crate::sbuf::SBuf;
use crate::stdx::AtomicSet;

mod carve;
pub use carve::{CarveMode, CarveOutcome};

/// Behavior flags fixed in a recorder definition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RecorderFlags {
    /// Escape nothing; the scanner guarantees clean output.
    pub no_quote: bool,
    /// Output is XML: escape invalid UTF-8 but leave backslashes alone.
    pub xml: bool,
    /// Records carry no context column at all.
    pub no_context: bool,
    /// Features bypass the stop-list.
    pub no_stoplist: bool,
}

/// Definition of a feature recorder, declared by scanners at registration.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FeatureRecorderDef {
    pub name: String,
    /// Features longer than this are truncated after quoting.
    pub max_feature_size: usize,
    /// Contexts longer than this are truncated after quoting.
    pub max_context_size: usize,
    pub flags: RecorderFlags,
}

impl FeatureRecorderDef {
    pub const DEFAULT_MAX_FEATURE_SIZE: usize = 1024 * 1024;
    pub const DEFAULT_MAX_CONTEXT_SIZE: usize = 1024 * 1024;

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_feature_size: Self::DEFAULT_MAX_FEATURE_SIZE,
            max_context_size: Self::DEFAULT_MAX_CONTEXT_SIZE,
            flags: RecorderFlags::default(),
        }
    }

    pub fn with_flags(mut self, flags: RecorderFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Carve settings, adjustable by the owning scanner during init.
#[derive(Clone, Debug)]
struct CarveSettings {
    mode: CarveMode,
    /// Innermost path stage that does NOT count as "encoded" for this
    /// recorder (a ZIP carver does not re-carve plain ZIP members).
    do_not_carve_encoding: String,
}

/// A named feature sink with stop-list, histogram, and carving side-effects.
pub struct FeatureRecorder {
    def: FeatureRecorderDef,
    core: Arc<SetCore>,
    sink: Mutex<Box<dyn FeatureSink>>,
    features_written: AtomicU64,
    first_written: AtomicBool,
    carved_file_count: AtomicU64,
    carve_cache: AtomicSet,
    carve_settings: Mutex<CarveSettings>,
    histograms: Mutex<Vec<FeatureHistogram>>,
    context_window: usize,
    /// Wired by the set after construction; never set on the stoplist
    /// recorder itself (that would recurse).
    pub(crate) stop_list_recorder: OnceLock<Arc<FeatureRecorder>>,
}

impl FeatureRecorder {
    pub(crate) fn new(def: FeatureRecorderDef, core: Arc<SetCore>, sink: Box<dyn FeatureSink>) -> Self {
        let context_window = core.context_window;
        Self {
            def,
            core,
            sink: Mutex::new(sink),
            features_written: AtomicU64::new(0),
            first_written: AtomicBool::new(false),
            carved_file_count: AtomicU64::new(0),
            carve_cache: AtomicSet::new(),
            carve_settings: Mutex::new(CarveSettings {
                mode: CarveMode::Encoded,
                do_not_carve_encoding: String::new(),
            }),
            histograms: Mutex::new(Vec::new()),
            context_window,
            stop_list_recorder: OnceLock::new(),
        }
    }

    /// The recorder's name (its file is `{name}.txt` under the file backend).
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// The definition this recorder was created from.
    pub fn def(&self) -> &FeatureRecorderDef {
        &self.def
    }

    /// Features accepted so far (including stop-listed ones).
    pub fn features_written(&self) -> u64 {
        self.features_written.load(Ordering::Relaxed)
    }

    /// Files carved so far (cache hits do not count).
    pub fn carved_file_count(&self) -> u64 {
        self.carved_file_count.load(Ordering::Relaxed)
    }

    /// Sets the carve mode. Intended for scanner init.
    pub fn set_carve_mode(&self, mode: CarveMode) {
        self.carve_settings.lock().unwrap().mode = mode;
    }

    /// Sets the encoding stage this recorder refuses to carve from under
    /// [`CarveMode::Encoded`].
    pub fn set_do_not_carve_encoding(&self, encoding: impl Into<String>) {
        self.carve_settings.lock().unwrap().do_not_carve_encoding = encoding.into();
    }

    pub(crate) fn carve_settings(&self) -> (CarveMode, String) {
        let s = self.carve_settings.lock().unwrap();
        (s.mode, s.do_not_carve_encoding.clone())
    }

    pub(crate) fn carve_cache(&self) -> &AtomicSet {
        &self.carve_cache
    }

    pub(crate) fn core(&self) -> &SetCore {
        &self.core
    }

    pub(crate) fn next_carve_number(&self) -> u64 {
        self.carved_file_count.fetch_add(1, Ordering::Relaxed)
    }

    /// Attaches a histogram. Definitions already attached are merged
    /// silently (scanners may declare the same histogram independently).
    ///
    /// # Panics
    /// Panics if a feature has already been written: histograms must be
    /// attached during init, before any scanning.
    pub fn histogram_add(&self, def: HistogramDef) -> Result<(), RecorderError> {
        assert!(
            !self.first_written.load(Ordering::Acquire),
            "histogram added to recorder {:?} after first feature write",
            self.def.name
        );
        let mut histograms = self.histograms.lock().unwrap();
        if histograms.iter().any(|h| *h.def() == def) {
            return Ok(());
        }
        histograms.push(FeatureHistogram::new(def)?);
        Ok(())
    }

    /// Number of histograms attached.
    pub fn histogram_count(&self) -> usize {
        self.histograms.lock().unwrap().len()
    }

    /// Snapshot report of the histogram at `index`, for inspection.
    pub fn histogram_report(&self, index: usize) -> Option<Vec<crate::histogram::HistogramEntry>> {
        self.histograms.lock().unwrap().get(index).map(|h| h.report())
    }

    /// Writes one feature with its context. The canonical entry point.
    pub fn write(&self, pos0: &Pos0, feature: &[u8], context: &[u8]) -> Result<(), RecorderError> {
        if self.core.disabled {
            return Ok(());
        }
        if self.core.pedantic {
            assert!(
                feature.len() <= self.def.max_feature_size,
                "pedantic: feature of {} bytes exceeds max_feature_size={} on recorder {:?}",
                feature.len(),
                self.def.max_feature_size,
                self.def.name
            );
            assert!(
                context.len() <= self.def.max_context_size,
                "pedantic: context of {} bytes exceeds max_context_size={} on recorder {:?}",
                context.len(),
                self.def.max_context_size,
                self.def.name
            );
            for (what, bytes) in [("feature", feature), ("context", context)] {
                assert!(
                    !bytes.iter().any(|b| matches!(b, b'\t' | b'\n' | b'\r')),
                    "pedantic: raw {what} contains tab/newline/cr on recorder {:?}",
                    self.def.name
                );
            }
        }

        // Quoting policy is a 2-bit decision from the flags.
        let (escape_bad_utf8, escape_backslash) = if self.def.flags.no_quote {
            (false, false)
        } else if self.def.flags.xml {
            (true, false)
        } else {
            (true, true)
        };

        let mut feature_q = validate_or_escape_utf8(feature, escape_bad_utf8, escape_backslash);
        truncate_on_boundary(&mut feature_q, self.def.max_feature_size);

        let context_q = if self.def.flags.no_context {
            None
        } else {
            let mut c = validate_or_escape_utf8(context, escape_bad_utf8, escape_backslash);
            truncate_on_boundary(&mut c, self.def.max_context_size);
            Some(c)
        };

        if feature_q.is_empty() {
            warn!(recorder = %self.def.name, %pos0, "zero-length feature dropped");
            if self.core.pedantic {
                panic!("pedantic: zero-length feature at {pos0} on recorder {:?}", self.def.name);
            }
            return Ok(());
        }

        self.features_written.fetch_add(1, Ordering::Relaxed);
        self.first_written.store(true, Ordering::Release);
        if self.core.log_writes {
            debug!(recorder = %self.def.name, %pos0, feature = %feature_q, "feature write");
        }

        if !self.def.flags.no_stoplist {
            if let (Some(stop_list), Some(stop_rec)) =
                (self.core.stop_list.as_ref(), self.stop_list_recorder.get())
            {
                if stop_list.check_feature_context(&feature_q, context_q.as_deref().unwrap_or(""))
                {
                    return stop_rec.emit(pos0, &feature_q, context_q.as_deref());
                }
            }
        }

        for histogram in self.histograms.lock().unwrap().iter() {
            histogram.add(&feature_q);
        }

        self.emit(pos0, &feature_q, context_q.as_deref())
    }

    /// Sinks an already-validated record.
    fn emit(&self, pos0: &Pos0, feature: &str, context: Option<&str>) -> Result<(), RecorderError> {
        self.sink.lock().unwrap().write_record(pos0, feature, context)?;
        Ok(())
    }

    /// Writes the feature at `[pos, pos+len)` of `sbuf` with a computed
    /// context window.
    ///
    /// Positions inside the margin are silently dropped: the neighboring
    /// page owns those bytes and will report them. Positions past the buffer
    /// end are logged and dropped; a length overrunning the end is clamped.
    pub fn write_buf(&self, sbuf: &SBuf, pos: usize, len: usize) -> Result<(), RecorderError> {
        if pos >= sbuf.pagesize() && pos < sbuf.len() {
            return Ok(()); // margin; the next page scans these bytes
        }
        if pos >= sbuf.len() {
            warn!(recorder = %self.def.name, %sbuf, pos, "feature write outside buffer");
            return Ok(());
        }
        let len = len.min(sbuf.len() - pos);
        let feature = &sbuf.bytes()[pos..pos + len];

        let context: &[u8] = if self.def.flags.no_context {
            &[]
        } else {
            let lo = pos.saturating_sub(self.context_window);
            let hi = (pos + len + self.context_window).min(sbuf.len());
            &sbuf.bytes()[lo..hi]
        };

        self.write(&(sbuf.pos0() + pos as u64), feature, context)
    }

    /// Flushes buffered sink output.
    pub fn flush(&self) -> Result<(), RecorderError> {
        self.sink.lock().unwrap().flush()?;
        Ok(())
    }

    /// Drains in-memory state at end of scan.
    pub fn shutdown(&self) -> Result<(), RecorderError> {
        self.flush()
    }

    /// Materializes every attached histogram through the sink.
    pub fn histogram_flush_all(&self) -> Result<(), RecorderError> {
        if self.core.disabled {
            return Ok(());
        }
        let histograms = self.histograms.lock().unwrap();
        let mut sink = self.sink.lock().unwrap();
        for histogram in histograms.iter() {
            let entries = histogram.report();
            if !entries.is_empty() {
                sink.flush_histogram(histogram.def(), &entries)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for FeatureRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureRecorder")
            .field("name", &self.def.name)
            .field("features_written", &self.features_written())
            .field("carved_file_count", &self.carved_file_count())
            .finish()
    }
}

/// Truncates to at most `max` bytes without splitting a UTF-8 sequence.
fn truncate_on_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut cut = max;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}
