//! In-memory feature histograms with optional regex projection.
//!
//! A histogram is a multiset over the features written to one recorder.
//! Before tallying, a feature passes through the definition's filters: a
//! `require` substring gate, a regex projection (first capture group when
//! the pattern has one, otherwise the whole match), and optional
//! lowercasing. Features failing the gate or the pattern are not counted.
//!
//! # Concurrency
//! Each histogram guards its multiset with its own mutex; `add` is safe from
//! any number of scanner threads. Counts are eventually consistent with the
//! feature sink: the tally for a write lands before the sink line does.

use std::sync::Mutex;

use ahash::AHashMap;
use regex::Regex;

use crate::errors::RecorderError;

/// Projection/filter flags for a histogram definition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct HistogramFlags {
    /// Lowercase features before tallying (case-folds the histogram).
    pub lowercase: bool,
}

/// Specification of one histogram over one feature recorder.
///
/// Two definitions are the same histogram iff all fields match; scanner
/// registration dedups on that equality.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HistogramDef {
    /// Name of the feature recorder this histogram tallies.
    pub feature: String,
    /// Regex projection; empty string means "count the feature verbatim".
    pub pattern: String,
    /// Only lines containing this substring are tallied; empty means all.
    pub require: String,
    /// Output-name suffix: the report lands in `{feature}_{suffix}.txt`.
    pub suffix: String,
    pub flags: HistogramFlags,
}

impl HistogramDef {
    /// A verbatim histogram over `feature`, reported under `suffix`.
    pub fn new(feature: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            feature: feature.into(),
            pattern: String::new(),
            require: String::new(),
            suffix: suffix.into(),
            flags: HistogramFlags::default(),
        }
    }

    /// Sets the regex projection pattern.
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    /// Sets the require-substring gate.
    pub fn with_require(mut self, require: impl Into<String>) -> Self {
        self.require = require.into();
        self
    }

    /// Enables case-folding.
    pub fn lowercase(mut self) -> Self {
        self.flags.lowercase = true;
        self
    }
}

/// One row of a histogram report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistogramEntry {
    pub count: u64,
    pub feature: String,
}

/// A live multiset attached to a feature recorder.
#[derive(Debug)]
pub struct FeatureHistogram {
    def: HistogramDef,
    pattern: Option<Regex>,
    counts: Mutex<AHashMap<String, u64>>,
}

impl FeatureHistogram {
    /// Compiles the definition's pattern and creates an empty histogram.
    pub fn new(def: HistogramDef) -> Result<Self, RecorderError> {
        let pattern = if def.pattern.is_empty() {
            None
        } else {
            Some(Regex::new(&def.pattern).map_err(|err| RecorderError::BadHistogramPattern {
                pattern: def.pattern.clone(),
                detail: err.to_string(),
            })?)
        };
        Ok(Self { def, pattern, counts: Mutex::new(AHashMap::new()) })
    }

    /// The definition this histogram was built from.
    pub fn def(&self) -> &HistogramDef {
        &self.def
    }

    /// Tallies one feature, applying the require gate and projection.
    pub fn add(&self, feature: &str) {
        if !self.def.require.is_empty() && !feature.contains(&self.def.require) {
            return;
        }
        let projected = match &self.pattern {
            None => feature,
            Some(re) => match re.captures(feature) {
                None => return,
                Some(caps) => caps.get(1).or_else(|| caps.get(0)).map_or("", |m| m.as_str()),
            },
        };
        if projected.is_empty() {
            return;
        }
        let key =
            if self.def.flags.lowercase { projected.to_lowercase() } else { projected.to_string() };
        *self.counts.lock().unwrap().entry(key).or_insert(0) += 1;
    }

    /// Number of distinct tallied features.
    pub fn distinct(&self) -> usize {
        self.counts.lock().unwrap().len()
    }

    /// Snapshot of the histogram, sorted by descending count then feature.
    pub fn report(&self) -> Vec<HistogramEntry> {
        let counts = self.counts.lock().unwrap();
        let mut entries: Vec<HistogramEntry> = counts
            .iter()
            .map(|(feature, count)| HistogramEntry { count: *count, feature: feature.clone() })
            .collect();
        entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.feature.cmp(&b.feature)));
        entries
    }
}
