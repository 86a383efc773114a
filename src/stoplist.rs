//! Stop-lists: features routed away from their primary recorder.
//!
//! A stop-list holds plain feature entries and feature+context pairs.
//! During the write pipeline, a matching feature is redirected to the set's
//! stoplist recorder instead of the recorder the scanner asked for; the
//! primary's histograms never see it. Matching is read-only after
//! construction, so lookups take `&self` and need no locking.

use ahash::AHashSet;

/// Word-and-context matcher for feature suppression.
#[derive(Debug, Default)]
pub struct StopList {
    features: AHashSet<String>,
    feature_context: AHashSet<(String, String)>,
}

impl StopList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a feature stopped in any context.
    pub fn add_feature(&mut self, feature: impl Into<String>) {
        self.features.insert(feature.into());
    }

    /// Adds a feature stopped only when it appears with this exact context.
    pub fn add_feature_context(&mut self, feature: impl Into<String>, context: impl Into<String>) {
        self.feature_context.insert((feature.into(), context.into()));
    }

    /// Loads entries from `feature` or `feature<TAB>context` lines.
    ///
    /// Blank lines and `#` comments are skipped.
    pub fn load(&mut self, text: &str) {
        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('\t') {
                Some((feature, context)) => self.add_feature_context(feature, context),
                None => self.add_feature(line),
            }
        }
    }

    /// Whether this feature (in this context) is stop-listed.
    pub fn check_feature_context(&self, feature: &str, context: &str) -> bool {
        self.features.contains(feature)
            || self
                .feature_context
                .contains(&(feature.to_string(), context.to_string()))
    }

    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.features.len() + self.feature_context.len()
    }

    /// Returns whether the stop-list has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_feature_matches_any_context() {
        let mut sl = StopList::new();
        sl.add_feature("spam");
        assert!(sl.check_feature_context("spam", "anything"));
        assert!(sl.check_feature_context("spam", ""));
        assert!(!sl.check_feature_context("ham", ""));
    }

    #[test]
    fn pair_requires_exact_context() {
        let mut sl = StopList::new();
        sl.add_feature_context("root@localhost", "boot log");
        assert!(sl.check_feature_context("root@localhost", "boot log"));
        assert!(!sl.check_feature_context("root@localhost", "mail spool"));
    }

    #[test]
    fn load_parses_comments_and_pairs() {
        let mut sl = StopList::new();
        sl.load("# comment\nspam\nroot@local\tboot log\n\n");
        assert_eq!(sl.len(), 2);
        assert!(sl.check_feature_context("spam", "x"));
        assert!(sl.check_feature_context("root@local", "boot log"));
    }
}
