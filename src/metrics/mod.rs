use std::collections::HashMap;

use anyhow::{Context, Result};
use globset::{Glob, GlobMatcher};

use crate::record::MetricRecord;

/// Metric definition registry: exact-name definitions plus glob patterns
/// that materialize new definitions on first match.
///
/// Glob resolution is first-match by insertion order; overlapping globs have
/// no precedence beyond that.
#[derive(Debug, Default)]
pub struct MetricRegistry {
    defined: HashMap<String, MetricRecord>,
    globs: Vec<GlobMetric>,
}

#[derive(Debug)]
struct GlobMetric {
    pattern: String,
    matcher: GlobMatcher,
    metric: MetricRecord,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or updates a defined metric keyed by its name.
    pub fn upsert_defined(&mut self, metric: MetricRecord) {
        self.defined.insert(metric.name.clone(), metric);
    }

    /// Inserts or updates a glob metric keyed by its pattern. A replaced
    /// pattern keeps its original position in the match order.
    pub fn upsert_glob(&mut self, metric: MetricRecord) -> Result<()> {
        let pattern = metric.glob_name.clone();
        let matcher = Glob::new(&pattern)
            .with_context(|| format!("invalid metric glob {pattern:?}"))?
            .compile_matcher();

        if let Some(existing) = self.globs.iter_mut().find(|g| g.pattern == pattern) {
            existing.matcher = matcher;
            existing.metric = metric;
        } else {
            self.globs.push(GlobMetric {
                pattern,
                matcher,
                metric,
            });
        }

        Ok(())
    }

    /// Looks up the defined metric for `key`.
    pub fn defined(&self, key: &str) -> Option<&MetricRecord> {
        self.defined.get(key)
    }

    pub fn contains_defined(&self, key: &str) -> bool {
        self.defined.contains_key(key)
    }

    /// Materializes a defined metric for `key` from the first matching glob.
    ///
    /// The new metric inherits the glob's options with `name = key`; it is
    /// returned for the caller to register and announce downstream. Returns
    /// `None` when no glob matches.
    pub fn materialize_glob(&self, key: &str) -> Option<MetricRecord> {
        let glob = self.globs.iter().find(|g| g.matcher.is_match(key))?;

        let mut metric = glob.metric.clone();
        metric.name = key.to_string();
        metric.glob_name = String::new();
        Some(metric)
    }

    /// Number of defined metrics.
    pub fn defined_len(&self) -> usize {
        self.defined.len()
    }

    /// Number of glob patterns.
    pub fn glob_len(&self) -> usize {
        self.globs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MetricOptions;

    fn glob_metric(pattern: &str, step_metric: &str) -> MetricRecord {
        MetricRecord {
            glob_name: pattern.to_string(),
            step_metric: step_metric.to_string(),
            options: MetricOptions {
                step_sync: true,
                hidden: false,
            },
            ..MetricRecord::default()
        }
    }

    #[test]
    fn test_defined_lookup() {
        let mut registry = MetricRegistry::new();
        registry.upsert_defined(MetricRecord::defined("loss"));

        assert!(registry.contains_defined("loss"));
        assert!(registry.defined("accuracy").is_none());
    }

    #[test]
    fn test_materialize_glob_inherits_options() {
        let mut registry = MetricRegistry::new();
        registry
            .upsert_glob(glob_metric("train/*", "train/step"))
            .expect("glob should compile");

        let metric = registry
            .materialize_glob("train/loss")
            .expect("glob should match");
        assert_eq!(metric.name, "train/loss");
        assert!(metric.glob_name.is_empty());
        assert_eq!(metric.step_metric, "train/step");
        assert!(metric.options.step_sync);
    }

    #[test]
    fn test_glob_first_match_is_insertion_order() {
        let mut registry = MetricRegistry::new();
        registry
            .upsert_glob(glob_metric("train/*", "first"))
            .expect("glob should compile");
        registry
            .upsert_glob(glob_metric("train/loss*", "second"))
            .expect("glob should compile");

        let metric = registry
            .materialize_glob("train/loss")
            .expect("glob should match");
        assert_eq!(metric.step_metric, "first");
    }

    #[test]
    fn test_glob_upsert_keeps_position() {
        let mut registry = MetricRegistry::new();
        registry
            .upsert_glob(glob_metric("train/*", "first"))
            .expect("glob should compile");
        registry
            .upsert_glob(glob_metric("eval/*", "eval/step"))
            .expect("glob should compile");
        registry
            .upsert_glob(glob_metric("train/*", "updated"))
            .expect("glob should compile");

        assert_eq!(registry.glob_len(), 2);
        let metric = registry
            .materialize_glob("train/loss")
            .expect("glob should match");
        assert_eq!(metric.step_metric, "updated");
    }

    #[test]
    fn test_no_glob_match() {
        let mut registry = MetricRegistry::new();
        registry
            .upsert_glob(glob_metric("train/*", "train/step"))
            .expect("glob should compile");

        assert!(registry.materialize_glob("eval/loss").is_none());
    }

    #[test]
    fn test_invalid_glob_is_rejected() {
        let mut registry = MetricRegistry::new();
        let result = registry.upsert_glob(glob_metric("train/[", ""));
        assert!(result.is_err());
        assert_eq!(registry.glob_len(), 0);
    }
}
