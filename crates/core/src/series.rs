//! Result series keyed by request identifier (`refId`) and the Series Matcher.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// One result series: a label set and its sample value(s).
/// Instant queries carry a single value; range queries a small vector.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Series {
    pub labels: BTreeMap<String, String>,
    pub values: SmallVec<[f64; 2]>,
}

impl Series {
    pub fn new() -> Self { Self::default() }

    pub fn with_label(mut self, name: &str, value: &str) -> Self {
        self.labels.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_value(mut self, v: f64) -> Self {
        self.values.push(v);
        self
    }

    pub fn label(&self, name: &str) -> Option<&str> { self.labels.get(name).map(|s| s.as_str()) }

    /// Most recent sample.
    pub fn value(&self) -> Option<f64> { self.values.last().copied() }
}

/// Results of one batch, routed by `refId` so different queries never collide.
#[derive(Debug, Clone, Default)]
pub struct QueryResults {
    by_ref: FxHashMap<String, Vec<Series>>,
}

impl QueryResults {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&mut self, ref_id: impl Into<String>, series: Vec<Series>) {
        self.by_ref.insert(ref_id.into(), series);
    }

    pub fn get(&self, ref_id: &str) -> Option<&[Series]> { self.by_ref.get(ref_id).map(|v| v.as_slice()) }

    pub fn contains(&self, ref_id: &str) -> bool { self.by_ref.contains_key(ref_id) }

    pub fn len(&self) -> usize { self.by_ref.len() }

    pub fn is_empty(&self) -> bool { self.by_ref.is_empty() }
}

/// Explicit matcher value object: every listed label must equal its value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SeriesMatcher {
    fields: SmallVec<[(String, String); 2]>,
}

impl SeriesMatcher {
    pub fn new() -> Self { Self::default() }

    pub fn field(mut self, label: &str, value: &str) -> Self {
        self.fields.push((label.to_string(), value.to_string()));
        self
    }

    pub fn matches(&self, series: &Series) -> bool {
        self.fields.iter().all(|(k, v)| series.label(k) == Some(v.as_str()))
    }
}

/// Value of the first series in `ref_id` matching `matcher`.
///
/// `None` means unknown (no result set or no matching series); it is never
/// collapsed to `0`, which is a valid metric value.
pub fn get_series_value(results: &QueryResults, ref_id: &str, matcher: &SeriesMatcher) -> Option<f64> {
    results.get(ref_id)?.iter().find(|s| matcher.matches(s)).and_then(|s| s.value())
}

/// Number of series in `ref_id` matching `matcher`; `None` when the result set is missing.
pub fn count_matching_series(results: &QueryResults, ref_id: &str, matcher: &SeriesMatcher) -> Option<usize> {
    results.get(ref_id).map(|series| series.iter().filter(|s| matcher.matches(s)).count())
}
