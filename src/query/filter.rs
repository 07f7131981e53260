//! Label filtering.
//!
//! A filter is a list of equality conjunctions combined with OR:
//! `[{k1: v1, k2: v2}, {k1: v3}]` matches a series when all pairs of any
//! one element are present in its labels. Keys not mentioned are
//! wildcards; an empty filter matches every series.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::storage::SeriesRow;
use crate::Labels;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct LabelFilter(pub Vec<BTreeMap<String, String>>);

impl LabelFilter {
    pub fn any() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse the `labels` query parameter (a JSON array of objects; a bare
    /// object is accepted as a single-conjunct shorthand).
    pub fn parse(raw: &str) -> Option<Self> {
        if let Ok(list) = serde_json::from_str::<Vec<BTreeMap<String, String>>>(raw) {
            return Some(Self(list));
        }
        serde_json::from_str::<BTreeMap<String, String>>(raw)
            .ok()
            .map(|single| Self(vec![single]))
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        if self.0.is_empty() {
            return true;
        }
        self.0.iter().any(|conjunct| labels.contains_all(conjunct))
    }

    /// Keep only the catalog rows whose labels survive the filter.
    pub fn apply(&self, series: Vec<SeriesRow>) -> Vec<SeriesRow> {
        if self.0.is_empty() {
            return series;
        }
        series
            .into_iter()
            .filter(|s| self.matches(&Labels::from_canonical(&s.labels_canonical)))
            .collect()
    }
}

impl From<Vec<BTreeMap<String, String>>> for LabelFilter {
    fn from(list: Vec<BTreeMap<String, String>>) -> Self {
        Self(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        Labels(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = LabelFilter::any();
        assert!(filter.matches(&labels(&[])));
        assert!(filter.matches(&labels(&[("sensor", "CPU Temp")])));
    }

    #[test]
    fn test_conjunction_and_disjunction() {
        let filter = LabelFilter::parse(
            r#"[{"sensor": "CPU Temp", "zone": "0"}, {"sensor": "VRM Temp"}]"#,
        )
        .unwrap();

        assert!(filter.matches(&labels(&[("sensor", "CPU Temp"), ("zone", "0")])));
        assert!(filter.matches(&labels(&[("sensor", "VRM Temp"), ("zone", "9")])));
        // First conjunct incomplete, second doesn't match.
        assert!(!filter.matches(&labels(&[("sensor", "CPU Temp"), ("zone", "1")])));
        assert!(!filter.matches(&labels(&[])));
    }

    #[test]
    fn test_bare_object_shorthand() {
        let filter = LabelFilter::parse(r#"{"mountpoint": "/"}"#).unwrap();
        assert!(filter.matches(&labels(&[("mountpoint", "/"), ("fs", "ext4")])));
        assert!(!filter.matches(&labels(&[("mountpoint", "/data")])));
    }

    #[test]
    fn test_garbage_is_none() {
        assert!(LabelFilter::parse("not json").is_none());
    }
}
