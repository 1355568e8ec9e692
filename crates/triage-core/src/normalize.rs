//! Evidence normalizer.
//!
//! Bounds raw collector output into an [`EvidenceBundle`]: duplicates are
//! dropped, items are ranked, details are truncated and the item count is
//! capped. Anything cut by the budget is counted, never silently lost.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::domain::{EvidenceBundle, EvidenceItem, Result, SourceKind, TriageError};

/// Marker appended to a detail that was cut.
pub const TRUNCATION_MARKER: &str = "\n[... truncated]";

/// Configuration for the normalizer.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizePolicy {
    /// Maximum number of items included in the bundle.
    pub budget: usize,

    /// Maximum characters kept from each item's detail.
    pub max_detail_chars: usize,

    /// Fail on empty input instead of returning an empty bundle.
    pub require_evidence: bool,
}

impl Default for NormalizePolicy {
    fn default() -> Self {
        Self {
            budget: 8,
            max_detail_chars: 2000,
            require_evidence: true,
        }
    }
}

/// Ranking order: weight desc, then most recent first, then collection order.
///
/// Items without a weight rank after every weighted item; undated items rank
/// after dated ones with the same weight.
fn rank(a: &(usize, EvidenceItem), b: &(usize, EvidenceItem)) -> Ordering {
    let by_weight = match (a.1.weight(), b.1.weight()) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    let by_recency = match (a.1.observed_at(), b.1.observed_at()) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_weight.then(by_recency).then(a.0.cmp(&b.0))
}

/// Cut `detail` to `max_chars` characters, appending [`TRUNCATION_MARKER`].
pub fn truncate_detail(detail: &str, max_chars: usize) -> String {
    match detail.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{}", &detail[..byte_idx], TRUNCATION_MARKER),
        None => detail.to_string(),
    }
}

/// Normalize raw items into a bounded bundle.
///
/// The returned bundle has no subject or summary; the pipeline attaches those
/// from the collector output.
pub fn normalize(
    raw_items: Vec<EvidenceItem>,
    policy: &NormalizePolicy,
    profile_name: &str,
) -> Result<EvidenceBundle> {
    if raw_items.is_empty() && policy.require_evidence {
        return Err(TriageError::EvidenceEmpty {
            profile: profile_name.to_string(),
        });
    }

    let mut ranked: Vec<(usize, EvidenceItem)> = raw_items.into_iter().enumerate().collect();
    ranked.sort_by(rank);

    let mut seen: HashSet<(SourceKind, String, String)> = HashSet::new();
    let mut duplicates_removed = 0;
    let mut unique = Vec::with_capacity(ranked.len());
    for (_, item) in ranked {
        let key = (
            item.source_kind(),
            item.label().to_string(),
            item.detail().to_string(),
        );
        if seen.insert(key) {
            unique.push(item);
        } else {
            duplicates_removed += 1;
        }
    }

    let omitted_count = unique.len().saturating_sub(policy.budget);
    let items = unique
        .iter()
        .take(policy.budget)
        .map(|item| item.with_detail(truncate_detail(item.detail(), policy.max_detail_chars)))
        .collect();

    Ok(EvidenceBundle {
        subject: String::new(),
        items,
        omitted_count,
        duplicates_removed,
        summary: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .expect("parse RFC3339")
            .with_timezone(&Utc)
    }

    fn item(label: &str, weight: Option<f64>) -> EvidenceItem {
        let item = EvidenceItem::new(SourceKind::Custom, label, format!("detail for {label}"));
        match weight {
            Some(w) => item.with_weight(w),
            None => item,
        }
    }

    fn labels(bundle: &EvidenceBundle) -> Vec<&str> {
        bundle.items.iter().map(|i| i.label()).collect()
    }

    #[test]
    fn test_empty_input_required_fails() {
        let err = normalize(vec![], &NormalizePolicy::default(), "pod-failure").unwrap_err();
        assert!(matches!(err, TriageError::EvidenceEmpty { .. }));
    }

    #[test]
    fn test_empty_input_tolerated_for_generation() {
        let policy = NormalizePolicy {
            require_evidence: false,
            ..NormalizePolicy::default()
        };
        let bundle = normalize(vec![], &policy, "terraform").expect("normalize");
        assert!(bundle.is_empty());
        assert_eq!(bundle.omitted_count, 0);
    }

    #[test]
    fn test_ranks_by_weight_desc() {
        let items = vec![
            item("low", Some(1.0)),
            item("high", Some(9.0)),
            item("none", None),
            item("mid", Some(4.0)),
        ];
        let bundle = normalize(items, &NormalizePolicy::default(), "t").expect("normalize");
        assert_eq!(labels(&bundle), vec!["high", "mid", "low", "none"]);
    }

    #[test]
    fn test_ties_broken_by_recency_then_collection_order() {
        let items = vec![
            item("a-undated", Some(3.0)),
            item("b-old", Some(3.0)).with_timestamp(ts("2026-01-01T00:00:00Z")),
            item("c-undated", Some(3.0)),
            item("d-new", Some(3.0)).with_timestamp(ts("2026-02-01T00:00:00Z")),
            item("e-old", Some(3.0)).with_timestamp(ts("2026-01-01T00:00:00Z")),
        ];
        let bundle = normalize(items, &NormalizePolicy::default(), "t").expect("normalize");
        assert_eq!(
            labels(&bundle),
            vec!["d-new", "b-old", "e-old", "a-undated", "c-undated"]
        );
    }

    #[test]
    fn test_budget_caps_and_counts_omitted() {
        let items: Vec<EvidenceItem> = (0..12)
            .map(|i| item(&format!("item-{i:02}"), Some(i as f64)))
            .collect();
        let policy = NormalizePolicy {
            budget: 5,
            ..NormalizePolicy::default()
        };
        let bundle = normalize(items, &policy, "t").expect("normalize");
        assert_eq!(bundle.items.len(), 5);
        assert_eq!(bundle.omitted_count, 7);
        assert_eq!(labels(&bundle)[0], "item-11");
    }

    #[test]
    fn test_duplicates_removed_and_counted() {
        let items = vec![item("same", Some(2.0)), item("same", Some(2.0)), item("other", Some(1.0))];
        let bundle = normalize(items, &NormalizePolicy::default(), "t").expect("normalize");
        assert_eq!(labels(&bundle), vec!["same", "other"]);
        assert_eq!(bundle.duplicates_removed, 1);
    }

    #[test]
    fn test_detail_truncated_with_marker() {
        let long = "x".repeat(2500);
        let items = vec![EvidenceItem::new(SourceKind::PodLogs, "logs", long)];
        let bundle = normalize(items, &NormalizePolicy::default(), "t").expect("normalize");
        let detail = bundle.items[0].detail();
        assert!(detail.ends_with(TRUNCATION_MARKER));
        assert_eq!(detail.chars().count(), 2000 + TRUNCATION_MARKER.chars().count());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let detail = "ééééé";
        assert_eq!(truncate_detail(detail, 3), format!("ééé{}", TRUNCATION_MARKER));
        assert_eq!(truncate_detail(detail, 5), "ééééé");
    }
}
