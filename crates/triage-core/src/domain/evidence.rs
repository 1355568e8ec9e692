//! Evidence records produced by collectors and bounded by the normalizer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of external signal an evidence item was derived from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Vulnerability,
    PodStatus,
    ContainerState,
    PodLogs,
    ClusterEvent,
    ServiceCost,
    WorkflowJob,
    Custom,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Vulnerability => "vulnerability",
            SourceKind::PodStatus => "pod_status",
            SourceKind::ContainerState => "container_state",
            SourceKind::PodLogs => "pod_logs",
            SourceKind::ClusterEvent => "cluster_event",
            SourceKind::ServiceCost => "service_cost",
            SourceKind::WorkflowJob => "workflow_job",
            SourceKind::Custom => "custom",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single fact about the target. Fields are read-only after construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceItem {
    source_kind: SourceKind,
    label: String,
    detail: String,
    weight: Option<f64>,
    observed_at: Option<DateTime<Utc>>,
}

impl EvidenceItem {
    /// Create an item with no severity/cost and no timestamp.
    pub fn new(source_kind: SourceKind, label: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            source_kind,
            label: label.into(),
            detail: detail.into(),
            weight: None,
            observed_at: None,
        }
    }

    /// Set the severity or cost used for ranking.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Set when the signal was observed.
    pub fn with_timestamp(mut self, observed_at: DateTime<Utc>) -> Self {
        self.observed_at = Some(observed_at);
        self
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source_kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    /// Severity or cost, higher ranks first.
    pub fn weight(&self) -> Option<f64> {
        self.weight
    }

    pub fn observed_at(&self) -> Option<DateTime<Utc>> {
        self.observed_at
    }

    /// Copy of this item with its detail replaced. Used by the normalizer.
    pub(crate) fn with_detail(&self, detail: String) -> Self {
        Self {
            detail,
            ..self.clone()
        }
    }
}

/// Value of a bundle-level summary scalar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ScalarValue {
    Count(u64),
    Amount(f64),
    Text(String),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Count(n) => write!(f, "{}", n),
            ScalarValue::Amount(v) => write!(f, "{:.2}", v),
            ScalarValue::Text(s) => f.write_str(s),
        }
    }
}

/// Named scalar describing the bundle as a whole (total cost, failed jobs, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryScalar {
    pub label: String,
    pub value: ScalarValue,
}

impl SummaryScalar {
    pub fn count(label: impl Into<String>, value: u64) -> Self {
        Self {
            label: label.into(),
            value: ScalarValue::Count(value),
        }
    }

    pub fn amount(label: impl Into<String>, value: f64) -> Self {
        Self {
            label: label.into(),
            value: ScalarValue::Amount(value),
        }
    }

    pub fn text(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: ScalarValue::Text(value.into()),
        }
    }
}

/// Raw output of a collector, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectedEvidence {
    /// What is being diagnosed (image, pod, repository, request text).
    pub subject: String,
    pub items: Vec<EvidenceItem>,
    pub summary: Vec<SummaryScalar>,
    /// Links or commands shown to the operator under the report.
    pub follow_ups: Vec<String>,
}

impl CollectedEvidence {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Self::default()
        }
    }
}

/// Normalized, bounded evidence ready for prompting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvidenceBundle {
    pub subject: String,
    /// Ranked, truncated items, at most `budget` of them.
    pub items: Vec<EvidenceItem>,
    /// Items that ranked below the budget cut.
    pub omitted_count: usize,
    /// Exact duplicates dropped after ranking; the highest-ranked copy is kept.
    pub duplicates_removed: usize,
    pub summary: Vec<SummaryScalar>,
}

impl EvidenceBundle {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Look up a summary scalar by label.
    pub fn scalar(&self, label: &str) -> Option<&ScalarValue> {
        self.summary
            .iter()
            .find(|s| s.label == label)
            .map(|s| &s.value)
    }
}
