//! Container image vulnerability evidence from `trivy image`.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;
use triage_core::{
    CollectedEvidence, EvidenceCollector, EvidenceItem, Result, ScalarValue, SourceKind,
    SummaryScalar, TriageError,
};

use crate::command::ToolCommand;

const SOURCE: &str = "trivy";

/// Severities scanned for when none are given.
pub const DEFAULT_SEVERITIES: &str = "HIGH,CRITICAL";

#[derive(Debug, Deserialize)]
struct TrivyReport {
    #[serde(rename = "Results", default)]
    results: Option<Vec<TrivyResult>>,
}

#[derive(Debug, Deserialize)]
struct TrivyResult {
    #[serde(rename = "Target", default)]
    target: String,
    #[serde(rename = "Vulnerabilities", default)]
    vulnerabilities: Option<Vec<TrivyVulnerability>>,
}

#[derive(Debug, Deserialize)]
struct TrivyVulnerability {
    #[serde(rename = "VulnerabilityID")]
    id: String,
    #[serde(rename = "PkgName", default)]
    package: String,
    #[serde(rename = "InstalledVersion", default)]
    installed_version: String,
    #[serde(rename = "FixedVersion")]
    fixed_version: Option<String>,
    #[serde(rename = "Severity", default)]
    severity: String,
    #[serde(rename = "Title")]
    title: Option<String>,
    #[serde(rename = "Description")]
    description: Option<String>,
}

/// Ranking weight for a Trivy severity label.
pub fn severity_weight(severity: &str) -> f64 {
    match severity.to_ascii_uppercase().as_str() {
        "CRITICAL" => 4.0,
        "HIGH" => 3.0,
        "MEDIUM" => 2.0,
        "LOW" => 1.0,
        _ => 0.0,
    }
}

/// Convert `trivy image --format json` output into evidence for `image`.
///
/// Vulnerabilities are deduplicated by id across scan targets.
pub fn parse_report(json: &str, image: &str) -> Result<CollectedEvidence> {
    let report: TrivyReport = serde_json::from_str(json).map_err(|e| {
        TriageError::source_unavailable(SOURCE, format!("unexpected trivy output: {e}"))
    })?;

    let mut evidence = CollectedEvidence::new(image);
    let mut seen = HashSet::new();
    let (mut critical, mut high) = (0u64, 0u64);

    for result in report.results.unwrap_or_default() {
        for vuln in result.vulnerabilities.unwrap_or_default() {
            if !seen.insert(vuln.id.clone()) {
                continue;
            }
            match vuln.severity.to_ascii_uppercase().as_str() {
                "CRITICAL" => critical += 1,
                "HIGH" => high += 1,
                _ => {}
            }

            let fixed = vuln
                .fixed_version
                .as_deref()
                .filter(|v| !v.is_empty())
                .unwrap_or("not available");
            let mut detail = format!(
                "package: {} {}\nseverity: {}\nfixed in: {}\ntarget: {}",
                vuln.package, vuln.installed_version, vuln.severity, fixed, result.target
            );
            if let Some(title) = vuln.title.as_deref().filter(|t| !t.is_empty()) {
                detail.push_str(&format!("\ntitle: {title}"));
            }
            if let Some(description) = vuln.description.as_deref().filter(|d| !d.is_empty()) {
                detail.push_str(&format!("\n{description}"));
            }

            evidence.items.push(
                EvidenceItem::new(
                    SourceKind::Vulnerability,
                    format!("{} in {}", vuln.id, vuln.package),
                    detail,
                )
                .with_weight(severity_weight(&vuln.severity)),
            );
        }
    }

    evidence.summary = vec![
        SummaryScalar::count("total", evidence.items.len() as u64),
        SummaryScalar::count("critical", critical),
        SummaryScalar::count("high", high),
    ];
    evidence
        .follow_ups
        .push(format!("trivy image --severity CRITICAL {image}"));
    Ok(evidence)
}

/// Scans one container image.
#[derive(Debug, Clone)]
pub struct TrivyCollector {
    image: String,
    severities: String,
    timeout: Duration,
}

impl TrivyCollector {
    pub fn new(image: &str) -> Self {
        Self {
            image: image.to_string(),
            severities: DEFAULT_SEVERITIES.to_string(),
            timeout: Duration::from_secs(600),
        }
    }

    /// Comma-separated severity filter, e.g. `HIGH,CRITICAL`.
    pub fn with_severities(mut self, severities: &str) -> Self {
        self.severities = severities.to_ascii_uppercase();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl EvidenceCollector for TrivyCollector {
    fn source(&self) -> &str {
        SOURCE
    }

    async fn collect(&self) -> Result<CollectedEvidence> {
        info!(image = %self.image, severities = %self.severities, "scanning image");
        let stdout = ToolCommand::new(SOURCE, "trivy")
            .args(["image", "--quiet", "--format", "json", "--severity"])
            .arg(self.severities.as_str())
            .arg(self.image.as_str())
            .timeout(self.timeout)
            .run_checked()
            .await?;
        parse_report(&stdout, &self.image)
    }
}

/// Vulnerability counts of one scanned image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageScore {
    pub image: String,
    pub critical: u64,
    pub high: u64,
    pub total: u64,
}

impl ImageScore {
    /// Read the counts `parse_report` puts in the summary.
    pub fn from_evidence(evidence: &CollectedEvidence) -> Self {
        let count = |label: &str| {
            evidence
                .summary
                .iter()
                .find(|s| s.label == label)
                .and_then(|s| match s.value {
                    ScalarValue::Count(n) => Some(n),
                    _ => None,
                })
                .unwrap_or(0)
        };
        Self {
            image: evidence.subject.clone(),
            critical: count("critical"),
            high: count("high"),
            total: count("total"),
        }
    }
}

/// Order images safest first: fewest critical, then high, then total findings.
pub fn rank_images(scans: &[CollectedEvidence]) -> Vec<ImageScore> {
    let mut scores: Vec<ImageScore> = scans.iter().map(ImageScore::from_evidence).collect();
    scores.sort_by(|a, b| {
        (a.critical, a.high, a.total)
            .cmp(&(b.critical, b.high, b.total))
            .then_with(|| a.image.cmp(&b.image))
    });
    scores
}

/// Ranked comparison table, one row per image.
pub fn render_comparison(scores: &[ImageScore]) -> String {
    let width = scores
        .iter()
        .map(|s| s.image.len())
        .chain(std::iter::once("IMAGE".len()))
        .max()
        .unwrap_or(0);
    let mut out = format!(
        "{:<4} {:<width$}  {:>8}  {:>6}  {:>6}\n",
        "RANK", "IMAGE", "CRITICAL", "HIGH", "TOTAL"
    );
    for (rank, score) in scores.iter().enumerate() {
        out.push_str(&format!(
            "{:<4} {:<width$}  {:>8}  {:>6}  {:>6}\n",
            rank + 1,
            score.image,
            score.critical,
            score.high,
            score.total
        ));
    }
    out
}
