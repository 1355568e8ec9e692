//! Report rendering and persistence.
//!
//! A [`TriageReport`] is the durable output of one run. It renders as plain
//! text for the terminal and persists as pretty JSON via an atomic
//! temp-file-then-rename write.

use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::domain::{
    EvidenceBundle, GeneratedArtifactSet, Result, SourceKind, SummaryScalar, TriageError,
    TriageOutcome,
};
use crate::parse::is_safe_filename;

/// Version of the persisted report layout.
pub const SCHEMA_VERSION: &str = "1.0";

const RULE_WIDTH: usize = 72;

/// One evidence item as recorded in a report (detail text is not persisted).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceLine {
    pub kind: SourceKind,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<DateTime<Utc>>,
}

/// Evidence section of a report.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EvidenceSummary {
    pub items: Vec<EvidenceLine>,
    pub omitted_count: usize,
    pub duplicates_removed: usize,
    pub summary: Vec<SummaryScalar>,
}

impl From<&EvidenceBundle> for EvidenceSummary {
    fn from(bundle: &EvidenceBundle) -> Self {
        Self {
            items: bundle
                .items
                .iter()
                .map(|item| EvidenceLine {
                    kind: item.source_kind(),
                    label: item.label().to_string(),
                    weight: item.weight(),
                    observed_at: item.observed_at(),
                })
                .collect(),
            omitted_count: bundle.omitted_count,
            duplicates_removed: bundle.duplicates_removed,
            summary: bundle.summary.clone(),
        }
    }
}

/// Persisted result of a triage run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriageReport {
    pub schema_version: String,
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    /// Task profile name.
    pub tool: String,
    pub model: String,
    pub subject: String,
    /// Hex SHA-256 of the exact prompt sent to the model.
    pub prompt_sha256: String,
    pub evidence: EvidenceSummary,
    pub outcome: TriageOutcome,
    #[serde(default)]
    pub follow_ups: Vec<String>,
}

impl TriageReport {
    pub fn new(
        run_id: Uuid,
        tool: &str,
        model: &str,
        bundle: &EvidenceBundle,
        prompt: &str,
        outcome: TriageOutcome,
        follow_ups: Vec<String>,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            run_id,
            generated_at: Utc::now(),
            tool: tool.to_string(),
            model: model.to_string(),
            subject: bundle.subject.clone(),
            prompt_sha256: prompt_digest(prompt),
            evidence: EvidenceSummary::from(bundle),
            outcome,
            follow_ups,
        }
    }
}

/// Hex-encoded SHA-256 of a prompt.
pub fn prompt_digest(prompt: &str) -> String {
    hex::encode(Sha256::digest(prompt.as_bytes()))
}

fn rule(out: &mut String, c: char) {
    out.extend(std::iter::repeat(c).take(RULE_WIDTH));
    out.push('\n');
}

/// Render a report as plain terminal text.
pub fn render(report: &TriageReport) -> String {
    let mut out = String::new();
    rule(&mut out, '=');
    let _ = writeln!(out, "TRIAGE REPORT: {} | {}", report.tool, report.subject);
    rule(&mut out, '=');
    let _ = writeln!(out, "model: {}", report.model);
    let _ = writeln!(out, "run:   {}", report.run_id);

    let evidence = &report.evidence;
    let _ = write!(out, "evidence: {} item(s)", evidence.items.len());
    if evidence.omitted_count > 0 {
        let _ = write!(out, ", {} omitted", evidence.omitted_count);
    }
    if evidence.duplicates_removed > 0 {
        let _ = write!(out, ", {} duplicate(s) removed", evidence.duplicates_removed);
    }
    out.push('\n');
    for scalar in &evidence.summary {
        let _ = writeln!(out, "  {}: {}", scalar.label, scalar.value);
    }
    out.push('\n');

    match &report.outcome {
        TriageOutcome::Diagnosis(diagnosis) => {
            if let Some(preamble) = diagnosis.preamble().filter(|p| !p.trim().is_empty()) {
                let _ = writeln!(out, "MODEL NOTES");
                rule(&mut out, '-');
                let _ = writeln!(out, "{}\n", preamble.trim_end());
            }
            for section in diagnosis.sections() {
                let _ = writeln!(out, "{}", section.name);
                rule(&mut out, '-');
                let _ = writeln!(out, "{}\n", section.text.trim_end());
            }
        }
        TriageOutcome::Artifacts(set) => {
            let _ = writeln!(out, "GENERATED FILES");
            rule(&mut out, '-');
            for file in set.files() {
                let _ = writeln!(out, "{} ({} lines)", file.filename, file.content.lines().count());
            }
            out.push('\n');
        }
    }

    if !report.follow_ups.is_empty() {
        let _ = writeln!(out, "NEXT STEPS");
        rule(&mut out, '-');
        for follow_up in &report.follow_ups {
            let _ = writeln!(out, "  {}", follow_up);
        }
        out.push('\n');
    }
    rule(&mut out, '=');
    out
}

/// Write `data` to `path` through a temp file in the same directory.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| TriageError::persistence(path, e))?;
    tmp.write_all(data)
        .map_err(|e| TriageError::persistence(path, e))?;
    tmp.persist(path)
        .map_err(|e| TriageError::persistence(path, e.error))?;
    Ok(())
}

/// Persist a report as pretty JSON. The target's directory must already exist.
pub fn persist(report: &TriageReport, path: &Path) -> Result<()> {
    let content =
        serde_json::to_string_pretty(report).map_err(|e| TriageError::persistence(path, e))?;
    write_atomic(path, content.as_bytes())
}

/// Load a previously persisted report.
pub fn read_report(path: &Path) -> Result<TriageReport> {
    let content = fs::read_to_string(path).map_err(|e| TriageError::persistence(path, e))?;
    serde_json::from_str(&content).map_err(|e| TriageError::persistence(path, e))
}

/// Write every generated file under `dir`, creating it if needed.
///
/// Names that would escape `dir` are rejected before anything is written.
pub fn write_artifact_files(set: &GeneratedArtifactSet, dir: &Path) -> Result<Vec<PathBuf>> {
    if let Some(bad) = set.files().iter().find(|f| !is_safe_filename(&f.filename)) {
        return Err(TriageError::persistence(
            dir.join(&bad.filename),
            "refusing to write a file outside the output directory",
        ));
    }
    let mut written = Vec::with_capacity(set.len());
    for file in set.files() {
        let path = dir.join(&file.filename);
        let parent = path.parent().unwrap_or(dir);
        fs::create_dir_all(parent).map_err(|e| TriageError::persistence(parent, e))?;
        write_atomic(&path, file.content.as_bytes())?;
        written.push(path);
    }
    Ok(written)
}
