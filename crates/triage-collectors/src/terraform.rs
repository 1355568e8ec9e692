//! Terraform generation requests and validation of the generated module.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};
use triage_core::{CollectedEvidence, EvidenceCollector, Result, SummaryScalar};

use crate::command::{tool_available, ToolCommand};

const SOURCE: &str = "terraform";

pub const PROVIDERS: &[&str] = &["aws", "azure", "gcp"];

/// A free-text infrastructure request. Nothing external is queried.
#[derive(Debug, Clone)]
pub struct TerraformRequestCollector {
    description: String,
    provider: String,
}

impl TerraformRequestCollector {
    pub fn new(description: &str, provider: &str) -> Self {
        Self {
            description: description.trim().to_string(),
            provider: provider.to_ascii_lowercase(),
        }
    }
}

#[async_trait]
impl EvidenceCollector for TerraformRequestCollector {
    fn source(&self) -> &str {
        SOURCE
    }

    async fn collect(&self) -> Result<CollectedEvidence> {
        let mut evidence = CollectedEvidence::new(self.description.as_str());
        evidence.summary = vec![SummaryScalar::text("provider", self.provider.as_str())];
        evidence
            .follow_ups
            .extend(["terraform init", "terraform plan"].map(String::from));
        Ok(evidence)
    }
}

/// Result of `terraform init -backend=false` followed by `terraform validate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Passed,
    Failed { step: &'static str, output: String },
    Skipped { reason: String },
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validation::Passed => write!(f, "terraform validate passed"),
            Validation::Failed { step, output } => {
                write!(f, "terraform {step} failed:\n{}", output.trim())
            }
            Validation::Skipped { reason } => write!(f, "validation skipped: {reason}"),
        }
    }
}

/// Validate the module in `dir`. A missing `terraform` binary is a skip, not an error.
pub async fn validate_directory(dir: &Path) -> Result<Validation> {
    if !tool_available("terraform").await {
        warn!("terraform not installed, skipping validation");
        return Ok(Validation::Skipped {
            reason: "`terraform` not found on PATH".to_string(),
        });
    }

    let steps: [(&'static str, &[&str]); 2] = [
        ("init", &["init", "-backend=false", "-input=false", "-no-color"]),
        ("validate", &["validate", "-no-color"]),
    ];
    for (step, args) in steps {
        info!(step, dir = %dir.display(), "running terraform");
        let output = ToolCommand::new(SOURCE, "terraform")
            .args(args.iter().copied())
            .current_dir(dir)
            .env("TF_IN_AUTOMATION", "1")
            .timeout(Duration::from_secs(300))
            .output()
            .await?;
        if !output.success {
            let text = if output.stderr.trim().is_empty() {
                output.stdout
            } else {
                output.stderr
            };
            return Ok(Validation::Failed { step, output: text });
        }
    }
    Ok(Validation::Passed)
}
