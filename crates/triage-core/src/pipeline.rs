//! Triage pipeline orchestration.
//!
//! Runs collect, normalize, synthesize, inference, parse and (optionally)
//! persist in order. Any stage error aborts the run; nothing is retried here
//! beyond the inference client's own timeout policy.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, Instrument};
use uuid::Uuid;

use crate::domain::{CollectedEvidence, Result, Stage, TaskProfile, TriageOutcome};
use crate::inference::{
    CompletionBackend, InferenceConfig, InferenceOptions, InferenceRequest,
    DEFAULT_MAX_PROMPT_CHARS,
};
use crate::normalize::{normalize, NormalizePolicy};
use crate::obs;
use crate::parse::parse;
use crate::prompt::synthesize;
use crate::report::{persist, TriageReport};

/// A source of raw evidence about one target.
#[async_trait]
pub trait EvidenceCollector: Send + Sync {
    /// Short name of the external system (`trivy`, `kubectl`, ...).
    fn source(&self) -> &str;

    /// Gather raw evidence. Read-only with respect to the target.
    async fn collect(&self) -> Result<CollectedEvidence>;
}

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub normalize: NormalizePolicy,
    pub inference: InferenceOptions,
    pub max_prompt_chars: usize,
    /// Where to persist the report; `None` keeps it in memory only.
    pub persist_to: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            normalize: NormalizePolicy::default(),
            inference: InferenceOptions::default(),
            max_prompt_chars: DEFAULT_MAX_PROMPT_CHARS,
            persist_to: None,
        }
    }
}

impl PipelineConfig {
    /// Pipeline defaults with inference settings taken from `config`.
    pub fn from_inference_config(config: &InferenceConfig) -> Self {
        Self {
            inference: config.options(),
            max_prompt_chars: config.max_prompt_chars,
            ..Self::default()
        }
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

/// Collector-agnostic triage pipeline.
pub struct TriagePipeline {
    backend: Arc<dyn CompletionBackend>,
    config: PipelineConfig,
}

impl TriagePipeline {
    pub fn new(backend: Arc<dyn CompletionBackend>, config: PipelineConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute one run of `profile` against the evidence from `collector`.
    pub async fn run(
        &self,
        collector: &dyn EvidenceCollector,
        profile: &TaskProfile,
    ) -> Result<TriageReport> {
        let run_id = Uuid::new_v4();
        let span = obs::run_span(&run_id.to_string(), &profile.name);
        let start = Instant::now();

        let result = async {
            obs::emit_run_started(&run_id.to_string(), &profile.name, &self.config.inference.model);
            self.run_stages(run_id, collector, profile).await
        }
        .instrument(span.clone())
        .await;

        let _entered = span.enter();
        match &result {
            Ok(report) => {
                let kind = match &report.outcome {
                    TriageOutcome::Diagnosis(_) => "diagnosis",
                    TriageOutcome::Artifacts(_) => "artifacts",
                };
                obs::emit_run_finished(&run_id.to_string(), elapsed_ms(start), kind);
            }
            Err(err) => obs::emit_run_failed(err.stage(), err),
        }
        result
    }

    async fn run_stages(
        &self,
        run_id: Uuid,
        collector: &dyn EvidenceCollector,
        profile: &TaskProfile,
    ) -> Result<TriageReport> {
        let t = Instant::now();
        info!(source = %collector.source(), "collecting evidence");
        let collected = collector.collect().await?;
        obs::emit_stage_finished(Stage::Collect, elapsed_ms(t));

        let t = Instant::now();
        let policy = NormalizePolicy {
            require_evidence: profile.requires_evidence(),
            ..self.config.normalize.clone()
        };
        let mut bundle = normalize(collected.items, &policy, &profile.name)?;
        bundle.subject = collected.subject;
        bundle.summary = collected.summary;
        obs::emit_evidence_normalized(
            bundle.items.len(),
            bundle.omitted_count,
            bundle.duplicates_removed,
        );
        obs::emit_stage_finished(Stage::Normalize, elapsed_ms(t));

        let t = Instant::now();
        let prompt = synthesize(&bundle, profile, self.config.max_prompt_chars)?;
        obs::emit_stage_finished(Stage::Synthesize, elapsed_ms(t));

        let t = Instant::now();
        info!(backend = %self.backend.describe(), "requesting completion");
        let request = InferenceRequest {
            prompt,
            options: self.config.inference.clone(),
        };
        let raw = self.backend.complete(&request).await?;
        obs::emit_stage_finished(Stage::Inference, elapsed_ms(t));

        let t = Instant::now();
        let outcome = parse(&raw, profile)?;
        obs::emit_stage_finished(Stage::Parse, elapsed_ms(t));

        let report = TriageReport::new(
            run_id,
            &profile.name,
            &request.options.model,
            &bundle,
            &request.prompt,
            outcome,
            collected.follow_ups,
        );

        if let Some(path) = &self.config.persist_to {
            let t = Instant::now();
            persist(&report, path)?;
            info!(path = %path.display(), "report persisted");
            obs::emit_stage_finished(Stage::Persist, elapsed_ms(t));
        }

        Ok(report)
    }
}
