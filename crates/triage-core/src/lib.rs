//! Triage Core Library
//!
//! Evidence-to-explanation pipeline: collected facts are normalized into a
//! bounded bundle, rendered into a prompt, sent to a local model server and
//! parsed back into a structured report.

pub mod domain;
pub mod fakes;
pub mod inference;
pub mod normalize;
pub mod obs;
pub mod parse;
pub mod pipeline;
pub mod profiles;
pub mod prompt;
pub mod report;
pub mod telemetry;

pub use domain::{
    CollectedEvidence, DiagnosisResult, DiagnosisSection, EvidenceBundle, EvidenceItem,
    GeneratedArtifactSet, GeneratedFile, Result, ScalarValue, SourceKind, Stage, SummaryScalar,
    TaskProfile, TriageError, TriageOutcome, SECTION_NOT_PROVIDED,
};

pub use inference::{
    CompletionBackend, InferenceConfig, InferenceOptions, InferenceRequest, OllamaClient,
};
pub use normalize::{normalize, NormalizePolicy};
pub use parse::parse;
pub use pipeline::{EvidenceCollector, PipelineConfig, TriagePipeline};
pub use prompt::synthesize;
pub use report::{persist, read_report, render, write_artifact_files, TriageReport};

pub use obs::{
    emit_inference_retry, emit_run_failed, emit_run_finished, emit_run_started,
    emit_stage_finished, RunSpan,
};
pub use telemetry::init_tracing;

/// Triage version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
