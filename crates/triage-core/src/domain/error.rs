//! Error taxonomy for the triage pipeline.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Collect,
    Normalize,
    Synthesize,
    Inference,
    Parse,
    Persist,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Collect => "collect",
            Stage::Normalize => "normalize",
            Stage::Synthesize => "synthesize",
            Stage::Inference => "inference",
            Stage::Parse => "parse",
            Stage::Persist => "persist",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by any stage of a triage run.
#[derive(Debug, thiserror::Error)]
pub enum TriageError {
    #[error("{collector} is unavailable: {reason}")]
    SourceUnavailable { collector: String, reason: String },

    #[error("{collector} rejected the credentials: {reason}")]
    SourceAuth { collector: String, reason: String },

    #[error("no evidence collected for task '{profile}'")]
    EvidenceEmpty { profile: String },

    #[error("prompt is {chars} characters, inference limit is {limit}")]
    PromptTooLarge { chars: usize, limit: usize },

    #[error("inference service at {endpoint} is unreachable: {reason}")]
    InferenceUnavailable { endpoint: String, reason: String },

    #[error("inference timed out after {attempts} attempt(s) of {timeout_secs}s each")]
    InferenceTimeout { attempts: u32, timeout_secs: u64 },

    #[error("inference service returned HTTP {status}: {body}")]
    InferenceProtocol { status: u16, body: String },

    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    #[error("failed to write {}: {reason}", path.display())]
    Persistence { path: PathBuf, reason: String },
}

impl TriageError {
    pub fn source_unavailable(collector: impl Into<String>, reason: impl Into<String>) -> Self {
        TriageError::SourceUnavailable {
            collector: collector.into(),
            reason: reason.into(),
        }
    }

    pub fn source_auth(collector: impl Into<String>, reason: impl Into<String>) -> Self {
        TriageError::SourceAuth {
            collector: collector.into(),
            reason: reason.into(),
        }
    }

    pub fn persistence(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        TriageError::Persistence {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// The stage that produced this error.
    pub fn stage(&self) -> Stage {
        match self {
            TriageError::SourceUnavailable { .. } | TriageError::SourceAuth { .. } => {
                Stage::Collect
            }
            TriageError::EvidenceEmpty { .. } => Stage::Normalize,
            TriageError::PromptTooLarge { .. } => Stage::Synthesize,
            TriageError::InferenceUnavailable { .. }
            | TriageError::InferenceTimeout { .. }
            | TriageError::InferenceProtocol { .. } => Stage::Inference,
            TriageError::MalformedResponse(_) => Stage::Parse,
            TriageError::Persistence { .. } => Stage::Persist,
        }
    }

    /// Process exit code for the CLI.
    ///
    /// 2 = collector, 3 = inference, 4 = prompt/response contract, 5 = persistence.
    pub fn exit_code(&self) -> u8 {
        match self.stage() {
            Stage::Collect => 2,
            Stage::Inference => 3,
            Stage::Normalize | Stage::Synthesize | Stage::Parse => 4,
            Stage::Persist => 5,
        }
    }
}

/// Result type for triage operations.
pub type Result<T> = std::result::Result<T, TriageError>;
