//! In-memory fakes for the pipeline seams (testing only).
//!
//! `ScriptedBackend` replays queued completions and counts calls;
//! `StaticCollector` hands back fixed evidence.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::{CollectedEvidence, Result, TriageError};
use crate::inference::{CompletionBackend, InferenceRequest};
use crate::pipeline::EvidenceCollector;

// ---------------------------------------------------------------------------
// ScriptedBackend
// ---------------------------------------------------------------------------

/// Completion backend that returns queued responses in order.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(responses: Vec<Result<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    /// Backend that always answers with `text` once.
    pub fn replying(text: impl Into<String>) -> Self {
        Self::new(vec![Ok(text.into())])
    }

    /// Number of `complete` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    fn describe(&self) -> String {
        "scripted backend".to_string()
    }

    async fn complete(&self, request: &InferenceRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.prompt.clone());
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| {
                Err(TriageError::InferenceUnavailable {
                    endpoint: "scripted".to_string(),
                    reason: "no scripted responses left".to_string(),
                })
            })
    }
}

// ---------------------------------------------------------------------------
// StaticCollector
// ---------------------------------------------------------------------------

/// Collector returning fixed evidence, or a fixed source failure.
#[derive(Debug, Clone)]
pub struct StaticCollector {
    source: String,
    evidence: std::result::Result<CollectedEvidence, String>,
}

impl StaticCollector {
    pub fn new(source: impl Into<String>, evidence: CollectedEvidence) -> Self {
        Self {
            source: source.into(),
            evidence: Ok(evidence),
        }
    }

    /// Collector whose source is always unreachable.
    pub fn unavailable(source: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            evidence: Err(reason.into()),
        }
    }
}

#[async_trait]
impl EvidenceCollector for StaticCollector {
    fn source(&self) -> &str {
        &self.source
    }

    async fn collect(&self) -> Result<CollectedEvidence> {
        match &self.evidence {
            Ok(evidence) => Ok(evidence.clone()),
            Err(reason) => Err(TriageError::source_unavailable(&self.source, reason.clone())),
        }
    }
}
