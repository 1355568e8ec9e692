//! Domain model for triage runs.
//!
//! - `EvidenceItem` / `EvidenceBundle`: facts about the target
//! - `TaskProfile`: what the model is asked and what shape comes back
//! - `TriageOutcome`: parsed section map or generated file set
//! - `TriageError`: stage-classified failures

pub mod error;
pub mod evidence;
pub mod outcome;
pub mod profile;

pub use error::{Result, Stage, TriageError};
pub use evidence::{
    CollectedEvidence, EvidenceBundle, EvidenceItem, ScalarValue, SourceKind, SummaryScalar,
};
pub use outcome::{
    DiagnosisResult, DiagnosisSection, GeneratedArtifactSet, GeneratedFile, TriageOutcome,
    SECTION_NOT_PROVIDED,
};
pub use profile::TaskProfile;
