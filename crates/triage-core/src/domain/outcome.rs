//! Structured results extracted from model output.

use serde::{Deserialize, Serialize};

/// Value recorded for a declared section the model did not emit.
pub const SECTION_NOT_PROVIDED: &str = "<not provided by model>";

/// One declared section and its extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisSection {
    pub name: String,
    pub text: String,
}

/// Section map keyed by the declared headings of a task profile.
///
/// Every declared heading is present, in declaration order. Missing sections
/// carry [`SECTION_NOT_PROVIDED`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisResult {
    sections: Vec<DiagnosisSection>,
    /// Text preceding the first recognized heading, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    preamble: Option<String>,
}

impl DiagnosisResult {
    /// Build a result with every declared section set to the sentinel.
    pub fn with_declared<S: AsRef<str>>(declared: &[S]) -> Self {
        Self {
            sections: declared
                .iter()
                .map(|name| DiagnosisSection {
                    name: name.as_ref().to_string(),
                    text: SECTION_NOT_PROVIDED.to_string(),
                })
                .collect(),
            preamble: None,
        }
    }

    /// Replace the text of a declared section. Unknown names are ignored.
    pub fn set(&mut self, name: &str, text: impl Into<String>) {
        if let Some(section) = self.sections.iter_mut().find(|s| s.name == name) {
            section.text = text.into();
        }
    }

    pub fn set_preamble(&mut self, preamble: Option<String>) {
        self.preamble = preamble;
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.text.as_str())
    }

    pub fn sections(&self) -> &[DiagnosisSection] {
        &self.sections
    }

    pub fn preamble(&self) -> Option<&str> {
        self.preamble.as_deref()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.name.as_str()).collect()
    }

    /// Whether the model supplied the named section.
    pub fn is_provided(&self, name: &str) -> bool {
        matches!(self.get(name), Some(text) if text != SECTION_NOT_PROVIDED)
    }
}

/// One generated file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub filename: String,
    pub content: String,
}

/// Files split out of a code-generation response. Filenames are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedArtifactSet {
    files: Vec<GeneratedFile>,
}

impl GeneratedArtifactSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file. A repeated filename replaces the earlier content in place.
    pub fn upsert(&mut self, filename: impl Into<String>, content: impl Into<String>) {
        let filename = filename.into();
        let content = content.into();
        match self.files.iter_mut().find(|f| f.filename == filename) {
            Some(existing) => existing.content = content,
            None => self.files.push(GeneratedFile { filename, content }),
        }
    }

    pub fn get(&self, filename: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|f| f.filename == filename)
            .map(|f| f.content.as_str())
    }

    pub fn files(&self) -> &[GeneratedFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Parsed model output for either task shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriageOutcome {
    Diagnosis(DiagnosisResult),
    Artifacts(GeneratedArtifactSet),
}

impl TriageOutcome {
    pub fn as_diagnosis(&self) -> Option<&DiagnosisResult> {
        match self {
            TriageOutcome::Diagnosis(d) => Some(d),
            TriageOutcome::Artifacts(_) => None,
        }
    }

    pub fn as_artifacts(&self) -> Option<&GeneratedArtifactSet> {
        match self {
            TriageOutcome::Artifacts(a) => Some(a),
            TriageOutcome::Diagnosis(_) => None,
        }
    }
}
