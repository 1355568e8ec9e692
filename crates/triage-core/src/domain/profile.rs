//! Task profiles: what a tool variant asks the model for and what shape it expects back.

use serde::{Deserialize, Serialize};

/// Static description of one diagnosis or generation task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProfile {
    /// Stable identifier, also recorded in persisted reports.
    pub name: String,

    /// Instruction text. `{subject}` and `{<summary label>}` are substituted.
    pub instruction_template: String,

    /// Headings (diagnostic) or filenames (multi-file), in output order.
    pub expected_output_sections: Vec<String>,

    /// Whether the response is split into named files instead of sections.
    pub expects_multi_file: bool,
}

impl TaskProfile {
    /// Profile expecting headed sections.
    pub fn diagnostic(name: &str, instruction_template: &str, sections: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            instruction_template: instruction_template.to_string(),
            expected_output_sections: sections.iter().map(|s| s.to_string()).collect(),
            expects_multi_file: false,
        }
    }

    /// Profile expecting one delimited block per file.
    pub fn multi_file(name: &str, instruction_template: &str, filenames: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            instruction_template: instruction_template.to_string(),
            expected_output_sections: filenames.iter().map(|s| s.to_string()).collect(),
            expects_multi_file: true,
        }
    }

    /// Diagnostic tasks need at least one evidence item; generation does not.
    pub fn requires_evidence(&self) -> bool {
        !self.expects_multi_file
    }
}
