//! Prompt synthesis.
//!
//! Renders an [`EvidenceBundle`] and a [`TaskProfile`] into a single prompt
//! that ends with an explicit output contract. Output is a pure function of
//! its inputs so identical runs produce byte-identical prompts.

use std::fmt::Write as _;

use crate::domain::{EvidenceBundle, EvidenceItem, Result, TaskProfile, TriageError};

/// Line prefix introducing each generated file in a multi-file response.
pub const FILE_DELIMITER: &str = "### FILE:";

/// Substitute `{subject}` and `{<summary label>}` placeholders.
pub fn render_instruction(template: &str, bundle: &EvidenceBundle) -> String {
    let mut rendered = template.replace("{subject}", &bundle.subject);
    for scalar in &bundle.summary {
        let placeholder = format!("{{{}}}", scalar.label);
        rendered = rendered.replace(&placeholder, &scalar.value.to_string());
    }
    rendered
}

fn format_weight(weight: f64) -> String {
    if weight.fract() == 0.0 && weight.abs() < 1e15 {
        format!("{}", weight as i64)
    } else {
        format!("{:.2}", weight)
    }
}

fn write_item(out: &mut String, index: usize, item: &EvidenceItem) {
    let _ = write!(out, "[{}] {} (source: {}", index, item.label(), item.source_kind());
    if let Some(weight) = item.weight() {
        let _ = write!(out, ", severity/cost: {}", format_weight(weight));
    }
    if let Some(at) = item.observed_at() {
        let _ = write!(out, ", observed: {}", at.format("%Y-%m-%dT%H:%M:%SZ"));
    }
    out.push_str(")\n");
    out.push_str(item.detail().trim_end());
    out.push_str("\n\n");
}

fn write_output_contract(out: &mut String, profile: &TaskProfile) {
    out.push_str("OUTPUT FORMAT:\n");
    if profile.expects_multi_file {
        out.push_str(
            "Emit every file on its own, introduced by a delimiter line of the form\n",
        );
        let _ = writeln!(out, "{} <filename>", FILE_DELIMITER);
        out.push_str("Produce exactly these files, in this order:\n");
        for filename in &profile.expected_output_sections {
            let _ = writeln!(out, "{} {}", FILE_DELIMITER, filename);
        }
        out.push_str(
            "Write only the file contents after each delimiter line. \
             Do not wrap files in markdown code fences.\n",
        );
    } else {
        out.push_str(
            "Respond using exactly these headings, verbatim and in this order, \
             each on its own line followed by a colon:\n",
        );
        for section in &profile.expected_output_sections {
            let _ = writeln!(out, "{}:", section);
        }
        out.push_str("Put the content for each heading below it. Do not add other headings.\n");
    }
}

/// Build the prompt for `bundle` under `profile`.
///
/// Fails with [`TriageError::PromptTooLarge`] when the result exceeds
/// `max_prompt_chars`; the prompt itself is never cut.
pub fn synthesize(
    bundle: &EvidenceBundle,
    profile: &TaskProfile,
    max_prompt_chars: usize,
) -> Result<String> {
    let mut out = String::new();

    out.push_str(render_instruction(&profile.instruction_template, bundle).trim_end());
    out.push_str("\n\n");

    if !bundle.subject.is_empty() {
        let _ = writeln!(out, "SUBJECT: {}\n", bundle.subject);
    }

    if !bundle.summary.is_empty() {
        out.push_str("SUMMARY:\n");
        for scalar in &bundle.summary {
            let _ = writeln!(out, "- {}: {}", scalar.label, scalar.value);
        }
        out.push('\n');
    }

    if bundle.items.is_empty() {
        out.push_str("EVIDENCE: none collected\n\n");
    } else {
        let _ = writeln!(out, "EVIDENCE ({} items, ranked by severity/cost):\n", bundle.items.len());
        for (i, item) in bundle.items.iter().enumerate() {
            write_item(&mut out, i + 1, item);
        }
    }
    if bundle.omitted_count > 0 {
        let _ = writeln!(
            out,
            "({} lower-ranked items omitted for brevity)\n",
            bundle.omitted_count
        );
    }

    write_output_contract(&mut out, profile);

    let chars = out.chars().count();
    if chars > max_prompt_chars {
        return Err(TriageError::PromptTooLarge {
            chars,
            limit: max_prompt_chars,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SourceKind, SummaryScalar};
    use chrono::{DateTime, Utc};

    fn bundle() -> EvidenceBundle {
        let at = DateTime::parse_from_rfc3339("2026-04-02T08:15:00Z")
            .expect("parse RFC3339")
            .with_timezone(&Utc);
        EvidenceBundle {
            subject: "web-7d9f".to_string(),
            items: vec![
                EvidenceItem::new(SourceKind::ContainerState, "container app: CrashLoopBackOff", "exit code 137")
                    .with_weight(14.0)
                    .with_timestamp(at),
                EvidenceItem::new(SourceKind::PodLogs, "recent logs", "java.lang.OutOfMemoryError")
                    .with_weight(1.5),
            ],
            omitted_count: 3,
            duplicates_removed: 0,
            summary: vec![SummaryScalar::count("restarts", 7)],
        }
    }

    fn diag_profile() -> TaskProfile {
        TaskProfile::diagnostic(
            "pod-failure",
            "Debug pod {subject} which restarted {restarts} times.",
            &["ROOT CAUSE", "WHY THIS HAPPENS", "HOW TO FIX"],
        )
    }

    #[test]
    fn test_synthesize_is_deterministic() {
        let a = synthesize(&bundle(), &diag_profile(), 32_000).expect("synthesize");
        let b = synthesize(&bundle(), &diag_profile(), 32_000).expect("synthesize");
        assert_eq!(a, b);
    }

    #[test]
    fn test_instruction_placeholders_rendered() {
        let prompt = synthesize(&bundle(), &diag_profile(), 32_000).expect("synthesize");
        assert!(prompt.starts_with("Debug pod web-7d9f which restarted 7 times.\n"));
    }

    #[test]
    fn test_items_and_omitted_count_embedded() {
        let prompt = synthesize(&bundle(), &diag_profile(), 32_000).expect("synthesize");
        assert!(prompt.contains(
            "[1] container app: CrashLoopBackOff (source: container_state, severity/cost: 14, observed: 2026-04-02T08:15:00Z)\nexit code 137"
        ));
        assert!(prompt.contains("severity/cost: 1.50"));
        assert!(prompt.contains("3 lower-ranked items omitted"));
    }

    #[test]
    fn test_omitted_count_survives_empty_selection() {
        let mut b = bundle();
        b.omitted_count += b.items.len();
        b.items.clear();
        let prompt = synthesize(&b, &diag_profile(), 32_000).expect("synthesize");
        assert!(prompt.contains("EVIDENCE: none collected"));
        assert!(prompt.contains("5 lower-ranked items omitted"));
    }

    #[test]
    fn test_headings_listed_in_order() {
        let prompt = synthesize(&bundle(), &diag_profile(), 32_000).expect("synthesize");
        let root = prompt.find("\nROOT CAUSE:\n").expect("root cause heading");
        let why = prompt.find("\nWHY THIS HAPPENS:\n").expect("why heading");
        let fix = prompt.find("\nHOW TO FIX:\n").expect("fix heading");
        assert!(root < why && why < fix);
    }

    #[test]
    fn test_multi_file_directive() {
        let profile = TaskProfile::multi_file(
            "terraform",
            "Generate Terraform for: {subject}",
            &["main.tf", "variables.tf"],
        );
        let bundle = EvidenceBundle {
            subject: "an S3 bucket".to_string(),
            ..EvidenceBundle::default()
        };
        let prompt = synthesize(&bundle, &profile, 32_000).expect("synthesize");
        assert!(prompt.contains("EVIDENCE: none collected"));
        assert!(prompt.contains("### FILE: main.tf\n### FILE: variables.tf\n"));
        assert!(!prompt.contains("ROOT CAUSE"));
    }

    #[test]
    fn test_prompt_too_large() {
        let err = synthesize(&bundle(), &diag_profile(), 50).unwrap_err();
        match err {
            TriageError::PromptTooLarge { chars, limit } => {
                assert_eq!(limit, 50);
                assert!(chars > 50);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
