//! Response parser.
//!
//! Turns raw model text into a [`TriageOutcome`] according to the task
//! profile:
//! - diagnostic profiles: tolerant heading scan, missing sections get
//!   [`SECTION_NOT_PROVIDED`]
//! - multi-file profiles: split on `### FILE: <name>` delimiter lines,
//!   last write wins for repeated filenames
//!
//! Pure text transform; nothing here touches the network or disk.

use std::path::{Component, Path};

use regex::Regex;
use tracing::warn;

use crate::domain::{
    DiagnosisResult, GeneratedArtifactSet, Result, TaskProfile, TriageError, TriageOutcome,
    SECTION_NOT_PROVIDED,
};

/// Drop a duplicated trailing block.
///
/// Some models emit their whole answer twice. When the tail of the text (cut
/// somewhere between one third and one half) is a suffix of the head, only the
/// head is kept.
pub fn strip_repeated_suffix(text: &str) -> &str {
    let len = text.len();
    for split in (len / 3)..=(len / 2) {
        if !text.is_char_boundary(split) {
            continue;
        }
        let first = text[..split].trim_end();
        let second = text[split..].trim();
        if !second.is_empty() && first.ends_with(second) {
            return first;
        }
    }
    text
}

fn heading_pattern(section: &str) -> Result<Regex> {
    let words: Vec<String> = section.split_whitespace().map(regex::escape).collect();
    if words.is_empty() {
        return Err(TriageError::MalformedResponse(
            "task profile declares an empty section name".to_string(),
        ));
    }
    // The exact heading may end the line or take a colon; up to three trailing
    // words ("ROOT CAUSE ANALYSIS:", "How to fix this:") need the colon.
    let pattern = format!(
        r"(?i)^\s*(?:[#>*_\-]+\s*)*(?:\d+[.)]\s*)?[*_]*\s*{}(?:\s*[*_]*\s*(?::|$)|(?:\s+[a-z'/\-]+){{1,3}}\s*[*_]*\s*:)\s*[*_]*\s*(.*)$",
        words.join(r"\s+")
    );
    Regex::new(&pattern)
        .map_err(|e| TriageError::MalformedResponse(format!("bad heading '{section}': {e}")))
}

struct HeadingMatcher {
    /// (declared index, pattern), longest section name first.
    patterns: Vec<(usize, Regex)>,
}

impl HeadingMatcher {
    fn new(sections: &[String]) -> Result<Self> {
        let mut order: Vec<usize> = (0..sections.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(sections[i].len()));
        let patterns = order
            .into_iter()
            .map(|i| heading_pattern(&sections[i]).map(|re| (i, re)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Declared index and inline remainder if `line` is a heading.
    fn match_line<'l>(&self, line: &'l str) -> Option<(usize, &'l str)> {
        self.patterns.iter().find_map(|(idx, re)| {
            re.captures(line).map(|caps| {
                let rest = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                (*idx, rest)
            })
        })
    }
}

/// Extract declared sections from a diagnostic response.
pub fn parse_sections(raw: &str, sections: &[String]) -> Result<DiagnosisResult> {
    if raw.trim().is_empty() {
        return Err(TriageError::MalformedResponse(
            "model returned empty text".to_string(),
        ));
    }

    let matcher = HeadingMatcher::new(sections)?;
    let mut bodies: Vec<Vec<&str>> = vec![Vec::new(); sections.len()];
    let mut preamble: Vec<&str> = Vec::new();
    let mut current: Option<usize> = None;

    for line in raw.lines() {
        if let Some((idx, rest)) = matcher.match_line(line) {
            if !bodies[idx].is_empty() {
                bodies[idx].push("");
            }
            let rest = rest.trim();
            if !rest.is_empty() {
                bodies[idx].push(rest);
            }
            current = Some(idx);
            continue;
        }
        match current {
            Some(idx) => bodies[idx].push(line),
            None => preamble.push(line),
        }
    }

    let mut result = DiagnosisResult::with_declared(sections);
    for (idx, lines) in bodies.iter().enumerate() {
        let text = lines.join("\n");
        let text = text.trim();
        if !text.is_empty() {
            result.set(&sections[idx], text);
        }
    }

    let preamble = preamble.join("\n");
    let preamble = preamble.trim();
    if !preamble.is_empty() {
        result.set_preamble(Some(preamble.to_string()));
    }

    let missing: Vec<&str> = result
        .sections()
        .iter()
        .filter(|s| s.text == SECTION_NOT_PROVIDED)
        .map(|s| s.name.as_str())
        .collect();
    if !missing.is_empty() {
        warn!(missing = ?missing, "model response is missing declared sections");
    }

    Ok(result)
}

/// A filename is accepted when it is relative and never climbs out of the output dir.
pub fn is_safe_filename(name: &str) -> bool {
    if name.is_empty() || name.starts_with('/') || name.starts_with('\\') {
        return false;
    }
    Path::new(name)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn is_code_fence(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

fn finish_file(lines: &[&str]) -> String {
    let body: Vec<&str> = lines.iter().copied().filter(|l| !is_code_fence(l)).collect();
    let body = body.join("\n");
    let body = body.trim_end().trim_start_matches(|c: char| c == '\n' || c == '\r');
    if body.is_empty() {
        String::new()
    } else {
        format!("{}\n", body)
    }
}

/// Split a multi-file response into named artifacts.
///
/// Canonical delimiter is `### FILE: <name>`. A bare `### <name> ###` line is
/// also accepted when `<name>` is one of the expected filenames.
pub fn parse_files(raw: &str, expected: &[String]) -> Result<GeneratedArtifactSet> {
    let delimiter = Regex::new(r"(?i)^\s*###\s*FILE:\s*(.+?)\s*(?:###)?\s*$")
        .map_err(|e| TriageError::MalformedResponse(e.to_string()))?;
    let bare = Regex::new(r"^\s*###\s*(\S+)\s*###\s*$")
        .map_err(|e| TriageError::MalformedResponse(e.to_string()))?;

    let mut set = GeneratedArtifactSet::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in raw.lines() {
        let name = delimiter
            .captures(line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim_matches(|c: char| c == '`' || c == '"' || c == '\''))
            .or_else(|| {
                bare.captures(line)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str())
                    .filter(|n| expected.iter().any(|e| e == n))
            });

        match name {
            Some(name) => {
                if let Some((filename, lines)) = current.take() {
                    set.upsert(filename, finish_file(&lines));
                }
                if is_safe_filename(name) {
                    current = Some((name.to_string(), Vec::new()));
                } else {
                    warn!(filename = %name, "ignoring generated file with unsafe name");
                }
            }
            None => {
                if let Some((_, lines)) = current.as_mut() {
                    lines.push(line);
                }
            }
        }
    }
    if let Some((filename, lines)) = current.take() {
        set.upsert(filename, finish_file(&lines));
    }

    if set.is_empty() {
        return Err(TriageError::MalformedResponse(
            "no file delimiters found in model response".to_string(),
        ));
    }

    let missing: Vec<&String> = expected.iter().filter(|e| set.get(e).is_none()).collect();
    if !missing.is_empty() {
        warn!(missing = ?missing, "model response is missing expected files");
    }
    Ok(set)
}

/// Parse raw model text under `profile`.
pub fn parse(raw: &str, profile: &TaskProfile) -> Result<TriageOutcome> {
    let text = strip_repeated_suffix(raw);
    if profile.expects_multi_file {
        parse_files(text, &profile.expected_output_sections).map(TriageOutcome::Artifacts)
    } else {
        parse_sections(text, &profile.expected_output_sections).map(TriageOutcome::Diagnosis)
    }
}
