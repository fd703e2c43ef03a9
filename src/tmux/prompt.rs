//! Prompt detection from pane content
//!
//! `HasUpdated()`'s *hasPrompt* heuristic: the bottom non-empty line of the pane
//! matches a known "awaiting input" pattern. Kept deliberately narrow (spec.md
//! only asks for a boolean), unlike a full agent-state classifier.

use std::sync::LazyLock;

use regex::Regex;

/// Patterns matching a prompt line awaiting user input.
static PROMPT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"^>\s*$").unwrap(),
        Regex::new(r"^claude>\s*$").unwrap(),
        Regex::new(r"^aider>\s*$").unwrap(),
        Regex::new(r"(?i)^(yes|y/n|y/no)\??\s*$").unwrap(),
        Regex::new(r"^[^>$\n]*[>$]\s*$").unwrap(),
    ]
});

/// Does the bottom non-empty line of `content` match a known awaiting-input pattern?
pub fn has_prompt(content: &str) -> bool {
    match content.lines().rev().find(|line| !line.trim().is_empty()) {
        Some(line) => {
            let trimmed = line.trim_end();
            PROMPT_PATTERNS.iter().any(|p| p.is_match(trimmed))
        }
        None => false,
    }
}
