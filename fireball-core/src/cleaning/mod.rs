//! Data-cleaning passes.
//!
//! Cleaning is split in two phases that never share a process boundary
//! they cannot survive:
//!
//! 1. **Advise** ([`advisor`]): select candidate rows, ask a
//!    [`SuggestionProvider`] for a cleaned value and write the suggestions
//!    to a JSON file. The store is only read.
//! 2. **Apply** ([`apply`]): read a suggestions file and apply the ones that
//!    meet the confidence threshold, each in its own transaction.
//!
//! Suggestion files are plain JSON arrays so they can be reviewed or edited
//! by hand between the two phases.

pub mod advisor;
pub mod apply;
pub mod client;
pub mod provider;

pub use advisor::{suggest_attacks, suggest_races, AdvisorSummary};
pub use apply::{
    apply_entity_suggestions, apply_race_suggestions, merge_entity, normalize_classes,
    ApplySummary, ClassNormalizeSummary, RaceApplySummary,
};
pub use client::{create_client, TextCompletion};
pub use provider::{create_provider, HeuristicProvider, LlmSuggestionProvider, SuggestionProvider};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Confidence assumed when a response carries no parseable confidence line.
pub const FALLBACK_CONFIDENCE: u8 = 70;

/// Outcome of asking a provider about one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionStatus {
    #[default]
    Success,
    Failed,
}

/// One cleaning suggestion as stored in a suggestions file.
///
/// Field aliases accept the per-advisor key names (`attack_id`,
/// `original_race`, ...) so older files can still be applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    #[serde(alias = "attack_id", alias = "spell_id", alias = "effect_id", alias = "character_id")]
    pub id: i64,
    /// Owning character name for race suggestions
    #[serde(default, alias = "character_name", skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(alias = "original_name", alias = "original_race")]
    pub original_value: String,
    /// `None` means the value should be cleared
    #[serde(default, alias = "cleaned_name", alias = "cleaned_race")]
    pub cleaned_value: Option<String>,
    #[serde(default)]
    pub confidence: u8,
    #[serde(default, alias = "reason")]
    pub reasoning: String,
    #[serde(default)]
    pub status: SuggestionStatus,
    /// Race assessments only: whether the original value was acceptable
    #[serde(default, alias = "is_valid", skip_serializing_if = "Option::is_none")]
    pub valid: Option<bool>,
}

impl Suggestion {
    /// Suggestion recorded when the provider call failed.
    pub fn failed(id: i64, original_value: &str, reason: impl Into<String>) -> Self {
        Self {
            id,
            context: None,
            original_value: original_value.to_string(),
            cleaned_value: None,
            confidence: 0,
            reasoning: reason.into(),
            status: SuggestionStatus::Failed,
            valid: None,
        }
    }

    /// Cleaned value with `NULL` markers and bare quotes normalized away.
    pub fn normalized_cleaned(&self) -> Option<String> {
        self.cleaned_value.as_deref().and_then(normalize_cleaned)
    }
}

// ============================================
// Response contract
// ============================================

/// Labeled provider response:
///
/// ```text
/// STATUS: VALID|CORRUPT
/// CLEANED: <value or NULL>
/// CONFIDENCE: <0-100>
/// REASON: <text>
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledResponse {
    pub status: Option<String>,
    pub cleaned: Option<String>,
    pub confidence: u8,
    pub reason: String,
}

/// Parse a labeled response.
///
/// A missing `CLEANED:` line falls back to the first unlabeled non-empty
/// line; a missing or unparseable confidence falls back to
/// [`FALLBACK_CONFIDENCE`].
pub fn parse_labeled_response(text: &str) -> LabeledResponse {
    let mut status = None;
    let mut cleaned = None;
    let mut confidence = None;
    let mut reason = String::new();
    let mut first_unlabeled = None;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(value) = strip_label(line, "STATUS") {
            status = Some(value.to_ascii_uppercase());
        } else if let Some(value) = strip_label(line, "CLEANED") {
            cleaned = Some(value.to_string());
        } else if let Some(value) = strip_label(line, "CONFIDENCE") {
            confidence = value.trim_end_matches('%').trim().parse::<u32>().ok();
        } else if let Some(value) = strip_label(line, "REASON") {
            reason = value.to_string();
        } else if first_unlabeled.is_none() {
            first_unlabeled = Some(line.to_string());
        }
    }

    LabeledResponse {
        status,
        cleaned: cleaned.or(first_unlabeled),
        confidence: confidence
            .map(|c| c.min(100) as u8)
            .unwrap_or(FALLBACK_CONFIDENCE),
        reason,
    }
}

fn strip_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let (head, rest) = line.split_once(':')?;
    if head.trim().eq_ignore_ascii_case(label) {
        Some(rest.trim())
    } else {
        None
    }
}

/// Strip wrapping quotes; `NULL`, `None` and empty values become `None`.
pub fn normalize_cleaned(value: &str) -> Option<String> {
    let value = value.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    if value.is_empty() || value.eq_ignore_ascii_case("null") || value.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(value.to_string())
    }
}

// ============================================
// Suggestion files
// ============================================

/// Read a suggestions file.
pub fn load_suggestions(path: &Path) -> Result<Vec<Suggestion>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Write a suggestions file, replacing it atomically.
pub fn save_suggestions(path: &Path, suggestions: &[Suggestion]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(suggestions)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
