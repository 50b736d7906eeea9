use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Pipeline Results
// ============================================================================

/// Character offsets of one editor line inside a source text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineRange {
    pub from: usize,
    pub to: usize,
}

/// Editor line number -> offset range.
pub type LineNumbers = BTreeMap<u32, LineRange>;

/// One translated text, created by the translate stage and overwritten in place
/// by the standardization-apply stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub original_text: String,
    pub translated_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_translated_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_numbers: Option<LineNumbers>,
    #[serde(default)]
    pub is_updated: bool,
}

impl PipelineResult {
    pub fn new(original_text: impl Into<String>, translated_text: impl Into<String>) -> Self {
        Self {
            original_text: original_text.into(),
            translated_text: translated_text.into(),
            ..Default::default()
        }
    }

    pub fn with_line_numbers(mut self, line_numbers: Option<LineNumbers>) -> Self {
        self.line_numbers = line_numbers;
        self
    }

    /// Replace the translation, remembering the one it supersedes.
    pub fn supersede(&mut self, translated_text: impl Into<String>) {
        let previous = std::mem::replace(&mut self.translated_text, translated_text.into());
        self.previous_translated_text = Some(previous);
        self.is_updated = true;
    }
}

/// Text handed to the translate stage, with the editor lines it came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SourceText {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_numbers: Option<LineNumbers>,
}

impl SourceText {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            line_numbers: None,
        }
    }
}

// ============================================================================
// Glossary & Standardization
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct GlossaryTerm {
    pub source_term: String,
    pub translated_term: String,
}

impl GlossaryTerm {
    pub fn new(source_term: impl Into<String>, translated_term: impl Into<String>) -> Self {
        Self {
            source_term: source_term.into(),
            translated_term: translated_term.into(),
        }
    }
}

/// Source term -> distinct translations in the order they were observed.
pub type InconsistentTerms = BTreeMap<String, Vec<String>>;

/// Source term -> translation chosen as canonical.
pub type StandardizationSelection = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StandardizationPair {
    pub source_word: String,
    pub standardized_translation: String,
}

// ============================================================================
// Stage Progress
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StageProgress {
    pub current: usize,
    pub total: usize,
    pub percentage: u8,
    /// `None` while idle.
    pub current_processing_index: Option<usize>,
}

impl StageProgress {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn set_total(&mut self, total: usize) {
        self.total = total;
        self.current = self.current.min(total);
        self.recompute();
    }

    /// Count one more finished item. `current` never passes `total`.
    pub fn advance(&mut self) {
        if self.current < self.total {
            self.current += 1;
        }
        self.recompute();
    }

    pub fn finish(&mut self) {
        self.percentage = 100;
        self.current_processing_index = None;
    }

    /// Index in the legacy `-1 when idle` form.
    pub fn processing_index_or_idle(&self) -> i64 {
        self.current_processing_index
            .map(|i| i as i64)
            .unwrap_or(-1)
    }

    fn recompute(&mut self) {
        self.percentage = percentage(self.current, self.total);
    }
}

pub fn percentage(current: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (current as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

// ============================================================================
// Timestamp Helper
// ============================================================================

/// Server timestamps arrive either as ISO strings or epoch numbers.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
pub struct Timestamp(String);

impl Timestamp {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(match value {
            serde_json::Value::String(s) => Self(s),
            serde_json::Value::Number(n) => Self(n.to_string()),
            serde_json::Value::Null => Self::default(),
            other => Self(other.to_string()),
        })
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Stage Requests
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TranslateRequest {
    pub texts: Vec<String>,
    pub target_language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_rules: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlossaryItem {
    pub original_text: String,
    pub translated_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GlossaryRequest {
    pub items: Vec<GlossaryItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
}

/// `glossary` has no serde default: a payload without the array is rejected
/// when it is deserialized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StandardizeItem {
    pub original_text: String,
    pub translated_text: String,
    pub glossary: Vec<GlossaryTerm>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AnalyzeRequest {
    pub items: Vec<StandardizeItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AnalyzeResponse {
    #[serde(default)]
    pub inconsistent_terms: InconsistentTerms,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ApplyRequest {
    pub items: Vec<StandardizeItem>,
    pub standardization_pairs: Vec<StandardizationPair>,
    pub model_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_rules: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================
