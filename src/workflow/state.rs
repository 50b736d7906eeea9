use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

use crate::types::{
    GlossaryTerm, InconsistentTerms, PipelineResult, SourceText, StageProgress,
    StandardizationSelection,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Stage {
    Translate,
    #[serde(rename = "glossary-extract")]
    #[strum(serialize = "glossary-extract")]
    Glossary,
    #[serde(rename = "standardize-analyze")]
    #[strum(serialize = "standardize-analyze")]
    Analyze,
    #[serde(rename = "standardize-apply")]
    #[strum(serialize = "standardize-apply")]
    Apply,
}

impl Stage {
    /// Label used in user-facing failure messages.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Translate => "Translation",
            Self::Glossary => "Glossary extraction",
            Self::Analyze => "Standardization analysis",
            Self::Apply => "Standardization",
        }
    }

    pub fn stopped_message(&self) -> &'static str {
        match self {
            Self::Translate => "Translation stopped.",
            Self::Glossary => "Glossary extraction stopped.",
            Self::Analyze => "Standardization analysis stopped.",
            Self::Apply => "Standardization stopped.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Idle,
    Requesting,
    Streaming,
    Completed,
    Failed(String),
    Aborted,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_) | Self::Aborted)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Requesting | Self::Streaming)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BatchPlan {
    pub total_batches: Option<usize>,
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StageState {
    pub status: StageStatus,
    pub progress: StageProgress,
    pub status_message: Option<String>,
    pub batch_plan: Option<BatchPlan>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageState {
    /// Fresh run: zeroed progress, `requesting`.
    pub fn begin(&mut self) {
        *self = Self {
            status: StageStatus::Requesting,
            started_at: Some(Utc::now()),
            ..Default::default()
        };
    }

    pub fn finish(&mut self, status: StageStatus) {
        self.status = status;
        self.progress.current_processing_index = None;
        self.finished_at = Some(Utc::now());
    }
}

/// Everything one document session accumulates across the four stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WorkflowState {
    pub translate: StageState,
    pub glossary: StageState,
    pub analyze: StageState,
    pub apply: StageState,

    /// Inputs of the last translate run; supplies line numbers to new results.
    pub sources: Vec<SourceText>,
    pub results: Vec<PipelineResult>,
    pub standardized_results: Vec<PipelineResult>,
    pub glossary_terms: Vec<GlossaryTerm>,
    /// Terms per result index, parallel to `results`.
    pub item_glossaries: Vec<Vec<GlossaryTerm>>,
    pub inconsistent_terms: InconsistentTerms,
    pub selections: StandardizationSelection,
}

impl WorkflowState {
    pub fn stage(&self, stage: Stage) -> &StageState {
        match stage {
            Stage::Translate => &self.translate,
            Stage::Glossary => &self.glossary,
            Stage::Analyze => &self.analyze,
            Stage::Apply => &self.apply,
        }
    }

    pub fn stage_mut(&mut self, stage: Stage) -> &mut StageState {
        match stage {
            Stage::Translate => &mut self.translate,
            Stage::Glossary => &mut self.glossary,
            Stage::Analyze => &mut self.analyze,
            Stage::Apply => &mut self.apply,
        }
    }

    /// Terms recorded for result `index`, growing the table on demand.
    pub fn item_glossary_mut(&mut self, index: usize) -> &mut Vec<GlossaryTerm> {
        if self.item_glossaries.len() <= index {
            self.item_glossaries.resize_with(index + 1, Vec::new);
        }
        &mut self.item_glossaries[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_stage_names() {
        let names: Vec<String> = Stage::iter().map(|s| s.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "translate",
                "glossary-extract",
                "standardize-analyze",
                "standardize-apply"
            ]
        );
        assert_eq!(
            serde_json::to_string(&Stage::Apply).unwrap(),
            "\"standardize-apply\""
        );
    }

    #[test]
    fn test_begin_resets_progress() {
        let mut state = StageState::default();
        state.progress.set_total(4);
        state.progress.advance();
        state.progress.current_processing_index = Some(2);
        state.status = StageStatus::Failed("x".to_string());

        state.begin();
        assert_eq!(state.status, StageStatus::Requesting);
        assert_eq!(state.progress, StageProgress::default());
        assert!(state.started_at.is_some());
    }

    #[test]
    fn test_item_glossary_grows() {
        let mut state = WorkflowState::default();
        state
            .item_glossary_mut(2)
            .push(GlossaryTerm::new("chat", "cat"));
        assert_eq!(state.item_glossaries.len(), 3);
        assert!(state.item_glossaries[0].is_empty());
    }
}
