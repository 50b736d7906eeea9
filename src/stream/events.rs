use serde::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;

use crate::types::{GlossaryTerm, Timestamp};

/// One translated text inside a `batch_completed` / `completion` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchResult {
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub original_text: Option<String>,
    pub translated_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, IntoStaticStr)]
#[serde(tag = "type", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StreamEvent {
    // Lifecycle events
    Initialization {
        #[serde(default, alias = "total_texts")]
        total_items: Option<usize>,
        #[serde(default)]
        total_batches: Option<usize>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        timestamp: Timestamp,
    },

    Planning {
        #[serde(default)]
        total_batches: Option<usize>,
        #[serde(default)]
        batch_size: Option<usize>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        timestamp: Timestamp,
    },

    // Batch events
    BatchStart {
        /// 1-based.
        #[serde(default)]
        batch_number: Option<usize>,
        #[serde(default, alias = "current_index")]
        start_index: Option<usize>,
        #[serde(default)]
        batch_size: Option<usize>,
        #[serde(default)]
        total_batches: Option<usize>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        timestamp: Timestamp,
    },

    BatchCompleted {
        #[serde(default)]
        batch_number: Option<usize>,
        #[serde(default)]
        results: Vec<BatchResult>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        timestamp: Timestamp,
    },

    // Per-item events
    TextCompleted {
        #[serde(default)]
        index: Option<usize>,
        /// 1-based.
        #[serde(default)]
        text_number: Option<usize>,
        #[serde(default)]
        original_text: Option<String>,
        #[serde(default)]
        translated_text: Option<String>,
        #[serde(default, alias = "total_texts")]
        total: Option<usize>,
        #[serde(default)]
        percentage: Option<f64>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        timestamp: Timestamp,
    },

    ItemCompleted {
        #[serde(default)]
        index: Option<usize>,
        /// 1-based.
        #[serde(default)]
        item_number: Option<usize>,
        #[serde(default)]
        terms: Vec<GlossaryTerm>,
        #[serde(default, alias = "total_items")]
        total: Option<usize>,
        #[serde(default)]
        percentage: Option<f64>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        timestamp: Timestamp,
    },

    // Standardization-apply events
    RetranslationStart {
        index: usize,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        timestamp: Timestamp,
    },

    RetranslationCompleted {
        index: usize,
        #[serde(alias = "retranslated_text", alias = "new_translation")]
        translated_text: String,
        #[serde(default, alias = "total_items")]
        total: Option<usize>,
        #[serde(default)]
        percentage: Option<f64>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        timestamp: Timestamp,
    },

    // Completion events
    Completion {
        #[serde(default)]
        results: Option<Vec<BatchResult>>,
        #[serde(default)]
        terms: Option<Vec<GlossaryTerm>>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        timestamp: Timestamp,
    },

    // Error events
    Error {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        error_type: Option<String>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        timestamp: Timestamp,
    },

    // Raw model output the server could not structure
    RawContent {
        #[serde(default)]
        content: String,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        timestamp: Timestamp,
    },

    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    /// Wire discriminator, e.g. `"batch_start"`.
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completion { .. } | Self::Error { .. })
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Initialization { message, .. }
            | Self::Planning { message, .. }
            | Self::BatchStart { message, .. }
            | Self::BatchCompleted { message, .. }
            | Self::TextCompleted { message, .. }
            | Self::ItemCompleted { message, .. }
            | Self::RetranslationStart { message, .. }
            | Self::RetranslationCompleted { message, .. }
            | Self::Completion { message, .. }
            | Self::Error { message, .. }
            | Self::RawContent { message, .. } => message.as_deref(),
            Self::Unknown => None,
        }
    }

    /// Human-readable reason carried by an `error` event.
    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::Error {
                error,
                message,
                error_type,
                ..
            } => Some(
                message
                    .clone()
                    .or_else(|| error.clone())
                    .or_else(|| error_type.clone())
                    .unwrap_or_else(|| "The server reported an unknown error".to_string()),
            ),
            _ => None,
        }
    }
}

/// Position from an explicit 0-based index, else from a 1-based ordinal.
pub(crate) fn resolve_index(index: Option<usize>, ordinal: Option<usize>) -> Option<usize> {
    index.or_else(|| ordinal.and_then(|n| n.checked_sub(1)))
}
