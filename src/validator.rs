use crate::error::{AppError, Result, ValidationError};
use crate::types::{
    AnalyzeRequest, ApplyRequest, GlossaryRequest, GlossaryTerm, StandardizeItem,
    TranslateRequest,
};

pub const MIN_BATCH_SIZE: u32 = 1;
pub const MAX_BATCH_SIZE: u32 = 10;

/// Pre-flight checks run before any request leaves the process.
/// Rules are evaluated in order and the first failure is returned.
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

fn fail(field: impl Into<String>, message: impl Into<String>) -> Result<()> {
    Err(ValidationError::new(field, message).into_app_error())
}

fn require_text(field: String, value: &str, message: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, message)
            .with_code("EMPTY")
            .into_app_error());
    }
    Ok(())
}

fn check_batch_size(batch_size: Option<u32>) -> Result<()> {
    match batch_size {
        Some(size) if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&size) => Err(
            ValidationError::new(
                "batch_size",
                format!(
                    "Batch size must be between {} and {} (got {})",
                    MIN_BATCH_SIZE, MAX_BATCH_SIZE, size
                ),
            )
            .with_code("OUT_OF_RANGE")
            .into_app_error(),
        ),
        _ => Ok(()),
    }
}

fn check_glossary(item_index: usize, glossary: &[GlossaryTerm]) -> Result<()> {
    for (term_index, term) in glossary.iter().enumerate() {
        require_text(
            format!("items[{}].glossary[{}].source_term", item_index, term_index),
            &term.source_term,
            "Glossary source term cannot be empty",
        )?;
        require_text(
            format!(
                "items[{}].glossary[{}].translated_term",
                item_index, term_index
            ),
            &term.translated_term,
            "Glossary translated term cannot be empty",
        )?;
    }
    Ok(())
}

fn check_standardize_items(items: &[StandardizeItem]) -> Result<()> {
    if items.is_empty() {
        return fail("items", "At least one item is required");
    }
    for (i, item) in items.iter().enumerate() {
        require_text(
            format!("items[{}].original_text", i),
            &item.original_text,
            "Original text cannot be empty",
        )?;
        require_text(
            format!("items[{}].translated_text", i),
            &item.translated_text,
            "Translated text cannot be empty",
        )?;
    }
    for (i, item) in items.iter().enumerate() {
        check_glossary(i, &item.glossary)?;
    }
    Ok(())
}

impl Validate for TranslateRequest {
    fn validate(&self) -> Result<()> {
        if self.texts.is_empty() {
            return fail("texts", "At least one text is required");
        }
        for (i, text) in self.texts.iter().enumerate() {
            require_text(format!("texts[{}]", i), text, "Text cannot be empty")?;
        }
        require_text(
            "target_language".to_string(),
            &self.target_language,
            "Target language is required",
        )?;
        check_batch_size(self.batch_size)
    }
}

impl Validate for GlossaryRequest {
    fn validate(&self) -> Result<()> {
        if self.items.is_empty() {
            return fail("items", "At least one item is required");
        }
        for (i, item) in self.items.iter().enumerate() {
            require_text(
                format!("items[{}].original_text", i),
                &item.original_text,
                "Original text cannot be empty",
            )?;
            require_text(
                format!("items[{}].translated_text", i),
                &item.translated_text,
                "Translated text cannot be empty",
            )?;
        }
        check_batch_size(self.batch_size)
    }
}

impl Validate for AnalyzeRequest {
    fn validate(&self) -> Result<()> {
        check_standardize_items(&self.items)
    }
}

impl Validate for ApplyRequest {
    fn validate(&self) -> Result<()> {
        check_standardize_items(&self.items)?;
        if self.standardization_pairs.is_empty() {
            return fail(
                "standardization_pairs",
                "At least one standardization pair is required",
            );
        }
        for (i, pair) in self.standardization_pairs.iter().enumerate() {
            require_text(
                format!("standardization_pairs[{}].source_word", i),
                &pair.source_word,
                "Source word cannot be empty",
            )?;
            require_text(
                format!("standardization_pairs[{}].standardized_translation", i),
                &pair.standardized_translation,
                "Standardized translation cannot be empty",
            )?;
        }
        require_text(
            "model_name".to_string(),
            &self.model_name,
            "Model name is required",
        )
    }
}

/// Field name of the first failure, if the error came from this module.
pub fn failed_field(error: &AppError) -> Option<&str> {
    error
        .details
        .as_ref()
        .and_then(|d| d.get("field"))
        .and_then(|f| f.as_str())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::types::{GlossaryItem, StandardizationPair};

    fn translate(texts: &[&str]) -> TranslateRequest {
        TranslateRequest {
            texts: texts.iter().map(|t| t.to_string()).collect(),
            target_language: "en".to_string(),
            ..Default::default()
        }
    }

    fn item(glossary: Vec<GlossaryTerm>) -> StandardizeItem {
        StandardizeItem {
            original_text: "Le chat".to_string(),
            translated_text: "The cat".to_string(),
            glossary,
        }
    }

    #[test]
    fn test_valid_translate_request() {
        assert!(translate(&["Bonjour"]).validate().is_ok());
    }

    #[test]
    fn test_empty_texts_rejected() {
        let err = translate(&[]).validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
        assert_eq!(failed_field(&err), Some("texts"));
    }

    #[test]
    fn test_whitespace_text_rejected() {
        let err = translate(&["ok", "   \n"]).validate().unwrap_err();
        assert_eq!(failed_field(&err), Some("texts[1]"));
    }

    #[test]
    fn test_target_language_required() {
        let mut req = translate(&["Bonjour"]);
        req.target_language = " ".to_string();
        let err = req.validate().unwrap_err();
        assert_eq!(failed_field(&err), Some("target_language"));
    }

    #[test]
    fn test_first_failure_wins() {
        let mut req = translate(&["", "x"]);
        req.target_language.clear();
        req.batch_size = Some(50);
        let err = req.validate().unwrap_err();
        assert_eq!(failed_field(&err), Some("texts[0]"));
    }

    #[test]
    fn test_batch_size_bounds() {
        for (size, ok) in [(0, false), (1, true), (10, true), (11, false)] {
            let mut req = translate(&["a"]);
            req.batch_size = Some(size);
            assert_eq!(req.validate().is_ok(), ok, "batch size {}", size);
        }
    }

    #[test]
    fn test_glossary_request_items() {
        let req = GlossaryRequest {
            items: vec![GlossaryItem {
                original_text: "Le chat".to_string(),
                translated_text: "".to_string(),
                metadata: None,
            }],
            ..Default::default()
        };
        let err = req.validate().unwrap_err();
        assert_eq!(failed_field(&err), Some("items[0].translated_text"));
    }

    #[test]
    fn test_empty_glossary_array_is_allowed() {
        let req = AnalyzeRequest {
            items: vec![item(vec![])],
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_blank_glossary_term_rejected() {
        let req = AnalyzeRequest {
            items: vec![item(vec![GlossaryTerm::new("chat", " ")])],
        };
        let err = req.validate().unwrap_err();
        assert_eq!(
            failed_field(&err),
            Some("items[0].glossary[0].translated_term")
        );
    }

    #[test]
    fn test_apply_requires_pairs_and_model() {
        let mut req = ApplyRequest {
            items: vec![item(vec![])],
            standardization_pairs: vec![],
            model_name: "m".to_string(),
            user_rules: None,
        };
        assert_eq!(
            failed_field(&req.validate().unwrap_err()),
            Some("standardization_pairs")
        );

        req.standardization_pairs.push(StandardizationPair {
            source_word: "chat".to_string(),
            standardized_translation: "cat".to_string(),
        });
        req.model_name.clear();
        assert_eq!(
            failed_field(&req.validate().unwrap_err()),
            Some("model_name")
        );
    }
}
