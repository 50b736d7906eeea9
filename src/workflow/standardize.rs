use crate::error::{AppError, Result};
use crate::types::{
    GlossaryItem, GlossaryTerm, InconsistentTerms, PipelineResult, StandardizationPair,
    StandardizationSelection, StandardizeItem,
};

/// Default choice per term: the first translation observed for it.
pub fn default_selections(terms: &InconsistentTerms) -> StandardizationSelection {
    terms
        .iter()
        .filter_map(|(term, candidates)| {
            candidates
                .first()
                .map(|first| (term.clone(), first.clone()))
        })
        .collect()
}

/// Candidate occurring most often across the translated texts.
///
/// Display helper only; defaults come from [`default_selections`].
/// Ties go to the earlier candidate.
pub fn most_frequent_translation<'a>(
    candidates: &'a [String],
    results: &[PipelineResult],
) -> Option<&'a str> {
    let mut best: Option<(&'a str, usize)> = None;
    for candidate in candidates.iter().filter(|c| !c.is_empty()) {
        let count: usize = results
            .iter()
            .map(|r| r.translated_text.matches(candidate.as_str()).count())
            .sum();
        if best.is_none_or(|(_, top)| count > top) {
            best = Some((candidate.as_str(), count));
        }
    }
    best.map(|(candidate, _)| candidate)
}

/// Record the user's choice for `term`; it must be one of the observed candidates.
pub fn select_translation(
    selections: &mut StandardizationSelection,
    terms: &InconsistentTerms,
    term: &str,
    translation: &str,
) -> Result<()> {
    let candidates = terms
        .get(term)
        .ok_or_else(|| AppError::validation(format!("'{}' is not an inconsistent term", term)))?;
    if !candidates.iter().any(|c| c == translation) {
        return Err(AppError::validation(format!(
            "'{}' was never observed as a translation of '{}'",
            translation, term
        )));
    }
    selections.insert(term.to_string(), translation.to_string());
    Ok(())
}

/// One pair per inconsistent term, falling back to the default for unselected terms.
pub fn derive_pairs(
    terms: &InconsistentTerms,
    selections: &StandardizationSelection,
) -> Vec<StandardizationPair> {
    terms
        .iter()
        .filter_map(|(term, candidates)| {
            let chosen = selections.get(term).or_else(|| candidates.first())?;
            Some(StandardizationPair {
                source_word: term.clone(),
                standardized_translation: chosen.clone(),
            })
        })
        .collect()
}

pub fn glossary_items(results: &[PipelineResult]) -> Vec<GlossaryItem> {
    results
        .iter()
        .map(|r| GlossaryItem {
            original_text: r.original_text.clone(),
            translated_text: r.translated_text.clone(),
            metadata: r.line_numbers.as_ref().map(|lines| {
                serde_json::json!({ "line_numbers": lines.keys().collect::<Vec<_>>() })
            }),
        })
        .collect()
}

/// Results paired with the glossary extracted for each of them (empty when none).
pub fn standardize_items(
    results: &[PipelineResult],
    item_glossaries: &[Vec<GlossaryTerm>],
) -> Vec<StandardizeItem> {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| StandardizeItem {
            original_text: r.original_text.clone(),
            translated_text: r.translated_text.clone(),
            glossary: item_glossaries.get(i).cloned().unwrap_or_default(),
        })
        .collect()
}
