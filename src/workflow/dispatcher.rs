//! Stream events -> workflow state.
//!
//! [`reduce`] does no I/O and holds no clock other than stage timestamps, so every
//! transition can be exercised with hand-built events.

use super::state::{BatchPlan, Stage, StageStatus, WorkflowState};
use crate::stream::events::{BatchResult, StreamEvent, resolve_index};
use crate::types::PipelineResult;

/// What the caller should do after an event was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Continue,
    /// `results[index]` was created or overwritten.
    ResultUpdated(usize),
    Completed,
    Failed(String),
    /// Event had no effect (unknown kind, or stage already terminal).
    Ignored,
}

pub fn reduce(state: &mut WorkflowState, stage: Stage, event: &StreamEvent) -> Dispatch {
    if state.stage(stage).status.is_terminal() {
        log::debug!("{}: dropping {} after terminal state", stage, event.kind());
        return Dispatch::Ignored;
    }
    if matches!(event, StreamEvent::Unknown) {
        log::warn!("⚠️  {}: ignoring event of unknown type", stage);
        return Dispatch::Ignored;
    }
    state.stage_mut(stage).status = StageStatus::Streaming;

    match event {
        StreamEvent::Initialization {
            total_items,
            total_batches,
            ..
        } => {
            let stage_state = state.stage_mut(stage);
            stage_state.progress.current = 0;
            stage_state.progress.set_total(total_items.unwrap_or(0));
            if total_batches.is_some() {
                stage_state.batch_plan.get_or_insert_with(BatchPlan::default).total_batches =
                    *total_batches;
            }
            Dispatch::Continue
        }

        StreamEvent::Planning {
            total_batches,
            batch_size,
            ..
        } => {
            state.stage_mut(stage).batch_plan = Some(BatchPlan {
                total_batches: *total_batches,
                batch_size: *batch_size,
            });
            Dispatch::Continue
        }

        StreamEvent::BatchStart {
            batch_number,
            start_index,
            batch_size,
            ..
        } => {
            let stage_state = state.stage_mut(stage);
            let size = batch_size.or(stage_state.batch_plan.and_then(|p| p.batch_size));
            let index = start_index.or_else(|| {
                let n = batch_number.and_then(|n| n.checked_sub(1))?;
                Some(n * size?)
            });
            if index.is_some() {
                stage_state.progress.current_processing_index = index;
            }
            Dispatch::Continue
        }

        StreamEvent::RetranslationStart { index, .. } => {
            state.stage_mut(stage).progress.current_processing_index = Some(*index);
            Dispatch::Continue
        }

        StreamEvent::TextCompleted {
            index,
            text_number,
            original_text,
            translated_text,
            total,
            ..
        } => {
            advance(state, stage, *total);
            let position = resolve_index(*index, *text_number);
            match (stage, position, translated_text) {
                (Stage::Translate, Some(position), Some(translated)) => {
                    upsert_result(state, position, original_text.as_deref(), translated);
                    Dispatch::ResultUpdated(position)
                }
                _ => Dispatch::Continue,
            }
        }

        StreamEvent::ItemCompleted {
            index,
            item_number,
            terms,
            total,
            ..
        } => {
            advance(state, stage, *total);
            if !terms.is_empty() {
                state.glossary_terms.extend(terms.iter().cloned());
                if let Some(position) = resolve_index(*index, *item_number) {
                    state.item_glossary_mut(position).extend(terms.iter().cloned());
                }
            }
            Dispatch::Continue
        }

        StreamEvent::BatchCompleted { results, .. } => {
            if stage == Stage::Translate {
                merge_results(state, results);
            }
            Dispatch::Continue
        }

        StreamEvent::RetranslationCompleted {
            index,
            translated_text,
            total,
            ..
        } => {
            advance(state, stage, *total);
            match state.results.get_mut(*index) {
                Some(result) => {
                    result.supersede(translated_text.clone());
                    Dispatch::ResultUpdated(*index)
                }
                None => {
                    log::warn!(
                        "⚠️  {}: retranslation for index {} but only {} results exist",
                        stage,
                        index,
                        state.results.len()
                    );
                    Dispatch::Continue
                }
            }
        }

        StreamEvent::Completion { results, terms, .. } => {
            match stage {
                Stage::Translate => {
                    if let Some(results) = results {
                        merge_results(state, results);
                    }
                }
                Stage::Glossary => {
                    if let Some(terms) = terms {
                        state.glossary_terms = terms.clone();
                    }
                }
                Stage::Analyze | Stage::Apply => {}
            }
            complete(state, stage);
            Dispatch::Completed
        }

        StreamEvent::Error { .. } => {
            let reason = event
                .error_message()
                .unwrap_or_else(|| format!("{} failed", stage.operation()));
            fail(state, stage, reason.clone());
            Dispatch::Failed(reason)
        }

        StreamEvent::RawContent { content, .. } => {
            log::debug!("{}: raw content ({} chars)", stage, content.chars().count());
            Dispatch::Continue
        }

        StreamEvent::Unknown => Dispatch::Ignored,
    }
}

/// Terminal success: full bar, no active item.
pub fn complete(state: &mut WorkflowState, stage: Stage) {
    let stage_state = state.stage_mut(stage);
    stage_state.progress.finish();
    stage_state.finish(StageStatus::Completed);
}

pub fn fail(state: &mut WorkflowState, stage: Stage, reason: String) {
    let stage_state = state.stage_mut(stage);
    stage_state.status_message = Some(reason.clone());
    stage_state.finish(StageStatus::Failed(reason));
}

pub fn abort(state: &mut WorkflowState, stage: Stage) {
    let stage_state = state.stage_mut(stage);
    stage_state.status_message = Some(stage.stopped_message().to_string());
    stage_state.finish(StageStatus::Aborted);
}

fn advance(state: &mut WorkflowState, stage: Stage, total: Option<usize>) {
    let progress = &mut state.stage_mut(stage).progress;
    if progress.total == 0 {
        if let Some(total) = total {
            progress.set_total(total);
        }
    }
    progress.advance();
}

fn merge_results(state: &mut WorkflowState, results: &[BatchResult]) {
    for result in results {
        let position = result.index.unwrap_or(state.results.len());
        upsert_result(
            state,
            position,
            result.original_text.as_deref(),
            &result.translated_text,
        );
    }
}

/// Create or overwrite `results[position]`, filling gaps from the source texts.
fn upsert_result(
    state: &mut WorkflowState,
    position: usize,
    original_text: Option<&str>,
    translated_text: &str,
) {
    while state.results.len() <= position {
        let next = state.results.len();
        let source = state.sources.get(next);
        state.results.push(
            PipelineResult::new(source.map(|s| s.text.as_str()).unwrap_or_default(), "")
                .with_line_numbers(source.and_then(|s| s.line_numbers.clone())),
        );
    }
    let result = &mut state.results[position];
    if let Some(original) = original_text {
        result.original_text = original.to_string();
    }
    result.translated_text = translated_text.to_string();
}

// ============================================================================
// Tests
// ============================================================================
