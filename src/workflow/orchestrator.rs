use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::cancel::RequestManager;
use super::dispatcher::{self, Dispatch};
use super::standardize;
use super::state::{Stage, StageState, StageStatus, WorkflowState};
use crate::error::{AppError, ErrorContext, Result, log_error};
use crate::stream::events::StreamEvent;
use crate::stream::reader::{StreamOutcome, read_events};
use crate::transport::Transport;
use crate::types::{
    AnalyzeRequest, AnalyzeResponse, ApplyRequest, GlossaryRequest, PipelineResult, SourceText,
    StageProgress, TranslateRequest,
};
use crate::validator::{self, Validate};

// ============================================================================
// SESSION CONTEXT
// ============================================================================

/// Per-document settings every stage request is built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub document_id: String,
    pub model_name: String,
    pub target_language: String,
    #[serde(default)]
    pub text_type: Option<String>,
    #[serde(default)]
    pub batch_size: Option<u32>,
    #[serde(default)]
    pub user_rules: Option<String>,
}

impl SessionContext {
    pub fn new(document_id: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            model_name: model_name.into(),
            target_language: "en".to_string(),
            text_type: None,
            batch_size: None,
            user_rules: None,
        }
    }
}

// ============================================================================
// OBSERVER
// ============================================================================

/// UI-side callbacks. Persisting results is the observer's job.
///
/// An aborted stage reports through neither `on_complete` nor `on_error`.
pub trait StageObserver {
    fn on_event(&mut self, _stage: Stage, _event: &StreamEvent) {}

    /// `text_completed` created a result, or `retranslation_completed` replaced one.
    fn on_result_updated(&mut self, _stage: Stage, _index: usize, _result: &PipelineResult) {}

    fn on_complete(&mut self, _stage: Stage, _state: &WorkflowState) {}

    fn on_error(&mut self, _stage: Stage, _error: &AppError) {}
}

pub struct NoopObserver;

impl StageObserver for NoopObserver {}

// ============================================================================
// STOPPER
// ============================================================================

/// Cloneable handle that can stop stages while a `start_*` call is in flight.
#[derive(Clone)]
pub struct StageStopper {
    requests: RequestManager,
}

impl StageStopper {
    /// `true` for the call that stopped a running stage; later calls are no-ops.
    pub fn stop(&self, stage: Stage) -> bool {
        let stopped = self.requests.cancel(stage);
        if stopped {
            log::info!("🛑 {} stop requested", stage);
        }
        stopped
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

pub struct Orchestrator<T: Transport> {
    transport: T,
    context: SessionContext,
    state: WorkflowState,
    requests: RequestManager,
}

impl<T: Transport> Orchestrator<T> {
    pub fn new(transport: T, context: SessionContext) -> Self {
        Self {
            transport,
            context,
            state: WorkflowState::default(),
            requests: RequestManager::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Selectors
    // ------------------------------------------------------------------------

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn stage(&self, stage: Stage) -> &StageState {
        self.state.stage(stage)
    }

    pub fn progress(&self, stage: Stage) -> StageProgress {
        self.state.stage(stage).progress
    }

    pub fn results(&self) -> &[PipelineResult] {
        &self.state.results
    }

    pub fn standardized_results(&self) -> &[PipelineResult] {
        &self.state.standardized_results
    }

    // ------------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------------

    pub fn stopper(&self) -> StageStopper {
        StageStopper {
            requests: self.requests.clone(),
        }
    }

    pub fn stop(&self, stage: Stage) -> bool {
        self.stopper().stop(stage)
    }

    /// Return a finished stage to `idle`. Running stages must be stopped first.
    pub fn reset(&mut self, stage: Stage) -> Result<()> {
        if self.requests.is_active(stage) || self.state.stage(stage).status.is_running() {
            return Err(AppError::precondition(format!(
                "{} is still running",
                stage.operation()
            )));
        }
        *self.state.stage_mut(stage) = StageState::default();
        Ok(())
    }

    pub fn select_translation(&mut self, term: &str, translation: &str) -> Result<()> {
        standardize::select_translation(
            &mut self.state.selections,
            &self.state.inconsistent_terms,
            term,
            translation,
        )
    }

    // ------------------------------------------------------------------------
    // Stages
    // ------------------------------------------------------------------------

    /// Translate `sources`; results are rebuilt from the stream.
    pub async fn start_translation<O: StageObserver>(
        &mut self,
        sources: Vec<SourceText>,
        observer: &mut O,
    ) -> StreamOutcome {
        let request = TranslateRequest {
            texts: sources.iter().map(|s| s.text.clone()).collect(),
            target_language: self.context.target_language.clone(),
            text_type: self.context.text_type.clone(),
            model_name: Some(self.context.model_name.clone()),
            batch_size: self.context.batch_size,
            user_rules: self.context.user_rules.clone(),
        };
        self.run_stream(Stage::Translate, &request, observer, move |state| {
            // Downstream data belongs to the previous result list.
            state.sources = sources;
            state.results.clear();
            state.standardized_results.clear();
            state.glossary_terms.clear();
            state.item_glossaries.clear();
            state.inconsistent_terms.clear();
            state.selections.clear();
        })
        .await
    }

    pub async fn start_glossary_extraction<O: StageObserver>(
        &mut self,
        observer: &mut O,
    ) -> StreamOutcome {
        let request = GlossaryRequest {
            items: standardize::glossary_items(&self.state.results),
            model_name: Some(self.context.model_name.clone()),
            batch_size: self.context.batch_size,
        };
        self.run_stream(Stage::Glossary, &request, observer, |state| {
            state.glossary_terms.clear();
            state.item_glossaries.clear();
        })
        .await
    }

    /// Single request/response: replaces `inconsistent_terms` wholesale and
    /// seeds `selections` with the first candidate of every term.
    pub async fn start_standardization_analysis<O: StageObserver>(
        &mut self,
        observer: &mut O,
    ) -> StreamOutcome {
        let stage = Stage::Analyze;
        let request = AnalyzeRequest {
            items: standardize::standardize_items(&self.state.results, &self.state.item_glossaries),
        };

        let token = self.requests.register(stage);
        self.state.stage_mut(stage).begin();
        if let Err(e) = request.validate() {
            self.requests.unregister(stage, &token);
            return self.settle(stage, StreamOutcome::Failed(e), observer);
        }

        let run_id = Uuid::now_v7();
        log::info!(
            "🚀 [{}] {} started (run {}, {} items)",
            self.context.document_id,
            stage,
            run_id,
            request.items.len()
        );
        let response = match token.check() {
            Ok(()) => self.transport.post_json(stage, &request, &token).await,
            Err(e) => Err(e),
        };
        self.requests.unregister(stage, &token);

        let outcome = match response.and_then(|value| {
            serde_json::from_value::<AnalyzeResponse>(value)
                .context("Malformed standardization analysis response")
        }) {
            Ok(response) => {
                let progress = &mut self.state.stage_mut(stage).progress;
                progress.set_total(1);
                progress.advance();
                self.state.selections = standardize::default_selections(&response.inconsistent_terms);
                self.state.inconsistent_terms = response.inconsistent_terms;
                log::info!(
                    "🔎 [{}] {} inconsistent terms found",
                    self.context.document_id,
                    self.state.inconsistent_terms.len()
                );
                StreamOutcome::Completed
            }
            Err(e) if e.is_aborted() => StreamOutcome::Aborted,
            Err(e) => StreamOutcome::Failed(e),
        };
        self.settle(stage, outcome, observer)
    }

    /// Rewrite results with the selected canonical translations.
    pub async fn start_standardization_apply<O: StageObserver>(
        &mut self,
        observer: &mut O,
    ) -> StreamOutcome {
        let stage = Stage::Apply;
        if self.state.inconsistent_terms.is_empty() || self.state.selections.is_empty() {
            self.state.stage_mut(stage).begin();
            let error = AppError::precondition(
                "Run standardization analysis and choose translations before applying",
            );
            return self.settle(stage, StreamOutcome::Failed(error), observer);
        }

        let request = ApplyRequest {
            items: standardize::standardize_items(&self.state.results, &self.state.item_glossaries),
            standardization_pairs: standardize::derive_pairs(
                &self.state.inconsistent_terms,
                &self.state.selections,
            ),
            model_name: self.context.model_name.clone(),
            user_rules: self.context.user_rules.clone(),
        };
        self.run_stream(stage, &request, observer, |_| {}).await
    }

    /// Apply, wait for it to finish, then snapshot the rewritten results.
    pub async fn start_standardization_translation<O: StageObserver>(
        &mut self,
        observer: &mut O,
    ) -> StreamOutcome {
        self.state.standardized_results.clear();
        let outcome = self.start_standardization_apply(observer).await;
        match outcome {
            StreamOutcome::Completed | StreamOutcome::Failed(_) => {
                self.state.standardized_results = self.state.results.clone();
            }
            StreamOutcome::Aborted => {}
        }
        outcome
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    async fn run_stream<B, O, P>(
        &mut self,
        stage: Stage,
        request: &B,
        observer: &mut O,
        prepare: P,
    ) -> StreamOutcome
    where
        B: Serialize + Validate,
        O: StageObserver,
        P: FnOnce(&mut WorkflowState),
    {
        // Registered before anything else so a stop issued during setup is not lost.
        let token = self.requests.register(stage);
        self.state.stage_mut(stage).begin();
        if let Err(e) = request.validate() {
            self.requests.unregister(stage, &token);
            return self.settle(stage, StreamOutcome::Failed(e), observer);
        }

        let run_id = Uuid::now_v7();
        log::info!(
            "🚀 [{}] {} started (run {})",
            self.context.document_id,
            stage,
            run_id
        );

        let opened = match token.check() {
            Ok(()) => self.transport.start_stream(stage, request, &token).await,
            Err(e) => Err(e),
        };
        let outcome = match opened {
            Ok(handle) => {
                // Earlier data is only replaced once the new run is actually streaming.
                prepare(&mut self.state);
                self.state.stage_mut(stage).status = StageStatus::Streaming;
                let state = &mut self.state;
                read_events(handle, |event| {
                    observer.on_event(stage, &event);
                    if let Dispatch::ResultUpdated(index) = dispatcher::reduce(state, stage, &event) {
                        if let Some(result) = state.results.get(index) {
                            observer.on_result_updated(stage, index, result);
                        }
                    }
                })
                .await
            }
            Err(e) if e.is_aborted() => StreamOutcome::Aborted,
            Err(e) => StreamOutcome::Failed(e),
        };
        self.requests.unregister(stage, &token);

        log::debug!("[{}] {} run {} ended", self.context.document_id, stage, run_id);
        self.settle(stage, outcome, observer)
    }

    fn settle<O: StageObserver>(
        &mut self,
        stage: Stage,
        outcome: StreamOutcome,
        observer: &mut O,
    ) -> StreamOutcome {
        let document_id = &self.context.document_id;
        match &outcome {
            StreamOutcome::Completed => {
                if self.state.stage(stage).status != StageStatus::Completed {
                    dispatcher::complete(&mut self.state, stage);
                }
                let progress = self.state.stage(stage).progress;
                log::info!(
                    "✅ [{}] {} completed ({}/{})",
                    document_id,
                    stage,
                    progress.current,
                    progress.total
                );
                observer.on_complete(stage, &self.state);
            }
            StreamOutcome::Failed(error) => {
                let reason = error.user_message().unwrap_or_else(|| error.message.clone());
                dispatcher::fail(&mut self.state, stage, reason);
                match validator::failed_field(error) {
                    Some(field) => log::warn!("❌ [{}] {} rejected: invalid {}", document_id, stage, field),
                    None => log::warn!("❌ [{}] {} failed", document_id, stage),
                }
                log_error(error);
                observer.on_error(stage, error);
            }
            StreamOutcome::Aborted => {
                dispatcher::abort(&mut self.state, stage);
                log::info!("🛑 [{}] {}", document_id, stage.stopped_message());
            }
        }
        outcome
    }
}

// ============================================================================
// TESTS
// ============================================================================
