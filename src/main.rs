use serde::Deserialize;
use strum::IntoEnumIterator;

use translation_workflow::error::ErrorContext;
use translation_workflow::init::{Config, app_init};
use translation_workflow::stream::StreamEvent;
use translation_workflow::types::{PipelineResult, SourceText};
use translation_workflow::workflow::{Stage, StageObserver, WorkflowState};
use translation_workflow::{AppError, StreamOutcome};

#[derive(Debug, Deserialize)]
struct Input {
    texts: Vec<InputText>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InputText {
    Plain(String),
    Located(SourceText),
}

impl From<InputText> for SourceText {
    fn from(text: InputText) -> Self {
        match text {
            InputText::Plain(text) => SourceText::new(text),
            InputText::Located(source) => source,
        }
    }
}

/// Prints stage activity to the log.
struct LogObserver;

impl StageObserver for LogObserver {
    fn on_event(&mut self, stage: Stage, event: &StreamEvent) {
        if let Some(message) = event.message() {
            log::info!("📡 [{}] {}: {}", stage, event.kind(), message);
        }
    }

    fn on_result_updated(&mut self, _stage: Stage, index: usize, result: &PipelineResult) {
        log::info!("📝 #{} {}", index + 1, result.translated_text);
    }

    fn on_complete(&mut self, stage: Stage, state: &WorkflowState) {
        log::info!("🎉 {} finished ({} results)", stage, state.results.len());
    }

    fn on_error(&mut self, stage: Stage, error: &AppError) {
        if let Some(message) = error.user_message() {
            log::error!("❌ {}: {}", stage, message);
        }
    }
}

fn proceed(outcome: &StreamOutcome) -> bool {
    matches!(outcome, StreamOutcome::Completed)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("🚀 Starting translation workflow...");
    dotenv::dotenv().ok();

    let path = std::env::args()
        .nth(1)
        .ok_or("usage: translation-workflow <input.json>")?;
    let raw = std::fs::read_to_string(&path).context(format!("Cannot read {}", path))?;
    let input: Input = serde_json::from_str(&raw).context("Input must be { \"texts\": [...] }")?;
    log::info!("📄 {} texts loaded from {}", input.texts.len(), path);

    let mut orchestrator = app_init(Config::from_env()?)?;
    let stopper = orchestrator.stopper();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            for stage in Stage::iter() {
                stopper.stop(stage);
            }
        }
    });

    let sources: Vec<SourceText> = input.texts.into_iter().map(SourceText::from).collect();
    let mut observer = LogObserver;
    if !proceed(&orchestrator.start_translation(sources, &mut observer).await) {
        return Ok(());
    }
    if !proceed(&orchestrator.start_glossary_extraction(&mut observer).await) {
        return Ok(());
    }
    if !proceed(&orchestrator.start_standardization_analysis(&mut observer).await) {
        return Ok(());
    }

    let results = if orchestrator.state().inconsistent_terms.is_empty() {
        log::info!("✨ Terminology already consistent");
        orchestrator.results().to_vec()
    } else {
        orchestrator
            .start_standardization_translation(&mut observer)
            .await;
        orchestrator.standardized_results().to_vec()
    };

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
