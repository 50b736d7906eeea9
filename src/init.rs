use crate::error::{AppError, Result};
use crate::transport::{EndpointPaths, HttpTransport};
use crate::validator::{MAX_BATCH_SIZE, MIN_BATCH_SIZE};
use crate::workflow::{Orchestrator, SessionContext};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub base_url: String,
    pub api_token: Option<String>,
    pub paths: EndpointPaths,
    pub session: SessionContext,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let batch_size = match var("WORKFLOW_BATCH_SIZE") {
            Some(raw) => {
                let size: u32 = raw.trim().parse().map_err(|_| {
                    AppError::config(format!("WORKFLOW_BATCH_SIZE is not a number: {}", raw))
                })?;
                if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&size) {
                    return Err(AppError::config(format!(
                        "WORKFLOW_BATCH_SIZE must be between {} and {}",
                        MIN_BATCH_SIZE, MAX_BATCH_SIZE
                    )));
                }
                Some(size)
            }
            None => None,
        };

        let defaults = EndpointPaths::default();
        let paths = EndpointPaths {
            translate: var("WORKFLOW_TRANSLATE_PATH").unwrap_or(defaults.translate),
            glossary: var("WORKFLOW_GLOSSARY_PATH").unwrap_or(defaults.glossary),
            analyze: var("WORKFLOW_ANALYZE_PATH").unwrap_or(defaults.analyze),
            apply: var("WORKFLOW_APPLY_PATH").unwrap_or(defaults.apply),
        };

        let session = SessionContext {
            document_id: var("WORKFLOW_DOCUMENT_ID").unwrap_or_else(|| "default".to_string()),
            model_name: var("WORKFLOW_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            target_language: var("WORKFLOW_TARGET_LANGUAGE").unwrap_or_else(|| "en".to_string()),
            text_type: var("WORKFLOW_TEXT_TYPE"),
            batch_size,
            user_rules: var("WORKFLOW_USER_RULES"),
        };

        Ok(Self {
            base_url: var("WORKFLOW_BASE_URL").unwrap_or_else(|| "http://127.0.0.1:8000".to_string()),
            api_token: var("WORKFLOW_API_TOKEN"),
            paths,
            session,
        })
    }
}

pub fn app_init(config: Config) -> Result<Orchestrator<HttpTransport>> {
    if !config.base_url.starts_with("http://") && !config.base_url.starts_with("https://") {
        return Err(AppError::config(format!(
            "WORKFLOW_BASE_URL must be an http(s) URL: {}",
            config.base_url
        )));
    }
    log::info!("✅ Configuration loaded");
    log::info!("🌐 Backend: {}", config.base_url);
    log::info!(
        "🤖 Model: {} → {}",
        config.session.model_name,
        config.session.target_language
    );
    if config.api_token.is_none() {
        log::warn!("🔓 WORKFLOW_API_TOKEN not set, requests are unauthenticated");
    }

    let transport = HttpTransport::new(config.base_url, config.api_token, config.paths);
    Ok(Orchestrator::new(transport, config.session))
}
