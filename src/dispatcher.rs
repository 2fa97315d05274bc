//! Retry-fallback dispatcher
//!
//! Walks the candidate models in preference order. Overload errors move on to
//! the next model; a full round of overloads triggers a linear backoff before
//! the next round. Any other error ends the run immediately.

use crate::config::Config;
use crate::gemini::{GenerationConfig, GenerativeBackend};
use crate::models::{AnalysisRequest, DispatchOutcome, FailureKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Returned when every model stayed overloaded for every round
pub const OVERLOADED_MESSAGE: &str =
    "The analysis service is temporarily overloaded. Please try again in a few moments.";

pub struct Dispatcher {
    backend: Arc<dyn GenerativeBackend>,
    models: Vec<String>,
    max_rounds: u32,
    base_delay: Duration,
    generation_config: GenerationConfig,
}

impl Dispatcher {
    pub fn new(
        backend: Arc<dyn GenerativeBackend>,
        models: Vec<String>,
        max_rounds: u32,
        base_delay: Duration,
    ) -> Self {
        Self {
            backend,
            models,
            max_rounds: max_rounds.max(1),
            base_delay,
            generation_config: GenerationConfig::default(),
        }
    }

    pub fn from_config(backend: Arc<dyn GenerativeBackend>, config: &Config) -> Self {
        Self::new(
            backend,
            config.models.clone(),
            config.max_rounds,
            config.retry_base_delay,
        )
    }

    /// Run the request against the candidate models until one answers
    pub async fn dispatch(&self, request: &AnalysisRequest) -> DispatchOutcome {
        if self.models.is_empty() {
            return DispatchOutcome::Failure {
                kind: FailureKind::Fatal,
                message: "No candidate model configured".to_string(),
            };
        }

        for round in 1..=self.max_rounds {
            for model in &self.models {
                info!(model = %model, round, "Dispatching analysis request");

                match self
                    .backend
                    .generate(model, request.parts(), &self.generation_config)
                    .await
                {
                    Ok(text) => {
                        info!(model = %model, round, chars = text.len(), "Model answered");
                        return DispatchOutcome::Success {
                            text,
                            model: model.clone(),
                        };
                    }
                    Err(e) if e.is_transient() => {
                        warn!(model = %model, round, "Model overloaded, trying next: {}", e);
                    }
                    Err(e) => {
                        error!(model = %model, round, "Non-retryable API error: {}", e);
                        return DispatchOutcome::Failure {
                            kind: FailureKind::Fatal,
                            message: e.message,
                        };
                    }
                }
            }

            if round < self.max_rounds {
                let delay = self.base_delay * round;
                warn!(round, delay_secs = delay.as_secs_f64(), "All models overloaded, backing off");
                tokio::time::sleep(delay).await;
            }
        }

        error!(rounds = self.max_rounds, "All models overloaded in every round");
        DispatchOutcome::Failure {
            kind: FailureKind::RetryableOverload,
            message: OVERLOADED_MESSAGE.to_string(),
        }
    }
}
