//! Explanation collaborator used to back-fill missing bug messages

use crate::config::OracleSettings;
use crate::oracle::prompts::{explain_prompt, EXPLAIN_SYSTEM};
use crate::oracle::{ChatBackend, ChatPrompt, RetryPolicy};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Placeholder recorded when no explanation could be obtained.
pub const EXPLAIN_FAILED: &str = "Failed to analyze after retries";

/// Produces a short natural-language explanation of a buggy snippet.
///
/// Implementations never fail: an unavailable oracle yields a placeholder.
#[async_trait]
pub trait Explainer: Send + Sync {
    async fn explain(
        &self,
        slug: &str,
        description: &str,
        constraints: &str,
        buggy_code: &str,
    ) -> String;
}

pub struct OracleExplainer {
    backend: Arc<dyn ChatBackend>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl OracleExplainer {
    pub fn new(backend: Arc<dyn ChatBackend>, policy: RetryPolicy, settings: &OracleSettings) -> Self {
        Self {
            backend,
            policy,
            timeout: Duration::from_secs(settings.explain_timeout_secs),
        }
    }
}

#[async_trait]
impl Explainer for OracleExplainer {
    async fn explain(
        &self,
        slug: &str,
        description: &str,
        constraints: &str,
        buggy_code: &str,
    ) -> String {
        let prompt = ChatPrompt {
            system: Some(EXPLAIN_SYSTEM.to_string()),
            user: explain_prompt(slug, description, constraints, buggy_code),
            timeout: self.timeout,
        };

        match self
            .policy
            .run("explain", |_| self.backend.complete(&prompt))
            .await
        {
            Ok(completion) => {
                if let Some(usage) = &completion.usage {
                    info!(slug, total_tokens = usage.total(), "explanation token usage");
                }
                completion.content.trim().to_string()
            }
            Err(err) => {
                warn!(slug, attempts = err.attempts(), error = %err, "explanation unavailable");
                EXPLAIN_FAILED.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use crate::oracle::Completion;

    struct Fixed(Result<&'static str, u16>);

    #[async_trait]
    impl ChatBackend for Fixed {
        async fn complete(&self, _prompt: &ChatPrompt) -> Result<Completion, OracleError> {
            match self.0 {
                Ok(text) => Ok(Completion {
                    content: text.to_string(),
                    usage: None,
                }),
                Err(status) => Err(OracleError::Status {
                    status,
                    body: String::new(),
                }),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_explanation_is_trimmed() {
        let explainer = OracleExplainer::new(
            Arc::new(Fixed(Ok("  Uses = instead of ==.\n"))),
            RetryPolicy::default(),
            &OracleSettings::default(),
        );
        let text = explainer.explain("two-sum", "d", "c", "code").await;
        assert_eq!(text, "Uses = instead of ==.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_yields_placeholder() {
        let explainer = OracleExplainer::new(
            Arc::new(Fixed(Err(429))),
            RetryPolicy::default(),
            &OracleSettings::default(),
        );
        let text = explainer.explain("two-sum", "d", "c", "code").await;
        assert_eq!(text, EXPLAIN_FAILED);
    }
}
