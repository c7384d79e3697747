//! Repair client: one patch per issue from the repair oracle

use crate::config::OracleSettings;
use crate::issue::Issue;
use crate::oracle::prompts::{repair_prompt, REPAIR_SYSTEM};
use crate::oracle::{extract_code_block, ChatBackend, ChatPrompt, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone)]
pub struct RepairClient {
    backend: Arc<dyn ChatBackend>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl RepairClient {
    pub fn new(backend: Arc<dyn ChatBackend>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            backend,
            policy,
            timeout,
        }
    }

    pub fn from_settings(
        backend: Arc<dyn ChatBackend>,
        policy: RetryPolicy,
        settings: &OracleSettings,
    ) -> Self {
        Self::new(
            backend,
            policy,
            Duration::from_secs(settings.repair_timeout_secs),
        )
    }

    /// Ask the oracle for a patched version of `issue.buggy_code`.
    ///
    /// `None` means no usable patch could be produced: retries were exhausted,
    /// the oracle answered with a fatal status, or the reply held no code.
    /// Never returns an error to the caller.
    pub async fn repair(&self, issue: &Issue) -> Option<String> {
        info!(slug = %issue.slug, "requesting repair");

        let prompt = ChatPrompt {
            system: Some(REPAIR_SYSTEM.to_string()),
            user: repair_prompt(issue),
            timeout: self.timeout,
        };

        let completion = match self
            .policy
            .run("repair", |_| self.backend.complete(&prompt))
            .await
        {
            Ok(completion) => completion,
            Err(err) => {
                warn!(
                    slug = %issue.slug,
                    attempts = err.attempts(),
                    error = %err,
                    "repair generation failed"
                );
                return None;
            }
        };

        if let Some(usage) = &completion.usage {
            info!(
                slug = %issue.slug,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total(),
                "repair token usage"
            );
        }

        let patch = extract_code_block(&completion.content);
        if patch.is_empty() {
            warn!(slug = %issue.slug, "repair oracle returned no code");
            return None;
        }
        Some(patch)
    }
}
