//! Repair orchestration
//!
//! Drives each normalized issue through `repair -> validate` exactly once and
//! folds the results into an [`Aggregate`]. Issues run one at a time; a fault
//! inside one cycle is recorded against that issue and the loop moves on.

use crate::issue::Issue;
use crate::repair::RepairClient;
use crate::validate::{Validator, Verdict};
use chrono::Local;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const REASON_REPAIR_FAILED: &str = "repair generation failed";
pub const REASON_VALIDATION_FAILED: &str = "validation failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Fixed,
    Failed,
}

/// Terminal state of one issue, carrying the issue itself for audit.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub issue: Issue,
    pub status: Status,
    pub reason: Option<String>,
    pub verdict: Option<Verdict>,
}

impl Outcome {
    fn fixed(issue: Issue, verdict: Verdict) -> Self {
        Self {
            issue,
            status: Status::Fixed,
            reason: None,
            verdict: Some(verdict),
        }
    }

    fn failed(issue: Issue, reason: impl Into<String>, verdict: Option<Verdict>) -> Self {
        Self {
            issue,
            status: Status::Failed,
            reason: Some(reason.into()),
            verdict,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Aggregate {
    pub run_id: String,
    pub total_issues: usize,
    pub total_fixed: usize,
    pub total_failed: usize,
    /// Local time, ISO-8601 to the second
    pub timestamp: String,
    pub max_iterations: u32,
    pub outcomes: Vec<Outcome>,
}

impl Aggregate {
    fn new(max_iterations: u32) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            total_issues: 0,
            total_fixed: 0,
            total_failed: 0,
            timestamp: Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            max_iterations,
            outcomes: Vec::new(),
        }
    }

    fn record(&mut self, outcome: Outcome) {
        self.total_issues += 1;
        match outcome.status {
            Status::Fixed => self.total_fixed += 1,
            Status::Failed => self.total_failed += 1,
        }
        self.outcomes.push(outcome);
    }

    pub fn all_fixed(&self) -> bool {
        self.total_failed == 0
    }
}

pub struct Engine {
    repairer: RepairClient,
    validator: Arc<Validator>,
    max_iterations: u32,
}

impl Engine {
    pub fn new(repairer: RepairClient, validator: Validator, max_iterations: u32) -> Self {
        Self {
            repairer,
            validator: Arc::new(validator),
            max_iterations,
        }
    }

    /// Process `issues` in slug order. Always returns a complete aggregate.
    pub async fn run(&self, mut issues: Vec<Issue>) -> Aggregate {
        issues.sort_by(|a, b| a.slug.cmp(&b.slug));

        info!(
            issues = issues.len(),
            max_iterations = self.max_iterations,
            "starting repair run (one attempt per issue)"
        );

        let mut aggregate = Aggregate::new(self.max_iterations);
        let total = issues.len();

        for (idx, issue) in issues.into_iter().enumerate() {
            info!(
                slug = %issue.slug,
                language = %issue.language,
                "[{}/{}] {}",
                idx + 1,
                total,
                issue.bug_message
            );

            let fallback = issue.clone();
            let outcome = match AssertUnwindSafe(self.cycle(issue)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let detail = panic_detail(panic.as_ref());
                    error!(slug = %fallback.slug, error = %detail, "repair cycle crashed");
                    Outcome::failed(fallback, format!("internal error: {}", detail), None)
                }
            };

            match outcome.status {
                Status::Fixed => info!(slug = %outcome.issue.slug, "fixed"),
                Status::Failed => warn!(
                    slug = %outcome.issue.slug,
                    reason = outcome.reason.as_deref().unwrap_or_default(),
                    "failed"
                ),
            }
            aggregate.record(outcome);
        }

        info!(
            fixed = aggregate.total_fixed,
            failed = aggregate.total_failed,
            "repair run complete"
        );
        aggregate
    }

    async fn cycle(&self, mut issue: Issue) -> Outcome {
        let Some(patch) = self.repairer.repair(&issue).await else {
            return Outcome::failed(issue, REASON_REPAIR_FAILED, None);
        };
        issue.fixed_code = patch;

        let validator = Arc::clone(&self.validator);
        let candidate = issue.clone();
        let verdict = match tokio::task::spawn_blocking(move || validator.validate(&candidate)).await {
            Ok(verdict) => verdict,
            Err(err) => {
                let detail = if err.is_panic() {
                    panic_detail(err.into_panic().as_ref())
                } else {
                    err.to_string()
                };
                error!(slug = %issue.slug, error = %detail, "validation worker crashed");
                return Outcome::failed(issue, format!("internal error: {}", detail), None);
            }
        };

        if verdict.passed() {
            Outcome::fixed(issue, verdict)
        } else {
            Outcome::failed(issue, REASON_VALIDATION_FAILED, Some(verdict))
        }
    }
}

fn panic_detail(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidateSettings;
    use crate::error::OracleError;
    use crate::oracle::{ChatBackend, ChatPrompt, Completion, RetryPolicy};
    use crate::validate::VerdictKind;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Replies based on which snippet the prompt carries.
    struct ByCode;

    #[async_trait]
    impl ChatBackend for ByCode {
        async fn complete(&self, prompt: &ChatPrompt) -> Result<Completion, OracleError> {
            let reply = if prompt.user.contains("PANIC") {
                panic!("backend exploded");
            } else if prompt.user.contains("NO_PATCH") {
                return Err(OracleError::Status {
                    status: 400,
                    body: "bad request".to_string(),
                });
            } else if prompt.user.contains("BAD_PATCH") {
                "```python\ndef f():\n    return Counter()\n```"
            } else {
                "```python\ndef f():\n    return 1\n```"
            };
            Ok(Completion {
                content: reply.to_string(),
                usage: None,
            })
        }
    }

    fn engine() -> Engine {
        let repairer = RepairClient::new(Arc::new(ByCode), RetryPolicy::default(), Duration::from_secs(5));
        let validator = Validator::new(ValidateSettings {
            python_exec: false,
            ..ValidateSettings::default()
        });
        Engine::new(repairer, validator, 3)
    }

    fn issue(slug: &str, buggy_code: &str) -> Issue {
        Issue {
            language: "python".to_string(),
            slug: slug.to_string(),
            buggy_code: buggy_code.to_string(),
            ..Issue::default()
        }
    }

    #[tokio::test]
    async fn test_outcomes_cover_every_path() {
        let aggregate = engine()
            .run(vec![
                issue("d-crash", "PANIC"),
                issue("c-rejected", "BAD_PATCH"),
                issue("b-no-patch", "NO_PATCH"),
                issue("a-ok", "def f(): return 2"),
            ])
            .await;

        assert_eq!(aggregate.total_issues, 4);
        assert_eq!(aggregate.total_fixed, 1);
        assert_eq!(aggregate.total_failed, 3);
        assert_eq!(aggregate.max_iterations, 3);
        assert!(!aggregate.all_fixed());

        let slugs: Vec<&str> = aggregate.outcomes.iter().map(|o| o.issue.slug.as_str()).collect();
        assert_eq!(slugs, vec!["a-ok", "b-no-patch", "c-rejected", "d-crash"]);

        let ok = &aggregate.outcomes[0];
        assert_eq!(ok.status, Status::Fixed);
        assert_eq!(ok.issue.fixed_code, "def f():\n    return 1");
        assert_eq!(ok.verdict.as_ref().map(|v| v.kind), Some(VerdictKind::Verified));

        let no_patch = &aggregate.outcomes[1];
        assert_eq!(no_patch.reason.as_deref(), Some(REASON_REPAIR_FAILED));
        assert!(no_patch.issue.fixed_code.is_empty());

        let rejected = &aggregate.outcomes[2];
        assert_eq!(rejected.reason.as_deref(), Some(REASON_VALIDATION_FAILED));
        assert!(rejected.issue.fixed_code.contains("Counter"));
        assert_eq!(rejected.verdict.as_ref().map(|v| v.kind), Some(VerdictKind::Rejected));

        let crashed = &aggregate.outcomes[3];
        assert_eq!(crashed.status, Status::Failed);
        assert_eq!(
            crashed.reason.as_deref(),
            Some("internal error: backend exploded")
        );
    }

    #[tokio::test]
    async fn test_empty_run_is_all_fixed() {
        let aggregate = engine().run(Vec::new()).await;
        assert_eq!(aggregate.total_issues, 0);
        assert!(aggregate.all_fixed());
        assert!(Uuid::parse_str(&aggregate.run_id).is_ok());
    }

    #[test]
    fn test_panic_detail_payloads() {
        assert_eq!(panic_detail(&"static"), "static");
        assert_eq!(panic_detail(&"owned".to_string()), "owned");
        assert_eq!(panic_detail(&42_u8), "unknown panic payload");
    }
}
