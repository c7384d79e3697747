//! Validation dispatcher
//!
//! Routes a patched snippet to the checker for its language variant. Checks
//! are syntax/compile level only; nothing here runs a test suite. Branches
//! that need a local toolchain pass optimistically when it is missing, and
//! say so in the verdict so that such passes are never mistaken for verified
//! ones.

mod compiled;
mod python;

use crate::config::ValidateSettings;
use crate::issue::{Issue, Language};
use crate::util::truncate;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

/// Longest diagnostic kept on a verdict
const MAX_DIAGNOSTIC_CHARS: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictKind {
    /// The language checker ran and accepted the patch
    Verified,
    /// No checker exists for this language
    Unverifiable,
    /// The checker needs a tool that is not installed
    ToolchainMissing,
    /// The checker ran and rejected the patch
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub kind: VerdictKind,
    pub message: String,
}

impl Verdict {
    pub fn verified(message: impl Into<String>) -> Self {
        Self::new(VerdictKind::Verified, message)
    }

    pub fn unverifiable(message: impl Into<String>) -> Self {
        Self::new(VerdictKind::Unverifiable, message)
    }

    pub fn toolchain_missing(tool: &str) -> Self {
        Self::new(
            VerdictKind::ToolchainMissing,
            format!("{} not found; verification skipped", tool),
        )
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(VerdictKind::Rejected, message)
    }

    fn new(kind: VerdictKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: truncate(message.into().trim(), MAX_DIAGNOSTIC_CHARS),
        }
    }

    pub fn passed(&self) -> bool {
        self.kind != VerdictKind::Rejected
    }
}

/// Stateless per-issue validator.
#[derive(Debug, Clone)]
pub struct Validator {
    settings: ValidateSettings,
}

impl Validator {
    pub fn new(settings: ValidateSettings) -> Self {
        Self { settings }
    }

    fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.tool_timeout_secs.max(1))
    }

    /// Check `issue.fixed_code`. Blocking: may spawn compilers or an interpreter.
    pub fn validate(&self, issue: &Issue) -> Verdict {
        if issue.fixed_code.trim().is_empty() {
            warn!(slug = %issue.slug, "nothing to validate: empty patch");
            return Verdict::rejected("no patched code to validate");
        }

        let code = issue.fixed_code.as_str();
        let verdict = match issue.language_variant() {
            Language::Python => python::check(code, &self.settings, self.tool_timeout()),
            Language::Cpp => compiled::check_cpp(code, &self.settings, self.tool_timeout()),
            Language::Java => compiled::check_java(code, &self.settings, self.tool_timeout()),
            other @ (Language::JavaScript | Language::Unknown) => {
                Verdict::unverifiable(format!("no verifier for language '{}'", other))
            }
        };

        match verdict.kind {
            VerdictKind::Verified => {
                info!(slug = %issue.slug, language = %issue.language, "validation passed")
            }
            VerdictKind::Unverifiable => {
                info!(slug = %issue.slug, language = %issue.language, "validation skipped: unsupported language")
            }
            VerdictKind::ToolchainMissing => warn!(
                slug = %issue.slug,
                detail = %verdict.message,
                "validation skipped: toolchain missing, passing by default"
            ),
            VerdictKind::Rejected => warn!(
                slug = %issue.slug,
                detail = %verdict.message,
                "validation failed"
            ),
        }
        verdict
    }
}
