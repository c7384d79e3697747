//! Run report rendering (JSON + Markdown)

use crate::engine::{Aggregate, Outcome, Status};
use crate::issue::Language;
use crate::util::truncate;
use crate::validate::Verdict;
use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub const JSON_REPORT_FILE: &str = "bug_fix_report.json";
pub const MARKDOWN_REPORT_FILE: &str = "bug_fix_report.md";

const DESCRIPTION_PREVIEW_CHARS: usize = 100;

#[derive(Serialize)]
struct ReportDocument<'a> {
    summary: Summary<'a>,
    items: Vec<ReportItem<'a>>,
}

#[derive(Serialize)]
struct Summary<'a> {
    run_id: &'a str,
    total_issues: usize,
    total_fixed: usize,
    total_failed: usize,
    timestamp: &'a str,
    max_iterations: u32,
}

#[derive(Serialize)]
struct ReportItem<'a> {
    slug: &'a str,
    language: &'a str,
    bug_type: &'a str,
    bug_message: &'a str,
    description: &'a str,
    constraints: &'a str,
    buggy_code: &'a str,
    fixed_code: &'a str,
    status: Status,
    detail: Detail<'a>,
}

#[derive(Serialize)]
struct Detail<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    verdict: Option<&'a Verdict>,
}

impl<'a> From<&'a Outcome> for ReportItem<'a> {
    fn from(outcome: &'a Outcome) -> Self {
        let issue = &outcome.issue;
        Self {
            slug: &issue.slug,
            language: &issue.language,
            bug_type: &issue.bug_type,
            bug_message: &issue.bug_message,
            description: &issue.description,
            constraints: &issue.constraints,
            buggy_code: &issue.buggy_code,
            fixed_code: &issue.fixed_code,
            status: outcome.status,
            detail: Detail {
                reason: outcome.reason.as_deref(),
                verdict: outcome.verdict.as_ref(),
            },
        }
    }
}

/// Pretty-printed JSON report.
pub fn render_json(aggregate: &Aggregate) -> Result<String> {
    let doc = ReportDocument {
        summary: Summary {
            run_id: &aggregate.run_id,
            total_issues: aggregate.total_issues,
            total_fixed: aggregate.total_fixed,
            total_failed: aggregate.total_failed,
            timestamp: &aggregate.timestamp,
            max_iterations: aggregate.max_iterations,
        },
        items: aggregate.outcomes.iter().map(ReportItem::from).collect(),
    };
    serde_json::to_string_pretty(&doc).context("Failed to serialize report")
}

fn status_text(outcome: &Outcome) -> &'static str {
    match outcome.status {
        Status::Fixed => "✅ Fixed and verified",
        Status::Failed if outcome.issue.fixed_code.is_empty() => "⚠️ Repair not generated",
        Status::Failed => "❌ Validation failed",
    }
}

fn code_block(out: &mut String, tag: &str, code: &str) {
    let _ = writeln!(out, "```{}\n{}\n```", tag, code.trim());
}

/// Human-readable Markdown report.
pub fn render_markdown(aggregate: &Aggregate) -> String {
    let mut out = String::new();
    out.push_str("# Bug Repair Report\n\n## Summary\n");
    let _ = writeln!(out, "- **Issues found:** {}", aggregate.total_issues);
    let _ = writeln!(out, "- **Fixed:** {}", aggregate.total_fixed);
    let _ = writeln!(out, "- **Failed / not fixed:** {}", aggregate.total_failed);
    let _ = writeln!(out, "- **Attempts per issue:** 1 (ceiling {})", aggregate.max_iterations);
    let _ = writeln!(out, "- **Generated at:** {}", aggregate.timestamp);
    out.push_str("\n## Details\n");

    for (idx, outcome) in aggregate.outcomes.iter().enumerate() {
        let issue = &outcome.issue;
        let status = status_text(outcome);
        let tag = Language::from_label(&issue.language).fence_tag();

        let _ = writeln!(out, "\n### {}. [{}] {} ({})", idx + 1, status, issue.slug, issue.language);
        let _ = writeln!(out, "- **Bug:** {}", issue.bug_message);
        let _ = writeln!(
            out,
            "- **Problem:** {}",
            truncate(&issue.description, DESCRIPTION_PREVIEW_CHARS)
        );

        out.push_str("\n#### Buggy code\n");
        code_block(&mut out, tag, &issue.buggy_code);

        match outcome.status {
            Status::Fixed => {
                out.push_str("\n#### Fixed code (verified)\n");
                code_block(&mut out, tag, &issue.fixed_code);
            }
            Status::Failed if !issue.fixed_code.is_empty() => {
                out.push_str("\n#### Attempted fix (rejected)\n");
                code_block(&mut out, tag, &issue.fixed_code);
            }
            Status::Failed => {}
        }

        let _ = writeln!(out, "\n- **Final status:** **{}**", status);
        if let Some(reason) = &outcome.reason {
            let _ = writeln!(out, "- **Failure reason:** {}", reason);
        }
        if let Some(verdict) = &outcome.verdict {
            if !verdict.message.is_empty() {
                let _ = writeln!(out, "- **Validator:** {}", verdict.message);
            }
        }
    }
    out
}

/// `<reports_dir>/report_YYYYmmdd_HHMMSS`
pub fn timestamped_dir(reports_dir: &Path) -> PathBuf {
    reports_dir.join(format!("report_{}", Local::now().format("%Y%m%d_%H%M%S")))
}

fn write_one(path: &Path, content: Result<String>) -> Result<()> {
    let content = content?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

/// Write both reports into `dir` and return a plain-text summary.
///
/// Write failures end up in the summary text; they are never raised.
pub fn write(aggregate: &Aggregate, dir: &Path) -> String {
    let mut lines = vec![
        "Repair summary".to_string(),
        format!("Fixed: {}", aggregate.total_fixed),
        format!("Failed: {}", aggregate.total_failed),
    ];

    if let Err(err) = std::fs::create_dir_all(dir) {
        error!(dir = %dir.display(), error = %err, "could not create report directory");
        lines.push(format!("Report directory could not be created ({}): {}", dir.display(), err));
        return lines.join("\n");
    }

    let targets = [
        ("JSON", dir.join(JSON_REPORT_FILE), render_json(aggregate)),
        ("Markdown", dir.join(MARKDOWN_REPORT_FILE), Ok(render_markdown(aggregate))),
    ];
    for (label, path, content) in targets {
        match write_one(&path, content) {
            Ok(()) => {
                info!(path = %path.display(), "{} report written", label);
                lines.push(format!("{} report saved to: {}", label, path.display()));
            }
            Err(err) => {
                error!(path = %path.display(), error = %format!("{:#}", err), "report write failed");
                lines.push(format!("{} report failed to save: {:#}", label, err));
            }
        }
    }
    lines.join("\n")
}
