//! Report normalization
//!
//! Turns loosely-shaped report items into deduplicated [`Issue`]s. Items are
//! processed on a bounded pool of tokio tasks because a missing explanation
//! means a network round trip per item. Workers share nothing: each one sends
//! its result back over a channel, tagged with the item's position so the
//! output does not depend on completion order.

use crate::config::NormalizeSettings;
use crate::error::NormalizeError;
use crate::explain::Explainer;
use crate::issue::{detect_language, Issue};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

const DEFAULT_SLUG: &str = "UnknownSlug";
const DEFAULT_DESCRIPTION: &str = "No description";
const DEFAULT_CONSTRAINTS: &str = "No constraints";
const DEFAULT_BUG_TYPE: &str = "General";

/// One report container as handed to the normalizer.
#[derive(Debug, Clone)]
pub enum RawReport {
    /// Already-parsed JSON (array of items, or an object of items)
    Parsed(Value),
    /// Raw text that still needs to be parsed as JSON
    Text(String),
}

/// A report item with every field optional and loosely typed.
#[derive(Debug, Default, Deserialize)]
struct RawItem {
    slug: Option<Value>,
    description: Option<Value>,
    constraints: Option<Value>,
    buggy_code: Option<Value>,
    lang: Option<Value>,
    language: Option<Value>,
    #[serde(rename = "type")]
    kind: Option<Value>,
    bug_type: Option<Value>,
    explanations: Option<Value>,
    bug_message: Option<Value>,
}

/// Coerce a scalar JSON value to text. Only a missing key or null is absent;
/// an explicit empty string is kept.
fn scalar(value: Option<&Value>) -> Option<String> {
    Some(match value? {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    })
}

/// Like [`scalar`], but empty strings count as absent too.
fn text(value: Option<&Value>) -> Option<String> {
    scalar(value).filter(|s| !s.is_empty())
}

/// Like [`text`], but lists are joined with `sep`.
fn joined(value: Option<&Value>, sep: &str) -> Option<String> {
    match value? {
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(|v| text(Some(v))).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(sep))
            }
        }
        other => text(Some(other)),
    }
}

fn first_present(a: Option<&Value>, b: Option<&Value>, sep: &str) -> Option<String> {
    joined(a, sep).or_else(|| joined(b, sep))
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Items contained in one parsed report, or `None` for an unusable shape.
fn report_items(report: Value) -> Option<Vec<Value>> {
    match report {
        Value::Array(items) => Some(items),
        Value::Object(map) if !map.is_empty() && map.values().all(Value::is_object) => {
            Some(map.into_iter().map(|(_, v)| v).collect())
        }
        _ => None,
    }
}

pub struct Normalizer {
    explainer: Arc<dyn Explainer>,
    workers: usize,
    classifier_prefix: usize,
}

impl Normalizer {
    pub fn new(explainer: Arc<dyn Explainer>, settings: &NormalizeSettings) -> Self {
        Self {
            explainer,
            workers: settings.workers.max(1),
            classifier_prefix: settings.classifier_prefix_chars,
        }
    }

    /// Normalize every item of every report into a slug-sorted list of unique issues.
    ///
    /// Unparsable reports and malformed items are skipped with a warning.
    /// Duplicates (same identity key) keep the first occurrence in input order.
    pub async fn normalize(&self, reports: Vec<RawReport>) -> Vec<Issue> {
        let total_reports = reports.len();
        let mut items = Vec::new();

        for (index, report) in reports.into_iter().enumerate() {
            let parsed = match report {
                RawReport::Parsed(value) => value,
                RawReport::Text(raw) => match serde_json::from_str::<Value>(&raw) {
                    Ok(value) => value,
                    Err(err) => {
                        warn!(report = index + 1, error = %err, "skipping unparsable report");
                        continue;
                    }
                },
            };
            let shape = kind_name(&parsed);
            match report_items(parsed) {
                Some(found) => {
                    debug!(report = index + 1, items = found.len(), "report parsed");
                    items.extend(found);
                }
                None => warn!(
                    report = index + 1,
                    shape, "skipping report without a list of issue items"
                ),
            }
        }

        let collected = self.fan_out(items).await;
        let issues = dedup_sorted(collected);
        info!(
            reports = total_reports,
            issues = issues.len(),
            "normalization complete"
        );
        issues
    }

    /// Process items concurrently on at most `workers` tasks.
    ///
    /// Returns issues in input order; failed items are dropped.
    async fn fan_out(&self, items: Vec<Value>) -> Vec<Issue> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, Issue)>();
        let mut handles = Vec::with_capacity(items.len());

        for (position, item) in items.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let explainer = self.explainer.clone();
            let tx = tx.clone();
            let prefix = self.classifier_prefix;

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                match normalize_item(item, explainer.as_ref(), prefix).await {
                    Ok(issue) => {
                        let _ = tx.send((position, issue));
                    }
                    Err(err) => warn!(item = position, error = %err, "skipping report item"),
                }
            }));
        }
        drop(tx);

        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "report item worker aborted");
            }
        }

        let mut results = Vec::new();
        while let Some(entry) = rx.recv().await {
            results.push(entry);
        }
        results.sort_by_key(|(position, _)| *position);
        results.into_iter().map(|(_, issue)| issue).collect()
    }
}

/// Set semantics over the identity key (first wins), then a stable sort by slug.
fn dedup_sorted(issues: Vec<Issue>) -> Vec<Issue> {
    let mut seen = HashSet::with_capacity(issues.len());
    let mut unique: Vec<Issue> = issues
        .into_iter()
        .filter(|issue| seen.insert(issue.clone()))
        .collect();
    unique.sort_by(|a, b| a.slug.cmp(&b.slug));
    unique
}

/// Build one issue from one raw item.
async fn normalize_item(
    item: Value,
    explainer: &dyn Explainer,
    classifier_prefix: usize,
) -> Result<Issue, NormalizeError> {
    if !item.is_object() {
        return Err(NormalizeError::NotAnObject(kind_name(&item)));
    }
    let raw: RawItem = serde_json::from_value(item)?;

    let slug = scalar(raw.slug.as_ref()).unwrap_or_else(|| DEFAULT_SLUG.to_string());
    let description =
        scalar(raw.description.as_ref()).unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string());
    let constraints =
        scalar(raw.constraints.as_ref()).unwrap_or_else(|| DEFAULT_CONSTRAINTS.to_string());
    let buggy_code = scalar(raw.buggy_code.as_ref()).unwrap_or_default();

    let language = match text(raw.lang.as_ref()).or_else(|| text(raw.language.as_ref())) {
        Some(label) if !label.trim().eq_ignore_ascii_case("unknown") => label,
        _ => {
            let detected = detect_language(&buggy_code, classifier_prefix);
            debug!(slug = %slug, language = %detected, "language detected from content");
            detected.as_str().to_string()
        }
    };

    let bug_type = first_present(raw.kind.as_ref(), raw.bug_type.as_ref(), ", ")
        .unwrap_or_else(|| DEFAULT_BUG_TYPE.to_string());

    let bug_message = match first_present(raw.explanations.as_ref(), raw.bug_message.as_ref(), " ")
    {
        Some(message) => message,
        None => {
            explainer
                .explain(&slug, &description, &constraints, &buggy_code)
                .await
        }
    };

    Ok(Issue {
        language,
        slug,
        description,
        constraints,
        buggy_code,
        bug_type,
        bug_message,
        fixed_code: String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::Language;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Explainer that sleeps a per-slug delay so completion order differs from input order.
    struct SlowExplainer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Explainer for SlowExplainer {
        async fn explain(&self, slug: &str, _: &str, _: &str, _: &str) -> String {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = match slug.as_bytes().first() {
                Some(b'a') => 300,
                Some(b'b') => 200,
                Some(b'c') => 100,
                _ => 0,
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            format!("explained {slug}")
        }
    }

    fn normalizer(workers: usize) -> (Arc<SlowExplainer>, Normalizer) {
        let explainer = Arc::new(SlowExplainer {
            calls: AtomicUsize::new(0),
        });
        let settings = NormalizeSettings {
            workers,
            ..NormalizeSettings::default()
        };
        (explainer.clone(), Normalizer::new(explainer, &settings))
    }

    fn slugs(issues: &[Issue]) -> Vec<&str> {
        issues.iter().map(|i| i.slug.as_str()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_sorted_by_slug_regardless_of_completion() {
        let (_, normalizer) = normalizer(4);
        let report = json!([
            {"slug": "d-last", "buggy_code": "x = 1"},
            {"slug": "a-first", "buggy_code": "x = 2"},
            {"slug": "c-third", "buggy_code": "x = 3"},
            {"slug": "b-second", "buggy_code": "x = 4"},
        ]);
        let issues = normalizer.normalize(vec![RawReport::Parsed(report)]).await;
        assert_eq!(slugs(&issues), vec!["a-first", "b-second", "c-third", "d-last"]);
        assert_eq!(issues[0].bug_message, "explained a-first");
    }

    #[tokio::test(start_paused = true)]
    async fn test_normalize_is_idempotent_and_dedups() {
        let (_, normalizer) = normalizer(2);
        let raw = r#"[
            {"slug": "two-sum", "language": "python", "buggy_code": "def f(): pass",
             "bug_type": ["A", "B"], "bug_message": "bad"},
            {"slug": "two-sum", "language": "python", "buggy_code": "def f(): pass",
             "bug_type": ["A", "B"], "bug_message": "bad", "fixed_code": "def f(): return 1"},
            {"slug": "abc", "language": "java", "buggy_code": "class A {}",
             "type": "Logic", "explanations": "off by one"}
        ]"#;

        let first = normalizer
            .normalize(vec![RawReport::Text(raw.to_string())])
            .await;
        let second = normalizer
            .normalize(vec![RawReport::Text(raw.to_string())])
            .await;

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert_eq!(slugs(&first), slugs(&second));
        assert_eq!(first[1].bug_type, "A, B");
        assert!(first[1].fixed_code.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicates_across_reports_collapse() {
        let (_, normalizer) = normalizer(3);
        let item = json!({"slug": "s", "language": "cpp", "buggy_code": "int x;", "bug_message": "m"});
        let issues = normalizer
            .normalize(vec![
                RawReport::Parsed(json!([item.clone()])),
                RawReport::Parsed(json!([item])),
            ])
            .await;
        assert_eq!(issues.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_defaults_and_explanation_backfill() {
        let (explainer, normalizer) = normalizer(2);
        let issues = normalizer
            .normalize(vec![RawReport::Parsed(json!([{"buggy_code": "#include <vector>\nusing namespace std;"}]))])
            .await;

        assert_eq!(issues.len(), 1);
        let issue = &issues[0];
        assert_eq!(issue.slug, DEFAULT_SLUG);
        assert_eq!(issue.description, DEFAULT_DESCRIPTION);
        assert_eq!(issue.constraints, DEFAULT_CONSTRAINTS);
        assert_eq!(issue.bug_type, DEFAULT_BUG_TYPE);
        assert_eq!(issue.language, "cpp");
        assert_eq!(issue.language_variant(), Language::Cpp);
        assert_eq!(issue.bug_message, "explained UnknownSlug");
        assert_eq!(explainer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_unknown_language_is_detected() {
        let (explainer, normalizer) = normalizer(1);
        let issues = normalizer
            .normalize(vec![RawReport::Parsed(json!([{
                "slug": "s",
                "lang": "Unknown",
                "buggy_code": "public class Main { }",
                "bug_message": "m"
            }]))])
            .await;
        assert_eq!(issues[0].language, "java");
        assert_eq!(explainer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_reports_and_items_are_skipped() {
        let (_, normalizer) = normalizer(2);
        let issues = normalizer
            .normalize(vec![
                RawReport::Text("{not json".to_string()),
                RawReport::Parsed(json!("just a string")),
                RawReport::Parsed(json!([42, null, "text", {"slug": "ok", "bug_message": "m"}])),
            ])
            .await;
        assert_eq!(slugs(&issues), vec!["ok"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mapping_of_mappings_report() {
        let (_, normalizer) = normalizer(2);
        let issues = normalizer
            .normalize(vec![RawReport::Parsed(json!({
                "first": {"slug": "z", "bug_message": "m"},
                "second": {"slug": "y", "bug_message": "m"}
            }))])
            .await;
        assert_eq!(slugs(&issues), vec!["y", "z"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_empty_strings_are_kept() {
        let (_, normalizer) = normalizer(1);
        let issues = normalizer
            .normalize(vec![RawReport::Parsed(json!([{
                "slug": "",
                "description": "",
                "constraints": null,
                "language": "python",
                "buggy_code": "x = 1",
                "bug_message": "m"
            }]))])
            .await;

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].slug, "");
        assert_eq!(issues[0].description, "");
        assert_eq!(issues[0].constraints, DEFAULT_CONSTRAINTS);
    }

    /// Tracks how many explanations run at once.
    struct PeakExplainer {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Explainer for PeakExplainer {
        async fn explain(&self, slug: &str, _: &str, _: &str, _: &str) -> String {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            format!("explained {slug}")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_limit_bounds_concurrent_explanations() {
        let explainer = Arc::new(PeakExplainer {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let settings = NormalizeSettings {
            workers: 2,
            ..NormalizeSettings::default()
        };
        let normalizer = Normalizer::new(explainer.clone(), &settings);

        let items: Vec<Value> = (0..8)
            .map(|n| json!({"slug": format!("item-{n}"), "language": "python", "buggy_code": "x = 1"}))
            .collect();
        let issues = normalizer
            .normalize(vec![RawReport::Parsed(Value::Array(items))])
            .await;

        assert_eq!(issues.len(), 8);
        assert_eq!(explainer.peak.load(Ordering::SeqCst), 2);
        assert_eq!(explainer.in_flight.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_scalar_coercion() {
        assert_eq!(scalar(Some(&json!(""))).as_deref(), Some(""));
        assert_eq!(scalar(Some(&json!(null))), None);
        assert_eq!(scalar(None), None);
        assert_eq!(text(Some(&json!(42))).as_deref(), Some("42"));
        assert_eq!(text(Some(&json!(""))), None);
        assert_eq!(text(Some(&json!(null))), None);
        assert_eq!(joined(Some(&json!(["x", "y"])), ", ").as_deref(), Some("x, y"));
        assert_eq!(joined(Some(&json!([])), ", "), None);
    }
}
