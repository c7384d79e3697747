use crate::config::ScannerSettings;
use crate::issue::Language;
use crate::util::{program_available_on_path, run_command_with_timeout, truncate};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Deserialize)]
struct ScanOutput {
    #[serde(default)]
    results: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct Finding {
    #[serde(default = "default_check_id")]
    check_id: String,
    #[serde(default)]
    path: String,
    start: Position,
    end: Position,
    extra: Extra,
}

#[derive(Debug, Deserialize)]
struct Position {
    line: usize,
}

#[derive(Debug, Deserialize)]
struct Extra {
    message: String,
    #[serde(default = "default_severity")]
    severity: String,
}

fn default_check_id() -> String {
    "semgrep-rule".to_string()
}

fn default_severity() -> String {
    "WARNING".to_string()
}

/// Language label for a scanned file, from its extension.
pub fn infer_language(path: &Path) -> Language {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "py" => Language::Python,
        "java" => Language::Java,
        "cpp" | "c" | "h" | "hpp" => Language::Cpp,
        "js" | "ts" => Language::JavaScript,
        _ => Language::Unknown,
    }
}

pub struct SemgrepScanner {
    binary: String,
    rules: String,
    timeout: Duration,
    context_lines: usize,
}

impl SemgrepScanner {
    pub fn from_settings(settings: &ScannerSettings) -> Self {
        Self {
            binary: settings.semgrep_binary.clone(),
            rules: settings.rules.clone(),
            timeout: Duration::from_secs(settings.timeout_secs.max(1)),
            context_lines: settings.context_lines,
        }
    }

    /// Scan `dir` and return one report item per finding.
    ///
    /// Any scanner failure is logged and yields no findings.
    pub fn scan(&self, dir: &Path) -> Vec<Value> {
        if !program_available_on_path(&self.binary) {
            error!(binary = %self.binary, "semgrep not found; install it with `pip install semgrep`");
            return Vec::new();
        }

        info!(dir = %dir.display(), rules = %self.rules, "running semgrep");
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--config").arg(&self.rules).arg("--json").arg(dir);

        let output = match run_command_with_timeout(&mut cmd, self.timeout) {
            Ok(output) => output,
            Err(err) => {
                error!(error = %err, "semgrep failed to start");
                return Vec::new();
            }
        };
        if output.timed_out {
            error!(timeout_secs = self.timeout.as_secs(), "semgrep timed out");
            return Vec::new();
        }
        // Exit 1 just means findings; only an empty stdout is a real failure
        if output.stdout.trim().is_empty() {
            error!(
                exit_code = ?output.exit_code(),
                stderr = %truncate(output.stderr.trim(), 500),
                "semgrep produced no output"
            );
            return Vec::new();
        }

        let parsed: ScanOutput = match serde_json::from_str(&output.stdout) {
            Ok(parsed) => parsed,
            Err(err) => {
                error!(error = %err, "semgrep output is not valid JSON");
                return Vec::new();
            }
        };
        info!(findings = parsed.results.len(), "semgrep scan finished");
        self.to_items(parsed.results, dir)
    }

    fn to_items(&self, results: Vec<Value>, root: &Path) -> Vec<Value> {
        results
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<Finding>(raw) {
                Ok(finding) => Some(self.to_item(finding, root)),
                Err(err) => {
                    warn!(error = %err, "skipping malformed semgrep result");
                    None
                }
            })
            .collect()
    }

    fn to_item(&self, finding: Finding, root: &Path) -> Value {
        let rel = PathBuf::from(&finding.path);
        let file_name = rel
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| finding.path.clone());
        let snippet = read_segment(
            &root.join(&rel),
            finding.start.line,
            finding.end.line,
            self.context_lines,
        );

        json!({
            "slug": format!("{}:{}", file_name, finding.start.line),
            "description": format!("Semgrep Audit: {}", finding.extra.message),
            "constraints": format!("Security/Best-practice rule: {}", finding.check_id),
            "buggy_code": snippet,
            "language": infer_language(&rel).as_str(),
            "bug_type": format!("{} - {}", finding.extra.severity, finding.check_id),
            "bug_message": finding.extra.message,
        })
    }
}

/// Lines `start..=end` (1-based) plus `context` lines either side.
/// Unreadable files give an empty snippet.
fn read_segment(path: &Path, start: usize, end: usize, context: usize) -> String {
    let Ok(bytes) = std::fs::read(path) else {
        return String::new();
    };
    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = text.split_inclusive('\n').collect();

    let from = start.saturating_sub(1).saturating_sub(context);
    let to = end.saturating_add(context).min(lines.len());
    if from >= to {
        return String::new();
    }
    lines[from..to].concat()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner() -> SemgrepScanner {
        SemgrepScanner::from_settings(&ScannerSettings::default())
    }

    #[test]
    fn test_language_from_extension() {
        assert_eq!(infer_language(Path::new("a/b.py")), Language::Python);
        assert_eq!(infer_language(Path::new("Main.JAVA")), Language::Java);
        assert_eq!(infer_language(Path::new("x.hpp")), Language::Cpp);
        assert_eq!(infer_language(Path::new("x.c")), Language::Cpp);
        assert_eq!(infer_language(Path::new("app.ts")), Language::JavaScript);
        assert_eq!(infer_language(Path::new("Makefile")), Language::Unknown);
    }

    #[test]
    fn test_segment_includes_context_and_clamps() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("f.py");
        std::fs::write(&file, "l1\nl2\nl3\nl4\nl5\nl6\nl7\n").unwrap();

        assert_eq!(read_segment(&file, 4, 4, 2), "l2\nl3\nl4\nl5\nl6\n");
        assert_eq!(read_segment(&file, 1, 2, 2), "l1\nl2\nl3\nl4\n");
        assert_eq!(read_segment(&file, 7, 7, 2), "l5\nl6\nl7\n");
        assert_eq!(read_segment(&tmp.path().join("gone.py"), 1, 1, 2), "");
    }

    #[test]
    fn test_findings_become_report_items() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("app.py"), "import os\nos.system(cmd)\nprint(1)\n").unwrap();

        let results = vec![
            serde_json::json!({
                "check_id": "python.lang.security.dangerous-system-call",
                "path": "app.py",
                "start": {"line": 2, "col": 1},
                "end": {"line": 2, "col": 15},
                "extra": {"message": "Found dynamic content in os.system", "severity": "ERROR"}
            }),
            serde_json::json!({"check_id": "broken", "path": "app.py"}),
        ];

        let items = scanner().to_items(results, tmp.path());
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item["slug"], "app.py:2");
        assert_eq!(item["description"], "Semgrep Audit: Found dynamic content in os.system");
        assert_eq!(
            item["constraints"],
            "Security/Best-practice rule: python.lang.security.dangerous-system-call"
        );
        assert_eq!(item["language"], "python");
        assert_eq!(
            item["bug_type"],
            "ERROR - python.lang.security.dangerous-system-call"
        );
        assert_eq!(item["buggy_code"], "import os\nos.system(cmd)\nprint(1)\n");
    }

    #[test]
    fn test_severity_defaults_to_warning() {
        let results = vec![serde_json::json!({
            "path": "Main.java",
            "start": {"line": 1},
            "end": {"line": 1},
            "extra": {"message": "m"}
        })];
        let items = scanner().to_items(results, Path::new("/nonexistent"));
        assert_eq!(items[0]["bug_type"], "WARNING - semgrep-rule");
        assert_eq!(items[0]["buggy_code"], "");
        assert_eq!(items[0]["language"], "java");
    }

    #[test]
    fn test_missing_binary_yields_nothing() {
        let scanner = SemgrepScanner::from_settings(&ScannerSettings {
            semgrep_binary: "no-such-semgrep-4821".to_string(),
            ..ScannerSettings::default()
        });
        assert!(scanner.scan(Path::new(".")).is_empty());
    }
}
