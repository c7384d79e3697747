//! Canonical issue record and language classification
//!
//! An [`Issue`] is one reported code defect after normalization. Its identity
//! covers everything the report said about the defect; the repair produced
//! later (`fixed_code`) never takes part in equality or hashing, because
//! deduplication runs before any repair exists.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

/// Number of leading characters the content classifier looks at.
pub const DEFAULT_CLASSIFIER_PREFIX: usize = 500;

/// Closed set of languages the pipeline knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Cpp,
    Java,
    JavaScript,
    Unknown,
}

impl Language {
    /// Normalize a free-text language label ("C++", "python3", "js", ...).
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" | "python2" | "py" => Language::Python,
            "cpp" | "c++" | "c" | "cc" | "cxx" | "hpp" => Language::Cpp,
            "java" => Language::Java,
            "javascript" | "js" | "typescript" | "ts" | "node" | "nodejs" => Language::JavaScript,
            _ => Language::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::JavaScript => "javascript",
            Language::Unknown => "unknown",
        }
    }

    /// Info string used for fenced code blocks in rendered reports.
    pub fn fence_tag(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Cpp => "c++",
            Language::Java => "java",
            Language::JavaScript => "javascript",
            Language::Unknown => "",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized, deduplicated record of one reported code defect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Issue {
    /// Language label as reported (or as detected when the report had none)
    pub language: String,
    pub slug: String,
    pub description: String,
    pub constraints: String,
    pub buggy_code: String,
    /// Free-form classification, possibly a comma-joined list
    pub bug_type: String,
    /// Natural-language explanation of the defect
    pub bug_message: String,
    /// Empty until a repair attempt produced a patch
    #[serde(default)]
    pub fixed_code: String,
}

/// The fields that make two issues the same logical issue.
pub type IdentityKey<'a> = (&'a str, &'a str, &'a str, &'a str, &'a str, &'a str, &'a str);

impl Issue {
    pub fn identity_key(&self) -> IdentityKey<'_> {
        (
            &self.language,
            &self.slug,
            &self.description,
            &self.constraints,
            &self.buggy_code,
            &self.bug_type,
            &self.bug_message,
        )
    }

    pub fn language_variant(&self) -> Language {
        Language::from_label(&self.language)
    }
}

impl PartialEq for Issue {
    fn eq(&self, other: &Self) -> bool {
        self.identity_key() == other.identity_key()
    }
}

impl Eq for Issue {}

impl Hash for Issue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity_key().hash(state);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  CONTENT CLASSIFIER
// ═══════════════════════════════════════════════════════════════════════════

struct ClassifierPatterns {
    python_solution_class: Regex,
    python_method: Regex,
    java_public_class: Regex,
    java_method_signature: Regex,
}

fn patterns() -> &'static ClassifierPatterns {
    static PATTERNS: OnceLock<ClassifierPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| ClassifierPatterns {
        python_solution_class: Regex::new(r"class\s+Solution.*:").expect("valid regex"),
        python_method: Regex::new(r"def\s+\w+\s*\(.*self").expect("valid regex"),
        java_public_class: Regex::new(r"public\s+class\s+\w+").expect("valid regex"),
        java_method_signature: Regex::new(r"public\s+\w+\s+\w+\s*\(").expect("valid regex"),
    })
}

/// Guess the language of a snippet from its first `prefix_chars` characters.
///
/// Best effort: rules are tried in priority order (python, cpp, java, then a
/// loose python fallback) and the first match wins. Never fails.
pub fn detect_language(code: &str, prefix_chars: usize) -> Language {
    if code.trim().is_empty() {
        return Language::Unknown;
    }

    let header: String = code.chars().take(prefix_chars).collect();
    let header = header.as_str();
    let p = patterns();

    // Python: signatures that take `self`, or semicolon-free import style
    if p.python_solution_class.is_match(header) || p.python_method.is_match(header) {
        return Language::Python;
    }
    if header.contains("import ") && header.contains("from ") && !header.contains(';') {
        return Language::Python;
    }

    // C++
    if header.contains("#include") || header.contains("using namespace std") {
        return Language::Cpp;
    }
    if header.contains("public:") {
        return Language::Cpp;
    }
    if header.contains("vector<") || (header.contains("string") && code.contains("->")) {
        return Language::Cpp;
    }

    // Java
    if p.java_public_class.is_match(header) {
        return Language::Java;
    }
    if p.java_method_signature.is_match(header) && !header.contains("public:") {
        return Language::Java;
    }
    if header.contains("System.out.") {
        return Language::Java;
    }

    // Indentation-and-colon shape without braces or semicolons
    if header.contains(':') && !header.contains('{') && !header.contains(';') {
        return Language::Python;
    }

    Language::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn sample() -> Issue {
        Issue {
            language: "python".to_string(),
            slug: "two-sum".to_string(),
            description: "find two numbers".to_string(),
            constraints: "n <= 10^4".to_string(),
            buggy_code: "def f():\n    return 1".to_string(),
            bug_type: "MisusedOperator".to_string(),
            bug_message: "wrong operator".to_string(),
            fixed_code: String::new(),
        }
    }

    #[test]
    fn test_fixed_code_excluded_from_identity() {
        let a = sample();
        let mut b = sample();
        b.fixed_code = "def f():\n    return 2".to_string();
        assert_eq!(a, b);

        let set: HashSet<Issue> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_identity_fields_distinguish_issues() {
        let a = sample();
        let mut b = sample();
        b.bug_message = "another explanation".to_string();
        assert_ne!(a, b);
    }

    #[test]
    fn test_language_labels_normalize() {
        assert_eq!(Language::from_label("C++"), Language::Cpp);
        assert_eq!(Language::from_label("c"), Language::Cpp);
        assert_eq!(Language::from_label(" cpp "), Language::Cpp);
        assert_eq!(Language::from_label("Python3"), Language::Python);
        assert_eq!(Language::from_label("Java"), Language::Java);
        assert_eq!(Language::from_label("javascript"), Language::JavaScript);
        assert_eq!(Language::from_label("Unknown"), Language::Unknown);
        assert_eq!(Language::from_label("rust"), Language::Unknown);
    }

    #[test]
    fn test_detects_cpp_from_include() {
        let code = "#include <vector>\nusing namespace std;\nint main() { return 0; }";
        assert_eq!(detect_language(code, DEFAULT_CLASSIFIER_PREFIX), Language::Cpp);
    }

    #[test]
    fn test_detects_python_method_with_self() {
        let code = "class Solution:\n    def twoSum(self, nums, target):\n        pass";
        assert_eq!(detect_language(code, DEFAULT_CLASSIFIER_PREFIX), Language::Python);
    }

    #[test]
    fn test_detects_java_class() {
        let code = "public class Main {\n  public static void main(String[] a) {}\n}";
        assert_eq!(detect_language(code, DEFAULT_CLASSIFIER_PREFIX), Language::Java);

        let code = "class Solution {\n  public int climb(int n) { return n; }\n}";
        assert_eq!(detect_language(code, DEFAULT_CLASSIFIER_PREFIX), Language::Java);
    }

    #[test]
    fn test_cpp_access_specifier_beats_java_signature() {
        let code = "class Solution {\npublic:\n    int climbStairs(int n) { return n; }\n};";
        assert_eq!(detect_language(code, DEFAULT_CLASSIFIER_PREFIX), Language::Cpp);
    }

    #[test]
    fn test_colon_fallback_and_unknown() {
        assert_eq!(
            detect_language("for x in xs:\n    total += x", DEFAULT_CLASSIFIER_PREFIX),
            Language::Python
        );
        assert_eq!(detect_language("x = 1 + 2", DEFAULT_CLASSIFIER_PREFIX), Language::Unknown);
        assert_eq!(detect_language("", DEFAULT_CLASSIFIER_PREFIX), Language::Unknown);
    }

    #[test]
    fn test_prefix_limits_what_is_inspected() {
        let mut code = "x = 1\n".repeat(200);
        code.push_str("#include <vector>\n");
        assert_eq!(detect_language(&code, 20), Language::Unknown);
        assert_eq!(detect_language(&code, usize::MAX), Language::Cpp);
    }
}
