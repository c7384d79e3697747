//! Configuration management for mender
//!
//! Settings live in `<config dir>/mender/config.toml` (or a path given on the
//! command line). Every section is optional; missing values fall back to the
//! defaults below. The oracle API key is never read from the file: it comes
//! from the environment or the system keychain and is handed to the oracle
//! client explicitly.

use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// OpenAI-compatible chat completions endpoint used by default.
pub const DEFAULT_ORACLE_ENDPOINT: &str =
    "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions";

const API_KEY_ENV_VARS: &[&str] = &["MENDER_API_KEY", "DASHSCOPE_API_KEY"];
const KEYRING_SERVICE: &str = "mender";
const KEYRING_USERNAME: &str = "oracle_api_key";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub oracle: OracleSettings,
    pub retry: RetrySettings,
    pub normalize: NormalizeSettings,
    pub validate: ValidateSettings,
    pub scanner: ScannerSettings,
    pub run: RunSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleSettings {
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub repair_timeout_secs: u64,
    pub explain_timeout_secs: u64,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ORACLE_ENDPOINT.to_string(),
            model: "qwen-turbo".to_string(),
            temperature: 0.01,
            repair_timeout_secs: 60,
            explain_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Hard ceiling on attempts per oracle call (first attempt included)
    pub max_attempts: u32,
    /// Flat cooldown after a rate-limit status
    pub rate_limit_delay_ms: u64,
    /// Flat delay after a transport failure or timeout
    pub transport_delay_ms: u64,
    /// Statuses treated as rate limiting; every other non-success status aborts
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            rate_limit_delay_ms: 5_000,
            transport_delay_ms: 2_000,
            retryable_statuses: vec![429],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeSettings {
    /// Width of the per-item worker pool
    pub workers: usize,
    /// Characters of code the language classifier inspects
    pub classifier_prefix_chars: usize,
}

impl Default for NormalizeSettings {
    fn default() -> Self {
        Self {
            workers: 10,
            classifier_prefix_chars: crate::issue::DEFAULT_CLASSIFIER_PREFIX,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidateSettings {
    pub tool_timeout_secs: u64,
    /// Run the top-level definitions of python patches in an interpreter.
    /// When off, an interpreter found on PATH still compiles the patch.
    pub python_exec: bool,
    /// Interpreters tried in order for the compile check and `python_exec`
    pub python_interpreters: Vec<String>,
    pub cpp_compiler: String,
    pub cpp_standard: String,
    pub java_compiler: String,
}

impl Default for ValidateSettings {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            python_exec: true,
            python_interpreters: vec!["python3".to_string(), "python".to_string()],
            cpp_compiler: "g++".to_string(),
            cpp_standard: "c++17".to_string(),
            java_compiler: "javac".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerSettings {
    pub semgrep_binary: String,
    pub rules: String,
    pub timeout_secs: u64,
    /// Lines of surrounding code captured on each side of a finding
    pub context_lines: usize,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            semgrep_binary: "semgrep".to_string(),
            rules: "auto".to_string(),
            timeout_secs: 600,
            context_lines: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Ceiling on repair attempts per issue. The engine makes one attempt.
    pub max_iterations: u32,
    pub benchmark_dir: PathBuf,
    pub reports_dir: PathBuf,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            benchmark_dir: PathBuf::from("benchmark"),
            reports_dir: PathBuf::from("reports"),
        }
    }
}

fn keyring_entry() -> Result<Entry, keyring::Error> {
    Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)
}

fn read_keyring_key() -> Result<Option<String>, keyring::Error> {
    let entry = keyring_entry()?;
    match entry.get_password() {
        Ok(key) => Ok(Some(key)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => Err(err),
    }
}

impl Config {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("mender"))
    }

    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.toml"))
    }

    /// Load config from `path` (or the default location), or return defaults.
    ///
    /// A file that fails to parse is moved aside as `config.toml.corrupt`.
    pub fn load(path: Option<&Path>) -> Self {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_path(),
        };
        let Some(path) = path else {
            return Self::default();
        };
        let Ok(content) = fs::read_to_string(&path) else {
            return Self::default();
        };
        Self::from_toml(&content).unwrap_or_else(|err| {
            preserve_corrupt_config(&path, &content);
            warn!(
                path = %path.display(),
                error = %err,
                "config file was corrupted; a backup was saved and defaults were loaded"
            );
            Self::default()
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Resolve the oracle API key: environment first, then the system keychain.
    pub fn api_key() -> Option<String> {
        for var in API_KEY_ENV_VARS {
            if let Ok(key) = std::env::var(var) {
                if !key.trim().is_empty() {
                    return Some(key.trim().to_string());
                }
            }
        }

        match read_keyring_key() {
            Ok(key) => key,
            Err(err) => {
                warn!(error = %err, "failed to read API key from system keychain");
                None
            }
        }
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("toml.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}
