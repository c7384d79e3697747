//! Report sources
//!
//! Two ways of getting raw reports into the normalizer: a directory of
//! benchmark JSON files, or a semgrep scan of a local project.

mod benchmark;
mod semgrep;

pub use benchmark::load_reports;
pub use semgrep::{infer_language, SemgrepScanner};
