//! mender library crate
//!
//! Normalizes static-analysis and benchmark bug reports, asks an LLM oracle
//! for a patch per issue, checks each patch with a per-language validator and
//! writes a run report. The binary in `main.rs` only wires these together.

pub mod config;
pub mod engine;
pub mod error;
pub mod explain;
pub mod ingest;
pub mod issue;
pub mod normalize;
pub mod oracle;
pub mod repair;
pub mod report;
pub mod util;
pub mod validate;
