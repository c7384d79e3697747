//! External oracle access
//!
//! Both the repair and the explanation call sites talk to a [`ChatBackend`]
//! through the same bounded [`RetryPolicy`]. The production backend is an
//! OpenAI-compatible HTTP client; tests plug in scripted stubs.

pub mod client;
pub mod extract;
pub mod models;
pub mod prompts;
pub mod retry;

use crate::error::OracleError;
use async_trait::async_trait;
use std::time::Duration;

pub use client::HttpOracle;
pub use extract::extract_code_block;
pub use models::Usage;
pub use retry::RetryPolicy;

/// One request to an oracle.
#[derive(Debug, Clone)]
pub struct ChatPrompt {
    pub system: Option<String>,
    pub user: String,
    /// Upper bound for this single call; elapsing counts as a transport failure
    pub timeout: Duration,
}

/// Successful oracle reply.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub usage: Option<Usage>,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, prompt: &ChatPrompt) -> Result<Completion, OracleError>;
}
