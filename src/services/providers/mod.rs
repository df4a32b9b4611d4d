/// Generative-model gateway abstraction
///
/// The orchestrator talks to the upstream model only through [`ModelGateway`],
/// which keeps the HTTP client out of request handling and lets tests inject
/// canned or slow gateways.
use crate::{error::AppResult, models::ChatRequest};

pub mod gemini;
pub mod prompt;

pub use gemini::GeminiGateway;

/// Trait for upstream model gateways
///
/// `invoke` returns the model's raw text exactly as produced. Malformed or
/// non-JSON output is NOT an error; the normalizer deals with it. Errors are
/// reserved for missing credentials, transport failures, timeouts, non-2xx
/// upstream statuses and replies that carry no text at all.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ModelGateway: Send + Sync {
    async fn invoke(&self, request: &ChatRequest) -> AppResult<String>;

    /// Gateway name for logging and debugging
    fn name(&self) -> &'static str;
}
