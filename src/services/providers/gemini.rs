/// Google Gemini gateway
///
/// Calls the REST `generateContent` endpoint with a tier-specific persona and
/// JSON output mode, and hands back the text of the first candidate.
///
/// API Flow:
/// 1. POST {api_url}/models/{model}:generateContent?key={api_key}
/// 2. Text is read from candidates[0].content.parts[*].text (thought parts skipped)
use crate::{
    config::{Config, TierLimits},
    error::{AppError, AppResult},
    models::{ChatRequest, Tier},
    services::providers::{prompt, ModelGateway},
};
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Clone)]
pub struct GeminiGateway {
    http_client: HttpClient,
    api_key: Option<String>,
    api_url: String,
    default_model: String,
    exec_model: String,
    limits: TierLimits,
    timeout: Duration,
}

impl GeminiGateway {
    /// Creates a gateway whose HTTP client enforces `timeout` per call
    pub fn new(
        api_key: Option<String>,
        api_url: String,
        default_model: String,
        exec_model: String,
        limits: TierLimits,
        timeout: Duration,
    ) -> AppResult<Self> {
        let http_client = HttpClient::builder().timeout(timeout).build()?;

        Ok(Self {
            http_client,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            api_url: api_url.trim_end_matches('/').to_string(),
            default_model,
            exec_model,
            limits,
            timeout,
        })
    }

    pub fn from_config(config: &Config) -> AppResult<Self> {
        Self::new(
            config.api_key.clone(),
            config.gemini_api_url.clone(),
            config.model_default.clone(),
            config.model_exec.clone(),
            config.tier_limits(),
            config.model_timeout(),
        )
    }

    /// EXEC gets the stronger model; every other tier the default one
    fn model_for(&self, tier: Tier) -> &str {
        match tier {
            Tier::Exec => &self.exec_model,
            Tier::Free | Tier::Pro => &self.default_model,
        }
    }

    fn api_url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.api_url, model)
    }

    /// Builds the `generateContent` request body
    fn build_request_body(&self, request: &ChatRequest) -> Value {
        let count = self.limits.count_for(request.tier());
        json!({
            "systemInstruction": {
                "parts": [{ "text": prompt::persona(request.tier(), count) }]
            },
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt::user_turn(request) }]
            }],
            "generationConfig": {
                "temperature": 0.4,
                "responseMimeType": "application/json",
                "responseSchema": prompt::response_schema()
            }
        })
    }

    /// Extracts the answer text from a Gemini response.
    ///
    /// Parts tagged `"thought": true` are skipped unless nothing else exists.
    pub fn extract_text(response: &Value) -> Option<String> {
        let parts = response["candidates"][0]["content"]["parts"].as_array()?;

        let answer: Vec<&str> = parts
            .iter()
            .filter(|p| !p["thought"].as_bool().unwrap_or(false))
            .filter_map(|p| p["text"].as_str())
            .collect();
        if !answer.is_empty() {
            return Some(answer.concat());
        }

        let thoughts: Vec<&str> = parts.iter().filter_map(|p| p["text"].as_str()).collect();
        (!thoughts.is_empty()).then(|| thoughts.concat())
    }

    /// Error for a well-formed reply without candidate text, such as a prompt
    /// blocked by safety filters.
    fn empty_reply_error(response: &Value) -> AppError {
        let reason = response["promptFeedback"]["blockReason"]
            .as_str()
            .or_else(|| response["candidates"][0]["finishReason"].as_str());
        match reason {
            Some(reason) => AppError::Upstream(format!("Gemini returned no text ({})", reason)),
            None => AppError::Upstream("Gemini returned no text".to_string()),
        }
    }
}

#[async_trait::async_trait]
impl ModelGateway for GeminiGateway {
    async fn invoke(&self, request: &ChatRequest) -> AppResult<String> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            AppError::MissingCredential("API_KEY is not configured".to_string())
        })?;

        let model = self.model_for(request.tier());
        let body = self.build_request_body(request);

        tracing::debug!(model = %model, tier = %request.tier(), "Calling Gemini");

        let response = self
            .http_client
            .post(self.api_url(model))
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout.as_millis() as u64)
                } else {
                    AppError::HttpClient(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
                .unwrap_or(body);
            return Err(AppError::Upstream(format!(
                "Gemini API returned status {}: {}",
                status, message
            )));
        }

        let response_text = response.text().await?;

        // A non-JSON body is passed through untouched for the normalizer.
        let text = match serde_json::from_str::<Value>(&response_text) {
            Ok(json) => {
                Self::extract_text(&json).ok_or_else(|| Self::empty_reply_error(&json))?
            }
            Err(e) => {
                tracing::warn!(error = %e, "Gemini returned a non-JSON body");
                response_text
            }
        };

        tracing::info!(
            model = %model,
            tier = %request.tier(),
            chars = text.len(),
            provider = "gemini",
            "Model call completed"
        );

        Ok(text)
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(api_url: &str, api_key: Option<&str>, timeout: Duration) -> GeminiGateway {
        GeminiGateway::new(
            api_key.map(str::to_string),
            api_url.to_string(),
            "flash".to_string(),
            "pro".to_string(),
            TierLimits::new(3, 4, 5),
            timeout,
        )
        .unwrap()
    }

    fn candidate(text: &str) -> Value {
        json!({
            "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }]
        })
    }

    #[test]
    fn test_extract_text_skips_thoughts() {
        let response = json!({
            "candidates": [{ "content": { "parts": [
                { "text": "pensando...", "thought": true },
                { "text": "{\"text\":" },
                { "text": "\"ok\"}" }
            ] } }]
        });
        assert_eq!(
            GeminiGateway::extract_text(&response).as_deref(),
            Some("{\"text\":\"ok\"}")
        );
    }

    #[test]
    fn test_extract_text_missing_candidates() {
        assert_eq!(GeminiGateway::extract_text(&json!({})), None);
        assert_eq!(
            GeminiGateway::extract_text(&json!({ "candidates": [] })),
            None
        );
    }

    #[test]
    fn test_request_body_uses_tier_persona() {
        let gateway = gateway("http://localhost", Some("k"), Duration::from_secs(1));
        let request = ChatRequest::new("notebook", Tier::Pro, "t");

        let body = gateway.build_request_body(&request);
        let system = body["systemInstruction"]["parts"][0]["text"].as_str().unwrap();
        assert!(system.contains("exatamente 4 itens"));
        assert_eq!(
            body["contents"][0]["parts"][0]["text"],
            "Pedido do cliente: notebook"
        );
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
    }

    #[test]
    fn test_model_selection_by_tier() {
        let gateway = gateway("http://localhost/", Some("k"), Duration::from_secs(1));
        assert_eq!(gateway.model_for(Tier::Free), "flash");
        assert_eq!(gateway.model_for(Tier::Pro), "flash");
        assert_eq!(gateway.model_for(Tier::Exec), "pro");
        assert_eq!(
            gateway.api_url("pro"),
            "http://localhost/models/pro:generateContent"
        );
    }

    #[tokio::test]
    async fn test_invoke_returns_candidate_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/flash:generateContent"))
            .and(query_param("key", "test-key"))
            .and(body_partial_json(json!({
                "contents": [{ "parts": [{ "text": "Pedido do cliente: fone" }] }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(candidate("{\"items\":[]}")))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = gateway(&server.uri(), Some("test-key"), Duration::from_secs(5));
        let text = gateway
            .invoke(&ChatRequest::new("fone", Tier::Free, "t"))
            .await
            .unwrap();

        assert_eq!(text, "{\"items\":[]}");
    }

    #[tokio::test]
    async fn test_invoke_exec_uses_exec_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/pro:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(candidate("ok")))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = gateway(&server.uri(), Some("test-key"), Duration::from_secs(5));
        let text = gateway
            .invoke(&ChatRequest::new("tv", Tier::Exec, "t"))
            .await
            .unwrap();
        assert_eq!(text, "ok");
    }

    #[tokio::test]
    async fn test_invoke_passes_malformed_body_through() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&server)
            .await;

        let gateway = gateway(&server.uri(), Some("test-key"), Duration::from_secs(5));
        let text = gateway
            .invoke(&ChatRequest::new("tv", Tier::Free, "t"))
            .await
            .unwrap();
        assert_eq!(text, "{not json");
    }

    #[tokio::test]
    async fn test_invoke_blocked_prompt_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "promptFeedback": { "blockReason": "SAFETY" }
            })))
            .mount(&server)
            .await;

        let gateway = gateway(&server.uri(), Some("test-key"), Duration::from_secs(5));
        let err = gateway
            .invoke(&ChatRequest::new("tv", Tier::Free, "t"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Upstream(_)));
        assert!(err.to_string().contains("SAFETY"));
    }

    #[tokio::test]
    async fn test_invoke_upstream_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": { "code": 429, "message": "Resource has been exhausted" }
            })))
            .mount(&server)
            .await;

        let gateway = gateway(&server.uri(), Some("test-key"), Duration::from_secs(5));
        let err = gateway
            .invoke(&ChatRequest::new("tv", Tier::Free, "t"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Upstream(_)));
        assert!(err.to_string().contains("Resource has been exhausted"));
    }

    #[tokio::test]
    async fn test_invoke_without_credential_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let gateway = gateway(&server.uri(), Some("  "), Duration::from_secs(5));
        let err = gateway
            .invoke(&ChatRequest::new("tv", Tier::Free, "t"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MissingCredential(_)));
    }

    #[tokio::test]
    async fn test_invoke_transport_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(candidate("tarde demais"))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let gateway = gateway(&server.uri(), Some("test-key"), Duration::from_millis(50));
        let err = gateway
            .invoke(&ChatRequest::new("tv", Tier::Free, "t"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Timeout(50)));
    }
}
