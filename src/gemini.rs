use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::models::InlineImage;

// ── Constants ────────────────────────────────────────────────────────────────

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const USER_AGENT: &str = "image-extractor-api/1.0";

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("invalid Gemini client configuration: {0}")]
    Config(String),
    #[error("{0}")]
    Request(String),
    #[error("Gemini API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Gemini API returned no text: {0}")]
    EmptyResponse(String),
    #[error("could not decode Gemini response: {0}")]
    Decode(String),
}

// ── Model seam ───────────────────────────────────────────────────────────────

/// A generative model that answers a prompt about a set of images with text.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate(&self, prompt: &str, images: &[InlineImage]) -> Result<String, UpstreamError>;
}

// ── Gemini client ────────────────────────────────────────────────────────────

pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: Url,
    model: String,
}

impl GeminiClient {
    /// Builds a client for `model`. The API key travels as the `key` query
    /// parameter of every call.
    pub fn new(api_key: &str, model: &str, base_url: &str) -> Result<Self, UpstreamError> {
        let endpoint = format!(
            "{}/models/{}:generateContent",
            base_url.trim_end_matches('/'),
            model
        );
        let endpoint = Url::parse_with_params(&endpoint, &[("key", api_key)])
            .map_err(|e| UpstreamError::Config(format!("bad endpoint {}: {}", endpoint, e)))?;

        let http = reqwest::ClientBuilder::new()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(120))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| UpstreamError::Config(e.to_string()))?;

        Ok(Self {
            http,
            endpoint,
            model: model.to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    async fn generate(&self, prompt: &str, images: &[InlineImage]) -> Result<String, UpstreamError> {
        let body = GenerateRequest::new(prompt, images);

        tracing::debug!(model = %self.model, images = images.len(), "calling Gemini generateContent");

        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                // reqwest includes the URL in its messages; drop it so the key never leaks.
                let e = e.without_url();
                if e.is_timeout() {
                    UpstreamError::Request(format!("TimeoutError: {}", e))
                } else if e.is_connect() {
                    UpstreamError::Request(format!("ConnectError: {}", e))
                } else {
                    UpstreamError::Request(format!("RequestError: {}", e))
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| UpstreamError::Request(e.without_url().to_string()))?;

        if !status.is_success() {
            return Err(UpstreamError::Api {
                status: status.as_u16(),
                message: error_message(status, &text),
            });
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&text).map_err(|e| UpstreamError::Decode(e.to_string()))?;
        response_text(parsed)
    }
}

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text {
        text: &'a str,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: &'a InlineImage,
    },
}

impl<'a> GenerateRequest<'a> {
    fn new(prompt: &'a str, images: &'a [InlineImage]) -> Self {
        let mut parts = Vec::with_capacity(images.len() + 1);
        parts.push(RequestPart::Text { text: prompt });
        parts.extend(images.iter().map(|inline_data| RequestPart::Inline { inline_data }));

        Self {
            contents: vec![RequestContent { role: "user", parts }],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
    status: Option<String>,
}

// ── Response handling ────────────────────────────────────────────────────────

/// Joins the text parts of the first candidate.
fn response_text(response: GenerateResponse) -> Result<String, UpstreamError> {
    let block_reason = response
        .prompt_feedback
        .and_then(|f| f.block_reason)
        .map(|r| format!("prompt blocked ({})", r));

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(UpstreamError::EmptyResponse(
            block_reason.unwrap_or_else(|| "no candidates".to_string()),
        ));
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.is_empty() {
        let reason = candidate
            .finish_reason
            .map(|r| format!("finish reason {}", r))
            .unwrap_or_else(|| "candidate has no text".to_string());
        return Err(UpstreamError::EmptyResponse(reason));
    }

    Ok(text)
}

/// Provider message from an error body, or the bare HTTP status.
fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(ErrorEnvelope {
            error: ErrorDetail {
                message: Some(message),
                status: Some(code),
            },
        }) => format!("{} ({})", message, code),
        Ok(ErrorEnvelope {
            error: ErrorDetail {
                message: Some(message),
                ..
            },
        }) => message,
        _ => status.to_string(),
    }
}
