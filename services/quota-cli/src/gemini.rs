//! Gemini `generateContent` client
//!
//! The client reads its API key from a `SharedCredential`, which the router
//! binds to the key of the current attempt. Outside an attempt nothing is
//! bound and requests fail with `GeminiError::Unbound`.

use std::time::Duration;

use quota_router::SharedCredential;
use serde::Deserialize;
use tracing::debug;

use crate::error::GeminiError;

/// Header carrying the API key.
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    credential: SharedCredential,
}

impl GeminiClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        credential: SharedCredential,
    ) -> Result<Self, GeminiError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credential,
        })
    }

    /// Generate text for `prompt` with `model`, using the currently bound key.
    pub async fn generate(&self, model: &str, prompt: &str) -> Result<String, GeminiError> {
        let credential = self.credential.current().ok_or(GeminiError::Unbound)?;
        let url = generate_url(&self.base_url, model);
        debug!(model, key = credential.index() + 1, "sending generateContent request");

        let response = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, credential.key())
            .json(&request_body(prompt))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(GeminiError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GeminiError::InvalidResponse(e.to_string()))?;
        extract_text(parsed)
    }
}

fn generate_url(base_url: &str, model: &str) -> String {
    format!("{base_url}/v1beta/models/{model}:generateContent")
}

fn request_body(prompt: &str) -> serde_json::Value {
    serde_json::json!({
        "contents": [
            { "role": "user", "parts": [{ "text": prompt }] }
        ]
    })
}

/// Concatenate the text parts of the first candidate.
fn extract_text(response: GenerateResponse) -> Result<String, GeminiError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| GeminiError::InvalidResponse("no candidates".into()))?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".into());
        return Err(GeminiError::InvalidResponse(format!(
            "empty candidate (finishReason: {reason})"
        )));
    }
    Ok(text)
}
