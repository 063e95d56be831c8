use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};

use super::GenerativeBackend;
use crate::config::StudioConfig;
use crate::request::{CompositeRequest, OutputModality, RequestPart};
use crate::response::BackendReply;

const THUMBNAIL_ASPECT_RATIO: &str = "16:9";

/// `generateContent` over HTTPS. One attempt per call; the key travels in
/// the `key` query parameter.
pub struct GeminiBackend {
    api_base: String,
    api_key: Option<String>,
    timeout: Duration,
    http: HttpClient,
}

impl GeminiBackend {
    pub fn new(api_base: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("failed to build Gemini HTTP client")?;
        Ok(Self {
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            timeout,
            http,
        })
    }

    pub fn from_config(config: &StudioConfig) -> Result<Self> {
        Self::new(
            &config.api_base,
            config.api_key.clone(),
            Duration::from_secs_f64(config.request_timeout_s),
        )
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_payload(request: &CompositeRequest) -> Value {
        let parts = request
            .parts
            .iter()
            .map(|part| match part {
                RequestPart::Image(image) => json!({
                    "inlineData": {
                        "mimeType": image.mime_type(),
                        "data": image.base64_payload(),
                    }
                }),
                RequestPart::Text(text) => json!({ "text": text }),
            })
            .collect::<Vec<_>>();

        let mut payload = Map::new();
        payload.insert(
            "contents".to_string(),
            Value::Array(vec![json!({
                "role": "user",
                "parts": parts,
            })]),
        );
        if request.modality == OutputModality::Image {
            payload.insert(
                "generationConfig".to_string(),
                json!({
                    "responseModalities": ["IMAGE"],
                    "imageConfig": { "aspectRatio": THUMBNAIL_ASPECT_RATIO },
                }),
            );
        }
        Value::Object(payload)
    }
}

impl GenerativeBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, model: &str, request: &CompositeRequest) -> Result<BackendReply> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY or API_KEY not set");
        };
        let endpoint = self.endpoint_for_model(model);
        let payload = Self::build_payload(request);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let body = response_json_or_error("Gemini", response)?;
        serde_json::from_value(body).context("Gemini response had an unexpected shape")
    }
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
