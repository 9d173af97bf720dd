use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use crate::errors::ModelError;
use crate::upstream::{ContentPart, ImageModel, TextModel};

/// Shared transport for the Gemini `generateContent` endpoint.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_base: String,
    api_key: Option<String>,
    timeout: Duration,
    http: HttpClient,
}

impl GeminiClient {
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        http: HttpClient,
    ) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            timeout,
            http,
        }
    }

    pub fn model(&self, name: impl Into<String>) -> GeminiModel {
        GeminiModel {
            client: self.clone(),
            name: name.into(),
        }
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

    fn generate(&self, model: &str, payload: &Value) -> Result<Value, ModelError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ModelError::MissingApiKey);
        };
        let response = self
            .http
            .post(self.endpoint_for_model(model))
            .header("x-goog-api-key", api_key)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .map_err(|source| ModelError::Transport {
                model: model.to_string(),
                source,
            })?;

        let status = response.status().as_u16();
        let body = response.text().map_err(|source| ModelError::Transport {
            model: model.to_string(),
            source,
        })?;
        if status == 429 {
            return Err(ModelError::RateLimited {
                model: model.to_string(),
                message: truncate_text(&upstream_message(&body), 512),
            });
        }
        if !(200..300).contains(&status) {
            return Err(ModelError::Upstream {
                model: model.to_string(),
                status,
                message: truncate_text(&upstream_message(&body), 512),
            });
        }
        serde_json::from_str(&body).map_err(|err| ModelError::InvalidResponse {
            model: model.to_string(),
            message: format!("invalid JSON payload: {err}"),
        })
    }
}

/// A named Gemini model; usable as either a text or an image model.
#[derive(Debug, Clone)]
pub struct GeminiModel {
    client: GeminiClient,
    name: String,
}

impl TextModel for GeminiModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_text(&self, prompt: &str) -> Result<String, ModelError> {
        let payload = build_payload(&[ContentPart::Text(prompt.to_string())], &["TEXT"]);
        let response = self.client.generate(&self.name, &payload)?;
        let text = first_candidate_parts(&response)
            .into_iter()
            .filter_map(|part| match part {
                ContentPart::Text(text) => Some(text),
                ContentPart::InlineImage { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("");
        if text.trim().is_empty() {
            return Err(ModelError::InvalidResponse {
                model: self.name.clone(),
                message: "response contained no text".to_string(),
            });
        }
        Ok(text)
    }
}

impl ImageModel for GeminiModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_content(&self, parts: &[ContentPart]) -> Result<Vec<ContentPart>, ModelError> {
        let payload = build_payload(parts, &["TEXT", "IMAGE"]);
        let response = self.client.generate(&self.name, &payload)?;
        Ok(first_candidate_parts(&response))
    }
}

pub fn build_payload(parts: &[ContentPart], modalities: &[&str]) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": parts.iter().map(ContentPart::to_json).collect::<Vec<_>>(),
        }],
        "generationConfig": {
            "responseModalities": modalities,
        },
    })
}

/// Parts of `candidates[0].content.parts`; accepts both camelCase and
/// snake_case inline data keys. Unknown part shapes are skipped.
pub fn first_candidate_parts(response: &Value) -> Vec<ContentPart> {
    let parts = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    parts
        .iter()
        .filter_map(|part| {
            if let Some(inline) = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
            {
                let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
                if data.is_empty() {
                    return None;
                }
                let mime_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .unwrap_or("image/jpeg");
                return Some(ContentPart::InlineImage {
                    mime_type: mime_type.to_string(),
                    data: data.to_string(),
                });
            }
            part.get("text")
                .and_then(Value::as_str)
                .map(|text| ContentPart::Text(text.to_string()))
        })
        .collect()
}

fn upstream_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
