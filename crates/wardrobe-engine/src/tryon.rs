use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use wardrobe_contracts::events::EventLog;

use crate::errors::{TryOnError, TEXT_ONLY_RESPONSE_MESSAGE};
use crate::map_object;
use crate::normalizer::{ImageNormalizer, TRY_ON_MAX_DIM};
use crate::upstream::{ContentPart, ImageModel};

pub const MAX_TRY_ON_ITEMS: usize = 10;

pub const TRY_ON_INSTRUCTION: &str = "You are an expert fashion AI.
Task: Create a virtual try-on image.
Input 1: A full-body photo of a person.
Input 2+: Photos of clothing items.

Action: Generate a high-quality, photorealistic image of the person from Input 1 wearing the clothing items from Input 2+.
- Maintain the person's pose, body shape, and lighting.
- Replace the original clothes with the new items naturally.
- Ensure realistic fabric textures and fit.
- The output MUST be an image.

CRITICAL RULES:
- You must NOT add any accessories, jewelry, watches, hats, or other items that are not explicitly provided in the input images.
- If the person is not wearing a watch in Input 1, and no watch is provided in Input 2+, the output MUST NOT have a watch.
- Only use the clothing items provided. Do not invent new items.
- Keep the person's original accessories (like glasses or existing jewelry) ONLY if they don't conflict with the new items. Do NOT add new ones.";

/// Bounded exponential backoff for rate-limited image calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    /// Wait after the `failed_attempt`-th (1-based) rate-limited attempt.
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let doublings = failed_attempt.saturating_sub(1).min(16);
        self.initial_delay.saturating_mul(1u32 << doublings)
    }
}

pub trait Pause: Send + Sync {
    fn pause(&self, delay: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPause;

impl Pause for ThreadPause {
    fn pause(&self, delay: Duration) {
        thread::sleep(delay);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TryOnItem {
    pub id: String,
    pub image_url: String,
}

/// Outcome of a try-on; failures are described, never raised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TryOnResult {
    pub generated_image_url: Option<String>,
    pub generation_error: Option<String>,
    /// Ids of the items whose images made it into the request.
    pub items_rendered: Vec<String>,
    pub attempts: u32,
    pub warnings: Vec<String>,
}

impl TryOnResult {
    pub fn succeeded(&self) -> bool {
        self.generated_image_url.is_some()
    }
}

#[derive(Clone)]
pub struct TryOnRenderer {
    normalizer: ImageNormalizer,
    model: Arc<dyn ImageModel>,
    retry: RetryPolicy,
    pause: Arc<dyn Pause>,
    events: EventLog,
}

impl TryOnRenderer {
    pub fn new(normalizer: ImageNormalizer, model: Arc<dyn ImageModel>, events: EventLog) -> Self {
        Self {
            normalizer,
            model,
            retry: RetryPolicy::default(),
            pause: Arc::new(ThreadPause),
            events,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy, pause: Arc<dyn Pause>) -> Self {
        self.retry = retry;
        self.pause = pause;
        self
    }

    pub fn generate_try_on(&self, items: &[TryOnItem], body_image_url: &str) -> TryOnResult {
        let mut result = TryOnResult::default();
        match self.render(items, body_image_url, &mut result) {
            Ok(Some(url)) => {
                self.events.note(
                    "try_on_rendered",
                    map_object(json!({
                        "model": self.model.name(),
                        "items": result.items_rendered,
                        "attempts": result.attempts,
                    })),
                );
                result.generated_image_url = Some(url);
            }
            Ok(None) => {
                self.events.note(
                    "try_on_text_only",
                    map_object(json!({
                        "model": self.model.name(),
                        "attempts": result.attempts,
                    })),
                );
                result.generation_error = Some(TEXT_ONLY_RESPONSE_MESSAGE.to_string());
            }
            Err(err) => {
                self.events.note(
                    "try_on_failed",
                    map_object(json!({
                        "model": self.model.name(),
                        "attempts": result.attempts,
                        "error": err.to_string(),
                    })),
                );
                result.generation_error = Some(err.to_string());
            }
        }
        result
    }

    fn render(
        &self,
        items: &[TryOnItem],
        body_image_url: &str,
        progress: &mut TryOnResult,
    ) -> Result<Option<String>, TryOnError> {
        let items = &items[..items.len().min(MAX_TRY_ON_ITEMS)];
        let mut references = Vec::with_capacity(items.len() + 1);
        references.push(body_image_url);
        references.extend(items.iter().map(|item| item.image_url.as_str()));

        let mut normalized = self
            .normalizer
            .normalize_all(&references, TRY_ON_MAX_DIM)
            .into_iter();
        let body = match normalized.next() {
            Some(Ok(body)) => body,
            Some(Err(err)) => return Err(TryOnError::BodyImage(err)),
            None => return Err(TryOnError::NoValidItemImages),
        };

        let mut parts = vec![
            ContentPart::Text(TRY_ON_INSTRUCTION.to_string()),
            ContentPart::jpeg(body.base64),
        ];
        for (item, image) in items.iter().zip(normalized) {
            match image {
                Ok(image) => {
                    parts.push(ContentPart::jpeg(image.base64));
                    progress.items_rendered.push(item.id.clone());
                }
                Err(err) => {
                    let warning = format!("Failed to load image for item {}: {err}", item.id);
                    self.events.note(
                        "item_image_dropped",
                        map_object(json!({
                            "item_id": item.id,
                            "reference": err.reference(),
                            "error": err.to_string(),
                        })),
                    );
                    progress.warnings.push(warning);
                }
            }
        }
        if progress.items_rendered.is_empty() {
            return Err(TryOnError::NoValidItemImages);
        }

        let response = self.call_with_retries(&parts, progress)?;
        Ok(response.into_iter().find_map(|part| match part {
            ContentPart::InlineImage { mime_type, data } => {
                Some(format!("data:{mime_type};base64,{data}"))
            }
            ContentPart::Text(_) => None,
        }))
    }

    fn call_with_retries(
        &self,
        parts: &[ContentPart],
        progress: &mut TryOnResult,
    ) -> Result<Vec<ContentPart>, TryOnError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            progress.attempts = attempt;
            let err = match self.model.generate_content(parts) {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };
            if !err.is_rate_limited() {
                return Err(TryOnError::Model(err));
            }
            if attempt >= max_attempts {
                return Err(TryOnError::SystemBusy { attempts: attempt });
            }

            let delay = self.retry.delay_after(attempt);
            progress.warnings.push(format!(
                "Rate limit hit. Retrying attempt {attempt}/{max_attempts} in {} seconds.",
                delay.as_secs_f64()
            ));
            self.events.note(
                "rate_limited",
                map_object(json!({
                    "model": self.model.name(),
                    "attempt": attempt,
                    "max_attempts": max_attempts,
                    "delay_ms": delay.as_millis() as u64,
                })),
            );
            self.pause.pause(delay);
        }
    }
}
