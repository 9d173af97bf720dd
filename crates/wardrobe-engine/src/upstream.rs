use serde_json::{json, Value};

use crate::errors::ModelError;
use crate::normalizer::JPEG_MIME;

/// One part of a multi-part generative request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    InlineImage { mime_type: String, data: String },
}

impl ContentPart {
    pub fn jpeg(data: impl Into<String>) -> Self {
        ContentPart::InlineImage {
            mime_type: JPEG_MIME.to_string(),
            data: data.into(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ContentPart::Text(text) => json!({ "text": text }),
            ContentPart::InlineImage { mime_type, data } => json!({
                "inlineData": {
                    "data": data,
                    "mimeType": mime_type,
                }
            }),
        }
    }
}

pub trait TextModel: Send + Sync {
    fn name(&self) -> &str;
    fn generate_text(&self, prompt: &str) -> Result<String, ModelError>;
}

pub trait ImageModel: Send + Sync {
    fn name(&self) -> &str;
    /// Parts of the first response candidate, in response order.
    fn generate_content(&self, parts: &[ContentPart]) -> Result<Vec<ContentPart>, ModelError>;
}
