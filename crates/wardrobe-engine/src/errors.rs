use thiserror::Error;

pub const QUOTA_EXCEEDED_MESSAGE: &str =
    "You've reached your monthly limit of outfit generations. Upgrade your plan to continue!";
pub const EMPTY_CLOSET_MESSAGE: &str = "Closet is empty! Upload some clothes first.";
pub const NO_ITEM_IMAGES_MESSAGE: &str = "Could not load any clothing item images.";
pub const SYSTEM_BUSY_MESSAGE: &str = "System is busy (rate limit). Please try again in a minute.";
pub const TEXT_ONLY_RESPONSE_MESSAGE: &str = "The AI generated text instead of an image. This might be due to safety filters or beta limitations. Please try again with different items.";

/// Failure to turn an image reference into normalized JPEG bytes.
#[derive(Debug, Error)]
pub enum ImageFetchError {
    #[error("Failed to fetch image {reference}: HTTP {status}")]
    Status { reference: String, status: u16 },
    #[error("Image not found: {reference}")]
    Missing { reference: String },
    #[error("Failed to fetch image {reference}: {source}")]
    Transport {
        reference: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to read image {reference}: {source}")]
    Io {
        reference: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to process image {reference}: {source}")]
    Codec {
        reference: String,
        #[source]
        source: image::ImageError,
    },
}

impl ImageFetchError {
    pub fn reference(&self) -> &str {
        match self {
            ImageFetchError::Status { reference, .. }
            | ImageFetchError::Missing { reference }
            | ImageFetchError::Transport { reference, .. }
            | ImageFetchError::Io { reference, .. }
            | ImageFetchError::Codec { reference, .. } => reference,
        }
    }
}

/// Identity and permission failures shared by every caller-facing operation.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Admin access required")]
    AdminRequired,
    #[error("User not found. Please visit the generator page first to create your account.")]
    UnknownAccount,
    #[error("An admin already exists. Contact them to grant you admin access.")]
    AdminAlreadyExists,
    #[error("Target user {0} not found")]
    TargetNotFound(String),
    #[error("Tier '{0}' cannot be assigned to a subscription")]
    TierNotAssignable(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Upstream generative-model call failures.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("{model} request failed (429): {message}")]
    RateLimited { model: String, message: String },
    #[error("{model} request failed ({status}): {message}")]
    Upstream {
        model: String,
        status: u16,
        message: String,
    },
    #[error("{model} request failed: {source}")]
    Transport {
        model: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{model} returned an unusable response: {message}")]
    InvalidResponse { model: String, message: String },
    #[error("GEMINI_API_KEY or GOOGLE_API_KEY not set")]
    MissingApiKey,
}

impl ModelError {
    /// Rate-limit class: an explicit 429, or any failure whose text carries a
    /// 429 or quota marker.
    pub fn is_rate_limited(&self) -> bool {
        if matches!(self, ModelError::RateLimited { .. }) {
            return true;
        }
        let text = self.to_string();
        text.contains("429") || text.contains("Quota exceeded")
    }
}

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error("{}", QUOTA_EXCEEDED_MESSAGE)]
    QuotaExceeded,
    #[error("{}", EMPTY_CLOSET_MESSAGE)]
    EmptyCloset,
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("Failed to parse outfit selection: {source}")]
    Parse {
        raw: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Internal try-on failures; callers only ever see them as text in
/// `TryOnResult::generation_error`.
#[derive(Debug, Error)]
pub enum TryOnError {
    #[error(transparent)]
    BodyImage(ImageFetchError),
    #[error("{}", NO_ITEM_IMAGES_MESSAGE)]
    NoValidItemImages,
    #[error("{}", SYSTEM_BUSY_MESSAGE)]
    SystemBusy { attempts: u32 },
    #[error(transparent)]
    Model(ModelError),
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot {action} while the generation is {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_detection_matches_status_and_quota_text() {
        let explicit = ModelError::RateLimited {
            model: "m".to_string(),
            message: "slow down".to_string(),
        };
        let quota_text = ModelError::Upstream {
            model: "m".to_string(),
            status: 400,
            message: "Quota exceeded for metric".to_string(),
        };
        let other = ModelError::Upstream {
            model: "m".to_string(),
            status: 500,
            message: "internal".to_string(),
        };
        assert!(explicit.is_rate_limited());
        assert!(quota_text.is_rate_limited());
        assert!(!other.is_rate_limited());
    }

    #[test]
    fn user_facing_messages_are_verbatim() {
        assert_eq!(SelectionError::EmptyCloset.to_string(), EMPTY_CLOSET_MESSAGE);
        assert_eq!(SelectionError::QuotaExceeded.to_string(), QUOTA_EXCEEDED_MESSAGE);
        assert_eq!(
            SelectionError::from(AccessError::Unauthorized).to_string(),
            "Unauthorized"
        );
        assert_eq!(
            TryOnError::SystemBusy { attempts: 5 }.to_string(),
            SYSTEM_BUSY_MESSAGE
        );
    }

    #[test]
    fn image_fetch_error_keeps_reference() {
        let err = ImageFetchError::Status {
            reference: "https://example.com/a.png".to_string(),
            status: 404,
        };
        assert_eq!(err.reference(), "https://example.com/a.png");
        assert!(err.to_string().contains("HTTP 404"));
    }
}
