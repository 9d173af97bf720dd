use std::env;
use std::path::PathBuf;
use std::time::Duration;

use wardrobe_contracts::models::{ModelCapability, ModelSelector};

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_UPLOADTHING_API_BASE: &str = "https://api.uploadthing.com";
pub const DEFAULT_STORAGE_HOST_MARKER: &str = "utfs.io";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub gemini_api_key: Option<String>,
    pub gemini_api_base: String,
    pub text_model: String,
    pub image_model: String,
    /// Directory that `/`-prefixed image references resolve against.
    pub static_root: PathBuf,
    pub uploadthing_secret: Option<String>,
    pub uploadthing_api_base: String,
    pub storage_host_marker: String,
    pub request_timeout: Duration,
    /// Reasons a requested model name was replaced by a registry default.
    pub model_fallbacks: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            gemini_api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            text_model: "gemini-2.0-flash".to_string(),
            image_model: "gemini-3-pro-image-preview".to_string(),
            static_root: PathBuf::from("public"),
            uploadthing_secret: None,
            uploadthing_api_base: DEFAULT_UPLOADTHING_API_BASE.to_string(),
            storage_host_marker: DEFAULT_STORAGE_HOST_MARKER.to_string(),
            request_timeout: Duration::from_secs(120),
            model_fallbacks: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();
        let selector = ModelSelector::new(None);
        let mut model_fallbacks = Vec::new();
        let mut resolve = |key: &str, capability: ModelCapability, default: String| {
            match selector.select(get(key).as_deref(), capability) {
                Ok(selection) => {
                    if let (Some(reason), Some(_)) =
                        (selection.fallback_reason, selection.requested)
                    {
                        model_fallbacks.push(reason);
                    }
                    selection.model.name
                }
                Err(reason) => {
                    model_fallbacks.push(reason);
                    default
                }
            }
        };
        let text_model = resolve("WARDROBE_TEXT_MODEL", ModelCapability::Text, defaults.text_model);
        let image_model = resolve(
            "WARDROBE_IMAGE_MODEL",
            ModelCapability::Image,
            defaults.image_model,
        );

        let request_timeout = get("WARDROBE_REQUEST_TIMEOUT")
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|value| value.is_finite())
            .map(|secs| Duration::from_secs_f64(secs.clamp(15.0, 600.0)))
            .unwrap_or(defaults.request_timeout);

        Self {
            gemini_api_key: get("GEMINI_API_KEY").or_else(|| get("GOOGLE_API_KEY")),
            gemini_api_base: get("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or(defaults.gemini_api_base),
            text_model,
            image_model,
            static_root: get("WARDROBE_STATIC_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.static_root),
            uploadthing_secret: get("UPLOADTHING_SECRET"),
            uploadthing_api_base: get("UPLOADTHING_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or(defaults.uploadthing_api_base),
            storage_host_marker: defaults.storage_host_marker,
            request_timeout,
            model_fallbacks,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> EngineConfig {
        let vars = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = config_from(&[]);
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn google_key_is_a_fallback_and_blanks_are_unset() {
        let config = config_from(&[("GEMINI_API_KEY", "  "), ("GOOGLE_API_KEY", "g-key")]);
        assert_eq!(config.gemini_api_key.as_deref(), Some("g-key"));
    }

    #[test]
    fn unknown_image_model_falls_back_with_reason() {
        let config = config_from(&[("WARDROBE_IMAGE_MODEL", "dall-e-2")]);
        assert_eq!(config.image_model, "gemini-3-pro-image-preview");
        assert_eq!(config.model_fallbacks.len(), 1);
        assert!(config.model_fallbacks[0].contains("dall-e-2"));
    }

    #[test]
    fn timeout_is_clamped_and_bases_are_trimmed() {
        let config = config_from(&[
            ("WARDROBE_REQUEST_TIMEOUT", "5"),
            ("GEMINI_API_BASE", "http://localhost:9000/v1beta/"),
        ]);
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.gemini_api_base, "http://localhost:9000/v1beta");
    }
}
