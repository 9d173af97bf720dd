use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use serde_json::json;
use wardrobe_contracts::events::EventLog;

use crate::map_object;

/// Remote object storage that can forget a file by key.
pub trait ObjectStorage: Send + Sync {
    fn delete_file(&self, key: &str) -> Result<()>;
}

/// UploadThing file deletion over its REST API.
#[derive(Debug, Clone)]
pub struct UploadThingStorage {
    api_base: String,
    secret: String,
    timeout: Duration,
    http: HttpClient,
}

impl UploadThingStorage {
    pub fn new(
        api_base: impl Into<String>,
        secret: impl Into<String>,
        timeout: Duration,
        http: HttpClient,
    ) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
            timeout,
            http,
        }
    }
}

impl ObjectStorage for UploadThingStorage {
    fn delete_file(&self, key: &str) -> Result<()> {
        let endpoint = format!("{}/v6/deleteFiles", self.api_base);
        let response = self
            .http
            .post(&endpoint)
            .header("x-uploadthing-api-key", &self.secret)
            .timeout(self.timeout)
            .json(&json!({ "fileKeys": [key] }))
            .send()
            .with_context(|| format!("POST {endpoint}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("deleteFiles failed ({}): {}", status.as_u16(), body.trim());
        }
        Ok(())
    }
}

/// Storage key of a URL we host, or `None` for anything else (data URLs,
/// bundled assets, third-party links).
pub fn hosted_file_key<'a>(url: &'a str, host_marker: &str) -> Option<&'a str> {
    if host_marker.is_empty() || !url.contains(host_marker) {
        return None;
    }
    let key = url.rsplit('/').next()?;
    if key.is_empty() {
        return None;
    }
    Some(key)
}

/// Best-effort release of hosted files once their rows are gone.
#[derive(Clone)]
pub struct StorageCleanup {
    storage: Option<Arc<dyn ObjectStorage>>,
    host_marker: String,
    events: EventLog,
}

impl StorageCleanup {
    pub fn new(
        storage: Option<Arc<dyn ObjectStorage>>,
        host_marker: impl Into<String>,
        events: EventLog,
    ) -> Self {
        Self {
            storage,
            host_marker: host_marker.into(),
            events,
        }
    }

    /// Never fails. Returns whether a remote delete went through.
    pub fn release(&self, url: &str) -> bool {
        let Some(key) = hosted_file_key(url, &self.host_marker) else {
            return false;
        };
        let Some(storage) = self.storage.as_ref() else {
            self.events.note(
                "storage_cleanup_skipped",
                map_object(json!({ "key": key, "reason": "no storage credentials" })),
            );
            return false;
        };
        match storage.delete_file(key) {
            Ok(()) => {
                self.events
                    .note("storage_cleaned", map_object(json!({ "key": key })));
                true
            }
            Err(err) => {
                self.events.note(
                    "storage_cleanup_failed",
                    map_object(json!({ "key": key, "error": format!("{err:#}") })),
                );
                false
            }
        }
    }
}
