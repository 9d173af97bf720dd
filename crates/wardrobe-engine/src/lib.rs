pub mod admin;
pub mod closet;
pub mod config;
pub mod errors;
pub mod gemini;
pub mod identity;
pub mod normalizer;
pub mod optimistic;
pub mod persister;
pub mod selector;
pub mod session;
pub mod storage;
pub mod tryon;
pub mod upstream;
pub mod usage;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::blocking::Client as HttpClient;
use serde_json::{Map, Value};
use wardrobe_contracts::events::EventLog;
use wardrobe_contracts::store::WardrobeStore;

pub use admin::AdminService;
pub use closet::{ClosetService, ClosetView};
pub use config::EngineConfig;
pub use errors::{
    AccessError, ImageFetchError, ModelError, PersistError, SelectionError, SessionError,
    TryOnError,
};
pub use gemini::{GeminiClient, GeminiModel};
pub use identity::Identity;
pub use normalizer::{ImageNormalizer, NormalizedImage};
pub use optimistic::OptimisticList;
pub use persister::OutfitPersister;
pub use selector::{OutfitSelection, OutfitSelector, SelectionResult};
pub use session::{GenerationSession, SessionStage, TryOnOutcome};
pub use storage::{ObjectStorage, StorageCleanup, UploadThingStorage};
pub use tryon::{Pause, RetryPolicy, TryOnItem, TryOnRenderer, TryOnResult};
pub use upstream::{ContentPart, ImageModel, TextModel};
pub use usage::{GenerationLimit, SubscriptionInfo, UsageGate};

pub const STORE_FILE: &str = "wardrobe.json";
pub const EVENTS_FILE: &str = "events.jsonl";

/// Upstream collaborators the pipeline is built around.
pub struct Collaborators {
    pub normalizer: ImageNormalizer,
    pub text_model: Arc<dyn TextModel>,
    pub image_model: Arc<dyn ImageModel>,
    pub storage: Option<Arc<dyn ObjectStorage>>,
    pub storage_host_marker: String,
}

/// Every pipeline component wired against one store and one event log.
#[derive(Clone)]
pub struct Stylist {
    pub store: Arc<WardrobeStore>,
    pub events: EventLog,
    pub normalizer: ImageNormalizer,
    pub gate: UsageGate,
    pub selector: OutfitSelector,
    pub renderer: TryOnRenderer,
    pub persister: OutfitPersister,
    pub closet: ClosetService,
    pub admin: AdminService,
}

impl Stylist {
    /// Opens `data_dir` and builds live Gemini and storage clients from `config`.
    pub fn open(config: &EngineConfig, data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build HTTP client")?;

        let gemini = GeminiClient::new(
            config.gemini_api_base.clone(),
            config.gemini_api_key.clone(),
            config.request_timeout,
            http.clone(),
        );
        let storage = config.uploadthing_secret.as_ref().map(|secret| {
            Arc::new(UploadThingStorage::new(
                config.uploadthing_api_base.clone(),
                secret.clone(),
                config.request_timeout,
                http.clone(),
            )) as Arc<dyn ObjectStorage>
        });

        let store = Arc::new(WardrobeStore::open(data_dir.join(STORE_FILE)));
        let events = EventLog::new(data_dir.join(EVENTS_FILE), "wardrobe");
        for reason in &config.model_fallbacks {
            events.note(
                "model_fallback",
                map_object(serde_json::json!({ "reason": reason })),
            );
        }
        Ok(Self::assemble(
            store,
            events,
            Collaborators {
                normalizer: ImageNormalizer::new(config.static_root.clone(), http),
                text_model: Arc::new(gemini.model(config.text_model.clone())),
                image_model: Arc::new(gemini.model(config.image_model.clone())),
                storage,
                storage_host_marker: config.storage_host_marker.clone(),
            },
        ))
    }

    pub fn assemble(store: Arc<WardrobeStore>, events: EventLog, parts: Collaborators) -> Self {
        let gate = UsageGate::new(Arc::clone(&store), events.clone());
        let cleanup = StorageCleanup::new(parts.storage, parts.storage_host_marker, events.clone());
        let selector = OutfitSelector::new(
            Arc::clone(&store),
            gate.clone(),
            parts.text_model,
            events.clone(),
        );
        let renderer = TryOnRenderer::new(parts.normalizer.clone(), parts.image_model, events.clone());
        let persister = OutfitPersister::new(
            Arc::clone(&store),
            gate.clone(),
            cleanup.clone(),
            events.clone(),
        );
        let closet = ClosetService::new(Arc::clone(&store), cleanup, events.clone());
        let admin = AdminService::new(Arc::clone(&store), events.clone());
        Self {
            store,
            events,
            normalizer: parts.normalizer,
            gate,
            selector,
            renderer,
            persister,
            closet,
            admin,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy, pause: Arc<dyn Pause>) -> Self {
        self.renderer = self.renderer.with_retry(retry, pause);
        self
    }

    pub fn store_path(&self) -> PathBuf {
        self.store.path().to_path_buf()
    }

    pub fn session(&self, identity: Identity) -> GenerationSession {
        GenerationSession::new(
            identity,
            self.selector.clone(),
            self.renderer.clone(),
            self.persister.clone(),
            self.events.clone(),
        )
    }

    pub fn closet_view(&self, identity: Identity) -> Result<ClosetView, PersistError> {
        ClosetView::load(identity, self.closet.clone(), self.persister.clone())
    }
}

pub(crate) fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
