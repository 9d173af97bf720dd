use serde::Serialize;
use serde_json::json;
use wardrobe_contracts::closet::{NewOutfit, Outfit};
use wardrobe_contracts::events::EventLog;

use crate::errors::SessionError;
use crate::identity::Identity;
use crate::map_object;
use crate::persister::OutfitPersister;
use crate::selector::{OutfitSelector, SelectionResult};
use crate::tryon::{TryOnItem, TryOnRenderer, TryOnResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    Idle,
    Selecting,
    Selected,
    TryingOn,
    TriedOn,
    TryOnFailed,
}

impl SessionStage {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStage::Idle => "idle",
            SessionStage::Selecting => "selecting",
            SessionStage::Selected => "selected",
            SessionStage::TryingOn => "trying_on",
            SessionStage::TriedOn => "tried_on",
            SessionStage::TryOnFailed => "try_on_failed",
        }
    }

    fn can_select(self) -> bool {
        !matches!(self, SessionStage::Selecting | SessionStage::TryingOn)
    }

    fn can_try_on(self) -> bool {
        matches!(
            self,
            SessionStage::Selected | SessionStage::TriedOn | SessionStage::TryOnFailed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TryOnOutcome {
    pub try_on: TryOnResult,
    pub outfit: Option<Outfit>,
    /// Whether this attempt consumed a quota unit.
    pub charged: bool,
}

/// One occasion's generation flow: select once, then try the selection on
/// any number of bodies.
///
/// Every successful try-on is persisted, but a selection is charged at most
/// one quota unit however many times it is tried on.
pub struct GenerationSession {
    identity: Identity,
    selector: OutfitSelector,
    renderer: TryOnRenderer,
    persister: OutfitPersister,
    events: EventLog,
    stage: SessionStage,
    occasion: String,
    selection: Option<SelectionResult>,
    charged: bool,
}

impl GenerationSession {
    pub fn new(
        identity: Identity,
        selector: OutfitSelector,
        renderer: TryOnRenderer,
        persister: OutfitPersister,
        events: EventLog,
    ) -> Self {
        let events = events.for_actor(identity.actor());
        Self {
            identity,
            selector,
            renderer,
            persister,
            events,
            stage: SessionStage::Idle,
            occasion: String::new(),
            selection: None,
            charged: false,
        }
    }

    pub fn stage(&self) -> SessionStage {
        self.stage
    }

    pub fn selection(&self) -> Option<&SelectionResult> {
        self.selection.as_ref()
    }

    pub fn occasion(&self) -> &str {
        &self.occasion
    }

    pub fn is_charged(&self) -> bool {
        self.charged
    }

    fn enter(&mut self, next: SessionStage) {
        self.events.note(
            "session_transition",
            map_object(json!({ "from": self.stage.as_str(), "to": next.as_str() })),
        );
        self.stage = next;
    }

    /// Starts a fresh selection; a failure leaves the session idle.
    pub fn select(&mut self, occasion: &str) -> Result<&SelectionResult, SessionError> {
        if !self.stage.can_select() {
            return Err(SessionError::InvalidTransition {
                action: "select",
                state: self.stage.as_str(),
            });
        }
        self.enter(SessionStage::Selecting);
        self.selection = None;
        self.charged = false;

        match self.selector.generate_outfit(&self.identity, occasion) {
            Ok(selection) => {
                self.occasion = occasion.to_string();
                self.enter(SessionStage::Selected);
                Ok(&*self.selection.insert(selection))
            }
            Err(err) => {
                self.occasion.clear();
                self.enter(SessionStage::Idle);
                Err(err.into())
            }
        }
    }

    /// Renders the current selection on `body_image_url`. Rendering failures
    /// come back inside the outcome; only persistence failures are errors.
    pub fn try_on(&mut self, body_image_url: &str) -> Result<TryOnOutcome, SessionError> {
        let selection = match self.selection.as_ref() {
            Some(selection) if self.stage.can_try_on() => selection,
            _ => {
                return Err(SessionError::InvalidTransition {
                    action: "try on",
                    state: self.stage.as_str(),
                })
            }
        };
        let items = selection
            .closet_items
            .iter()
            .map(|item| TryOnItem {
                id: item.id.clone(),
                image_url: item.image_url.clone(),
            })
            .collect::<Vec<_>>();
        let items_used = selection.selection.selected_item_ids.clone();

        self.enter(SessionStage::TryingOn);
        let result = self.renderer.generate_try_on(&items, body_image_url);
        let Some(image_url) = result.generated_image_url.clone() else {
            self.enter(SessionStage::TryOnFailed);
            return Ok(TryOnOutcome {
                try_on: result,
                outfit: None,
                charged: false,
            });
        };

        let charge = !self.charged;
        let saved = self.persister.store_outfit(
            &self.identity,
            NewOutfit {
                occasion: self.occasion.clone(),
                generated_image_url: image_url,
                items_used,
            },
            charge,
        );
        match saved {
            Ok(outfit) => {
                self.charged = true;
                self.enter(SessionStage::TriedOn);
                Ok(TryOnOutcome {
                    try_on: result,
                    outfit: Some(outfit),
                    charged: charge,
                })
            }
            Err(err) => {
                self.enter(SessionStage::TryOnFailed);
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reqwest::blocking::Client as HttpClient;
    use wardrobe_contracts::closet::{Category, NewClothingItem};
    use wardrobe_contracts::store::WardrobeStore;

    use super::*;
    use crate::errors::{SelectionError, EMPTY_CLOSET_MESSAGE};
    use crate::normalizer::tests::write_png;
    use crate::normalizer::ImageNormalizer;
    use crate::selector::tests::ScriptedTextModel;
    use crate::storage::StorageCleanup;
    use crate::tryon::tests::{image_reply, rate_limited, RecordingPause, ScriptedImageModel};
    use crate::tryon::{Pause, RetryPolicy};
    use crate::upstream::ImageModel;
    use crate::usage::UsageGate;

    struct Fixture {
        _temp: tempfile::TempDir,
        session: GenerationSession,
        gate: UsageGate,
        persister: OutfitPersister,
        image_model: Arc<ScriptedImageModel>,
        identity: Identity,
    }

    fn fixture(
        stock_closet: bool,
        image_model: Arc<ScriptedImageModel>,
    ) -> anyhow::Result<Fixture> {
        let temp = tempfile::tempdir()?;
        let static_root = temp.path().join("public");
        write_png(&static_root.join("body.png"), 60, 120)?;
        write_png(&static_root.join("shirt.png"), 40, 40)?;

        let store = Arc::new(WardrobeStore::open(temp.path().join("wardrobe.json")));
        let identity = Identity::user("user_ada", "ada@example.com");
        let mut reply = r#"{"selectedItemIds":[],"reasoning":"nothing"}"#.to_string();
        if stock_closet {
            let saved = store.insert_clothing_items(
                "user_ada",
                vec![NewClothingItem {
                    image_url: "/shirt.png".to_string(),
                    category: Category::Top,
                    sub_category: None,
                    description: Some("linen shirt".to_string()),
                }],
            )?;
            reply = format!(
                r#"{{"selectedItemIds":["{}"],"reasoning":"breezy"}}"#,
                saved[0].id
            );
        }

        let events = EventLog::disabled();
        let gate = UsageGate::new(Arc::clone(&store), events.clone());
        let selector = OutfitSelector::new(
            Arc::clone(&store),
            gate.clone(),
            ScriptedTextModel::replying(&reply),
            events.clone(),
        );
        let renderer = TryOnRenderer::new(
            ImageNormalizer::new(&static_root, HttpClient::new()),
            Arc::clone(&image_model) as Arc<dyn ImageModel>,
            events.clone(),
        )
        .with_retry(
            RetryPolicy::default(),
            Arc::new(RecordingPause::default()) as Arc<dyn Pause>,
        );
        let cleanup = StorageCleanup::new(None, "utfs.io", events.clone());
        let persister = OutfitPersister::new(Arc::clone(&store), gate.clone(), cleanup, events.clone());
        let session = GenerationSession::new(
            identity.clone(),
            selector,
            renderer,
            persister.clone(),
            events,
        );
        Ok(Fixture {
            _temp: temp,
            session,
            gate,
            persister,
            image_model,
            identity,
        })
    }

    fn used(f: &Fixture) -> anyhow::Result<u32> {
        Ok(f.gate.subscription_info(&f.identity)?.generations_used)
    }

    #[test]
    fn try_on_before_select_is_rejected() -> anyhow::Result<()> {
        let mut f = fixture(true, ScriptedImageModel::new(vec![], image_reply))?;
        assert!(matches!(
            f.session.try_on("/body.png"),
            Err(SessionError::InvalidTransition { state: "idle", .. })
        ));
        Ok(())
    }

    #[test]
    fn repeated_try_ons_persist_each_but_charge_once() -> anyhow::Result<()> {
        let mut f = fixture(true, ScriptedImageModel::new(vec![], image_reply))?;
        f.session.select("beach day")?;
        assert_eq!(f.session.stage(), SessionStage::Selected);

        let first = f.session.try_on("/body.png")?;
        assert!(first.charged);
        assert_eq!(f.session.stage(), SessionStage::TriedOn);
        let second = f.session.try_on("/body.png")?;
        assert!(!second.charged);
        assert!(second.outfit.is_some());

        assert_eq!(used(&f)?, 1);
        let outfits = f.persister.list_outfits(&f.identity)?;
        assert_eq!(outfits.len(), 2);
        assert!(outfits.iter().all(|o| o.occasion == "beach day"));
        Ok(())
    }

    #[test]
    fn new_selection_is_charged_again() -> anyhow::Result<()> {
        let mut f = fixture(true, ScriptedImageModel::new(vec![], image_reply))?;
        f.session.select("office")?;
        f.session.try_on("/body.png")?;
        f.session.select("party")?;
        assert!(!f.session.is_charged());
        assert!(f.session.try_on("/body.png")?.charged);
        assert_eq!(used(&f)?, 2);
        Ok(())
    }

    #[test]
    fn failed_render_is_not_persisted_and_allows_retry() -> anyhow::Result<()> {
        let mut f = fixture(
            true,
            ScriptedImageModel::new(
                vec![
                    rate_limited(),
                    rate_limited(),
                    rate_limited(),
                    rate_limited(),
                    rate_limited(),
                ],
                image_reply,
            ),
        )?;
        f.session.select("gala")?;
        let failed = f.session.try_on("/body.png")?;
        assert!(failed.outfit.is_none());
        assert!(failed.try_on.generation_error.is_some());
        assert_eq!(f.session.stage(), SessionStage::TryOnFailed);
        assert_eq!(used(&f)?, 0);

        let retried = f.session.try_on("/body.png")?;
        assert!(retried.charged);
        assert_eq!(f.session.stage(), SessionStage::TriedOn);
        assert_eq!(f.image_model.request_count(), 6);
        assert_eq!(used(&f)?, 1);
        Ok(())
    }

    #[test]
    fn failed_selection_returns_to_idle() -> anyhow::Result<()> {
        let mut f = fixture(false, ScriptedImageModel::new(vec![], image_reply))?;
        let err = f.session.select("dinner").err();
        assert!(matches!(
            err,
            Some(SessionError::Selection(SelectionError::EmptyCloset))
        ));
        assert_eq!(
            err.map(|e| e.to_string()).as_deref(),
            Some(EMPTY_CLOSET_MESSAGE)
        );
        assert_eq!(f.session.stage(), SessionStage::Idle);
        assert!(f.session.selection().is_none());
        Ok(())
    }
}
