use std::sync::Arc;

use serde_json::json;
use wardrobe_contracts::closet::{NewOutfit, Outfit};
use wardrobe_contracts::events::EventLog;
use wardrobe_contracts::store::WardrobeStore;

use crate::errors::PersistError;
use crate::identity::Identity;
use crate::map_object;
use crate::storage::StorageCleanup;
use crate::usage::UsageGate;

/// Writes finished try-ons and charges them against the monthly quota.
#[derive(Clone)]
pub struct OutfitPersister {
    store: Arc<WardrobeStore>,
    gate: UsageGate,
    cleanup: StorageCleanup,
    events: EventLog,
}

impl OutfitPersister {
    pub fn new(
        store: Arc<WardrobeStore>,
        gate: UsageGate,
        cleanup: StorageCleanup,
        events: EventLog,
    ) -> Self {
        Self {
            store,
            gate,
            cleanup,
            events,
        }
    }

    /// Inserts the outfit, then increments usage exactly once.
    pub fn save_outfit(&self, identity: &Identity, outfit: NewOutfit) -> Result<Outfit, PersistError> {
        self.store_outfit(identity, outfit, true)
    }

    /// Inserts the outfit and charges usage only when `charge` is set.
    pub(crate) fn store_outfit(
        &self,
        identity: &Identity,
        outfit: NewOutfit,
        charge: bool,
    ) -> Result<Outfit, PersistError> {
        let owner_id = identity.external_id()?;
        let saved = self.store.insert_outfit(owner_id, outfit)?;
        if charge {
            self.gate.increment_generations(identity)?;
        }
        self.events.for_actor(identity.actor()).note(
            "outfit_saved",
            map_object(json!({
                "outfit_id": saved.id,
                "occasion": saved.occasion,
                "items_used": saved.items_used,
                "charged": charge,
            })),
        );
        Ok(saved)
    }

    pub fn list_outfits(&self, identity: &Identity) -> Result<Vec<Outfit>, PersistError> {
        let owner_id = identity.external_id()?;
        Ok(self.store.list_outfits(owner_id)?)
    }

    /// Removes the caller's outfit; the hosted image is released best-effort
    /// after the row is gone. Unknown or foreign ids are a no-op.
    pub fn delete_outfit(&self, identity: &Identity, id: &str) -> Result<Option<Outfit>, PersistError> {
        let owner_id = identity.external_id()?;
        let removed = self.store.delete_outfit(owner_id, id)?;
        if let Some(outfit) = removed.as_ref() {
            self.cleanup.release(&outfit.generated_image_url);
        }
        Ok(removed)
    }
}
