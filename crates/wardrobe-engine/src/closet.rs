use std::sync::Arc;

use serde_json::json;
use wardrobe_contracts::closet::{
    default_mannequins, BodyProfile, ClothingItem, NewClothingItem, Outfit, DEFAULT_PROFILE_NAME,
};
use wardrobe_contracts::events::EventLog;
use wardrobe_contracts::store::WardrobeStore;

use crate::errors::{AccessError, PersistError};
use crate::identity::Identity;
use crate::map_object;
use crate::optimistic::OptimisticList;
use crate::persister::OutfitPersister;
use crate::storage::StorageCleanup;

/// Clothing items and body profiles owned by the caller.
#[derive(Clone)]
pub struct ClosetService {
    store: Arc<WardrobeStore>,
    cleanup: StorageCleanup,
    events: EventLog,
}

impl ClosetService {
    pub fn new(store: Arc<WardrobeStore>, cleanup: StorageCleanup, events: EventLog) -> Self {
        Self {
            store,
            cleanup,
            events,
        }
    }

    pub fn save_clothing_item(
        &self,
        identity: &Identity,
        item: NewClothingItem,
    ) -> Result<ClothingItem, AccessError> {
        let mut saved = self.save_clothing_items(identity, vec![item])?;
        saved
            .pop()
            .ok_or_else(|| AccessError::Store(anyhow::anyhow!("clothing item was not stored")))
    }

    /// Empty batches write nothing.
    pub fn save_clothing_items(
        &self,
        identity: &Identity,
        items: Vec<NewClothingItem>,
    ) -> Result<Vec<ClothingItem>, AccessError> {
        let owner_id = identity.external_id()?;
        let saved = self.store.insert_clothing_items(owner_id, items)?;
        if !saved.is_empty() {
            self.events.for_actor(identity.actor()).note(
                "clothing_items_saved",
                map_object(json!({
                    "ids": saved.iter().map(|item| item.id.as_str()).collect::<Vec<_>>(),
                })),
            );
        }
        Ok(saved)
    }

    /// Newest first.
    pub fn get_clothing_items(&self, identity: &Identity) -> Result<Vec<ClothingItem>, AccessError> {
        let owner_id = identity.external_id()?;
        Ok(self.store.list_clothing_items(owner_id)?)
    }

    pub fn delete_clothing_item(
        &self,
        identity: &Identity,
        id: &str,
    ) -> Result<Option<ClothingItem>, AccessError> {
        let owner_id = identity.external_id()?;
        let removed = self.store.delete_clothing_item(owner_id, id)?;
        if let Some(item) = removed.as_ref() {
            self.cleanup.release(&item.image_url);
        }
        Ok(removed)
    }

    /// A blank or missing name becomes "My Profile".
    pub fn save_body_profile(
        &self,
        identity: &Identity,
        image_url: &str,
        name: Option<&str>,
    ) -> Result<BodyProfile, AccessError> {
        let owner_id = identity.external_id()?;
        let name = name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_PROFILE_NAME);
        Ok(self.store.insert_body_profile(owner_id, image_url, name)?)
    }

    /// The caller's profiles newest first, then the two mannequins.
    pub fn get_body_profiles(&self, identity: &Identity) -> Result<Vec<BodyProfile>, AccessError> {
        let owner_id = identity.external_id()?;
        let mut profiles = self.store.list_body_profiles(owner_id)?;
        profiles.extend(default_mannequins());
        Ok(profiles)
    }

    /// Mannequins are not stored rows, so deleting one is a no-op.
    pub fn delete_body_profile(
        &self,
        identity: &Identity,
        id: &str,
    ) -> Result<Option<BodyProfile>, AccessError> {
        let owner_id = identity.external_id()?;
        let removed = self.store.delete_body_profile(owner_id, id)?;
        if let Some(profile) = removed.as_ref() {
            self.cleanup.release(&profile.image_url);
        }
        Ok(removed)
    }
}

/// Client-side snapshot of a closet with optimistic deletes.
pub struct ClosetView {
    identity: Identity,
    closet: ClosetService,
    persister: OutfitPersister,
    pub items: OptimisticList<ClothingItem>,
    pub profiles: OptimisticList<BodyProfile>,
    pub outfits: OptimisticList<Outfit>,
}

impl ClosetView {
    pub fn load(
        identity: Identity,
        closet: ClosetService,
        persister: OutfitPersister,
    ) -> Result<Self, PersistError> {
        let items = closet.get_clothing_items(&identity)?;
        let profiles = closet.get_body_profiles(&identity)?;
        let outfits = persister.list_outfits(&identity)?;
        Ok(Self {
            identity,
            closet,
            persister,
            items: OptimisticList::new(items),
            profiles: OptimisticList::new(profiles),
            outfits: OptimisticList::new(outfits),
        })
    }

    pub fn delete_item(&mut self, id: &str) -> Result<Option<ClothingItem>, AccessError> {
        let (closet, identity) = (&self.closet, &self.identity);
        self.items
            .remove_with(|item| item.id == id, |_| closet.delete_clothing_item(identity, id))
    }

    pub fn delete_profile(&mut self, id: &str) -> Result<Option<BodyProfile>, AccessError> {
        let (closet, identity) = (&self.closet, &self.identity);
        self.profiles.remove_with(
            |profile| profile.id == id && !profile.is_default,
            |_| closet.delete_body_profile(identity, id),
        )
    }

    pub fn delete_outfit(&mut self, id: &str) -> Result<Option<Outfit>, PersistError> {
        let (persister, identity) = (&self.persister, &self.identity);
        self.outfits
            .remove_with(|outfit| outfit.id == id, |_| persister.delete_outfit(identity, id))
    }
}
