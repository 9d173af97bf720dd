use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::accounts::{Role, UsageRecord, UserAccount};
use crate::closet::{BodyProfile, ClothingItem, NewClothingItem, NewOutfit, Outfit};
use crate::tiers::SubscriptionTier;

const SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Tables {
    #[serde(default)]
    schema_version: u64,
    #[serde(default)]
    users: Vec<UserAccount>,
    #[serde(default)]
    clothing_items: Vec<ClothingItem>,
    #[serde(default)]
    body_profiles: Vec<BodyProfile>,
    #[serde(default)]
    outfits: Vec<Outfit>,
    #[serde(default)]
    usage: Vec<UsageRecord>,
}

/// JSON-file backed row store for accounts, closets, outfits and usage.
///
/// Every operation re-reads the file under the store lock and, for writes,
/// replaces it atomically before releasing the lock, so each call is a
/// single read-modify-write with respect to other callers sharing the store.
#[derive(Debug)]
pub struct WardrobeStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl WardrobeStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ---- accounts -------------------------------------------------------

    pub fn find_user_by_external_id(&self, external_id: &str) -> Result<Option<UserAccount>> {
        self.read(|tables| {
            tables
                .users
                .iter()
                .find(|user| user.external_id == external_id)
                .cloned()
        })
    }

    /// Only writes the file when the account is new.
    pub fn get_or_create_user(&self, external_id: &str, email: &str) -> Result<UserAccount> {
        if let Some(existing) = self.find_user_by_external_id(external_id)? {
            return Ok(existing);
        }
        self.update(|tables| {
            if let Some(existing) = tables
                .users
                .iter()
                .find(|user| user.external_id == external_id)
            {
                return existing.clone();
            }
            let now = Utc::now();
            let user = UserAccount {
                id: new_id(),
                external_id: external_id.to_string(),
                email: email.to_string(),
                role: Role::User,
                subscription_tier: SubscriptionTier::Free,
                created_at: now,
                updated_at: now,
            };
            tables.users.push(user.clone());
            user
        })
    }

    pub fn list_users(&self) -> Result<Vec<UserAccount>> {
        self.read(|tables| tables.users.clone())
    }

    pub fn any_admin(&self) -> Result<bool> {
        self.read(|tables| tables.users.iter().any(|user| user.role == Role::Admin))
    }

    /// Returns the updated account, or `None` when no account has `user_id`.
    pub fn set_user_role(&self, user_id: &str, role: Role) -> Result<Option<UserAccount>> {
        self.update_user(user_id, |user| user.role = role)
    }

    pub fn set_user_tier(
        &self,
        user_id: &str,
        tier: SubscriptionTier,
    ) -> Result<Option<UserAccount>> {
        if !tier.is_purchasable() {
            return Err(anyhow!("tier '{tier}' cannot be assigned to a subscription"));
        }
        self.update_user(user_id, |user| user.subscription_tier = tier)
    }

    fn update_user(
        &self,
        user_id: &str,
        apply: impl FnOnce(&mut UserAccount),
    ) -> Result<Option<UserAccount>> {
        self.update(|tables| {
            let user = tables.users.iter_mut().find(|user| user.id == user_id)?;
            apply(user);
            user.updated_at = Utc::now();
            Some(user.clone())
        })
    }

    // ---- closet ---------------------------------------------------------

    pub fn insert_clothing_items(
        &self,
        owner_id: &str,
        items: Vec<NewClothingItem>,
    ) -> Result<Vec<ClothingItem>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        self.update(|tables| {
            let created_at = Utc::now();
            let rows = items
                .into_iter()
                .map(|item| ClothingItem {
                    id: new_id(),
                    owner_id: owner_id.to_string(),
                    image_url: item.image_url,
                    category: item.category,
                    sub_category: item.sub_category,
                    description: item.description,
                    created_at,
                })
                .collect::<Vec<_>>();
            tables.clothing_items.extend(rows.iter().cloned());
            rows
        })
    }

    /// Newest first.
    pub fn list_clothing_items(&self, owner_id: &str) -> Result<Vec<ClothingItem>> {
        self.read(|tables| {
            newest_first(
                tables
                    .clothing_items
                    .iter()
                    .filter(|item| item.owner_id == owner_id),
                |item| item.created_at,
            )
        })
    }

    pub fn delete_clothing_item(&self, owner_id: &str, id: &str) -> Result<Option<ClothingItem>> {
        self.update(|tables| {
            take_where(&mut tables.clothing_items, |item| {
                item.id == id && item.owner_id == owner_id
            })
        })
    }

    // ---- body profiles --------------------------------------------------

    pub fn insert_body_profile(
        &self,
        owner_id: &str,
        image_url: &str,
        name: &str,
    ) -> Result<BodyProfile> {
        self.update(|tables| {
            let profile = BodyProfile {
                id: new_id(),
                owner_id: owner_id.to_string(),
                image_url: image_url.to_string(),
                name: name.to_string(),
                is_default: false,
                created_at: Utc::now(),
            };
            tables.body_profiles.push(profile.clone());
            profile
        })
    }

    /// Newest first; synthetic profiles are not stored here.
    pub fn list_body_profiles(&self, owner_id: &str) -> Result<Vec<BodyProfile>> {
        self.read(|tables| {
            newest_first(
                tables
                    .body_profiles
                    .iter()
                    .filter(|profile| profile.owner_id == owner_id),
                |profile| profile.created_at,
            )
        })
    }

    pub fn delete_body_profile(&self, owner_id: &str, id: &str) -> Result<Option<BodyProfile>> {
        self.update(|tables| {
            take_where(&mut tables.body_profiles, |profile| {
                profile.id == id && profile.owner_id == owner_id
            })
        })
    }

    // ---- outfits --------------------------------------------------------

    pub fn insert_outfit(&self, owner_id: &str, outfit: NewOutfit) -> Result<Outfit> {
        self.update(|tables| {
            let row = Outfit {
                id: new_id(),
                owner_id: owner_id.to_string(),
                occasion: outfit.occasion,
                generated_image_url: outfit.generated_image_url,
                items_used: outfit.items_used,
                created_at: Utc::now(),
            };
            tables.outfits.push(row.clone());
            row
        })
    }

    pub fn list_outfits(&self, owner_id: &str) -> Result<Vec<Outfit>> {
        self.read(|tables| {
            newest_first(
                tables
                    .outfits
                    .iter()
                    .filter(|outfit| outfit.owner_id == owner_id),
                |outfit| outfit.created_at,
            )
        })
    }

    pub fn delete_outfit(&self, owner_id: &str, id: &str) -> Result<Option<Outfit>> {
        self.update(|tables| {
            take_where(&mut tables.outfits, |outfit| {
                outfit.id == id && outfit.owner_id == owner_id
            })
        })
    }

    // ---- usage ----------------------------------------------------------

    /// The `(user, month)` record, created with zero usage on first access.
    /// Only writes the file when the record is new.
    pub fn usage_for_month(&self, user_id: &str, month: &str) -> Result<UsageRecord> {
        let existing = self.read(|tables| {
            tables
                .usage
                .iter()
                .find(|row| row.user_id == user_id && row.month == month)
                .cloned()
        })?;
        if let Some(row) = existing {
            return Ok(row);
        }
        self.update(|tables| usage_row(tables, user_id, month).clone())
    }

    /// Adds one generation to `(user, month)` in a single locked
    /// read-modify-write.
    pub fn increment_usage(&self, user_id: &str, month: &str) -> Result<UsageRecord> {
        self.update(|tables| {
            let row = usage_row(tables, user_id, month);
            row.generations_used = row.generations_used.saturating_add(1);
            row.updated_at = Utc::now();
            row.clone()
        })
    }

    /// Every month recorded for the user, newest month first.
    pub fn usage_history(&self, user_id: &str) -> Result<Vec<UsageRecord>> {
        self.read(|tables| {
            let mut rows = tables
                .usage
                .iter()
                .filter(|row| row.user_id == user_id)
                .cloned()
                .collect::<Vec<_>>();
            rows.sort_by(|left, right| right.month.cmp(&left.month));
            rows
        })
    }

    // ---- file access ----------------------------------------------------

    fn read<T>(&self, view: impl FnOnce(&Tables) -> T) -> Result<T> {
        let _guard = self.guard()?;
        let tables = self.load()?;
        Ok(view(&tables))
    }

    fn update<T>(&self, apply: impl FnOnce(&mut Tables) -> T) -> Result<T> {
        let _guard = self.guard()?;
        let mut tables = self.load()?;
        let out = apply(&mut tables);
        tables.schema_version = SCHEMA_VERSION;
        self.persist(&tables)?;
        Ok(out)
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| anyhow!("wardrobe store lock poisoned"))
    }

    fn load(&self) -> Result<Tables> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Tables::default())
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed reading {}", self.path.display()))
            }
        };
        if raw.trim().is_empty() {
            return Ok(Tables::default());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("{} is not a valid wardrobe store", self.path.display()))
    }

    fn persist(&self, tables: &Tables) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let staging = self.path.with_extension("json.tmp");
        std::fs::write(&staging, serde_json::to_string_pretty(tables)?)
            .with_context(|| format!("failed to write {}", staging.display()))?;
        std::fs::rename(&staging, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

fn usage_row<'a>(tables: &'a mut Tables, user_id: &str, month: &str) -> &'a mut UsageRecord {
    let index = match tables
        .usage
        .iter()
        .position(|row| row.user_id == user_id && row.month == month)
    {
        Some(index) => index,
        None => {
            tables.usage.push(UsageRecord {
                user_id: user_id.to_string(),
                month: month.to_string(),
                generations_used: 0,
                updated_at: Utc::now(),
            });
            tables.usage.len() - 1
        }
    };
    &mut tables.usage[index]
}

/// Later insertions win ties so a batch reads back newest-inserted first.
fn newest_first<'a, T: Clone + 'a>(
    rows: impl DoubleEndedIterator<Item = &'a T>,
    created_at: impl Fn(&T) -> DateTime<Utc>,
) -> Vec<T> {
    let mut out = rows.rev().cloned().collect::<Vec<T>>();
    out.sort_by_key(|row| std::cmp::Reverse(created_at(row)));
    out
}

fn take_where<T>(rows: &mut Vec<T>, matches: impl Fn(&T) -> bool) -> Option<T> {
    let index = rows.iter().position(matches)?;
    Some(rows.remove(index))
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use crate::closet::Category;

    use super::*;

    fn item(url: &str, category: Category) -> NewClothingItem {
        NewClothingItem {
            image_url: url.to_string(),
            category,
            sub_category: None,
            description: None,
        }
    }

    #[test]
    fn missing_file_reads_as_empty_store() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let store = WardrobeStore::open(temp.path().join("wardrobe.json"));
        assert!(store.list_clothing_items("user_1")?.is_empty());
        assert!(store.list_users()?.is_empty());
        Ok(())
    }

    #[test]
    fn get_or_create_user_is_stable() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let store = WardrobeStore::open(temp.path().join("wardrobe.json"));
        let first = store.get_or_create_user("user_1", "a@example.com")?;
        let second = store.get_or_create_user("user_1", "other@example.com")?;
        assert_eq!(first, second);
        assert_eq!(first.role, Role::User);
        assert_eq!(first.subscription_tier, SubscriptionTier::Free);
        assert_eq!(store.list_users()?.len(), 1);
        Ok(())
    }

    #[test]
    fn clothing_items_are_scoped_to_owner_and_newest_first() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let store = WardrobeStore::open(temp.path().join("wardrobe.json"));
        store.insert_clothing_items("user_1", vec![item("/a.png", Category::Top)])?;
        store.insert_clothing_items("user_2", vec![item("/b.png", Category::Shoes)])?;
        store.insert_clothing_items("user_1", vec![item("/c.png", Category::Bottom)])?;

        let items = store.list_clothing_items("user_1")?;
        assert_eq!(
            items.iter().map(|i| i.image_url.as_str()).collect::<Vec<_>>(),
            vec!["/c.png", "/a.png"]
        );
        Ok(())
    }

    #[test]
    fn delete_requires_matching_owner() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let store = WardrobeStore::open(temp.path().join("wardrobe.json"));
        let rows = store.insert_clothing_items("user_1", vec![item("/a.png", Category::Top)])?;
        let id = rows[0].id.clone();

        assert!(store.delete_clothing_item("user_2", &id)?.is_none());
        assert_eq!(store.list_clothing_items("user_1")?.len(), 1);
        assert!(store.delete_clothing_item("user_1", &id)?.is_some());
        assert!(store.list_clothing_items("user_1")?.is_empty());
        Ok(())
    }

    #[test]
    fn usage_record_is_created_lazily_and_incremented() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let store = WardrobeStore::open(temp.path().join("wardrobe.json"));
        assert_eq!(store.usage_for_month("u", "2026-10")?.generations_used, 0);
        store.increment_usage("u", "2026-10")?;
        store.increment_usage("u", "2026-10")?;
        store.increment_usage("u", "2026-09")?;
        assert_eq!(store.usage_for_month("u", "2026-10")?.generations_used, 2);

        let history = store.usage_history("u")?;
        assert_eq!(
            history.iter().map(|r| r.month.as_str()).collect::<Vec<_>>(),
            vec!["2026-10", "2026-09"]
        );
        Ok(())
    }

    #[test]
    fn concurrent_increments_are_not_lost() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let store = Arc::new(WardrobeStore::open(temp.path().join("wardrobe.json")));
        let handles = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.increment_usage("u", "2026-10").map(|_| ()))
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().map_err(|_| anyhow!("increment thread panicked"))??;
        }
        assert_eq!(store.usage_for_month("u", "2026-10")?.generations_used, 8);
        Ok(())
    }

    #[test]
    fn admin_tier_cannot_be_assigned() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let store = WardrobeStore::open(temp.path().join("wardrobe.json"));
        let user = store.get_or_create_user("user_1", "")?;
        assert!(store.set_user_tier(&user.id, SubscriptionTier::Admin).is_err());
        let updated = store.set_user_tier(&user.id, SubscriptionTier::Pro)?;
        assert_eq!(
            updated.map(|u| u.subscription_tier),
            Some(SubscriptionTier::Pro)
        );
        assert!(store.set_user_role("missing", Role::Admin)?.is_none());
        Ok(())
    }

    #[test]
    fn corrupt_file_is_reported() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("wardrobe.json");
        std::fs::write(&path, "{not json")?;
        let store = WardrobeStore::open(&path);
        let err = store.list_outfits("u").err().map(|e| format!("{e:#}"));
        assert!(err.unwrap_or_default().contains("not a valid wardrobe store"));
        Ok(())
    }

    #[test]
    fn lookups_of_existing_rows_leave_file_untouched() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("wardrobe.json");
        let store = WardrobeStore::open(&path);
        let user = store.get_or_create_user("user_1", "a@example.com")?;
        store.usage_for_month(&user.id, "2026-10")?;

        // Compact rewrite: any later persist would pretty-print it again.
        let compact = serde_json::to_string(&serde_json::from_str::<serde_json::Value>(
            &std::fs::read_to_string(&path)?,
        )?)?;
        std::fs::write(&path, &compact)?;

        assert_eq!(store.get_or_create_user("user_1", "")?, user);
        assert_eq!(store.usage_for_month(&user.id, "2026-10")?.generations_used, 0);
        assert_eq!(std::fs::read_to_string(&path)?, compact);

        store.usage_for_month(&user.id, "2026-11")?;
        assert_ne!(std::fs::read_to_string(&path)?, compact);
        Ok(())
    }
}
