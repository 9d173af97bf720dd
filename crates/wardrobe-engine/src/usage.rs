use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use wardrobe_contracts::accounts::{Role, UsageRecord, UserAccount};
use wardrobe_contracts::events::EventLog;
use wardrobe_contracts::store::WardrobeStore;
use wardrobe_contracts::tiers::{effective_tier, month_key, SubscriptionTier};

use crate::errors::AccessError;
use crate::identity::Identity;
use crate::map_object;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationLimit {
    pub allowed: bool,
    /// `None` means unlimited.
    pub remaining: Option<u32>,
    pub tier_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    pub tier: SubscriptionTier,
    pub tier_name: String,
    pub generations_used: u32,
    pub generations_limit: Option<u32>,
    pub remaining: Option<u32>,
    pub role: Role,
}

/// Per-user, per-month generation metering against the tier table.
///
/// Checking never consumes quota. Consumption happens through
/// [`UsageGate::increment_generations`] once a try-on has succeeded, so two
/// generations racing past the check can both complete and overrun the
/// quota by one each; the increment itself never loses updates.
#[derive(Debug, Clone)]
pub struct UsageGate {
    store: Arc<WardrobeStore>,
    events: EventLog,
}

impl UsageGate {
    pub fn new(store: Arc<WardrobeStore>, events: EventLog) -> Self {
        Self { store, events }
    }

    /// The caller's local account, created on first sight.
    pub fn account(&self, identity: &Identity) -> Result<UserAccount, AccessError> {
        let external_id = identity.external_id()?;
        Ok(self.store.get_or_create_user(external_id, identity.email())?)
    }

    fn current_usage(&self, identity: &Identity) -> Result<(UserAccount, UsageRecord), AccessError> {
        let account = self.account(identity)?;
        let usage = self
            .store
            .usage_for_month(&account.id, &month_key(Utc::now()))?;
        Ok((account, usage))
    }

    pub fn check_generation_limit(&self, identity: &Identity) -> Result<GenerationLimit, AccessError> {
        let (account, usage) = self.current_usage(identity)?;
        let tier = effective_tier(account.role, account.subscription_tier);
        let quota = tier.quota();
        Ok(GenerationLimit {
            allowed: quota.allows(usage.generations_used),
            remaining: quota.remaining(usage.generations_used),
            tier_name: tier.spec().name.to_string(),
        })
    }

    pub fn increment_generations(&self, identity: &Identity) -> Result<UsageRecord, AccessError> {
        let account = self.account(identity)?;
        let record = self
            .store
            .increment_usage(&account.id, &month_key(Utc::now()))?;
        self.events.for_actor(identity.actor()).note(
            "generation_counted",
            map_object(json!({
                "month": record.month,
                "generations_used": record.generations_used,
            })),
        );
        Ok(record)
    }

    pub fn subscription_info(&self, identity: &Identity) -> Result<SubscriptionInfo, AccessError> {
        let (account, usage) = self.current_usage(identity)?;
        let tier = effective_tier(account.role, account.subscription_tier);
        let quota = tier.quota();
        Ok(SubscriptionInfo {
            tier,
            tier_name: tier.spec().name.to_string(),
            generations_used: usage.generations_used,
            generations_limit: quota.limit(),
            remaining: quota.remaining(usage.generations_used),
            role: account.role,
        })
    }

    pub fn usage_history(&self, identity: &Identity) -> Result<Vec<UsageRecord>, AccessError> {
        let account = self.account(identity)?;
        Ok(self.store.usage_history(&account.id)?)
    }
}
