use std::sync::Arc;

use serde_json::json;
use wardrobe_contracts::accounts::{Role, UserAccount};
use wardrobe_contracts::events::EventLog;
use wardrobe_contracts::store::WardrobeStore;
use wardrobe_contracts::tiers::SubscriptionTier;

use crate::errors::AccessError;
use crate::identity::Identity;
use crate::map_object;

/// Account administration. Every operation except the bootstrap requires the
/// caller's existing account to hold the admin role; targets are addressed by
/// account id.
#[derive(Debug, Clone)]
pub struct AdminService {
    store: Arc<WardrobeStore>,
    events: EventLog,
}

impl AdminService {
    pub fn new(store: Arc<WardrobeStore>, events: EventLog) -> Self {
        Self { store, events }
    }

    fn require_admin(&self, identity: &Identity) -> Result<UserAccount, AccessError> {
        let external_id = identity.external_id()?;
        match self.store.find_user_by_external_id(external_id)? {
            Some(account) if account.role == Role::Admin => Ok(account),
            _ => Err(AccessError::AdminRequired),
        }
    }

    pub fn get_all_users(&self, identity: &Identity) -> Result<Vec<UserAccount>, AccessError> {
        self.require_admin(identity)?;
        let mut users = self.store.list_users()?;
        users.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        Ok(users)
    }

    pub fn update_user_role(
        &self,
        identity: &Identity,
        target_user_id: &str,
        role: Role,
    ) -> Result<UserAccount, AccessError> {
        self.require_admin(identity)?;
        let updated = self
            .store
            .set_user_role(target_user_id, role)?
            .ok_or_else(|| AccessError::TargetNotFound(target_user_id.to_string()))?;
        self.events.for_actor(identity.actor()).note(
            "user_role_updated",
            map_object(json!({ "target": target_user_id, "role": role.as_str() })),
        );
        Ok(updated)
    }

    pub fn update_user_tier(
        &self,
        identity: &Identity,
        target_user_id: &str,
        tier: SubscriptionTier,
    ) -> Result<UserAccount, AccessError> {
        self.require_admin(identity)?;
        if !tier.is_purchasable() {
            return Err(AccessError::TierNotAssignable(tier.to_string()));
        }
        let updated = self
            .store
            .set_user_tier(target_user_id, tier)?
            .ok_or_else(|| AccessError::TargetNotFound(target_user_id.to_string()))?;
        self.events.for_actor(identity.actor()).note(
            "user_tier_updated",
            map_object(json!({ "target": target_user_id, "tier": tier.as_str() })),
        );
        Ok(updated)
    }

    /// Promotes the caller when nobody else is an admin yet.
    pub fn make_current_user_admin(&self, identity: &Identity) -> Result<UserAccount, AccessError> {
        let external_id = identity.external_id()?;
        let account = self
            .store
            .find_user_by_external_id(external_id)?
            .ok_or(AccessError::UnknownAccount)?;
        if account.role == Role::Admin {
            return Ok(account);
        }
        if self.store.any_admin()? {
            return Err(AccessError::AdminAlreadyExists);
        }
        let promoted = self
            .store
            .set_user_role(&account.id, Role::Admin)?
            .ok_or(AccessError::UnknownAccount)?;
        self.events
            .for_actor(identity.actor())
            .note("admin_bootstrapped", map_object(json!({ "user_id": promoted.id })));
        Ok(promoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(dir: &std::path::Path) -> (AdminService, Arc<WardrobeStore>) {
        let store = Arc::new(WardrobeStore::open(dir.join("wardrobe.json")));
        (AdminService::new(Arc::clone(&store), EventLog::disabled()), store)
    }

    #[test]
    fn bootstrap_requires_an_account_and_no_other_admin() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (admin, store) = service(temp.path());
        let ada = Identity::user("user_ada", "ada@example.com");
        let bob = Identity::user("user_bob", "bob@example.com");

        let err = admin.make_current_user_admin(&ada).err().map(|e| e.to_string());
        assert_eq!(
            err.as_deref(),
            Some("User not found. Please visit the generator page first to create your account.")
        );

        store.get_or_create_user("user_ada", "ada@example.com")?;
        store.get_or_create_user("user_bob", "bob@example.com")?;
        assert_eq!(admin.make_current_user_admin(&ada)?.role, Role::Admin);
        assert_eq!(admin.make_current_user_admin(&ada)?.role, Role::Admin);

        let err = admin.make_current_user_admin(&bob).err().map(|e| e.to_string());
        assert_eq!(
            err.as_deref(),
            Some("An admin already exists. Contact them to grant you admin access.")
        );
        Ok(())
    }

    #[test]
    fn non_admins_are_refused() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (admin, store) = service(temp.path());
        let bob_account = store.get_or_create_user("user_bob", "")?;
        let bob = Identity::user("user_bob", "");

        let refused = [
            admin.get_all_users(&bob).err(),
            admin
                .update_user_role(&bob, &bob_account.id, Role::Admin)
                .err(),
            admin
                .update_user_tier(&bob, &bob_account.id, SubscriptionTier::Pro)
                .err(),
        ];
        for err in refused {
            assert_eq!(
                err.map(|e| e.to_string()).as_deref(),
                Some("Admin access required")
            );
        }
        assert!(matches!(
            admin.get_all_users(&Identity::Anonymous),
            Err(AccessError::Unauthorized)
        ));
        Ok(())
    }

    #[test]
    fn admin_manages_roles_and_tiers() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (admin, store) = service(temp.path());
        store.get_or_create_user("user_ada", "")?;
        let bob_account = store.get_or_create_user("user_bob", "")?;
        let ada = Identity::user("user_ada", "");
        admin.make_current_user_admin(&ada)?;

        assert_eq!(admin.get_all_users(&ada)?.len(), 2);
        let upgraded = admin.update_user_tier(&ada, &bob_account.id, SubscriptionTier::Basic)?;
        assert_eq!(upgraded.subscription_tier, SubscriptionTier::Basic);
        let promoted = admin.update_user_role(&ada, &bob_account.id, Role::Admin)?;
        assert_eq!(promoted.role, Role::Admin);

        assert!(matches!(
            admin.update_user_tier(&ada, &bob_account.id, SubscriptionTier::Admin),
            Err(AccessError::TierNotAssignable(_))
        ));
        assert!(matches!(
            admin.update_user_role(&ada, "missing", Role::User),
            Err(AccessError::TargetNotFound(_))
        ));
        Ok(())
    }
}
