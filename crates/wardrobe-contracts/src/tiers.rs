use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::accounts::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Free,
    Basic,
    Pro,
    Admin,
}

/// Monthly generation allowance of a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "count")]
pub enum Quota {
    Limited(u32),
    Unlimited,
}

impl Quota {
    pub fn allows(self, used: u32) -> bool {
        match self {
            Quota::Limited(limit) => used < limit,
            Quota::Unlimited => true,
        }
    }

    /// `None` means unlimited.
    pub fn remaining(self, used: u32) -> Option<u32> {
        match self {
            Quota::Limited(limit) => Some(limit.saturating_sub(used)),
            Quota::Unlimited => None,
        }
    }

    pub fn limit(self) -> Option<u32> {
        match self {
            Quota::Limited(limit) => Some(limit),
            Quota::Unlimited => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierSpec {
    pub name: &'static str,
    pub price_usd: f64,
    pub quota: Quota,
    pub description: &'static str,
    pub features: &'static [&'static str],
}

const FREE: TierSpec = TierSpec {
    name: "Free",
    price_usd: 0.0,
    quota: Quota::Limited(5),
    description: "Perfect for trying out LookLab",
    features: &[
        "5 outfit generations per month",
        "Access to all clothing categories",
        "Virtual try-on included",
    ],
};

const BASIC: TierSpec = TierSpec {
    name: "Basic",
    price_usd: 9.99,
    quota: Quota::Limited(30),
    description: "Great for regular users",
    features: &[
        "30 outfit generations per month",
        "Access to all clothing categories",
        "Virtual try-on included",
        "Priority support",
    ],
};

const PRO: TierSpec = TierSpec {
    name: "Pro",
    price_usd: 19.99,
    quota: Quota::Limited(100),
    description: "For fashion enthusiasts",
    features: &[
        "100 outfit generations per month",
        "Access to all clothing categories",
        "Virtual try-on included",
        "Priority support",
        "Early access to new features",
    ],
};

const ADMIN: TierSpec = TierSpec {
    name: "Admin",
    price_usd: 0.0,
    quota: Quota::Unlimited,
    description: "Unlimited access",
    features: &[
        "Unlimited outfit generations",
        "Full admin access",
        "All features included",
    ],
};

impl SubscriptionTier {
    pub const ALL: [SubscriptionTier; 4] = [
        SubscriptionTier::Free,
        SubscriptionTier::Basic,
        SubscriptionTier::Pro,
        SubscriptionTier::Admin,
    ];

    pub fn spec(self) -> &'static TierSpec {
        match self {
            SubscriptionTier::Free => &FREE,
            SubscriptionTier::Basic => &BASIC,
            SubscriptionTier::Pro => &PRO,
            SubscriptionTier::Admin => &ADMIN,
        }
    }

    pub fn quota(self) -> Quota {
        self.spec().quota
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Basic => "basic",
            SubscriptionTier::Pro => "pro",
            SubscriptionTier::Admin => "admin",
        }
    }

    /// Tiers a subscription can be set to; `admin` only comes from the role.
    pub fn is_purchasable(self) -> bool {
        !matches!(self, SubscriptionTier::Admin)
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionTier {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        SubscriptionTier::ALL
            .into_iter()
            .find(|tier| tier.as_str() == normalized)
            .ok_or_else(|| format!("unknown subscription tier '{raw}'"))
    }
}

/// Admins bypass the subscription table entirely.
pub fn effective_tier(role: Role, tier: SubscriptionTier) -> SubscriptionTier {
    match role {
        Role::Admin => SubscriptionTier::Admin,
        Role::User => tier,
    }
}

/// `YYYY-MM` key of the UTC calendar month containing `now`.
pub fn month_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn tier_table_quotas() {
        assert_eq!(SubscriptionTier::Free.quota(), Quota::Limited(5));
        assert_eq!(SubscriptionTier::Basic.quota(), Quota::Limited(30));
        assert_eq!(SubscriptionTier::Pro.quota(), Quota::Limited(100));
        assert_eq!(SubscriptionTier::Admin.quota(), Quota::Unlimited);
    }

    #[test]
    fn quota_blocks_at_limit_and_never_goes_negative() {
        let quota = Quota::Limited(5);
        assert!(quota.allows(4));
        assert!(!quota.allows(5));
        assert!(!quota.allows(9));
        assert_eq!(quota.remaining(3), Some(2));
        assert_eq!(quota.remaining(9), Some(0));
        assert!(Quota::Unlimited.allows(u32::MAX));
        assert_eq!(Quota::Unlimited.remaining(10_000), None);
    }

    #[test]
    fn admin_role_overrides_subscription() {
        assert_eq!(
            effective_tier(Role::Admin, SubscriptionTier::Free),
            SubscriptionTier::Admin
        );
        assert_eq!(
            effective_tier(Role::User, SubscriptionTier::Pro),
            SubscriptionTier::Pro
        );
    }

    #[test]
    fn month_key_is_utc_year_month() {
        let now = Utc.with_ymd_and_hms(2026, 3, 31, 23, 59, 59).unwrap();
        assert_eq!(month_key(now), "2026-03");
    }

    #[test]
    fn tier_parses_and_admin_is_not_purchasable() {
        assert_eq!("PRO".parse::<SubscriptionTier>(), Ok(SubscriptionTier::Pro));
        assert!(!SubscriptionTier::Admin.is_purchasable());
        assert!(SubscriptionTier::Basic.is_purchasable());
    }
}
