//! Plan catalogue types: plans, pricing periods, prices and quotas.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{PlanId, PricingId, PrincipalId, QuotaId};

/// A purchasable tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Plan identifier.
    pub id: PlanId,

    /// Display name.
    pub name: String,

    /// Unique stable slug.
    pub slug: String,

    /// Free-form description.
    pub description: String,

    /// Assigned to new principals. At most one plan may be the default.
    pub default: bool,

    /// Can be bought or switched to.
    pub available: bool,

    /// Listed in the catalogue.
    pub visible: bool,

    /// Private plan only visible to this principal.
    pub customized: Option<PrincipalId>,

    /// Sort position in the catalogue.
    pub order: i32,

    /// When the plan was created.
    pub created_at: DateTime<Utc>,
}

impl Plan {
    /// Create an available, visible, non-default plan.
    #[must_use]
    pub fn new(name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            id: PlanId::generate(),
            name: name.into(),
            slug: slug.into(),
            description: String::new(),
            default: false,
            available: true,
            visible: true,
            customized: None,
            order: 0,
            created_at: Utc::now(),
        }
    }

    /// Mark this plan as the default one.
    #[must_use]
    pub fn as_default(mut self) -> Self {
        self.default = true;
        self
    }

    /// Whether `principal` may see this plan in the catalogue.
    #[must_use]
    pub fn is_visible_to(&self, principal: &PrincipalId) -> bool {
        if !self.visible || !self.available {
            return false;
        }
        self.customized.map_or(true, |owner| &owner == principal)
    }
}

/// A period template of N days.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    /// Pricing identifier.
    pub id: PricingId,

    /// Display name ("Monthly", "Yearly"…).
    pub name: String,

    /// Length in days, at least 1.
    pub period: u32,
}

impl Pricing {
    /// Create a pricing period.
    #[must_use]
    pub fn new(name: impl Into<String>, period: u32) -> Self {
        Self {
            id: PricingId::generate(),
            name: name.into(),
            period: period.max(1),
        }
    }
}

/// The price of a plan for a pricing period. Unique per `(plan, pricing)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanPricing {
    /// The plan being priced.
    pub plan_id: PlanId,

    /// The period.
    pub pricing: Pricing,

    /// Net price for the whole period.
    pub price: Decimal,

    /// Whether this price may be renewed automatically.
    pub has_automatic_renewal: bool,

    /// Listed in the catalogue.
    pub visible: bool,
}

impl PlanPricing {
    /// Price `plan_id` at `price` for `pricing`.
    #[must_use]
    pub fn new(plan_id: PlanId, pricing: Pricing, price: Decimal) -> Self {
        Self {
            plan_id,
            pricing,
            price,
            has_automatic_renewal: false,
            visible: true,
        }
    }
}

/// A named, boolean or numeric limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    /// Quota identifier.
    pub id: QuotaId,

    /// Stable identifier matched by validators.
    pub codename: String,

    /// Display name.
    pub name: String,

    /// Unit shown next to numeric values.
    pub unit: String,

    /// Boolean quotas gate a feature rather than limit a count.
    pub is_boolean: bool,
}

impl Quota {
    /// Create a numeric quota.
    #[must_use]
    pub fn new(codename: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: QuotaId::generate(),
            codename: codename.into(),
            name: name.into(),
            unit: String::new(),
            is_boolean: false,
        }
    }
}

/// The value a plan assigns to a quota. `None` means unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanQuota {
    /// The plan.
    pub plan_id: PlanId,

    /// The quota.
    pub quota: Quota,

    /// Limit value, `None` = unlimited.
    pub value: Option<i64>,
}

/// Quota limits of one plan, keyed by codename. `None` means unlimited.
pub type QuotaDict = BTreeMap<String, Option<i64>>;

/// Build the quota dictionary of a plan from its quota assignments.
#[must_use]
pub fn quota_dict(plan_quotas: &[PlanQuota]) -> QuotaDict {
    plan_quotas
        .iter()
        .map(|pq| (pq.quota.codename.clone(), pq.value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn customized_plan_visible_only_to_owner() {
        let owner = PrincipalId::generate();
        let mut plan = Plan::new("Team", "team");
        plan.customized = Some(owner);

        assert!(plan.is_visible_to(&owner));
        assert!(!plan.is_visible_to(&PrincipalId::generate()));
    }

    #[test]
    fn hidden_or_unavailable_plans_are_not_visible() {
        let principal = PrincipalId::generate();
        let mut plan = Plan::new("Legacy", "legacy");
        plan.available = false;
        assert!(!plan.is_visible_to(&principal));

        plan.available = true;
        plan.visible = false;
        assert!(!plan.is_visible_to(&principal));
    }

    #[test]
    fn pricing_period_is_at_least_one_day() {
        assert_eq!(Pricing::new("Broken", 0).period, 1);
    }

    #[test]
    fn quota_dict_keeps_unlimited_values() {
        let plan = Plan::new("Pro", "pro");
        let quotas = vec![
            PlanQuota {
                plan_id: plan.id,
                quota: Quota::new("max_projects", "Projects"),
                value: Some(10),
            },
            PlanQuota {
                plan_id: plan.id,
                quota: Quota::new("max_members", "Members"),
                value: None,
            },
        ];

        let dict = quota_dict(&quotas);
        assert_eq!(dict.get("max_projects"), Some(&Some(10)));
        assert_eq!(dict.get("max_members"), Some(&None));
        assert_eq!(dict.get("missing"), None);
    }
}
