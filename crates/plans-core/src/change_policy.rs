//! Plan-change pricing.
//!
//! Switching plans in the middle of a paid period costs the difference of the two plans'
//! day costs over the remaining days. A `None` price means the switch is free.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{PlansError, Result};
use crate::money::round2;
use crate::plan::{Plan, PlanPricing};

/// A plan together with its prices, as the change policy needs it.
#[derive(Debug, Clone, Copy)]
pub struct PricedPlan<'a> {
    /// The plan.
    pub plan: &'a Plan,
    /// All prices of the plan.
    pub pricings: &'a [PlanPricing],
}

impl<'a> PricedPlan<'a> {
    /// Pair a plan with its prices.
    #[must_use]
    pub const fn new(plan: &'a Plan, pricings: &'a [PlanPricing]) -> Self {
        Self { plan, pricings }
    }

    /// Cost of one day of this plan when bought for roughly `period` days.
    ///
    /// Uses the longest pricing period not exceeding `period`; when every period is longer,
    /// the shortest one.
    ///
    /// # Errors
    ///
    /// Returns [`PlansError::PlanHasNoPricing`] for free plans.
    pub fn day_cost(&self, period: u32) -> Result<Decimal> {
        let mut by_period: Vec<&PlanPricing> = self.pricings.iter().collect();
        by_period.sort_by(|a, b| b.pricing.period.cmp(&a.pricing.period));

        let chosen = by_period
            .iter()
            .find(|pp| pp.pricing.period <= period)
            .or_else(|| by_period.last())
            .ok_or_else(|| PlansError::PlanHasNoPricing {
                plan: self.plan.slug.clone(),
            })?;

        Ok(round2(
            chosen.price / Decimal::from(chosen.pricing.period.max(1)),
        ))
    }
}

/// Decides what a plan switch costs.
pub trait PlanChangePolicy: Send + Sync {
    /// Turn a positive day-cost difference (or `None` for a downgrade) into a price.
    fn final_price(&self, period: u32, day_cost_diff: Option<Decimal>) -> Option<Decimal>;

    /// Price of switching from `old` to `new` with `period` days left.
    ///
    /// `None` means no payment is required.
    ///
    /// # Errors
    ///
    /// Returns [`PlansError::PlanHasNoPricing`] when either plan has no prices.
    fn change_price(
        &self,
        old: PricedPlan<'_>,
        new: PricedPlan<'_>,
        period: Option<i64>,
    ) -> Result<Option<Decimal>> {
        let Some(period) = period.and_then(|p| u32::try_from(p).ok()).filter(|p| *p >= 1)
        else {
            return Ok(None);
        };

        let old_cost = old.day_cost(period)?;
        let new_cost = new.day_cost(period)?;

        if new_cost <= old_cost {
            Ok(self.final_price(period, None))
        } else {
            Ok(self.final_price(period, Some(new_cost - old_cost)))
        }
    }
}

/// Charges exactly the day-cost difference; downgrades are free.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicPlanChangePolicy;

impl PlanChangePolicy for BasicPlanChangePolicy {
    fn final_price(&self, period: u32, day_cost_diff: Option<Decimal>) -> Option<Decimal> {
        day_cost_diff.map(|diff| round2(Decimal::from(period) * diff))
    }
}

/// Charges a surcharge on upgrades and optionally a fixed downgrade fee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardPlanChangePolicy {
    /// Percent added on top of the day-cost difference.
    pub upgrade_percent_rate: Decimal,
    /// Fixed amount added to every upgrade.
    pub upgrade_charge: Decimal,
    /// Upgrades cheaper than this are free.
    pub free_upgrade: Decimal,
    /// Price of a downgrade; `None` makes downgrades free.
    pub downgrade_charge: Option<Decimal>,
}

impl Default for StandardPlanChangePolicy {
    fn default() -> Self {
        Self {
            upgrade_percent_rate: Decimal::TEN,
            upgrade_charge: Decimal::ZERO,
            free_upgrade: Decimal::ZERO,
            downgrade_charge: None,
        }
    }
}

impl PlanChangePolicy for StandardPlanChangePolicy {
    fn final_price(&self, period: u32, day_cost_diff: Option<Decimal>) -> Option<Decimal> {
        let Some(diff) = day_cost_diff else {
            return self.downgrade_charge;
        };
        let rate = Decimal::ONE + self.upgrade_percent_rate / Decimal::ONE_HUNDRED;
        let cost = round2(Decimal::from(period) * diff * rate + self.upgrade_charge);
        (cost >= self.free_upgrade).then_some(cost)
    }
}

/// Which change policy to use, as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangePolicyConfig {
    /// [`BasicPlanChangePolicy`].
    Basic,
    /// [`StandardPlanChangePolicy`] with its settings.
    Standard(StandardPlanChangePolicy),
}

impl Default for ChangePolicyConfig {
    fn default() -> Self {
        Self::Standard(StandardPlanChangePolicy::default())
    }
}

impl ChangePolicyConfig {
    /// Instantiate the configured policy.
    #[must_use]
    pub fn build(&self) -> Arc<dyn PlanChangePolicy> {
        match self {
            Self::Basic => Arc::new(BasicPlanChangePolicy),
            Self::Standard(policy) => Arc::new(policy.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Pricing;
    use rust_decimal_macros::dec;

    fn priced(slug: &str, prices: &[(u32, Decimal)]) -> (Plan, Vec<PlanPricing>) {
        let plan = Plan::new(slug, slug);
        let pricings = prices
            .iter()
            .map(|(period, price)| {
                PlanPricing::new(plan.id, Pricing::new(format!("{period}d"), *period), *price)
            })
            .collect();
        (plan, pricings)
    }

    #[test]
    fn day_cost_picks_longest_period_within_request() {
        let (plan, pricings) = priced("x", &[(30, dec!(30)), (365, dec!(300)), (7, dec!(14))]);
        let priced = PricedPlan::new(&plan, &pricings);
        assert_eq!(priced.day_cost(400).unwrap(), dec!(0.82));
        assert_eq!(priced.day_cost(60).unwrap(), dec!(1.00));
        assert_eq!(priced.day_cost(10).unwrap(), dec!(2.00));
    }

    #[test]
    fn day_cost_falls_back_to_shortest_pricing() {
        let (plan, pricings) = priced("x", &[(30, dec!(30)), (365, dec!(300))]);
        assert_eq!(PricedPlan::new(&plan, &pricings).day_cost(3).unwrap(), dec!(1.00));
    }

    #[test]
    fn day_cost_of_free_plan_is_an_error() {
        let (plan, pricings) = priced("free", &[]);
        assert!(matches!(
            PricedPlan::new(&plan, &pricings).day_cost(30),
            Err(PlansError::PlanHasNoPricing { .. })
        ));
    }

    #[test]
    fn basic_upgrade_costs_day_difference() {
        let (x, xp) = priced("x", &[(30, dec!(20))]);
        let (y, yp) = priced("y", &[(30, dec!(50))]);
        let price = BasicPlanChangePolicy
            .change_price(PricedPlan::new(&x, &xp), PricedPlan::new(&y, &yp), Some(23))
            .unwrap();
        assert_eq!(price, Some(dec!(23.00)));
    }

    #[test]
    fn basic_downgrade_and_empty_period_are_free() {
        let (x, xp) = priced("x", &[(30, dec!(20))]);
        let (y, yp) = priced("y", &[(30, dec!(50))]);
        let policy = BasicPlanChangePolicy;
        let down = policy
            .change_price(PricedPlan::new(&y, &yp), PricedPlan::new(&x, &xp), Some(23))
            .unwrap();
        assert_eq!(down, None);

        for period in [None, Some(0), Some(-3)] {
            let price = policy
                .change_price(PricedPlan::new(&x, &xp), PricedPlan::new(&y, &yp), period)
                .unwrap();
            assert_eq!(price, None);
        }
    }

    #[test]
    fn standard_policy_adds_surcharge() {
        let (x, xp) = priced("x", &[(30, dec!(20))]);
        let (y, yp) = priced("y", &[(30, dec!(50))]);
        let price = StandardPlanChangePolicy::default()
            .change_price(PricedPlan::new(&x, &xp), PricedPlan::new(&y, &yp), Some(23))
            .unwrap();
        assert_eq!(price, Some(dec!(25.30)));
    }

    #[test]
    fn standard_policy_free_upgrade_threshold_and_downgrade_charge() {
        let policy = StandardPlanChangePolicy {
            upgrade_percent_rate: dec!(0),
            upgrade_charge: dec!(1.50),
            free_upgrade: dec!(5),
            downgrade_charge: Some(dec!(2)),
        };
        assert_eq!(policy.final_price(2, Some(dec!(1))), None);
        assert_eq!(policy.final_price(4, Some(dec!(1))), Some(dec!(5.50)));
        assert_eq!(policy.final_price(4, None), Some(dec!(2)));
    }

    #[test]
    fn change_policy_config_round_trips_through_json() {
        let config: ChangePolicyConfig = serde_json::from_str(r#"{"kind":"basic"}"#).unwrap();
        assert_eq!(config, ChangePolicyConfig::Basic);
        assert_eq!(
            config.build().final_price(10, Some(dec!(0.5))),
            Some(dec!(5.00))
        );
    }
}
