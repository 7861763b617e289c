//! A principal's current plan and its renewal bundle.
//!
//! These are plain records plus the date arithmetic that does not need the store.
//! The transitions that persist and emit events live in the service crate.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::plan::Pricing;
use crate::{PlanId, PrincipalId};

/// The plan state of one principal.
///
/// `is_expired ⇔ expire ≠ None ∧ expire < today`. A free plan never carries an expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPlan {
    /// Owner of this plan (1–1).
    pub principal: PrincipalId,

    /// Current plan.
    pub plan_id: PlanId,

    /// Last day of validity, `None` for plans that never expire.
    pub expire: Option<NaiveDate>,

    /// Whether the account may use the plan.
    pub active: bool,

    /// Renewal bundle, when one was set up.
    pub recurring: Option<RecurringUserPlan>,
}

impl UserPlan {
    /// Create an inactive user plan without expiry.
    #[must_use]
    pub fn new(principal: PrincipalId, plan_id: PlanId) -> Self {
        Self {
            principal,
            plan_id,
            expire: None,
            active: false,
            recurring: None,
        }
    }

    /// Whether the account is active.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Whether the plan expired before `today`.
    #[must_use]
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expire.is_some_and(|expire| expire < today)
    }

    /// Days from `today` to the expiry date; `None` for plans without expiry.
    #[must_use]
    pub fn days_left(&self, today: NaiveDate) -> Option<i64> {
        self.expire.map(|expire| (expire - today).num_days())
    }

    /// Date from which an extension of `plan_id` starts counting.
    ///
    /// A running subscription of the same plan extends from its current expiry;
    /// anything else starts today.
    #[must_use]
    pub fn plan_extended_from(&self, plan_id: PlanId, today: NaiveDate) -> NaiveDate {
        match self.expire {
            Some(expire) if !self.is_expired(today) && self.plan_id == plan_id => expire,
            _ => today,
        }
    }

    /// Expiry date after buying `pricing` of `plan_id`.
    ///
    /// `plan_is_free` describes the target plan and `current_is_free` the current one.
    /// Free targets never expire, and a paid plan without expiry stays without expiry.
    /// Without a pricing (plan change) the current expiry is kept.
    #[must_use]
    pub fn plan_extended_until(
        &self,
        plan_id: PlanId,
        pricing: Option<&Pricing>,
        plan_is_free: bool,
        current_is_free: bool,
        today: NaiveDate,
    ) -> Option<NaiveDate> {
        if plan_is_free {
            return None;
        }
        if !current_is_free && self.expire.is_none() {
            return None;
        }
        match pricing {
            None => self.expire,
            Some(pricing) => Some(
                self.plan_extended_from(plan_id, today)
                    + Duration::days(i64::from(pricing.period)),
            ),
        }
    }

    /// Whether a stored payment token will be charged automatically.
    #[must_use]
    pub fn has_automatic_renewal(&self) -> bool {
        self.recurring
            .as_ref()
            .is_some_and(|r| r.has_automatic_renewal && r.token_verified)
    }

    /// Moment of automatic renewal for the single-offset schedule.
    ///
    /// The expiry day (midnight UTC) minus `before`.
    #[must_use]
    pub fn plan_autorenew_at(&self, before: Duration) -> Option<DateTime<Utc>> {
        self.expire.map(|expire| start_of_day(expire) - before)
    }
}

/// Midnight UTC at the start of `date`.
#[must_use]
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// Who triggers the renewal of a recurring plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RenewalTrigger {
    /// The engine's renewal scheduler.
    Task,
    /// The user pays each renewal manually.
    #[default]
    User,
    /// The payment provider renews on its own.
    Other,
}

/// Renewal bundle attached to a user plan.
///
/// Automatic renewal fires only when `has_automatic_renewal ∧ token_verified ∧
/// renewal_triggered_by = Task`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecurringUserPlan {
    /// Pricing to renew with.
    pub pricing: Option<Pricing>,

    /// Net amount charged on renewal.
    pub amount: Option<Decimal>,

    /// Tax rate snapshot, `None` when VAT is not applicable.
    pub tax: Option<Decimal>,

    /// Currency code.
    pub currency: String,

    /// Payment provider token.
    pub token: Option<String>,

    /// Payment provider name.
    pub payment_provider: Option<String>,

    /// Whether the plan renews automatically.
    pub has_automatic_renewal: bool,

    /// The provider confirmed the token.
    pub token_verified: bool,

    /// Who triggers renewals.
    pub renewal_triggered_by: RenewalTrigger,

    /// Stamped by the scheduler before a renewal fires.
    pub last_renewal_attempt: Option<DateTime<Utc>>,

    /// Card expiry year.
    pub card_expire_year: Option<i32>,

    /// Card expiry month.
    pub card_expire_month: Option<u32>,

    /// Masked card number for display.
    pub card_masked_number: Option<String>,
}

impl RecurringUserPlan {
    /// Whether the scheduler may renew this bundle on its own.
    #[must_use]
    pub fn renews_by_task(&self) -> bool {
        self.has_automatic_renewal
            && self.token_verified
            && self.renewal_triggered_by == RenewalTrigger::Task
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn user_plan(expire: Option<NaiveDate>) -> UserPlan {
        let mut up = UserPlan::new(PrincipalId::generate(), PlanId::generate());
        up.expire = expire;
        up
    }

    #[test]
    fn expiry_is_strictly_before_today() {
        let today = date(2020, 6, 1);
        assert!(user_plan(Some(date(2020, 5, 31))).is_expired(today));
        assert!(!user_plan(Some(today)).is_expired(today));
        assert!(!user_plan(None).is_expired(today));
    }

    #[test]
    fn same_running_plan_extends_from_expiry() {
        let today = date(2020, 6, 1);
        let up = user_plan(Some(date(2020, 7, 21)));
        assert_eq!(up.plan_extended_from(up.plan_id, today), date(2020, 7, 21));
        assert_eq!(up.plan_extended_from(PlanId::generate(), today), today);
    }

    #[test]
    fn expired_plan_extends_from_today() {
        let today = date(2020, 6, 1);
        let up = user_plan(Some(date(2020, 4, 12)));
        assert_eq!(up.plan_extended_from(up.plan_id, today), today);
    }

    #[test]
    fn extended_until_adds_pricing_period() {
        let today = date(2020, 6, 1);
        let up = user_plan(Some(date(2020, 7, 21)));
        let monthly = Pricing::new("Monthly", 30);
        assert_eq!(
            up.plan_extended_until(up.plan_id, Some(&monthly), false, false, today),
            Some(date(2020, 8, 20))
        );
    }

    #[test]
    fn extended_until_edge_cases() {
        let today = date(2020, 6, 1);
        let monthly = Pricing::new("Monthly", 30);

        // Free target never expires.
        let up = user_plan(Some(date(2020, 7, 21)));
        assert_eq!(
            up.plan_extended_until(up.plan_id, Some(&monthly), true, false, today),
            None
        );

        // Paid plan without expiry stays lifetime.
        let lifetime = user_plan(None);
        assert_eq!(
            lifetime.plan_extended_until(lifetime.plan_id, Some(&monthly), false, false, today),
            None
        );

        // Plan change keeps the current expiry.
        assert_eq!(
            up.plan_extended_until(PlanId::generate(), None, false, false, today),
            Some(date(2020, 7, 21))
        );
    }

    #[test]
    fn days_left_counts_calendar_days() {
        let up = user_plan(Some(date(2020, 6, 8)));
        assert_eq!(up.days_left(date(2020, 6, 1)), Some(7));
        assert_eq!(user_plan(None).days_left(date(2020, 6, 1)), None);
    }

    #[test]
    fn automatic_renewal_needs_verified_token() {
        let mut up = user_plan(Some(date(2023, 1, 3)));
        assert!(!up.has_automatic_renewal());

        up.recurring = Some(RecurringUserPlan {
            has_automatic_renewal: true,
            ..RecurringUserPlan::default()
        });
        assert!(!up.has_automatic_renewal());

        if let Some(recurring) = up.recurring.as_mut() {
            recurring.token_verified = true;
        }
        assert!(up.has_automatic_renewal());
    }

    #[test]
    fn autorenew_at_subtracts_offset_from_expiry_midnight() {
        let up = user_plan(Some(date(2023, 1, 3)));
        let at = up
            .plan_autorenew_at(Duration::days(1) + Duration::hours(6))
            .unwrap();
        assert_eq!(at.to_rfc3339(), "2023-01-01T18:00:00+00:00");
    }
}
