//! Orders: single payable items that extend or change a user plan.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{PlansError, Result};
use crate::money::total_with_tax;
use crate::plan::Pricing;
use crate::{OrderId, PlanId, PrincipalId};

/// Days a NEW order remains payable unless configured otherwise.
pub const DEFAULT_ORDER_EXPIRATION_DAYS: i64 = 14;

/// Status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created, waiting for payment.
    New,
    /// Paid and applied to the user plan.
    Completed,
    /// Paid but the user plan refused the extension.
    NotValid,
    /// Abandoned before payment.
    Canceled,
    /// Refunded after completion.
    Returned,
}

impl OrderStatus {
    /// Stable upper-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Completed => "COMPLETED",
            Self::NotValid => "NOT_VALID",
            Self::Canceled => "CANCELED",
            Self::Returned => "RETURNED",
        }
    }
}

/// A single payable item.
///
/// `pricing = None` marks a plan-change order; otherwise the order buys `pricing.period`
/// days of `plan_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier.
    pub id: OrderId,

    /// Buyer.
    pub principal: PrincipalId,

    /// Plan being bought or switched to.
    pub plan_id: PlanId,

    /// Period being bought; `None` for plan changes.
    pub pricing: Option<Pricing>,

    /// Net amount.
    pub amount: Decimal,

    /// Tax rate in percent; `None` when VAT is not applicable.
    pub tax: Option<Decimal>,

    /// Three-letter currency code.
    pub currency: String,

    /// Lifecycle status.
    pub status: OrderStatus,

    /// Creation time.
    pub created: DateTime<Utc>,

    /// Completion time, set exactly once.
    pub completed: Option<DateTime<Utc>>,

    /// Start of the extension this order applied.
    pub plan_extended_from: Option<NaiveDate>,

    /// Expiry after this order was applied.
    pub plan_extended_until: Option<NaiveDate>,
}

impl Order {
    /// Create a NEW order without tax.
    #[must_use]
    pub fn new(
        principal: PrincipalId,
        plan_id: PlanId,
        pricing: Option<Pricing>,
        amount: Decimal,
        currency: impl Into<String>,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OrderId::generate(),
            principal,
            plan_id,
            pricing,
            amount,
            tax: None,
            currency: currency.into(),
            status: OrderStatus::New,
            created,
            completed: None,
            plan_extended_from: None,
            plan_extended_until: None,
        }
    }

    /// Whether this order only changes the plan.
    #[must_use]
    pub const fn is_plan_change(&self) -> bool {
        self.pricing.is_none()
    }

    /// Gross total.
    #[must_use]
    pub fn total(&self) -> Decimal {
        total_with_tax(self.amount, self.tax)
    }

    /// Tax part of the total.
    #[must_use]
    pub fn tax_total(&self) -> Decimal {
        self.total() - self.amount
    }

    /// Whether the order can still be paid at `now`.
    #[must_use]
    pub fn is_payable(&self, now: DateTime<Utc>, expiration: Duration) -> bool {
        self.status == OrderStatus::New && now - self.created < expiration
    }

    /// Fail unless the order can still be paid at `now`.
    ///
    /// # Errors
    ///
    /// [`PlansError::OrderAlreadyCompleted`] for completed orders,
    /// [`PlansError::OrderExpired`] for anything else that is not payable.
    pub fn ensure_payable(&self, now: DateTime<Utc>, expiration: Duration) -> Result<()> {
        if self.completed.is_some() {
            return Err(PlansError::OrderAlreadyCompleted {
                order_id: self.id.to_string(),
            });
        }
        if self.is_payable(now, expiration) {
            Ok(())
        } else {
            Err(PlansError::OrderExpired {
                order_id: self.id.to_string(),
            })
        }
    }

    /// Move to `next`, enforcing the allowed transitions.
    ///
    /// NEW may become CANCELED, COMPLETED or NOT_VALID; COMPLETED may become RETURNED.
    ///
    /// # Errors
    ///
    /// Returns [`PlansError::InvalidOrderTransition`] for anything else.
    pub fn transition(&mut self, next: OrderStatus) -> Result<()> {
        let allowed = matches!(
            (self.status, next),
            (
                OrderStatus::New,
                OrderStatus::Canceled | OrderStatus::Completed | OrderStatus::NotValid
            ) | (OrderStatus::Completed, OrderStatus::Returned)
        );
        if !allowed {
            return Err(PlansError::InvalidOrderTransition {
                order_id: self.id.to_string(),
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}
