//! Events emitted after a state change commits.

use serde::{Deserialize, Serialize};

use crate::order::Order;
use crate::{PlanId, PrincipalId};

/// Something that happened to an order or an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// An order was created.
    OrderStarted {
        /// The NEW order.
        order: Order,
    },
    /// An order was completed.
    OrderCompleted {
        /// The completed order.
        order: Order,
    },
    /// An account became active.
    AccountActivated {
        /// Account owner.
        principal: PrincipalId,
    },
    /// An account became inactive.
    AccountDeactivated {
        /// Account owner.
        principal: PrincipalId,
    },
    /// An account expired.
    AccountExpired {
        /// Account owner.
        principal: PrincipalId,
    },
    /// An account switched plans.
    AccountChangePlan {
        /// Account owner.
        principal: PrincipalId,
        /// Plan before the switch.
        from: PlanId,
        /// Plan after the switch.
        to: PlanId,
    },
    /// The host confirmed the account (e.g. e-mail activation).
    ActivateUserPlan {
        /// Account owner.
        principal: PrincipalId,
    },
    /// The renewal scheduler selected an account.
    AccountAutomaticRenewal {
        /// Account owner.
        principal: PrincipalId,
    },
}

impl Event {
    /// Signal name, e.g. `order_completed`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::OrderStarted { .. } => "order_started",
            Self::OrderCompleted { .. } => "order_completed",
            Self::AccountActivated { .. } => "account_activated",
            Self::AccountDeactivated { .. } => "account_deactivated",
            Self::AccountExpired { .. } => "account_expired",
            Self::AccountChangePlan { .. } => "account_change_plan",
            Self::ActivateUserPlan { .. } => "activate_user_plan",
            Self::AccountAutomaticRenewal { .. } => "account_automatic_renewal",
        }
    }

    /// Principal the event is about.
    #[must_use]
    pub const fn principal(&self) -> &PrincipalId {
        match self {
            Self::OrderStarted { order } | Self::OrderCompleted { order } => &order.principal,
            Self::AccountActivated { principal }
            | Self::AccountDeactivated { principal }
            | Self::AccountExpired { principal }
            | Self::AccountChangePlan { principal, .. }
            | Self::ActivateUserPlan { principal }
            | Self::AccountAutomaticRenewal { principal } => principal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_event_tag() {
        let principal = PrincipalId::generate();
        let event = Event::AccountExpired { principal };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "account_expired");
        assert_eq!(event.name(), "account_expired");
        assert_eq!(event.principal(), &principal);
    }
}
