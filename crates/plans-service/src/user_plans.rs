//! User plan state machine.
//!
//! An account is `ACTIVE` or `INACTIVE` and `EXPIRED` or not. Extensions and plan
//! changes move it between plans; quota validators decide whether it may stay active.

use chrono::Duration;
use rust_decimal::Decimal;

use plans_core::{
    quota_dict, Event, Order, OrderId, Plan, PlanId, PlanValidation, PlansError, PricedPlan,
    Pricing, PrincipalId, QuotaDict, RecurringUserPlan, RenewalTrigger, UserPlan,
};
use plans_store::StoreTx;

use crate::engine::{Outbox, PlansEngine};
use crate::error::{Result, ServiceError};
use crate::host::RequestContext;
use crate::mail::Letter;

/// Caller-supplied part of a renewal bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalSetup {
    /// Whether the plan renews automatically.
    pub has_automatic_renewal: bool,
    /// Payment provider token.
    pub token: Option<String>,
    /// Payment provider name.
    pub payment_provider: Option<String>,
    /// The provider confirmed the token.
    pub token_verified: bool,
    /// Who triggers renewals.
    pub renewal_triggered_by: RenewalTrigger,
    /// Card expiry year.
    pub card_expire_year: Option<i32>,
    /// Card expiry month.
    pub card_expire_month: Option<u32>,
    /// Masked card number.
    pub card_masked_number: Option<String>,
}

impl Default for RenewalSetup {
    fn default() -> Self {
        Self {
            has_automatic_renewal: true,
            token: None,
            payment_provider: None,
            token_verified: false,
            renewal_triggered_by: RenewalTrigger::Task,
            card_expire_year: None,
            card_expire_month: None,
            card_masked_number: None,
        }
    }
}

/// Outcome of a plan-change quote.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanChangeQuote {
    /// The switch costs nothing; apply it with [`PlansEngine::extend_account`] and no
    /// pricing.
    Free,
    /// The switch needs this NEW plan-change order to be paid.
    Payable(Order),
}

pub(crate) fn load_user_plan(tx: &dyn StoreTx, principal: &PrincipalId) -> Result<UserPlan> {
    tx.get_user_plan(principal)?
        .ok_or_else(|| ServiceError::not_found("user plan", principal))
}

pub(crate) fn load_plan(tx: &dyn StoreTx, plan_id: &PlanId) -> Result<Plan> {
    tx.get_plan(plan_id)?
        .ok_or_else(|| ServiceError::not_found("plan", plan_id))
}

fn is_free(tx: &dyn StoreTx, plan_id: &PlanId) -> Result<bool> {
    Ok(tx.list_plan_pricings(plan_id)?.is_empty())
}

impl PlansEngine {
    // =========================================================================
    // Transitions inside a transaction. They mutate `user_plan`; the caller saves it.
    // =========================================================================

    fn activate_in(user_plan: &mut UserPlan, out: &mut Outbox) {
        if user_plan.active {
            return;
        }
        user_plan.active = true;
        tracing::info!(target: "plans::accounts", principal = %user_plan.principal, "Account activated");
        out.emit(Event::AccountActivated {
            principal: user_plan.principal,
        });
    }

    fn deactivate_in(user_plan: &mut UserPlan, out: &mut Outbox) {
        if !user_plan.active {
            return;
        }
        user_plan.active = false;
        tracing::info!(target: "plans::accounts", principal = %user_plan.principal, "Account deactivated");
        out.emit(Event::AccountDeactivated {
            principal: user_plan.principal,
        });
    }

    fn clean_activation_in(
        &self,
        tx: &dyn StoreTx,
        user_plan: &mut UserPlan,
        out: &mut Outbox,
    ) -> Result<PlanValidation> {
        let quotas = quota_dict(&tx.list_plan_quotas(&user_plan.plan_id)?);
        let validation = self
            .validators
            .plan_validation(&user_plan.principal, &quotas, false);

        if validation.can_activate() {
            out.activations.push((user_plan.principal, quotas));
            Self::activate_in(user_plan, out);
        } else {
            tracing::info!(
                target: "plans::accounts",
                principal = %user_plan.principal,
                errors = ?validation.required_to_activate,
                "Account cannot be activated"
            );
            Self::deactivate_in(user_plan, out);
        }
        Ok(validation)
    }

    fn initialize_in(&self, tx: &dyn StoreTx, user_plan: &mut UserPlan, out: &mut Outbox) -> Result<()> {
        if user_plan.active {
            return Ok(());
        }
        if user_plan.expire.is_none() && !is_free(tx, &user_plan.plan_id)? {
            user_plan.expire =
                Some(self.clock.today() + Duration::days(self.config.default_grace_period_days));
        }
        Self::activate_in(user_plan, out);
        Ok(())
    }

    pub(crate) fn extend_account_in(
        &self,
        tx: &dyn StoreTx,
        user_plan: &mut UserPlan,
        plan: &Plan,
        pricing: Option<&Pricing>,
        out: &mut Outbox,
    ) -> Result<bool> {
        let today = self.clock.today();
        let principal = user_plan.principal;
        let previous = user_plan.plan_id;
        let target_is_free = is_free(tx, &plan.id)?;

        let Some(pricing) = pricing else {
            user_plan.plan_id = plan.id;
            if user_plan.expire.is_some() && target_is_free {
                user_plan.expire = None;
            }
            out.emit(Event::AccountChangePlan {
                principal,
                from: previous,
                to: plan.id,
            });
            out.mail(Letter::plan_changed(principal, &plan.name));
            tracing::info!(
                target: "plans::accounts",
                principal = %principal,
                plan = %plan.slug,
                "Account plan changed"
            );
            self.clean_activation_in(tx, user_plan, out)?;
            return Ok(true);
        };

        let current_is_free = is_free(tx, &previous)?;
        if previous != plan.id {
            let running = user_plan.expire.is_some_and(|expire| expire > today);
            if !current_is_free && running {
                tracing::warn!(
                    target: "plans::accounts",
                    principal = %principal,
                    plan = %plan.slug,
                    expire = ?user_plan.expire,
                    "Account extension refused: another paid plan is still running"
                );
                return Ok(false);
            }
            out.emit(Event::AccountChangePlan {
                principal,
                from: previous,
                to: plan.id,
            });
        }

        user_plan.expire = user_plan.plan_extended_until(
            plan.id,
            Some(pricing),
            target_is_free,
            current_is_free,
            today,
        );
        user_plan.plan_id = plan.id;
        tracing::info!(
            target: "plans::accounts",
            principal = %principal,
            plan = %plan.slug,
            pricing = %pricing.name,
            expire = ?user_plan.expire,
            "Account extended"
        );
        out.mail(Letter::plan_extended(principal, &plan.name, user_plan.expire));
        self.clean_activation_in(tx, user_plan, out)?;
        Ok(true)
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// The user plan of `principal`.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the principal has no user plan.
    pub fn user_plan(&self, principal: &PrincipalId) -> Result<UserPlan> {
        self.read(|tx| load_user_plan(tx, principal))
    }

    /// Activate the account. No-op if it is active.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the principal has no user plan.
    pub fn activate(&self, principal: &PrincipalId) -> Result<()> {
        self.transaction(|tx, out| {
            let mut user_plan = load_user_plan(tx, principal)?;
            Self::activate_in(&mut user_plan, out);
            tx.put_user_plan(&user_plan)?;
            Ok(())
        })
    }

    /// Deactivate the account. No-op if it is inactive.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the principal has no user plan.
    pub fn deactivate(&self, principal: &PrincipalId) -> Result<()> {
        self.transaction(|tx, out| {
            let mut user_plan = load_user_plan(tx, principal)?;
            Self::deactivate_in(&mut user_plan, out);
            tx.put_user_plan(&user_plan)?;
            Ok(())
        })
    }

    /// Validate the account against its plan's quotas and activate or deactivate it.
    ///
    /// Returns every validation failure, including those that do not block activation.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the principal has no user plan.
    pub fn clean_activation(&self, principal: &PrincipalId) -> Result<PlanValidation> {
        self.transaction(|tx, out| {
            let mut user_plan = load_user_plan(tx, principal)?;
            let validation = self.clean_activation_in(tx, &mut user_plan, out)?;
            tx.put_user_plan(&user_plan)?;
            Ok(validation)
        })
    }

    /// Validation report of `principal` against `plan_id`, or its current plan.
    ///
    /// Nothing is changed; use it to preview whether a switch would keep the account
    /// active.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the principal has no user plan.
    pub fn plan_validation(
        &self,
        principal: &PrincipalId,
        plan_id: Option<&PlanId>,
    ) -> Result<PlanValidation> {
        let quotas = self.read(|tx| {
            let plan_id = match plan_id {
                Some(plan_id) => *plan_id,
                None => load_user_plan(tx, principal)?.plan_id,
            };
            Ok(quota_dict(&tx.list_plan_quotas(&plan_id)?))
        })?;
        Ok(self.validators.plan_validation(principal, &quotas, false))
    }

    /// Set up the account for first use.
    ///
    /// A paid plan without expiry gets the default grace period; then the account is
    /// activated. No-op for active accounts.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the principal has no user plan.
    pub fn initialize(&self, principal: &PrincipalId) -> Result<()> {
        self.transaction(|tx, out| {
            let mut user_plan = load_user_plan(tx, principal)?;
            self.initialize_in(tx, &mut user_plan, out)?;
            tx.put_user_plan(&user_plan)?;
            Ok(())
        })
    }

    /// Give `principal` the default plan and initialize it.
    ///
    /// Returns the existing user plan untouched if there is one.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no default plan exists.
    pub fn create_user_plan(&self, principal: &PrincipalId) -> Result<UserPlan> {
        self.transaction(|tx, out| {
            if let Some(existing) = tx.get_user_plan(principal)? {
                return Ok(existing);
            }
            let plan = tx
                .list_plans()?
                .into_iter()
                .find(|plan| plan.default)
                .ok_or_else(|| PlansError::Configuration("no default plan".into()))?;

            let mut user_plan = UserPlan::new(*principal, plan.id);
            self.initialize_in(tx, &mut user_plan, out)?;
            tx.put_user_plan(&user_plan)?;
            tracing::info!(
                target: "plans::accounts",
                principal = %principal,
                plan = %plan.slug,
                "Default plan assigned"
            );
            Ok(user_plan)
        })
    }

    /// Confirm the account externally (e.g. after e-mail activation).
    ///
    /// Publishes `activate_user_plan`, which initializes the user plan, creating it with
    /// the default plan when needed.
    ///
    /// # Errors
    ///
    /// Returns the first error of the initialization or of a subscriber.
    pub fn activate_user_plan(&self, principal: &PrincipalId) -> Result<()> {
        let mut outbox = Outbox::default();
        outbox.emit(Event::ActivateUserPlan {
            principal: *principal,
        });
        self.release(outbox)
    }

    pub(crate) fn initialize_user_plan(&self, principal: &PrincipalId) -> Result<()> {
        let exists = self.read(|tx| Ok(tx.get_user_plan(principal)?.is_some()))?;
        if exists {
            self.initialize(principal)
        } else {
            self.create_user_plan(principal).map(|_| ())
        }
    }

    /// Extend the account with `pricing` of `plan_id`, or switch to `plan_id` when
    /// `pricing` is `None`.
    ///
    /// Returns `false` when the extension is refused because another paid plan is still
    /// running; nothing changes then.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown principal or plan.
    pub fn extend_account(
        &self,
        principal: &PrincipalId,
        plan_id: &PlanId,
        pricing: Option<&Pricing>,
    ) -> Result<bool> {
        self.transaction(|tx, out| {
            let mut user_plan = load_user_plan(tx, principal)?;
            let plan = load_plan(tx, plan_id)?;
            let extended = self.extend_account_in(tx, &mut user_plan, &plan, pricing, out)?;
            if extended {
                tx.put_user_plan(&user_plan)?;
            }
            Ok(extended)
        })
    }

    /// Expire the account: deactivate it, mail the owner and emit `account_expired`.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the principal has no user plan.
    pub fn expire_account(&self, principal: &PrincipalId) -> Result<()> {
        self.transaction(|tx, out| {
            let mut user_plan = load_user_plan(tx, principal)?;
            let plan = load_plan(tx, &user_plan.plan_id)?;
            Self::deactivate_in(&mut user_plan, out);
            tx.put_user_plan(&user_plan)?;

            tracing::info!(
                target: "plans::accounts",
                principal = %principal,
                plan = %plan.slug,
                expire = ?user_plan.expire,
                "Account expired"
            );
            out.mail(Letter::expired(*principal, &plan.name));
            out.emit(Event::AccountExpired {
                principal: *principal,
            });
            Ok(())
        })
    }

    /// Mail the owner that the account expires soon.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the principal has no user plan.
    pub fn remind_expire_soon(&self, principal: &PrincipalId) -> Result<()> {
        let today = self.clock.today();
        let (plan, user_plan) = self.read(|tx| {
            let user_plan = load_user_plan(tx, principal)?;
            Ok((load_plan(tx, &user_plan.plan_id)?, user_plan))
        })?;
        let days = user_plan.days_left(today).unwrap_or_default();
        self.postman
            .deliver(Letter::expire_reminder(*principal, &plan.name, days));
        Ok(())
    }

    /// Replace the renewal bundle of the order's owner with one renewing `order_id`.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown order or user plan.
    pub fn set_plan_renewal(&self, order_id: &OrderId, setup: RenewalSetup) -> Result<UserPlan> {
        self.transaction(|tx, _| {
            let order = tx
                .get_order(order_id)?
                .ok_or_else(|| ServiceError::not_found("order", order_id))?;
            let mut user_plan = load_user_plan(tx, &order.principal)?;
            user_plan.recurring = Some(RecurringUserPlan {
                pricing: order.pricing.clone(),
                amount: Some(order.amount),
                tax: order.tax,
                currency: order.currency.clone(),
                token: setup.token,
                payment_provider: setup.payment_provider,
                has_automatic_renewal: setup.has_automatic_renewal,
                token_verified: setup.token_verified,
                renewal_triggered_by: setup.renewal_triggered_by,
                last_renewal_attempt: None,
                card_expire_year: setup.card_expire_year,
                card_expire_month: setup.card_expire_month,
                card_masked_number: setup.card_masked_number,
            });
            tx.put_user_plan(&user_plan)?;
            tracing::info!(
                target: "plans::accounts",
                principal = %order.principal,
                order_id = %order.id,
                automatic = setup.has_automatic_renewal,
                "Plan renewal set"
            );
            Ok(user_plan)
        })
    }

    /// Stop automatic renewal; the user renews manually from now on.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the principal has no user plan.
    pub fn cancel_renewal(&self, principal: &PrincipalId) -> Result<()> {
        self.transaction(|tx, _| {
            let mut user_plan = load_user_plan(tx, principal)?;
            if let Some(recurring) = user_plan.recurring.as_mut() {
                recurring.has_automatic_renewal = false;
                recurring.renewal_triggered_by = RenewalTrigger::User;
                tx.put_user_plan(&user_plan)?;
                tracing::info!(target: "plans::accounts", principal = %principal, "Automatic renewal canceled");
            }
            Ok(())
        })
    }

    /// Plans `principal` may choose from, in display order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn plans_available_to(&self, principal: &PrincipalId) -> Result<Vec<Plan>> {
        self.read(|tx| {
            Ok(tx
                .list_plans()?
                .into_iter()
                .filter(|plan| plan.is_visible_to(principal))
                .collect())
        })
    }

    /// Quota limits of `plan_id`; `None` values are unlimited.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn quota_dict(&self, plan_id: &PlanId) -> Result<QuotaDict> {
        self.read(|tx| Ok(quota_dict(&tx.list_plan_quotas(plan_id)?)))
    }

    /// Quota limits of the current plan of `principal`.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the principal has no user plan.
    pub fn user_quota(&self, principal: &PrincipalId) -> Result<QuotaDict> {
        self.read(|tx| {
            let user_plan = load_user_plan(tx, principal)?;
            Ok(quota_dict(&tx.list_plan_quotas(&user_plan.plan_id)?))
        })
    }

    /// Price of switching `principal` to `plan_id` for the rest of the paid period.
    ///
    /// `None` means the switch is free.
    ///
    /// # Errors
    ///
    /// Returns [`PlansError::PlanHasNoPricing`] when one of the paid plans has no prices.
    pub fn change_price(&self, principal: &PrincipalId, plan_id: &PlanId) -> Result<Option<Decimal>> {
        let today = self.clock.today();
        let (user_plan, old_plan, old_pricings, new_plan, new_pricings) = self.read(|tx| {
            let user_plan = load_user_plan(tx, principal)?;
            let old_plan = load_plan(tx, &user_plan.plan_id)?;
            let old_pricings = tx.list_plan_pricings(&old_plan.id)?;
            let new_plan = load_plan(tx, plan_id)?;
            let new_pricings = tx.list_plan_pricings(plan_id)?;
            Ok((user_plan, old_plan, old_pricings, new_plan, new_pricings))
        })?;

        Ok(self.change_policy.change_price(
            PricedPlan::new(&old_plan, &old_pricings),
            PricedPlan::new(&new_plan, &new_pricings),
            user_plan.days_left(today),
        )?)
    }

    /// Quote a switch of `principal` to `plan_id`.
    ///
    /// A paid switch creates a NEW plan-change order for the top-up amount; a free one
    /// changes nothing.
    ///
    /// # Errors
    ///
    /// See [`PlansEngine::change_price`] and [`PlansEngine::create_order`].
    pub async fn quote_plan_change(
        &self,
        principal: &PrincipalId,
        plan_id: &PlanId,
        ctx: Option<&RequestContext>,
    ) -> Result<PlanChangeQuote> {
        match self.change_price(principal, plan_id)? {
            None => Ok(PlanChangeQuote::Free),
            Some(amount) => {
                let order = self
                    .create_order(principal, plan_id, None, amount, ctx)
                    .await?;
                Ok(PlanChangeQuote::Payable(order))
            }
        }
    }
}
