//! Orders: creation with tax, completion, cancellation and returns.

use rust_decimal::Decimal;

use plans_core::{
    BillingInfo, Event, Order, OrderId, OrderStatus, PlanId, PlansError, Pricing, PricingId,
    PrincipalId,
};

use crate::engine::PlansEngine;
use crate::error::{Result, ServiceError};
use crate::host::RequestContext;
use crate::user_plans::{load_plan, load_user_plan};

/// Session value standing for "no rate".
const NO_RATE: &str = "None";

fn session_key(tax_id: Option<&str>, country: Option<&str>) -> String {
    format!(
        "tax_{}_{}",
        tax_id.unwrap_or(NO_RATE),
        country.unwrap_or(NO_RATE)
    )
}

fn load_order(tx: &dyn plans_store::StoreTx, order_id: &OrderId) -> Result<Order> {
    tx.get_order(order_id)?
        .ok_or_else(|| ServiceError::not_found("order", order_id))
}

impl PlansEngine {
    /// Set `amount` on `order` and compute its tax for `billing`.
    ///
    /// The buyer country is taken from the billing info, else from the request, else the
    /// configured default. Successful lookups are cached in the request session under
    /// `tax_<tax id>_<country>`, so a cached rate counts as successful. Fallback rates are
    /// never cached. The tax is assigned only when `use_default` is set or the lookup
    /// succeeded.
    pub async fn recalculate(
        &self,
        order: &mut Order,
        amount: Decimal,
        billing: Option<&BillingInfo>,
        ctx: Option<&RequestContext>,
        use_default: bool,
    ) {
        order.amount = amount;

        let country = billing
            .and_then(BillingInfo::country_code)
            .map(str::to_string)
            .or_else(|| ctx.and_then(|c| c.country.clone()))
            .or_else(|| self.config.default_country.clone());
        let tax_id = billing.and_then(BillingInfo::full_tax_id);

        let session = ctx.and_then(|c| c.session.as_ref());
        let key = session_key(tax_id.as_deref(), country.as_deref());

        let cached = session
            .and_then(|s| s.get(&key))
            .map(|value| value.parse::<Decimal>().ok());

        let (rate, successful) = if let Some(rate) = cached {
            (rate, true)
        } else {
            let lookup = self
                .taxation
                .tax_rate(tax_id.as_deref(), country.as_deref())
                .await;
            if let Some(session) = session.filter(|_| lookup.successful) {
                let value = lookup
                    .rate
                    .map_or_else(|| NO_RATE.to_string(), |rate| rate.to_string());
                session.set(&key, value);
            }
            (lookup.rate, lookup.successful)
        };

        if use_default || successful {
            order.tax = rate;
        }
        tracing::debug!(
            target: "plans::orders",
            order_id = %order.id,
            country = ?country,
            tax = ?order.tax,
            successful,
            "Order tax calculated"
        );
    }

    /// Create a NEW order of `plan_id` for `principal` and emit `order_started`.
    ///
    /// `pricing` of `None` makes a plan-change order. The tax follows the billing info of
    /// the principal's buyer.
    ///
    /// # Errors
    ///
    /// Returns a store error, or the first error of an `order_started` reaction.
    pub async fn create_order(
        &self,
        principal: &PrincipalId,
        plan_id: &PlanId,
        pricing: Option<Pricing>,
        amount: Decimal,
        ctx: Option<&RequestContext>,
    ) -> Result<Order> {
        let buyer = self.buyers.buyer(principal);
        let billing = self.read(|tx| {
            load_plan(tx, plan_id)?;
            Ok(tx.get_billing_info(&buyer)?)
        })?;

        let mut order = Order::new(
            *principal,
            *plan_id,
            pricing,
            Decimal::ZERO,
            self.config.currency.clone(),
            self.clock.now(),
        );
        self.recalculate(&mut order, amount, billing.as_ref(), ctx, true)
            .await;

        self.transaction(|tx, out| {
            tx.put_order(&order)?;
            tracing::info!(
                target: "plans::orders",
                order_id = %order.id,
                principal = %principal,
                amount = %order.amount,
                tax = ?order.tax,
                "Order created"
            );
            out.emit(Event::OrderStarted {
                order: order.clone(),
            });
            Ok(())
        })?;
        Ok(order)
    }

    /// Order `pricing_id` of `plan_id` at its catalogue price.
    ///
    /// # Errors
    ///
    /// Returns a not-found error when the plan does not sell that pricing.
    pub async fn order_plan(
        &self,
        principal: &PrincipalId,
        plan_id: &PlanId,
        pricing_id: &PricingId,
        ctx: Option<&RequestContext>,
    ) -> Result<Order> {
        let plan_pricing = self.read(|tx| {
            tx.list_plan_pricings(plan_id)?
                .into_iter()
                .find(|pp| pp.pricing.id == *pricing_id)
                .ok_or_else(|| ServiceError::not_found("plan pricing", pricing_id))
        })?;
        self.create_order(
            principal,
            plan_id,
            Some(plan_pricing.pricing),
            plan_pricing.price,
            ctx,
        )
        .await
    }

    /// Recompute the tax of a stored NEW order, e.g. after the buyer changed billing data.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown order.
    pub async fn recalculate_order(
        &self,
        order_id: &OrderId,
        ctx: Option<&RequestContext>,
        use_default: bool,
    ) -> Result<Order> {
        let (mut order, billing) = self.read(|tx| {
            let order = load_order(tx, order_id)?;
            let billing = tx.get_billing_info(&self.buyers.buyer(&order.principal))?;
            Ok((order, billing))
        })?;
        let amount = order.amount;
        self.recalculate(&mut order, amount, billing.as_ref(), ctx, use_default)
            .await;
        self.transaction(|tx, _| {
            tx.put_order(&order)?;
            Ok(())
        })?;
        Ok(order)
    }

    /// Order with `order_id`.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown order.
    pub fn get_order(&self, order_id: &OrderId) -> Result<Order> {
        self.read(|tx| load_order(tx, order_id))
    }

    /// Orders of `principal`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn orders_of(&self, principal: &PrincipalId) -> Result<Vec<Order>> {
        self.read(|tx| Ok(tx.list_orders_by_principal(principal)?))
    }

    /// Fail unless `order_id` can still be paid.
    ///
    /// # Errors
    ///
    /// [`PlansError::OrderAlreadyCompleted`] or [`PlansError::OrderExpired`].
    pub fn ensure_payable(&self, order_id: &OrderId) -> Result<Order> {
        let order = self.get_order(order_id)?;
        order.ensure_payable(self.clock.now(), self.config.order_expiration())?;
        Ok(order)
    }

    /// Apply a paid order to the owner's account.
    ///
    /// Returns `false` without side effects when the order is already completed. Otherwise
    /// the account is extended (or switched for a plan-change order), the order becomes
    /// COMPLETED, or NOT_VALID when the extension was refused, and `order_completed` is
    /// emitted. Everything happens in one transaction, so concurrent completions of one
    /// order apply it once.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown order, plan or user plan.
    pub fn complete_order(&self, order_id: &OrderId) -> Result<bool> {
        let now = self.clock.now();
        let today = self.clock.today();

        self.transaction(|tx, out| {
            let mut order = load_order(tx, order_id)?;
            if order.completed.is_some() {
                tracing::debug!(target: "plans::orders", order_id = %order_id, "Order already completed");
                return Ok(false);
            }

            let mut user_plan = load_user_plan(tx, &order.principal)?;
            let plan = load_plan(tx, &order.plan_id)?;

            order.plan_extended_from = Some(user_plan.plan_extended_from(order.plan_id, today));
            let extended =
                self.extend_account_in(tx, &mut user_plan, &plan, order.pricing.as_ref(), out)?;
            if extended {
                tx.put_user_plan(&user_plan)?;
                order.plan_extended_until = user_plan.expire;
            }

            order.completed = Some(now);
            order.transition(if extended {
                OrderStatus::Completed
            } else {
                OrderStatus::NotValid
            })?;
            tx.put_order(&order)?;

            tracing::info!(
                target: "plans::orders",
                order_id = %order.id,
                principal = %order.principal,
                status = %order.status.as_str(),
                until = ?order.plan_extended_until,
                "Order completed"
            );
            out.emit(Event::OrderCompleted { order });
            Ok(true)
        })
    }

    /// Cancel a NEW order.
    ///
    /// # Errors
    ///
    /// Returns [`PlansError::InvalidOrderTransition`] for orders that are not NEW.
    pub fn cancel_order(&self, order_id: &OrderId) -> Result<Order> {
        self.set_order_status(order_id, OrderStatus::Canceled)
    }

    /// Mark a COMPLETED order as RETURNED. The account is not touched.
    ///
    /// # Errors
    ///
    /// Returns [`PlansError::InvalidOrderTransition`] for orders that are not COMPLETED.
    pub fn return_order(&self, order_id: &OrderId) -> Result<Order> {
        self.set_order_status(order_id, OrderStatus::Returned)
    }

    fn set_order_status(&self, order_id: &OrderId, status: OrderStatus) -> Result<Order> {
        self.transaction(|tx, _| {
            let mut order = load_order(tx, order_id)?;
            order.transition(status)?;
            tx.put_order(&order)?;
            tracing::info!(
                target: "plans::orders",
                order_id = %order.id,
                status = %status.as_str(),
                "Order status changed"
            );
            Ok(order)
        })
    }

    /// Pay an order without a payment provider, for development setups.
    ///
    /// # Errors
    ///
    /// Returns a configuration error unless fake payments are enabled, and the errors of
    /// [`PlansEngine::ensure_payable`].
    pub fn fake_payment(&self, order_id: &OrderId) -> Result<bool> {
        if !self.config.fake_payments {
            return Err(PlansError::Configuration("fake payments are disabled".into()).into());
        }
        self.ensure_payable(order_id)?;
        tracing::warn!(target: "plans::orders", order_id = %order_id, "Fake payment accepted");
        self.complete_order(order_id)
    }

    /// Create the next renewal order from the stored renewal bundle of `principal`.
    ///
    /// Amount, tax and currency are copied from the bundle, so the renewal costs what
    /// the original order did.
    ///
    /// # Errors
    ///
    /// Returns a not-found error when there is no user plan or no renewal bundle.
    pub fn create_renewal_order(&self, principal: &PrincipalId) -> Result<Order> {
        let now = self.clock.now();
        self.transaction(|tx, out| {
            let user_plan = load_user_plan(tx, principal)?;
            let recurring = user_plan
                .recurring
                .as_ref()
                .ok_or_else(|| ServiceError::not_found("renewal", principal))?;

            let mut order = Order::new(
                *principal,
                user_plan.plan_id,
                recurring.pricing.clone(),
                recurring.amount.unwrap_or_default(),
                recurring.currency.clone(),
                now,
            );
            order.tax = recurring.tax;
            tx.put_order(&order)?;

            tracing::info!(
                target: "plans::orders",
                order_id = %order.id,
                principal = %principal,
                amount = %order.amount,
                "Renewal order created"
            );
            out.emit(Event::OrderStarted {
                order: order.clone(),
            });
            Ok(order)
        })
    }
}
