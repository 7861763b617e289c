//! Invoice issuance and numbering.
//!
//! A number is allocated from the counter of the invoice's `(type, period bucket)` in the
//! same transaction that stores the invoice. The formatted `full_number` is rendered in a
//! second step from the stored row, so it always reflects the number that was committed.

use plans_core::{Invoice, InvoiceType, NumberAllocation, Order, OrderId, Plan};
use plans_store::StoreTx;

use crate::engine::PlansEngine;
use crate::error::{Result, ServiceError};
use crate::mail::Letter;
use crate::user_plans::load_plan;

fn item_description(site_name: &str, order: &Order, plan: &Plan) -> String {
    match &order.pricing {
        Some(pricing) => format!("{site_name} - Plan {} ({})", plan.name, pricing.name),
        None => format!("{site_name} - Plan change to {}", plan.name),
    }
}

impl PlansEngine {
    /// Issue a numbered invoice of `kind` for `order_id` and mail the buyer.
    ///
    /// When another engine sharing the database took the number first, the commit
    /// conflicts and the allocation is retried once.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown order, or the store conflict of the
    /// second attempt.
    pub fn issue_invoice(&self, order_id: &OrderId, kind: InvoiceType) -> Result<Invoice> {
        let invoice = match self.allocate_invoice(order_id, kind) {
            Err(e) if e.is_conflict() => {
                tracing::warn!(
                    target: "plans::invoices",
                    order_id = %order_id,
                    kind = %kind,
                    error = %e,
                    "Invoice number allocation conflicted, retrying"
                );
                self.allocate_invoice(order_id, kind)?
            }
            other => other?,
        };
        let invoice = self.render_full_number(&invoice)?;

        tracing::info!(
            target: "plans::invoices",
            order_id = %order_id,
            kind = %kind,
            full_number = %invoice.full_number,
            "Invoice issued"
        );
        if self.config.emails.allows_invoice(kind) {
            self.postman.deliver(Letter::invoice_created(&invoice));
        }
        Ok(invoice)
    }

    fn allocate_invoice(&self, order_id: &OrderId, kind: InvoiceType) -> Result<Invoice> {
        let today = self.clock.today();
        self.transaction(|tx, _| {
            let order = tx
                .get_order(order_id)?
                .ok_or_else(|| ServiceError::not_found("order", order_id))?;
            let plan = load_plan(tx, &order.plan_id)?;
            let billing = tx
                .get_billing_info(&self.buyers.buyer(&order.principal))?
                .unwrap_or_default();

            let mut invoice = Invoice::from_order(
                &order,
                kind,
                today,
                item_description(&self.config.site_name, &order, &plan),
                &billing,
                self.config.issuer.clone(),
            );
            invoice.number = self.next_number(tx, &invoice)?;
            tx.put_invoice(&invoice)?;
            Ok(invoice)
        })
    }

    fn next_number(&self, tx: &mut dyn StoreTx, invoice: &Invoice) -> Result<i64> {
        let reset = &self.config.invoice_counter_reset;
        let mut allocation = NumberAllocation::for_invoice(reset, invoice, []);
        if !tx.has_sequence(&allocation.sequence_key)? {
            // A new counter starts above numbers issued before it existed.
            let existing = tx.list_invoices_by_type(invoice.kind)?;
            allocation = NumberAllocation::for_invoice(reset, invoice, &existing);
        }
        let number = tx.next_sequence_value(&allocation.sequence_key, allocation.initial)?;
        tracing::debug!(
            target: "plans::invoices",
            sequence = %allocation.sequence_key,
            number,
            "Invoice number allocated"
        );
        Ok(number)
    }

    fn render_full_number(&self, invoice: &Invoice) -> Result<Invoice> {
        self.transaction(|tx, _| {
            let mut stored = tx
                .get_invoice(&invoice.id)?
                .ok_or_else(|| ServiceError::not_found("invoice", invoice.id))?;
            stored.full_number = self.number_template.render(&stored.template_context());
            tx.put_invoice(&stored)?;
            Ok(stored)
        })
    }

    /// Invoices issued for `order_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn invoices_for_order(&self, order_id: &OrderId) -> Result<Vec<Invoice>> {
        self.read(|tx| Ok(tx.list_invoices_by_order(order_id)?))
    }
}
