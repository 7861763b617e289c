//! Key encoding for the column families.

use plans_core::{InvoiceId, InvoiceType, OrderId, PlanId, PricingId, PrincipalId, QuotaId};

use crate::error::{Result, StoreError};

/// Key of a plan.
#[must_use]
pub fn plan_key(plan_id: &PlanId) -> Vec<u8> {
    plan_id.as_bytes().to_vec()
}

/// Key of a plan price: `plan_id || pricing_id`.
#[must_use]
pub fn plan_pricing_key(plan_id: &PlanId, pricing_id: &PricingId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(plan_id.as_bytes());
    key.extend_from_slice(pricing_id.as_bytes());
    key
}

/// Key of a plan quota value: `plan_id || quota_id`.
#[must_use]
pub fn plan_quota_key(plan_id: &PlanId, quota_id: &QuotaId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(plan_id.as_bytes());
    key.extend_from_slice(quota_id.as_bytes());
    key
}

/// Key of everything owned by a principal.
#[must_use]
pub fn principal_key(principal: &PrincipalId) -> Vec<u8> {
    principal.as_bytes().to_vec()
}

/// Key of an order.
#[must_use]
pub fn order_key(order_id: &OrderId) -> Vec<u8> {
    order_id.to_bytes().to_vec()
}

/// Index key of an order under its principal.
///
/// ULIDs are time-ordered, so a prefix scan lists a principal's orders oldest first.
#[must_use]
pub fn principal_order_key(principal: &PrincipalId, order_id: &OrderId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(principal.as_bytes());
    key.extend_from_slice(&order_id.to_bytes());
    key
}

/// Key of an invoice.
#[must_use]
pub fn invoice_key(invoice_id: &InvoiceId) -> Vec<u8> {
    invoice_id.to_bytes().to_vec()
}

/// Index key of an invoice under its order.
#[must_use]
pub fn order_invoice_key(order_id: &OrderId, invoice_id: &InvoiceId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(&order_id.to_bytes());
    key.extend_from_slice(&invoice_id.to_bytes());
    key
}

/// One-byte tag of an invoice type.
#[must_use]
pub const fn invoice_type_tag(kind: InvoiceType) -> u8 {
    match kind {
        InvoiceType::Invoice => 1,
        InvoiceType::Duplicate => 2,
        InvoiceType::Proforma => 3,
    }
}

/// Index key of an invoice under its type.
#[must_use]
pub fn type_invoice_key(kind: InvoiceType, invoice_id: &InvoiceId) -> Vec<u8> {
    let mut key = Vec::with_capacity(17);
    key.push(invoice_type_tag(kind));
    key.extend_from_slice(&invoice_id.to_bytes());
    key
}

/// Key of a sequence counter.
#[must_use]
pub fn counter_key(name: &str) -> Vec<u8> {
    name.as_bytes().to_vec()
}

/// Take the trailing 16 bytes of an index key as a ULID-based id.
///
/// # Errors
///
/// Returns `StoreError::Database` for keys shorter than 16 bytes.
pub fn trailing_id_bytes(key: &[u8]) -> Result<[u8; 16]> {
    let start = key
        .len()
        .checked_sub(16)
        .ok_or_else(|| StoreError::Database(format!("index key too short: {} bytes", key.len())))?;
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&key[start..]);
    Ok(bytes)
}
