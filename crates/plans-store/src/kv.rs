//! Transactions over an ordered key-value backend.
//!
//! [`KvStore`] turns any [`Backend`] into a [`Store`]. A transaction buffers its writes in
//! an overlay that its own reads see; commit hands the overlay to the backend as one
//! atomic batch. Transactions of one store are serialized by a store-wide lock, which
//! makes read-then-update sequences (order completion, counter allocation) linearizable.
//!
//! Several stores may share one backend (`KvStore<Arc<B>>`), e.g. one per engine over a
//! common database. Their transactions are not serialized against each other, so sequence
//! allocations are checked at commit: if another store moved a counter this transaction
//! allocated from, the commit fails with [`StoreError::Conflict`] and nothing is written.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use plans_core::{
    BillingInfo, Invoice, InvoiceId, InvoiceType, Order, OrderId, Plan, PlanId, PlanPricing,
    PlanQuota, PrincipalId, UserPlan,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::cf;
use crate::{Store, StoreTx};

/// One write of a batch: `(column family, key, value)`; `None` deletes.
pub type BatchEntry = (&'static str, Vec<u8>, Option<Vec<u8>>);

/// An ordered key-value database with atomic batch writes.
pub trait Backend: Send + Sync {
    /// Read one key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// All entries whose key starts with `prefix`, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn scan_prefix(&self, cf: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Apply all entries atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails; nothing is applied then.
    fn write_batch(&self, batch: Vec<BatchEntry>) -> Result<()>;

    /// Apply `batch` only if every key of `expected` still holds the given value.
    ///
    /// The provided implementation checks and then writes; backends that can do both
    /// atomically override it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] naming the first key that changed, or an error if
    /// the database operation fails. Nothing is applied in either case.
    fn write_batch_checked(&self, expected: Vec<BatchEntry>, batch: Vec<BatchEntry>) -> Result<()> {
        for (cf, key, value) in &expected {
            if self.get(cf, key)? != *value {
                return Err(conflict(key));
            }
        }
        self.write_batch(batch)
    }
}

/// Conflict error for a changed key.
pub(crate) fn conflict(key: &[u8]) -> StoreError {
    StoreError::Conflict {
        key: String::from_utf8_lossy(key).into_owned(),
    }
}

impl<B: Backend + ?Sized> Backend for Arc<B> {
    fn get(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        (**self).get(cf, key)
    }

    fn scan_prefix(&self, cf: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        (**self).scan_prefix(cf, prefix)
    }

    fn write_batch(&self, batch: Vec<BatchEntry>) -> Result<()> {
        (**self).write_batch(batch)
    }

    fn write_batch_checked(&self, expected: Vec<BatchEntry>, batch: Vec<BatchEntry>) -> Result<()> {
        (**self).write_batch_checked(expected, batch)
    }
}

/// A [`Store`] over a key-value [`Backend`].
pub struct KvStore<B> {
    backend: B,
    lock: Mutex<()>,
}

impl<B: Backend> KvStore<B> {
    /// Wrap a backend.
    pub const fn with_backend(backend: B) -> Self {
        Self {
            backend,
            lock: Mutex::new(()),
        }
    }

    /// The underlying backend.
    pub const fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: Backend> Store for KvStore<B> {
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>> {
        let guard = self
            .lock
            .lock()
            .map_err(|_| StoreError::Database("transaction lock poisoned".into()))?;
        Ok(Box::new(KvTx {
            backend: &self.backend,
            _guard: guard,
            pending: BTreeMap::new(),
            counters_read: BTreeMap::new(),
        }))
    }
}

/// Serialize a value using CBOR.
pub(crate) fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

/// Deserialize a value from CBOR.
pub(crate) fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
    ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
}

struct KvTx<'a, B> {
    backend: &'a B,
    _guard: MutexGuard<'a, ()>,
    pending: BTreeMap<(&'static str, Vec<u8>), Option<Vec<u8>>>,
    /// Committed value of every counter this transaction allocated from.
    counters_read: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<B: Backend> KvTx<'_, B> {
    fn raw_get(&self, cf: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.pending.get(&(cf, key.to_vec())) {
            Some(value) => Ok(value.clone()),
            None => self.backend.get(cf, key),
        }
    }

    fn raw_scan(&self, cf: &'static str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.backend.scan_prefix(cf, prefix)?.into_iter().collect();
        for ((pending_cf, key), value) in &self.pending {
            if *pending_cf != cf || !key.starts_with(prefix) {
                continue;
            }
            match value {
                Some(value) => merged.insert(key.clone(), value.clone()),
                None => merged.remove(key),
            };
        }
        Ok(merged.into_iter().collect())
    }

    fn raw_put(&mut self, cf: &'static str, key: Vec<u8>, value: Vec<u8>) {
        self.pending.insert((cf, key), Some(value));
    }

    fn get_value<T: serde::de::DeserializeOwned>(
        &self,
        cf: &'static str,
        key: &[u8],
    ) -> Result<Option<T>> {
        self.raw_get(cf, key)?
            .map(|data| deserialize(&data))
            .transpose()
    }

    fn put_value<T: serde::Serialize>(
        &mut self,
        cf: &'static str,
        key: Vec<u8>,
        value: &T,
    ) -> Result<()> {
        let data = serialize(value)?;
        self.raw_put(cf, key, data);
        Ok(())
    }

    fn scan_values<T: serde::de::DeserializeOwned>(
        &self,
        cf: &'static str,
        prefix: &[u8],
    ) -> Result<Vec<T>> {
        self.raw_scan(cf, prefix)?
            .iter()
            .map(|(_, data)| deserialize(data))
            .collect()
    }

    /// Load invoices listed by an index.
    fn invoices_from_index(&self, index: &'static str, prefix: &[u8]) -> Result<Vec<Invoice>> {
        let mut invoices = Vec::new();
        for (key, _) in self.raw_scan(index, prefix)? {
            let invoice_id = InvoiceId::from_bytes(keys::trailing_id_bytes(&key)?);
            if let Some(invoice) = self.get_invoice(&invoice_id)? {
                invoices.push(invoice);
            }
        }
        Ok(invoices)
    }
}

impl<B: Backend> StoreTx for KvTx<'_, B> {
    // =========================================================================
    // Catalogue
    // =========================================================================

    fn put_plan(&mut self, plan: &Plan) -> Result<()> {
        for other in self.list_plans()? {
            if other.id == plan.id {
                continue;
            }
            if other.slug == plan.slug {
                return Err(StoreError::Constraint(format!(
                    "plan slug {:?} already taken",
                    plan.slug
                )));
            }
            if plan.default && other.default {
                return Err(StoreError::Constraint(format!(
                    "plan {:?} is already the default plan",
                    other.slug
                )));
            }
        }
        self.put_value(cf::PLANS, keys::plan_key(&plan.id), plan)
    }

    fn get_plan(&self, plan_id: &PlanId) -> Result<Option<Plan>> {
        self.get_value(cf::PLANS, &keys::plan_key(plan_id))
    }

    fn list_plans(&self) -> Result<Vec<Plan>> {
        let mut plans: Vec<Plan> = self.scan_values(cf::PLANS, &[])?;
        plans.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.slug.cmp(&b.slug)));
        Ok(plans)
    }

    fn put_plan_pricing(&mut self, plan_pricing: &PlanPricing) -> Result<()> {
        let key = keys::plan_pricing_key(&plan_pricing.plan_id, &plan_pricing.pricing.id);
        self.put_value(cf::PLAN_PRICINGS, key, plan_pricing)
    }

    fn list_plan_pricings(&self, plan_id: &PlanId) -> Result<Vec<PlanPricing>> {
        let mut pricings: Vec<PlanPricing> =
            self.scan_values(cf::PLAN_PRICINGS, &keys::plan_key(plan_id))?;
        pricings.sort_by_key(|pp| pp.pricing.period);
        Ok(pricings)
    }

    fn put_plan_quota(&mut self, plan_quota: &PlanQuota) -> Result<()> {
        let key = keys::plan_quota_key(&plan_quota.plan_id, &plan_quota.quota.id);
        self.put_value(cf::PLAN_QUOTAS, key, plan_quota)
    }

    fn list_plan_quotas(&self, plan_id: &PlanId) -> Result<Vec<PlanQuota>> {
        self.scan_values(cf::PLAN_QUOTAS, &keys::plan_key(plan_id))
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    fn put_user_plan(&mut self, user_plan: &UserPlan) -> Result<()> {
        self.put_value(
            cf::USER_PLANS,
            keys::principal_key(&user_plan.principal),
            user_plan,
        )
    }

    fn get_user_plan(&self, principal: &PrincipalId) -> Result<Option<UserPlan>> {
        self.get_value(cf::USER_PLANS, &keys::principal_key(principal))
    }

    fn list_user_plans(&self) -> Result<Vec<UserPlan>> {
        self.scan_values(cf::USER_PLANS, &[])
    }

    fn put_billing_info(&mut self, principal: &PrincipalId, info: &BillingInfo) -> Result<()> {
        self.put_value(cf::BILLING_INFO, keys::principal_key(principal), info)
    }

    fn get_billing_info(&self, principal: &PrincipalId) -> Result<Option<BillingInfo>> {
        self.get_value(cf::BILLING_INFO, &keys::principal_key(principal))
    }

    // =========================================================================
    // Orders
    // =========================================================================

    fn put_order(&mut self, order: &Order) -> Result<()> {
        self.put_value(cf::ORDERS, keys::order_key(&order.id), order)?;
        self.raw_put(
            cf::ORDERS_BY_PRINCIPAL,
            keys::principal_order_key(&order.principal, &order.id),
            Vec::new(),
        );
        Ok(())
    }

    fn get_order(&self, order_id: &OrderId) -> Result<Option<Order>> {
        self.get_value(cf::ORDERS, &keys::order_key(order_id))
    }

    fn list_orders_by_principal(&self, principal: &PrincipalId) -> Result<Vec<Order>> {
        let mut orders = Vec::new();
        for (key, _) in self.raw_scan(cf::ORDERS_BY_PRINCIPAL, &keys::principal_key(principal))? {
            let order_id = OrderId::from_bytes(keys::trailing_id_bytes(&key)?);
            if let Some(order) = self.get_order(&order_id)? {
                orders.push(order);
            }
        }
        Ok(orders)
    }

    // =========================================================================
    // Invoices
    // =========================================================================

    fn put_invoice(&mut self, invoice: &Invoice) -> Result<()> {
        self.put_value(cf::INVOICES, keys::invoice_key(&invoice.id), invoice)?;
        self.raw_put(
            cf::INVOICES_BY_ORDER,
            keys::order_invoice_key(&invoice.order_id, &invoice.id),
            Vec::new(),
        );
        self.raw_put(
            cf::INVOICES_BY_TYPE,
            keys::type_invoice_key(invoice.kind, &invoice.id),
            Vec::new(),
        );
        Ok(())
    }

    fn get_invoice(&self, invoice_id: &InvoiceId) -> Result<Option<Invoice>> {
        self.get_value(cf::INVOICES, &keys::invoice_key(invoice_id))
    }

    fn list_invoices_by_order(&self, order_id: &OrderId) -> Result<Vec<Invoice>> {
        self.invoices_from_index(cf::INVOICES_BY_ORDER, &keys::order_key(order_id))
    }

    fn list_invoices_by_type(&self, kind: InvoiceType) -> Result<Vec<Invoice>> {
        self.invoices_from_index(cf::INVOICES_BY_TYPE, &[keys::invoice_type_tag(kind)])
    }

    // =========================================================================
    // Counters
    // =========================================================================

    fn has_sequence(&self, name: &str) -> Result<bool> {
        Ok(self
            .raw_get(cf::COUNTERS, &keys::counter_key(name))?
            .is_some())
    }

    fn next_sequence_value(&mut self, name: &str, initial: i64) -> Result<i64> {
        let key = keys::counter_key(name);
        if !self.counters_read.contains_key(&key) {
            let committed = self.backend.get(cf::COUNTERS, &key)?;
            self.counters_read.insert(key.clone(), committed);
        }
        let next = match self.raw_get(cf::COUNTERS, &key)? {
            None => initial,
            Some(data) => {
                let bytes: [u8; 8] = data.as_slice().try_into().map_err(|_| {
                    StoreError::Serialization(format!("counter {name} is not an i64"))
                })?;
                i64::from_be_bytes(bytes) + 1
            }
        };
        self.raw_put(cf::COUNTERS, key, next.to_be_bytes().to_vec());
        Ok(next)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        if this.pending.is_empty() {
            return Ok(());
        }
        let batch: Vec<BatchEntry> = this
            .pending
            .into_iter()
            .map(|((cf, key), value)| (cf, key, value))
            .collect();
        tracing::trace!(writes = batch.len(), "Committing transaction");
        if this.counters_read.is_empty() {
            return this.backend.write_batch(batch);
        }
        let expected = this
            .counters_read
            .into_iter()
            .map(|(key, value)| (cf::COUNTERS, key, value))
            .collect();
        this.backend.write_batch_checked(expected, batch)
    }
}
