//! Storage layer for the plans engine.
//!
//! All reads and writes happen inside a transaction obtained from [`Store::begin`].
//! Writes become visible to other transactions only on [`StoreTx::commit`]; dropping a
//! transaction discards them.
//!
//! # Architecture
//!
//! The store is an ordered key-value database with the following column families:
//!
//! - `plans`, `plan_pricings`, `plan_quotas`: the catalogue
//! - `user_plans`, `billing_info`: per-principal state, keyed by `principal_id`
//! - `orders`, `orders_by_principal`: orders (ULID) and their owner index
//! - `invoices`, `invoices_by_order`, `invoices_by_type`: invoices and their indexes
//! - `counters`: invoice number sequences
//!
//! [`MemoryStore`] keeps them in memory; `RocksStore` (feature `rocksdb-backend`) in
//! `RocksDB`, with values encoded as CBOR in both.
//!
//! # Example
//!
//! ```
//! use plans_core::{Plan, PrincipalId, UserPlan};
//! use plans_store::{MemoryStore, Store};
//!
//! let store = MemoryStore::new();
//! let plan = Plan::new("Free", "free").as_default();
//! let principal = PrincipalId::generate();
//!
//! let mut tx = store.begin().unwrap();
//! tx.put_plan(&plan).unwrap();
//! tx.put_user_plan(&UserPlan::new(principal, plan.id)).unwrap();
//! tx.commit().unwrap();
//!
//! let tx = store.begin().unwrap();
//! assert_eq!(tx.get_user_plan(&principal).unwrap().unwrap().plan_id, plan.id);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod kv;
pub mod memory;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use kv::{Backend, KvStore};
pub use memory::{MemoryBackend, MemoryStore};
#[cfg(feature = "rocksdb-backend")]
pub use rocks::{RocksBackend, RocksStore};

use plans_core::{
    BillingInfo, Invoice, InvoiceId, InvoiceType, Order, OrderId, Plan, PlanId, PlanPricing,
    PlanQuota, PrincipalId, UserPlan,
};

/// A transactional store.
pub trait Store: Send + Sync {
    /// Start a transaction.
    ///
    /// Transactions of one store run one at a time; `begin` blocks until the previous
    /// transaction is committed or dropped. Never begin a second transaction on a thread
    /// that still holds one.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot start a transaction.
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>>;
}

/// The operations available inside a transaction.
pub trait StoreTx {
    // =========================================================================
    // Catalogue
    // =========================================================================

    /// Insert or update a plan.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Constraint` if another plan has the same slug, or if the plan
    /// is the default and another default plan exists.
    fn put_plan(&mut self, plan: &Plan) -> Result<()>;

    /// Get a plan by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_plan(&self, plan_id: &PlanId) -> Result<Option<Plan>>;

    /// All plans, ordered by their `order` field.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_plans(&self) -> Result<Vec<Plan>>;

    /// Insert or update the price of a plan for one pricing period.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_plan_pricing(&mut self, plan_pricing: &PlanPricing) -> Result<()>;

    /// Prices of a plan, shortest period first. Empty for free plans.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_plan_pricings(&self, plan_id: &PlanId) -> Result<Vec<PlanPricing>>;

    /// Insert or update a quota value of a plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_plan_quota(&mut self, plan_quota: &PlanQuota) -> Result<()>;

    /// Quota values of a plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_plan_quotas(&self, plan_id: &PlanId) -> Result<Vec<PlanQuota>>;

    // =========================================================================
    // Accounts
    // =========================================================================

    /// Insert or update a user plan, including its recurring bundle.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_user_plan(&mut self, user_plan: &UserPlan) -> Result<()>;

    /// Get the user plan of a principal.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_user_plan(&self, principal: &PrincipalId) -> Result<Option<UserPlan>>;

    /// All user plans.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_user_plans(&self) -> Result<Vec<UserPlan>>;

    /// Insert or update the billing info of a principal.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_billing_info(&mut self, principal: &PrincipalId, info: &BillingInfo) -> Result<()>;

    /// Get the billing info of a principal.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_billing_info(&self, principal: &PrincipalId) -> Result<Option<BillingInfo>>;

    // =========================================================================
    // Orders
    // =========================================================================

    /// Insert or update an order. This also maintains the principal index.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_order(&mut self, order: &Order) -> Result<()>;

    /// Get an order by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_order(&self, order_id: &OrderId) -> Result<Option<Order>>;

    /// Orders of a principal, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_orders_by_principal(&self, principal: &PrincipalId) -> Result<Vec<Order>>;

    // =========================================================================
    // Invoices
    // =========================================================================

    /// Insert or update an invoice. This also maintains the order and type indexes.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_invoice(&mut self, invoice: &Invoice) -> Result<()>;

    /// Get an invoice by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_invoice(&self, invoice_id: &InvoiceId) -> Result<Option<Invoice>>;

    /// Invoices of an order, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_invoices_by_order(&self, order_id: &OrderId) -> Result<Vec<Invoice>>;

    /// All invoices of one type, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_invoices_by_type(&self, kind: InvoiceType) -> Result<Vec<Invoice>>;

    // =========================================================================
    // Counters
    // =========================================================================

    /// Whether the named sequence has allocated a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn has_sequence(&self, name: &str) -> Result<bool>;

    /// Allocate the next value of a named sequence.
    ///
    /// The first allocation returns `initial`; every later one the previous value plus
    /// one.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn next_sequence_value(&mut self, name: &str, initial: i64) -> Result<i64>;

    /// Make all writes of this transaction visible atomically.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if a transaction of another store sharing the
    /// database allocated from a sequence this one allocated from, or an error if the
    /// database operation fails. Nothing is written in either case.
    fn commit(self: Box<Self>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use chrono::{NaiveDate, Utc};
    use plans_core::{BillingInfo, Party, Pricing, Quota};
    use rust_decimal_macros::dec;

    fn invoice_for(order: &Order, kind: InvoiceType) -> Invoice {
        Invoice::from_order(
            order,
            kind,
            NaiveDate::from_ymd_opt(2012, 1, 14).unwrap(),
            "",
            &BillingInfo::default(),
            Party::default(),
        )
    }

    #[test]
    fn writes_are_visible_inside_and_after_commit_only() {
        let store = MemoryStore::new();
        let plan = Plan::new("Pro", "pro");

        let mut tx = store.begin().unwrap();
        tx.put_plan(&plan).unwrap();
        assert!(tx.get_plan(&plan.id).unwrap().is_some());
        drop(tx);

        let tx = store.begin().unwrap();
        assert!(tx.get_plan(&plan.id).unwrap().is_none());
        drop(tx);

        let mut tx = store.begin().unwrap();
        tx.put_plan(&plan).unwrap();
        tx.commit().unwrap();

        let tx = store.begin().unwrap();
        assert_eq!(tx.list_plans().unwrap().len(), 1);
    }

    #[test]
    fn plan_uniqueness_rules() {
        let store = MemoryStore::new();
        let mut tx = store.begin().unwrap();
        tx.put_plan(&Plan::new("Free", "free").as_default()).unwrap();

        let second_default = Plan::new("Basic", "basic").as_default();
        assert!(matches!(
            tx.put_plan(&second_default),
            Err(StoreError::Constraint(_))
        ));
        assert!(matches!(
            tx.put_plan(&Plan::new("Free again", "free")),
            Err(StoreError::Constraint(_))
        ));
        tx.put_plan(&Plan::new("Basic", "basic")).unwrap();
    }

    #[test]
    fn catalogue_lists_are_scoped_to_the_plan() {
        let store = MemoryStore::new();
        let pro = Plan::new("Pro", "pro");
        let basic = Plan::new("Basic", "basic");

        let mut tx = store.begin().unwrap();
        tx.put_plan_pricing(&PlanPricing::new(pro.id, Pricing::new("Yearly", 365), dec!(100)))
            .unwrap();
        tx.put_plan_pricing(&PlanPricing::new(pro.id, Pricing::new("Monthly", 30), dec!(10)))
            .unwrap();
        tx.put_plan_pricing(&PlanPricing::new(basic.id, Pricing::new("Monthly", 30), dec!(5)))
            .unwrap();
        tx.put_plan_quota(&PlanQuota {
            plan_id: pro.id,
            quota: Quota::new("MAX_STORAGE", "Storage"),
            value: Some(10),
        })
        .unwrap();
        tx.commit().unwrap();

        let tx = store.begin().unwrap();
        let periods: Vec<u32> = tx
            .list_plan_pricings(&pro.id)
            .unwrap()
            .iter()
            .map(|pp| pp.pricing.period)
            .collect();
        assert_eq!(periods, vec![30, 365]);
        assert_eq!(tx.list_plan_quotas(&pro.id).unwrap().len(), 1);
        assert!(tx.list_plan_quotas(&basic.id).unwrap().is_empty());
    }

    #[test]
    fn orders_and_invoices_are_indexed() {
        let store = MemoryStore::new();
        let principal = PrincipalId::generate();
        let order = Order::new(principal, PlanId::generate(), None, dec!(10), "EUR", Utc::now());
        let proforma = invoice_for(&order, InvoiceType::Proforma);
        let invoice = invoice_for(&order, InvoiceType::Invoice);

        let mut tx = store.begin().unwrap();
        tx.put_order(&order).unwrap();
        tx.put_invoice(&proforma).unwrap();
        tx.put_invoice(&invoice).unwrap();
        tx.commit().unwrap();

        let tx = store.begin().unwrap();
        assert_eq!(tx.list_orders_by_principal(&principal).unwrap(), vec![order.clone()]);
        assert!(tx
            .list_orders_by_principal(&PrincipalId::generate())
            .unwrap()
            .is_empty());
        assert_eq!(tx.list_invoices_by_order(&order.id).unwrap().len(), 2);
        let proformas = tx.list_invoices_by_type(InvoiceType::Proforma).unwrap();
        assert_eq!(proformas.len(), 1);
        assert_eq!(proformas[0].id, proforma.id);
    }

    #[test]
    fn sequences_start_at_initial_and_are_per_name() {
        let store = MemoryStore::new();
        let mut tx = store.begin().unwrap();
        assert_eq!(tx.next_sequence_value("a", 1).unwrap(), 1);
        assert_eq!(tx.next_sequence_value("a", 1).unwrap(), 2);
        assert_eq!(tx.next_sequence_value("b", 42).unwrap(), 42);
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        assert_eq!(tx.next_sequence_value("a", 100).unwrap(), 3);
    }

    #[test]
    fn has_sequence_sees_own_and_committed_allocations() {
        let store = MemoryStore::new();
        let mut tx = store.begin().unwrap();
        assert!(!tx.has_sequence("a").unwrap());
        tx.next_sequence_value("a", 1).unwrap();
        assert!(tx.has_sequence("a").unwrap());
        drop(tx);

        let mut tx = store.begin().unwrap();
        assert!(!tx.has_sequence("a").unwrap());
        tx.next_sequence_value("a", 1).unwrap();
        tx.commit().unwrap();
        assert!(store.begin().unwrap().has_sequence("a").unwrap());
    }

    #[test]
    fn stores_sharing_a_backend_detect_lost_allocations() {
        let backend = Arc::new(MemoryBackend::default());
        let first = KvStore::with_backend(Arc::clone(&backend));
        let second = KvStore::with_backend(Arc::clone(&backend));

        let mut slow = first.begin().unwrap();
        assert_eq!(slow.next_sequence_value("seq", 1).unwrap(), 1);

        let mut fast = second.begin().unwrap();
        assert_eq!(fast.next_sequence_value("seq", 1).unwrap(), 1);
        fast.commit().unwrap();

        let err = slow.commit().unwrap_err();
        assert!(matches!(err, StoreError::Conflict { ref key } if key == "seq"));

        let mut retry = first.begin().unwrap();
        assert_eq!(retry.next_sequence_value("seq", 1).unwrap(), 2);
        retry.commit().unwrap();
    }

    #[test]
    fn concurrent_allocations_are_dense() {
        let store = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..15)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let mut tx = store.begin().unwrap();
                    let value = tx.next_sequence_value("invoice_numbers", 1).unwrap();
                    tx.commit().unwrap();
                    value
                })
            })
            .collect();

        let values: BTreeSet<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(values, (1..=15).collect());
    }

    #[test]
    fn billing_info_round_trips() {
        let store = MemoryStore::new();
        let principal = PrincipalId::generate();
        let info = BillingInfo {
            name: "ACME".into(),
            country: "PL".into(),
            ..BillingInfo::default()
        };
        let mut tx = store.begin().unwrap();
        tx.put_billing_info(&principal, &info).unwrap();
        tx.commit().unwrap();

        let tx = store.begin().unwrap();
        assert_eq!(tx.get_billing_info(&principal).unwrap(), Some(info));
    }
}
