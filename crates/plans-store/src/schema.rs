//! Column families of the plans store.
//!
//! Both backends use the same layout; the memory backend keeps one ordered map per
//! column family.

/// Column family names.
pub mod cf {
    /// Plans, keyed by `plan_id`.
    pub const PLANS: &str = "plans";

    /// Plan prices, keyed by `plan_id || pricing_id`.
    pub const PLAN_PRICINGS: &str = "plan_pricings";

    /// Plan quota values, keyed by `plan_id || quota_id`.
    pub const PLAN_QUOTAS: &str = "plan_quotas";

    /// User plans (with their recurring bundle), keyed by `principal_id`.
    pub const USER_PLANS: &str = "user_plans";

    /// Billing info, keyed by `principal_id`.
    pub const BILLING_INFO: &str = "billing_info";

    /// Orders, keyed by `order_id` (ULID).
    pub const ORDERS: &str = "orders";

    /// Index: orders by principal, keyed by `principal_id || order_id`. Empty values.
    pub const ORDERS_BY_PRINCIPAL: &str = "orders_by_principal";

    /// Invoices, keyed by `invoice_id` (ULID).
    pub const INVOICES: &str = "invoices";

    /// Index: invoices by order, keyed by `order_id || invoice_id`. Empty values.
    pub const INVOICES_BY_ORDER: &str = "invoices_by_order";

    /// Index: invoices by type, keyed by `type tag || invoice_id`. Empty values.
    pub const INVOICES_BY_TYPE: &str = "invoices_by_type";

    /// Sequence counters, keyed by sequence name; values are big-endian `i64`.
    pub const COUNTERS: &str = "counters";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::PLANS,
        cf::PLAN_PRICINGS,
        cf::PLAN_QUOTAS,
        cf::USER_PLANS,
        cf::BILLING_INFO,
        cf::ORDERS,
        cf::ORDERS_BY_PRINCIPAL,
        cf::INVOICES,
        cf::INVOICES_BY_ORDER,
        cf::INVOICES_BY_TYPE,
        cf::COUNTERS,
    ]
}
