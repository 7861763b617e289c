//! Core types and policies of the plans engine.
//!
//! This crate holds everything that can be decided without a store or a network:
//!
//! - **Identifiers**: `PrincipalId`, `PlanId`, `PricingId`, `QuotaId`, `OrderId`, `InvoiceId`
//! - **Catalogue**: `Plan`, `Pricing`, `PlanPricing`, `Quota`, `PlanQuota`
//! - **Accounts**: `UserPlan`, `RecurringUserPlan`
//! - **Orders & invoices**: `Order`, `Invoice`, invoice numbering buckets and the number template
//! - **Policies**: plan-change pricing, quota validators, EU VAT data, VAT-number cleaning
//! - **Configuration**: `PlansConfig`
//!
//! # Money
//!
//! Amounts are [`rust_decimal::Decimal`]s and every rounding is half-up to two digits
//! (see [`money::round2`]). A tax of `None` means VAT is not applicable, which is not the
//! same as a zero rate.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod billing;
pub mod change_policy;
pub mod config;
pub mod error;
pub mod eu;
pub mod events;
pub mod ids;
pub mod invoice;
pub mod money;
pub mod numbering;
pub mod order;
pub mod plan;
pub mod quota;
pub mod template;
pub mod user_plan;

pub use billing::{clean_tax_number, validate_vat_number, BillingInfo};
pub use change_policy::{
    BasicPlanChangePolicy, ChangePolicyConfig, PlanChangePolicy, PricedPlan,
    StandardPlanChangePolicy,
};
pub use config::{
    EmailKind, EmailSettings, PlansConfig, TaxationPolicyKind, DEFAULT_GRACE_PERIOD_DAYS,
    DEFAULT_INVOICE_NUMBER_FORMAT,
};
pub use error::{PlansError, Result, ValidationError};
pub use events::Event;
pub use ids::{IdError, InvoiceId, OrderId, PlanId, PricingId, PrincipalId, QuotaId};
pub use invoice::{Invoice, InvoiceType, Party};
pub use numbering::{CounterReset, NumberAllocation};
pub use order::{Order, OrderStatus, DEFAULT_ORDER_EXPIRATION_DAYS};
pub use plan::{quota_dict, Plan, PlanPricing, PlanQuota, Pricing, Quota, QuotaDict};
pub use quota::{
    CheckContext, ModelAttributeValidator, ModelCountValidator, PlanValidation, QuotaValidator,
    ValidatorRegistry,
};
pub use template::NumberTemplate;
pub use user_plan::{RecurringUserPlan, RenewalTrigger, UserPlan};
