//! The plans engine.
//!
//! This crate turns the types of `plans-core` into a running system:
//!
//! - **Accounts** - activation, extension, plan changes and expiry of user plans
//! - **Orders** - creation with VAT, completion, cancellation, returns
//! - **Invoices** - dense per-period numbering and templated full numbers
//! - **Taxation** - flat or EU VAT rules, backed by VIES and TEDB
//! - **Batch jobs** - automatic renewal scheduling and the expiry run
//!
//! # Events
//!
//! State changes are announced on an [`EventBus`] after their transaction commits. The
//! engine itself reacts to some of them: `order_completed` issues an invoice,
//! `order_started` a proforma when configured, and `activate_user_plan` initializes the
//! account.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod host;
pub mod invoices;
pub mod mail;
pub mod orders;
pub mod renewal;
pub mod taxation;
pub mod tedb;
pub mod user_plans;
pub mod vies;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::ServiceConfig;
pub use engine::{EngineBuilder, PlansEngine};
pub use error::{Result, ServiceError};
pub use events::{EventBus, EventSubscriber, SubscriberError};
pub use host::{
    BuyerResolver, Contact, InMemoryDirectory, MemorySessionCache, PrincipalDirectory,
    RequestContext, RequestScopedCache, SelfBuyer,
};
pub use mail::{Letter, LogMailer, Mail, MailError, Mailer, Postman};
pub use renewal::{AutorenewOptions, ExpiryReport};
pub use taxation::{EuTaxationPolicy, FlatTaxationPolicy, RateCache, TaxRate, TaxationPolicy};
pub use tedb::{RateSource, TedbClient, TedbError};
pub use user_plans::{PlanChangeQuote, RenewalSetup};
pub use vies::{VatValidator, ViesClient, ViesError};
