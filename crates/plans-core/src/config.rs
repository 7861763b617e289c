//! Engine configuration.
//!
//! [`PlansConfig`] is built once and handed to the engine; the service crate fills it from
//! the environment. Defaults match a fresh installation with monthly invoice numbering.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::change_policy::ChangePolicyConfig;
use crate::error::{PlansError, Result};
use crate::eu::is_in_eu;
use crate::invoice::{InvoiceType, Party};
use crate::money::validate_currency;
use crate::numbering::CounterReset;
use crate::template::NumberTemplate;

/// Default invoice number template: `7/FV/01/2012`, `3/PF/01/2012` for proformas.
pub const DEFAULT_INVOICE_NUMBER_FORMAT: &str = r#"{{ invoice.number }}/{% if invoice.type == INVOICE_TYPES.PROFORMA %}PF{% else %}FV{% endif %}/{{ invoice.issued|date:"m/Y" }}"#;

/// Days of validity given to a new account on a paid default plan.
pub const DEFAULT_GRACE_PERIOD_DAYS: i64 = 30;

/// Longest time after expiry during which automatic renewal is still attempted.
pub const DEFAULT_AUTORENEW_MAX_DAYS_AFTER_EXPIRY: i64 = 30;

/// Which taxation rules apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxationPolicyKind {
    /// Everyone pays the issuer's `tax`.
    #[default]
    Flat,
    /// EU VAT rules with VIES validation and TEDB rates.
    Eu,
}

/// Kinds of mail the engine sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailKind {
    /// The account switched plans.
    PlanChanged,
    /// The account was extended.
    PlanExtended,
    /// The account expired.
    Expired,
    /// The account expires soon.
    ExpireReminder,
    /// An invoice was issued.
    InvoiceCreated,
    /// Automatic renewal failed; sent to administrators.
    AutorenewFailed,
}

/// Mail toggles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSettings {
    /// Master switch.
    pub enabled: bool,
    /// Send [`EmailKind::PlanChanged`].
    pub plan_changed: bool,
    /// Send [`EmailKind::PlanExtended`].
    pub plan_extended: bool,
    /// Invoice types whose creation is not mailed.
    pub disabled_invoice_types: BTreeSet<InvoiceType>,
    /// Sender address.
    pub from: String,
    /// Administrators notified about renewal failures.
    pub admins: Vec<String>,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            plan_changed: true,
            plan_extended: true,
            disabled_invoice_types: BTreeSet::new(),
            from: "billing@localhost".into(),
            admins: Vec::new(),
        }
    }
}

impl EmailSettings {
    /// Whether a mail of `kind` goes out.
    #[must_use]
    pub fn allows(&self, kind: EmailKind) -> bool {
        self.enabled
            && match kind {
                EmailKind::PlanChanged => self.plan_changed,
                EmailKind::PlanExtended => self.plan_extended,
                _ => true,
            }
    }

    /// Whether creating an invoice of `kind` is mailed.
    #[must_use]
    pub fn allows_invoice(&self, kind: InvoiceType) -> bool {
        self.allows(EmailKind::InvoiceCreated) && !self.disabled_invoice_types.contains(&kind)
    }
}

/// Configuration of the plans engine.
#[derive(Debug, Clone)]
pub struct PlansConfig {
    /// Issuer default tax rate in percent; `None` when the issuer charges no VAT.
    pub tax: Option<Decimal>,

    /// Issuer country (ISO-3166 alpha-2).
    pub tax_country: String,

    /// Taxation rules.
    pub taxation_policy: TaxationPolicyKind,

    /// Three-letter currency of all orders.
    pub currency: String,

    /// Buyer country used when neither billing info nor the request tell one.
    pub default_country: Option<String>,

    /// Issuer block printed on invoices.
    pub issuer: Party,

    /// Seller name used in invoice line descriptions.
    pub site_name: String,

    /// Template of the human invoice number.
    pub invoice_number_format: String,

    /// When invoice numbering restarts.
    pub invoice_counter_reset: CounterReset,

    /// Path of the HTML invoice template, rendered by the host.
    pub invoice_template: String,

    /// Issue a proforma as soon as an order is created.
    pub issue_proforma_on_create: bool,

    /// Quota codename to validator name.
    pub validators: BTreeMap<String, String>,

    /// Days of validity on first initialisation of a paid default plan.
    pub default_grace_period_days: i64,

    /// Days a NEW order remains payable.
    pub order_expiration_days: i64,

    /// Renewal windows relative to expiry; `None` selects the single-offset path.
    pub autorenew_schedule: Option<Vec<Duration>>,

    /// Cap of the post-expiry renewal window.
    pub autorenew_max_days_after_expiry: i64,

    /// Single-offset renewal: days before expiry.
    pub autorenew_before_days: i64,

    /// Single-offset renewal: hours before expiry.
    pub autorenew_before_hours: i64,

    /// Days before expiry on which reminders are sent.
    pub expiration_remind: Vec<i64>,

    /// Plan-change pricing.
    pub change_policy: ChangePolicyConfig,

    /// Mail toggles.
    pub emails: EmailSettings,

    /// Allow completing orders without a payment provider.
    pub fake_payments: bool,
}

impl Default for PlansConfig {
    fn default() -> Self {
        Self {
            tax: None,
            tax_country: String::new(),
            taxation_policy: TaxationPolicyKind::Flat,
            currency: "EUR".into(),
            default_country: None,
            issuer: Party::default(),
            site_name: "Plans".into(),
            invoice_number_format: DEFAULT_INVOICE_NUMBER_FORMAT.into(),
            invoice_counter_reset: CounterReset::Monthly,
            invoice_template: "plans/invoices/PL_EN.html".into(),
            issue_proforma_on_create: false,
            validators: BTreeMap::new(),
            default_grace_period_days: DEFAULT_GRACE_PERIOD_DAYS,
            order_expiration_days: crate::order::DEFAULT_ORDER_EXPIRATION_DAYS,
            autorenew_schedule: None,
            autorenew_max_days_after_expiry: DEFAULT_AUTORENEW_MAX_DAYS_AFTER_EXPIRY,
            autorenew_before_days: 3,
            autorenew_before_hours: 0,
            expiration_remind: vec![3, 2, 1],
            change_policy: ChangePolicyConfig::default(),
            emails: EmailSettings::default(),
            fake_payments: false,
        }
    }
}

impl PlansConfig {
    /// Set the issuer tax country, rate and taxation rules.
    #[must_use]
    pub fn with_taxation(
        mut self,
        policy: TaxationPolicyKind,
        country: impl Into<String>,
        tax: Option<Decimal>,
    ) -> Self {
        self.taxation_policy = policy;
        self.tax_country = country.into();
        self.tax = tax;
        self
    }

    /// Set the currency.
    #[must_use]
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// Set the issuer block.
    #[must_use]
    pub fn with_issuer(mut self, issuer: Party) -> Self {
        self.issuer = issuer;
        self
    }

    /// Set the invoice number template and reset period.
    #[must_use]
    pub fn with_invoice_numbering(
        mut self,
        format: impl Into<String>,
        reset: CounterReset,
    ) -> Self {
        self.invoice_number_format = format.into();
        self.invoice_counter_reset = reset;
        self
    }

    /// Set the renewal schedule.
    #[must_use]
    pub fn with_autorenew_schedule(mut self, schedule: Vec<Duration>) -> Self {
        self.autorenew_schedule = Some(schedule);
        self
    }

    /// Set the plan-change pricing.
    #[must_use]
    pub fn with_change_policy(mut self, policy: ChangePolicyConfig) -> Self {
        self.change_policy = policy;
        self
    }

    /// Set the mail toggles.
    #[must_use]
    pub fn with_emails(mut self, emails: EmailSettings) -> Self {
        self.emails = emails;
        self
    }

    /// Enable or disable fake payments.
    #[must_use]
    pub const fn with_fake_payments(mut self, enabled: bool) -> Self {
        self.fake_payments = enabled;
        self
    }

    /// Enable or disable proformas on order creation.
    #[must_use]
    pub const fn with_proforma_on_create(mut self, enabled: bool) -> Self {
        self.issue_proforma_on_create = enabled;
        self
    }

    /// Order payability window.
    #[must_use]
    pub fn order_expiration(&self) -> Duration {
        Duration::days(self.order_expiration_days)
    }

    /// Offset of the single-offset renewal path.
    #[must_use]
    pub fn autorenew_before(&self) -> Duration {
        Duration::days(self.autorenew_before_days) + Duration::hours(self.autorenew_before_hours)
    }

    /// Parse the invoice number template.
    ///
    /// # Errors
    ///
    /// Returns [`PlansError::Template`] when the template does not parse.
    pub fn number_template(&self) -> Result<NumberTemplate> {
        NumberTemplate::parse(&self.invoice_number_format)
    }

    /// Check the configuration before the engine starts.
    ///
    /// # Errors
    ///
    /// Returns [`PlansError::Configuration`] for an unknown currency, an EU policy whose
    /// issuer is outside the EU, or negative periods; [`PlansError::Template`] for a broken
    /// invoice number template.
    pub fn validate(&self) -> Result<()> {
        validate_currency(&self.currency)?;

        if self.taxation_policy == TaxationPolicyKind::Eu && !is_in_eu(&self.tax_country) {
            return Err(PlansError::Configuration(format!(
                "issuer country {:?} is not an EU member state",
                self.tax_country
            )));
        }
        if self.default_grace_period_days < 0 {
            return Err(PlansError::Configuration(
                "default grace period must not be negative".into(),
            ));
        }
        if self.order_expiration_days < 1 {
            return Err(PlansError::Configuration(
                "order expiration must be at least one day".into(),
            ));
        }
        if self.autorenew_max_days_after_expiry < 0 {
            return Err(PlansError::Configuration(
                "autorenew max days after expiry must not be negative".into(),
            ));
        }
        if let Some(day) = self.expiration_remind.iter().find(|d| **d < 0) {
            return Err(PlansError::Configuration(format!(
                "expiration reminder offset {day} must not be negative"
            )));
        }
        self.number_template()?;
        Ok(())
    }
}
