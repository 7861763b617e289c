//! Numbered invoice documents.

use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::billing::BillingInfo;
use crate::order::Order;
use crate::template::{TemplateContext, TemplateValue};
use crate::{InvoiceId, OrderId, PrincipalId};

/// Days a proforma stays payable.
pub const PROFORMA_PAYMENT_DAYS: i64 = 14;

/// Kind of invoice document. Every kind has its own numbering sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceType {
    /// A VAT invoice for a completed order.
    Invoice,
    /// A copy of an invoice.
    Duplicate,
    /// A payment request issued before the order is paid.
    Proforma,
}

impl InvoiceType {
    /// Every invoice type.
    pub const ALL: [Self; 3] = [Self::Invoice, Self::Duplicate, Self::Proforma];

    /// Stable upper-case name, also used in sequence keys and templates.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Invoice => "INVOICE",
            Self::Duplicate => "DUPLICATE",
            Self::Proforma => "PROFORMA",
        }
    }
}

impl fmt::Display for InvoiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INVOICE" => Ok(Self::Invoice),
            "DUPLICATE" => Ok(Self::Duplicate),
            "PROFORMA" => Ok(Self::Proforma),
            other => Err(format!("unknown invoice type: {other}")),
        }
    }
}

/// Name and address block printed on an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Party {
    /// Company or person name.
    pub name: String,
    /// Street and number.
    pub street: String,
    /// Postal code.
    pub zipcode: String,
    /// City.
    pub city: String,
    /// ISO-3166 alpha-2 country code.
    pub country: String,
    /// Full tax number, empty when none.
    pub tax_number: String,
}

impl Party {
    /// Buyer block from billing info.
    #[must_use]
    pub fn from_billing(info: &BillingInfo) -> Self {
        Self {
            name: info.name.clone(),
            street: info.street.clone(),
            zipcode: info.zipcode.clone(),
            city: info.city.clone(),
            country: info.country.clone(),
            tax_number: info.full_tax_id().unwrap_or_default(),
        }
    }

    /// Shipping block, when billing info carries a distinct one.
    #[must_use]
    pub fn shipping_from_billing(info: &BillingInfo) -> Option<Self> {
        if info.shipping_name.is_empty() && info.shipping_street.is_empty() {
            return None;
        }
        Some(Self {
            name: info.shipping_name.clone(),
            street: info.shipping_street.clone(),
            zipcode: info.shipping_zipcode.clone(),
            city: info.shipping_city.clone(),
            country: info.country.clone(),
            tax_number: String::new(),
        })
    }
}

/// An invoice document.
///
/// `number` is allocated from the sequence of `(kind, period bucket)`; `full_number` is
/// rendered from the number template once the number is committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// Invoice identifier.
    pub id: InvoiceId,
    /// Order this invoice documents.
    pub order_id: OrderId,
    /// Buyer principal.
    pub principal: PrincipalId,
    /// Document kind.
    pub kind: InvoiceType,
    /// Number within the sequence; 0 until allocated.
    pub number: i64,
    /// Human number rendered from the template; empty until rendered.
    pub full_number: String,
    /// Issue date.
    pub issued: NaiveDate,
    /// Issue date of the duplicate, for [`InvoiceType::Duplicate`].
    pub issued_duplicate: Option<NaiveDate>,
    /// Date the service was sold (the order completion day).
    pub selling_date: Option<NaiveDate>,
    /// Payment due or payment made.
    pub payment_date: NaiveDate,
    /// Net unit price.
    pub unit_price_net: Decimal,
    /// Quantity.
    pub quantity: u32,
    /// Net total.
    pub total_net: Decimal,
    /// Gross total.
    pub total: Decimal,
    /// Tax amount.
    pub tax_total: Decimal,
    /// Tax rate in percent, `None` when VAT is not applicable.
    pub tax: Option<Decimal>,
    /// Currency code.
    pub currency: String,
    /// Line item description.
    pub item_description: String,
    /// Buyer snapshot.
    pub buyer: Party,
    /// Shipping snapshot.
    pub shipping: Option<Party>,
    /// Issuer snapshot.
    pub issuer: Party,
}

impl Invoice {
    /// Draft an unnumbered invoice of `kind` for `order`.
    ///
    /// Amounts, tax and currency are copied from the order. A completed order is both the
    /// selling and the payment date; otherwise payment is due [`PROFORMA_PAYMENT_DAYS`]
    /// after `issued`.
    #[must_use]
    pub fn from_order(
        order: &Order,
        kind: InvoiceType,
        issued: NaiveDate,
        item_description: impl Into<String>,
        billing: &BillingInfo,
        issuer: Party,
    ) -> Self {
        let completed = order.completed.map(|c| c.date_naive());
        let total = order.total();
        Self {
            id: InvoiceId::generate(),
            order_id: order.id,
            principal: order.principal,
            kind,
            number: 0,
            full_number: String::new(),
            issued,
            issued_duplicate: (kind == InvoiceType::Duplicate).then_some(issued),
            selling_date: completed,
            payment_date: completed
                .unwrap_or_else(|| issued + Duration::days(PROFORMA_PAYMENT_DAYS)),
            unit_price_net: order.amount,
            quantity: 1,
            total_net: order.amount,
            total,
            tax_total: total - order.amount,
            tax: order.tax,
            currency: order.currency.clone(),
            item_description: item_description.into(),
            buyer: Party::from_billing(billing),
            shipping: Party::shipping_from_billing(billing),
            issuer,
        }
    }

    /// Variables for the number template.
    ///
    /// Exposes `invoice.<field>`, `INVOICE_TYPES.<TYPE>` and `invoice.INVOICE_TYPES.<TYPE>`.
    #[must_use]
    pub fn template_context(&self) -> TemplateContext {
        let mut ctx = TemplateContext::new();
        let mut put = |key: &str, value: TemplateValue| {
            ctx.insert(key.to_string(), value);
        };
        put("invoice.id", TemplateValue::Str(self.id.to_string()));
        put("invoice.number", TemplateValue::Int(self.number));
        put("invoice.type", TemplateValue::Str(self.kind.as_str().into()));
        put("invoice.issued", TemplateValue::Date(self.issued));
        put("invoice.payment_date", TemplateValue::Date(self.payment_date));
        put("invoice.currency", TemplateValue::Str(self.currency.clone()));
        if let Some(selling_date) = self.selling_date {
            put("invoice.selling_date", TemplateValue::Date(selling_date));
        }
        if let Some(issued_duplicate) = self.issued_duplicate {
            put("invoice.issued_duplicate", TemplateValue::Date(issued_duplicate));
        }
        for kind in InvoiceType::ALL {
            let value = TemplateValue::Str(kind.as_str().into());
            put(&format!("INVOICE_TYPES.{kind}"), value.clone());
            put(&format!("invoice.INVOICE_TYPES.{kind}"), value);
        }
        ctx
    }
}
