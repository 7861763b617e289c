//! Taxation policies.
//!
//! A policy turns `(buyer tax id, buyer country)` into the VAT rate of an order. A rate of
//! `None` means VAT is not applicable (export or reverse charge). `successful = false`
//! means an external lookup failed and the rate is a fallback the caller should not
//! persist over a known good value.

pub mod cache;
pub mod eu;

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use plans_core::{PlansConfig, TaxationPolicyKind};

use crate::clock::Clock;
use crate::error::Result;
use crate::tedb::RateSource;
use crate::vies::VatValidator;

pub use cache::RateCache;
pub use eu::EuTaxationPolicy;

/// Result of a tax rate lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaxRate {
    /// Rate in percent; `None` when VAT is not applicable.
    pub rate: Option<Decimal>,
    /// Whether every external lookup succeeded.
    pub successful: bool,
}

impl TaxRate {
    /// An authoritative rate.
    #[must_use]
    pub const fn of(rate: Option<Decimal>) -> Self {
        Self {
            rate,
            successful: true,
        }
    }

    /// A fallback rate after a failed lookup.
    #[must_use]
    pub const fn fallback(rate: Option<Decimal>) -> Self {
        Self {
            rate,
            successful: false,
        }
    }
}

/// Decides the VAT rate of a buyer.
#[async_trait]
pub trait TaxationPolicy: Send + Sync {
    /// Rate for a buyer with full VAT id `tax_id` (country prefix included) in `country`.
    async fn tax_rate(&self, tax_id: Option<&str>, country: Option<&str>) -> TaxRate;
}

/// Everybody pays the issuer's configured tax.
#[derive(Debug, Clone, Copy)]
pub struct FlatTaxationPolicy {
    tax: Option<Decimal>,
}

impl FlatTaxationPolicy {
    /// Policy charging `tax`.
    #[must_use]
    pub const fn new(tax: Option<Decimal>) -> Self {
        Self { tax }
    }
}

#[async_trait]
impl TaxationPolicy for FlatTaxationPolicy {
    async fn tax_rate(&self, _tax_id: Option<&str>, _country: Option<&str>) -> TaxRate {
        TaxRate::of(self.tax)
    }
}

/// Build the policy selected by `config`.
///
/// `vies` and `rates` are only used by the EU policy; without `rates` the embedded rate
/// table is used.
///
/// # Errors
///
/// Returns a configuration error when the EU policy is selected with an issuer outside
/// the EU.
pub fn from_config(
    config: &PlansConfig,
    vies: Arc<dyn VatValidator>,
    rates: Option<Arc<dyn RateSource>>,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn TaxationPolicy>> {
    match config.taxation_policy {
        TaxationPolicyKind::Flat => Ok(Arc::new(FlatTaxationPolicy::new(config.tax))),
        TaxationPolicyKind::Eu => Ok(Arc::new(EuTaxationPolicy::new(
            config.tax_country.clone(),
            config.tax,
            vies,
            RateCache::new(rates, clock),
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn flat_policy_ignores_buyer() {
        let policy = FlatTaxationPolicy::new(Some(dec!(23)));
        assert_eq!(
            policy.tax_rate(Some("DE123456789"), Some("DE")).await,
            TaxRate::of(Some(dec!(23)))
        );
        assert_eq!(policy.tax_rate(None, None).await.rate, Some(dec!(23)));
    }
}
