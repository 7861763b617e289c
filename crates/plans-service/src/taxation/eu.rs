//! EU VAT rules.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use plans_core::eu::{is_in_eu, vat_country_code};
use plans_core::PlansError;

use super::{RateCache, TaxRate, TaxationPolicy};
use crate::error::Result;
use crate::vies::VatValidator;

/// EU taxation for an issuer registered in a member state.
///
/// | buyer | rate |
/// |---|---|
/// | unknown | issuer rate |
/// | private person in the EU | rate of the buyer's country |
/// | company in the issuer's country | issuer rate |
/// | company in another member state, VAT id valid in VIES | none (reverse charge) |
/// | company in another member state, VAT id invalid | rate of the buyer's country |
/// | anybody outside the EU | none (export) |
pub struct EuTaxationPolicy {
    issuer_country: String,
    issuer_rate: Option<Decimal>,
    vies: Arc<dyn VatValidator>,
    rates: RateCache,
}

impl EuTaxationPolicy {
    /// Create the policy.
    ///
    /// # Errors
    ///
    /// Returns [`PlansError::Configuration`] when `issuer_country` is not a member state.
    pub fn new(
        issuer_country: impl Into<String>,
        issuer_rate: Option<Decimal>,
        vies: Arc<dyn VatValidator>,
        rates: RateCache,
    ) -> Result<Self> {
        let issuer_country = issuer_country.into();
        if !is_in_eu(&issuer_country) {
            return Err(PlansError::Configuration(format!(
                "EU taxation requires an issuer in the EU, got {issuer_country:?}"
            ))
            .into());
        }
        Ok(Self {
            issuer_country,
            issuer_rate,
            vies,
            rates,
        })
    }

    async fn company_in_other_member_state(&self, tax_id: &str, country: &str) -> TaxRate {
        let prefix = vat_country_code(country);
        let number = tax_id.strip_prefix(prefix).unwrap_or(tax_id);
        match self.vies.check_vat(prefix, number).await {
            Ok(true) => TaxRate::of(None),
            Ok(false) => self.rates.standard_rate(country).await,
            Err(e) => {
                tracing::warn!(
                    target: "plans::taxation",
                    tax_id = %tax_id,
                    error = %e,
                    "VIES validation failed, charging buyer country rate"
                );
                TaxRate::fallback(self.rates.standard_rate(country).await.rate)
            }
        }
    }
}

#[async_trait]
impl TaxationPolicy for EuTaxationPolicy {
    async fn tax_rate(&self, tax_id: Option<&str>, country: Option<&str>) -> TaxRate {
        let tax_id = tax_id.filter(|id| !id.is_empty());
        let country = country.filter(|c| !c.is_empty());

        match (tax_id, country) {
            (None, None) => TaxRate::of(self.issuer_rate),
            (None, Some(country)) if is_in_eu(country) => {
                self.rates.standard_rate(country).await
            }
            (None, Some(_)) => TaxRate::of(None),
            (Some(_), Some(country)) if country == self.issuer_country => {
                TaxRate::of(self.issuer_rate)
            }
            (Some(tax_id), Some(country)) if is_in_eu(country) => {
                self.company_in_other_member_state(tax_id, country).await
            }
            (Some(_), _) => TaxRate::of(None),
        }
    }
}

impl std::fmt::Debug for EuTaxationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EuTaxationPolicy")
            .field("issuer_country", &self.issuer_country)
            .field("issuer_rate", &self.issuer_rate)
            .field("rates", &self.rates)
            .finish_non_exhaustive()
    }
}
