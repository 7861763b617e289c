//! Decimal money helpers.
//!
//! All amounts are [`Decimal`]s. Every rounding in the engine goes through [`round2`],
//! which rounds half away from zero to two fractional digits.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{PlansError, Result};

/// ISO-4217 codes accepted as the configured currency, sorted for binary search.
const ISO_CURRENCIES: &[&str] = &[
    "AED", "AFN", "ALL", "AMD", "ANG", "AOA", "ARS", "AUD", "AWG", "AZN", "BAM", "BBD", "BDT",
    "BGN", "BHD", "BIF", "BMD", "BND", "BOB", "BOV", "BRL", "BSD", "BTN", "BWP", "BYN", "BZD",
    "CAD", "CDF", "CHE", "CHF", "CHW", "CLF", "CLP", "CNY", "COP", "COU", "CRC", "CUC", "CUP",
    "CVE", "CZK", "DJF", "DKK", "DOP", "DZD", "EGP", "ERN", "ETB", "EUR", "FJD", "FKP", "GBP",
    "GEL", "GHS", "GIP", "GMD", "GNF", "GTQ", "GYD", "HKD", "HNL", "HRK", "HTG", "HUF", "IDR",
    "ILS", "INR", "IQD", "IRR", "ISK", "JMD", "JOD", "JPY", "KES", "KGS", "KHR", "KMF", "KPW",
    "KRW", "KWD", "KYD", "KZT", "LAK", "LBP", "LKR", "LRD", "LSL", "LYD", "MAD", "MDL", "MGA",
    "MKD", "MMK", "MNT", "MOP", "MRU", "MUR", "MVR", "MWK", "MXN", "MXV", "MYR", "MZN", "NAD",
    "NGN", "NIO", "NOK", "NPR", "NZD", "OMR", "PAB", "PEN", "PGK", "PHP", "PKR", "PLN", "PYG",
    "QAR", "RON", "RSD", "RUB", "RWF", "SAR", "SBD", "SCR", "SDG", "SEK", "SGD", "SHP", "SLE",
    "SLL", "SOS", "SRD", "SSP", "STN", "SVC", "SYP", "SZL", "THB", "TJS", "TMT", "TND", "TOP",
    "TRY", "TTD", "TWD", "TZS", "UAH", "UGX", "USD", "USN", "UYI", "UYU", "UYW", "UZS", "VED",
    "VES", "VND", "VUV", "WST", "XAF", "XAG", "XAU", "XBA", "XBB", "XBC", "XBD", "XCD", "XCG",
    "XDR", "XOF", "XPD", "XPF", "XPT", "XSU", "XUA", "YER", "ZAR", "ZMW", "ZWG", "ZWL",
];

/// Round to two decimal places, half away from zero.
#[must_use]
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Gross total of a net `amount` taxed at `tax` percent.
///
/// `None` tax means VAT is not applicable and the total equals the net amount.
#[must_use]
pub fn total_with_tax(amount: Decimal, tax: Option<Decimal>) -> Decimal {
    match tax {
        Some(rate) => round2(amount * (Decimal::ONE_HUNDRED + rate) / Decimal::ONE_HUNDRED),
        None => amount,
    }
}

/// Drop trailing zeros so `21.0` and `21` compare and print the same.
#[must_use]
pub fn normalize_rate(rate: Decimal) -> Decimal {
    rate.normalize()
}

/// Check that `code` is a known three-letter currency.
///
/// # Errors
///
/// Returns [`PlansError::Configuration`] for anything else.
pub fn validate_currency(code: &str) -> Result<()> {
    if ISO_CURRENCIES.binary_search(&code).is_ok() {
        Ok(())
    } else {
        Err(PlansError::Configuration(format!(
            "unknown currency code: {code:?}"
        )))
    }
}
