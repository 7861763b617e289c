//! EU VAT reference data.
//!
//! Standard VAT rates of the member states, used whenever the live TEDB service is not
//! reachable, and the country-code quirks of the EU VAT systems.

use rust_decimal::Decimal;

/// Standard VAT rate of every member state, keyed by ISO-3166 alpha-2 code.
const STANDARD_RATES: &[(&str, i64)] = &[
    ("AT", 20),
    ("BE", 21),
    ("BG", 20),
    ("CY", 19),
    ("CZ", 21),
    ("DE", 19),
    ("DK", 25),
    ("EE", 22),
    ("ES", 21),
    ("FI", 24),
    ("FR", 20),
    ("GR", 24),
    ("HR", 25),
    ("HU", 27),
    ("IE", 23),
    ("IT", 22),
    ("LT", 21),
    ("LU", 17),
    ("LV", 21),
    ("MT", 18),
    ("NL", 21),
    ("PL", 23),
    ("PT", 23),
    ("RO", 19),
    ("SE", 25),
    ("SI", 22),
    ("SK", 20),
];

/// Whether `country` (ISO alpha-2) is an EU member state.
#[must_use]
pub fn is_in_eu(country: &str) -> bool {
    STANDARD_RATES.iter().any(|(code, _)| *code == country)
}

/// Static standard VAT rate of `country`, `None` outside the EU.
#[must_use]
pub fn static_standard_rate(country: &str) -> Option<Decimal> {
    STANDARD_RATES
        .iter()
        .find(|(code, _)| *code == country)
        .map(|(_, rate)| Decimal::from(*rate))
}

/// ISO codes of all member states.
pub fn member_states() -> impl Iterator<Item = &'static str> {
    STANDARD_RATES.iter().map(|(code, _)| *code)
}

/// Country code as used by VIES and TEDB (`GR` is `EL` there).
#[must_use]
pub fn vat_country_code(country: &str) -> &str {
    if country == "GR" {
        "EL"
    } else {
        country
    }
}

/// Inverse of [`vat_country_code`].
#[must_use]
pub fn iso_country_code(vat_code: &str) -> &str {
    if vat_code == "EL" {
        "GR"
    } else {
        vat_code
    }
}
