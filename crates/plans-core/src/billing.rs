//! Billing information and VAT-number normalisation.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::eu::{is_in_eu, vat_country_code};
use crate::PrincipalId;

/// Invoice counterparty of a principal.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BillingInfo {
    /// Principal this billing info belongs to (weak 1–1).
    pub principal: Option<PrincipalId>,

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

    /// Normalised tax number, see [`clean_tax_number`].
    pub tax_number: String,

    /// Shipping name, when different from `name`.
    pub shipping_name: String,

    /// Shipping street.
    pub shipping_street: String,

    /// Shipping postal code.
    pub shipping_zipcode: String,

    /// Shipping city.
    pub shipping_city: String,
}

impl BillingInfo {
    /// Full VAT ID (country prefix and number) if a tax number is set.
    #[must_use]
    pub fn full_tax_id(&self) -> Option<String> {
        if self.tax_number.is_empty() {
            return None;
        }
        let prefix = vat_country_code(&self.country);
        if self.tax_number.starts_with(prefix) {
            Some(self.tax_number.clone())
        } else {
            Some(format!("{prefix}{}", self.tax_number))
        }
    }

    /// Country code, `None` when unset.
    #[must_use]
    pub fn country_code(&self) -> Option<&str> {
        (!self.country.is_empty()).then_some(self.country.as_str())
    }
}

/// Normalise a VAT number typed by a user.
///
/// Upper-cases and strips everything outside `[A-Z0-9]`, checks that an alphabetic
/// prefix matches the VAT code of `country`, then validates the format for EU member
/// states. EU numbers are returned with their prefix (`GR` becomes `EL`), other numbers
/// without it.
///
/// # Errors
///
/// Returns a [`ValidationError`] when the prefix does not match the country or the number
/// is not a valid VAT number of that member state.
pub fn clean_tax_number(raw: &str, country: &str) -> Result<String, ValidationError> {
    let mut number: String = raw
        .to_uppercase()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect();
    if number.is_empty() {
        return Ok(number);
    }

    let prefix = vat_country_code(country);
    if number.len() >= 2 && number[..2].chars().all(|c| c.is_ascii_alphabetic()) {
        if &number[..2] != prefix {
            return Err(ValidationError::new(
                "VAT ID country code doesn't correspond with country",
            ));
        }
        number.drain(..2);
    }

    if is_in_eu(country) {
        let full_number = format!("{prefix}{number}");
        validate_vat_number(&full_number)?;
        Ok(full_number)
    } else {
        Ok(number)
    }
}

/// Per-member-state VAT number formats, keyed by VAT country code.
fn vat_formats() -> &'static HashMap<&'static str, Regex> {
    static FORMATS: OnceLock<HashMap<&'static str, Regex>> = OnceLock::new();
    FORMATS.get_or_init(|| {
        [
            ("AT", r"^U\d{8}$"),
            ("BE", r"^(?:[01]\d{9}|\d{9})$"),
            ("BG", r"^\d{9,10}$"),
            ("CY", r"^\d{8}[A-Z]$"),
            ("CZ", r"^\d{8,10}$"),
            ("DE", r"^\d{9}$"),
            ("DK", r"^\d{8}$"),
            ("EE", r"^\d{9}$"),
            ("EL", r"^\d{9}$"),
            ("ES", r"^[A-Z0-9]\d{7}[A-Z0-9]$"),
            ("FI", r"^\d{8}$"),
            ("FR", r"^[A-HJ-NP-Z0-9]{2}\d{9}$"),
            ("HR", r"^\d{11}$"),
            ("HU", r"^\d{8}$"),
            ("IE", r"^\d[A-Z0-9]\d{5}[A-Z]{1,2}$"),
            ("IT", r"^\d{11}$"),
            ("LT", r"^(?:\d{9}|\d{12})$"),
            ("LU", r"^\d{8}$"),
            ("LV", r"^\d{11}$"),
            ("MT", r"^\d{8}$"),
            ("NL", r"^\d{9}B\d{2}$"),
            ("PL", r"^\d{10}$"),
            ("PT", r"^\d{9}$"),
            ("RO", r"^\d{2,10}$"),
            ("SE", r"^\d{10}01$"),
            ("SI", r"^\d{8}$"),
            ("SK", r"^\d{10}$"),
        ]
        .into_iter()
        .filter_map(|(code, pattern)| Regex::new(pattern).ok().map(|re| (code, re)))
        .collect()
    })
}

/// Validate the format of a full EU VAT number (`DE123456789`).
///
/// # Errors
///
/// Returns a [`ValidationError`] naming the reason.
pub fn validate_vat_number(full_number: &str) -> Result<(), ValidationError> {
    if full_number.len() < 3 || !full_number.is_char_boundary(2) {
        return Err(ValidationError::new("The VAT number is too short."));
    }
    let (code, number) = full_number.split_at(2);
    let Some(format) = vat_formats().get(code) else {
        return Err(
            ValidationError::new("Unknown VAT country code: {code}").with_param("code", code)
        );
    };
    if format.is_match(number) {
        Ok(())
    } else {
        Err(
            ValidationError::new("The VAT number {number} has an invalid format.")
                .with_param("number", full_number),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_separators_and_keeps_prefix_for_eu() {
        assert_eq!(
            clean_tax_number("pl 526-000-12-46", "PL").unwrap(),
            "PL5260001246"
        );
        assert_eq!(clean_tax_number("5260001246", "PL").unwrap(), "PL5260001246");
    }

    #[test]
    fn greek_numbers_use_el_prefix() {
        assert_eq!(clean_tax_number("EL094259216", "GR").unwrap(), "EL094259216");
        assert_eq!(clean_tax_number("094259216", "GR").unwrap(), "EL094259216");
        assert!(clean_tax_number("GR094259216", "GR").is_err());
    }

    #[test]
    fn mismatched_prefix_is_rejected() {
        let err = clean_tax_number("DE123456789", "PL").unwrap_err();
        assert!(err.render().contains("doesn't correspond"));
    }

    #[test]
    fn invalid_eu_format_is_rejected() {
        let err = clean_tax_number("DE12345", "DE").unwrap_err();
        assert!(err.render().contains("DE12345"));
    }

    #[test]
    fn non_eu_numbers_are_returned_without_prefix() {
        assert_eq!(clean_tax_number("US-12-3456789", "US").unwrap(), "123456789");
        assert_eq!(clean_tax_number("", "US").unwrap(), "");
    }

    #[test]
    fn full_tax_id_adds_missing_prefix() {
        let mut info = BillingInfo {
            country: "BE".into(),
            tax_number: "0203201340".into(),
            ..BillingInfo::default()
        };
        assert_eq!(info.full_tax_id().as_deref(), Some("BE0203201340"));

        info.tax_number = "BE0203201340".into();
        assert_eq!(info.full_tax_id().as_deref(), Some("BE0203201340"));

        info.tax_number.clear();
        assert_eq!(info.full_tax_id(), None);
    }
}
