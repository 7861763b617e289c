//! VIES REST API request and response types.

use serde::{Deserialize, Serialize};

/// Body of `POST /check-vat-number`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckVatRequest {
    /// VIES country code (`EL` for Greece).
    pub country_code: String,
    /// Number without the country prefix.
    pub vat_number: String,
}

/// Response of `POST /check-vat-number`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckVatResponse {
    /// Whether the number is registered.
    #[serde(default)]
    pub valid: bool,
    /// Registered name, when disclosed.
    #[serde(default)]
    pub name: Option<String>,
    /// Registered address, when disclosed.
    #[serde(default)]
    pub address: Option<String>,
    /// Errors reported instead of a result (member state unavailable…).
    #[serde(default)]
    pub error_wrappers: Vec<ViesErrorWrapper>,
}

/// One error reported by VIES.
#[derive(Debug, Clone, Deserialize)]
pub struct ViesErrorWrapper {
    /// Error code, e.g. `MS_UNAVAILABLE`.
    pub error: String,
    /// Human message.
    #[serde(default)]
    pub message: Option<String>,
}
