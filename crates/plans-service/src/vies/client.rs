//! VIES API client implementation.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::types::{CheckVatRequest, CheckVatResponse};

/// Error type for VIES operations.
#[derive(Debug, thiserror::Error)]
pub enum ViesError {
    /// HTTP request failed (connection, timeout, body).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// VIES answered with an error status.
    #[error("VIES API error: HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// VIES could not answer (member state service unavailable…).
    #[error("VIES service error: {0}")]
    Service(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Checks whether a VAT number is registered in VIES.
#[async_trait]
pub trait VatValidator: Send + Sync {
    /// Validate `number` (without prefix) of VIES country `country_code`.
    ///
    /// # Errors
    ///
    /// Returns [`ViesError`] when the service could not give an answer.
    async fn check_vat(&self, country_code: &str, number: &str) -> Result<bool, ViesError>;
}

/// VIES REST API client.
#[derive(Debug, Clone)]
pub struct ViesClient {
    client: Client,
    base_url: String,
}

impl ViesClient {
    /// Public VIES REST endpoint.
    pub const DEFAULT_BASE_URL: &'static str =
        "https://ec.europa.eu/taxation_customs/vies/rest-api";

    /// Create a new VIES client.
    ///
    /// # Errors
    ///
    /// Returns [`ViesError::Configuration`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ViesError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| ViesError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl VatValidator for ViesClient {
    async fn check_vat(&self, country_code: &str, number: &str) -> Result<bool, ViesError> {
        let url = format!("{}/check-vat-number", self.base_url);
        let request = CheckVatRequest {
            country_code: country_code.to_string(),
            vat_number: number.to_string(),
        };

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ViesError::Status {
                status: status.as_u16(),
            });
        }

        let body: CheckVatResponse = response.json().await?;
        if let Some(error) = body.error_wrappers.first() {
            return Err(ViesError::Service(
                error.message.clone().unwrap_or_else(|| error.error.clone()),
            ));
        }

        tracing::debug!(
            target: "plans::taxation",
            country = %country_code,
            valid = body.valid,
            "VIES check finished"
        );
        Ok(body.valid)
    }
}
