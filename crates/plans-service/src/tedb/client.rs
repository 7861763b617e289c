//! TEDB SOAP client implementation.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use rust_decimal::Decimal;
use std::time::Duration;

use plans_core::eu::vat_country_code;

use super::types::{parse_vat_rates, retrieve_vat_rates_request, standard_rate};

/// Error type for TEDB operations.
#[derive(Debug, thiserror::Error)]
pub enum TedbError {
    /// HTTP request failed (connection, timeout, body).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// TEDB answered with an error status.
    #[error("TEDB API error: HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The response is not well-formed XML.
    #[error("XML error: {0}")]
    Xml(String),

    /// The service answered with a SOAP fault.
    #[error("SOAP fault: {0}")]
    Fault(String),

    /// The response has no standard rate for the member state.
    #[error("no standard rate for {country}")]
    NoRate {
        /// ISO country code.
        country: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Source of the standard VAT rate of a member state.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Standard rate of ISO country `country` valid on `on`.
    ///
    /// # Errors
    ///
    /// Returns [`TedbError`] when the rate could not be retrieved.
    async fn standard_rate(&self, country: &str, on: NaiveDate) -> Result<Decimal, TedbError>;
}

/// TEDB (Taxes in Europe Database) SOAP client.
#[derive(Debug, Clone)]
pub struct TedbClient {
    client: Client,
    endpoint: String,
}

impl TedbClient {
    /// Public TEDB VAT retrieval endpoint.
    pub const DEFAULT_ENDPOINT: &'static str =
        "https://ec.europa.eu/taxation_customs/tedb/ws/VatRetrievalService";

    /// Create a new TEDB client.
    ///
    /// # Errors
    ///
    /// Returns [`TedbError::Configuration`] if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TedbError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| TedbError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl RateSource for TedbClient {
    async fn standard_rate(&self, country: &str, on: NaiveDate) -> Result<Decimal, TedbError> {
        let member_state = vat_country_code(country);
        let body = retrieve_vat_rates_request(member_state, on);

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", "urn:ec.europa.eu:taxud:tedb:services:v1:VatRetrievalService/RetrieveVatRates")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        // Faults come back as HTTP 500 with a SOAP body.
        let results = match parse_vat_rates(&text) {
            Ok(results) if status.is_success() => results,
            Ok(_) => {
                return Err(TedbError::Status {
                    status: status.as_u16(),
                })
            }
            Err(e) => return Err(e),
        };

        let rate = standard_rate(&results, member_state).ok_or_else(|| TedbError::NoRate {
            country: country.to_string(),
        })?;
        tracing::debug!(
            target: "plans::taxation",
            country = %country,
            rate = %rate,
            "TEDB rate retrieved"
        );
        Ok(rate)
    }
}
