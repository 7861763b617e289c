//! Service configuration.

use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

use chrono::Duration;
use rust_decimal::Decimal;

use plans_core::{
    ChangePolicyConfig, CounterReset, InvoiceType, Party, PlansConfig, StandardPlanChangePolicy,
    TaxationPolicyKind,
};

use crate::tedb::TedbClient;
use crate::vies::ViesClient;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Engine configuration.
    pub plans: PlansConfig,

    /// Path to `RocksDB` data directory (default: "/data/plans").
    pub data_dir: String,

    /// VIES REST endpoint.
    pub vies_url: String,

    /// TEDB SOAP endpoint; `None` uses the embedded rate table only.
    pub tedb_url: Option<String>,

    /// Timeout of VIES and TEDB calls in seconds.
    pub http_timeout_seconds: u64,

    /// Seconds between two worker runs.
    pub worker_interval_seconds: u64,

    /// Payment providers the renewal scheduler handles; empty means all.
    pub autorenew_providers: Vec<String>,

    /// Pause between two renewals in seconds.
    pub autorenew_throttle_seconds: u64,
}

/// Issuer secrets file structure.
#[derive(Debug, Deserialize)]
struct IssuerSecrets {
    name: String,
    #[serde(default)]
    street: String,
    #[serde(default)]
    zipcode: String,
    #[serde(default)]
    city: String,
    country: String,
    #[serde(default)]
    tax_number: String,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let issuer = load_issuer();
        let mut config = Self::from_lookup(|key| std::env::var(key).ok());
        if let Some(issuer) = issuer {
            config.plans.issuer = issuer;
        }
        config
    }

    /// Build the configuration from `lookup`, which returns the value of a variable.
    ///
    /// Unparsable values are logged and replaced by their default.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env = Env(&lookup);
        let defaults = PlansConfig::default();

        let tax = env.parsed::<Decimal>("PLANS_TAX");
        let tax_country = env.get("PLANS_TAX_COUNTRY").unwrap_or_default();
        let taxation_policy = match env.get("PLANS_TAXATION_POLICY").as_deref() {
            Some("eu" | "EU") => TaxationPolicyKind::Eu,
            Some("flat" | "FLAT") | None => TaxationPolicyKind::Flat,
            Some(other) => {
                tracing::warn!(value = %other, "Unknown PLANS_TAXATION_POLICY, using flat");
                TaxationPolicyKind::Flat
            }
        };

        let invoice_counter_reset = env
            .get("PLANS_INVOICE_COUNTER_RESET")
            .and_then(|value| match CounterReset::from_str(&value) {
                Ok(reset) => Some(reset),
                Err(e) => {
                    tracing::warn!(error = %e, "Invalid PLANS_INVOICE_COUNTER_RESET");
                    None
                }
            })
            .unwrap_or_default();

        let autorenew_schedule = env.get("PLANS_AUTORENEW_SCHEDULE").and_then(|value| {
            match parse_schedule(&value) {
                Ok(schedule) => Some(schedule),
                Err(e) => {
                    tracing::warn!(error = %e, "Invalid PLANS_AUTORENEW_SCHEDULE");
                    None
                }
            }
        });

        let plans = PlansConfig {
            tax,
            tax_country: tax_country.to_ascii_uppercase(),
            taxation_policy,
            currency: env.get("PLANS_CURRENCY").unwrap_or(defaults.currency),
            default_country: env.get("PLANS_DEFAULT_COUNTRY"),
            issuer: Party {
                name: env.get("PLANS_ISSUER_NAME").unwrap_or_default(),
                street: env.get("PLANS_ISSUER_STREET").unwrap_or_default(),
                zipcode: env.get("PLANS_ISSUER_ZIPCODE").unwrap_or_default(),
                city: env.get("PLANS_ISSUER_CITY").unwrap_or_default(),
                country: env
                    .get("PLANS_ISSUER_COUNTRY")
                    .unwrap_or_else(|| tax_country.to_ascii_uppercase()),
                tax_number: env.get("PLANS_ISSUER_TAX_NUMBER").unwrap_or_default(),
            },
            site_name: env.get("PLANS_SITE_NAME").unwrap_or(defaults.site_name),
            invoice_number_format: env
                .get("PLANS_INVOICE_NUMBER_FORMAT")
                .unwrap_or(defaults.invoice_number_format),
            invoice_counter_reset,
            invoice_template: env
                .get("PLANS_INVOICE_TEMPLATE")
                .unwrap_or(defaults.invoice_template),
            issue_proforma_on_create: env.flag("PLANS_ISSUE_PROFORMA_ON_CREATE", false),
            validators: env
                .list("PLANS_VALIDATORS")
                .into_iter()
                .filter_map(|pair| {
                    pair.split_once('=')
                        .map(|(code, name)| (code.trim().to_string(), name.trim().to_string()))
                })
                .collect(),
            default_grace_period_days: env
                .parsed("PLANS_DEFAULT_GRACE_PERIOD")
                .unwrap_or(defaults.default_grace_period_days),
            order_expiration_days: env
                .parsed("PLANS_ORDER_EXPIRATION")
                .unwrap_or(defaults.order_expiration_days),
            autorenew_schedule,
            autorenew_max_days_after_expiry: env
                .parsed("PLANS_AUTORENEW_MAX_DAYS_AFTER_EXPIRY")
                .unwrap_or(defaults.autorenew_max_days_after_expiry),
            autorenew_before_days: env
                .parsed("PLANS_AUTORENEW_BEFORE_DAYS")
                .unwrap_or(defaults.autorenew_before_days),
            autorenew_before_hours: env
                .parsed("PLANS_AUTORENEW_BEFORE_HOURS")
                .unwrap_or(defaults.autorenew_before_hours),
            expiration_remind: env
                .get("PLANS_EXPIRATION_REMIND")
                .map_or(defaults.expiration_remind, |value| {
                    value
                        .split(',')
                        .filter_map(|day| day.trim().parse().ok())
                        .collect()
                }),
            change_policy: change_policy(&env),
            emails: plans_core::EmailSettings {
                enabled: env.flag("PLANS_SEND_EMAILS", true),
                plan_changed: env.flag("PLANS_SEND_EMAILS_PLAN_CHANGED", true),
                plan_extended: env.flag("PLANS_SEND_EMAILS_PLAN_EXTENDED", true),
                disabled_invoice_types: env
                    .list("PLANS_SEND_EMAILS_DISABLED_INVOICE_TYPES")
                    .iter()
                    .filter_map(|kind| InvoiceType::from_str(kind).ok())
                    .collect(),
                from: env
                    .get("PLANS_EMAIL_FROM")
                    .unwrap_or(defaults.emails.from),
                admins: env.list("PLANS_ADMINS"),
            },
            fake_payments: env.flag("PLANS_FAKE_PAYMENTS", false),
        };

        Self {
            plans,
            data_dir: env.get("PLANS_DATA_DIR").unwrap_or_else(|| "/data/plans".into()),
            vies_url: env
                .get("PLANS_VIES_URL")
                .unwrap_or_else(|| ViesClient::DEFAULT_BASE_URL.into()),
            tedb_url: match env.get("PLANS_TEDB_URL") {
                Some(url) if url.is_empty() || url == "off" => None,
                Some(url) => Some(url),
                None => Some(TedbClient::DEFAULT_ENDPOINT.into()),
            },
            http_timeout_seconds: env.parsed("PLANS_HTTP_TIMEOUT_SECONDS").unwrap_or(10),
            worker_interval_seconds: env.parsed("PLANS_WORKER_INTERVAL_SECONDS").unwrap_or(3600),
            autorenew_providers: env.list("PLANS_AUTORENEW_PROVIDERS"),
            autorenew_throttle_seconds: env
                .parsed("PLANS_AUTORENEW_THROTTLE_SECONDS")
                .unwrap_or(0),
        }
    }

    /// Timeout of outbound calls.
    #[must_use]
    pub const fn http_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.http_timeout_seconds)
    }
}

struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string())
    }

    fn parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        let parsed = value.parse().ok();
        if parsed.is_none() {
            tracing::warn!(key = %key, value = %value, "Ignoring unparsable setting");
        }
        parsed
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key).map_or(default, |value| {
            matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
        })
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|value| {
                value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn change_policy(env: &Env<'_>) -> ChangePolicyConfig {
    match env.get("PLANS_CHANGE_POLICY").as_deref() {
        Some("basic") => ChangePolicyConfig::Basic,
        _ => {
            let defaults = StandardPlanChangePolicy::default();
            ChangePolicyConfig::Standard(StandardPlanChangePolicy {
                upgrade_percent_rate: env
                    .parsed("PLANS_UPGRADE_PERCENT_RATE")
                    .unwrap_or(defaults.upgrade_percent_rate),
                upgrade_charge: env
                    .parsed("PLANS_UPGRADE_CHARGE")
                    .unwrap_or(defaults.upgrade_charge),
                free_upgrade: env
                    .parsed("PLANS_FREE_UPGRADE")
                    .unwrap_or(defaults.free_upgrade),
                downgrade_charge: env.parsed("PLANS_DOWNGRADE_CHARGE"),
            })
        }
    }
}

/// Parse a renewal schedule such as `3d,-1d,12h`.
///
/// Every entry is a signed number followed by `d` (days) or `h` (hours); a bare number
/// means days. Negative entries lie after expiry.
///
/// # Errors
///
/// Returns a description of the first malformed entry.
pub fn parse_schedule(value: &str) -> Result<Vec<Duration>, String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| -> Result<Duration, String> {
            let (number, unit) = match entry.char_indices().last() {
                Some((i, 'd' | 'D')) => (&entry[..i], 'd'),
                Some((i, 'h' | 'H')) => (&entry[..i], 'h'),
                _ => (entry, 'd'),
            };
            let amount: i64 = number
                .trim()
                .parse()
                .map_err(|_| format!("invalid schedule entry {entry:?}"))?;
            Ok(if unit == 'h' {
                Duration::hours(amount)
            } else {
                Duration::days(amount)
            })
        })
        .collect()
}

/// Load the issuer block from a secrets file, if one exists.
fn load_issuer() -> Option<Party> {
    let secret_paths = [
        ".secrets/issuer.json",
        "plans/.secrets/issuer.json",
        "../.secrets/issuer.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<IssuerSecrets>(path) {
            tracing::info!(path = %path, "Loaded issuer from file");
            return Some(Party {
                name: secrets.name,
                street: secrets.street,
                zipcode: secrets.zipcode,
                city: secrets.city,
                country: secrets.country,
                tax_number: secrets.tax_number,
            });
        }
    }

    tracing::debug!("Issuer file not found, using environment variables");
    None
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            plans: PlansConfig::default(),
            data_dir: "/data/plans".into(),
            vies_url: ViesClient::DEFAULT_BASE_URL.into(),
            tedb_url: Some(TedbClient::DEFAULT_ENDPOINT.into()),
            http_timeout_seconds: 10,
            worker_interval_seconds: 3600,
            autorenew_providers: Vec::new(),
            autorenew_throttle_seconds: 0,
        }
    }
}
