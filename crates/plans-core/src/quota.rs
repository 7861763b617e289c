//! Quota validators.
//!
//! A validator enforces one quota against the host's data. [`ValidatorRegistry`] runs all
//! configured validators against a plan's quota dictionary and sorts the failures into
//! those that block activation and those that are only reported.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{PlansError, Result, ValidationError};
use crate::plan::QuotaDict;
use crate::PrincipalId;

/// Extra input to a validator check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckContext {
    /// Objects the caller is about to add on top of the existing ones.
    pub add: u64,
}

/// A named check enforcing one quota.
pub trait QuotaValidator: Send + Sync {
    /// Codename of the quota this validator enforces.
    fn code(&self) -> &str;

    /// Whether a failure blocks account activation.
    fn required_to_activate(&self) -> bool {
        true
    }

    /// Check `principal` against `quota` (`None` = unlimited).
    ///
    /// # Errors
    ///
    /// Returns the [`ValidationError`] shown to the user when the quota is exceeded.
    fn check(
        &self,
        principal: &PrincipalId,
        quota: Option<i64>,
        ctx: &CheckContext,
    ) -> std::result::Result<(), ValidationError>;

    /// Side effect run only when the account gets activated under `quota`.
    fn on_activation(&self, _principal: &PrincipalId, _quota: Option<i64>) {}
}

/// Counts the host objects owned by a principal.
pub type CountFn = dyn Fn(&PrincipalId) -> u64 + Send + Sync;

/// Lists `(object name, attribute value)` pairs owned by a principal.
pub type AttributeFn = dyn Fn(&PrincipalId) -> Vec<(String, i64)> + Send + Sync;

/// Activation hook.
pub type ActivationFn = dyn Fn(&PrincipalId, Option<i64>) + Send + Sync;

/// Fails when `count + add > quota`.
#[derive(Clone)]
pub struct ModelCountValidator {
    code: String,
    required_to_activate: bool,
    message: String,
    count: Arc<CountFn>,
    on_activation: Option<Arc<ActivationFn>>,
}

impl ModelCountValidator {
    /// Validate `code` using `count` to get the number of owned objects.
    pub fn new(
        code: impl Into<String>,
        count: impl Fn(&PrincipalId) -> u64 + Send + Sync + 'static,
    ) -> Self {
        Self {
            code: code.into(),
            required_to_activate: true,
            message: "Limit of {code} exceeded: {total_count} of {quota} allowed".into(),
            count: Arc::new(count),
            on_activation: None,
        }
    }

    /// Report failures without blocking activation.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required_to_activate = false;
        self
    }

    /// Replace the failure message. `{code}`, `{quota}` and `{total_count}` are available.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Run `hook` when the account is activated.
    #[must_use]
    pub fn with_on_activation(
        mut self,
        hook: impl Fn(&PrincipalId, Option<i64>) + Send + Sync + 'static,
    ) -> Self {
        self.on_activation = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for ModelCountValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelCountValidator")
            .field("code", &self.code)
            .field("required_to_activate", &self.required_to_activate)
            .finish_non_exhaustive()
    }
}

impl QuotaValidator for ModelCountValidator {
    fn code(&self) -> &str {
        &self.code
    }

    fn required_to_activate(&self) -> bool {
        self.required_to_activate
    }

    fn check(
        &self,
        principal: &PrincipalId,
        quota: Option<i64>,
        ctx: &CheckContext,
    ) -> std::result::Result<(), ValidationError> {
        let Some(quota) = quota else {
            return Ok(());
        };
        let total = (self.count)(principal).saturating_add(ctx.add);
        let total_signed = i64::try_from(total).unwrap_or(i64::MAX);
        if total_signed > quota {
            return Err(ValidationError::new(self.message.clone())
                .with_param("code", &self.code)
                .with_param("quota", quota)
                .with_param("total_count", total));
        }
        Ok(())
    }

    fn on_activation(&self, principal: &PrincipalId, quota: Option<i64>) {
        if let Some(hook) = &self.on_activation {
            hook(principal, quota);
        }
    }
}

/// Fails when any owned object has `attribute > quota`.
#[derive(Clone)]
pub struct ModelAttributeValidator {
    code: String,
    attribute: String,
    required_to_activate: bool,
    items: Arc<AttributeFn>,
    on_activation: Option<Arc<ActivationFn>>,
}

impl ModelAttributeValidator {
    /// Validate `code` by comparing `attribute` of every item returned by `items`.
    pub fn new(
        code: impl Into<String>,
        attribute: impl Into<String>,
        items: impl Fn(&PrincipalId) -> Vec<(String, i64)> + Send + Sync + 'static,
    ) -> Self {
        Self {
            code: code.into(),
            attribute: attribute.into(),
            required_to_activate: true,
            items: Arc::new(items),
            on_activation: None,
        }
    }

    /// Report failures without blocking activation.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required_to_activate = false;
        self
    }

    /// Run `hook` when the account is activated.
    #[must_use]
    pub fn with_on_activation(
        mut self,
        hook: impl Fn(&PrincipalId, Option<i64>) + Send + Sync + 'static,
    ) -> Self {
        self.on_activation = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for ModelAttributeValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelAttributeValidator")
            .field("code", &self.code)
            .field("attribute", &self.attribute)
            .finish_non_exhaustive()
    }
}

impl QuotaValidator for ModelAttributeValidator {
    fn code(&self) -> &str {
        &self.code
    }

    fn required_to_activate(&self) -> bool {
        self.required_to_activate
    }

    fn check(
        &self,
        principal: &PrincipalId,
        quota: Option<i64>,
        _ctx: &CheckContext,
    ) -> std::result::Result<(), ValidationError> {
        let Some(quota) = quota else {
            return Ok(());
        };
        let offending: Vec<String> = (self.items)(principal)
            .into_iter()
            .filter(|(_, value)| *value > quota)
            .map(|(name, _)| name)
            .collect();
        if offending.is_empty() {
            return Ok(());
        }
        Err(
            ValidationError::new("Following {objects} have {attribute} over the limit of {quota}")
                .with_param("objects", offending.join(", "))
                .with_param("attribute", &self.attribute)
                .with_param("quota", quota),
        )
    }

    fn on_activation(&self, principal: &PrincipalId, quota: Option<i64>) {
        if let Some(hook) = &self.on_activation {
            hook(principal, quota);
        }
    }
}

/// Outcome of validating a principal against a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanValidation {
    /// Failures that block activation.
    pub required_to_activate: Vec<String>,
    /// Failures that are only reported.
    pub other: Vec<String>,
}

impl PlanValidation {
    /// Whether activation may proceed.
    #[must_use]
    pub fn can_activate(&self) -> bool {
        self.required_to_activate.is_empty()
    }
}

/// The configured set of validators.
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    validators: Vec<(String, Arc<dyn QuotaValidator>)>,
}

impl fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.validators.iter().map(|(code, _)| code))
            .finish()
    }
}

impl ValidatorRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a validator under its own quota code.
    #[must_use]
    pub fn with(mut self, validator: Arc<dyn QuotaValidator>) -> Self {
        self.register(validator);
        self
    }

    /// Add a validator under its own quota code.
    pub fn register(&mut self, validator: Arc<dyn QuotaValidator>) {
        self.validators
            .push((validator.code().to_string(), validator));
    }

    /// Build a registry from a `quota code → validator name` map.
    ///
    /// # Errors
    ///
    /// Returns [`PlansError::Configuration`] when a name is not among `available`.
    pub fn from_config(
        config: &BTreeMap<String, String>,
        available: &BTreeMap<String, Arc<dyn QuotaValidator>>,
    ) -> Result<Self> {
        let validators = config
            .iter()
            .map(|(code, name)| {
                available
                    .get(name)
                    .map(|validator| (code.clone(), Arc::clone(validator)))
                    .ok_or_else(|| {
                        PlansError::Configuration(format!(
                            "unknown validator {name:?} for quota {code:?}"
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { validators })
    }

    /// Append the validators of `other`.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        self.validators.extend(other.validators);
        self
    }

    /// Number of configured validators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Whether no validator is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Validate `principal` against `quotas`.
    ///
    /// With `on_activation` set, runs each validator's activation hook instead and
    /// returns an empty report.
    #[must_use]
    pub fn plan_validation(
        &self,
        principal: &PrincipalId,
        quotas: &QuotaDict,
        on_activation: bool,
    ) -> PlanValidation {
        let mut report = PlanValidation::default();
        let ctx = CheckContext::default();

        for (code, validator) in &self.validators {
            let quota = quotas.get(code).copied().flatten();
            if on_activation {
                validator.on_activation(principal, quota);
                continue;
            }
            if let Err(err) = validator.check(principal, quota, &ctx) {
                if validator.required_to_activate() {
                    report.required_to_activate.push(err.render());
                } else {
                    report.other.push(err.render());
                }
            }
        }
        report
    }
}
