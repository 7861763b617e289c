//! The plans engine.
//!
//! [`PlansEngine`] owns the store and every collaborator. Operations run in one store
//! transaction each; events and mails produced inside the transaction are collected in an
//! [`Outbox`] and only released after the commit, so subscribers never observe state that
//! was rolled back.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use plans_core::{
    Event, InvoiceType, NumberTemplate, PlanChangePolicy, PlansConfig, PrincipalId, QuotaDict,
    QuotaValidator, ValidatorRegistry,
};
use plans_store::{Store, StoreTx};

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, ServiceError};
use crate::events::EventBus;
use crate::host::{BuyerResolver, InMemoryDirectory, PrincipalDirectory, SelfBuyer};
use crate::mail::{Letter, LogMailer, Mailer, Postman};
use crate::taxation::{self, TaxationPolicy};
use crate::tedb::RateSource;
use crate::vies::{VatValidator, ViesClient};

/// Side effects of a transaction, released after it commits.
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    pub(crate) events: Vec<Event>,
    pub(crate) letters: Vec<Letter>,
    pub(crate) activations: Vec<(PrincipalId, QuotaDict)>,
}

impl Outbox {
    pub(crate) fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub(crate) fn mail(&mut self, letter: Letter) {
        self.letters.push(letter);
    }
}

/// The plans engine.
pub struct PlansEngine {
    pub(crate) config: Arc<PlansConfig>,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) bus: EventBus,
    pub(crate) postman: Postman,
    pub(crate) buyers: Arc<dyn BuyerResolver>,
    pub(crate) taxation: Arc<dyn TaxationPolicy>,
    pub(crate) change_policy: Arc<dyn PlanChangePolicy>,
    pub(crate) validators: ValidatorRegistry,
    pub(crate) number_template: NumberTemplate,
}

impl PlansEngine {
    /// Start building an engine over `store`.
    #[must_use]
    pub fn builder(config: PlansConfig, store: Arc<dyn Store>) -> EngineBuilder {
        EngineBuilder {
            config,
            store,
            clock: None,
            bus: None,
            mailer: None,
            directory: None,
            buyers: None,
            taxation: None,
            vies: None,
            rates: None,
            validators: ValidatorRegistry::new(),
            named_validators: BTreeMap::new(),
        }
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &PlansConfig {
        &self.config
    }

    /// The event bus; register subscribers here.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.bus
    }

    /// The engine clock.
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Run `f` in a transaction and release its outbox after the commit.
    pub(crate) fn transaction<T>(
        &self,
        f: impl FnOnce(&mut dyn StoreTx, &mut Outbox) -> Result<T>,
    ) -> Result<T> {
        let mut outbox = Outbox::default();
        let value = {
            let mut tx = self.store.begin()?;
            let value = f(tx.as_mut(), &mut outbox)?;
            tx.commit()?;
            value
        };
        self.release(outbox)?;
        Ok(value)
    }

    /// Read-only access; nothing is committed.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&dyn StoreTx) -> Result<T>) -> Result<T> {
        let tx = self.store.begin()?;
        f(tx.as_ref())
    }

    /// Deliver the side effects of a committed transaction.
    ///
    /// Mail goes first and never fails. Then each event runs its built-in reaction and is
    /// published to subscribers; the first failure stops the remaining events.
    pub(crate) fn release(&self, outbox: Outbox) -> Result<()> {
        for (principal, quotas) in outbox.activations {
            self.validators.plan_validation(&principal, &quotas, true);
        }
        for letter in outbox.letters {
            self.postman.deliver(letter);
        }
        for event in outbox.events {
            self.react(&event)?;
            self.bus.publish(&event)?;
        }
        Ok(())
    }

    fn react(&self, event: &Event) -> Result<()> {
        match event {
            Event::OrderCompleted { order } => {
                self.issue_invoice(&order.id, InvoiceType::Invoice)?;
            }
            Event::OrderStarted { order } if self.config.issue_proforma_on_create => {
                self.issue_invoice(&order.id, InvoiceType::Proforma)?;
            }
            Event::ActivateUserPlan { principal } => {
                self.initialize_user_plan(principal)?;
            }
            _ => {}
        }
        Ok(())
    }
}

impl std::fmt::Debug for PlansEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlansEngine")
            .field("config", &self.config)
            .field("validators", &self.validators)
            .field("subscribers", &self.bus.len())
            .finish_non_exhaustive()
    }
}

/// Collects the collaborators of a [`PlansEngine`].
///
/// Everything except the configuration and the store has a default: the system clock, a
/// fresh event bus, mail written to the log, no contact details, every principal paying
/// for itself, and the taxation policy selected by the configuration.
pub struct EngineBuilder {
    config: PlansConfig,
    store: Arc<dyn Store>,
    clock: Option<Arc<dyn Clock>>,
    bus: Option<EventBus>,
    mailer: Option<Arc<dyn Mailer>>,
    directory: Option<Arc<dyn PrincipalDirectory>>,
    buyers: Option<Arc<dyn BuyerResolver>>,
    taxation: Option<Arc<dyn TaxationPolicy>>,
    vies: Option<Arc<dyn VatValidator>>,
    rates: Option<Arc<dyn RateSource>>,
    validators: ValidatorRegistry,
    named_validators: BTreeMap<String, Arc<dyn QuotaValidator>>,
}

impl EngineBuilder {
    /// Use `clock`.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Publish to `bus`.
    #[must_use]
    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Send mail through `mailer`.
    #[must_use]
    pub fn mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    /// Look up contact details in `directory`.
    #[must_use]
    pub fn directory(mut self, directory: Arc<dyn PrincipalDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Resolve billable buyers with `buyers`.
    #[must_use]
    pub fn buyers(mut self, buyers: Arc<dyn BuyerResolver>) -> Self {
        self.buyers = Some(buyers);
        self
    }

    /// Use `taxation` instead of the policy selected by the configuration.
    #[must_use]
    pub fn taxation(mut self, taxation: Arc<dyn TaxationPolicy>) -> Self {
        self.taxation = Some(taxation);
        self
    }

    /// Validate VAT numbers with `vies` when the EU policy is built.
    #[must_use]
    pub fn vies(mut self, vies: Arc<dyn VatValidator>) -> Self {
        self.vies = Some(vies);
        self
    }

    /// Take standard VAT rates from `rates` when the EU policy is built.
    #[must_use]
    pub fn rates(mut self, rates: Arc<dyn RateSource>) -> Self {
        self.rates = Some(rates);
        self
    }

    /// Run `validators` before activation.
    #[must_use]
    pub fn validators(mut self, validators: ValidatorRegistry) -> Self {
        self.validators = validators;
        self
    }

    /// Make `validator` available under `name` to the configured `validators` map.
    #[must_use]
    pub fn named_validator(
        mut self,
        name: impl Into<String>,
        validator: Arc<dyn QuotaValidator>,
    ) -> Self {
        self.named_validators.insert(name.into(), validator);
        self
    }

    /// Validate the configuration and build the engine.
    ///
    /// Quota codes in [`PlansConfig::validators`] are bound to the validators registered
    /// with [`named_validator`](Self::named_validator) and run after the ones passed to
    /// [`validators`](Self::validators).
    ///
    /// # Errors
    ///
    /// Returns a configuration error if [`PlansConfig::validate`] fails, if a configured
    /// validator name is unknown, or if the EU policy cannot be built.
    pub fn build(self) -> Result<PlansEngine> {
        self.config.validate()?;
        let number_template = self.config.number_template()?;
        let configured =
            ValidatorRegistry::from_config(&self.config.validators, &self.named_validators)?;
        let validators = self.validators.merge(configured);
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let taxation: Arc<dyn TaxationPolicy> = match self.taxation {
            Some(taxation) => taxation,
            None => {
                let vies: Arc<dyn VatValidator> = match self.vies {
                    Some(vies) => vies,
                    None => Arc::new(
                        ViesClient::new(ViesClient::DEFAULT_BASE_URL, Duration::from_secs(10))
                            .map_err(|e| ServiceError::HttpClient(e.to_string()))?,
                    ),
                };
                taxation::from_config(&self.config, vies, self.rates, Arc::clone(&clock))?
            }
        };

        let postman = Postman::new(
            self.mailer.unwrap_or_else(|| Arc::new(LogMailer)),
            self.directory
                .unwrap_or_else(|| Arc::new(InMemoryDirectory::new())),
            self.config.emails.clone(),
        );

        tracing::info!(
            currency = %self.config.currency,
            taxation = ?self.config.taxation_policy,
            counter_reset = ?self.config.invoice_counter_reset,
            validators = validators.len(),
            "Plans engine configured"
        );

        Ok(PlansEngine {
            change_policy: self.config.change_policy.build(),
            config: Arc::new(self.config),
            store: self.store,
            clock,
            bus: self.bus.unwrap_or_default(),
            postman,
            buyers: self.buyers.unwrap_or_else(|| Arc::new(SelfBuyer)),
            taxation,
            validators,
            number_template,
        })
    }
}
