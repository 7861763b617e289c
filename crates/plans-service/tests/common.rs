//! Common test utilities for plans engine integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use rust_decimal::Decimal;

use plans_core::{
    BillingInfo, EmailKind, Event, Order, Plan, PlanPricing, PlanQuota, PlansConfig, Pricing,
    PrincipalId, Quota, UserPlan,
};
use plans_service::{
    Clock, Contact, EngineBuilder, FixedClock, InMemoryDirectory, Mail, MailError, Mailer,
    PlansEngine, SubscriberError,
};
use plans_store::{MemoryStore, Store};

/// Keeps every mail instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<Mail>>,
}

impl Mailer for RecordingMailer {
    fn send(&self, mail: &Mail) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

/// Test harness containing an engine over a memory store and a stopped clock.
pub struct TestHarness {
    /// The engine under test.
    pub engine: PlansEngine,
    /// The store behind the engine, for setting up fixtures.
    pub store: Arc<MemoryStore>,
    /// The engine clock.
    pub clock: Arc<FixedClock>,
    /// Mails sent by the engine.
    pub mailer: Arc<RecordingMailer>,
    /// Contact details used to address mails.
    pub directory: Arc<InMemoryDirectory>,
    /// Events published by the engine, in order.
    pub events: Arc<Mutex<Vec<Event>>>,
}

impl TestHarness {
    /// Harness with the default configuration, stopped at `today`.
    pub fn new(today: NaiveDate) -> Self {
        Self::with_config(today, PlansConfig::default())
    }

    /// Harness with `config`, stopped at `today`.
    pub fn with_config(today: NaiveDate, config: PlansConfig) -> Self {
        Self::with_builder(today, config, |builder| builder)
    }

    /// Harness whose engine builder is adjusted by `customize`.
    pub fn with_builder(
        today: NaiveDate,
        config: PlansConfig,
        customize: impl FnOnce(EngineBuilder) -> EngineBuilder,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::at_date(today));
        let mailer = Arc::new(RecordingMailer::default());
        let directory = Arc::new(InMemoryDirectory::new());

        let builder = PlansEngine::builder(config, store.clone())
            .clock(clock.clone())
            .mailer(mailer.clone())
            .directory(directory.clone());
        let engine = customize(builder).build().expect("Failed to build engine");

        let events = Arc::new(Mutex::new(Vec::new()));
        let log = events.clone();
        engine.events().subscribe(Arc::new(
            move |event: &Event| -> Result<(), SubscriberError> {
                log.lock().unwrap().push(event.clone());
                Ok(())
            },
        ));

        Self {
            engine,
            store,
            clock,
            mailer,
            directory,
            events,
        }
    }

    // ========================================================================
    // Fixtures
    // ========================================================================

    /// Store a plan.
    pub fn add_plan(&self, plan: Plan) -> Plan {
        let mut tx = self.store.begin().unwrap();
        tx.put_plan(&plan).unwrap();
        tx.commit().unwrap();
        plan
    }

    /// Store a visible, available plan called `name`.
    pub fn plan(&self, name: &str) -> Plan {
        self.add_plan(Plan::new(name, name.to_lowercase()))
    }

    /// Sell `plan` for `period` days at `price`.
    pub fn pricing(&self, plan: &Plan, name: &str, period: u32, price: Decimal) -> Pricing {
        let pricing = Pricing::new(name, period);
        let mut tx = self.store.begin().unwrap();
        tx.put_plan_pricing(&PlanPricing::new(plan.id, pricing.clone(), price))
            .unwrap();
        tx.commit().unwrap();
        pricing
    }

    /// Give `plan` a quota `codename` limited to `value`.
    pub fn quota(&self, plan: &Plan, codename: &str, value: Option<i64>) {
        let mut tx = self.store.begin().unwrap();
        tx.put_plan_quota(&PlanQuota {
            plan_id: plan.id,
            quota: Quota::new(codename, codename),
            value,
        })
        .unwrap();
        tx.commit().unwrap();
    }

    /// A principal with an e-mail address and no user plan yet.
    pub fn principal(&self) -> PrincipalId {
        let principal = PrincipalId::generate();
        self.directory.insert(
            principal,
            Contact {
                email: Some(format!("{principal}@example.com")),
                language: Some("en".into()),
            },
        );
        principal
    }

    /// A principal with an active user plan of `plan` expiring on `expire`.
    pub fn user(&self, plan: &Plan, expire: Option<NaiveDate>) -> PrincipalId {
        let principal = self.principal();
        let mut user_plan = UserPlan::new(principal, plan.id);
        user_plan.expire = expire;
        user_plan.active = true;
        self.save_user_plan(&user_plan);
        principal
    }

    /// Overwrite a user plan.
    pub fn save_user_plan(&self, user_plan: &UserPlan) {
        let mut tx = self.store.begin().unwrap();
        tx.put_user_plan(user_plan).unwrap();
        tx.commit().unwrap();
    }

    /// Store billing data of `principal`.
    pub fn billing(&self, principal: &PrincipalId, info: &BillingInfo) {
        let mut tx = self.store.begin().unwrap();
        tx.put_billing_info(principal, info).unwrap();
        tx.commit().unwrap();
    }

    /// Store a NEW order created now, without tax.
    pub fn order(
        &self,
        principal: &PrincipalId,
        plan: &Plan,
        pricing: Option<&Pricing>,
        amount: Decimal,
    ) -> Order {
        let order = Order::new(
            *principal,
            plan.id,
            pricing.cloned(),
            amount,
            "EUR",
            self.clock.now(),
        );
        let mut tx = self.store.begin().unwrap();
        tx.put_order(&order).unwrap();
        tx.commit().unwrap();
        order
    }

    // ========================================================================
    // Observations
    // ========================================================================

    /// Current user plan of `principal`.
    pub fn user_plan(&self, principal: &PrincipalId) -> UserPlan {
        self.engine.user_plan(principal).unwrap()
    }

    /// Mails sent so far of `kind`.
    pub fn mails(&self, kind: EmailKind) -> Vec<Mail> {
        self.mailer
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter(|mail| mail.kind == kind)
            .cloned()
            .collect()
    }

    /// Number of mails sent so far.
    pub fn mail_count(&self) -> usize {
        self.mailer.sent.lock().unwrap().len()
    }

    /// Signal names of the events published so far.
    pub fn event_names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(Event::name).collect()
    }

    /// Forget recorded mails and events.
    pub fn clear(&self) {
        self.mailer.sent.lock().unwrap().clear();
        self.events.lock().unwrap().clear();
    }
}

/// Shorthand for a calendar date.
pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}
