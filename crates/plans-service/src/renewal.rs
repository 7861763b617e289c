//! Batch jobs: automatic renewal and account expiry.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};

use plans_core::user_plan::start_of_day;
use plans_core::{Event, PrincipalId, UserPlan};

use crate::engine::PlansEngine;
use crate::error::Result;
use crate::mail::Letter;
use crate::user_plans::load_user_plan;

/// Options of one [`PlansEngine::autorenew_accounts`] run.
#[derive(Debug, Clone)]
pub struct AutorenewOptions {
    /// Only renew plans paid through these providers; `None` renews every provider.
    pub providers: Option<Vec<String>>,
    /// Pause after each renewal.
    pub throttle: Duration,
    /// Log and mail admins about a failed renewal instead of aborting the run.
    pub catch_exceptions: bool,
    /// Only log which accounts would be renewed.
    pub dry_run: bool,
    /// Reference time; defaults to the engine clock.
    pub now: Option<DateTime<Utc>>,
}

impl Default for AutorenewOptions {
    fn default() -> Self {
        Self {
            providers: None,
            throttle: Duration::ZERO,
            catch_exceptions: false,
            dry_run: false,
            now: None,
        }
    }
}

/// Outcome of [`PlansEngine::expire_accounts`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpiryReport {
    /// Accounts that were expired.
    pub expired: Vec<PrincipalId>,
    /// Accounts that got an expiry reminder.
    pub reminded: Vec<PrincipalId>,
}

impl PlansEngine {
    /// Whether `user_plan` is due for automatic renewal at `now`.
    fn renewal_due(&self, user_plan: &UserPlan, now: DateTime<Utc>) -> bool {
        let (Some(recurring), Some(expire)) = (&user_plan.recurring, user_plan.expire) else {
            return false;
        };
        if !recurring.renews_by_task() {
            return false;
        }
        match &self.config.autorenew_schedule {
            Some(schedule) => {
                let expire = start_of_day(expire);
                let max_after = chrono::Duration::days(self.config.autorenew_max_days_after_expiry);
                schedule.iter().any(|delta| {
                    let upper = now + *delta;
                    let in_window = expire >= upper - max_after && expire <= upper;
                    let not_tried = recurring
                        .last_renewal_attempt
                        .map_or(true, |last| last < expire - *delta);
                    in_window && not_tried
                })
            }
            None => user_plan
                .plan_autorenew_at(self.config.autorenew_before())
                .is_some_and(|renew_at| renew_at < now),
        }
    }

    /// Renew every account that is due, emitting `account_automatic_renewal` for each.
    ///
    /// The payment itself is up to the subscriber of that event. Returns the renewed
    /// (or, on a dry run, the due) accounts.
    ///
    /// # Errors
    ///
    /// Returns the first failed renewal unless `catch_exceptions` is set.
    pub async fn autorenew_accounts(&self, options: &AutorenewOptions) -> Result<Vec<PrincipalId>> {
        let now = options.now.unwrap_or_else(|| self.clock.now());
        let due: Vec<UserPlan> = self.read(|tx| {
            Ok(tx
                .list_user_plans()?
                .into_iter()
                .filter(|user_plan| self.renewal_due(user_plan, now))
                .filter(|user_plan| {
                    options.providers.as_ref().map_or(true, |providers| {
                        user_plan
                            .recurring
                            .as_ref()
                            .and_then(|r| r.payment_provider.as_ref())
                            .is_some_and(|provider| providers.contains(provider))
                    })
                })
                .collect())
        })?;

        tracing::info!(
            target: "plans::renewal",
            count = due.len(),
            dry_run = options.dry_run,
            "Accounts due for automatic renewal"
        );

        let mut renewed = Vec::with_capacity(due.len());
        for user_plan in due {
            let principal = user_plan.principal;
            if options.dry_run {
                tracing::info!(
                    target: "plans::renewal",
                    principal = %principal,
                    expire = ?user_plan.expire,
                    "Would renew account"
                );
                renewed.push(principal);
                continue;
            }

            match self.renew_account(&principal, now) {
                Ok(true) => renewed.push(principal),
                Ok(false) => continue,
                Err(e) if options.catch_exceptions => {
                    tracing::error!(
                        target: "plans::renewal",
                        principal = %principal,
                        error = %e,
                        "Automatic renewal failed"
                    );
                    self.postman
                        .deliver(Letter::autorenew_failed(principal, &e.to_string()));
                }
                Err(e) => return Err(e),
            }

            if !options.throttle.is_zero() {
                tokio::time::sleep(options.throttle).await;
            }
        }
        Ok(renewed)
    }

    /// Stamp and signal the renewal of `principal`, unless another run got there first.
    fn renew_account(&self, principal: &PrincipalId, now: DateTime<Utc>) -> Result<bool> {
        self.transaction(|tx, out| {
            let mut user_plan = load_user_plan(tx, principal)?;
            if !self.renewal_due(&user_plan, now) {
                tracing::info!(
                    target: "plans::renewal",
                    principal = %principal,
                    "Account no longer due, skipping renewal"
                );
                return Ok(false);
            }
            if let Some(recurring) = user_plan.recurring.as_mut() {
                recurring.last_renewal_attempt = Some(now);
            }
            tx.put_user_plan(&user_plan)?;
            tracing::info!(target: "plans::renewal", principal = %principal, "Renewing account");
            out.emit(Event::AccountAutomaticRenewal {
                principal: *principal,
            });
            Ok(true)
        })
    }

    /// Expire active accounts whose plan ended before `today` and remind accounts that
    /// expire in one of the configured numbers of days.
    ///
    /// # Errors
    ///
    /// Returns the first store or subscriber error; accounts handled before it stay
    /// handled.
    pub fn expire_accounts(&self, today: NaiveDate) -> Result<ExpiryReport> {
        let user_plans = self.read(|tx| Ok(tx.list_user_plans()?))?;

        let mut report = ExpiryReport::default();
        for user_plan in &user_plans {
            if user_plan.active && user_plan.is_expired(today) {
                self.expire_account(&user_plan.principal)?;
                report.expired.push(user_plan.principal);
            }
        }

        for days in &self.config.expiration_remind {
            let on = today + chrono::Duration::days(*days);
            for user_plan in user_plans.iter().filter(|up| up.expire == Some(on)) {
                self.remind_expire_soon(&user_plan.principal)?;
                report.reminded.push(user_plan.principal);
            }
        }

        tracing::info!(
            target: "plans::accounts",
            expired = report.expired.len(),
            reminded = report.reminded.len(),
            "Expiry run finished"
        );
        Ok(report)
    }
}
