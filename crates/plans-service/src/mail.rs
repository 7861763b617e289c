//! Outgoing mail.
//!
//! Mail is fire-and-forget: a failed send is logged and never undoes the state change
//! that caused it.

use std::sync::Arc;

use plans_core::{EmailKind, EmailSettings, Invoice, PrincipalId};

use crate::host::PrincipalDirectory;

/// One outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    /// Category.
    pub kind: EmailKind,
    /// Recipients.
    pub to: Vec<String>,
    /// Sender.
    pub from: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// Language the host should render in, if known.
    pub language: Option<String>,
}

/// Error reported by a mail transport.
#[derive(Debug, thiserror::Error)]
#[error("mail transport error: {0}")]
pub struct MailError(pub String);

/// Mail transport provided by the host.
pub trait Mailer: Send + Sync {
    /// Deliver `mail`.
    ///
    /// # Errors
    ///
    /// Returns [`MailError`] when the transport rejected the message.
    fn send(&self, mail: &Mail) -> Result<(), MailError>;
}

/// Writes mails to the log instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, mail: &Mail) -> Result<(), MailError> {
        tracing::info!(
            kind = ?mail.kind,
            to = ?mail.to,
            subject = %mail.subject,
            "Mail not sent (log transport)"
        );
        Ok(())
    }
}

/// A mail that still has to be addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Letter {
    /// To a principal.
    Principal {
        /// Recipient.
        principal: PrincipalId,
        /// Category.
        kind: EmailKind,
        /// Subject line.
        subject: String,
        /// Body.
        body: String,
    },
    /// To the configured administrators.
    Admins {
        /// Subject line.
        subject: String,
        /// Body.
        body: String,
    },
}

impl Letter {
    /// Plan switch notice.
    #[must_use]
    pub fn plan_changed(principal: PrincipalId, plan_name: &str) -> Self {
        Self::Principal {
            principal,
            kind: EmailKind::PlanChanged,
            subject: "Your account plan has been changed".into(),
            body: format!("Your account now uses the {plan_name} plan."),
        }
    }

    /// Extension notice.
    #[must_use]
    pub fn plan_extended(
        principal: PrincipalId,
        plan_name: &str,
        expire: Option<chrono::NaiveDate>,
    ) -> Self {
        let until = expire.map_or_else(|| "without expiry".to_string(), |d| format!("until {d}"));
        Self::Principal {
            principal,
            kind: EmailKind::PlanExtended,
            subject: "Your account has been extended".into(),
            body: format!("Your {plan_name} plan is now valid {until}."),
        }
    }

    /// Expiry notice.
    #[must_use]
    pub fn expired(principal: PrincipalId, plan_name: &str) -> Self {
        Self::Principal {
            principal,
            kind: EmailKind::Expired,
            subject: "Your account has expired".into(),
            body: format!("Your {plan_name} plan has expired. Extend it to keep using the service."),
        }
    }

    /// Expiry reminder.
    #[must_use]
    pub fn expire_reminder(principal: PrincipalId, plan_name: &str, days: i64) -> Self {
        Self::Principal {
            principal,
            kind: EmailKind::ExpireReminder,
            subject: "Your account will expire soon".into(),
            body: format!("Your {plan_name} plan expires in {days} day(s)."),
        }
    }

    /// Invoice issued notice.
    #[must_use]
    pub fn invoice_created(invoice: &Invoice) -> Self {
        Self::Principal {
            principal: invoice.principal,
            kind: EmailKind::InvoiceCreated,
            subject: format!("{} {}", invoice.kind, invoice.full_number),
            body: format!(
                "A new document {} for {} {} has been issued.",
                invoice.full_number, invoice.total, invoice.currency
            ),
        }
    }

    /// Renewal failure notice for administrators.
    #[must_use]
    pub fn autorenew_failed(principal: PrincipalId, error: &str) -> Self {
        Self::Admins {
            subject: "Automatic renewal failed".into(),
            body: format!("Automatic renewal of account {principal} failed: {error}"),
        }
    }

    const fn kind(&self) -> EmailKind {
        match self {
            Self::Principal { kind, .. } => *kind,
            Self::Admins { .. } => EmailKind::AutorenewFailed,
        }
    }
}

/// Addresses letters and hands them to the transport.
#[derive(Clone)]
pub struct Postman {
    mailer: Arc<dyn Mailer>,
    directory: Arc<dyn PrincipalDirectory>,
    settings: EmailSettings,
}

impl Postman {
    /// Create a postman.
    #[must_use]
    pub fn new(
        mailer: Arc<dyn Mailer>,
        directory: Arc<dyn PrincipalDirectory>,
        settings: EmailSettings,
    ) -> Self {
        Self {
            mailer,
            directory,
            settings,
        }
    }

    /// Deliver `letter` if its category is enabled and it has recipients.
    ///
    /// Returns whether the transport accepted the mail.
    pub fn deliver(&self, letter: Letter) -> bool {
        let kind = letter.kind();
        if !self.settings.allows(kind) {
            tracing::debug!(kind = ?kind, "Mail category disabled");
            return false;
        }

        let (to, language, subject, body) = match letter {
            Letter::Principal {
                principal,
                subject,
                body,
                ..
            } => {
                let contact = self.directory.contact(&principal);
                let Some(email) = contact.email else {
                    tracing::debug!(principal = %principal, kind = ?kind, "Principal has no e-mail");
                    return false;
                };
                (vec![email], contact.language, subject, body)
            }
            Letter::Admins { subject, body } => (self.settings.admins.clone(), None, subject, body),
        };
        if to.is_empty() {
            return false;
        }

        let mail = Mail {
            kind,
            to,
            from: self.settings.from.clone(),
            subject,
            body,
            language,
        };
        match self.mailer.send(&mail) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, kind = ?kind, to = ?mail.to, "Failed to send mail");
                false
            }
        }
    }
}

impl std::fmt::Debug for Postman {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Postman")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
