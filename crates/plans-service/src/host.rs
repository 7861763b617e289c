//! Collaborators supplied by the host application.
//!
//! The engine never authenticates anyone. It only needs to know where to mail a principal,
//! who pays for a principal, and, during a web request, where the buyer is and which
//! session to cache tax rates in.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use plans_core::PrincipalId;

/// Contact details of a principal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Contact {
    /// E-mail address, if the principal has one.
    pub email: Option<String>,
    /// Preferred language code, e.g. `pl`.
    pub language: Option<String>,
}

/// Looks up principals in the host's user model.
pub trait PrincipalDirectory: Send + Sync {
    /// Contact details of `principal`.
    fn contact(&self, principal: &PrincipalId) -> Contact;
}

/// A directory kept in memory, filled by the host.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    contacts: DashMap<PrincipalId, Contact>,
}

impl InMemoryDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the contact details of `principal`.
    pub fn insert(&self, principal: PrincipalId, contact: Contact) {
        self.contacts.insert(principal, contact);
    }
}

impl PrincipalDirectory for InMemoryDirectory {
    fn contact(&self, principal: &PrincipalId) -> Contact {
        self.contacts
            .get(principal)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}

/// Resolves the billable buyer of a principal (e.g. the team of a seat).
pub trait BuyerResolver: Send + Sync {
    /// Principal whose billing info is used for orders of `principal`.
    fn buyer(&self, principal: &PrincipalId) -> PrincipalId;
}

/// Every principal pays for itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfBuyer;

impl BuyerResolver for SelfBuyer {
    fn buyer(&self, principal: &PrincipalId) -> PrincipalId {
        *principal
    }
}

/// A cache that lives as long as one user session.
pub trait RequestScopedCache: Send + Sync {
    /// Cached value of `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Store `value` under `key`.
    fn set(&self, key: &str, value: String);
}

/// Session cache kept in memory.
#[derive(Debug, Default)]
pub struct MemorySessionCache {
    values: Mutex<HashMap<String, String>>,
}

impl RequestScopedCache for MemorySessionCache {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_string(), value);
        }
    }
}

/// What the host knows about the current request.
#[derive(Clone, Default)]
pub struct RequestContext {
    /// Buyer country resolved from the client address, if any.
    pub country: Option<String>,
    /// The user session, if any.
    pub session: Option<Arc<dyn RequestScopedCache>>,
}

impl RequestContext {
    /// Context with a session cache.
    #[must_use]
    pub fn with_session(session: Arc<dyn RequestScopedCache>) -> Self {
        Self {
            country: None,
            session: Some(session),
        }
    }

    /// Set the resolved client country.
    #[must_use]
    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("country", &self.country)
            .field("session", &self.session.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_defaults_to_empty_contact() {
        let directory = InMemoryDirectory::new();
        let principal = PrincipalId::generate();
        assert_eq!(directory.contact(&principal), Contact::default());

        directory.insert(
            principal,
            Contact {
                email: Some("a@example.com".into()),
                language: Some("pl".into()),
            },
        );
        assert_eq!(
            directory.contact(&principal).email.as_deref(),
            Some("a@example.com")
        );
    }

    #[test]
    fn session_cache_stores_values() {
        let cache = MemorySessionCache::default();
        assert_eq!(cache.get("k"), None);
        cache.set("k", "23".into());
        assert_eq!(cache.get("k").as_deref(), Some("23"));
    }
}
