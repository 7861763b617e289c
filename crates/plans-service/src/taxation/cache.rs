//! Per-(country, day) cache of standard VAT rates.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;

use plans_core::eu::static_standard_rate;

use super::TaxRate;
use crate::clock::Clock;
use crate::tedb::RateSource;

/// How long a retrieved rate is reused.
pub const RATE_TTL_HOURS: i64 = 24;

/// How long a failed lookup is remembered before the source is asked again.
pub const FAILURE_TTL_MINUTES: i64 = 10;

/// A cached lookup; `rate` is `None` for a failed one.
#[derive(Debug, Clone, Copy)]
struct CachedRate {
    rate: Option<Decimal>,
    fetched: DateTime<Utc>,
}

/// Standard rates from a live source, cached, with the embedded table as fallback.
///
/// The cache is read through without holding any lock across the network call; when two
/// lookups race, the first stored value wins. Rates taken from the embedded table after
/// the source failed are reported as unsuccessful.
pub struct RateCache {
    source: Option<Arc<dyn RateSource>>,
    clock: Arc<dyn Clock>,
    entries: DashMap<(String, NaiveDate), CachedRate>,
    ttl: Duration,
    failure_ttl: Duration,
}

impl RateCache {
    /// Cache in front of `source`; without a source only the embedded table is used.
    #[must_use]
    pub fn new(source: Option<Arc<dyn RateSource>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            clock,
            entries: DashMap::new(),
            ttl: Duration::hours(RATE_TTL_HOURS),
            failure_ttl: Duration::minutes(FAILURE_TTL_MINUTES),
        }
    }

    /// Standard rate of EU country `country`, `None` outside the EU.
    ///
    /// Without a source the embedded table is authoritative. With one, a failed lookup
    /// yields the embedded rate as a fallback.
    pub async fn standard_rate(&self, country: &str) -> TaxRate {
        let Some(source) = self.source.as_ref() else {
            return TaxRate::of(static_standard_rate(country));
        };

        let now = self.clock.now();
        let key = (country.to_string(), now.date_naive());
        let cached = self.entries.get(&key).map(|entry| *entry.value());
        if let Some(cached) = cached.filter(|c| self.is_fresh(c, now)) {
            return match cached.rate {
                Some(rate) => TaxRate::of(Some(rate)),
                None => TaxRate::fallback(static_standard_rate(country)),
            };
        }

        match source.standard_rate(country, key.1).await {
            Ok(rate) => match self.store(key, Some(rate), now) {
                Some(rate) => TaxRate::of(Some(rate)),
                None => TaxRate::fallback(static_standard_rate(country)),
            },
            Err(e) => {
                tracing::warn!(
                    target: "plans::taxation",
                    country = %country,
                    error = %e,
                    "TEDB lookup failed, using embedded rate table"
                );
                self.store(key, None, now);
                TaxRate::fallback(static_standard_rate(country))
            }
        }
    }

    fn is_fresh(&self, cached: &CachedRate, now: DateTime<Utc>) -> bool {
        let ttl = if cached.rate.is_some() {
            self.ttl
        } else {
            self.failure_ttl
        };
        now - cached.fetched < ttl
    }

    fn store(
        &self,
        key: (String, NaiveDate),
        rate: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Option<Decimal> {
        self.entries.retain(|_, cached| self.is_fresh(cached, now));

        let fresh = CachedRate { rate, fetched: now };
        match self.entries.entry(key) {
            Entry::Occupied(mut entry) => {
                // A live rate always replaces a remembered failure.
                if entry.get().rate.is_some() {
                    entry.get().rate
                } else {
                    entry.insert(fresh);
                    rate
                }
            }
            Entry::Vacant(entry) => entry.insert(fresh).rate,
        }
    }

    /// Number of cached lookups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for RateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateCache")
            .field("live", &self.source.is_some())
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::tedb::TedbError;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl Counting {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(fail),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RateSource for Counting {
        async fn standard_rate(&self, _country: &str, _on: NaiveDate) -> Result<Decimal, TedbError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                Err(TedbError::Xml("broken".into()))
            } else {
                Ok(dec!(21))
            }
        }
    }

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::at_date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()))
    }

    #[tokio::test]
    async fn reuses_rate_for_a_day() {
        let source = Counting::new(false);
        let clock = clock();
        let cache = RateCache::new(Some(source.clone()), clock.clone());

        assert_eq!(cache.standard_rate("AT").await, TaxRate::of(Some(dec!(21))));
        clock.advance(Duration::hours(5));
        assert_eq!(cache.standard_rate("AT").await, TaxRate::of(Some(dec!(21))));
        assert_eq!(source.calls(), 1);

        // A new day is a new key.
        clock.advance(Duration::hours(20));
        cache.standard_rate("AT").await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn expired_entries_are_pruned_on_insert() {
        let source = Counting::new(false);
        let clock = clock();
        let cache = RateCache::new(Some(source), clock.clone());

        cache.standard_rate("AT").await;
        cache.standard_rate("DE").await;
        assert_eq!(cache.len(), 2);

        clock.advance(Duration::days(2));
        cache.standard_rate("AT").await;
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn failure_falls_back_to_embedded_table() {
        let cache = RateCache::new(Some(Counting::new(true)), clock());
        assert_eq!(
            cache.standard_rate("AT").await,
            TaxRate::fallback(Some(dec!(20)))
        );
    }

    #[tokio::test]
    async fn failures_are_remembered_briefly() {
        let source = Counting::new(true);
        let clock = clock();
        let cache = RateCache::new(Some(source.clone()), clock.clone());

        cache.standard_rate("AT").await;
        clock.advance(Duration::minutes(5));
        assert_eq!(
            cache.standard_rate("AT").await,
            TaxRate::fallback(Some(dec!(20)))
        );
        assert_eq!(source.calls(), 1);

        source.fail.store(false, Ordering::SeqCst);
        clock.advance(Duration::minutes(FAILURE_TTL_MINUTES));
        assert_eq!(cache.standard_rate("AT").await, TaxRate::of(Some(dec!(21))));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn without_source_uses_embedded_table() {
        let cache = RateCache::new(None, clock());
        assert_eq!(cache.standard_rate("PL").await, TaxRate::of(Some(dec!(23))));
        assert_eq!(cache.standard_rate("US").await, TaxRate::of(None));
    }
}
