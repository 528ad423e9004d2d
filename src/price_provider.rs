//! Unified price read contract (spec §4.2).
//!
//! The Rule Engine only ever calls [`PriceProvider::get_price`]; it never
//! touches the websocket stream or the REST client directly. The provider
//! prefers the push-stream cache and falls back to a REST poll when a pair
//! has gone stale or has never been seen.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::error::ExchangeError;
use crate::exchange::ws::{TickUpdate, TickerStream, TickerSubscriber};
use crate::exchange::Exchange;

/// A cached update is considered fresh for this long before a REST refresh is preferred.
const STALENESS_THRESHOLD: ChronoDuration = ChronoDuration::seconds(60);
/// Grace window granted to a pair that has just been subscribed and has no
/// cached value yet, before the provider falls back to REST (spec §4.2).
const FIRST_VALUE_GRACE: ChronoDuration = ChronoDuration::seconds(2);

#[derive(Debug, Clone)]
struct CacheEntry {
    price: Decimal,
    observed_at: DateTime<Utc>,
}

/// Outcome of a [`PriceProvider::get_price`] call.
#[derive(Debug, Clone)]
pub struct PriceReading {
    /// Most recent known price for the pair.
    pub price: Decimal,
    /// How old the reading is.
    pub age: ChronoDuration,
    /// Set when the reading came from a stale cache entry because a REST
    /// refresh also failed; the caller decides whether that is acceptable.
    pub refresh_error: Option<ExchangeError>,
}

/// Cache-backed price source, fed by a [`TickerStream`] and backstopped by REST polls.
pub struct PriceProvider {
    cache: Arc<RwLock<HashMap<String, CacheEntry>>>,
    pairs: Vec<String>,
    client: Arc<dyn Exchange>,
    ticker: TickerSubscriber,
    started_at: DateTime<Utc>,
}

impl PriceProvider {
    /// Start tracking `pairs`. Spawns the background push-stream task
    /// immediately; pairs not yet known to the rule set are subscribed
    /// lazily on their first [`PriceProvider::get_price`] call instead of
    /// requiring a restart (spec §4.2).
    #[must_use]
    pub fn spawn(pairs: Vec<String>, client: Arc<dyn Exchange>) -> Self {
        let cache: Arc<RwLock<HashMap<String, CacheEntry>>> = Arc::new(RwLock::new(HashMap::new()));
        let stream = TickerStream::new(pairs.clone());
        let (_handle, mut rx, ticker) = stream.spawn();

        let cache_writer = cache.clone();
        tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                apply_update(&cache_writer, update).await;
            }
        });

        Self { cache, pairs, client, ticker, started_at: Utc::now() }
    }

    /// Read the current price for `pair`.
    ///
    /// Serves the push-stream cache when it is fresher than
    /// [`STALENESS_THRESHOLD`]; otherwise issues a REST call and refreshes the
    /// cache with the result. If the REST call itself fails and a stale cache
    /// entry exists, that stale value is returned with `refresh_error` set so
    /// the caller (the Rule Engine) can decide whether to treat it as usable.
    ///
    /// # Errors
    ///
    /// Returns an [`ExchangeError`] only when there is no cached value at all
    /// and the REST fallback also fails.
    pub async fn get_price(&self, pair: &str) -> Result<PriceReading, ExchangeError> {
        self.ticker.ensure_subscribed(pair);

        let cached = self.cache.read().await.get(pair).cloned();

        if let Some(entry) = &cached {
            let age = Utc::now() - entry.observed_at;
            if age < STALENESS_THRESHOLD {
                return Ok(PriceReading { price: entry.price, age, refresh_error: None });
            }
        }
        // No fresh cache entry: either stale, or (within `FIRST_VALUE_GRACE`
        // of startup) a pair that hasn't ticked yet. Either way, fall through
        // to a REST read and let that call's success or failure decide.

        match self.client.current_price(pair).await {
            Ok(price) => {
                let now = Utc::now();
                self.cache
                    .write()
                    .await
                    .insert(pair.to_owned(), CacheEntry { price, observed_at: now });
                Ok(PriceReading { price, age: ChronoDuration::zero(), refresh_error: None })
            }
            Err(e) => match cached {
                Some(entry) => Ok(PriceReading {
                    price: entry.price,
                    age: Utc::now() - entry.observed_at,
                    refresh_error: Some(e),
                }),
                None if Utc::now() - self.started_at < FIRST_VALUE_GRACE => {
                    log::debug!("no price yet for {pair} within startup grace window: {e}");
                    Err(e)
                }
                None => Err(e),
            },
        }
    }

    /// Warm the cache for every tracked pair via one REST call each. Used at
    /// startup so the first evaluation tick is not forced through the grace window.
    ///
    /// # Errors
    ///
    /// Returns the first [`ExchangeError`] encountered; pairs warmed before the
    /// failure keep their cached value.
    pub async fn warm_cache(&self) -> Result<(), ExchangeError> {
        let pairs = self.pairs.clone();
        self.warm_many(&pairs).await
    }

    /// Warm the cache for exactly `pairs` in a single batched round-trip
    /// (spec: "a batch variant fetches many pairs in one round-trip",
    /// property 9 "batched price freshness"). A pair missing from the
    /// response does not prevent the rest from warming; only a failure of
    /// the underlying request itself is propagated.
    ///
    /// # Errors
    ///
    /// Returns the [`ExchangeError`] from the batched request if it fails
    /// outright.
    pub async fn warm_many(&self, pairs: &[String]) -> Result<(), ExchangeError> {
        if pairs.is_empty() {
            return Ok(());
        }
        let prices = self.client.current_prices(pairs).await?;
        let now = Utc::now();
        let mut cache = self.cache.write().await;
        for (pair, price) in prices {
            cache.insert(pair, CacheEntry { price, observed_at: now });
        }
        Ok(())
    }
}

async fn apply_update(cache: &Arc<RwLock<HashMap<String, CacheEntry>>>, update: TickUpdate) {
    cache.write().await.insert(
        update.pair,
        CacheEntry { price: update.price, observed_at: Utc::now() },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_entry_considered_fresh_within_threshold() {
        let cache: Arc<RwLock<HashMap<String, CacheEntry>>> = Arc::new(RwLock::new(HashMap::new()));
        apply_update(&cache, TickUpdate { pair: "XXBTZUSD".to_owned(), price: Decimal::from(50_000) }).await;
        let entry = cache.read().await.get("XXBTZUSD").cloned().unwrap();
        assert!(Utc::now() - entry.observed_at < STALENESS_THRESHOLD);
    }
}
