use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace, warn};

use crate::cache::{GeocodeCache, ItemKey};
use crate::coordinates::{Coordinate, GeocodeRequest};
use crate::errors::AppResult;
use crate::nominatim::ReverseLookup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResolutionSource {
    ItemKey,
    Region,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub description: String,
    pub source: ResolutionSource,
}

impl Resolution {
    fn new(description: String, source: ResolutionSource) -> Self {
        Self {
            description,
            source,
        }
    }
}

/// Resolves coordinates to place descriptions: exact item key, then region,
/// then one remote call whose result is written back to the cache.
pub struct ReverseGeocoder {
    cache: GeocodeCache,
    lookup: Arc<dyn ReverseLookup>,
    rate_limiter: RateLimiter,
}

impl ReverseGeocoder {
    pub fn new(cache: GeocodeCache, lookup: Arc<dyn ReverseLookup>, qps: u32) -> Self {
        Self {
            cache,
            lookup,
            rate_limiter: RateLimiter::new(qps),
        }
    }

    pub fn cache(&self) -> &GeocodeCache {
        &self.cache
    }

    pub async fn reverse_geocode(
        &self,
        request: &GeocodeRequest,
        locale: Option<&str>,
    ) -> AppResult<Option<String>> {
        Ok(self
            .resolve(request, locale)
            .await?
            .map(|resolution| resolution.description))
    }

    pub async fn resolve(
        &self,
        request: &GeocodeRequest,
        locale: Option<&str>,
    ) -> AppResult<Option<Resolution>> {
        let coordinate = request.coordinate()?;
        let item_key = request.item_key();
        self.resolve_coordinate(coordinate, item_key.as_ref(), locale)
            .await
    }

    pub async fn resolve_coordinate(
        &self,
        coordinate: Coordinate,
        item_key: Option<&ItemKey>,
        locale: Option<&str>,
    ) -> AppResult<Option<Resolution>> {
        if let Some(key) = item_key {
            if let Some(description) = self.read_cache(|cache| cache.lookup_by_key(key))? {
                trace!(item_key = key.as_str(), "item key cache hit");
                return Ok(Some(Resolution::new(description, ResolutionSource::ItemKey)));
            }
        }

        if let Some(description) =
            self.read_cache(|cache| cache.lookup_by_region(coordinate, item_key))?
        {
            trace!(
                lat = coordinate.latitude,
                lon = coordinate.longitude,
                "region cache hit"
            );
            return Ok(Some(Resolution::new(description, ResolutionSource::Region)));
        }

        self.rate_limiter.wait().await;
        debug!(
            lat = coordinate.latitude,
            lon = coordinate.longitude,
            "geocode cache miss; querying remote service"
        );
        let Some(place) = self.lookup.reverse(coordinate, locale).await? else {
            debug!(
                lat = coordinate.latitude,
                lon = coordinate.longitude,
                "no place found"
            );
            return Ok(None);
        };

        let Some(description) = place.description() else {
            warn!(
                lat = coordinate.latitude,
                lon = coordinate.longitude,
                display_name = place.display_name.as_deref().unwrap_or_default(),
                "remote place has no usable description"
            );
            return Ok(None);
        };

        self.write_cache("region", || {
            self.cache
                .record_region(place.bounds(), Some(description.as_str()))
        });
        if let Some(key) = item_key {
            self.write_cache("item key", || self.cache.record_key(key, &description));
        }

        Ok(Some(Resolution::new(description, ResolutionSource::Remote)))
    }

    fn read_cache(
        &self,
        read: impl FnOnce(&GeocodeCache) -> AppResult<Option<String>>,
    ) -> AppResult<Option<String>> {
        match read(&self.cache) {
            Ok(found) => Ok(found),
            Err(err) if err.is_store_unavailable() => Err(err),
            Err(err) => {
                warn!(error = %err, "geocode cache read failed; treating as miss");
                Ok(None)
            }
        }
    }

    fn write_cache(&self, entry: &str, write: impl FnOnce() -> AppResult<bool>) {
        match write() {
            Ok(true) => trace!(entry, "geocode cache entry recorded"),
            Ok(false) => trace!(entry, "geocode cache entry skipped"),
            Err(err) => warn!(error = %err, entry, "failed to record geocode cache entry"),
        }
    }
}

/// Spaces consecutive remote calls to at most `qps` per second.
struct RateLimiter {
    min_interval: Duration,
    last_tick: AsyncMutex<Option<Instant>>,
}

impl RateLimiter {
    fn new(qps: u32) -> Self {
        Self {
            min_interval: Duration::from_millis(Self::interval_ms(qps)),
            last_tick: AsyncMutex::new(None),
        }
    }

    fn interval_ms(qps: u32) -> u64 {
        let safe_qps = qps.max(1);
        let interval_ms = (1000_f64 / safe_qps as f64).ceil() as u64;
        interval_ms.max(50)
    }

    async fn wait(&self) {
        let mut guard = self.last_tick.lock().await;
        if let Some(prev) = *guard {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *guard = Some(Instant::now());
    }
}
