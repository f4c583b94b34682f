mod cache;
mod commands;
mod config;
mod coordinates;
mod errors;
mod geocoder;
mod nominatim;

use std::path::Path;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::cache::{BoundingBox, CacheStats, GeocodeCache, ItemKey};
pub use crate::commands::{cache_health, display_location, CacheHealth};
pub use crate::config::{AppConfig, PublicAppConfig};
pub use crate::coordinates::{
    normalize, round_to_precision, Coordinate, DmsValue, GeocodeRequest, Hemisphere,
    COORDINATE_PRECISION,
};
pub use crate::errors::{AppError, AppResult};
pub use crate::geocoder::{Resolution, ResolutionSource, ReverseGeocoder};
pub use crate::nominatim::{
    parse_feature_collection, AddressComponents, NominatimClient, RawPlace, ReverseLookup,
};

/// Session object handed to the slideshow: owns the configuration and the
/// resolver for one cache location.
pub struct GeocodeService {
    config: AppConfig,
    geocoder: ReverseGeocoder,
}

impl GeocodeService {
    /// Installs tracing, reads configuration from the environment and places
    /// the cache under `base_path`.
    pub fn initialize(base_path: impl AsRef<Path>) -> AppResult<Self> {
        init_tracing();
        Self::with_config(base_path, AppConfig::from_env())
    }

    pub fn with_config(base_path: impl AsRef<Path>, config: AppConfig) -> AppResult<Self> {
        let client = NominatimClient::new(&config)?;
        Ok(Self::with_lookup(base_path, config, Arc::new(client)))
    }

    pub fn with_lookup(
        base_path: impl AsRef<Path>,
        config: AppConfig,
        lookup: Arc<dyn ReverseLookup>,
    ) -> Self {
        let cache = GeocodeCache::new(config.cache_path(base_path.as_ref()));
        info!(
            cache = %cache.path().display(),
            endpoint = %config.reverse_endpoint(),
            "geocode service ready"
        );
        let geocoder = ReverseGeocoder::new(cache, lookup, config.rate_limit_qps);
        Self { config, geocoder }
    }

    /// Resolves a request; `locale` falls back to the configured default.
    pub async fn reverse_geocode(
        &self,
        request: &GeocodeRequest,
        locale: Option<&str>,
    ) -> AppResult<Option<String>> {
        let locale = locale.or(self.config.default_locale.as_deref());
        self.geocoder.reverse_geocode(request, locale).await
    }

    pub async fn resolve(
        &self,
        request: &GeocodeRequest,
        locale: Option<&str>,
    ) -> AppResult<Option<Resolution>> {
        let locale = locale.or(self.config.default_locale.as_deref());
        self.geocoder.resolve(request, locale).await
    }

    pub fn cache_health(&self) -> AppResult<CacheHealth> {
        let stats = self.geocoder.cache().stats()?;
        Ok(CacheHealth::new(
            stats.path,
            stats.exists,
            stats.regions,
            stats.item_keys,
            self.config.public_profile(),
        ))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn geocoder(&self) -> &ReverseGeocoder {
        &self.geocoder
    }
}

fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,photo_geocode=debug"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    });
}
