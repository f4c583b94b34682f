use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::PublicAppConfig;
use crate::coordinates::GeocodeRequest;
use crate::GeocodeService;

#[derive(Debug, Serialize)]
pub struct CacheHealth {
    pub cache_path: String,
    pub cache_exists: bool,
    pub region_count: u64,
    pub item_key_count: u64,
    pub config: PublicAppConfig,
}

impl CacheHealth {
    pub fn new(
        cache_path: String,
        cache_exists: bool,
        region_count: u64,
        item_key_count: u64,
        config: PublicAppConfig,
    ) -> Self {
        Self {
            cache_path,
            cache_exists,
            region_count,
            item_key_count,
            config,
        }
    }
}

/// Handles a slideshow "reverse geocode" notification payload. Returns the
/// description to overlay, or `None` when nothing should be shown; failures are
/// logged and look the same as "no place found".
pub async fn display_location(
    service: &GeocodeService,
    payload: Value,
    locale: Option<&str>,
) -> Option<String> {
    let request: GeocodeRequest = match serde_json::from_value(payload) {
        Ok(request) => request,
        Err(err) => {
            warn!(?err, "malformed reverse geocode payload");
            return None;
        }
    };

    match service.reverse_geocode(&request, locale).await {
        Ok(Some(description)) => Some(description),
        Ok(None) => {
            debug!(item = ?request.item_identifier, "no place found for photo");
            None
        }
        Err(err) => {
            error!(
                error = %err,
                latitude = ?request.latitude,
                longitude = ?request.longitude,
                "reverse geocode failed"
            );
            None
        }
    }
}

pub fn cache_health(service: &GeocodeService) -> Result<CacheHealth, String> {
    service.cache_health().map_err(|err| err.to_string())
}
