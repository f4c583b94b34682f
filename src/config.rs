use std::path::{Path, PathBuf};
use std::{env, io};

use serde::Serialize;
use tracing::debug;

const DEFAULT_NOMINATIM_BASE_URL: &str = "https://nominatim.openstreetmap.org";
const DEFAULT_USER_AGENT: &str = "MMM-BackgroundSlideshow";
const DEFAULT_LOCALE: &str = "it-IT";
const DEFAULT_RESPONSE_FORMAT: &str = "geojson";
const MAX_ZOOM: u8 = 18;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub nominatim_base_url: String,
    pub user_agent: String,
    pub default_locale: Option<String>,
    pub response_format: String,
    pub zoom: Option<u8>,
    pub rate_limit_qps: u32,
    pub http_timeout_secs: u64,
    pub cache_dir_name: String,
    pub cache_file_name: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub nominatim_base_url: String,
    pub user_agent: String,
    pub default_locale: Option<String>,
    pub response_format: String,
    pub zoom: Option<u8>,
    pub rate_limit_qps: u32,
    pub http_timeout_secs: u64,
    pub cache_file_name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            nominatim_base_url: DEFAULT_NOMINATIM_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            default_locale: Some(DEFAULT_LOCALE.to_string()),
            response_format: DEFAULT_RESPONSE_FORMAT.to_string(),
            zoom: None,
            rate_limit_qps: 1,
            http_timeout_secs: 10,
            cache_dir_name: "geocode".to_string(),
            cache_file_name: "cache.db".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        let defaults = Self::default();
        Self {
            nominatim_base_url: parse_string("NOMINATIM_BASE_URL")
                .unwrap_or(defaults.nominatim_base_url),
            user_agent: parse_string("GEOCODE_USER_AGENT").unwrap_or(defaults.user_agent),
            default_locale: parse_string("GEOCODE_LOCALE").or(defaults.default_locale),
            response_format: parse_string("GEOCODE_RESPONSE_FORMAT")
                .unwrap_or(defaults.response_format),
            zoom: env::var("GEOCODE_ZOOM")
                .ok()
                .and_then(|v| v.trim().parse::<u8>().ok())
                .map(|zoom| zoom.min(MAX_ZOOM)),
            rate_limit_qps: parse_u32("GEOCODE_RATE_LIMIT_QPS", defaults.rate_limit_qps).max(1),
            http_timeout_secs: parse_u64("GEOCODE_HTTP_TIMEOUT_SECS", defaults.http_timeout_secs),
            cache_dir_name: parse_string("GEOCODE_CACHE_DIR").unwrap_or(defaults.cache_dir_name),
            cache_file_name: parse_string("GEOCODE_CACHE_FILE")
                .unwrap_or(defaults.cache_file_name),
        }
    }

    /// Location of the cache file for a caller-supplied base path.
    pub fn cache_path(&self, base_path: &Path) -> PathBuf {
        base_path
            .join(&self.cache_dir_name)
            .join(&self.cache_file_name)
    }

    pub fn reverse_endpoint(&self) -> String {
        format!("{}/reverse", self.nominatim_base_url.trim_end_matches('/'))
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            nominatim_base_url: self.nominatim_base_url.clone(),
            user_agent: self.user_agent.clone(),
            default_locale: self.default_locale.clone(),
            response_format: self.response_format.clone(),
            zoom: self.zoom,
            rate_limit_qps: self.rate_limit_qps,
            http_timeout_secs: self.http_timeout_secs,
            cache_file_name: self.cache_file_name.clone(),
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_overrides_from_env() {
        env::set_var("GEOCODE_USER_AGENT", "slideshow-test");
        env::set_var("GEOCODE_ZOOM", "42");
        env::set_var("GEOCODE_RATE_LIMIT_QPS", "0");
        env::set_var("GEOCODE_CACHE_FILE", "places.db");

        let config = AppConfig::from_env();
        let public = config.public_profile();

        assert_eq!(public.user_agent, "slideshow-test");
        assert_eq!(public.zoom, Some(MAX_ZOOM));
        assert_eq!(public.rate_limit_qps, 1);
        assert_eq!(public.cache_file_name, "places.db");
        assert_eq!(public.response_format, DEFAULT_RESPONSE_FORMAT);

        env::remove_var("GEOCODE_USER_AGENT");
        env::remove_var("GEOCODE_ZOOM");
        env::remove_var("GEOCODE_RATE_LIMIT_QPS");
        env::remove_var("GEOCODE_CACHE_FILE");
    }

    #[test]
    fn builds_cache_path_and_endpoint() {
        let config = AppConfig {
            nominatim_base_url: "http://localhost:8080/".into(),
            ..AppConfig::default()
        };
        assert_eq!(config.reverse_endpoint(), "http://localhost:8080/reverse");
        assert_eq!(
            config.cache_path(Path::new("/srv/slideshow")),
            Path::new("/srv/slideshow/geocode/cache.db")
        );
    }
}
