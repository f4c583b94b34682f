use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::AppConfig;
use crate::coordinates::Coordinate;
use crate::errors::{AppError, AppResult};

#[async_trait]
pub trait ReverseLookup: Send + Sync {
    /// Resolves a coordinate to the first place the service reports, or `None`
    /// when the service has nothing there.
    async fn reverse(
        &self,
        coordinate: Coordinate,
        locale: Option<&str>,
    ) -> AppResult<Option<RawPlace>>;
}

/// Address block of a feature. Accepts Nominatim's `address` names as well as
/// the GeocodeJSON `geocoding` names (`street`, `housenumber`, `locality`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressComponents {
    pub city: Option<String>,
    pub town: Option<String>,
    pub village: Option<String>,
    pub neighbourhood: Option<String>,
    pub hamlet: Option<String>,
    pub locality: Option<String>,
    pub road: Option<String>,
    pub street: Option<String>,
    pub house_number: Option<String>,
    pub housenumber: Option<String>,
    pub country: Option<String>,
}

impl AddressComponents {
    /// The single most specific populated tier: city/town/village, then
    /// neighbourhood/hamlet, then street plus house number.
    pub fn major_place(&self) -> Option<String> {
        first_present(&[&self.city, &self.town, &self.village])
            .or_else(|| first_present(&[&self.neighbourhood, &self.hamlet, &self.locality]))
            .map(str::to_string)
            .or_else(|| self.street_line())
    }

    /// `major_place` followed by ` - <country>` when a country is reported.
    pub fn describe(&self) -> Option<String> {
        let place = self.major_place()?;
        match first_present(&[&self.country]) {
            Some(country) if country != place => Some(format!("{place} - {country}")),
            _ => Some(place),
        }
    }

    fn street_line(&self) -> Option<String> {
        let road = first_present(&[&self.road, &self.street])?;
        match first_present(&[&self.house_number, &self.housenumber]) {
            Some(number) => Some(format!("{road} {number}")),
            None => Some(road.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawPlace {
    pub address: AddressComponents,
    /// `[lonMin, latMin, lonMax, latMax]` as asserted by the service.
    pub bbox: Option<Vec<f64>>,
    pub display_name: Option<String>,
}

impl RawPlace {
    pub fn description(&self) -> Option<String> {
        self.address.describe()
    }

    pub fn bounds(&self) -> &[f64] {
        self.bbox.as_deref().unwrap_or(&[])
    }
}

#[derive(Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct Feature {
    #[serde(default)]
    properties: FeatureProperties,
    #[serde(default)]
    bbox: Option<Vec<f64>>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct FeatureProperties {
    address: Option<AddressComponents>,
    geocoding: Option<AddressComponents>,
    display_name: Option<String>,
}

impl FeatureCollection {
    fn into_first_place(self) -> Option<RawPlace> {
        if let Some(error) = &self.error {
            debug!(error = error.as_str(), "reverse geocoding service reported no match");
        }
        let feature = self.features.into_iter().next()?;
        let properties = feature.properties;
        Some(RawPlace {
            address: properties
                .address
                .or(properties.geocoding)
                .unwrap_or_default(),
            bbox: feature.bbox,
            display_name: properties.display_name,
        })
    }
}

pub fn parse_feature_collection(body: &str) -> AppResult<Option<RawPlace>> {
    let collection: FeatureCollection = serde_json::from_str(body)?;
    Ok(collection.into_first_place())
}

/// HTTP client for a Nominatim-compatible `/reverse` endpoint.
pub struct NominatimClient {
    http: Client,
    endpoint: Url,
    user_agent: String,
    format: String,
    zoom: Option<u8>,
}

impl NominatimClient {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let endpoint = Url::parse(&config.reverse_endpoint()).map_err(|err| {
            AppError::Config(format!(
                "invalid reverse geocoding endpoint {}: {err}",
                config.reverse_endpoint()
            ))
        })?;
        let http = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs.max(1)))
            .build()
            .map_err(|err| AppError::Config(format!("failed to build http client: {err}")))?;
        Ok(Self {
            http,
            endpoint,
            user_agent: config.user_agent.clone(),
            format: config.response_format.clone(),
            zoom: config.zoom,
        })
    }

    fn request(&self, coordinate: Coordinate, locale: Option<&str>) -> RequestBuilder {
        let mut query: Vec<(&str, String)> = vec![
            ("lat", coordinate.latitude.to_string()),
            ("lon", coordinate.longitude.to_string()),
            ("format", self.format.clone()),
            ("addressdetails", "1".to_string()),
        ];
        if let Some(locale) = locale.map(str::trim).filter(|l| !l.is_empty()) {
            query.push(("accept-language", locale.to_string()));
        }
        if let Some(zoom) = self.zoom {
            query.push(("zoom", zoom.to_string()));
        }

        self.http
            .get(self.endpoint.clone())
            .header(USER_AGENT, self.user_agent.as_str())
            .query(&query)
    }
}

#[async_trait]
impl ReverseLookup for NominatimClient {
    async fn reverse(
        &self,
        coordinate: Coordinate,
        locale: Option<&str>,
    ) -> AppResult<Option<RawPlace>> {
        let response = self.request(coordinate, locale).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::RemoteService {
                status: status.as_u16(),
                reason: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            });
        }

        let body = response.text().await?;
        let place = parse_feature_collection(&body).map_err(|err| AppError::RemoteService {
            status: status.as_u16(),
            reason: format!("malformed response body: {err}"),
        })?;
        trace!(
            lat = coordinate.latitude,
            lon = coordinate.longitude,
            found = place.is_some(),
            "reverse geocoding response parsed"
        );
        Ok(place)
    }
}

fn first_present<'a>(candidates: &[&'a Option<String>]) -> Option<&'a str> {
    candidates
        .iter()
        .filter_map(|value| value.as_deref())
        .map(str::trim)
        .find(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn address(value: serde_json::Value) -> AddressComponents {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn prefers_city_over_neighbourhood() {
        let components = address(json!({ "city": "Paris", "neighbourhood": "Gros-Caillou" }));
        assert_eq!(components.major_place().as_deref(), Some("Paris"));
    }

    #[test]
    fn falls_back_to_neighbourhood() {
        let components = address(json!({ "neighbourhood": "Gros-Caillou", "road": "Avenue Anatole France" }));
        assert_eq!(components.major_place().as_deref(), Some("Gros-Caillou"));
        let components = address(json!({ "hamlet": "Les Granges" }));
        assert_eq!(components.major_place().as_deref(), Some("Les Granges"));
    }

    #[test]
    fn composes_street_and_house_number() {
        let components = address(json!({ "road": "Via Roma", "house_number": "12" }));
        assert_eq!(components.major_place().as_deref(), Some("Via Roma 12"));
        let components = address(json!({ "street": "Via Roma", "housenumber": "12" }));
        assert_eq!(components.major_place().as_deref(), Some("Via Roma 12"));
        let components = address(json!({ "road": "Via Roma" }));
        assert_eq!(components.major_place().as_deref(), Some("Via Roma"));
    }

    #[test]
    fn unusable_address_has_no_description() {
        let components = address(json!({ "house_number": "12", "country": "Italia", "city": "  " }));
        assert_eq!(components.major_place(), None);
        assert_eq!(components.describe(), None);
    }

    #[test]
    fn appends_country_to_description() {
        let components = address(json!({ "town": "Cortina d'Ampezzo", "country": "Italia" }));
        assert_eq!(
            components.describe().as_deref(),
            Some("Cortina d'Ampezzo - Italia")
        );
        let components = address(json!({ "city": "Monaco", "country": "Monaco" }));
        assert_eq!(components.describe().as_deref(), Some("Monaco"));
    }

    #[test]
    fn parses_geojson_feature() {
        let body = json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {
                    "display_name": "Tour Eiffel, Paris, France",
                    "address": {
                        "tourism": "Tour Eiffel",
                        "road": "Avenue Gustave Eiffel",
                        "city": "Paris",
                        "country": "France",
                        "country_code": "fr"
                    }
                },
                "bbox": [2.2933, 48.8574, 2.2956, 48.8590],
                "geometry": { "type": "Point", "coordinates": [2.2945, 48.8582] }
            }]
        })
        .to_string();

        let place = parse_feature_collection(&body).unwrap().unwrap();
        assert_eq!(place.description().as_deref(), Some("Paris - France"));
        assert_eq!(place.bounds(), &[2.2933, 48.8574, 2.2956, 48.8590]);
        assert_eq!(
            place.display_name.as_deref(),
            Some("Tour Eiffel, Paris, France")
        );
    }

    #[test]
    fn parses_geocodejson_feature() {
        let body = json!({
            "type": "FeatureCollection",
            "geocoding": { "version": "0.1.0", "attribution": "OSM" },
            "features": [{
                "type": "Feature",
                "properties": {
                    "geocoding": {
                        "type": "house",
                        "label": "12, Via Roma, Italia",
                        "housenumber": "12",
                        "street": "Via Roma",
                        "country": "Italia"
                    }
                },
                "bbox": [12.49, 41.89, 12.50, 41.90]
            }]
        })
        .to_string();

        let place = parse_feature_collection(&body).unwrap().unwrap();
        assert_eq!(place.description().as_deref(), Some("Via Roma 12 - Italia"));
    }

    #[test]
    fn empty_or_error_collections_are_absent() {
        let empty = json!({ "type": "FeatureCollection", "features": [] }).to_string();
        assert_eq!(parse_feature_collection(&empty).unwrap(), None);
        let error = json!({ "error": "Unable to geocode" }).to_string();
        assert_eq!(parse_feature_collection(&error).unwrap(), None);
        assert!(parse_feature_collection("<html>").is_err());
    }

    #[test]
    fn builds_request_with_identifying_header() {
        let config = AppConfig {
            nominatim_base_url: "http://localhost:7070".into(),
            user_agent: "slideshow-test".into(),
            zoom: Some(10),
            ..AppConfig::default()
        };
        let client = NominatimClient::new(&config).unwrap();
        let coordinate = Coordinate::new(48.85825, -2.2945).unwrap();
        let request = client
            .request(coordinate, Some("it-IT"))
            .build()
            .unwrap();

        assert_eq!(request.url().path(), "/reverse");
        assert_eq!(
            request.headers().get(USER_AGENT).unwrap(),
            "slideshow-test"
        );
        let pairs: Vec<(String, String)> = request
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let value = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(value("lat"), Some("48.85825"));
        assert_eq!(value("lon"), Some("-2.2945"));
        assert_eq!(value("format"), Some("geojson"));
        assert_eq!(value("accept-language"), Some("it-IT"));
        assert_eq!(value("zoom"), Some("10"));
    }

    #[test]
    fn omits_blank_locale() {
        let client = NominatimClient::new(&AppConfig::default()).unwrap();
        let request = client
            .request(Coordinate::new(1.0, 2.0).unwrap(), Some("  "))
            .build()
            .unwrap();
        assert!(!request
            .url()
            .query_pairs()
            .any(|(key, _)| key == "accept-language" || key == "zoom"));
    }

    #[test]
    fn rejects_invalid_endpoint() {
        let config = AppConfig {
            nominatim_base_url: "not a url".into(),
            ..AppConfig::default()
        };
        assert!(matches!(
            NominatimClient::new(&config),
            Err(AppError::Config(_))
        ));
    }
}
