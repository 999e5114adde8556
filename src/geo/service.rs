use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::geo::{
    EtaEstimate, RouteInfo, RouteStep, TrafficLevel, fallback_eta, fallback_geocode,
    fallback_route,
};
use crate::models::courier::GeoPoint;
use crate::models::tenant::GeoConfidence;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geocoded {
    pub point: GeoPoint,
    pub confidence: GeoConfidence,
}

/// Geocoding and routing against an external maps provider, degrading to
/// straight-line math when no API key is configured or the provider fails.
#[derive(Clone)]
pub struct GeoService {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl GeoService {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        Self::with_provider(
            config.maps_api_key.clone(),
            config.maps_base_url.clone(),
            config.provider_timeout(),
        )
    }

    pub fn with_provider(
        api_key: Option<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::Internal(format!("failed to build maps client: {err}")))?;

        Ok(Self {
            http,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn fallback_only() -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: None,
            base_url: String::new(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.api_key.is_none()
    }

    pub async fn geocode(&self, address: &str) -> Option<Geocoded> {
        if address.trim().is_empty() {
            return None;
        }

        let Some(api_key) = self.api_key.as_deref() else {
            let point = fallback_geocode(address);
            warn!(
                address,
                lat = point.lat,
                lng = point.lng,
                "maps provider not configured; using fabricated fallback coordinates"
            );
            return Some(Geocoded {
                point,
                confidence: GeoConfidence::Fallback,
            });
        };

        let url = format!("{}/geocode/json", self.base_url);
        let response: GeocodeResponse = match self
            .fetch(&url, &[("address", address), ("key", api_key)])
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, address, "geocoding failed");
                return None;
            }
        };

        if response.status != "OK" {
            debug!(status = %response.status, address, "geocoder returned no result");
            return None;
        }

        let location = response.results.first()?.geometry.location;
        Some(Geocoded {
            point: GeoPoint {
                lat: location.lat,
                lng: location.lng,
            },
            confidence: GeoConfidence::Provider,
        })
    }

    pub async fn route(&self, origin: &GeoPoint, destination: &GeoPoint) -> Option<RouteInfo> {
        if !is_valid(origin) || !is_valid(destination) {
            return None;
        }

        if !self.is_fallback() {
            match self.directions(origin, destination).await {
                Ok(leg) => {
                    let polyline = leg.polyline;
                    let leg = leg.leg;
                    return Some(RouteInfo {
                        distance_meters: leg.distance.value,
                        duration_seconds: leg.duration.value,
                        polyline,
                        steps: leg
                            .steps
                            .into_iter()
                            .map(|step| RouteStep {
                                instruction: step.html_instructions,
                                distance_meters: step.distance.value,
                                duration_seconds: step.duration.value,
                            })
                            .collect(),
                    });
                }
                Err(err) => warn!(error = %err, "route lookup failed; using straight-line route"),
            }
        }

        Some(fallback_route(origin, destination))
    }

    pub async fn eta(&self, origin: &GeoPoint, destination: &GeoPoint) -> Option<EtaEstimate> {
        if !is_valid(origin) || !is_valid(destination) {
            return None;
        }

        if !self.is_fallback() {
            match self.directions(origin, destination).await {
                Ok(directions) => {
                    let leg = directions.leg;
                    let free_flow = leg.duration.value;
                    let trafficked = leg
                        .duration_in_traffic
                        .map(|duration| duration.value)
                        .unwrap_or(free_flow);
                    let ratio = if free_flow > 0.0 {
                        trafficked / free_flow
                    } else {
                        1.0
                    };

                    return Some(EtaEstimate {
                        minutes: (trafficked / 60.0).round() as i64,
                        distance_meters: leg.distance.value,
                        traffic_level: TrafficLevel::from_ratio(ratio),
                    });
                }
                Err(err) => warn!(error = %err, "eta lookup failed; using straight-line estimate"),
            }
        }

        Some(fallback_eta(origin, destination))
    }

    async fn directions(
        &self,
        origin: &GeoPoint,
        destination: &GeoPoint,
    ) -> Result<Directions, AppError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::ProviderUnavailable("maps provider not configured".into()))?;

        let url = format!("{}/directions/json", self.base_url);
        let origin = format!("{},{}", origin.lat, origin.lng);
        let destination = format!("{},{}", destination.lat, destination.lng);

        let response: DirectionsResponse = self
            .fetch(
                &url,
                &[
                    ("origin", origin.as_str()),
                    ("destination", destination.as_str()),
                    ("mode", "driving"),
                    ("departure_time", "now"),
                    ("key", api_key),
                ],
            )
            .await?;

        if response.status != "OK" {
            return Err(AppError::ProviderUnavailable(format!(
                "directions status {}",
                response.status
            )));
        }

        let mut route = response
            .routes
            .into_iter()
            .next()
            .ok_or_else(|| AppError::ProviderUnavailable("directions returned no route".into()))?;
        if route.legs.is_empty() {
            return Err(AppError::ProviderUnavailable("directions route has no legs".into()));
        }

        Ok(Directions {
            leg: route.legs.swap_remove(0),
            polyline: route.overview_polyline.points,
        })
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, AppError> {
        let response = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|err| AppError::ProviderUnavailable(format!("maps request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::ProviderUnavailable(format!(
                "maps provider returned HTTP {status}"
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|err| AppError::ProviderUnavailable(format!("malformed maps payload: {err}")))
    }
}

fn is_valid(point: &GeoPoint) -> bool {
    point.lat.is_finite()
        && point.lng.is_finite()
        && (-90.0..=90.0).contains(&point.lat)
        && (-180.0..=180.0).contains(&point.lng)
}

struct Directions {
    leg: Leg,
    polyline: String,
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    routes: Vec<Route>,
}

#[derive(Debug, Deserialize)]
struct Route {
    #[serde(default)]
    legs: Vec<Leg>,
    #[serde(default)]
    overview_polyline: OverviewPolyline,
}

#[derive(Debug, Default, Deserialize)]
struct OverviewPolyline {
    #[serde(default)]
    points: String,
}

#[derive(Debug, Deserialize)]
struct Leg {
    distance: ValueField,
    duration: ValueField,
    duration_in_traffic: Option<ValueField>,
    #[serde(default)]
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
struct Step {
    #[serde(default)]
    html_instructions: String,
    distance: ValueField,
    duration: ValueField,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct ValueField {
    value: f64,
}
