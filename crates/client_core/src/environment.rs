//! Weather and air-quality client for the map overlay panel.
//!
//! Both readings come from the Open-Meteo HTTP API, queried by coordinate.
//! There is no caching contract: the most recent fetch for the active
//! coordinate wins, and any failure maps to `Unavailable` so the caller can
//! drop the panel without blocking the rest of the view.

use chrono::Utc;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use shared::{
    domain::{Coordinates, EnvironmentalSnapshot},
    error::{AppError, Result},
};

const DEFAULT_BASE_URL: &str = "https://api.open-meteo.com";
const FORECAST_PATH: &str = "/v1/forecast";
const AIR_QUALITY_PATH: &str = "/v1/air-quality";
const FORECAST_FIELDS: &str = "temperature_2m,relative_humidity_2m,wind_speed_10m";
const AIR_QUALITY_FIELDS: &str = "pm10,pm2_5,carbon_monoxide,nitrogen_dioxide";

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current: Option<ForecastCurrent>,
}

#[derive(Debug, Deserialize)]
struct ForecastCurrent {
    temperature_2m: Option<f64>,
    relative_humidity_2m: Option<f64>,
    wind_speed_10m: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct AirQualityResponse {
    current: Option<AirQualityCurrent>,
}

#[derive(Debug, Deserialize)]
struct AirQualityCurrent {
    pm10: Option<f64>,
    pm2_5: Option<f64>,
    carbon_monoxide: Option<f64>,
    nitrogen_dioxide: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct EnvironmentClient {
    http: Client,
    base_url: String,
}

impl EnvironmentClient {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Fetches current weather and air quality for a coordinate and merges
    /// them into one snapshot. Providers may omit individual readings.
    pub async fn fetch_snapshot(&self, coords: Coordinates) -> Result<EnvironmentalSnapshot> {
        let forecast: ForecastResponse = self
            .get_json(FORECAST_PATH, coords, FORECAST_FIELDS)
            .await?;
        let air_quality: AirQualityResponse = self
            .get_json(AIR_QUALITY_PATH, coords, AIR_QUALITY_FIELDS)
            .await?;

        let weather = forecast.current.unwrap_or(ForecastCurrent {
            temperature_2m: None,
            relative_humidity_2m: None,
            wind_speed_10m: None,
        });
        let air = air_quality.current.unwrap_or(AirQualityCurrent {
            pm10: None,
            pm2_5: None,
            carbon_monoxide: None,
            nitrogen_dioxide: None,
        });

        Ok(EnvironmentalSnapshot {
            coords,
            temperature_c: weather.temperature_2m,
            relative_humidity: weather.relative_humidity_2m,
            wind_speed: weather.wind_speed_10m,
            pm2_5: air.pm2_5,
            pm10: air.pm10,
            carbon_monoxide: air.carbon_monoxide,
            nitrogen_dioxide: air.nitrogen_dioxide,
            fetched_at: Utc::now(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        coords: Coordinates,
        fields: &str,
    ) -> Result<T> {
        self.http
            .get(format!("{}{}", self.base_url, path))
            .query(&[
                ("latitude", coords.latitude.to_string()),
                ("longitude", coords.longitude.to_string()),
                ("current", fields.to_string()),
            ])
            .send()
            .await
            .map_err(net_err)?
            .error_for_status()
            .map_err(net_err)?
            .json()
            .await
            .map_err(net_err)
    }
}

impl Default for EnvironmentClient {
    fn default() -> Self {
        Self::new()
    }
}

fn net_err(err: reqwest::Error) -> AppError {
    AppError::unavailable(err.to_string())
}
