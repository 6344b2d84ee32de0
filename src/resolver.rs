//! ContextResolver boundary: geocoding, elevation and weather lookups are
//! plain HTTP services behind small traits, so tests can stub them and the
//! rest of the crate never touches the network directly.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{Local, NaiveDate, NaiveDateTime};
use log::warn;
use once_cell::sync::OnceCell;
use reqwest::blocking::Client;
use serde_json::Value;

use crate::error::ForecastError;

const GEOCODER_URL: &str = "https://nominatim.openstreetmap.org/search";
const ELEVATION_URL: &str = "https://api.open-elevation.com/api/v1/lookup";
const WEATHER_FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
const WEATHER_ARCHIVE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";

const FETCH_ATTEMPTS: u32 = 4;
const REQUEST_TIMEOUT_SECS: u64 = 30;
const USER_AGENT: &str = "pitchcast/0.1";

static CLIENT: OnceCell<Client> = OnceCell::new();

fn http_client() -> Result<&'static Client> {
    CLIENT.get_or_try_init(|| {
        Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build http client")
    })
}

pub trait Geocoder {
    fn coordinates(&self, query: &str) -> Result<(f64, f64)>;
}

pub trait ElevationProvider {
    fn elevation_m(&self, lat: f64, lon: f64) -> Result<f64>;
}

#[derive(Debug, Clone, Default)]
pub struct HourlyWeather {
    pub times: Vec<NaiveDateTime>,
    pub temperature_c: Vec<f64>,
    pub precipitation_mm: Vec<f64>,
}

pub trait WeatherProvider {
    fn hourly(&self, lat: f64, lon: f64, date: NaiveDate) -> Result<HourlyWeather>;
}

pub struct HttpResolver;

impl HttpResolver {
    pub fn new() -> Result<Self> {
        http_client()?;
        Ok(Self)
    }

    fn fetch_json(&self, base: &str, query: &[(&str, String)]) -> Result<Value> {
        let client = http_client()?;
        let mut last_err: Option<anyhow::Error> = None;
        for attempt in 1..=FETCH_ATTEMPTS {
            let fetched = client
                .get(base)
                .query(query)
                .send()
                .with_context(|| format!("request {base}"))
                .and_then(|res| {
                    res.error_for_status()
                        .with_context(|| format!("status for {base}"))
                })
                .and_then(|res| res.text().with_context(|| format!("read body {base}")));
            match fetched {
                Ok(body) => {
                    return serde_json::from_str(&body)
                        .with_context(|| format!("invalid json from {base}"));
                }
                Err(err) => {
                    warn!("fetch attempt {attempt}/{FETCH_ATTEMPTS} failed: {err:#}");
                    last_err = Some(err);
                    if attempt < FETCH_ATTEMPTS {
                        std::thread::sleep(Duration::from_millis(500 * attempt as u64));
                    }
                }
            }
        }
        Err(anyhow!(ForecastError::TransientFetch(format!(
            "{base}: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        ))))
    }
}

impl Geocoder for HttpResolver {
    fn coordinates(&self, query: &str) -> Result<(f64, f64)> {
        let value = self.fetch_json(
            GEOCODER_URL,
            &[
                ("q", query.to_string()),
                ("format", "json".to_string()),
                ("limit", "1".to_string()),
            ],
        )?;
        let first = value
            .as_array()
            .and_then(|arr| arr.first())
            .ok_or_else(|| {
                anyhow!(ForecastError::DataShape(format!(
                    "no geocoder result for '{query}'"
                )))
            })?;
        let lat = json_f64(first.get("lat"))
            .ok_or_else(|| anyhow!(ForecastError::DataShape("geocoder lat missing".into())))?;
        let lon = json_f64(first.get("lon"))
            .ok_or_else(|| anyhow!(ForecastError::DataShape("geocoder lon missing".into())))?;
        Ok((lat, lon))
    }
}

impl ElevationProvider for HttpResolver {
    fn elevation_m(&self, lat: f64, lon: f64) -> Result<f64> {
        let value =
            self.fetch_json(ELEVATION_URL, &[("locations", format!("{lat},{lon}"))])?;
        value
            .get("results")
            .and_then(|r| r.as_array())
            .and_then(|arr| arr.first())
            .and_then(|first| json_f64(first.get("elevation")))
            .ok_or_else(|| anyhow!(ForecastError::DataShape("no elevation data returned".into())))
    }
}

impl WeatherProvider for HttpResolver {
    fn hourly(&self, lat: f64, lon: f64, date: NaiveDate) -> Result<HourlyWeather> {
        let base = if date < Local::now().date_naive() {
            WEATHER_ARCHIVE_URL
        } else {
            WEATHER_FORECAST_URL
        };
        let value = self.fetch_json(
            base,
            &[
                ("latitude", lat.to_string()),
                ("longitude", lon.to_string()),
                ("start_date", date.to_string()),
                ("end_date", date.to_string()),
                ("hourly", "temperature_2m,precipitation".to_string()),
                ("timezone", "auto".to_string()),
            ],
        )?;
        let hourly = value.get("hourly").ok_or_else(|| {
            anyhow!(ForecastError::DataShape(format!(
                "no hourly weather for {date}"
            )))
        })?;

        let times = hourly
            .get("time")
            .and_then(|t| t.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .filter_map(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M").ok())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let temperature_c = json_f64_array(hourly.get("temperature_2m"));
        let precipitation_mm = json_f64_array(hourly.get("precipitation"));

        Ok(HourlyWeather {
            times,
            temperature_c,
            precipitation_mm,
        })
    }
}

fn json_f64(value: Option<&Value>) -> Option<f64> {
    let value = value?;
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn json_f64_array(value: Option<&Value>) -> Vec<f64> {
    value
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_f64()).collect())
        .unwrap_or_default()
}

/// Fixed-answer resolver for tests and offline runs.
#[derive(Debug, Clone, Default)]
pub struct StubResolver {
    pub lat: f64,
    pub lon: f64,
    pub elevation: f64,
    pub weather: HourlyWeather,
}

impl Geocoder for StubResolver {
    fn coordinates(&self, _query: &str) -> Result<(f64, f64)> {
        Ok((self.lat, self.lon))
    }
}

impl ElevationProvider for StubResolver {
    fn elevation_m(&self, _lat: f64, _lon: f64) -> Result<f64> {
        Ok(self.elevation)
    }
}

impl WeatherProvider for StubResolver {
    fn hourly(&self, _lat: f64, _lon: f64, _date: NaiveDate) -> Result<HourlyWeather> {
        Ok(self.weather.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_f64_accepts_strings() {
        assert_eq!(json_f64(Some(&Value::from("12.5"))), Some(12.5));
        assert_eq!(json_f64(Some(&Value::from(3))), Some(3.0));
        assert_eq!(json_f64(Some(&Value::from("x"))), None);
    }
}
