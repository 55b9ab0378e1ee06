//! METAR weather poller.
//!
//! Fetches the configured station's latest METAR as JSON, derives relative
//! humidity from temperature and dewpoint, converts aviation units to SI
//! (inHg → hPa, knots → m/s, inches → mm), and writes to the store only —
//! outside weather never enters the event log.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};
use tokio::sync::watch;

use crate::cache::{LiveCache, HEARTBEAT_SENSOR_TTL};
use crate::config::WeatherConfig;
use crate::psychro;
use crate::store::types::WeatherRow;
use crate::store::{with_backoff, Store};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const INHG_TO_HPA: f64 = 33.8639;
const KNOT_TO_MS: f64 = 0.514444;
const INCH_TO_MM: f64 = 25.4;

pub const SERVICE_NAME: &str = "sensor:weather";

/// Parse one METAR report object into a store row.
///
/// Missing fields become `None` rather than failing the whole report; a
/// precipitation code in `wxString` without an amount records 0.0 mm.
pub fn parse_metar(report: &serde_json::Value, station: &str, now_ms: i64) -> WeatherRow {
    let temperature_c = report.get("temp").and_then(serde_json::Value::as_f64);
    let dewpoint_c = report.get("dewp").and_then(serde_json::Value::as_f64);

    let relative_humidity = match (temperature_c, dewpoint_c) {
        (Some(t), Some(d)) => Some(psychro::round3(psychro::rh_from_dewpoint(t, d))),
        _ => None,
    };

    let pressure_hpa = report
        .get("altim")
        .and_then(serde_json::Value::as_f64)
        .map(|inhg| round2(inhg * INHG_TO_HPA));

    let wind_speed_ms = report
        .get("wspd")
        .and_then(serde_json::Value::as_f64)
        .map(|kt| round2(kt * KNOT_TO_MS));

    // Wind direction is occasionally the string "VRB"; treat as unknown.
    let wind_direction_deg = report.get("wdir").and_then(serde_json::Value::as_i64);

    let wx_string = report
        .get("wxString")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    let precipitation_mm = match report.get("precip").and_then(serde_json::Value::as_f64) {
        Some(inches) => Some(round2(inches * INCH_TO_MM)),
        None if ["RA", "SN", "DZ"].iter().any(|code| wx_string.contains(code)) => Some(0.0),
        None => None,
    };

    // obsTime arrives as epoch seconds from some deployments and as an ISO
    // string from others.
    let ts = match report.get("obsTime") {
        Some(serde_json::Value::Number(n)) => {
            n.as_i64().map_or(now_ms, |secs| secs * 1000)
        }
        Some(serde_json::Value::String(s)) => {
            chrono::DateTime::parse_from_rfc3339(&s.replace('Z', "+00:00"))
                .map_or(now_ms, |dt| dt.timestamp_millis())
        }
        _ => now_ms,
    };

    WeatherRow {
        ts,
        station: station.to_string(),
        temperature_c,
        dewpoint_c,
        relative_humidity,
        pressure_hpa,
        wind_speed_ms,
        wind_direction_deg,
        precipitation_mm,
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub struct WeatherProducer {
    config: WeatherConfig,
    cache: Arc<LiveCache>,
    store: Arc<Store>,
    client: reqwest::Client,
}

impl WeatherProducer {
    pub fn new(config: WeatherConfig, cache: Arc<LiveCache>, store: Arc<Store>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            config,
            cache,
            store,
            client,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.poll_interval_secs.max(60));

        while !*shutdown.borrow() {
            self.cache.write_heartbeat(
                SERVICE_NAME,
                HEARTBEAT_SENSOR_TTL,
                Utc::now().timestamp_millis(),
            );

            match self.fetch().await {
                Ok(Some(row)) => {
                    let store = self.store.clone();
                    if let Err(e) =
                        with_backoff(|| store.insert_weather(&row), "weather insert").await
                    {
                        warn!("weather insert gave up: {e}");
                    } else {
                        info!(
                            "weather {}: {:?}°C, RH {:?}%",
                            row.station, row.temperature_c, row.relative_humidity
                        );
                    }
                }
                Ok(None) => warn!("no METAR data for {}", self.config.station_icao),
                Err(e) => warn!("METAR fetch failed: {e}"),
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("weather producer stopped");
    }

    async fn fetch(&self) -> Result<Option<WeatherRow>, reqwest::Error> {
        let url = format!(
            "{}?ids={}&format=json",
            self.config.api_url, self.config.station_icao
        );
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let reports: serde_json::Value = response.json().await?;

        let Some(report) = reports.as_array().and_then(|a| a.first()) else {
            return Ok(None);
        };
        Ok(Some(parse_metar(
            report,
            &self.config.station_icao,
            Utc::now().timestamp_millis(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_report() {
        let report = serde_json::json!({
            "temp": 21.0,
            "dewp": 12.0,
            "altim": 29.92,
            "wspd": 10.0,
            "wdir": 270,
            "precip": 0.05,
            "obsTime": "2024-06-01T12:00:00Z",
        });
        let row = parse_metar(&report, "CYUL", 0);
        assert_eq!(row.temperature_c, Some(21.0));
        // 29.92 inHg is the standard atmosphere, ~1013.2 hPa.
        let pressure = row.pressure_hpa.unwrap();
        assert!((pressure - 1013.21).abs() < 0.1, "pressure = {pressure}");
        // 10 kt ≈ 5.14 m/s.
        assert!((row.wind_speed_ms.unwrap() - 5.14).abs() < 0.01);
        assert_eq!(row.wind_direction_deg, Some(270));
        // 0.05 in = 1.27 mm.
        assert!((row.precipitation_mm.unwrap() - 1.27).abs() < 1e-9);
        let rh = row.relative_humidity.unwrap();
        assert!((50.0..65.0).contains(&rh), "rh = {rh}");
        // Timestamp comes from the observation time.
        assert_eq!(row.ts, 1_717_243_200_000);
    }

    #[test]
    fn precip_code_without_amount_is_zero() {
        let report = serde_json::json!({ "temp": 5.0, "dewp": 1.0, "wxString": "-RA BR" });
        let row = parse_metar(&report, "CYUL", 42);
        assert_eq!(row.precipitation_mm, Some(0.0));
        assert_eq!(row.ts, 42);
    }

    #[test]
    fn missing_fields_stay_none() {
        let report = serde_json::json!({ "temp": 5.0 });
        let row = parse_metar(&report, "CYUL", 0);
        assert_eq!(row.dewpoint_c, None);
        assert_eq!(row.relative_humidity, None);
        assert_eq!(row.pressure_hpa, None);
        assert_eq!(row.precipitation_mm, None);
    }

    #[test]
    fn variable_wind_direction_ignored() {
        let report = serde_json::json!({ "wdir": "VRB" });
        let row = parse_metar(&report, "CYUL", 0);
        assert_eq!(row.wind_direction_deg, None);
    }
}
