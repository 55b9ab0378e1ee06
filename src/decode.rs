//! CAN frame decoding and sensor-value extraction.
//!
//! The sensor nodes publish fixed-layout frames with an 11-bit ID of the
//! form `0xN0M`: `N` is the node ID, `M` the message type. Decoding yields a
//! typed [`Message`]; the [`SensorExtractor`] then turns messages into named
//! readings, deriving RH/VPD from PT100 pairs and filtering implausible
//! CO2 zeros. The extractor owns the per-zone pressure cache and per-sensor
//! CO2 history — state is sequential within the CAN producer, so no
//! cross-task synchronisation is involved.

use std::collections::{HashMap, VecDeque};

use log::{debug, warn};
use serde_json::json;

use crate::drivers::can::RawFrame;
use crate::error::DecodeError;
use crate::psychro;
use crate::zone::{zone_for_node, Zone};

/// Sentinel published by the nodes when a PT100 channel has no reading.
const INVALID_TEMP_RAW: i16 = 0x7FFF;

// CO2 zero-rejection filter tuning.
const CO2_MIN_VALID: f64 = 300.0;
const CO2_MAX_DROP_RATE: f64 = 200.0;
const CO2_HISTORY_SIZE: usize = 3;
const CO2_MAX_AGE_MS: i64 = 30_000;

/// A decoded sensor-node message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Dry/wet bulb pair; either side may carry the no-reading sentinel.
    Pt100 {
        temp_dry_c: Option<f64>,
        temp_wet_c: Option<f64>,
        message_count: u16,
    },
    Bme280 {
        temperature_c: f64,
        humidity_percent: f64,
        pressure_hpa: f64,
    },
    Scd30 {
        co2_ppm: f64,
        temperature_c: f64,
        humidity_percent: f64,
    },
    Vl53 {
        distance_mm: u16,
        ambient: u16,
        signal: u16,
    },
    Heartbeat {
        uptime_ms: u32,
    },
}

impl Message {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Pt100 { .. } => "PT100",
            Self::Bme280 { .. } => "BME280",
            Self::Scd30 { .. } => "SCD30",
            Self::Vl53 { .. } => "VL53",
            Self::Heartbeat { .. } => "Heartbeat",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub can_id: u32,
    pub node_id: u8,
    pub message: Message,
}

impl DecodedFrame {
    /// JSON shape stored in the event log's `decoded` field.
    pub fn to_json(&self) -> serde_json::Value {
        let mut value = json!({
            "can_id": self.can_id,
            "node_id": self.node_id,
            "message_type": self.message.type_name(),
        });
        let map = value.as_object_mut().expect("object literal");
        match &self.message {
            Message::Pt100 {
                temp_dry_c,
                temp_wet_c,
                message_count,
            } => {
                map.insert("temp_dry_c".into(), json!(temp_dry_c));
                map.insert("temp_wet_c".into(), json!(temp_wet_c));
                map.insert("message_count".into(), json!(message_count));
            }
            Message::Bme280 {
                temperature_c,
                humidity_percent,
                pressure_hpa,
            } => {
                map.insert("temperature_c".into(), json!(temperature_c));
                map.insert("humidity_percent".into(), json!(humidity_percent));
                map.insert("pressure_hpa".into(), json!(pressure_hpa));
            }
            Message::Scd30 {
                co2_ppm,
                temperature_c,
                humidity_percent,
            } => {
                map.insert("co2_ppm".into(), json!(co2_ppm));
                map.insert("temperature_c".into(), json!(temperature_c));
                map.insert("humidity_percent".into(), json!(humidity_percent));
            }
            Message::Vl53 {
                distance_mm,
                ambient,
                signal,
            } => {
                map.insert("distance_mm".into(), json!(distance_mm));
                map.insert("ambient".into(), json!(ambient));
                map.insert("signal".into(), json!(signal));
            }
            Message::Heartbeat { uptime_ms } => {
                map.insert("uptime_ms".into(), json!(uptime_ms));
                map.insert("uptime_sec".into(), json!(f64::from(*uptime_ms) / 1000.0));
            }
        }
        value
    }
}

fn be_i16(data: &[u8], at: usize) -> i16 {
    i16::from_be_bytes([data[at], data[at + 1]])
}

fn be_u16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

fn le_u16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

fn temp_from_raw(raw: i16) -> Option<f64> {
    if raw == INVALID_TEMP_RAW {
        None
    } else {
        Some(f64::from(raw) / 100.0)
    }
}

/// Decode a raw frame into a typed message.
pub fn decode(frame: &RawFrame) -> Result<DecodedFrame, DecodeError> {
    let node_id = ((frame.id >> 8) & 0xF) as u8;
    let msg_type = frame.id & 0xFF;
    let data = &frame.data;

    let short = |kind| DecodeError::ShortPayload {
        kind,
        got: data.len(),
    };

    let message = match msg_type {
        0x01 => {
            if data.len() < 6 {
                return Err(short("PT100"));
            }
            Message::Pt100 {
                temp_dry_c: temp_from_raw(be_i16(data, 0)),
                temp_wet_c: temp_from_raw(be_i16(data, 2)),
                message_count: le_u16(data, 4),
            }
        }
        0x02 => {
            if data.len() < 6 {
                return Err(short("BME280"));
            }
            Message::Bme280 {
                temperature_c: f64::from(be_i16(data, 0)) / 100.0,
                humidity_percent: f64::from(be_u16(data, 2)) / 100.0,
                pressure_hpa: f64::from(be_u16(data, 4)) / 10.0,
            }
        }
        0x03 => {
            if data.len() < 6 {
                return Err(short("SCD30"));
            }
            Message::Scd30 {
                co2_ppm: f64::from(be_u16(data, 0)),
                temperature_c: f64::from(be_i16(data, 2)) / 100.0,
                humidity_percent: f64::from(be_u16(data, 4)) / 100.0,
            }
        }
        0x04 => {
            if data.len() < 6 {
                return Err(short("VL53"));
            }
            Message::Vl53 {
                distance_mm: be_u16(data, 0),
                ambient: be_u16(data, 2),
                signal: be_u16(data, 4),
            }
        }
        0x05 => {
            if data.len() < 6 {
                return Err(short("Heartbeat"));
            }
            // First two bytes are padding on the wire.
            Message::Heartbeat {
                uptime_ms: u32::from_be_bytes([data[2], data[3], data[4], data[5]]),
            }
        }
        _ => return Err(DecodeError::UnknownMessageType(frame.id)),
    };

    Ok(DecodedFrame {
        can_id: frame.id,
        node_id,
        message,
    })
}

/// A named sensor reading ready for the cache/log/store fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub name: String,
    pub value: f64,
    pub unit: &'static str,
}

impl Reading {
    fn new(name: String, value: f64, unit: &'static str) -> Self {
        Self { name, value, unit }
    }
}

/// Result of extracting one decoded frame.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub zone: Zone,
    pub readings: Vec<Reading>,
    /// (rh %, vpd kPa, pressure hPa) when a PT100 pair produced them.
    pub derived: Option<(f64, f64, f64)>,
}

/// Turns decoded frames into named readings, owning the decoder-side state
/// machines (per-zone pressure, per-sensor CO2 history).
pub struct SensorExtractor {
    fallback: Zone,
    pressure: HashMap<Zone, f64>,
    co2_history: HashMap<String, VecDeque<(f64, i64)>>,
}

impl SensorExtractor {
    pub fn new(fallback: Zone) -> Self {
        Self {
            fallback,
            pressure: HashMap::new(),
            co2_history: HashMap::new(),
        }
    }

    /// Extract readings for a frame observed at `now_ms`.
    pub fn extract(&mut self, frame: &DecodedFrame, now_ms: i64) -> Extraction {
        let zone = zone_for_node(frame.node_id, &self.fallback);
        let is_lab = zone.location == "Lab";
        let mut readings = Vec::new();
        let mut derived = None;

        match &frame.message {
            Message::Pt100 {
                temp_dry_c,
                temp_wet_c,
                ..
            } => {
                if let Some(dry) = temp_dry_c {
                    let name = if is_lab {
                        "lab_temp".to_string()
                    } else {
                        zone.sensor_name("dry_bulb")
                    };
                    readings.push(Reading::new(name, *dry, "°C"));
                }
                if let Some(wet) = temp_wet_c {
                    readings.push(Reading::new(zone.sensor_name("wet_bulb"), *wet, "°C"));
                }
                if let (Some(dry), Some(wet)) = (temp_dry_c, temp_wet_c) {
                    let pressure = self
                        .pressure
                        .get(&zone)
                        .copied()
                        .unwrap_or(psychro::SEA_LEVEL_HPA);
                    let rh = psychro::round3(psychro::relative_humidity(*dry, *wet, pressure));
                    let vpd =
                        psychro::round3(psychro::vapor_pressure_deficit(*dry, *wet, pressure));
                    readings.push(Reading::new(zone.sensor_name("rh"), rh, "%"));
                    readings.push(Reading::new(zone.sensor_name("vpd"), vpd, "kPa"));
                    derived = Some((rh, vpd, pressure));
                }
            }
            Message::Bme280 { pressure_hpa, .. } => {
                readings.push(Reading::new(
                    zone.sensor_name("pressure"),
                    *pressure_hpa,
                    "hPa",
                ));
                self.pressure.insert(zone.clone(), *pressure_hpa);
            }
            Message::Scd30 {
                co2_ppm,
                temperature_c,
                humidity_percent,
            } => {
                let co2_name = zone.sensor_name("co2");
                if self.accept_co2(&co2_name, *co2_ppm, now_ms) {
                    readings.push(Reading::new(co2_name, *co2_ppm, "ppm"));
                }
                let temp_name = if is_lab {
                    "water_temp".to_string()
                } else {
                    zone.sensor_name("secondary_temp")
                };
                readings.push(Reading::new(temp_name, *temperature_c, "°C"));
                readings.push(Reading::new(
                    zone.sensor_name("secondary_rh"),
                    *humidity_percent,
                    "%",
                ));
            }
            Message::Vl53 { distance_mm, .. } => {
                readings.push(Reading::new(
                    zone.sensor_name("water_level"),
                    f64::from(*distance_mm),
                    "mm",
                ));
            }
            Message::Heartbeat { uptime_ms } => {
                debug!("node {} heartbeat, uptime {}s", frame.node_id, uptime_ms / 1000);
            }
        }

        Extraction {
            zone,
            readings,
            derived,
        }
    }

    /// Current cached pressure for a zone (for observability/tests).
    pub fn pressure_for(&self, zone: &Zone) -> f64 {
        self.pressure
            .get(zone)
            .copied()
            .unwrap_or(psychro::SEA_LEVEL_HPA)
    }

    /// CO2 zero-rejection filter.
    ///
    /// Non-zero values always pass (and enter the history). A zero passes
    /// when it is plausible: no recent history, a previous zero, or a drop
    /// from a valid reading faster than a real purge event. A slow drift to
    /// zero from a valid reading is rejected and kept out of the history.
    fn accept_co2(&mut self, sensor: &str, value: f64, now_ms: i64) -> bool {
        let history = self.co2_history.entry(sensor.to_string()).or_default();

        let mut record = |history: &mut VecDeque<(f64, i64)>| {
            history.push_back((value, now_ms));
            while history.len() > CO2_HISTORY_SIZE {
                history.pop_front();
            }
        };

        if value > 0.0 {
            record(history);
            return true;
        }

        let Some(&(prev_value, prev_ms)) = history.back() else {
            record(history);
            return true;
        };

        if prev_value == 0.0 {
            record(history);
            return true;
        }

        let age_ms = now_ms - prev_ms;
        if age_ms > CO2_MAX_AGE_MS {
            // Previous reading too old to judge against.
            record(history);
            return true;
        }

        if prev_value >= CO2_MIN_VALID {
            let drop_rate = if age_ms > 0 {
                (prev_value - value) / (age_ms as f64 / 1000.0)
            } else {
                f64::INFINITY
            };
            if drop_rate > CO2_MAX_DROP_RATE {
                debug!(
                    "CO2 {sensor}: accepting 0 with fast drop rate {drop_rate:.1} ppm/s \
                     (previous {prev_value:.1} ppm)"
                );
                record(history);
                return true;
            }
            warn!(
                "CO2 {sensor}: filtering false 0 reading (previous {prev_value:.1} ppm, \
                 drop rate {drop_rate:.1} ppm/s)"
            );
            return false;
        }

        // Previous was a low-but-nonzero reading; cannot call it false.
        record(history);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: u32, data: &[u8]) -> RawFrame {
        RawFrame {
            id,
            data: data.to_vec(),
        }
    }

    fn extractor() -> SensorExtractor {
        SensorExtractor::new(Zone::new("Flower Room", "back"))
    }

    #[test]
    fn decodes_pt100() {
        // dry 23.45, wet 19.20, count 0x0102 little-endian.
        let decoded = decode(&frame(0x201, &[0x09, 0x29, 0x07, 0x80, 0x02, 0x01])).unwrap();
        assert_eq!(decoded.node_id, 2);
        match decoded.message {
            Message::Pt100 {
                temp_dry_c,
                temp_wet_c,
                message_count,
            } => {
                assert_eq!(temp_dry_c, Some(23.45));
                assert_eq!(temp_wet_c, Some(19.20));
                assert_eq!(message_count, 0x0102);
            }
            other => panic!("wrong message: {other:?}"),
        }
    }

    #[test]
    fn pt100_sentinel_means_no_reading() {
        let decoded = decode(&frame(0x101, &[0x7F, 0xFF, 0x07, 0x80, 0x00, 0x00])).unwrap();
        match decoded.message {
            Message::Pt100 {
                temp_dry_c,
                temp_wet_c,
                ..
            } => {
                assert_eq!(temp_dry_c, None);
                assert_eq!(temp_wet_c, Some(19.20));
            }
            other => panic!("wrong message: {other:?}"),
        }
    }

    #[test]
    fn decodes_bme280_and_scd30() {
        let bme = decode(&frame(0x102, &[0x08, 0xFC, 0x17, 0x70, 0x27, 0xBD])).unwrap();
        match bme.message {
            Message::Bme280 {
                temperature_c,
                humidity_percent,
                pressure_hpa,
            } => {
                assert_eq!(temperature_c, 23.0);
                assert_eq!(humidity_percent, 60.0);
                assert!((pressure_hpa - 1017.3).abs() < 1e-9);
            }
            other => panic!("wrong message: {other:?}"),
        }

        let scd = decode(&frame(0x303, &[0x03, 0x20, 0x08, 0xFC, 0x17, 0x70])).unwrap();
        match scd.message {
            Message::Scd30 { co2_ppm, .. } => assert_eq!(co2_ppm, 800.0),
            other => panic!("wrong message: {other:?}"),
        }
    }

    #[test]
    fn rejects_short_and_unknown() {
        assert!(matches!(
            decode(&frame(0x101, &[0x01, 0x02])),
            Err(DecodeError::ShortPayload { kind: "PT100", .. })
        ));
        assert!(matches!(
            decode(&frame(0x109, &[0; 8])),
            Err(DecodeError::UnknownMessageType(0x109))
        ));
    }

    #[test]
    fn heartbeat_skips_padding() {
        let decoded = decode(&frame(0x105, &[0xAA, 0xBB, 0x00, 0x01, 0x86, 0xA0])).unwrap();
        match decoded.message {
            Message::Heartbeat { uptime_ms } => assert_eq!(uptime_ms, 100_000),
            other => panic!("wrong message: {other:?}"),
        }
    }

    #[test]
    fn pt100_derives_rh_and_vpd_with_suffix() {
        let mut ex = extractor();
        let decoded = decode(&frame(0x201, &[0x0A, 0x28, 0x08, 0x34, 0x00, 0x00])).unwrap();
        let extraction = ex.extract(&decoded, 0);
        assert_eq!(extraction.zone, Zone::new("Flower Room", "front"));
        let names: Vec<&str> = extraction.readings.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["dry_bulb_f", "wet_bulb_f", "rh_f", "vpd_f"]);
        let (rh, vpd, pressure) = extraction.derived.unwrap();
        assert!((0.0..=100.0).contains(&rh));
        assert!(vpd >= 0.0);
        assert_eq!(pressure, psychro::SEA_LEVEL_HPA);
    }

    #[test]
    fn bme280_pressure_feeds_later_derivations() {
        let mut ex = extractor();
        // 990.0 hPa at node 1.
        let bme = decode(&frame(0x102, &[0x08, 0xFC, 0x17, 0x70, 0x26, 0xAC])).unwrap();
        ex.extract(&bme, 0);
        let zone = Zone::new("Flower Room", "back");
        assert!((ex.pressure_for(&zone) - 990.0).abs() < 1e-9);

        let pt = decode(&frame(0x101, &[0x0A, 0x28, 0x08, 0x34, 0x00, 0x00])).unwrap();
        let extraction = ex.extract(&pt, 1000);
        let (_, _, pressure) = extraction.derived.unwrap();
        assert!((pressure - 990.0).abs() < 1e-9);
    }

    #[test]
    fn lab_overrides() {
        let mut ex = extractor();
        let pt = decode(&frame(0x401, &[0x09, 0x29, 0x7F, 0xFF, 0x00, 0x00])).unwrap();
        let extraction = ex.extract(&pt, 0);
        assert_eq!(extraction.readings[0].name, "lab_temp");

        let scd = decode(&frame(0x403, &[0x03, 0x20, 0x08, 0xFC, 0x17, 0x70])).unwrap();
        let extraction = ex.extract(&scd, 0);
        let names: Vec<&str> = extraction.readings.iter().map(|r| r.name.as_str()).collect();
        assert!(names.contains(&"water_temp"));
        assert!(names.contains(&"co2"));
    }

    #[test]
    fn co2_slow_drift_to_zero_is_rejected() {
        let mut ex = extractor();
        assert!(ex.accept_co2("co2_f", 800.0, 0));
        assert!(ex.accept_co2("co2_f", 790.0, 2_000));
        // 790 ppm lost over 10 s is 79 ppm/s: too slow for a purge.
        assert!(!ex.accept_co2("co2_f", 0.0, 12_000));
        // Rejected reading must not enter the history.
        assert!(!ex.accept_co2("co2_f", 0.0, 13_000));
    }

    #[test]
    fn co2_fast_purge_drop_is_accepted() {
        let mut ex = extractor();
        assert!(ex.accept_co2("co2_b", 800.0, 0));
        // 800 ppm drop in half a second: 1600 ppm/s, a real purge.
        assert!(ex.accept_co2("co2_b", 0.0, 500));
        // A following zero rides on the previous zero.
        assert!(ex.accept_co2("co2_b", 0.0, 1_500));
    }

    #[test]
    fn co2_stale_history_always_accepts() {
        let mut ex = extractor();
        assert!(ex.accept_co2("co2_v", 900.0, 0));
        assert!(ex.accept_co2("co2_v", 0.0, 31_000));
    }

    #[test]
    fn co2_first_reading_accepted() {
        let mut ex = extractor();
        assert!(ex.accept_co2("co2_f", 0.0, 0));
    }
}
