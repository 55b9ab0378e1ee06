//! Soil probe poller: RS-485 Modbus-RTU, one task per configured probe.
//!
//! Every poll reads the four holding registers starting at the temperature
//! register and scales them per the probe manual (T × 0.1 °C, RH × 0.1 %,
//! EC × 1 µS/cm, pH × 0.01). A serial failure drops the connection; the
//! next tick reconnects. Register reads are blocking serial I/O and run
//! under `block_in_place` so the runtime's other tasks keep moving.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{error, info, warn};
use tokio::sync::{broadcast, watch};

use crate::cache::{soil_event, LiveCache, HEARTBEAT_SENSOR_TTL};
use crate::config::SoilProbeConfig;
use crate::drivers::modbus::{ModbusRtu, DEFAULT_BAUD};
use crate::store::{with_backoff, Store};

/// Holding register offsets, from the probe manual.
const REG_TEMPERATURE: u16 = 0x0000;
const REGISTER_COUNT: u16 = 4;

/// One scaled probe sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SoilReadings {
    pub temperature_c: f64,
    pub moisture_percent: f64,
    pub ec_us_cm: f64,
    pub ph: f64,
}

/// Scale the four raw registers into engineering units.
pub fn scale_registers(registers: &[u16]) -> Option<SoilReadings> {
    if registers.len() < 4 {
        return None;
    }
    Some(SoilReadings {
        temperature_c: f64::from(registers[0] as i16) * 0.1,
        moisture_percent: f64::from(registers[1]) * 0.1,
        ec_us_cm: f64::from(registers[2]),
        ph: f64::from(registers[3]) * 0.01,
    })
}

/// Sensor names published for a bed.
pub fn sensor_names(bed: &str) -> [(String, &'static str); 4] {
    [
        (format!("soil_temp_{bed}"), "°C"),
        (format!("soil_moisture_{bed}"), "%"),
        (format!("soil_ec_{bed}"), "µS/cm"),
        (format!("soil_ph_{bed}"), "pH"),
    ]
}

pub struct SoilProducer {
    probe: SoilProbeConfig,
    simulation: bool,
    cache: Arc<LiveCache>,
    store: Arc<Store>,
    broadcast: broadcast::Sender<serde_json::Value>,
}

impl SoilProducer {
    pub fn new(
        probe: SoilProbeConfig,
        simulation: bool,
        cache: Arc<LiveCache>,
        store: Arc<Store>,
        broadcast: broadcast::Sender<serde_json::Value>,
    ) -> Self {
        Self {
            probe,
            simulation,
            cache,
            store,
            broadcast,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let service = format!("sensor:soil:{}", self.probe.bed);
        let interval = Duration::from_secs(self.probe.poll_interval_secs.max(1));

        if self.simulation {
            info!("soil probe {} idle (simulation mode)", self.probe.bed);
            let _ = shutdown.changed().await;
            return;
        }

        let mut modbus = ModbusRtu::new(&self.probe.port, DEFAULT_BAUD, Duration::from_secs(1));

        while !*shutdown.borrow() {
            self.cache.write_heartbeat(
                &service,
                HEARTBEAT_SENSOR_TTL,
                Utc::now().timestamp_millis(),
            );

            if !modbus.is_connected() {
                if let Err(e) = modbus.connect() {
                    warn!("soil probe {}: connect failed: {e}", self.probe.bed);
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => continue,
                        _ = shutdown.changed() => break,
                    }
                }
            }

            let slave = self.probe.slave_id;
            let result = tokio::task::block_in_place(|| {
                modbus.read_holding_registers(slave, REG_TEMPERATURE, REGISTER_COUNT)
            });

            match result.ok().as_deref().and_then(scale_registers) {
                Some(readings) => self.publish(&readings).await,
                None => {
                    warn!("soil probe {}: read failed, reconnecting", self.probe.bed);
                    modbus.disconnect();
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("soil producer {} stopped", self.probe.bed);
    }

    async fn publish(&self, readings: &SoilReadings) {
        let now_ms = Utc::now().timestamp_millis();
        let bed = &self.probe.bed;
        let values = [
            readings.temperature_c,
            readings.moisture_percent,
            readings.ec_us_cm,
            readings.ph,
        ];
        let names = sensor_names(bed);

        for ((name, _), value) in names.iter().zip(values) {
            self.cache.write_sensor_value(name, value, now_ms);
        }

        let readings_json = serde_json::json!({
            "temperature": readings.temperature_c,
            "moisture": readings.moisture_percent,
            "ec": readings.ec_us_cm,
            "ph": readings.ph,
            "bed": bed,
            "room": self.probe.room,
        });
        self.cache
            .append_event(soil_event(now_ms, bed, &readings_json));

        let device = format!("soil_{bed}");
        let mut rows = Vec::with_capacity(4);
        for ((name, unit), value) in names.iter().zip(values) {
            match self
                .store
                .ensure_sensor(&self.probe.room, &device, name, unit)
            {
                Ok(sensor_id) => rows.push((sensor_id, now_ms, value)),
                Err(e) => warn!("sensor id resolution failed for {name}: {e}"),
            }
        }
        if !rows.is_empty() {
            let store = self.store.clone();
            if let Err(e) =
                with_backoff(|| store.insert_measurements(&rows), "soil measurement insert").await
            {
                error!("soil measurement insert gave up: {e}");
            }
        }

        let _ = self.broadcast.send(serde_json::json!({
            "type": "sensor_update",
            "location": self.probe.room,
            "cluster": bed,
            "sensors": readings_json,
            "ts": now_ms,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaling_per_probe_manual() {
        let readings = scale_registers(&[215, 432, 1_250, 652]).unwrap();
        assert!((readings.temperature_c - 21.5).abs() < 1e-9);
        assert!((readings.moisture_percent - 43.2).abs() < 1e-9);
        assert!((readings.ec_us_cm - 1_250.0).abs() < 1e-9);
        assert!((readings.ph - 6.52).abs() < 1e-9);
    }

    #[test]
    fn negative_temperature_register() {
        // 0xFFCE as i16 = -50 → -5.0 °C.
        let readings = scale_registers(&[0xFFCE, 0, 0, 700]).unwrap();
        assert!((readings.temperature_c + 5.0).abs() < 1e-9);
    }

    #[test]
    fn short_register_block_rejected() {
        assert!(scale_registers(&[1, 2, 3]).is_none());
    }

    #[test]
    fn bed_sensor_names() {
        let names = sensor_names("bed_1");
        assert_eq!(names[0].0, "soil_temp_bed_1");
        assert_eq!(names[3].0, "soil_ph_bed_1");
    }
}
