//! CAN producer: read → decode → validate → extract → fan out.
//!
//! Read timeouts are normal (the bus idles between node transmissions);
//! hard errors are counted and, after five in a row, escalate to the
//! supervisor loop which reopens the socket under back-off. Bad frames are
//! discarded before they reach any sink.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::{broadcast, watch};

use crate::cache::{can_event, LiveCache, HEARTBEAT_SENSOR_TTL};
use crate::config::Config;
use crate::decode::{decode, SensorExtractor};
use crate::drivers::can::CanReader;
use crate::error::HardwareError;
use crate::ingest::hex_string;
use crate::store::{with_backoff, Store};

/// Consecutive hard errors before the socket is abandoned and reopened.
const MAX_CONSECUTIVE_ERRORS: u32 = 5;
/// Per-read timeout.
const READ_TIMEOUT: Duration = Duration::from_secs(1);
/// Heartbeat cadence (half the TTL).
const HEARTBEAT_EVERY: Duration = Duration::from_secs(HEARTBEAT_SENSOR_TTL / 2);

pub const SERVICE_NAME: &str = "sensor:can";

pub struct CanProducer {
    config: Arc<Config>,
    cache: Arc<LiveCache>,
    store: Arc<Store>,
    broadcast: broadcast::Sender<serde_json::Value>,
    extractor: SensorExtractor,
}

impl CanProducer {
    pub fn new(
        config: Arc<Config>,
        cache: Arc<LiveCache>,
        store: Arc<Store>,
        broadcast: broadcast::Sender<serde_json::Value>,
    ) -> Self {
        let fallback = config.hardware.fallback_zone.clone();
        Self {
            config,
            cache,
            store,
            broadcast,
            extractor: SensorExtractor::new(fallback),
        }
    }

    /// Supervisor loop: (re)open the socket and pump frames until shutdown.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let interface = self.config.hardware.can_interface.clone();
        let simulation = self.config.hardware.simulation;
        let mut reopen_delay = Duration::from_secs(1);

        while !*shutdown.borrow() {
            let mut reader = match CanReader::open(&interface, simulation) {
                Ok(reader) => {
                    reopen_delay = Duration::from_secs(1);
                    reader
                }
                Err(e) => {
                    error!("CAN open failed: {e}; retrying in {}s", reopen_delay.as_secs());
                    tokio::select! {
                        _ = tokio::time::sleep(reopen_delay) => {}
                        _ = shutdown.changed() => break,
                    }
                    reopen_delay = (reopen_delay * 2).min(Duration::from_secs(60));
                    continue;
                }
            };

            if let Err(e) = self.pump(&mut reader, &mut shutdown).await {
                error!("CAN producer escalating: {e}; reopening socket");
            }
        }
        info!("CAN producer stopped");
    }

    /// Pump frames until shutdown or too many consecutive hard errors.
    async fn pump(
        &mut self,
        reader: &mut CanReader,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), HardwareError> {
        let mut consecutive_errors: u32 = 0;
        self.cache.write_heartbeat(
            SERVICE_NAME,
            HEARTBEAT_SENSOR_TTL,
            Utc::now().timestamp_millis(),
        );
        let mut last_heartbeat = tokio::time::Instant::now();

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            if last_heartbeat.elapsed() >= HEARTBEAT_EVERY {
                self.cache.write_heartbeat(
                    SERVICE_NAME,
                    HEARTBEAT_SENSOR_TTL,
                    Utc::now().timestamp_millis(),
                );
                last_heartbeat = tokio::time::Instant::now();
            }

            match reader.read(READ_TIMEOUT).await {
                Ok(Some(frame)) => {
                    consecutive_errors = 0;
                    self.process_frame(&frame).await;
                }
                Ok(None) => {
                    consecutive_errors = 0;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!("CAN read error ({consecutive_errors}/{MAX_CONSECUTIVE_ERRORS}): {e}");
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        return Err(e);
                    }
                }
            }
        }
    }

    async fn process_frame(&mut self, frame: &crate::drivers::can::RawFrame) {
        let decoded = match decode(frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                // Bad data: discard before any sink sees it.
                debug!("discarding frame {:#05x}: {e}", frame.id);
                return;
            }
        };

        let now_ms = Utc::now().timestamp_millis();
        let extraction = self.extractor.extract(&decoded, now_ms);

        // Live keys first, so consumers see the newest value immediately.
        for reading in &extraction.readings {
            self.cache
                .write_sensor_value(&reading.name, reading.value, now_ms);
        }

        // Event log entry with raw bytes and the decoded JSON (enriched
        // with the derived climate values when present).
        let mut decoded_json = decoded.to_json();
        if let Some((rh, vpd, pressure)) = extraction.derived {
            let map = decoded_json.as_object_mut().expect("decoded is an object");
            map.insert("rh_percent".into(), serde_json::json!(rh));
            map.insert("vpd_kpa".into(), serde_json::json!(vpd));
            map.insert("pressure_hpa".into(), serde_json::json!(pressure));
        }
        self.cache
            .append_event(can_event(now_ms, &hex_string(&frame.data), &decoded_json));

        // Measurement rows, batched per frame, retried under back-off.
        if !extraction.readings.is_empty() {
            let device = format!("can_node_{}", decoded.node_id);
            let mut rows = Vec::with_capacity(extraction.readings.len());
            for reading in &extraction.readings {
                match self.store.ensure_sensor(
                    &extraction.zone.location,
                    &device,
                    &reading.name,
                    reading.unit,
                ) {
                    Ok(sensor_id) => rows.push((sensor_id, now_ms, reading.value)),
                    Err(e) => {
                        warn!("sensor id resolution failed for {}: {e}", reading.name);
                    }
                }
            }
            if !rows.is_empty() {
                let store = self.store.clone();
                if let Err(e) =
                    with_backoff(|| store.insert_measurements(&rows), "measurement insert").await
                {
                    // The cache already has the values; history loses a row.
                    error!("measurement insert gave up: {e}");
                }
            }
        }

        let sensors: serde_json::Map<String, serde_json::Value> = extraction
            .readings
            .iter()
            .map(|r| (r.name.clone(), serde_json::json!(r.value)))
            .collect();
        let _ = self.broadcast.send(serde_json::json!({
            "type": "sensor_update",
            "location": extraction.zone.location,
            "cluster": extraction.zone.cluster,
            "sensors": sensors,
            "ts": now_ms,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::can::RawFrame;

    fn producer() -> (CanProducer, Arc<LiveCache>, Arc<Store>, tempfile::TempDir) {
        let config = Arc::new(
            serde_yaml::from_str::<Config>("hardware:\n  simulation: true\n").unwrap(),
        );
        let cache = Arc::new(LiveCache::new());
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let (tx, _rx) = broadcast::channel(16);
        let producer = CanProducer::new(config, cache.clone(), store.clone(), tx);
        (producer, cache, store, dir)
    }

    #[tokio::test]
    async fn frame_fans_out_to_cache_log_and_store() {
        let (mut producer, cache, store, _dir) = producer();
        // Node 2 PT100: dry 26.00, wet 21.00.
        let frame = RawFrame {
            id: 0x201,
            data: vec![0x0A, 0x28, 0x08, 0x34, 0x00, 0x01],
        };
        producer.process_frame(&frame).await;

        assert!(cache.read_sensor_value("dry_bulb_f").is_some());
        assert!(cache.read_sensor_value("rh_f").is_some());
        assert_eq!(cache.event_log_len(), 1);
        let entry = &cache.event_log_tail(1)[0];
        assert_eq!(entry.entry_type, "can");
        assert!(entry.fields["data"].starts_with("0A 28"));
        assert!(entry.fields["decoded"].contains("rh_percent"));

        let sensor_id = store.sensor_id_by_name("dry_bulb_f").unwrap().unwrap();
        assert_eq!(store.measurement_count(sensor_id).unwrap(), 1);
    }

    #[tokio::test]
    async fn bad_frame_reaches_no_sink() {
        let (mut producer, cache, store, _dir) = producer();
        let frame = RawFrame {
            id: 0x209, // unknown message type
            data: vec![0; 8],
        };
        producer.process_frame(&frame).await;
        assert_eq!(cache.event_log_len(), 0);
        assert!(store.sensor_id_by_name("dry_bulb_f").unwrap().is_none());
    }
}
