//! canopyd — daemon entry point.
//!
//! Wires the hardware drivers, cache, store, producers, and the control
//! engine together, then supervises them until SIGINT. Shutdown is
//! cooperative: every task honours the watch signal, the control loop
//! drives all devices to their safe states, and the store is flushed —
//! within the five second shutdown window.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn, LevelFilter};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, watch};

use canopy::api::ApiService;
use canopy::cache::LiveCache;
use canopy::config::Config;
use canopy::control::alarm::AlarmManager;
use canopy::control::engine::{ControlEngine, EngineLoadProbe};
use canopy::control::interlock::InterlockManager;
use canopy::control::relay::RelayManager;
use canopy::control::SharedConfigState;
use canopy::drivers::gp8403::DacManager;
use canopy::drivers::mcp23017::Mcp23017;
use canopy::ingest::can::CanProducer;
use canopy::ingest::soil::SoilProducer;
use canopy::ingest::weather::WeatherProducer;
use canopy::store::Store;
use canopy::tasks;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Controlled-environment agriculture edge controller
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML config file
    #[clap(long, short, default_value = "/etc/canopy/canopyd.yaml")]
    config: PathBuf,

    /// Enable debug output
    #[clap(long)]
    debug: bool,

    /// Validate the config file and exit
    #[clap(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut logger = env_logger::Builder::from_env("CANOPY_LOG");
    if args.debug {
        logger.filter_level(LevelFilter::Debug);
    } else if std::env::var_os("CANOPY_LOG").is_none() {
        logger.filter_level(LevelFilter::Info);
    }
    logger.init();

    info!("canopyd v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;
    if args.check_config {
        println!("config OK: {}", args.config.display());
        return Ok(());
    }
    let config = Arc::new(config);

    // The store must open or there is nothing worth running.
    let store = Arc::new(
        Store::open(&config.service.data_dir)
            .with_context(|| format!("opening store at {}", config.service.data_dir.display()))?,
    );
    tasks::sync_config_seeds(&config, &store).context("seeding store from config")?;

    let cache = Arc::new(LiveCache::new());
    tasks::populate_cache_from_store(&config, &cache, &store)
        .context("populating cache from store")?;

    // Hardware. All I2C devices share one bus and one mutex discipline:
    // the expander has its own handle, the DAC boards go through the
    // manager, and each is locked independently (rppal serialises at the
    // /dev/i2c level per transfer).
    let hw = &config.hardware;
    let mcp = Arc::new(Mutex::new(Mcp23017::new(
        hw.i2c_bus,
        hw.mcp23017_address,
        hw.simulation,
    )));
    let mut dac_manager = DacManager::new(hw.i2c_bus, hw.simulation);
    for board in &hw.dac_boards {
        if !dac_manager.add_board(board.board_id, board.address) {
            warn!("DAC board {} not registered", board.board_id);
        }
    }
    let dacs = Arc::new(Mutex::new(dac_manager));

    // Shared state and channels.
    let state = Arc::new(SharedConfigState::load(&store).context("loading control snapshot")?);
    let (broadcast_tx, _) = broadcast::channel(256);
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let duties = Arc::new(RwLock::new(HashMap::new()));

    let mut alarm_manager = AlarmManager::new(cache.clone());
    alarm_manager.restore(&config.zones());
    let alarms = Arc::new(Mutex::new(alarm_manager));

    let probe = EngineLoadProbe::new(&config, dacs.clone(), duties.clone());
    let interlocks = InterlockManager::from_config(&config, Box::new(probe));
    let relays = RelayManager::new(&config, mcp.clone(), interlocks);

    let mut engine = ControlEngine::new(
        config.clone(),
        state.clone(),
        cache.clone(),
        store.clone(),
        relays,
        dacs.clone(),
        alarms.clone(),
        duties,
        broadcast_tx.clone(),
        command_rx,
    );

    // Startup restoration: relays from the store (no interlock re-check),
    // light intensities from cache/history, safety levels to EEPROM.
    engine
        .restore_device_states()
        .context("restoring device states")?;
    engine
        .restore_light_intensities()
        .context("restoring light intensities")?;
    engine.apply_safety_levels();

    // The API service handle is what the (external) HTTP layer consumes.
    let _api = ApiService::new(
        config.clone(),
        cache.clone(),
        store.clone(),
        state.clone(),
        alarms.clone(),
        broadcast_tx.clone(),
        command_tx,
    );

    // Spawn the task fleet.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::new();

    let can = CanProducer::new(
        config.clone(),
        cache.clone(),
        store.clone(),
        broadcast_tx.clone(),
    );
    handles.push(tokio::spawn(can.run(shutdown_rx.clone())));

    for probe_config in config.hardware.soil_probes.clone() {
        let soil = SoilProducer::new(
            probe_config,
            config.hardware.simulation,
            cache.clone(),
            store.clone(),
            broadcast_tx.clone(),
        );
        handles.push(tokio::spawn(soil.run(shutdown_rx.clone())));
    }

    if let Some(weather_config) = config.weather.clone() {
        let weather = WeatherProducer::new(weather_config, cache.clone(), store.clone());
        handles.push(tokio::spawn(weather.run(shutdown_rx.clone())));
    }

    handles.push(tokio::spawn(tasks::heartbeat_loop(
        cache.clone(),
        shutdown_rx.clone(),
    )));
    handles.push(tokio::spawn(tasks::auto_persist_loop(
        config.clone(),
        cache.clone(),
        store.clone(),
        shutdown_rx.clone(),
    )));
    handles.push(tokio::spawn(tasks::setpoint_history_loop(
        store.clone(),
        shutdown_rx.clone(),
    )));
    handles.push(tokio::spawn(tasks::control_loop(
        engine,
        config.clone(),
        shutdown_rx,
    )));

    info!("all tasks running; Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    let join_all = async {
        for handle in handles {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, join_all).await.is_err() {
        warn!("tasks did not stop within {}s; exiting anyway", SHUTDOWN_TIMEOUT.as_secs());
    }

    store.flush().context("flushing store")?;
    info!("canopyd stopped");
    Ok(())
}
