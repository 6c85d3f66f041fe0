use anyhow::Result;
use std::{env, sync::Arc, time::Duration};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use farm_hub::clock::{SharedClock, SystemClock};
use farm_hub::crops::CropService;
use farm_hub::equipment::EquipmentService;
use farm_hub::finance::FinanceService;
use farm_hub::irrigation::IrrigationService;
use farm_hub::scheduler::Scheduler;
use farm_hub::state::SystemState;
use farm_hub::valve::ValveBoard;
use farm_hub::web::AppState;
use farm_hub::{config, mqtt, web};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    // Many common relay boards are active-low. If yours is active-high, set false.
    let active_low = env::var("RELAY_ACTIVE_LOW")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(true);

    // ── Config file ─────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;
    if cfg.zones.is_empty() {
        warn!(path = %config_path, "no zones configured");
    }

    // ── Services ────────────────────────────────────────────────────
    let clock: SharedClock = Arc::new(SystemClock::from_hours(cfg.hub.utc_offset_hours));
    let shared = SystemState::shared();

    let mut valves = ValveBoard::new(active_low)?;
    valves.all_off();

    let irrigation = IrrigationService::new(valves, clock.clone(), shared.clone());
    config::apply(&cfg, &irrigation).await?;

    let crops = Arc::new(CropService::new());
    let app = AppState {
        irrigation: irrigation.clone(),
        finance: Arc::new(FinanceService::new()),
        crops: crops.clone(),
        equipment: Arc::new(EquipmentService::new()),
        shared: shared.clone(),
    };
    shared.write().await.record_system("hub started".to_string());

    // ── Web server ──────────────────────────────────────────────────
    let web_task = tokio::spawn(web::serve(app));

    // ── Scheduler ───────────────────────────────────────────────────
    let scheduler = Scheduler::new(irrigation.clone(), crops, clock, shared.clone())
        .spawn(Duration::from_secs(cfg.hub.poll_interval_sec));

    // ── MQTT ────────────────────────────────────────────────────────
    // An empty MQTT_HOST runs the hub without a broker.
    let mqtt_irrigation = irrigation.clone();
    let mqtt_shared = shared.clone();
    let mqtt_task = async move {
        if broker.is_empty() {
            info!("MQTT_HOST is empty; running without mqtt");
            std::future::pending::<Result<()>>().await
        } else {
            mqtt::run(mqtt_irrigation, mqtt_shared, broker, port).await
        }
    };

    let outcome = tokio::select! {
        res = mqtt_task => res,
        res = web_task => match res {
            Ok(res) => res,
            Err(e) => Err(e.into()),
        },
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            Ok(())
        }
    };

    scheduler.stop().await;
    irrigation.fail_safe_stop().await;
    if let Err(e) = &outcome {
        error!("hub stopped: {e:#}");
    }
    outcome
}
