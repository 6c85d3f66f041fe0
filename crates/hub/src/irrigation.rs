//! Zone registry and irrigation event lifecycle.
//!
//! Each zone sits behind its own mutex together with its live (running)
//! event, so the "at most one running event per zone" check and the insert
//! of the new event happen under the same lock. Starting a session also arms
//! an automatic stop; a manual stop disarms it, and stopping twice is a
//! no-op.
//!
//! ```text
//! planned ──▶ running ──[stop / timer / zone deleted]──▶ completed
//!                    └──[cancel]───────────────────────▶ cancelled
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::efficiency::{self, WaterEfficiency};
use crate::error::{FarmError, FarmResult};
use crate::state::SharedState;
use crate::thresholds::check_sensor_thresholds;
use crate::valve::{is_valid_gpio_pin, ValveBoard};
use crate::zone::{
    AlertPriority, AlertStatus, AlertType, BudgetPeriod, EventResult, EventStatus, IoTSensor,
    IrrigationAlert, IrrigationEvent, IrrigationSchedule, IrrigationSystem, IrrigationTrigger,
    IrrigationZone, PlannedIrrigation, ScheduleTiming, SensorReading, SensorStatus,
    SensorThresholds, SensorType, SoilProfile, WaterBudget, ZoneLocation, ZoneStatus,
};

/// Shortest session the service will plan, in minutes.
pub const MIN_SESSION_MINUTES: u32 = 10;

/// Water applied when neither a duration nor an amount is requested, inches.
pub const DEFAULT_TARGET_WATER_IN: f64 = 1.0;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct NewZone {
    pub id: Option<String>,
    pub name: String,
    pub location: ZoneLocation,
    pub area_acres: f64,
    pub crop_id: Option<String>,
    pub status: ZoneStatus,
    pub soil: SoilProfile,
    pub valve_gpio_pin: u8,
    pub irrigation_system: IrrigationSystem,
    pub budget_period: BudgetPeriod,
    pub budget_allocated: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ZoneUpdate {
    pub name: Option<String>,
    pub status: Option<ZoneStatus>,
    pub area_acres: Option<f64>,
    pub crop_id: Option<String>,
    pub irrigation_system: Option<IrrigationSystem>,
    pub budget_allocated: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSensor {
    pub id: Option<String>,
    pub sensor_type: SensorType,
    pub unit: String,
    pub thresholds: SensorThresholds,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSchedule {
    pub id: Option<String>,
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    pub timing: ScheduleTiming,
    pub duration: Option<u32>,
    pub water_amount: Option<f64>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartOptions {
    /// minutes
    pub duration: Option<u32>,
    /// inches
    pub water_amount: Option<f64>,
    pub schedule_id: Option<String>,
    #[serde(default = "IrrigationTrigger::manual")]
    pub trigger: IrrigationTrigger,
}

impl StartOptions {
    pub fn manual() -> Self {
        Self {
            duration: None,
            water_amount: None,
            schedule_id: None,
            trigger: IrrigationTrigger::manual(),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

struct RunningEvent {
    event: IrrigationEvent,
    auto_stop: Option<AbortHandle>,
}

struct ZoneSlot {
    zone: IrrigationZone,
    running: Option<RunningEvent>,
    /// Set by `delete_zone`; holders of a stale slot handle see NotFound.
    removed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndReason {
    Manual,
    Timer,
    ZoneDeleted,
    /// Comms loss or shutdown forced the valves closed.
    FailSafe,
    Cancelled,
}

struct Ended {
    event: IrrigationEvent,
    budget_alert: Option<IrrigationAlert>,
}

struct Inner {
    zones: RwLock<HashMap<String, Arc<Mutex<ZoneSlot>>>>,
    valves: Mutex<ValveBoard>,
    clock: SharedClock,
    shared: SharedState,
}

/// Cheap-to-clone handle; construct once and pass to every caller.
#[derive(Clone)]
pub struct IrrigationService {
    inner: Arc<Inner>,
}

impl IrrigationService {
    pub fn new(valves: ValveBoard, clock: SharedClock, shared: SharedState) -> Self {
        Self {
            inner: Arc::new(Inner {
                zones: RwLock::new(HashMap::new()),
                valves: Mutex::new(valves),
                clock,
                shared,
            }),
        }
    }

    pub fn now(&self) -> OffsetDateTime {
        self.inner.clock.now()
    }

    async fn slot(&self, zone_id: &str) -> FarmResult<Arc<Mutex<ZoneSlot>>> {
        self.inner
            .zones
            .read()
            .await
            .get(zone_id)
            .cloned()
            .ok_or_else(|| FarmError::not_found("zone", zone_id))
    }

    /// Run `f` with the zone locked.
    async fn with_zone<R>(
        &self,
        zone_id: &str,
        f: impl FnOnce(&mut ZoneSlot) -> FarmResult<R>,
    ) -> FarmResult<R> {
        let slot = self.slot(zone_id).await?;
        let mut guard = slot.lock().await;
        if guard.removed {
            return Err(FarmError::not_found("zone", zone_id));
        }
        f(&mut guard)
    }

    async fn all_slots(&self) -> Vec<Arc<Mutex<ZoneSlot>>> {
        self.inner.zones.read().await.values().cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Zone CRUD
    // -----------------------------------------------------------------------

    pub async fn create_zone(&self, new: NewZone) -> FarmResult<IrrigationZone> {
        if new.name.trim().is_empty() {
            return Err(FarmError::validation("zone name is empty"));
        }
        if new.area_acres < 0.0 {
            return Err(FarmError::validation("area_acres must not be negative"));
        }
        validate_system(&new.irrigation_system)?;
        let pin = new.valve_gpio_pin;
        if !is_valid_gpio_pin(i64::from(pin)) {
            return Err(FarmError::validation(format!(
                "valve_gpio_pin {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
            )));
        }

        let now = self.now();
        let id = new
            .id
            .clone()
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        let mut zones = self.inner.zones.write().await;
        if zones.contains_key(&id) {
            return Err(FarmError::duplicate("zone", id));
        }
        for slot in zones.values() {
            let other = slot.lock().await;
            if !other.removed && other.zone.valve_gpio_pin == pin {
                return Err(FarmError::validation(format!(
                    "valve_gpio_pin {pin} is already used by zone '{}'",
                    other.zone.id
                )));
            }
        }

        let zone = IrrigationZone {
            id: id.clone(),
            name: new.name,
            location: new.location,
            area_acres: new.area_acres,
            crop_id: new.crop_id,
            status: new.status,
            soil: new.soil,
            valve_gpio_pin: new.valve_gpio_pin,
            irrigation_system: new.irrigation_system,
            sensors: Vec::new(),
            schedules: Vec::new(),
            history: Vec::new(),
            water_budget: WaterBudget::new(new.budget_period, new.budget_allocated),
            alerts: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        self.inner
            .valves
            .lock()
            .await
            .register(&id, pin)
            .map_err(|e| FarmError::validation(format!("valve gpio {pin}: {e}")))?;

        zones.insert(
            id.clone(),
            Arc::new(Mutex::new(ZoneSlot {
                zone: zone.clone(),
                running: None,
                removed: false,
            })),
        );
        drop(zones);

        info!(zone = %id, name = %zone.name, "zone created");
        Ok(zone)
    }

    pub async fn get_zone(&self, zone_id: &str) -> Option<IrrigationZone> {
        self.with_zone(zone_id, |slot| Ok(slot.zone.clone())).await.ok()
    }

    /// Snapshot of every zone, ordered by id.
    pub async fn get_all_zones(&self) -> Vec<IrrigationZone> {
        let mut out = Vec::new();
        for slot in self.all_slots().await {
            let guard = slot.lock().await;
            if !guard.removed {
                out.push(guard.zone.clone());
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub async fn update_zone(
        &self,
        zone_id: &str,
        update: ZoneUpdate,
    ) -> FarmResult<IrrigationZone> {
        if let Some(system) = &update.irrigation_system {
            validate_system(system)?;
        }
        let now = self.now();
        self.with_zone(zone_id, |slot| {
            let z = &mut slot.zone;
            if let Some(name) = update.name {
                if name.trim().is_empty() {
                    return Err(FarmError::validation("zone name is empty"));
                }
                z.name = name;
            }
            if let Some(status) = update.status {
                z.status = status;
            }
            if let Some(area) = update.area_acres {
                z.area_acres = area;
            }
            if let Some(crop_id) = update.crop_id {
                z.crop_id = Some(crop_id);
            }
            if let Some(system) = update.irrigation_system {
                z.irrigation_system = system;
            }
            if let Some(allocated) = update.budget_allocated {
                z.water_budget.allocated = allocated;
                z.water_budget.remaining = (allocated - z.water_budget.used).max(0.0);
            }
            z.updated_at = now;
            Ok(z.clone())
        })
        .await
    }

    /// Remove a zone. A running event is stopped first, so the returned
    /// record's history includes it as `completed`.
    pub async fn delete_zone(&self, zone_id: &str) -> FarmResult<IrrigationZone> {
        let slot = self.slot(zone_id).await?;
        let mut guard = slot.lock().await;
        if guard.removed {
            return Err(FarmError::not_found("zone", zone_id));
        }

        let ended = self.end_running(&mut guard, None, EndReason::ZoneDeleted).await;
        guard.removed = true;
        self.inner.valves.lock().await.unregister(zone_id);
        let zone = guard.zone.clone();
        drop(guard);

        self.inner.zones.write().await.remove(zone_id);

        if let Some(ended) = ended {
            info!(
                zone = %zone_id,
                event = %ended.event.id,
                "running irrigation stopped by zone delete"
            );
        }
        info!(zone = %zone_id, "zone deleted");
        self.inner
            .shared
            .write()
            .await
            .record_system(format!("{zone_id}: zone deleted"));
        Ok(zone)
    }

    // -----------------------------------------------------------------------
    // Sensors
    // -----------------------------------------------------------------------

    pub async fn add_sensor(&self, zone_id: &str, new: NewSensor) -> FarmResult<IoTSensor> {
        validate_thresholds(&new.thresholds)?;
        let now = self.now();
        self.with_zone(zone_id, |slot| {
            let id = new.id.unwrap_or_else(|| Uuid::now_v7().to_string());
            if slot.zone.sensor(&id).is_some() {
                return Err(FarmError::duplicate("sensor", id));
            }
            let sensor = IoTSensor {
                id,
                sensor_type: new.sensor_type,
                unit: new.unit,
                thresholds: new.thresholds,
                status: SensorStatus::Offline,
                last_reading: None,
            };
            slot.zone.sensors.push(sensor.clone());
            slot.zone.updated_at = now;
            Ok(sensor)
        })
        .await
    }

    pub async fn remove_sensor(&self, zone_id: &str, sensor_id: &str) -> FarmResult<()> {
        self.with_zone(zone_id, |slot| {
            let before = slot.zone.sensors.len();
            slot.zone.sensors.retain(|s| s.id != sensor_id);
            if slot.zone.sensors.len() == before {
                return Err(FarmError::not_found("sensor", sensor_id));
            }
            Ok(())
        })
        .await
    }

    /// Store a reading and raise at most one threshold alert for it.
    pub async fn record_sensor_reading(
        &self,
        zone_id: &str,
        sensor_id: &str,
        value: f64,
    ) -> FarmResult<Option<IrrigationAlert>> {
        let now = self.now();
        let alert = self
            .with_zone(zone_id, |slot| {
                let breach = {
                    let sensor = slot
                        .zone
                        .sensors
                        .iter_mut()
                        .find(|s| s.id == sensor_id)
                        .ok_or_else(|| FarmError::not_found("sensor", sensor_id))?;
                    sensor.last_reading = Some(SensorReading { value, ts: now });
                    sensor.status = SensorStatus::Online;
                    check_sensor_thresholds(sensor, value)
                };

                Ok(breach.map(|b| {
                    let alert = IrrigationAlert {
                        id: Uuid::now_v7().to_string(),
                        zone_id: zone_id.to_string(),
                        alert_type: AlertType::SensorThreshold,
                        priority: b.priority,
                        message: b.message,
                        sensor_id: Some(sensor_id.to_string()),
                        value: Some(value),
                        created_at: now,
                        status: AlertStatus::Active,
                    };
                    slot.zone.alerts.push(alert.clone());
                    alert
                }))
            })
            .await?;

        if let Some(a) = &alert {
            warn!(zone = %zone_id, sensor = %sensor_id, priority = ?a.priority, "{}", a.message);
            self.inner
                .shared
                .write()
                .await
                .record_alert(format!("{zone_id}: {}", a.message));
        }
        Ok(alert)
    }

    // -----------------------------------------------------------------------
    // Schedules
    // -----------------------------------------------------------------------

    pub async fn create_schedule(
        &self,
        zone_id: &str,
        new: NewSchedule,
    ) -> FarmResult<IrrigationSchedule> {
        if new.timing.start_hm().is_none() {
            return Err(FarmError::validation(format!(
                "start_time '{}' is not HH:MM",
                new.timing.start_time
            )));
        }
        if new.duration == Some(0) {
            return Err(FarmError::validation("schedule duration must be positive"));
        }
        let now = self.now();
        self.with_zone(zone_id, |slot| {
            let id = new.id.unwrap_or_else(|| Uuid::now_v7().to_string());
            if slot.zone.schedule(&id).is_some() {
                return Err(FarmError::duplicate("schedule", id));
            }
            let schedule = IrrigationSchedule {
                id,
                name: new.name,
                active: new.active,
                timing: new.timing,
                duration: new.duration,
                water_amount: new.water_amount,
            };
            slot.zone.schedules.push(schedule.clone());
            slot.zone.updated_at = now;
            Ok(schedule)
        })
        .await
    }

    pub async fn set_schedule_active(
        &self,
        zone_id: &str,
        schedule_id: &str,
        active: bool,
    ) -> FarmResult<IrrigationSchedule> {
        self.with_zone(zone_id, |slot| {
            let s = slot
                .zone
                .schedules
                .iter_mut()
                .find(|s| s.id == schedule_id)
                .ok_or_else(|| FarmError::not_found("schedule", schedule_id))?;
            s.active = active;
            Ok(s.clone())
        })
        .await
    }

    pub async fn delete_schedule(&self, zone_id: &str, schedule_id: &str) -> FarmResult<()> {
        self.with_zone(zone_id, |slot| {
            let before = slot.zone.schedules.len();
            slot.zone.schedules.retain(|s| s.id != schedule_id);
            if slot.zone.schedules.len() == before {
                return Err(FarmError::not_found("schedule", schedule_id));
            }
            Ok(())
        })
        .await
    }

    /// Every active schedule across all zones, paired with its zone id.
    pub async fn active_schedules(&self) -> Vec<(String, IrrigationSchedule)> {
        let mut out = Vec::new();
        for slot in self.all_slots().await {
            let guard = slot.lock().await;
            if guard.removed {
                continue;
            }
            for s in guard.zone.schedules.iter().filter(|s| s.active) {
                out.push((guard.zone.id.clone(), s.clone()));
            }
        }
        out.sort_by(|a, b| (&a.0, &a.1.id).cmp(&(&b.0, &b.1.id)));
        out
    }

    // -----------------------------------------------------------------------
    // Irrigation lifecycle
    // -----------------------------------------------------------------------

    /// Start a session and return its event id.
    pub async fn start_irrigation(&self, zone_id: &str, opts: StartOptions) -> FarmResult<String> {
        let slot = self.slot(zone_id).await?;
        let mut guard = slot.lock().await;
        if guard.removed {
            return Err(FarmError::not_found("zone", zone_id));
        }
        if guard.zone.status != ZoneStatus::Active {
            return Err(FarmError::ZoneNotActive {
                zone_id: zone_id.to_string(),
                status: guard.zone.status,
            });
        }
        if guard.running.is_some() {
            return Err(FarmError::AlreadyIrrigating {
                zone_id: zone_id.to_string(),
            });
        }
        if let Some(sid) = &opts.schedule_id {
            if guard.zone.schedule(sid).is_none() {
                return Err(FarmError::not_found("schedule", sid.as_str()));
            }
        }

        let planned = plan_session(
            &guard.zone.irrigation_system,
            opts.duration,
            opts.water_amount,
        )?;
        let now = self.now();
        let mut event = IrrigationEvent {
            id: Uuid::now_v7().to_string(),
            zone_id: zone_id.to_string(),
            schedule_id: opts.schedule_id,
            status: EventStatus::Planned,
            trigger: opts.trigger,
            start_time: now,
            planned_end: now + time::Duration::minutes(i64::from(planned.duration)),
            end_time: None,
            planned,
            result: None,
        };

        self.inner.valves.lock().await.set(zone_id, true);
        event.status = EventStatus::Running;

        let auto_stop = self.arm_auto_stop(zone_id, &event.id, event.planned.duration);
        let event_id = event.id.clone();
        let detail = format!(
            "{zone_id}: irrigation started ({}, {} min, {:.2} in)",
            event.trigger.kind, event.planned.duration, event.planned.water_amount
        );
        info!(
            zone = %zone_id,
            event = %event_id,
            trigger = %event.trigger.kind,
            duration_min = event.planned.duration,
            water_in = %format!("{:.2}", event.planned.water_amount),
            "irrigation started"
        );
        guard.running = Some(RunningEvent {
            event,
            auto_stop: Some(auto_stop),
        });
        drop(guard);

        self.inner.shared.write().await.record_irrigation(detail);
        Ok(event_id)
    }

    /// Complete the running event (a specific one if `event_id` is given).
    /// Returns `Ok(false)` when nothing matched, e.g. the event already
    /// ended.
    pub async fn stop_irrigation(&self, zone_id: &str, event_id: Option<&str>) -> FarmResult<bool> {
        self.finish(zone_id, event_id, EndReason::Manual).await
    }

    /// End the running event as `cancelled`: no result, no budget usage.
    pub async fn cancel_irrigation(&self, zone_id: &str) -> FarmResult<bool> {
        self.finish(zone_id, None, EndReason::Cancelled).await
    }

    pub async fn running_event(&self, zone_id: &str) -> FarmResult<Option<IrrigationEvent>> {
        self.with_zone(zone_id, |slot| {
            Ok(slot.running.as_ref().map(|r| r.event.clone()))
        })
        .await
    }

    /// The live event tracker: every in-flight event.
    pub async fn running_events(&self) -> Vec<IrrigationEvent> {
        let mut out = Vec::new();
        for slot in self.all_slots().await {
            let guard = slot.lock().await;
            if let Some(r) = &guard.running {
                out.push(r.event.clone());
            }
        }
        out.sort_by(|a, b| a.zone_id.cmp(&b.zone_id));
        out
    }

    pub async fn irrigating_zones(&self) -> Vec<String> {
        self.running_events()
            .await
            .into_iter()
            .map(|e| e.zone_id)
            .collect()
    }

    fn arm_auto_stop(&self, zone_id: &str, event_id: &str, minutes: u32) -> AbortHandle {
        let svc = self.clone();
        let zone_id = zone_id.to_string();
        let event_id = event_id.to_string();
        let task = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(u64::from(minutes) * 60)).await;
            match svc.finish(&zone_id, Some(event_id.as_str()), EndReason::Timer).await {
                Ok(true) => debug!(zone = %zone_id, event = %event_id, "auto stop fired"),
                Ok(false) => {
                    debug!(zone = %zone_id, event = %event_id, "auto stop: event already ended")
                }
                Err(e) => debug!(zone = %zone_id, event = %event_id, "auto stop skipped: {e}"),
            }
        });
        task.abort_handle()
    }

    async fn finish(
        &self,
        zone_id: &str,
        event_id: Option<&str>,
        reason: EndReason,
    ) -> FarmResult<bool> {
        let slot = self.slot(zone_id).await?;
        let mut guard = slot.lock().await;
        if guard.removed {
            return Err(FarmError::not_found("zone", zone_id));
        }
        let Some(ended) = self.end_running(&mut guard, event_id, reason).await else {
            return Ok(false);
        };
        drop(guard);

        self.record_ended(&ended, reason).await;
        Ok(true)
    }

    async fn record_ended(&self, ended: &Ended, reason: EndReason) {
        let e = &ended.event;
        let zone_id = &e.zone_id;
        let water = e.result.as_ref().map(|r| r.actual_water).unwrap_or(0.0);
        info!(
            zone = %zone_id,
            event = %e.id,
            status = ?e.status,
            reason = ?reason,
            water_in = %format!("{water:.2}"),
            "irrigation ended"
        );

        let mut st = self.inner.shared.write().await;
        st.record_irrigation(format!(
            "{zone_id}: irrigation {:?} ({reason:?}, {water:.2} in)",
            e.status
        ));
        if let Some(alert) = &ended.budget_alert {
            warn!(zone = %zone_id, "{}", alert.message);
            st.record_alert(format!("{zone_id}: {}", alert.message));
        }
    }

    /// Move the running event (if it matches) into history. Caller holds the
    /// zone lock.
    async fn end_running(
        &self,
        slot: &mut ZoneSlot,
        event_id: Option<&str>,
        reason: EndReason,
    ) -> Option<Ended> {
        let matches = match (&slot.running, event_id) {
            (Some(r), Some(id)) => r.event.id == id,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !matches {
            return None;
        }
        let mut running = slot.running.take()?;

        // The timer task must not abort itself mid-stop.
        if reason != EndReason::Timer {
            if let Some(handle) = running.auto_stop.take() {
                handle.abort();
            }
        }

        let zone = &mut slot.zone;
        self.inner.valves.lock().await.set(&zone.id, false);

        let now = self.now();
        let mut event = running.event;
        event.end_time = Some(now);

        let mut budget_alert = None;
        if reason == EndReason::Cancelled {
            event.status = EventStatus::Cancelled;
        } else {
            event.status = EventStatus::Completed;
            let result = simulate_result(&zone.irrigation_system, event.start_time, now);
            zone.water_budget.record_usage(result.actual_water);
            event.result = Some(result);

            let already_flagged = zone.alerts.iter().any(|a| {
                a.alert_type == AlertType::BudgetExceeded
                    && matches!(a.status, AlertStatus::Active | AlertStatus::Acknowledged)
            });
            if zone.water_budget.is_exceeded() && !already_flagged {
                let alert = IrrigationAlert {
                    id: Uuid::now_v7().to_string(),
                    zone_id: zone.id.clone(),
                    alert_type: AlertType::BudgetExceeded,
                    priority: AlertPriority::High,
                    message: format!(
                        "water budget exceeded: used {:.2} in of {:.2} in allocated",
                        zone.water_budget.used, zone.water_budget.allocated
                    ),
                    sensor_id: None,
                    value: Some(zone.water_budget.used),
                    created_at: now,
                    status: AlertStatus::Active,
                };
                zone.alerts.push(alert.clone());
                budget_alert = Some(alert);
            }
        }

        zone.history.push(event.clone());
        zone.updated_at = now;
        Some(Ended {
            event,
            budget_alert,
        })
    }

    // -----------------------------------------------------------------------
    // Alerts
    // -----------------------------------------------------------------------

    /// Alerts across all zones, newest first, optionally filtered by status.
    pub async fn alerts(&self, status: Option<AlertStatus>) -> Vec<IrrigationAlert> {
        let mut out = Vec::new();
        for slot in self.all_slots().await {
            let guard = slot.lock().await;
            if guard.removed {
                continue;
            }
            out.extend(
                guard
                    .zone
                    .alerts
                    .iter()
                    .filter(|a| status.map_or(true, |s| a.status == s))
                    .cloned(),
            );
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        out
    }

    pub async fn set_alert_status(
        &self,
        zone_id: &str,
        alert_id: &str,
        status: AlertStatus,
    ) -> FarmResult<IrrigationAlert> {
        self.with_zone(zone_id, |slot| {
            let alert = slot
                .zone
                .alerts
                .iter_mut()
                .find(|a| a.id == alert_id)
                .ok_or_else(|| FarmError::not_found("alert", alert_id))?;
            if !alert.status.can_transition_to(status) {
                return Err(FarmError::invalid_state(format!(
                    "alert {alert_id} cannot move from {:?} to {status:?}",
                    alert.status
                )));
            }
            alert.status = status;
            Ok(alert.clone())
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Analytics
    // -----------------------------------------------------------------------

    pub async fn calculate_water_efficiency(
        &self,
        zone_id: &str,
        days: u32,
    ) -> FarmResult<WaterEfficiency> {
        let now = self.now();
        self.with_zone(zone_id, |slot| {
            Ok(efficiency::calculate_water_efficiency(&slot.zone, days, now))
        })
        .await
    }

    /// Fail-safe for comms loss and shutdown: complete every running
    /// session at the current time, disarm its timer and force every valve
    /// off. Returns how many sessions were ended.
    pub async fn fail_safe_stop(&self) -> usize {
        let mut ended = Vec::new();
        for slot in self.all_slots().await {
            let mut guard = slot.lock().await;
            if guard.removed {
                continue;
            }
            if let Some(e) = self.end_running(&mut guard, None, EndReason::FailSafe).await {
                ended.push(e);
            }
        }
        self.inner.valves.lock().await.all_off();

        for e in &ended {
            self.record_ended(e, EndReason::FailSafe).await;
        }
        if !ended.is_empty() {
            warn!(sessions = ended.len(), "fail-safe ended running irrigation");
        }
        ended.len()
    }

    #[cfg(test)]
    pub(crate) async fn valve_is_on(&self, zone_id: &str) -> bool {
        self.inner.valves.lock().await.is_on(zone_id)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn validate_system(system: &IrrigationSystem) -> FarmResult<()> {
    if system.efficiency.application_rate <= 0.0 {
        return Err(FarmError::validation("application_rate must be positive"));
    }
    if system.constraints.max_session_duration < MIN_SESSION_MINUTES {
        return Err(FarmError::validation(format!(
            "max_session_duration must be at least {MIN_SESSION_MINUTES} minutes"
        )));
    }
    Ok(())
}

fn validate_thresholds(t: &SensorThresholds) -> FarmResult<()> {
    if t.critical.min <= t.minimum && t.minimum <= t.maximum && t.maximum <= t.critical.max {
        Ok(())
    } else {
        Err(FarmError::validation(format!(
            "thresholds must satisfy critical.min <= minimum <= maximum <= critical.max \
             (got {} / {} / {} / {})",
            t.critical.min, t.minimum, t.maximum, t.critical.max
        )))
    }
}

/// Work out session length and water for a start request.
///
/// An explicit duration wins and is capped at the system maximum. Otherwise
/// the duration is derived from the target water amount and the application
/// rate, then clamped to `[MIN_SESSION_MINUTES, max_session_duration]`.
pub fn plan_session(
    system: &IrrigationSystem,
    duration: Option<u32>,
    water_amount: Option<f64>,
) -> FarmResult<PlannedIrrigation> {
    let rate = system.efficiency.application_rate;
    if rate <= 0.0 {
        return Err(FarmError::validation("application_rate must be positive"));
    }
    let max = system.constraints.max_session_duration;

    let duration = match duration {
        Some(0) => return Err(FarmError::validation("duration must be positive")),
        Some(d) => d.min(max),
        None => {
            let target = match water_amount {
                Some(w) if w <= 0.0 => {
                    return Err(FarmError::validation("water_amount must be positive"))
                }
                Some(w) => w,
                None => DEFAULT_TARGET_WATER_IN,
            };
            let minutes = (target / rate * 60.0).round() as u32;
            minutes.max(MIN_SESSION_MINUTES).min(max)
        }
    };

    Ok(PlannedIrrigation {
        duration,
        water_amount: rate * f64::from(duration) / 60.0,
    })
}

/// Derive the outcome of a finished session from elapsed wall-clock time.
fn simulate_result(
    system: &IrrigationSystem,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> EventResult {
    let minutes = ((end - start).as_seconds_f64() / 60.0).max(0.0);
    let actual_water = system.efficiency.application_rate * minutes / 60.0;
    EventResult {
        actual_duration: minutes,
        actual_water,
        distribution_uniformity: system.efficiency.distribution_uniformity,
        efficiency: system.efficiency.application_efficiency,
        cost: actual_water * system.water_cost_per_inch,
    }
}

// ===========================================================================
// Tests
// ===========================================================================
