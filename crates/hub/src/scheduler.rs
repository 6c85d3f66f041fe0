//! Polling scheduler: fires irrigation schedules and watches crop stages.
//!
//! Every tick compares the clock's wall-clock hour:minute with each active
//! schedule's `start_time` and starts a `schedule`-triggered session on an
//! exact match. Matching is by minute only: if a tick is delayed past the
//! scheduled minute, that day's run is skipped and nothing catches it up.
//!
//! The same tick reports crops whose current growth stage has outlived its
//! expected duration.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::clock::SharedClock;
use crate::crops::{CropService, OverdueStage};
use crate::irrigation::{IrrigationService, StartOptions};
use crate::state::SharedState;
use crate::zone::IrrigationTrigger;

/// Default tick cadence.
pub const TICK_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledStart {
    pub zone_id: String,
    pub schedule_id: String,
    pub event_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedStart {
    pub zone_id: String,
    pub schedule_id: String,
    pub reason: String,
}

/// What one tick did.
#[derive(Debug, Default, PartialEq)]
pub struct TickReport {
    pub started: Vec<ScheduledStart>,
    pub skipped: Vec<SkippedStart>,
    /// Crops newly found past their stage's expected end.
    pub overdue: Vec<OverdueStage>,
}

pub struct Scheduler {
    irrigation: IrrigationService,
    crops: Arc<CropService>,
    clock: SharedClock,
    shared: SharedState,
    /// "zone/schedule" -> minute (unix minutes) it last fired in.
    last_fired: HashMap<String, i64>,
    /// (crop, stage) pairs already reported as overdue.
    reported_overdue: HashSet<(String, String)>,
}

impl Scheduler {
    pub fn new(
        irrigation: IrrigationService,
        crops: Arc<CropService>,
        clock: SharedClock,
        shared: SharedState,
    ) -> Self {
        Self {
            irrigation,
            crops,
            clock,
            shared,
            last_fired: HashMap::new(),
            reported_overdue: HashSet::new(),
        }
    }

    /// One deterministic pass.
    pub async fn tick(&mut self) -> TickReport {
        let now = self.clock.now();
        let minute = now.unix_timestamp().div_euclid(60);
        self.last_fired.retain(|_, m| *m == minute);

        let mut report = TickReport::default();

        for (zone_id, schedule) in self.irrigation.active_schedules().await {
            if !schedule.timing.matches(now) {
                continue;
            }
            let key = format!("{zone_id}/{}", schedule.id);
            if self.last_fired.get(&key) == Some(&minute) {
                continue;
            }
            self.last_fired.insert(key, minute);

            let opts = StartOptions {
                duration: schedule.duration,
                water_amount: schedule.water_amount,
                schedule_id: Some(schedule.id.clone()),
                trigger: IrrigationTrigger::schedule(schedule.name.clone()),
            };
            match self.irrigation.start_irrigation(&zone_id, opts).await {
                Ok(event_id) => {
                    info!(
                        zone = %zone_id,
                        schedule = %schedule.id,
                        event = %event_id,
                        "scheduled irrigation started"
                    );
                    self.shared.write().await.record_scheduler(format!(
                        "{zone_id}: schedule '{}' started irrigation",
                        schedule.name
                    ));
                    report.started.push(ScheduledStart {
                        zone_id,
                        schedule_id: schedule.id,
                        event_id,
                    });
                }
                Err(e) => {
                    warn!(
                        zone = %zone_id,
                        schedule = %schedule.id,
                        "scheduled irrigation skipped: {e}"
                    );
                    self.shared.write().await.record_scheduler(format!(
                        "{zone_id}: schedule '{}' skipped ({e})",
                        schedule.name
                    ));
                    report.skipped.push(SkippedStart {
                        zone_id,
                        schedule_id: schedule.id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let overdue = self.crops.overdue_stages(now.date());
        let still_overdue: HashSet<(String, String)> = overdue
            .iter()
            .map(|o| (o.crop_id.clone(), o.stage.clone()))
            .collect();
        for o in overdue {
            let key = (o.crop_id.clone(), o.stage.clone());
            if self.reported_overdue.contains(&key) {
                continue;
            }
            warn!(
                crop = %o.crop_id,
                stage = %o.stage,
                days_overdue = o.days_overdue,
                "growth stage overdue"
            );
            self.shared.write().await.record_scheduler(format!(
                "crop {}: stage '{}' overdue by {} days",
                o.crop_name, o.stage, o.days_overdue
            ));
            self.reported_overdue.insert(key);
            report.overdue.push(o);
        }
        // Forget crops that moved on so a later stage can be reported.
        self.reported_overdue.retain(|k| still_overdue.contains(k));

        report
    }

    /// Run `tick` every `every` on a background task until the returned
    /// handle is stopped or dropped.
    pub fn spawn(mut self, every: Duration) -> SchedulerHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(tick_sec = every.as_secs(), "scheduler started");
            self.shared
                .write()
                .await
                .record_scheduler(format!("scheduler started (tick {}s)", every.as_secs()));

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                }
            }
            info!("scheduler stopped");
        });
        SchedulerHandle {
            stop: Some(stop_tx),
            task,
        }
    }
}

pub struct SchedulerHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the loop and wait for the in-flight tick to finish.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.task.await {
            warn!("scheduler task ended abnormally: {e}");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
