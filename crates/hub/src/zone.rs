//! Irrigation data model: zones and everything a zone owns.
//!
//! A zone is the sole owner of its sensors, schedules, event history, water
//! budget and alerts. Nothing here is shared across zones.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, Weekday};

// ---------------------------------------------------------------------------
// Zone
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneStatus {
    Active,
    Inactive,
    Maintenance,
}

impl fmt::Display for ZoneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
            Self::Maintenance => write!(f, "maintenance"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneLocation {
    pub field: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoilType {
    Sand,
    SandyLoam,
    Loam,
    SiltLoam,
    ClayLoam,
    Clay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoilProfile {
    pub soil_type: SoilType,
    /// Volumetric water content at field capacity (0.0..=1.0).
    pub field_capacity: f64,
    /// Volumetric water content at the permanent wilting point (0.0..=1.0).
    pub wilting_point: f64,
    /// inches per hour
    pub infiltration_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrrigationZone {
    pub id: String,
    pub name: String,
    pub location: ZoneLocation,
    pub area_acres: f64,
    pub crop_id: Option<String>,
    pub status: ZoneStatus,
    pub soil: SoilProfile,
    pub valve_gpio_pin: u8,
    pub irrigation_system: IrrigationSystem,
    pub sensors: Vec<IoTSensor>,
    pub schedules: Vec<IrrigationSchedule>,
    pub history: Vec<IrrigationEvent>,
    pub water_budget: WaterBudget,
    pub alerts: Vec<IrrigationAlert>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl IrrigationZone {
    pub fn sensor(&self, sensor_id: &str) -> Option<&IoTSensor> {
        self.sensors.iter().find(|s| s.id == sensor_id)
    }

    pub fn schedule(&self, schedule_id: &str) -> Option<&IrrigationSchedule> {
        self.schedules.iter().find(|s| s.id == schedule_id)
    }
}

// ---------------------------------------------------------------------------
// Irrigation hardware description
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemType {
    Drip,
    Sprinkler,
    CenterPivot,
    MicroSprinkler,
    Flood,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEfficiency {
    /// inches per hour delivered while the valve is open
    pub application_rate: f64,
    /// percent of applied water that reaches the root zone
    pub application_efficiency: f64,
    /// percent
    pub distribution_uniformity: f64,
    pub water_use_efficiency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConstraints {
    /// minutes
    pub max_session_duration: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrrigationSystem {
    pub system_type: SystemType,
    pub efficiency: SystemEfficiency,
    pub constraints: SystemConstraints,
    pub water_cost_per_inch: f64,
}

// ---------------------------------------------------------------------------
// Sensors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    SoilMoisture,
    Temperature,
    Humidity,
    Flow,
    Pressure,
    Rainfall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorStatus {
    Online,
    Offline,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorThresholds {
    pub minimum: f64,
    pub maximum: f64,
    pub critical: CriticalRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub value: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoTSensor {
    pub id: String,
    pub sensor_type: SensorType,
    pub unit: String,
    pub thresholds: SensorThresholds,
    pub status: SensorStatus,
    pub last_reading: Option<SensorReading>,
}

// ---------------------------------------------------------------------------
// Schedules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleTiming {
    /// Local wall-clock start, "HH:MM".
    pub start_time: String,
    /// Empty means every day.
    #[serde(default)]
    pub days: Vec<Weekday>,
}

impl ScheduleTiming {
    /// Parse `start_time` into (hour, minute).
    pub fn start_hm(&self) -> Option<(u8, u8)> {
        parse_hh_mm(&self.start_time)
    }

    pub fn runs_on(&self, day: Weekday) -> bool {
        self.days.is_empty() || self.days.contains(&day)
    }

    /// Exact minute match against `now`. A tick that lands in a later minute
    /// does not match, so a delayed tick skips that day's run.
    pub fn matches(&self, now: OffsetDateTime) -> bool {
        match self.start_hm() {
            Some((h, m)) => {
                self.runs_on(now.weekday()) && now.hour() == h && now.minute() == m
            }
            None => false,
        }
    }
}

/// Parse "HH:MM" (24-hour clock).
pub fn parse_hh_mm(s: &str) -> Option<(u8, u8)> {
    let (h, m) = s.trim().split_once(':')?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return None;
    }
    let h: u8 = h.parse().ok()?;
    let m: u8 = m.parse().ok()?;
    (h < 24 && m < 60).then_some((h, m))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrrigationSchedule {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub timing: ScheduleTiming,
    /// minutes
    pub duration: Option<u32>,
    /// inches
    pub water_amount: Option<f64>,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Planned,
    Running,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Manual,
    Schedule,
    Sensor,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Schedule => write!(f, "schedule"),
            Self::Sensor => write!(f, "sensor"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrrigationTrigger {
    pub kind: TriggerKind,
    pub note: Option<String>,
}

impl IrrigationTrigger {
    pub fn manual() -> Self {
        Self {
            kind: TriggerKind::Manual,
            note: None,
        }
    }

    pub fn schedule(schedule_name: impl Into<String>) -> Self {
        Self {
            kind: TriggerKind::Schedule,
            note: Some(schedule_name.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedIrrigation {
    /// minutes
    pub duration: u32,
    /// inches
    pub water_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventResult {
    /// minutes
    pub actual_duration: f64,
    /// inches
    pub actual_water: f64,
    pub distribution_uniformity: f64,
    pub efficiency: f64,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrrigationEvent {
    pub id: String,
    pub zone_id: String,
    pub schedule_id: Option<String>,
    pub status: EventStatus,
    pub trigger: IrrigationTrigger,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub planned_end: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_time: Option<OffsetDateTime>,
    pub planned: PlannedIrrigation,
    pub result: Option<EventResult>,
}

// ---------------------------------------------------------------------------
// Water budget
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPeriod {
    Daily,
    Weekly,
    Monthly,
    Seasonal,
}

/// Running usage counter in inches. `used` is never rolled over when the
/// period ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterBudget {
    pub period: BudgetPeriod,
    pub allocated: f64,
    pub used: f64,
    pub remaining: f64,
}

impl WaterBudget {
    pub fn new(period: BudgetPeriod, allocated: f64) -> Self {
        Self {
            period,
            allocated,
            used: 0.0,
            remaining: allocated,
        }
    }

    pub fn record_usage(&mut self, inches: f64) {
        self.used += inches;
        self.remaining = (self.allocated - self.used).max(0.0);
    }

    pub fn is_exceeded(&self) -> bool {
        self.used > self.allocated
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    SensorThreshold,
    BudgetExceeded,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
    Dismissed,
}

impl AlertStatus {
    pub fn can_transition_to(self, next: AlertStatus) -> bool {
        use AlertStatus::*;
        matches!(
            (self, next),
            (Active, Acknowledged | Resolved | Dismissed) | (Acknowledged, Resolved | Dismissed)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrrigationAlert {
    pub id: String,
    pub zone_id: String,
    pub alert_type: AlertType,
    pub priority: AlertPriority,
    pub message: String,
    pub sensor_id: Option<String>,
    pub value: Option<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub status: AlertStatus,
}

// ===========================================================================
// Tests
// ===========================================================================
