//! TOML config file loading, validation, and seeding of zones, sensors and
//! schedules into the irrigation service.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use time::Weekday;

use crate::irrigation::{IrrigationService, NewSchedule, NewSensor, NewZone, MIN_SESSION_MINUTES};
use crate::valve::is_valid_gpio_pin;
use crate::zone::{
    parse_hh_mm, BudgetPeriod, CriticalRange, IrrigationSystem, ScheduleTiming, SensorThresholds,
    SensorType, SoilProfile, SoilType, SystemConstraints, SystemEfficiency, SystemType,
    ZoneLocation, ZoneStatus,
};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub hub: HubSettings,
    #[serde(default)]
    pub zones: Vec<ZoneEntry>,
    #[serde(default)]
    pub sensors: Vec<SensorEntry>,
    #[serde(default)]
    pub schedules: Vec<ScheduleEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    /// Scheduler tick cadence.
    pub poll_interval_sec: u64,
    /// Farm-local offset used for schedule matching.
    pub utc_offset_hours: i8,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            poll_interval_sec: 60,
            utc_offset_hours: 0,
        }
    }
}

fn default_status() -> ZoneStatus {
    ZoneStatus::Active
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ZoneEntry {
    pub zone_id: String,
    pub name: String,
    pub field: String,
    pub area_acres: f64,
    #[serde(default = "default_status")]
    pub status: ZoneStatus,
    pub valve_gpio_pin: i64,
    pub crop_id: Option<String>,

    pub soil_type: SoilType,
    pub field_capacity: f64,
    pub wilting_point: f64,
    pub infiltration_rate: f64,

    pub system_type: SystemType,
    /// inches per hour
    pub application_rate: f64,
    pub application_efficiency: f64,
    pub distribution_uniformity: f64,
    pub water_use_efficiency: f64,
    /// minutes
    pub max_session_duration: u32,
    pub water_cost_per_inch: f64,

    pub budget_period: BudgetPeriod,
    /// inches
    pub budget_allocated: f64,
}

#[derive(Debug, Deserialize)]
pub struct SensorEntry {
    pub sensor_id: String,
    pub zone_id: String,
    pub sensor_type: SensorType,
    pub unit: String,
    pub minimum: f64,
    pub maximum: f64,
    pub critical_min: f64,
    pub critical_max: f64,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleEntry {
    pub schedule_id: String,
    pub zone_id: String,
    pub name: String,
    /// "HH:MM", farm-local
    pub start_time: String,
    #[serde(default)]
    pub days: Vec<Weekday>,
    pub duration: Option<u32>,
    pub water_amount: Option<f64>,
    #[serde(default = "default_true")]
    pub active: bool,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_hub(&mut errors);
        self.validate_zones(&mut errors);
        self.validate_sensors(&mut errors);
        self.validate_schedules(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_hub(&self, errors: &mut Vec<String>) {
        if self.hub.poll_interval_sec == 0 {
            errors.push("hub: poll_interval_sec must be positive".to_string());
        }
        if !(-12..=14).contains(&self.hub.utc_offset_hours) {
            errors.push(format!(
                "hub: utc_offset_hours {} out of range [-12, 14]",
                self.hub.utc_offset_hours
            ));
        }
    }

    fn validate_zones(&self, errors: &mut Vec<String>) {
        let mut seen_ids: HashSet<&str> = HashSet::new();
        let mut seen_pins: HashSet<i64> = HashSet::new();

        for (i, z) in self.zones.iter().enumerate() {
            let ctx = || {
                if z.zone_id.is_empty() {
                    format!("zones[{i}]")
                } else {
                    format!("zone '{}'", z.zone_id)
                }
            };

            // ── Identity ────────────────────────────────────────
            if z.zone_id.trim().is_empty() {
                errors.push(format!("{}: zone_id is empty", ctx()));
            } else if !seen_ids.insert(z.zone_id.as_str()) {
                errors.push(format!("{}: duplicate zone_id", ctx()));
            }
            if z.name.trim().is_empty() {
                errors.push(format!("{}: name is empty", ctx()));
            }
            if z.area_acres <= 0.0 {
                errors.push(format!(
                    "{}: area_acres must be positive, got {}",
                    ctx(),
                    z.area_acres
                ));
            }

            // ── Soil ────────────────────────────────────────────
            let fractions = [
                ("field_capacity", z.field_capacity),
                ("wilting_point", z.wilting_point),
            ];
            for (label, v) in fractions {
                if !(0.0..=1.0).contains(&v) {
                    errors.push(format!("{}: {label} {v} out of range [0.0, 1.0]", ctx()));
                }
            }
            if z.wilting_point >= z.field_capacity {
                errors.push(format!(
                    "{}: wilting_point ({}) must be below field_capacity ({})",
                    ctx(),
                    z.wilting_point,
                    z.field_capacity
                ));
            }
            if z.infiltration_rate < 0.0 {
                errors.push(format!("{}: infiltration_rate is negative", ctx()));
            }

            // ── Irrigation system ───────────────────────────────
            if z.application_rate <= 0.0 {
                errors.push(format!(
                    "{}: application_rate must be positive, got {}",
                    ctx(),
                    z.application_rate
                ));
            }
            for (label, v) in [
                ("application_efficiency", z.application_efficiency),
                ("distribution_uniformity", z.distribution_uniformity),
            ] {
                if !(v > 0.0 && v <= 100.0) {
                    errors.push(format!("{}: {label} {v} out of range (0, 100]", ctx()));
                }
            }
            if z.max_session_duration < MIN_SESSION_MINUTES {
                errors.push(format!(
                    "{}: max_session_duration ({}) must be at least {MIN_SESSION_MINUTES} minutes",
                    ctx(),
                    z.max_session_duration
                ));
            }
            if z.water_cost_per_inch < 0.0 {
                errors.push(format!("{}: water_cost_per_inch is negative", ctx()));
            }
            if z.budget_allocated < 0.0 {
                errors.push(format!("{}: budget_allocated is negative", ctx()));
            }

            // ── GPIO pin whitelist ──────────────────────────────
            if !is_valid_gpio_pin(z.valve_gpio_pin) {
                errors.push(format!(
                    "{}: valve_gpio_pin {} is not a valid BCM GPIO pin (allowed: 2-27)",
                    ctx(),
                    z.valve_gpio_pin
                ));
            } else if !seen_pins.insert(z.valve_gpio_pin) {
                errors.push(format!(
                    "{}: valve_gpio_pin {} is already used by another zone",
                    ctx(),
                    z.valve_gpio_pin
                ));
            }
        }
    }

    fn zone_ids(&self) -> HashSet<&str> {
        self.zones.iter().map(|z| z.zone_id.as_str()).collect()
    }

    fn validate_sensors(&self, errors: &mut Vec<String>) {
        let zone_ids = self.zone_ids();
        let mut seen_ids: HashSet<(&str, &str)> = HashSet::new();

        for (i, s) in self.sensors.iter().enumerate() {
            let ctx = || {
                if s.sensor_id.is_empty() {
                    format!("sensors[{i}]")
                } else {
                    format!("sensor '{}'", s.sensor_id)
                }
            };

            if s.sensor_id.trim().is_empty() {
                errors.push(format!("{}: sensor_id is empty", ctx()));
            } else if !seen_ids.insert((s.zone_id.as_str(), s.sensor_id.as_str())) {
                errors.push(format!("{}: duplicate sensor_id in zone '{}'", ctx(), s.zone_id));
            }

            if s.zone_id.trim().is_empty() {
                errors.push(format!("{}: zone_id is empty", ctx()));
            } else if !zone_ids.contains(s.zone_id.as_str()) {
                errors.push(format!(
                    "{}: zone_id '{}' does not match any defined zone",
                    ctx(),
                    s.zone_id
                ));
            }

            // ── Threshold ordering ──────────────────────────────
            let ordered = s.critical_min <= s.minimum
                && s.minimum <= s.maximum
                && s.maximum <= s.critical_max;
            if !ordered {
                errors.push(format!(
                    "{}: thresholds must satisfy \
                     critical_min <= minimum <= maximum <= critical_max \
                     (got {} / {} / {} / {})",
                    ctx(),
                    s.critical_min,
                    s.minimum,
                    s.maximum,
                    s.critical_max
                ));
            }
        }
    }

    fn validate_schedules(&self, errors: &mut Vec<String>) {
        let zone_ids = self.zone_ids();
        let mut seen_ids: HashSet<(&str, &str)> = HashSet::new();

        for (i, s) in self.schedules.iter().enumerate() {
            let ctx = || {
                if s.schedule_id.is_empty() {
                    format!("schedules[{i}]")
                } else {
                    format!("schedule '{}'", s.schedule_id)
                }
            };

            if s.schedule_id.trim().is_empty() {
                errors.push(format!("{}: schedule_id is empty", ctx()));
            } else if !seen_ids.insert((s.zone_id.as_str(), s.schedule_id.as_str())) {
                errors.push(format!("{}: duplicate schedule_id in zone '{}'", ctx(), s.zone_id));
            }
            if s.name.trim().is_empty() {
                errors.push(format!("{}: name is empty", ctx()));
            }
            if !zone_ids.contains(s.zone_id.as_str()) {
                errors.push(format!(
                    "{}: zone_id '{}' does not match any defined zone",
                    ctx(),
                    s.zone_id
                ));
            }
            if parse_hh_mm(&s.start_time).is_none() {
                errors.push(format!(
                    "{}: start_time '{}' is not a valid HH:MM time",
                    ctx(),
                    s.start_time
                ));
            }
            if s.duration == Some(0) {
                errors.push(format!("{}: duration must be positive", ctx()));
            }
            if matches!(s.water_amount, Some(w) if w <= 0.0) {
                errors.push(format!("{}: water_amount must be positive", ctx()));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load + apply
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    parse(&contents).with_context(|| format!("invalid config: {path}"))
}

/// Parse and validate config text.
pub fn parse(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents).context("failed to parse config")?;
    config.validate()?;
    Ok(config)
}

/// Create every configured zone, sensor and schedule in the service.
pub async fn apply(config: &Config, irrigation: &IrrigationService) -> Result<()> {
    for z in &config.zones {
        let pin = u8::try_from(z.valve_gpio_pin)
            .with_context(|| format!("zone '{}': bad valve_gpio_pin", z.zone_id))?;
        irrigation
            .create_zone(NewZone {
                id: Some(z.zone_id.clone()),
                name: z.name.clone(),
                location: ZoneLocation {
                    field: z.field.clone(),
                    latitude: None,
                    longitude: None,
                },
                area_acres: z.area_acres,
                crop_id: z.crop_id.clone(),
                status: z.status,
                soil: SoilProfile {
                    soil_type: z.soil_type,
                    field_capacity: z.field_capacity,
                    wilting_point: z.wilting_point,
                    infiltration_rate: z.infiltration_rate,
                },
                valve_gpio_pin: pin,
                irrigation_system: IrrigationSystem {
                    system_type: z.system_type,
                    efficiency: SystemEfficiency {
                        application_rate: z.application_rate,
                        application_efficiency: z.application_efficiency,
                        distribution_uniformity: z.distribution_uniformity,
                        water_use_efficiency: z.water_use_efficiency,
                    },
                    constraints: SystemConstraints {
                        max_session_duration: z.max_session_duration,
                    },
                    water_cost_per_inch: z.water_cost_per_inch,
                },
                budget_period: z.budget_period,
                budget_allocated: z.budget_allocated,
            })
            .await
            .with_context(|| format!("failed to create zone '{}'", z.zone_id))?;
    }

    for s in &config.sensors {
        irrigation
            .add_sensor(
                &s.zone_id,
                NewSensor {
                    id: Some(s.sensor_id.clone()),
                    sensor_type: s.sensor_type,
                    unit: s.unit.clone(),
                    thresholds: SensorThresholds {
                        minimum: s.minimum,
                        maximum: s.maximum,
                        critical: CriticalRange {
                            min: s.critical_min,
                            max: s.critical_max,
                        },
                    },
                },
            )
            .await
            .with_context(|| format!("failed to add sensor '{}'", s.sensor_id))?;
    }

    for s in &config.schedules {
        irrigation
            .create_schedule(
                &s.zone_id,
                NewSchedule {
                    id: Some(s.schedule_id.clone()),
                    name: s.name.clone(),
                    active: s.active,
                    timing: ScheduleTiming {
                        start_time: s.start_time.clone(),
                        days: s.days.clone(),
                    },
                    duration: s.duration,
                    water_amount: s.water_amount,
                },
            )
            .await
            .with_context(|| format!("failed to create schedule '{}'", s.schedule_id))?;
    }

    tracing::info!(
        zones = config.zones.len(),
        sensors = config.sensors.len(),
        schedules = config.schedules.len(),
        "config applied"
    );

    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irrigation::tests::test_service;

    // -- Helper: build a valid baseline config that passes validation ------

    fn valid_zone() -> ZoneEntry {
        ZoneEntry {
            zone_id: "z1".into(),
            name: "Zone 1".into(),
            field: "North".into(),
            area_acres: 2.5,
            status: ZoneStatus::Active,
            valve_gpio_pin: 17,
            crop_id: None,
            soil_type: SoilType::Loam,
            field_capacity: 0.32,
            wilting_point: 0.12,
            infiltration_rate: 0.5,
            system_type: SystemType::Drip,
            application_rate: 0.5,
            application_efficiency: 90.0,
            distribution_uniformity: 85.0,
            water_use_efficiency: 4.2,
            max_session_duration: 90,
            water_cost_per_inch: 12.0,
            budget_period: BudgetPeriod::Weekly,
            budget_allocated: 2.0,
        }
    }

    fn valid_sensor() -> SensorEntry {
        SensorEntry {
            sensor_id: "m1".into(),
            zone_id: "z1".into(),
            sensor_type: SensorType::SoilMoisture,
            unit: "%".into(),
            minimum: 25.0,
            maximum: 45.0,
            critical_min: 15.0,
            critical_max: 60.0,
        }
    }

    fn valid_schedule() -> ScheduleEntry {
        ScheduleEntry {
            schedule_id: "morning".into(),
            zone_id: "z1".into(),
            name: "Morning".into(),
            start_time: "06:00".into(),
            days: vec![],
            duration: Some(20),
            water_amount: None,
            active: true,
        }
    }

    fn valid_config() -> Config {
        Config {
            hub: HubSettings::default(),
            zones: vec![valid_zone()],
            sensors: vec![valid_sensor()],
            schedules: vec![valid_schedule()],
        }
    }

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    const MINIMAL: &str = r#"
[hub]
utc_offset_hours = -5

[[zones]]
zone_id = "z1"
name = "Zone 1"
field = "North"
area_acres = 2.5
valve_gpio_pin = 17
soil_type = "loam"
field_capacity = 0.32
wilting_point = 0.12
infiltration_rate = 0.5
system_type = "drip"
application_rate = 0.5
application_efficiency = 90.0
distribution_uniformity = 85.0
water_use_efficiency = 4.2
max_session_duration = 90
water_cost_per_inch = 12.0
budget_period = "weekly"
budget_allocated = 2.0

[[sensors]]
sensor_id = "m1"
zone_id = "z1"
sensor_type = "soil_moisture"
unit = "%"
minimum = 25.0
maximum = 45.0
critical_min = 15.0
critical_max = 60.0

[[schedules]]
schedule_id = "morning"
zone_id = "z1"
name = "Morning"
start_time = "06:00"
days = ["Monday", "Thursday"]
duration = 20
"#;

    #[test]
    fn parse_minimal_config() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.hub.poll_interval_sec, 60);
        assert_eq!(config.hub.utc_offset_hours, -5);
        assert_eq!(config.zones.len(), 1);
        assert_eq!(config.zones[0].status, ZoneStatus::Active);
        assert_eq!(config.sensors[0].sensor_type, SensorType::SoilMoisture);
        assert_eq!(config.schedules[0].days, vec![Weekday::Monday, Weekday::Thursday]);
        assert!(config.schedules[0].active);
    }

    #[test]
    fn shipped_sample_config_is_valid() {
        let config = parse(include_str!("../config.toml")).unwrap();
        assert_eq!(config.zones.len(), 2);
        assert_eq!(config.sensors.len(), 3);
        assert_eq!(config.schedules[0].days.len(), 3);
    }

    #[test]
    fn parse_empty_config() {
        let config = parse("").unwrap();
        assert!(config.zones.is_empty());
        assert!(config.sensors.is_empty());
        assert!(config.schedules.is_empty());
    }

    #[test]
    fn parse_rejects_unknown_enum_value() {
        let bad = MINIMAL.replace("system_type = \"drip\"", "system_type = \"bucket\"");
        assert!(parse(&bad).is_err());
    }

    // -- Validation: valid configs pass -----------------------------------

    #[test]
    fn valid_config_passes() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn empty_config_passes() {
        Config::default().validate().unwrap();
    }

    // -- Hub --------------------------------------------------------------

    #[test]
    fn hub_zero_poll_interval_rejected() {
        let mut cfg = valid_config();
        cfg.hub.poll_interval_sec = 0;
        assert_validation_err(&cfg, "poll_interval_sec");
    }

    #[test]
    fn hub_offset_out_of_range_rejected() {
        let mut cfg = valid_config();
        cfg.hub.utc_offset_hours = 15;
        assert_validation_err(&cfg, "utc_offset_hours");
    }

    // -- Zones ------------------------------------------------------------

    #[test]
    fn zone_duplicate_id_rejected() {
        let mut cfg = valid_config();
        let mut z2 = valid_zone();
        z2.valve_gpio_pin = 27;
        cfg.zones.push(z2);
        assert_validation_err(&cfg, "duplicate zone_id");
    }

    #[test]
    fn zone_wilting_above_capacity_rejected() {
        let mut cfg = valid_config();
        cfg.zones[0].wilting_point = 0.4;
        assert_validation_err(&cfg, "must be below field_capacity");
    }

    #[test]
    fn zone_zero_application_rate_rejected() {
        let mut cfg = valid_config();
        cfg.zones[0].application_rate = 0.0;
        assert_validation_err(&cfg, "application_rate must be positive");
    }

    #[test]
    fn zone_efficiency_over_100_rejected() {
        let mut cfg = valid_config();
        cfg.zones[0].distribution_uniformity = 120.0;
        assert_validation_err(&cfg, "distribution_uniformity 120 out of range");
    }

    #[test]
    fn zone_short_max_session_rejected() {
        let mut cfg = valid_config();
        cfg.zones[0].max_session_duration = 5;
        assert_validation_err(&cfg, "max_session_duration");
    }

    #[test]
    fn zone_gpio_pin_bounds() {
        for bad in [0, 1, 28, -3] {
            let mut cfg = valid_config();
            cfg.zones[0].valve_gpio_pin = bad;
            assert_validation_err(&cfg, "not a valid BCM GPIO pin");
        }
        for good in [2, 27] {
            let mut cfg = valid_config();
            cfg.zones[0].valve_gpio_pin = good;
            cfg.validate().unwrap();
        }
    }

    #[test]
    fn zone_duplicate_gpio_rejected() {
        let mut cfg = valid_config();
        let mut z2 = valid_zone();
        z2.zone_id = "z2".into();
        cfg.zones.push(z2);
        assert_validation_err(&cfg, "already used by another zone");
    }

    // -- Sensors ----------------------------------------------------------

    #[test]
    fn sensor_unknown_zone_rejected() {
        let mut cfg = valid_config();
        cfg.sensors[0].zone_id = "nope".into();
        assert_validation_err(&cfg, "does not match any defined zone");
    }

    #[test]
    fn sensor_duplicate_in_zone_rejected() {
        let mut cfg = valid_config();
        cfg.sensors.push(valid_sensor());
        assert_validation_err(&cfg, "duplicate sensor_id");
    }

    #[test]
    fn sensor_threshold_order_enforced() {
        let mut cfg = valid_config();
        cfg.sensors[0].critical_min = 30.0;
        assert_validation_err(&cfg, "critical_min <= minimum");

        let mut cfg = valid_config();
        cfg.sensors[0].maximum = 20.0;
        assert_validation_err(&cfg, "critical_min <= minimum");
    }

    // -- Schedules --------------------------------------------------------

    #[test]
    fn schedule_bad_time_rejected() {
        let mut cfg = valid_config();
        cfg.schedules[0].start_time = "6am".into();
        assert_validation_err(&cfg, "not a valid HH:MM time");
    }

    #[test]
    fn schedule_zero_duration_rejected() {
        let mut cfg = valid_config();
        cfg.schedules[0].duration = Some(0);
        assert_validation_err(&cfg, "duration must be positive");
    }

    #[test]
    fn multiple_errors_collected() {
        let mut cfg = valid_config();
        cfg.zones[0].zone_id = "".into();
        cfg.zones[0].name = "".into();
        cfg.zones[0].valve_gpio_pin = 0;
        cfg.schedules[0].start_time = "99:99".into();

        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        // Should report many errors, not bail after the first
        assert!(msg.contains("zone_id is empty"), "missing zone_id error in: {msg}");
        assert!(msg.contains("name is empty"), "missing name error in: {msg}");
        assert!(msg.contains("not a valid BCM GPIO pin"), "missing gpio error in: {msg}");
        assert!(msg.contains("HH:MM"), "missing time error in: {msg}");
    }

    // -- Seeding ----------------------------------------------------------

    #[tokio::test]
    async fn apply_seeds_irrigation_service() {
        let config = parse(MINIMAL).unwrap();
        let (svc, _clock) = test_service();
        apply(&config, &svc).await.unwrap();

        let zones = svc.get_all_zones().await;
        assert_eq!(zones.len(), 1);
        let z = &zones[0];
        assert_eq!(z.id, "z1");
        assert_eq!(z.irrigation_system.constraints.max_session_duration, 90);
        assert_eq!(z.sensors.len(), 1);
        assert_eq!(z.schedules[0].timing.days.len(), 2);
        assert_eq!(svc.active_schedules().await.len(), 1);
    }

    #[tokio::test]
    async fn apply_twice_fails_on_duplicate_zone() {
        let config = parse(MINIMAL).unwrap();
        let (svc, _clock) = test_service();
        apply(&config, &svc).await.unwrap();
        let err = apply(&config, &svc).await.unwrap_err();
        assert!(format!("{err:#}").contains("zone already exists: z1"));
    }
}
