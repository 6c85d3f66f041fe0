//! Sensor threshold checking.
//!
//! The critical band is checked first and short-circuits the broader
//! operating band, so one reading never yields more than one breach.

use crate::zone::{AlertPriority, IoTSensor};

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdBreach {
    pub priority: AlertPriority,
    pub message: String,
}

/// Compare a reading against the sensor's thresholds. Bounds are inclusive:
/// a reading equal to a bound is within it.
pub fn check_sensor_thresholds(sensor: &IoTSensor, value: f64) -> Option<ThresholdBreach> {
    let t = &sensor.thresholds;

    if value < t.critical.min || value > t.critical.max {
        Some(ThresholdBreach {
            priority: AlertPriority::Critical,
            message: format!(
                "CRITICAL: sensor {} reading {value:.2}{} outside critical range [{:.2}, {:.2}]",
                sensor.id, sensor.unit, t.critical.min, t.critical.max
            ),
        })
    } else if value < t.minimum || value > t.maximum {
        Some(ThresholdBreach {
            priority: AlertPriority::High,
            message: format!(
                "sensor {} reading {value:.2}{} outside operating range [{:.2}, {:.2}]",
                sensor.id, sensor.unit, t.minimum, t.maximum
            ),
        })
    } else {
        None
    }
}
