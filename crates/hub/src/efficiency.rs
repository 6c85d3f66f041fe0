//! Water-efficiency analytics over a zone's event history. No side effects.

use serde::Serialize;
use time::OffsetDateTime;

use crate::zone::{EventStatus, IrrigationZone};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaterEfficiency {
    pub zone_id: String,
    pub days: u32,
    pub event_count: usize,
    /// percent of planned water actually applied
    pub application_efficiency: f64,
    /// percent
    pub distribution_uniformity: f64,
    pub water_use_efficiency: f64,
    /// inches
    pub total_water_planned: f64,
    /// inches
    pub total_water_used: f64,
    pub total_cost: f64,
    pub average_cost_per_inch: f64,
}

fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Aggregate completed events that started at or after `now - days`. With no
/// such events, the static system figures are reported instead.
pub fn calculate_water_efficiency(
    zone: &IrrigationZone,
    days: u32,
    now: OffsetDateTime,
) -> WaterEfficiency {
    // A window reaching past the representable range covers the whole history.
    let since = now.checked_sub(time::Duration::days(i64::from(days)));
    let static_eff = &zone.irrigation_system.efficiency;

    let completed: Vec<_> = zone
        .history
        .iter()
        .filter(|e| {
            e.status == EventStatus::Completed && since.map_or(true, |since| e.start_time >= since)
        })
        .collect();

    if completed.is_empty() {
        return WaterEfficiency {
            zone_id: zone.id.clone(),
            days,
            event_count: 0,
            application_efficiency: static_eff.application_efficiency,
            distribution_uniformity: static_eff.distribution_uniformity,
            water_use_efficiency: static_eff.water_use_efficiency,
            total_water_planned: 0.0,
            total_water_used: 0.0,
            total_cost: 0.0,
            average_cost_per_inch: 0.0,
        };
    }

    let mut planned = 0.0;
    let mut actual = 0.0;
    let mut cost = 0.0;
    let mut du_sum = 0.0;
    for e in &completed {
        planned += e.planned.water_amount;
        if let Some(r) = &e.result {
            actual += r.actual_water;
            cost += r.cost;
            du_sum += r.distribution_uniformity;
        }
    }

    WaterEfficiency {
        zone_id: zone.id.clone(),
        days,
        event_count: completed.len(),
        application_efficiency: ratio(actual, planned) * 100.0,
        distribution_uniformity: ratio(du_sum, completed.len() as f64),
        water_use_efficiency: static_eff.water_use_efficiency,
        total_water_planned: planned,
        total_water_used: actual,
        total_cost: cost,
        average_cost_per_inch: ratio(cost, actual),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irrigation::tests::test_zone;
    use crate::zone::{EventResult, IrrigationEvent, IrrigationTrigger, PlannedIrrigation};
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-06-15 12:00 UTC);

    fn event(
        start: OffsetDateTime,
        status: EventStatus,
        planned: f64,
        actual: f64,
    ) -> IrrigationEvent {
        IrrigationEvent {
            id: format!("e-{start}"),
            zone_id: "z1".into(),
            schedule_id: None,
            status,
            trigger: IrrigationTrigger::manual(),
            start_time: start,
            planned_end: start + time::Duration::minutes(60),
            end_time: Some(start + time::Duration::minutes(60)),
            planned: PlannedIrrigation {
                duration: 60,
                water_amount: planned,
            },
            result: (status == EventStatus::Completed).then(|| EventResult {
                actual_duration: 60.0,
                actual_water: actual,
                distribution_uniformity: 80.0,
                efficiency: 85.0,
                cost: actual * 10.0,
            }),
        }
    }

    #[test]
    fn empty_history_falls_back_to_static_values() {
        let zone = test_zone("z1");
        let eff = calculate_water_efficiency(&zone, 30, NOW);
        assert_eq!(eff.event_count, 0);
        assert_eq!(eff.total_water_used, 0.0);
        assert_eq!(eff.average_cost_per_inch, 0.0);
        assert_eq!(
            eff.application_efficiency,
            zone.irrigation_system.efficiency.application_efficiency
        );
        assert_eq!(
            eff.distribution_uniformity,
            zone.irrigation_system.efficiency.distribution_uniformity
        );
        assert!(!eff.application_efficiency.is_nan());
    }

    #[test]
    fn aggregates_completed_events_in_window() {
        let mut zone = test_zone("z1");
        zone.history = vec![
            event(datetime!(2024-06-10 06:00 UTC), EventStatus::Completed, 1.0, 0.8),
            event(datetime!(2024-06-12 06:00 UTC), EventStatus::Completed, 1.0, 0.9),
            // cancelled and out-of-window events are ignored
            event(datetime!(2024-06-13 06:00 UTC), EventStatus::Cancelled, 1.0, 0.0),
            event(datetime!(2024-04-01 06:00 UTC), EventStatus::Completed, 5.0, 5.0),
        ];

        let eff = calculate_water_efficiency(&zone, 30, NOW);
        assert_eq!(eff.event_count, 2);
        assert!((eff.total_water_planned - 2.0).abs() < 1e-9);
        assert!((eff.total_water_used - 1.7).abs() < 1e-9);
        assert!((eff.application_efficiency - 85.0).abs() < 1e-9);
        assert!((eff.distribution_uniformity - 80.0).abs() < 1e-9);
        assert!((eff.average_cost_per_inch - 10.0).abs() < 1e-9);
    }

    #[test]
    fn huge_window_covers_whole_history() {
        let mut zone = test_zone("z1");
        zone.history = vec![
            event(datetime!(2024-06-10 06:00 UTC), EventStatus::Completed, 1.0, 0.8),
            event(datetime!(1990-01-01 06:00 UTC), EventStatus::Completed, 2.0, 2.0),
        ];
        let eff = calculate_water_efficiency(&zone, u32::MAX, NOW);
        assert_eq!(eff.days, u32::MAX);
        assert_eq!(eff.event_count, 2);
        assert!((eff.total_water_used - 2.8).abs() < 1e-9);
    }

    #[test]
    fn zero_actual_water_maps_to_zero_cost_per_inch() {
        let mut zone = test_zone("z1");
        zone.history = vec![event(
            datetime!(2024-06-14 06:00 UTC),
            EventStatus::Completed,
            0.0,
            0.0,
        )];
        let eff = calculate_water_efficiency(&zone, 7, NOW);
        assert_eq!(eff.event_count, 1);
        assert_eq!(eff.application_efficiency, 0.0);
        assert_eq!(eff.average_cost_per_inch, 0.0);
    }
}
