//! MQTT bridge between field nodes and the irrigation service.
//!
//! * `tele/<zone_id>/reading` carries `{ts, readings: [{sensor_id, value}]}`;
//!   each reading goes through `record_sensor_reading`.
//! * `valve/<zone_id>/set` carries `ON` / `OFF`, which start a manual
//!   session / stop the running one.

use std::time::Duration;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::irrigation::{IrrigationService, StartOptions};
use crate::state::SharedState;

// ---------------------------------------------------------------------------
// MQTT message types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct Reading {
    pub(crate) sensor_id: String,
    pub(crate) value: f64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReadingMsg {
    pub(crate) ts: i64,
    pub(crate) readings: Vec<Reading>,
}

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

fn topic_zone<'a>(topic: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    let mut parts = topic.split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(p), Some(zone), Some(s), None) if p == prefix && s == suffix && !zone.is_empty() => {
            Some(zone)
        }
        _ => None,
    }
}

/// Zone id from "tele/<zone_id>/reading".
pub(crate) fn reading_zone(topic: &str) -> Option<&str> {
    topic_zone(topic, "tele", "reading")
}

/// Zone id from "valve/<zone_id>/set".
pub(crate) fn valve_zone(topic: &str) -> Option<&str> {
    topic_zone(topic, "valve", "set")
}

/// Parse an "ON"/"OFF" payload into a bool (case-insensitive, trims whitespace).
pub(crate) fn parse_valve_command(payload: &[u8]) -> Result<bool, String> {
    let s = String::from_utf8_lossy(payload).trim().to_uppercase();
    match s.as_str() {
        "ON" => Ok(true),
        "OFF" => Ok(false),
        _ => Err(format!("unknown valve command '{s}'")),
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Route one incoming publish. Problems are logged and recorded, never
/// returned: a bad message must not stop the event loop.
pub async fn handle_publish(
    irrigation: &IrrigationService,
    shared: &SharedState,
    topic: &str,
    payload: &[u8],
) {
    if let Some(zone_id) = reading_zone(topic) {
        handle_readings(irrigation, shared, zone_id, payload).await;
    } else if let Some(zone_id) = valve_zone(topic) {
        handle_valve(irrigation, shared, zone_id, payload).await;
    } else {
        debug!(topic, "unhandled topic");
    }
}

async fn handle_readings(
    irrigation: &IrrigationService,
    shared: &SharedState,
    zone_id: &str,
    payload: &[u8],
) {
    let msg = match serde_json::from_slice::<ReadingMsg>(payload) {
        Ok(m) => m,
        Err(e) => {
            warn!(zone = %zone_id, "bad telemetry json: {e}");
            shared
                .write()
                .await
                .record_error(format!("bad telemetry json from {zone_id}: {e}"));
            return;
        }
    };
    debug!(zone = %zone_id, ts = msg.ts, count = msg.readings.len(), "telemetry");

    let mut accepted = Vec::with_capacity(msg.readings.len());
    for r in msg.readings {
        match irrigation
            .record_sensor_reading(zone_id, &r.sensor_id, r.value)
            .await
        {
            Ok(_) => accepted.push((r.sensor_id, r.value)),
            Err(e) => {
                warn!(zone = %zone_id, sensor = %r.sensor_id, "reading rejected: {e}");
                shared.write().await.record_error(format!("reading rejected: {e}"));
            }
        }
    }
    if !accepted.is_empty() {
        shared.write().await.record_reading(zone_id, &accepted);
    }
}

async fn handle_valve(
    irrigation: &IrrigationService,
    shared: &SharedState,
    zone_id: &str,
    payload: &[u8],
) {
    let on = match parse_valve_command(payload) {
        Ok(on) => on,
        Err(msg) => {
            warn!(zone = %zone_id, "{msg} (use ON/OFF)");
            shared.write().await.record_error(msg);
            return;
        }
    };

    let outcome = if on {
        irrigation
            .start_irrigation(zone_id, StartOptions::manual())
            .await
            .map(|event_id| debug!(zone = %zone_id, event = %event_id, "valve command: started"))
    } else {
        irrigation
            .stop_irrigation(zone_id, None)
            .await
            .map(|stopped| {
                if !stopped {
                    debug!(zone = %zone_id, "valve command: nothing running");
                }
            })
    };
    if let Err(e) = outcome {
        warn!(zone = %zone_id, on, "valve command refused: {e}");
        shared
            .write()
            .await
            .record_error(format!("valve command refused: {e}"));
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Connect, subscribe and pump the event loop forever, reconnecting on
/// errors. Valves are forced off whenever the broker connection drops.
pub async fn run(
    irrigation: IrrigationService,
    shared: SharedState,
    host: String,
    port: u16,
) -> Result<()> {
    let mut options = MqttOptions::new("farm-hub", host, port);
    options.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(options, 20);
    client.subscribe("tele/+/reading", QoS::AtLeastOnce).await?;
    client.subscribe("valve/+/set", QoS::AtLeastOnce).await?;
    info!("subscribed to tele/+/reading and valve/+/set");

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                handle_publish(&irrigation, &shared, &p.topic, &p.payload).await;
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                let mut st = shared.write().await;
                st.mqtt_connected = true;
                st.record_system("mqtt connected".to_string());
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
                irrigation.fail_safe_stop().await;
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_system("mqtt disconnected".to_string());
            }
            Ok(_) => {}
            Err(e) => {
                error!("mqtt error: {e}. reconnecting...");
                irrigation.fail_safe_stop().await;

                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_error(format!("mqtt error: {e}"));
                drop(st);

                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irrigation::tests::service_with_zone;
    use crate::irrigation::NewSensor;
    use crate::state::{ActivityKind, SystemState};
    use crate::zone::{CriticalRange, SensorThresholds, SensorType, TriggerKind};

    // -- Topics -------------------------------------------------------------

    #[test]
    fn reading_zone_valid_topic() {
        assert_eq!(reading_zone("tele/north-1/reading"), Some("north-1"));
    }

    #[test]
    fn reading_zone_rejects_other_shapes() {
        assert_eq!(reading_zone("foo/z1/reading"), None);
        assert_eq!(reading_zone("tele/z1/status"), None);
        assert_eq!(reading_zone("tele/reading"), None);
        assert_eq!(reading_zone("tele/z1/sub/reading"), None);
        assert_eq!(reading_zone("tele//reading"), None);
        assert_eq!(reading_zone(""), None);
    }

    #[test]
    fn valve_zone_valid_topic() {
        assert_eq!(valve_zone("valve/zone1/set"), Some("zone1"));
    }

    #[test]
    fn valve_zone_rejects_other_shapes() {
        assert_eq!(valve_zone("pump/zone1/set"), None);
        assert_eq!(valve_zone("valve/zone1/get"), None);
        assert_eq!(valve_zone("valve/set"), None);
    }

    // -- Payloads -----------------------------------------------------------

    #[test]
    fn parse_valve_command_variants() {
        assert_eq!(parse_valve_command(b"ON"), Ok(true));
        assert_eq!(parse_valve_command(b"off"), Ok(false));
        assert_eq!(parse_valve_command(b"  On \n"), Ok(true));
        assert!(parse_valve_command(b"open").is_err());
        assert!(parse_valve_command(b"").is_err());
    }

    #[test]
    fn reading_msg_deserialize() {
        let json = r#"{"ts":1700000000,"readings":[
            {"sensor_id":"m1","value":31.5},
            {"sensor_id":"t1","value":22}
        ]}"#;
        let msg: ReadingMsg = serde_json::from_str(json).unwrap();
        assert_eq!(msg.ts, 1_700_000_000);
        assert_eq!(msg.readings.len(), 2);
        assert_eq!(msg.readings[1].value, 22.0);
    }

    #[test]
    fn reading_msg_missing_field_fails() {
        assert!(serde_json::from_str::<ReadingMsg>(r#"{"ts":1}"#).is_err());
    }

    // -- Dispatch -----------------------------------------------------------

    async fn zone_with_sensor() -> (IrrigationService, SharedState) {
        let (svc, _clock) = service_with_zone("z1").await;
        svc.add_sensor(
            "z1",
            NewSensor {
                id: Some("m1".into()),
                sensor_type: SensorType::SoilMoisture,
                unit: "%".into(),
                thresholds: SensorThresholds {
                    minimum: 25.0,
                    maximum: 45.0,
                    critical: CriticalRange { min: 15.0, max: 60.0 },
                },
            },
        )
        .await
        .unwrap();
        (svc, SystemState::shared())
    }

    #[tokio::test]
    async fn telemetry_feeds_sensor_readings() {
        let (svc, shared) = zone_with_sensor().await;
        let payload = br#"{"ts":1,"readings":[
            {"sensor_id":"m1","value":10.0},
            {"sensor_id":"ghost","value":1.0}
        ]}"#;
        handle_publish(&svc, &shared, "tele/z1/reading", payload).await;

        let z = svc.get_zone("z1").await.unwrap();
        assert_eq!(z.sensor("m1").unwrap().last_reading.as_ref().unwrap().value, 10.0);
        assert_eq!(z.alerts.len(), 1);

        let st = shared.read().await;
        assert!(st
            .events
            .iter()
            .any(|e| e.kind == ActivityKind::Reading && e.detail == "z1: m1=10"));
        assert!(st.events.iter().any(|e| e.kind == ActivityKind::Error));
    }

    #[tokio::test]
    async fn bad_json_is_recorded() {
        let (svc, shared) = zone_with_sensor().await;
        handle_publish(&svc, &shared, "tele/z1/reading", b"not json").await;
        let st = shared.read().await;
        assert_eq!(st.events.back().unwrap().kind, ActivityKind::Error);
    }

    #[tokio::test]
    async fn valve_on_off_drives_irrigation() {
        let (svc, shared) = zone_with_sensor().await;
        handle_publish(&svc, &shared, "valve/z1/set", b"ON").await;
        let ev = svc.running_event("z1").await.unwrap().unwrap();
        assert_eq!(ev.trigger.kind, TriggerKind::Manual);

        // a second ON is refused, not fatal
        handle_publish(&svc, &shared, "valve/z1/set", b"ON").await;
        assert!(shared
            .read()
            .await
            .events
            .iter()
            .any(|e| e.detail.contains("already being irrigated")));

        handle_publish(&svc, &shared, "valve/z1/set", b"OFF").await;
        assert!(svc.running_event("z1").await.unwrap().is_none());
        // OFF with nothing running is a quiet no-op
        handle_publish(&svc, &shared, "valve/z1/set", b"OFF").await;
        assert_eq!(svc.get_zone("z1").await.unwrap().history.len(), 1);
    }
}
