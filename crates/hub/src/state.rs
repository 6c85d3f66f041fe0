use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// Maximum number of activity entries retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Ephemeral process status for the dashboard: connectivity plus a bounded
/// activity log. Domain records live in the services, not here.
pub struct SystemState {
    pub started_at: Instant,
    pub mqtt_connected: bool,
    pub events: VecDeque<ActivityEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: ActivityKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Reading,
    Irrigation,
    Alert,
    Scheduler,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub mqtt_connected: bool,
    pub irrigating_zones: Vec<String>,
    pub events: Vec<ActivityEntry>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            mqtt_connected: false,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn shared() -> SharedState {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Record a batch of sensor readings for a zone.
    pub fn record_reading(&mut self, zone_id: &str, readings: &[(String, f64)]) {
        let detail = format!(
            "{zone_id}: {}",
            readings
                .iter()
                .map(|(sensor_id, value)| format!("{sensor_id}={value}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        self.push(ActivityKind::Reading, detail);
    }

    pub fn record_irrigation(&mut self, detail: String) {
        self.push(ActivityKind::Irrigation, detail);
    }

    pub fn record_alert(&mut self, detail: String) {
        self.push(ActivityKind::Alert, detail);
    }

    pub fn record_scheduler(&mut self, detail: String) {
        self.push(ActivityKind::Scheduler, detail);
    }

    pub fn record_error(&mut self, detail: String) {
        self.push(ActivityKind::Error, detail);
    }

    pub fn record_system(&mut self, detail: String) {
        self.push(ActivityKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self, irrigating_zones: Vec<String>) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            mqtt_connected: self.mqtt_connected,
            irrigating_zones,
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push(&mut self, kind: ActivityKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(ActivityEntry {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

impl Default for SystemState {
    fn default() -> Self {
        Self::new()
    }
}
