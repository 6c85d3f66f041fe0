//! HTTP API over the farm services.

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post, put};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use time::Date;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::crops::{Crop, CropService, NewCrop, YieldEstimate};
use crate::efficiency::WaterEfficiency;
use crate::equipment::{
    Equipment, EquipmentService, EquipmentUpdate, MaintenanceDue, NewEquipment, NewMaintenance,
};
use crate::error::{FarmError, FarmResult};
use crate::finance::{
    BudgetSummary, CashFlowProjection, FinanceService, NewTransaction, ProfitabilityAnalysis,
    Transaction,
};
use crate::irrigation::{IrrigationService, NewZone, StartOptions};
use crate::state::{SharedState, StatusResponse};
use crate::zone::{AlertStatus, IrrigationAlert, IrrigationZone};

/// Handles shared by every route.
#[derive(Clone)]
pub struct AppState {
    pub irrigation: IrrigationService,
    pub finance: Arc<FinanceService>,
    pub crops: Arc<CropService>,
    pub equipment: Arc<EquipmentService>,
    pub shared: SharedState,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

impl IntoResponse for FarmError {
    fn into_response(self) -> Response {
        let status = match &self {
            FarmError::NotFound { .. } => StatusCode::NOT_FOUND,
            FarmError::Validation(_) => StatusCode::BAD_REQUEST,
            FarmError::Duplicate { .. }
            | FarmError::AlreadyIrrigating { .. }
            | FarmError::ZoneNotActive { .. }
            | FarmError::InvalidState(_) => StatusCode::CONFLICT,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn found<T>(item: Option<T>, entity: &'static str, id: &str) -> FarmResult<Json<T>> {
    item.map(Json).ok_or_else(|| FarmError::not_found(entity, id))
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        // irrigation
        .route("/api/zones", get(list_zones).post(create_zone))
        .route("/api/zones/{id}", get(get_zone).delete(delete_zone))
        .route("/api/zones/{id}/irrigation/start", post(start_irrigation))
        .route("/api/zones/{id}/irrigation/stop", post(stop_irrigation))
        .route("/api/zones/{id}/irrigation/cancel", post(cancel_irrigation))
        .route("/api/zones/{id}/efficiency", get(zone_efficiency))
        .route("/api/alerts", get(list_alerts))
        .route("/api/zones/{zone_id}/alerts/{alert_id}", put(set_alert_status))
        // finance
        .route("/api/finance/transactions", get(list_transactions).post(create_transaction))
        .route("/api/finance/profitability", get(profitability))
        .route("/api/finance/cash-flow", get(cash_flow))
        .route("/api/finance/budgets/{id}/summary", get(budget_summary))
        // crops
        .route("/api/crops", get(list_crops).post(create_crop))
        .route("/api/crops/{id}", get(get_crop))
        .route("/api/crops/{id}/plant", post(plant_crop))
        .route("/api/crops/{id}/advance", post(advance_crop))
        .route("/api/crops/{id}/yield", get(crop_yield))
        // equipment
        .route("/equipment/enhanced", get(list_equipment).post(create_equipment))
        .route(
            "/equipment/enhanced/{id}",
            get(get_equipment).put(update_equipment).delete(delete_equipment),
        )
        .route("/equipment/enhanced/{id}/maintenance", post(log_maintenance))
        .route("/equipment/maintenance-due", get(maintenance_due))
        .with_state(state)
}

async fn api_status(State(app): State<AppState>) -> Json<StatusResponse> {
    let irrigating = app.irrigation.irrigating_zones().await;
    let st = app.shared.read().await;
    Json(st.to_status(irrigating))
}

// -- Irrigation ---------------------------------------------------------------

async fn list_zones(State(app): State<AppState>) -> Json<Vec<IrrigationZone>> {
    Json(app.irrigation.get_all_zones().await)
}

async fn create_zone(
    State(app): State<AppState>,
    Json(new): Json<NewZone>,
) -> FarmResult<(StatusCode, Json<IrrigationZone>)> {
    let zone = app.irrigation.create_zone(new).await?;
    Ok((StatusCode::CREATED, Json(zone)))
}

async fn get_zone(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> FarmResult<Json<IrrigationZone>> {
    found(app.irrigation.get_zone(&id).await, "zone", &id)
}

async fn delete_zone(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> FarmResult<Json<IrrigationZone>> {
    Ok(Json(app.irrigation.delete_zone(&id).await?))
}

async fn start_irrigation(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(opts): Json<StartOptions>,
) -> FarmResult<Json<serde_json::Value>> {
    let event_id = app.irrigation.start_irrigation(&id, opts).await?;
    Ok(Json(json!({ "event_id": event_id })))
}

#[derive(Deserialize)]
struct StopQuery {
    event_id: Option<String>,
}

async fn stop_irrigation(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<StopQuery>,
) -> FarmResult<Json<serde_json::Value>> {
    let stopped = app
        .irrigation
        .stop_irrigation(&id, q.event_id.as_deref())
        .await?;
    Ok(Json(json!({ "stopped": stopped })))
}

async fn cancel_irrigation(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> FarmResult<Json<serde_json::Value>> {
    let cancelled = app.irrigation.cancel_irrigation(&id).await?;
    Ok(Json(json!({ "cancelled": cancelled })))
}

#[derive(Deserialize)]
struct EfficiencyQuery {
    days: Option<u32>,
}

async fn zone_efficiency(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<EfficiencyQuery>,
) -> FarmResult<Json<WaterEfficiency>> {
    let days = q.days.unwrap_or(30);
    Ok(Json(app.irrigation.calculate_water_efficiency(&id, days).await?))
}

#[derive(Deserialize)]
struct AlertsQuery {
    status: Option<AlertStatus>,
}

async fn list_alerts(
    State(app): State<AppState>,
    Query(q): Query<AlertsQuery>,
) -> Json<Vec<IrrigationAlert>> {
    Json(app.irrigation.alerts(q.status).await)
}

#[derive(Deserialize)]
struct AlertStatusBody {
    status: AlertStatus,
}

async fn set_alert_status(
    State(app): State<AppState>,
    Path((zone_id, alert_id)): Path<(String, String)>,
    Json(body): Json<AlertStatusBody>,
) -> FarmResult<Json<IrrigationAlert>> {
    let alert = app
        .irrigation
        .set_alert_status(&zone_id, &alert_id, body.status)
        .await?;
    Ok(Json(alert))
}

// -- Finance ------------------------------------------------------------------

async fn list_transactions(State(app): State<AppState>) -> Json<Vec<Transaction>> {
    Json(app.finance.all_transactions())
}

async fn create_transaction(
    State(app): State<AppState>,
    Json(new): Json<NewTransaction>,
) -> FarmResult<(StatusCode, Json<Transaction>)> {
    Ok((StatusCode::CREATED, Json(app.finance.create_transaction(new)?)))
}

#[derive(Deserialize)]
struct PeriodQuery {
    start: Date,
    end: Date,
}

async fn profitability(
    State(app): State<AppState>,
    Query(q): Query<PeriodQuery>,
) -> FarmResult<Json<ProfitabilityAnalysis>> {
    if q.end < q.start {
        return Err(FarmError::validation("end is before start"));
    }
    Ok(Json(app.finance.calculate_profitability_analysis(q.start, q.end)))
}

#[derive(Deserialize)]
struct CashFlowQuery {
    months: Option<u32>,
}

async fn cash_flow(
    State(app): State<AppState>,
    Query(q): Query<CashFlowQuery>,
) -> FarmResult<Json<Vec<CashFlowProjection>>> {
    let today = app.irrigation.now().date();
    let months = q.months.unwrap_or(12);
    Ok(Json(app.finance.project_cash_flow(months, today)?))
}

async fn budget_summary(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> FarmResult<Json<BudgetSummary>> {
    Ok(Json(app.finance.budget_summary(&id)?))
}

// -- Crops --------------------------------------------------------------------

async fn list_crops(State(app): State<AppState>) -> Json<Vec<Crop>> {
    Json(app.crops.all_crops())
}

async fn create_crop(
    State(app): State<AppState>,
    Json(new): Json<NewCrop>,
) -> FarmResult<(StatusCode, Json<Crop>)> {
    Ok((StatusCode::CREATED, Json(app.crops.create_crop(new)?)))
}

async fn get_crop(State(app): State<AppState>, Path(id): Path<String>) -> FarmResult<Json<Crop>> {
    found(app.crops.get_crop(&id), "crop", &id)
}

#[derive(Deserialize)]
struct DateBody {
    date: Option<Date>,
}

async fn plant_crop(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DateBody>,
) -> FarmResult<Json<Crop>> {
    let date = body.date.unwrap_or_else(|| app.irrigation.now().date());
    Ok(Json(app.crops.plant_crop(&id, date)?))
}

async fn advance_crop(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DateBody>,
) -> FarmResult<Json<serde_json::Value>> {
    let date = body.date.unwrap_or_else(|| app.irrigation.now().date());
    let advanced = app.crops.advance_growth_stage(&id, date)?;
    Ok(Json(json!({ "advanced": advanced })))
}

async fn crop_yield(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> FarmResult<Json<YieldEstimate>> {
    Ok(Json(app.crops.estimate_yield(&id)?))
}

// -- Equipment ----------------------------------------------------------------

async fn list_equipment(State(app): State<AppState>) -> Json<Vec<Equipment>> {
    Json(app.equipment.all_equipment())
}

async fn create_equipment(
    State(app): State<AppState>,
    Json(new): Json<NewEquipment>,
) -> FarmResult<(StatusCode, Json<Equipment>)> {
    Ok((StatusCode::CREATED, Json(app.equipment.create_equipment(new)?)))
}

async fn get_equipment(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> FarmResult<Json<Equipment>> {
    found(app.equipment.get_equipment(&id), "equipment", &id)
}

async fn update_equipment(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<EquipmentUpdate>,
) -> FarmResult<Json<Equipment>> {
    Ok(Json(app.equipment.update_equipment(&id, update)?))
}

async fn delete_equipment(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> FarmResult<Json<Equipment>> {
    Ok(Json(app.equipment.delete_equipment(&id)?))
}

async fn log_maintenance(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(new): Json<NewMaintenance>,
) -> FarmResult<Json<Equipment>> {
    Ok(Json(app.equipment.log_maintenance(&id, new)?))
}

async fn maintenance_due(State(app): State<AppState>) -> Json<Vec<MaintenanceDue>> {
    Json(app.equipment.maintenance_due())
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState) -> Result<()> {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(state);

    #[cfg(feature = "tls")]
    if let (Ok(cert), Ok(key)) = (env::var("TLS_CERT_PATH"), env::var("TLS_KEY_PATH")) {
        let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(&cert, &key)
            .await
            .with_context(|| format!("failed to load TLS cert/key ({cert}, {key})"))?;
        info!("web api listening on https://{addr}");
        return axum_server::bind_rustls(addr, tls)
            .serve(app.into_make_service())
            .await
            .context("web server error");
    }

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;
    info!("web api listening on http://{addr}");

    axum::serve(listener, app).await.map_err(|e| {
        error!("web server error: {e}");
        anyhow::Error::from(e)
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irrigation::tests::service_with_zone;
    use crate::state::SystemState;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn app() -> Router {
        let (irrigation, _clock) = service_with_zone("z1").await;
        router(AppState {
            irrigation,
            finance: Arc::new(FinanceService::new()),
            crops: Arc::new(CropService::new()),
            equipment: Arc::new(EquipmentService::new()),
            shared: SystemState::shared(),
        })
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    // -- Status -------------------------------------------------------------

    #[tokio::test]
    async fn status_reports_idle_hub() {
        let app = app().await;
        let (status, body) = call(&app, Method::GET, "/api/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mqtt_connected"], false);
        assert_eq!(body["irrigating_zones"], Value::Array(vec![]));
    }

    // -- Zones & irrigation -------------------------------------------------

    #[tokio::test]
    async fn zone_listing_and_missing_zone() {
        let app = app().await;
        let (status, body) = call(&app, Method::GET, "/api/zones", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["id"], "z1");

        let (status, body) = call(&app, Method::GET, "/api/zones/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "zone not found: nope");
    }

    #[tokio::test]
    async fn start_stop_cycle_over_http() {
        let app = app().await;
        let start = "/api/zones/z1/irrigation/start";

        let (status, body) = call(&app, Method::POST, start, Some(json!({ "duration": 20 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["event_id"].is_string());

        let (status, body) = call(&app, Method::POST, start, Some(json!({}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("already being irrigated"));

        let (_, status_body) = call(&app, Method::GET, "/api/status", None).await;
        assert_eq!(status_body["irrigating_zones"][0], "z1");

        let stop = "/api/zones/z1/irrigation/stop";
        let (_, body) = call(&app, Method::POST, stop, None).await;
        assert_eq!(body["stopped"], true);
        let (_, body) = call(&app, Method::POST, stop, None).await;
        assert_eq!(body["stopped"], false);

        let (_, zone) = call(&app, Method::GET, "/api/zones/z1", None).await;
        assert_eq!(zone["history"].as_array().unwrap().len(), 1);
        assert_eq!(zone["history"][0]["status"], "completed");
    }

    #[tokio::test]
    async fn start_with_zero_duration_is_bad_request() {
        let app = app().await;
        let (status, _) = call(
            &app,
            Method::POST,
            "/api/zones/z1/irrigation/start",
            Some(json!({ "duration": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn efficiency_without_history_uses_static_values() {
        let app = app().await;
        let (status, body) = call(&app, Method::GET, "/api/zones/z1/efficiency?days=7", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["event_count"], 0);
        assert_eq!(body["total_water_used"], 0.0);
        assert_eq!(body["application_efficiency"], 90.0);
    }

    #[tokio::test]
    async fn efficiency_accepts_largest_window() {
        let app = app().await;
        let (status, body) =
            call(&app, Method::GET, "/api/zones/z1/efficiency?days=4294967295", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["days"], 4_294_967_295u64);
    }

    #[tokio::test]
    async fn delete_zone_returns_removed_zone() {
        let app = app().await;
        let (status, body) = call(&app, Method::DELETE, "/api/zones/z1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "z1");
        let (status, _) = call(&app, Method::DELETE, "/api/zones/z1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // -- Finance ------------------------------------------------------------

    #[tokio::test]
    async fn profitability_rejects_inverted_period() {
        let app = app().await;
        let (status, _) = call(
            &app,
            Method::GET,
            "/api/finance/profitability?start=2024-06-01&end=2024-01-01",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &app,
            Method::GET,
            "/api/finance/profitability?start=2024-01-01&end=2024-06-01",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["gross_margin"], 0.0);
    }

    #[tokio::test]
    async fn cash_flow_defaults_to_twelve_months() {
        let app = app().await;
        let (status, body) = call(&app, Method::GET, "/api/finance/cash-flow", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 12);
    }

    #[tokio::test]
    async fn cash_flow_beyond_horizon_is_bad_request() {
        let app = app().await;
        let uri = "/api/finance/cash-flow?months=4294967295";
        let (status, body) = call(&app, Method::GET, uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("at most 120"));
    }

    // -- Crops --------------------------------------------------------------

    #[tokio::test]
    async fn crop_create_and_plant() {
        let app = app().await;
        let (status, crop) = call(
            &app,
            Method::POST,
            "/api/crops",
            Some(json!({
                "id": "c1",
                "name": "Sweet corn",
                "crop_type": "corn",
                "area_acres": 2.0,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(crop["status"], "planned");

        let (status, crop) = call(
            &app,
            Method::POST,
            "/api/crops/c1/plant",
            Some(json!({ "date": "2024-05-01" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(crop["status"], "planted");

        let (status, _) = call(&app, Method::POST, "/api/crops/c1/plant", Some(json!({}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    // -- Equipment ----------------------------------------------------------

    #[tokio::test]
    async fn equipment_enhanced_crud() {
        let app = app().await;
        let (status, created) = call(
            &app,
            Method::POST,
            "/equipment/enhanced",
            Some(json!({
                "id": "t1",
                "name": "Main tractor",
                "equipment_type": "tractor",
                "make": "Deere",
                "model": "5075E",
                "engine_hours": 120.0,
                "service_interval_hours": 250.0
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "operational");

        let (_, list) = call(&app, Method::GET, "/equipment/enhanced", None).await;
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (status, updated) = call(
            &app,
            Method::PUT,
            "/equipment/enhanced/t1",
            Some(json!({ "engine_hours": 400.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["engine_hours"], 400.0);

        let (_, due) = call(&app, Method::GET, "/equipment/maintenance-due", None).await;
        assert_eq!(due[0]["equipment_id"], "t1");

        let (status, _) = call(&app, Method::DELETE, "/equipment/enhanced/t1", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, Method::GET, "/equipment/enhanced/t1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
