/**
 * API REST - Surface collaborateurs du kernel
 *
 * RÔLE :
 * Expose le registry et le service MQTT aux consommateurs humains/externes :
 * CRUD devices, contrôle relais, requêtes de connectivité et de staleness.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum, routes /health, /devices, /sweep, /mqtt
 * - Sérialisation JSON automatique des réponses
 * - Gestion erreurs HTTP standardisée (404, 409, 400, 502)
 *
 * SÉCURITÉ :
 * - Header x-api-key obligatoire sur toutes routes sauf /health
 * - Validation côté middleware avant traitement métier
 */

use crate::config::KernelConfig;
use crate::errors::KernelError;
use crate::models::{ConnectionInfo, ConnectionStatus, Device, DeviceStatus, RelayState, StatusChange};
use crate::mqtt::MqttService;
use crate::registry::SharedDeviceRegistry;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, error, warn};

#[derive(Clone)]
pub struct AppState {
    pub registry: SharedDeviceRegistry,
    pub mqtt: Arc<MqttService>,
    pub conf: KernelConfig,
}

#[derive(serde::Serialize)]
struct DeviceView {
    device: String,
    status: DeviceStatus,
    relay_state: RelayState,
    mqtt_topic: String,
    last_seen: Option<String>, // RFC3339 pour l'API
    last_heartbeat: Option<String>,
    stale: bool,
    stale_for_seconds: Option<i64>,
}

fn to_view(d: &Device, stale_threshold: time::Duration, now: OffsetDateTime) -> DeviceView {
    let age = d.last_seen.map(|t| (now - t).whole_seconds().max(0));
    let stale = match d.last_seen {
        Some(t) => now - t > stale_threshold,
        None => d.status == DeviceStatus::Connected,
    };
    DeviceView {
        device: d.device.clone(),
        status: d.status,
        relay_state: d.relay_state,
        mqtt_topic: d.mqtt_topic.clone(),
        last_seen: d.last_seen.map(|t| t.format(&Rfc3339).unwrap_or_default()),
        last_heartbeat: d
            .last_heartbeat
            .map(|t| t.format(&Rfc3339).unwrap_or_default()),
        stale,
        stale_for_seconds: age,
    }
}

async fn require_api_key(req: Request, next: Next) -> Result<Response, StatusCode> {
    let path = req.uri().path();

    // Health check toujours accessible
    if path.starts_with("/health") {
        return Ok(next.run(req).await);
    }

    let expected = std::env::var("RELAY_KERNEL_API_KEY").unwrap_or_default();
    if expected.is_empty() {
        error!("SECURITY: RELAY_KERNEL_API_KEY not set - API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/devices", get(get_devices).post(add_device))
        .route("/devices/stale", get(get_stale_devices))
        .route(
            "/devices/{id}",
            get(get_device).delete(remove_device),
        )
        .route("/devices/{id}/control", post(control_device))
        .route("/devices/{id}/connection", get(get_connection_info))
        .route("/sweep", post(trigger_sweep))
        .route("/mqtt/status", get(get_mqtt_status))
        .with_state(app_state)
        .layer(middleware::from_fn(require_api_key))
}

// GET /devices (liste)
async fn get_devices(State(app): State<AppState>) -> Json<Vec<DeviceView>> {
    let now = OffsetDateTime::now_utc();
    let threshold = app.conf.timeouts.stale_threshold();
    let list: Vec<DeviceView> = app
        .registry
        .list()
        .await
        .iter()
        .map(|d| to_view(d, threshold, now))
        .collect();
    Json(list)
}

// GET /devices/:id (détail)
async fn get_device(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeviceView>, StatusCode> {
    let Some(device) = app.registry.get(&id).await else {
        return Err(StatusCode::NOT_FOUND);
    };
    Ok(Json(to_view(
        &device,
        app.conf.timeouts.stale_threshold(),
        OffsetDateTime::now_utc(),
    )))
}

// POST /devices (ajout + abonnement topics si le bus est connecté)
async fn add_device(
    State(app): State<AppState>,
    Json(device): Json<Device>,
) -> Result<(StatusCode, Json<Device>), StatusCode> {
    let id = device.device.clone();
    match app.registry.add(device.clone()).await {
        Ok(()) => {}
        Err(KernelError::DeviceExists(_)) => return Err(StatusCode::CONFLICT),
        Err(_) => return Err(StatusCode::INTERNAL_SERVER_ERROR),
    }

    match app.mqtt.subscribe_device(&id).await {
        Ok(()) => {}
        Err(KernelError::NotConnected) => {
            debug!("[http] bus offline, {} will be subscribed on connect", id)
        }
        Err(e) => warn!("[http] failed to subscribe {}: {}", id, e),
    }

    Ok((StatusCode::CREATED, Json(device)))
}

// DELETE /devices/:id
async fn remove_device(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if !app.registry.exists(&id).await {
        return Err(StatusCode::NOT_FOUND);
    }

    if let Err(e) = app.mqtt.unsubscribe_device(&id).await {
        debug!("[http] unsubscribe {} skipped: {}", id, e);
    }
    app.registry.remove(&id).await;

    Ok(Json(serde_json::json!({ "status": "removed", "device": id })))
}

#[derive(Debug, Deserialize)]
struct ControlRequest {
    relay_state: RelayState,
}

// POST /devices/:id/control (commande relais via le bus)
async fn control_device(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ControlRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let Some(device) = app.registry.get(&id).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "ok": false, "msg": "device not found" })),
        );
    };
    if device.status == DeviceStatus::Disconnected {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "ok": false, "msg": "device is disconnected" })),
        );
    }

    match app.mqtt.publish_relay_control(&id, req.relay_state).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "ok": true,
                "device": id,
                "relay_state": req.relay_state,
            })),
        ),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({ "ok": false, "msg": e.to_string() })),
        ),
    }
}

// GET /devices/:id/connection (détail connectivité)
async fn get_connection_info(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConnectionInfo>, StatusCode> {
    match app
        .registry
        .connection_info(
            &id,
            app.conf.timeouts.heartbeat_timeout(),
            OffsetDateTime::now_utc(),
        )
        .await
    {
        Ok(info) => Ok(Json(info)),
        Err(KernelError::DeviceNotFound(_)) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

#[derive(Debug, Deserialize)]
struct StaleParams {
    threshold: Option<u64>,
}

// GET /devices/stale?threshold=60
async fn get_stale_devices(
    State(app): State<AppState>,
    Query(params): Query<StaleParams>,
) -> Json<Vec<DeviceView>> {
    let now = OffsetDateTime::now_utc();
    let threshold = params
        .threshold
        .map(|s| time::Duration::seconds(s as i64))
        .unwrap_or_else(|| app.conf.timeouts.stale_threshold());
    let list: Vec<DeviceView> = app
        .registry
        .stale_devices(threshold, now)
        .await
        .iter()
        .map(|d| to_view(d, threshold, now))
        .collect();
    Json(list)
}

// POST /sweep (déclenchement manuel du sweep de timeouts)
async fn trigger_sweep(State(app): State<AppState>) -> Json<Vec<StatusChange>> {
    let changes = app
        .registry
        .sweep_timeouts(
            app.conf.timeouts.heartbeat_timeout(),
            app.conf.timeouts.status_timeout(),
            OffsetDateTime::now_utc(),
        )
        .await;
    Json(changes)
}

// GET /mqtt/status (état de la session broker)
async fn get_mqtt_status(State(app): State<AppState>) -> Json<ConnectionStatus> {
    Json(app.mqtt.connection_status().await)
}
