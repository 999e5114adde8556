use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::alert::{FleetAlert, NotificationLogEntry};
use crate::models::courier::GeoPoint;
use crate::models::decision::DecisionLogEntry;
use crate::models::tenant::{GeoConfidence, NotificationChannelConfig, Tenant};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tenants", post(create_tenant))
        .route("/tenants/:tenant_id", get(get_tenant))
        .route("/tenants/:tenant_id/decisions", get(list_decisions))
        .route("/tenants/:tenant_id/alerts", get(list_alerts))
        .route("/tenants/:tenant_id/notifications", get(list_notifications))
}

#[derive(Deserialize)]
pub struct CreateTenantRequest {
    pub name: String,
    pub address: String,
    pub pickup: Option<GeoPoint>,
    pub notification_channel: Option<NotificationChannelConfig>,
}

async fn create_tenant(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateTenantRequest>,
) -> Result<Json<Tenant>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }
    if let Some(channel) = &payload.notification_channel {
        if channel.webhook_url.trim().is_empty() || channel.bearer_token.trim().is_empty() {
            return Err(AppError::BadRequest(
                "notification channel needs a webhook url and bearer token".to_string(),
            ));
        }
    }

    let mut tenant = Tenant::new(payload.name.trim(), payload.address);
    tenant.notification_channel = payload.notification_channel;

    match payload.pickup {
        Some(point) => {
            tenant.pickup = Some(point);
            tenant.pickup_confidence = Some(GeoConfidence::Exact);
        }
        None => {
            if let Some(geocoded) = state.geo.geocode(&tenant.address).await {
                tenant.pickup = Some(geocoded.point);
                tenant.pickup_confidence = Some(geocoded.confidence);
            }
        }
    }

    Ok(Json(state.store.insert_tenant(tenant)))
}

async fn get_tenant(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<Tenant>, AppError> {
    Ok(Json(state.store.tenant(tenant_id)?))
}

async fn list_decisions(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<Vec<DecisionLogEntry>>, AppError> {
    state.store.tenant(tenant_id)?;
    Ok(Json(state.store.decisions(tenant_id)))
}

async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<Vec<FleetAlert>>, AppError> {
    state.store.tenant(tenant_id)?;
    Ok(Json(state.store.fleet_alerts(tenant_id)))
}

async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<Vec<NotificationLogEntry>>, AppError> {
    state.store.tenant(tenant_id)?;
    Ok(Json(state.store.notifications(tenant_id)))
}
