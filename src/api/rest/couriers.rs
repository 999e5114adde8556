use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::fleet::{register_courier, update_courier_position};
use crate::engine::redistribution::{reactivate, redistribute, RedistributionReport};
use crate::error::AppError;
use crate::models::courier::{Courier, GeoPoint};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/tenants/:tenant_id/couriers",
            post(create_courier).get(list_couriers),
        )
        .route(
            "/tenants/:tenant_id/couriers/:id/location",
            patch(update_courier_location),
        )
        .route(
            "/tenants/:tenant_id/couriers/:id/deactivate",
            post(deactivate_courier),
        )
        .route(
            "/tenants/:tenant_id/couriers/:id/activate",
            post(activate_courier),
        )
}

#[derive(Deserialize)]
pub struct CreateCourierRequest {
    pub name: String,
    pub location: Option<GeoPoint>,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

async fn create_courier(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
    Json(payload): Json<CreateCourierRequest>,
) -> Result<Json<Courier>, AppError> {
    let courier = register_courier(&state, tenant_id, &payload.name, payload.location)?;
    Ok(Json(courier))
}

async fn list_couriers(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<Vec<Courier>>, AppError> {
    state.store.tenant(tenant_id)?;
    Ok(Json(state.store.couriers(tenant_id)))
}

async fn update_courier_location(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<Courier>, AppError> {
    let courier = update_courier_position(&state, tenant_id, id, payload.location)?;
    Ok(Json(courier))
}

async fn deactivate_courier(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<RedistributionReport>, AppError> {
    Ok(Json(redistribute(&state, tenant_id, id).await?))
}

async fn activate_courier(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Courier>, AppError> {
    reactivate(&state, tenant_id, id)?;
    Ok(Json(state.store.courier(tenant_id, id)?))
}
