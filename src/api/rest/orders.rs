use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::assignment::{assign, complete_delivery, dispatch, mark_ready, DispatchOutcome};
use crate::error::AppError;
use crate::models::courier::GeoPoint;
use crate::models::order::DeliveryOrder;
use crate::models::tenant::GeoConfidence;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/tenants/:tenant_id/orders",
            post(create_order).get(list_orders),
        )
        .route("/tenants/:tenant_id/orders/:id", get(get_order))
        .route("/tenants/:tenant_id/orders/:id/ready", post(ready_order))
        .route("/tenants/:tenant_id/orders/:id/dispatch", post(dispatch_order))
        .route("/tenants/:tenant_id/orders/:id/assign", post(assign_order))
        .route("/tenants/:tenant_id/orders/:id/deliver", post(deliver_order))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub delivery_address: String,
    pub destination: Option<GeoPoint>,
    pub customer_phone: Option<String>,
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub courier_id: Uuid,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<DeliveryOrder>, AppError> {
    state.store.tenant(tenant_id)?;
    if payload.delivery_address.trim().is_empty() && payload.destination.is_none() {
        return Err(AppError::BadRequest(
            "delivery_address or destination is required".to_string(),
        ));
    }

    let mut order = DeliveryOrder::new(tenant_id, payload.delivery_address);
    order.customer_phone = payload.customer_phone;

    order = match payload.destination {
        Some(point) => order.with_destination(point, GeoConfidence::Exact),
        None => match state.geo.geocode(&order.delivery_address).await {
            Some(geocoded) => order.with_destination(geocoded.point, geocoded.confidence),
            None => order,
        },
    };

    Ok(Json(state.store.insert_order(order)?))
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<Vec<DeliveryOrder>>, AppError> {
    state.store.tenant(tenant_id)?;
    Ok(Json(state.store.orders(tenant_id)))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<DeliveryOrder>, AppError> {
    Ok(Json(state.store.order(tenant_id, id)?))
}

async fn ready_order(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<DeliveryOrder>, AppError> {
    Ok(Json(mark_ready(&state, tenant_id, id)?))
}

async fn dispatch_order(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<DispatchOutcome>, AppError> {
    Ok(Json(dispatch(&state, tenant_id, id).await?))
}

async fn assign_order(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<DeliveryOrder>, AppError> {
    Ok(Json(assign(&state, tenant_id, id, payload.courier_id).await?))
}

async fn deliver_order(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<DeliveryOrder>, AppError> {
    Ok(Json(complete_delivery(&state, tenant_id, id)?))
}
