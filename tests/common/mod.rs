#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use courier_dispatch::config::Config;
use courier_dispatch::error::AppError;
use courier_dispatch::geo::{GeoService, offset_north};
use courier_dispatch::models::courier::{Courier, GeoPoint};
use courier_dispatch::models::order::{DeliveryOrder, OrderStatus};
use courier_dispatch::models::tenant::{GeoConfidence, NotificationChannelConfig, Tenant};
use courier_dispatch::notify::NotificationSender;
use courier_dispatch::state::AppState;
use serde_json::json;
use uuid::Uuid;

#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<serde_json::Value>>,
}

impl RecordingSender {
    pub fn messages(&self) -> Vec<serde_json::Value> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count_kind(&self, kind: &str) -> usize {
        self.messages()
            .iter()
            .filter(|payload| payload["kind"] == kind)
            .count()
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(
        &self,
        _channel: &NotificationChannelConfig,
        payload: &serde_json::Value,
    ) -> Result<String, AppError> {
        self.sent.lock().unwrap().push(payload.clone());
        Ok("ok".to_string())
    }
}

pub fn pickup() -> GeoPoint {
    GeoPoint {
        lat: -23.5505,
        lng: -46.6333,
    }
}

pub fn test_state() -> (Arc<AppState>, Arc<RecordingSender>) {
    let sender = Arc::new(RecordingSender::default());
    let state = AppState::with_parts(
        Config::default(),
        GeoService::fallback_only(),
        sender.clone(),
    );
    (Arc::new(state), sender)
}

/// State backed by a local maps provider that answers directions after `delay`.
pub async fn slow_provider_state(delay: Duration) -> (Arc<AppState>, Arc<RecordingSender>) {
    let app = Router::new().route(
        "/directions/json",
        get(move || async move {
            tokio::time::sleep(delay).await;
            Json(json!({
                "status": "OK",
                "routes": [{
                    "overview_polyline": { "points": "_p~iF~ps|U_ulLnnqC" },
                    "legs": [{
                        "distance": { "value": 2000.0 },
                        "duration": { "value": 300.0 },
                        "steps": []
                    }]
                }]
            }))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let geo = GeoService::with_provider(
        Some("key".to_string()),
        format!("http://{addr}"),
        Duration::from_secs(5),
    )
    .unwrap();
    let sender = Arc::new(RecordingSender::default());
    let state = AppState::with_parts(Config::default(), geo, sender.clone());
    (Arc::new(state), sender)
}

pub fn tenant(state: &AppState, with_channel: bool) -> Tenant {
    let mut tenant = Tenant::new("Pizzaria Centro", "Rua Augusta, 1500");
    tenant.pickup = Some(pickup());
    tenant.pickup_confidence = Some(GeoConfidence::Exact);
    if with_channel {
        tenant.notification_channel = Some(NotificationChannelConfig {
            webhook_url: "http://127.0.0.1:9/hook".to_string(),
            bearer_token: "token".to_string(),
        });
    }
    state.store.insert_tenant(tenant)
}

pub fn courier(state: &AppState, tenant_id: Uuid, name: &str, meters_from_pickup: f64) -> Courier {
    state
        .store
        .insert_courier(Courier::new(
            tenant_id,
            name,
            Some(offset_north(&pickup(), meters_from_pickup)),
        ))
        .unwrap()
}

pub fn ready_order(state: &AppState, tenant_id: Uuid, meters_from_pickup: f64) -> DeliveryOrder {
    let mut order = DeliveryOrder::new(tenant_id, "Avenida Paulista, 900").with_destination(
        offset_north(&pickup(), meters_from_pickup),
        GeoConfidence::Exact,
    );
    order.status = OrderStatus::Ready;
    order.customer_phone = Some("+5511999990000".to_string());
    state.store.insert_order(order).unwrap()
}

/// Stores an order already out for delivery with the given estimate.
pub fn in_transit_order(
    state: &AppState,
    tenant_id: Uuid,
    courier_id: Uuid,
    destination: GeoPoint,
    eta_minutes: Option<i64>,
    eta_computed_at: Option<DateTime<Utc>>,
) -> DeliveryOrder {
    let mut order = DeliveryOrder::new(tenant_id, "Avenida Paulista, 900")
        .with_destination(destination, GeoConfidence::Exact);
    order.status = OrderStatus::Dispatched;
    order.courier_id = Some(courier_id);
    order.dispatched_at = eta_computed_at.or(Some(Utc::now()));
    order.eta_minutes = eta_minutes;
    order.eta_computed_at = eta_computed_at;
    let order = state.store.insert_order(order).unwrap();
    state
        .store
        .increment_active_orders(tenant_id, courier_id)
        .unwrap();
    order
}
