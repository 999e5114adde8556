use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::GeoPoint;
use crate::models::tenant::GeoConfidence;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Received,
    Preparing,
    Ready,
    Dispatched,
    Delivered,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    TenMinutes,
    Arriving,
    EtaChanged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryOrder {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub status: OrderStatus,
    pub courier_id: Option<Uuid>,
    pub customer_phone: Option<String>,
    pub delivery_address: String,
    pub destination: Option<GeoPoint>,
    pub destination_confidence: Option<GeoConfidence>,
    pub eta_minutes: Option<i64>,
    pub eta_computed_at: Option<DateTime<Utc>>,
    pub route_polyline: Option<String>,
    pub ten_minute_alert_sent: bool,
    pub arriving_alert_sent: bool,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryOrder {
    pub fn new(tenant_id: Uuid, delivery_address: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            status: OrderStatus::Received,
            courier_id: None,
            customer_phone: None,
            delivery_address: delivery_address.into(),
            destination: None,
            destination_confidence: None,
            eta_minutes: None,
            eta_computed_at: None,
            route_polyline: None,
            ten_minute_alert_sent: false,
            arriving_alert_sent: false,
            dispatched_at: None,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_destination(mut self, point: GeoPoint, confidence: GeoConfidence) -> Self {
        self.destination = Some(point);
        self.destination_confidence = Some(confidence);
        self
    }

    /// One-shot flag backing `kind`. ETA changes may repeat and have none.
    pub fn alert_flag_mut(&mut self, kind: AlertKind) -> Option<&mut bool> {
        match kind {
            AlertKind::TenMinutes => Some(&mut self.ten_minute_alert_sent),
            AlertKind::Arriving => Some(&mut self.arriving_alert_sent),
            AlertKind::EtaChanged => None,
        }
    }

    /// Clears everything that belongs to the current delivery leg.
    pub fn reset_leg(&mut self) {
        self.courier_id = None;
        self.dispatched_at = None;
        self.eta_minutes = None;
        self.eta_computed_at = None;
        self.route_polyline = None;
        self.ten_minute_alert_sent = false;
        self.arriving_alert_sent = false;
    }
}
