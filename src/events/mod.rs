pub mod handlers;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::models::courier::GeoPoint;
use crate::models::order::AlertKind;

pub use handlers::register_handlers;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum DispatchEvent {
    #[serde(rename = "order.ready")]
    OrderReady { tenant_id: Uuid, order_id: Uuid },

    #[serde(rename = "courier.positionUpdated")]
    CourierPositionUpdated {
        tenant_id: Uuid,
        courier_id: Uuid,
        position: GeoPoint,
    },

    #[serde(rename = "courier.deactivated")]
    CourierDeactivated { tenant_id: Uuid, courier_id: Uuid },

    #[serde(rename = "dispatch.completed")]
    DispatchCompleted {
        tenant_id: Uuid,
        order_id: Uuid,
        courier_id: Uuid,
        score: f64,
    },

    #[serde(rename = "eta.changed")]
    EtaChanged {
        tenant_id: Uuid,
        order_id: Uuid,
        previous_minutes: i64,
        new_minutes: i64,
    },

    #[serde(rename = "alert.sent")]
    AlertSent {
        tenant_id: Uuid,
        order_id: Uuid,
        alert: AlertKind,
    },

    #[serde(rename = "delivery.completed")]
    DeliveryCompleted {
        tenant_id: Uuid,
        order_id: Uuid,
        courier_id: Option<Uuid>,
    },
}

impl DispatchEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DispatchEvent::OrderReady { .. } => "order.ready",
            DispatchEvent::CourierPositionUpdated { .. } => "courier.positionUpdated",
            DispatchEvent::CourierDeactivated { .. } => "courier.deactivated",
            DispatchEvent::DispatchCompleted { .. } => "dispatch.completed",
            DispatchEvent::EtaChanged { .. } => "eta.changed",
            DispatchEvent::AlertSent { .. } => "alert.sent",
            DispatchEvent::DeliveryCompleted { .. } => "delivery.completed",
        }
    }

    pub fn tenant_id(&self) -> Uuid {
        match self {
            DispatchEvent::OrderReady { tenant_id, .. }
            | DispatchEvent::CourierPositionUpdated { tenant_id, .. }
            | DispatchEvent::CourierDeactivated { tenant_id, .. }
            | DispatchEvent::DispatchCompleted { tenant_id, .. }
            | DispatchEvent::EtaChanged { tenant_id, .. }
            | DispatchEvent::AlertSent { tenant_id, .. }
            | DispatchEvent::DeliveryCompleted { tenant_id, .. } => *tenant_id,
        }
    }
}

/// In-process publish/subscribe hub. Constructed once per process (or per test);
/// subscribers attach explicitly.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DispatchEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _unused_rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, event: DispatchEvent) {
        let name = event.name();
        match self.tx.send(event) {
            Ok(receivers) => debug!(event = name, receivers, "event published"),
            Err(_) => debug!(event = name, "event published with no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
