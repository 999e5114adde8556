use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetAlert {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub order_id: Uuid,
    pub courier_id: Uuid,
    pub severity: AlertSeverity,
    pub kind: String,
    pub message: String,
    pub position: GeoPoint,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Sent,
    Failed,
}

/// One attempt to reach a customer through the tenant's channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationLogEntry {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub order_id: Uuid,
    pub kind: String,
    pub payload: serde_json::Value,
    pub response: Option<String>,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
}
