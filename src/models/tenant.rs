use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::GeoPoint;

/// How a coordinate was obtained. `Fallback` points are fabricated from an
/// address hash and never describe a real place.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GeoConfidence {
    Exact,
    Provider,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationChannelConfig {
    pub webhook_url: String,
    #[serde(skip_serializing)]
    pub bearer_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub pickup: Option<GeoPoint>,
    pub pickup_confidence: Option<GeoConfidence>,
    pub notification_channel: Option<NotificationChannelConfig>,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            address: address.into(),
            pickup: None,
            pickup_confidence: None,
            notification_channel: None,
            created_at: Utc::now(),
        }
    }
}
