use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::alert::{NotificationLogEntry, NotificationStatus};
use crate::models::order::{AlertKind, DeliveryOrder};
use crate::models::tenant::NotificationChannelConfig;
use crate::state::AppState;

/// Outbound customer channel. Implementations must bound their own I/O.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Returns the channel's response body on success.
    async fn send(
        &self,
        channel: &NotificationChannelConfig,
        payload: &serde_json::Value,
    ) -> Result<String, AppError>;
}

pub struct WebhookSender {
    http: reqwest::Client,
}

impl WebhookSender {
    pub fn new(timeout: Duration) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::Internal(format!("failed to build webhook client: {err}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl NotificationSender for WebhookSender {
    async fn send(
        &self,
        channel: &NotificationChannelConfig,
        payload: &serde_json::Value,
    ) -> Result<String, AppError> {
        let response = self
            .http
            .post(&channel.webhook_url)
            .bearer_auth(&channel.bearer_token)
            .json(payload)
            .send()
            .await
            .map_err(|err| AppError::ProviderUnavailable(format!("webhook request failed: {err}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.is_success() {
            Ok(body)
        } else {
            Err(AppError::ProviderUnavailable(format!(
                "webhook returned HTTP {status}: {body}"
            )))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Tenant has no channel configured.
    Skipped,
    Sent,
    Failed,
}

pub fn alert_label(kind: AlertKind) -> &'static str {
    match kind {
        AlertKind::TenMinutes => "ten_minutes",
        AlertKind::Arriving => "arriving",
        AlertKind::EtaChanged => "eta_changed",
    }
}

pub fn has_channel(state: &AppState, tenant_id: Uuid) -> bool {
    state
        .store
        .tenant(tenant_id)
        .map(|tenant| tenant.notification_channel.is_some())
        .unwrap_or(false)
}

/// Best-effort send through the tenant's channel. Every attempt is written to the
/// notification log; failures never propagate.
pub async fn notify_customer(
    state: &AppState,
    order: &DeliveryOrder,
    kind: AlertKind,
    message: &str,
) -> NotifyOutcome {
    let channel = match state.store.tenant(order.tenant_id) {
        Ok(tenant) => match tenant.notification_channel {
            Some(channel) => channel,
            None => return NotifyOutcome::Skipped,
        },
        Err(err) => {
            warn!(error = %err, order_id = %order.id, "cannot resolve tenant for notification");
            return NotifyOutcome::Skipped;
        }
    };

    let label = alert_label(kind);
    let payload = json!({
        "to": order.customer_phone,
        "order_id": order.id,
        "kind": label,
        "message": message,
    });

    let (status, response) = match state.notifier.send(&channel, &payload).await {
        Ok(body) => {
            info!(order_id = %order.id, tenant_id = %order.tenant_id, kind = label, "customer notified");
            (NotificationStatus::Sent, Some(body))
        }
        Err(err) => {
            warn!(
                error = %err,
                order_id = %order.id,
                tenant_id = %order.tenant_id,
                kind = label,
                "customer notification failed"
            );
            (NotificationStatus::Failed, Some(err.to_string()))
        }
    };

    state.store.record_notification(NotificationLogEntry {
        id: Uuid::new_v4(),
        tenant_id: order.tenant_id,
        order_id: order.id,
        kind: label.to_string(),
        payload,
        response,
        status,
        created_at: Utc::now(),
    });

    match status {
        NotificationStatus::Sent => {
            state.metrics.notifications_total.with_label_values(&["sent"]).inc();
            NotifyOutcome::Sent
        }
        NotificationStatus::Failed => {
            state.metrics.notifications_total.with_label_values(&["failed"]).inc();
            NotifyOutcome::Failed
        }
    }
}
