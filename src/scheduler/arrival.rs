use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use futures::stream;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::AppError;
use crate::events::DispatchEvent;
use crate::geo::haversine_meters;
use crate::models::courier::GeoPoint;
use crate::models::order::{AlertKind, DeliveryOrder};
use crate::models::tenant::GeoConfidence;
use crate::notify::{alert_label, has_channel, notify_customer};
use crate::scheduler::TickReport;
use crate::state::AppState;

const TEN_MINUTE_LEAD: i64 = 10;
const TEN_MINUTE_MESSAGE: &str = "Your order is about 10 minutes away.";
const ARRIVING_MESSAGE: &str = "Your courier is arriving now.";

/// Instant at which the "10 minutes out" message becomes due.
pub fn ten_minute_alert_at(order: &DeliveryOrder) -> Option<DateTime<Utc>> {
    let computed_at = order.eta_computed_at?;
    let minutes = order.eta_minutes?;
    Some(computed_at + Duration::minutes(minutes) - Duration::minutes(TEN_MINUTE_LEAD))
}

/// Fires due "10 minutes out" messages across all tenants.
pub async fn tick(state: &AppState, now: DateTime<Utc>) -> TickReport {
    let due: Vec<DeliveryOrder> = state
        .store
        .tenant_ids()
        .into_iter()
        .filter(|tenant_id| has_channel(state, *tenant_id))
        .flat_map(|tenant_id| state.store.orders_in_transit(tenant_id))
        .filter(|order| !order.ten_minute_alert_sent)
        .filter(|order| ten_minute_alert_at(order).is_some_and(|alert_at| now >= alert_at))
        .collect();

    stream::iter(due)
        .map(|order| async move {
            let mut report = TickReport {
                examined: 1,
                ..TickReport::default()
            };
            match fire(state, &order, AlertKind::TenMinutes, TEN_MINUTE_MESSAGE).await {
                Ok(true) => {
                    report.updated = 1;
                    report.notified = 1;
                }
                Ok(false) => {}
                Err(err) => {
                    report.failed = 1;
                    error!(
                        error = %err,
                        order_id = %order.id,
                        tenant_id = %order.tenant_id,
                        "ten minute alert failed"
                    );
                }
            }
            report
        })
        .buffer_unordered(state.config.tick_concurrency.max(1))
        .fold(TickReport::default(), |total, report| async move {
            total.merge(report)
        })
        .await
}

/// Geofence check for a fresh courier position. Returns the orders that got an
/// "arriving now" message.
pub async fn on_courier_position_update(
    state: &AppState,
    tenant_id: Uuid,
    courier_id: Uuid,
    position: GeoPoint,
) -> Result<Vec<Uuid>, AppError> {
    if !has_channel(state, tenant_id) {
        return Ok(Vec::new());
    }

    let radius = state.config.geofence_radius_meters;
    let mut alerted = Vec::new();

    for order in state.store.orders_held_by(tenant_id, courier_id) {
        if order.arriving_alert_sent {
            continue;
        }
        let Some(destination) = order.destination else {
            continue;
        };
        if order.destination_confidence == Some(GeoConfidence::Fallback) {
            debug!(order_id = %order.id, "skipping geofence against fabricated destination");
            continue;
        }

        if haversine_meters(&position, &destination) > radius {
            continue;
        }
        match fire(state, &order, AlertKind::Arriving, ARRIVING_MESSAGE).await {
            Ok(true) => alerted.push(order.id),
            Ok(false) => {}
            Err(err) => error!(
                error = %err,
                order_id = %order.id,
                courier_id = %courier_id,
                "arriving alert failed"
            ),
        }
    }

    Ok(alerted)
}

/// Claims the one-shot flag and sends. Only the caller that flips the flag sends,
/// so overlapping ticks and repeated position updates cannot double-send.
async fn fire(
    state: &AppState,
    order: &DeliveryOrder,
    kind: AlertKind,
    message: &str,
) -> Result<bool, AppError> {
    if !state.store.claim_alert(order, kind)? {
        return Ok(false);
    }

    let outcome = notify_customer(state, order, kind, message).await;

    let label = alert_label(kind);
    state.metrics.alerts_sent_total.with_label_values(&[label]).inc();
    state.events.publish(DispatchEvent::AlertSent {
        tenant_id: order.tenant_id,
        order_id: order.id,
        alert: kind,
    });
    info!(
        order_id = %order.id,
        tenant_id = %order.tenant_id,
        alert = label,
        outcome = ?outcome,
        "customer alert fired"
    );

    Ok(true)
}
