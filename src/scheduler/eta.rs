use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::events::DispatchEvent;
use crate::geo::is_off_route;
use crate::models::alert::{AlertSeverity, FleetAlert};
use crate::models::courier::GeoPoint;
use crate::models::order::{AlertKind, DeliveryOrder, OrderStatus};
use crate::notify::{NotifyOutcome, notify_customer};
use crate::scheduler::TickReport;
use crate::state::AppState;

enum EtaUpdate {
    Skipped,
    Updated { notified: bool },
}

/// Recomputes the ETA of every in-transit order across all tenants.
pub async fn tick(state: &AppState, now: DateTime<Utc>) -> TickReport {
    let orders: Vec<DeliveryOrder> = state
        .store
        .tenant_ids()
        .into_iter()
        .flat_map(|tenant_id| state.store.orders_in_transit(tenant_id))
        .collect();

    stream::iter(orders)
        .map(|order| recalculate(state, order, now))
        .buffer_unordered(state.config.tick_concurrency.max(1))
        .fold(TickReport::default(), |total, report| async move {
            total.merge(report)
        })
        .await
}

async fn recalculate(state: &AppState, order: DeliveryOrder, now: DateTime<Utc>) -> TickReport {
    let mut report = TickReport {
        examined: 1,
        ..TickReport::default()
    };

    match recalculate_order(state, &order, now).await {
        Ok(EtaUpdate::Updated { notified }) => {
            report.updated = 1;
            report.notified = usize::from(notified);
            state
                .metrics
                .eta_recalculations_total
                .with_label_values(&["updated"])
                .inc();
        }
        Ok(EtaUpdate::Skipped) => {
            state
                .metrics
                .eta_recalculations_total
                .with_label_values(&["skipped"])
                .inc();
        }
        Err(AppError::TenantMismatch(msg)) => {
            report.failed = 1;
            warn!(
                security = true,
                order_id = %order.id,
                tenant_id = %order.tenant_id,
                detail = %msg,
                "skipping order with cross-tenant courier reference"
            );
        }
        Err(err) => {
            report.failed = 1;
            state
                .metrics
                .eta_recalculations_total
                .with_label_values(&["error"])
                .inc();
            error!(
                error = %err,
                order_id = %order.id,
                tenant_id = %order.tenant_id,
                "eta recalculation failed"
            );
        }
    }

    report
}

async fn recalculate_order(
    state: &AppState,
    order: &DeliveryOrder,
    now: DateTime<Utc>,
) -> Result<EtaUpdate, AppError> {
    let courier_id = order
        .courier_id
        .ok_or_else(|| AppError::Internal(format!("order {} has no courier", order.id)))?;
    let courier = state.store.courier(order.tenant_id, courier_id)?;

    let Some(position) = courier.location else {
        debug!(order_id = %order.id, courier_id = %courier_id, "courier position unknown");
        return Ok(EtaUpdate::Skipped);
    };

    let (destination, geocoded) = match order.destination {
        Some(point) => (point, None),
        None => match state.geo.geocode(&order.delivery_address).await {
            Some(geocoded) => (geocoded.point, Some(geocoded)),
            None => return Ok(EtaUpdate::Skipped),
        },
    };

    let Some(estimate) = state.geo.eta(&position, &destination).await else {
        return Ok(EtaUpdate::Skipped);
    };

    let previous = order.eta_minutes;
    let persisted = state.store.update_order(order.tenant_id, order.id, |stored| {
        if stored.status != OrderStatus::Dispatched || stored.courier_id != Some(courier_id) {
            return Ok(false);
        }
        stored.eta_minutes = Some(estimate.minutes);
        stored.eta_computed_at = Some(now);
        if let (None, Some(geocoded)) = (stored.destination, geocoded) {
            stored.destination = Some(geocoded.point);
            stored.destination_confidence = Some(geocoded.confidence);
        }
        Ok(true)
    })?;

    if !persisted {
        debug!(order_id = %order.id, "order left transit during recalculation");
        return Ok(EtaUpdate::Skipped);
    }

    if let Some(route) = order.route_polyline.as_deref() {
        let tolerance = state.config.off_route_tolerance_meters;
        if is_off_route(&position, route, tolerance) {
            record_off_route(state, order, courier_id, position, tolerance, now);
        }
    }

    let mut notified = false;
    if let Some(previous) = previous {
        let delta = (estimate.minutes - previous).abs();
        if delta >= state.config.eta_change_threshold_minutes {
            state.events.publish(DispatchEvent::EtaChanged {
                tenant_id: order.tenant_id,
                order_id: order.id,
                previous_minutes: previous,
                new_minutes: estimate.minutes,
            });

            let message = format!(
                "Your order is now expected in about {} minutes.",
                estimate.minutes
            );
            notified = notify_customer(state, order, AlertKind::EtaChanged, &message).await
                == NotifyOutcome::Sent;

            info!(
                order_id = %order.id,
                tenant_id = %order.tenant_id,
                previous_minutes = previous,
                new_minutes = estimate.minutes,
                traffic = ?estimate.traffic_level,
                "eta changed"
            );
        }
    }

    Ok(EtaUpdate::Updated { notified })
}

fn record_off_route(
    state: &AppState,
    order: &DeliveryOrder,
    courier_id: Uuid,
    position: GeoPoint,
    tolerance: f64,
    now: DateTime<Utc>,
) {
    warn!(
        order_id = %order.id,
        courier_id = %courier_id,
        tolerance_meters = tolerance,
        "courier is off route"
    );

    state.store.record_fleet_alert(FleetAlert {
        id: Uuid::new_v4(),
        tenant_id: order.tenant_id,
        order_id: order.id,
        courier_id,
        severity: AlertSeverity::Warn,
        kind: "off_route".to_string(),
        message: format!("courier deviated more than {tolerance:.0} m from the planned route"),
        position,
        created_at: now,
    });
}
