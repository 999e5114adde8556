use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::scoring::{self, AUDIT_TOP_N, Selection};
use crate::error::AppError;
use crate::events::DispatchEvent;
use crate::models::courier::{Courier, CourierStatus, GeoPoint};
use crate::models::decision::{DecisionKind, DecisionLogEntry};
use crate::models::order::{DeliveryOrder, OrderStatus};
use crate::models::tenant::GeoConfidence;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub order: DeliveryOrder,
    pub courier_id: Uuid,
    pub score: f64,
}

fn ensure_assignable(order: &DeliveryOrder) -> Result<(), AppError> {
    if let Some(courier_id) = order.courier_id {
        return Err(AppError::Conflict(format!(
            "order {} is already assigned to courier {courier_id}",
            order.id
        )));
    }

    if order.status != OrderStatus::Ready {
        return Err(AppError::Conflict(format!(
            "order {} must be ready before assignment, found {:?}",
            order.id, order.status
        )));
    }
    Ok(())
}

fn ensure_in_service(courier: &Courier) -> Result<(), AppError> {
    if courier.status == CourierStatus::Unavailable {
        return Err(AppError::Conflict(format!(
            "courier {} is unavailable",
            courier.id
        )));
    }
    Ok(())
}

/// Assigns a specific courier to an order.
pub async fn assign(
    state: &AppState,
    tenant_id: Uuid,
    order_id: Uuid,
    courier_id: Uuid,
) -> Result<DeliveryOrder, AppError> {
    assign_scored(state, tenant_id, order_id, courier_id, None).await
}

async fn assign_scored(
    state: &AppState,
    tenant_id: Uuid,
    order_id: Uuid,
    courier_id: Uuid,
    selection: Option<&Selection>,
) -> Result<DeliveryOrder, AppError> {
    let tenant = state.store.tenant(tenant_id)?;
    let order = state.store.order(tenant_id, order_id)?;
    let courier = state.store.courier(tenant_id, courier_id)?;

    ensure_assignable(&order)?;
    ensure_in_service(&courier)?;

    let (destination, confidence) = match (order.destination, order.destination_confidence) {
        (Some(point), confidence) => (Some(point), confidence),
        (None, _) => match state.geo.geocode(&order.delivery_address).await {
            Some(geocoded) => (Some(geocoded.point), Some(geocoded.confidence)),
            None => {
                warn!(order_id = %order_id, "delivery address could not be geocoded");
                (None, None)
            }
        },
    };

    let origin: Option<GeoPoint> = tenant.pickup.or(courier.location);
    let (route, eta) = match (origin, destination) {
        (Some(origin), Some(destination)) => (
            state.geo.route(&origin, &destination).await,
            state.geo.eta(&origin, &destination).await,
        ),
        _ => (None, None),
    };
    if eta.is_none() {
        warn!(order_id = %order_id, "eta unavailable; dispatching without estimate");
    }

    // Book the courier first; the increment refuses a courier already out of service.
    let active_orders = state.store.increment_active_orders(tenant_id, courier_id)?;

    let now = Utc::now();
    let committed = state.store.update_order(tenant_id, order_id, |order| {
        // Another assignment may have landed while routing was in flight.
        ensure_assignable(order)?;
        // Redistribution marks the courier unavailable before collecting its
        // orders, so this check under the order lock keeps the order visible to it.
        ensure_in_service(&state.store.courier(tenant_id, courier_id)?)?;

        order.reset_leg();
        order.status = OrderStatus::Dispatched;
        order.courier_id = Some(courier_id);
        order.dispatched_at = Some(now);
        if order.destination.is_none() {
            order.destination = destination;
            order.destination_confidence = confidence;
        }
        if let Some(eta) = eta {
            order.eta_minutes = Some(eta.minutes);
            order.eta_computed_at = Some(now);
        }
        order.route_polyline = route.as_ref().map(|route| route.polyline.clone());
        Ok(order.clone())
    });

    let updated = match committed {
        Ok(updated) => updated,
        Err(err) => {
            let active_orders = state.store.decrement_active_orders(tenant_id, courier_id)?;
            state.metrics.record_courier_load(&courier_id, active_orders);
            warn!(
                order_id = %order_id,
                courier_id = %courier_id,
                error = %err,
                "assignment rolled back"
            );
            return Err(err);
        }
    };
    state.metrics.record_courier_load(&courier_id, active_orders);

    let (score, candidates, rationale) = match selection {
        Some(selection) => (
            selection.best.as_ref().map(|best| best.score).unwrap_or(0.0),
            selection.ranked.iter().take(AUDIT_TOP_N).cloned().collect(),
            selection.rationale.clone(),
        ),
        None => {
            let target = tenant.pickup.or(destination);
            let scored = scoring::compute_score(&courier, target.as_ref(), now);
            (
                scored.as_ref().map(|candidate| candidate.score).unwrap_or(0.0),
                scored.into_iter().collect(),
                format!("manual assignment to {}", courier.name),
            )
        }
    };

    if confidence == Some(GeoConfidence::Fallback) {
        warn!(order_id = %order_id, "destination uses fabricated fallback coordinates");
    }

    state.store.record_decision(DecisionLogEntry::new(
        tenant_id,
        DecisionKind::Assignment,
        Some(order_id),
        Some(courier_id),
        candidates,
        format!(
            "{rationale}; eta {}",
            updated
                .eta_minutes
                .map(|minutes| format!("{minutes} min"))
                .unwrap_or_else(|| "unavailable".to_string())
        ),
    ));

    state.events.publish(DispatchEvent::DispatchCompleted {
        tenant_id,
        order_id,
        courier_id,
        score,
    });

    info!(
        tenant_id = %tenant_id,
        order_id = %order_id,
        courier_id = %courier_id,
        score,
        eta_minutes = ?updated.eta_minutes,
        "order assigned"
    );

    Ok(updated)
}

/// Scores the tenant's couriers and assigns the best one.
pub async fn dispatch(
    state: &AppState,
    tenant_id: Uuid,
    order_id: Uuid,
) -> Result<DispatchOutcome, AppError> {
    dispatch_excluding(state, tenant_id, order_id, &[]).await
}

pub async fn dispatch_excluding(
    state: &AppState,
    tenant_id: Uuid,
    order_id: Uuid,
    exclude: &[Uuid],
) -> Result<DispatchOutcome, AppError> {
    let start = Instant::now();
    let result = run_dispatch(state, tenant_id, order_id, exclude).await;

    let outcome = match &result {
        Ok(_) => "success",
        Err(AppError::NoCourierAvailable) => "no_courier",
        Err(_) => "error",
    };
    state
        .metrics
        .dispatch_latency_seconds
        .with_label_values(&[outcome])
        .observe(start.elapsed().as_secs_f64());
    state.metrics.dispatch_total.with_label_values(&[outcome]).inc();

    result
}

async fn run_dispatch(
    state: &AppState,
    tenant_id: Uuid,
    order_id: Uuid,
    exclude: &[Uuid],
) -> Result<DispatchOutcome, AppError> {
    let tenant = state.store.tenant(tenant_id)?;
    let order = state.store.order(tenant_id, order_id)?;
    ensure_assignable(&order)?;

    let target = tenant.pickup.or(order.destination);
    let selection =
        scoring::select_courier(state, tenant_id, Some(order_id), target, exclude, Utc::now())?;

    let best = selection.best.clone().ok_or_else(|| {
        warn!(tenant_id = %tenant_id, order_id = %order_id, "no courier available for order");
        AppError::NoCourierAvailable
    })?;

    let order = assign_scored(state, tenant_id, order_id, best.courier_id, Some(&selection)).await?;

    Ok(DispatchOutcome {
        order,
        courier_id: best.courier_id,
        score: best.score,
    })
}

/// Moves an order into the ready state and announces it on the bus.
pub fn mark_ready(
    state: &AppState,
    tenant_id: Uuid,
    order_id: Uuid,
) -> Result<DeliveryOrder, AppError> {
    let order = state.store.update_order(tenant_id, order_id, |order| {
        match order.status {
            OrderStatus::Received | OrderStatus::Preparing | OrderStatus::Ready => {
                order.status = OrderStatus::Ready;
                Ok(order.clone())
            }
            status => Err(AppError::Conflict(format!(
                "order {} cannot become ready while {status:?}",
                order.id
            ))),
        }
    })?;

    state.events.publish(DispatchEvent::OrderReady {
        tenant_id,
        order_id,
    });
    Ok(order)
}

/// Closes the delivery leg and releases the courier.
pub fn complete_delivery(
    state: &AppState,
    tenant_id: Uuid,
    order_id: Uuid,
) -> Result<DeliveryOrder, AppError> {
    let now = Utc::now();
    let order = state.store.update_order(tenant_id, order_id, |order| {
        if order.status != OrderStatus::Dispatched {
            return Err(AppError::Conflict(format!(
                "order {} is not out for delivery",
                order.id
            )));
        }
        order.status = OrderStatus::Delivered;
        order.delivered_at = Some(now);
        Ok(order.clone())
    })?;

    if let Some(courier_id) = order.courier_id {
        let active_orders = state.store.decrement_active_orders(tenant_id, courier_id)?;
        state.metrics.record_courier_load(&courier_id, active_orders);
    }

    state.events.publish(DispatchEvent::DeliveryCompleted {
        tenant_id,
        order_id,
        courier_id: order.courier_id,
    });
    info!(tenant_id = %tenant_id, order_id = %order_id, "delivery completed");

    Ok(order)
}
