use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::assignment::dispatch_excluding;
use crate::error::AppError;
use crate::models::courier::CourierStatus;
use crate::models::decision::{DecisionKind, DecisionLogEntry};
use crate::models::order::OrderStatus;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RedistributionOutcome {
    Reassigned {
        order_id: Uuid,
        courier_id: Uuid,
        score: f64,
    },
    Stranded {
        order_id: Uuid,
        reason: String,
    },
}

impl RedistributionOutcome {
    pub fn order_id(&self) -> Uuid {
        match self {
            RedistributionOutcome::Reassigned { order_id, .. }
            | RedistributionOutcome::Stranded { order_id, .. } => *order_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RedistributionReport {
    pub courier_id: Uuid,
    pub outcomes: Vec<RedistributionOutcome>,
}

impl RedistributionReport {
    pub fn stranded(&self) -> Vec<Uuid> {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome, RedistributionOutcome::Stranded { .. }))
            .map(RedistributionOutcome::order_id)
            .collect()
    }
}

/// Takes a courier out of service and re-dispatches every order it holds.
/// Each order gets its own outcome; one stranded order does not fail the rest.
pub async fn redistribute(
    state: &AppState,
    tenant_id: Uuid,
    courier_id: Uuid,
) -> Result<RedistributionReport, AppError> {
    state.store.update_courier(tenant_id, courier_id, |courier| {
        courier.status = CourierStatus::Unavailable;
    })?;

    let held = state.store.orders_held_by(tenant_id, courier_id);
    let mut released = Vec::with_capacity(held.len());

    for order in held {
        let reverted = state.store.update_order(tenant_id, order.id, |order| {
            if order.status != OrderStatus::Dispatched || order.courier_id != Some(courier_id) {
                return Ok(false);
            }
            order.reset_leg();
            order.status = OrderStatus::Ready;
            Ok(true)
        })?;

        if reverted {
            let active_orders = state.store.decrement_active_orders(tenant_id, courier_id)?;
            state.metrics.record_courier_load(&courier_id, active_orders);
            released.push(order.id);
        }
    }

    let mut outcomes = Vec::with_capacity(released.len());
    for order_id in released {
        let outcome = match dispatch_excluding(state, tenant_id, order_id, &[courier_id]).await {
            Ok(dispatched) => RedistributionOutcome::Reassigned {
                order_id,
                courier_id: dispatched.courier_id,
                score: dispatched.score,
            },
            Err(err) => {
                warn!(
                    error = %err,
                    tenant_id = %tenant_id,
                    order_id = %order_id,
                    "order stranded during redistribution"
                );
                RedistributionOutcome::Stranded {
                    order_id,
                    reason: err.to_string(),
                }
            }
        };
        outcomes.push(outcome);
    }

    let report = RedistributionReport {
        courier_id,
        outcomes,
    };
    let stranded = report.stranded();

    state.store.record_decision(DecisionLogEntry::new(
        tenant_id,
        DecisionKind::Redistribution,
        None,
        Some(courier_id),
        Vec::new(),
        format!(
            "courier unavailable: {} order(s) released, {} reassigned, {} stranded {:?}",
            report.outcomes.len(),
            report.outcomes.len() - stranded.len(),
            stranded.len(),
            stranded
        ),
    ));

    info!(
        tenant_id = %tenant_id,
        courier_id = %courier_id,
        released = report.outcomes.len(),
        stranded = stranded.len(),
        "redistribution finished"
    );

    Ok(report)
}

/// Puts a courier back in service. A courier still holding orders stays en route.
pub fn reactivate(state: &AppState, tenant_id: Uuid, courier_id: Uuid) -> Result<(), AppError> {
    state.store.update_courier(tenant_id, courier_id, |courier| {
        courier.status = if courier.active_orders > 0 {
            CourierStatus::EnRoute
        } else {
            CourierStatus::Available
        };
    })
}
