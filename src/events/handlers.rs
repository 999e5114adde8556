use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::engine::assignment::dispatch;
use crate::engine::redistribution::redistribute;
use crate::error::AppError;
use crate::events::DispatchEvent;
use crate::scheduler::arrival::on_courier_position_update;
use crate::state::AppState;

/// Subscribes the dispatch, geofence and redistribution collaborators to the
/// bus. The subscription is taken before this returns, so events published
/// afterwards are never missed.
pub fn register_handlers(state: Arc<AppState>) -> JoinHandle<()> {
    let mut rx = state.events.subscribe();

    tokio::spawn(async move {
        info!("event handlers registered");

        loop {
            match rx.recv().await {
                Ok(event) => {
                    let state = state.clone();
                    tokio::spawn(async move { handle(state, event).await });
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event handler lagged behind the bus");
                }
                Err(RecvError::Closed) => break,
            }
        }

        warn!("event handlers stopped: bus closed");
    })
}

async fn handle(state: Arc<AppState>, event: DispatchEvent) {
    match event {
        DispatchEvent::OrderReady {
            tenant_id,
            order_id,
        } => match dispatch(&state, tenant_id, order_id).await {
            Ok(outcome) => info!(
                order_id = %order_id,
                courier_id = %outcome.courier_id,
                "ready order dispatched"
            ),
            Err(AppError::NoCourierAvailable) => warn!(
                tenant_id = %tenant_id,
                order_id = %order_id,
                "ready order waiting for a courier"
            ),
            Err(err) => error!(error = %err, order_id = %order_id, "dispatch failed"),
        },
        DispatchEvent::CourierPositionUpdated {
            tenant_id,
            courier_id,
            position,
        } => {
            if let Err(err) = on_courier_position_update(&state, tenant_id, courier_id, position).await
            {
                error!(error = %err, courier_id = %courier_id, "geofence check failed");
            }
        }
        DispatchEvent::CourierDeactivated {
            tenant_id,
            courier_id,
        } => match redistribute(&state, tenant_id, courier_id).await {
            Ok(report) => {
                let stranded = report.stranded();
                if !stranded.is_empty() {
                    warn!(
                        courier_id = %courier_id,
                        stranded = ?stranded,
                        "orders left without a courier"
                    );
                }
            }
            Err(err) => error!(error = %err, courier_id = %courier_id, "redistribution failed"),
        },
        DispatchEvent::DispatchCompleted { .. }
        | DispatchEvent::EtaChanged { .. }
        | DispatchEvent::AlertSent { .. }
        | DispatchEvent::DeliveryCompleted { .. } => {}
    }
}
