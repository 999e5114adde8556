use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::alert::{FleetAlert, NotificationLogEntry};
use crate::models::courier::{Courier, CourierStatus};
use crate::models::decision::DecisionLogEntry;
use crate::models::order::{AlertKind, DeliveryOrder, OrderStatus};
use crate::models::tenant::Tenant;

struct CourierRow {
    seq: u64,
    courier: Courier,
}

/// Tenant-scoped tables. Every accessor takes the caller's tenant id and refuses
/// rows owned by another tenant.
#[derive(Default)]
pub struct Store {
    tenants: DashMap<Uuid, Tenant>,
    orders: DashMap<Uuid, DeliveryOrder>,
    couriers: DashMap<Uuid, CourierRow>,
    decisions: DashMap<Uuid, DecisionLogEntry>,
    fleet_alerts: DashMap<Uuid, FleetAlert>,
    notifications: DashMap<Uuid, NotificationLogEntry>,
    courier_seq: AtomicU64,
}

fn ensure_tenant(kind: &str, id: Uuid, owner: Uuid, tenant_id: Uuid) -> Result<(), AppError> {
    if owner == tenant_id {
        return Ok(());
    }

    warn!(
        security = true,
        record = kind,
        record_id = %id,
        owner_tenant = %owner,
        requested_tenant = %tenant_id,
        "cross-tenant access refused"
    );
    Err(AppError::TenantMismatch(format!(
        "{kind} {id} does not belong to tenant {tenant_id}"
    )))
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_tenant(&self, tenant: Tenant) -> Tenant {
        self.tenants.insert(tenant.id, tenant.clone());
        tenant
    }

    pub fn tenant(&self, tenant_id: Uuid) -> Result<Tenant, AppError> {
        self.tenants
            .get(&tenant_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("tenant {tenant_id} not found")))
    }

    pub fn tenant_ids(&self) -> Vec<Uuid> {
        self.tenants.iter().map(|entry| *entry.key()).collect()
    }

    pub fn insert_courier(&self, courier: Courier) -> Result<Courier, AppError> {
        self.tenant(courier.tenant_id)?;
        let seq = self.courier_seq.fetch_add(1, Ordering::SeqCst);
        self.couriers.insert(
            courier.id,
            CourierRow {
                seq,
                courier: courier.clone(),
            },
        );
        Ok(courier)
    }

    pub fn courier(&self, tenant_id: Uuid, courier_id: Uuid) -> Result<Courier, AppError> {
        let row = self
            .couriers
            .get(&courier_id)
            .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;
        ensure_tenant("courier", courier_id, row.courier.tenant_id, tenant_id)?;
        Ok(row.courier.clone())
    }

    /// Couriers of one tenant in insertion order.
    pub fn couriers(&self, tenant_id: Uuid) -> Vec<Courier> {
        let mut rows: Vec<(u64, Courier)> = self
            .couriers
            .iter()
            .filter(|entry| entry.courier.tenant_id == tenant_id)
            .map(|entry| (entry.seq, entry.courier.clone()))
            .collect();
        rows.sort_by_key(|(seq, _)| *seq);
        rows.into_iter().map(|(_, courier)| courier).collect()
    }

    pub fn available_couriers(&self, tenant_id: Uuid) -> Vec<Courier> {
        self.couriers(tenant_id)
            .into_iter()
            .filter(|courier| courier.status == CourierStatus::Available)
            .collect()
    }

    pub fn update_courier<R>(
        &self,
        tenant_id: Uuid,
        courier_id: Uuid,
        apply: impl FnOnce(&mut Courier) -> R,
    ) -> Result<R, AppError> {
        let mut row = self
            .couriers
            .get_mut(&courier_id)
            .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;
        ensure_tenant("courier", courier_id, row.courier.tenant_id, tenant_id)?;

        let result = apply(&mut row.courier);
        row.courier.updated_at = Utc::now();
        Ok(result)
    }

    /// Books one active order in place and marks the courier en route. A courier
    /// taken out of service is refused under the same entry lock.
    pub fn increment_active_orders(
        &self,
        tenant_id: Uuid,
        courier_id: Uuid,
    ) -> Result<u32, AppError> {
        self.update_courier(tenant_id, courier_id, |courier| {
            if courier.status == CourierStatus::Unavailable {
                return Err(AppError::Conflict(format!(
                    "courier {courier_id} is unavailable"
                )));
            }
            courier.active_orders = courier.active_orders.saturating_add(1);
            courier.status = CourierStatus::EnRoute;
            Ok(courier.active_orders)
        })?
    }

    /// Removes one active order in place; an idle en-route courier becomes available.
    pub fn decrement_active_orders(
        &self,
        tenant_id: Uuid,
        courier_id: Uuid,
    ) -> Result<u32, AppError> {
        self.update_courier(tenant_id, courier_id, |courier| {
            courier.active_orders = courier.active_orders.saturating_sub(1);
            if courier.active_orders == 0 && courier.status == CourierStatus::EnRoute {
                courier.status = CourierStatus::Available;
            }
            courier.active_orders
        })
    }

    pub fn insert_order(&self, order: DeliveryOrder) -> Result<DeliveryOrder, AppError> {
        self.tenant(order.tenant_id)?;
        self.orders.insert(order.id, order.clone());
        Ok(order)
    }

    pub fn order(&self, tenant_id: Uuid, order_id: Uuid) -> Result<DeliveryOrder, AppError> {
        let order = self
            .orders
            .get(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
        ensure_tenant("order", order_id, order.tenant_id, tenant_id)?;
        Ok(order.clone())
    }

    pub fn update_order<R>(
        &self,
        tenant_id: Uuid,
        order_id: Uuid,
        apply: impl FnOnce(&mut DeliveryOrder) -> Result<R, AppError>,
    ) -> Result<R, AppError> {
        let mut order = self
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
        ensure_tenant("order", order_id, order.tenant_id, tenant_id)?;

        let result = apply(&mut order)?;
        order.updated_at = Utc::now();
        Ok(result)
    }

    pub fn orders(&self, tenant_id: Uuid) -> Vec<DeliveryOrder> {
        let mut orders: Vec<DeliveryOrder> = self
            .orders
            .iter()
            .filter(|entry| entry.tenant_id == tenant_id)
            .map(|entry| entry.value().clone())
            .collect();
        orders.sort_by_key(|order| order.created_at);
        orders
    }

    /// Dispatched orders with an assigned courier.
    pub fn orders_in_transit(&self, tenant_id: Uuid) -> Vec<DeliveryOrder> {
        self.orders(tenant_id)
            .into_iter()
            .filter(|order| order.status == OrderStatus::Dispatched && order.courier_id.is_some())
            .collect()
    }

    pub fn orders_held_by(&self, tenant_id: Uuid, courier_id: Uuid) -> Vec<DeliveryOrder> {
        self.orders_in_transit(tenant_id)
            .into_iter()
            .filter(|order| order.courier_id == Some(courier_id))
            .collect()
    }

    /// Sets a one-shot alert flag for the delivery leg captured in `snapshot`.
    /// Returns true only for the caller that flipped it; a claim against a leg that
    /// has since been reassigned is refused.
    pub fn claim_alert(&self, snapshot: &DeliveryOrder, kind: AlertKind) -> Result<bool, AppError> {
        self.update_order(snapshot.tenant_id, snapshot.id, |order| {
            if order.status != OrderStatus::Dispatched
                || order.courier_id != snapshot.courier_id
                || order.dispatched_at != snapshot.dispatched_at
            {
                return Ok(false);
            }

            let Some(flag) = order.alert_flag_mut(kind) else {
                return Ok(false);
            };
            if *flag {
                Ok(false)
            } else {
                *flag = true;
                Ok(true)
            }
        })
    }

    pub fn record_decision(&self, entry: DecisionLogEntry) {
        self.decisions.insert(entry.id, entry);
    }

    pub fn decisions(&self, tenant_id: Uuid) -> Vec<DecisionLogEntry> {
        let mut entries: Vec<DecisionLogEntry> = self
            .decisions
            .iter()
            .filter(|entry| entry.tenant_id == tenant_id)
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by_key(|entry| entry.created_at);
        entries
    }

    pub fn record_fleet_alert(&self, alert: FleetAlert) {
        self.fleet_alerts.insert(alert.id, alert);
    }

    pub fn fleet_alerts(&self, tenant_id: Uuid) -> Vec<FleetAlert> {
        let mut alerts: Vec<FleetAlert> = self
            .fleet_alerts
            .iter()
            .filter(|entry| entry.tenant_id == tenant_id)
            .map(|entry| entry.value().clone())
            .collect();
        alerts.sort_by_key(|alert| alert.created_at);
        alerts
    }

    pub fn record_notification(&self, entry: NotificationLogEntry) {
        self.notifications.insert(entry.id, entry);
    }

    pub fn notifications(&self, tenant_id: Uuid) -> Vec<NotificationLogEntry> {
        let mut entries: Vec<NotificationLogEntry> = self
            .notifications
            .iter()
            .filter(|entry| entry.tenant_id == tenant_id)
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by_key(|entry| entry.created_at);
        entries
    }

    pub fn counts(&self) -> StoreCounts {
        StoreCounts {
            tenants: self.tenants.len(),
            couriers: self.couriers.len(),
            orders: self.orders.len(),
            decisions: self.decisions.len(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StoreCounts {
    pub tenants: usize,
    pub couriers: usize,
    pub orders: usize,
    pub decisions: usize,
}
