use chrono::Utc;
use uuid::Uuid;

use crate::error::AppError;
use crate::events::DispatchEvent;
use crate::models::courier::{Courier, GeoPoint};
use crate::state::AppState;

fn validate(point: &GeoPoint) -> Result<(), AppError> {
    if (-90.0..=90.0).contains(&point.lat) && (-180.0..=180.0).contains(&point.lng) {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!(
            "coordinates out of range: {}, {}",
            point.lat, point.lng
        )))
    }
}

/// Stores a fresh courier position and announces it for geofence checks.
pub fn update_courier_position(
    state: &AppState,
    tenant_id: Uuid,
    courier_id: Uuid,
    position: GeoPoint,
) -> Result<Courier, AppError> {
    validate(&position)?;

    let courier = state.store.update_courier(tenant_id, courier_id, |courier| {
        courier.location = Some(position);
        courier.location_updated_at = Some(Utc::now());
        courier.clone()
    })?;

    state.events.publish(DispatchEvent::CourierPositionUpdated {
        tenant_id,
        courier_id,
        position,
    });
    Ok(courier)
}

pub fn register_courier(
    state: &AppState,
    tenant_id: Uuid,
    name: &str,
    position: Option<GeoPoint>,
) -> Result<Courier, AppError> {
    if name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }
    if let Some(position) = &position {
        validate(position)?;
    }

    state
        .store
        .insert_courier(Courier::new(tenant_id, name.trim(), position))
}
