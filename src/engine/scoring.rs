use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::haversine_meters;
use crate::models::courier::{Courier, GeoPoint};
use crate::models::decision::{CandidateScore, DecisionKind, DecisionLogEntry, ScoreBreakdown};
use crate::state::AppState;

const PROXIMITY_WEIGHT: f64 = 0.40;
const LOAD_WEIGHT: f64 = 0.30;
const IDLE_WEIGHT: f64 = 0.20;
const PERFORMANCE_WEIGHT: f64 = 0.10;

const PROXIMITY_CAP_METERS: f64 = 10_000.0;
const LOAD_CAP_ORDERS: f64 = 5.0;
const IDLE_TARGET_MINUTES: f64 = 30.0;

/// Placeholder until historical delivery performance is tracked.
pub const PERFORMANCE_BASELINE: f64 = 50.0;
pub const NEUTRAL_SCORE: f64 = 50.0;
pub const AUDIT_TOP_N: usize = 5;

#[derive(Debug, Clone)]
pub struct Selection {
    pub best: Option<CandidateScore>,
    pub ranked: Vec<CandidateScore>,
    /// True when no candidate had coordinates and the first available courier was taken.
    pub degraded: bool,
    pub rationale: String,
}

/// Scores one courier against the pickup point. Couriers without a known
/// position cannot be scored.
pub fn compute_score(
    courier: &Courier,
    target: Option<&GeoPoint>,
    now: DateTime<Utc>,
) -> Option<CandidateScore> {
    let location = courier.location?;
    let distance_meters = target.map(|target| haversine_meters(&location, target));

    let idle_minutes = courier
        .location_updated_at
        .map(|updated| (now - updated).num_seconds() as f64 / 60.0)
        .unwrap_or(0.0);

    let breakdown = ScoreBreakdown {
        proximity_score: distance_meters.map(proximity_score).unwrap_or(NEUTRAL_SCORE),
        load_score: load_score(courier.active_orders),
        idle_score: idle_score(idle_minutes),
        performance_score: PERFORMANCE_BASELINE,
    };

    Some(CandidateScore {
        courier_id: courier.id,
        courier_name: courier.name.clone(),
        score: weighted_score(&breakdown),
        breakdown,
        distance_meters,
    })
}

pub fn weighted_score(breakdown: &ScoreBreakdown) -> f64 {
    (breakdown.proximity_score * PROXIMITY_WEIGHT)
        + (breakdown.load_score * LOAD_WEIGHT)
        + (breakdown.idle_score * IDLE_WEIGHT)
        + (breakdown.performance_score * PERFORMANCE_WEIGHT)
}

fn proximity_score(distance_meters: f64) -> f64 {
    (100.0 * (1.0 - distance_meters.max(0.0) / PROXIMITY_CAP_METERS)).clamp(0.0, 100.0)
}

fn load_score(active_orders: u32) -> f64 {
    (100.0 * (1.0 - active_orders as f64 / LOAD_CAP_ORDERS)).clamp(0.0, 100.0)
}

fn idle_score(idle_minutes: f64) -> f64 {
    (100.0 * idle_minutes / IDLE_TARGET_MINUTES).clamp(0.0, 100.0)
}

/// Scores every courier with a position, best first. Equal scores keep input order.
pub fn rank_couriers(
    couriers: &[Courier],
    target: Option<&GeoPoint>,
    now: DateTime<Utc>,
) -> Vec<CandidateScore> {
    let mut ranked: Vec<CandidateScore> = couriers
        .iter()
        .filter_map(|courier| compute_score(courier, target, now))
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked
}

fn neutral_candidate(courier: &Courier) -> CandidateScore {
    let breakdown = ScoreBreakdown {
        proximity_score: NEUTRAL_SCORE,
        load_score: NEUTRAL_SCORE,
        idle_score: NEUTRAL_SCORE,
        performance_score: NEUTRAL_SCORE,
    };

    CandidateScore {
        courier_id: courier.id,
        courier_name: courier.name.clone(),
        score: weighted_score(&breakdown),
        breakdown,
        distance_meters: None,
    }
}

/// Ranks the tenant's available couriers and records a selection entry in the
/// decision log whatever the outcome.
pub fn select_courier(
    state: &AppState,
    tenant_id: Uuid,
    order_id: Option<Uuid>,
    target: Option<GeoPoint>,
    exclude: &[Uuid],
    now: DateTime<Utc>,
) -> Result<Selection, AppError> {
    state.store.tenant(tenant_id)?;

    let available: Vec<Courier> = state
        .store
        .available_couriers(tenant_id)
        .into_iter()
        .filter(|courier| !exclude.contains(&courier.id))
        .collect();

    let ranked = rank_couriers(&available, target.as_ref(), now);

    let selection = if let Some(best) = ranked.first().cloned() {
        let rationale = format!(
            "selected {} with score {:.1} (proximity {:.1}, load {:.1}, idle {:.1}) from {} scored of {} available",
            best.courier_name,
            best.score,
            best.breakdown.proximity_score,
            best.breakdown.load_score,
            best.breakdown.idle_score,
            ranked.len(),
            available.len(),
        );
        Selection {
            best: Some(best),
            ranked,
            degraded: false,
            rationale,
        }
    } else if let Some(first) = available.first() {
        let candidate = neutral_candidate(first);
        let rationale = format!(
            "no available courier has a known position; falling back to first available courier {}",
            first.name
        );
        Selection {
            best: Some(candidate.clone()),
            ranked: vec![candidate],
            degraded: true,
            rationale,
        }
    } else {
        Selection {
            best: None,
            ranked: Vec::new(),
            degraded: false,
            rationale: "no available couriers".to_string(),
        }
    };

    state.store.record_decision(DecisionLogEntry::new(
        tenant_id,
        DecisionKind::Selection,
        order_id,
        selection.best.as_ref().map(|best| best.courier_id),
        selection.ranked.iter().take(AUDIT_TOP_N).cloned().collect(),
        selection.rationale.clone(),
    ));

    match &selection.best {
        Some(best) => info!(
            tenant_id = %tenant_id,
            courier_id = %best.courier_id,
            score = best.score,
            degraded = selection.degraded,
            "courier selected"
        ),
        None => debug!(tenant_id = %tenant_id, "no courier available for selection"),
    }

    Ok(selection)
}
