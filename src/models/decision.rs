use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScoreBreakdown {
    pub proximity_score: f64,
    pub load_score: f64,
    pub idle_score: f64,
    pub performance_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateScore {
    pub courier_id: Uuid,
    pub courier_name: String,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    pub distance_meters: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Selection,
    Assignment,
    Redistribution,
}

/// Audit record of one scoring or assignment event. Written once, never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub kind: DecisionKind,
    pub order_id: Option<Uuid>,
    pub courier_id: Option<Uuid>,
    pub candidates: Vec<CandidateScore>,
    pub rationale: String,
    pub created_at: DateTime<Utc>,
}

impl DecisionLogEntry {
    pub fn new(
        tenant_id: Uuid,
        kind: DecisionKind,
        order_id: Option<Uuid>,
        courier_id: Option<Uuid>,
        candidates: Vec<CandidateScore>,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            kind,
            order_id,
            courier_id,
            candidates,
            rationale: rationale.into(),
            created_at: Utc::now(),
        }
    }
}
