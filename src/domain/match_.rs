//! Match entity produced by the Matching Engine (C7).

use crate::ids::{AvailabilityId, CommodityId, MatchId, RequirementId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Proposed,
    Negotiating,
    Confirmed,
    Rejected,
    Expired,
    Superseded,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Proposed => "proposed",
            MatchStatus::Negotiating => "negotiating",
            MatchStatus::Confirmed => "confirmed",
            MatchStatus::Rejected => "rejected",
            MatchStatus::Expired => "expired",
            MatchStatus::Superseded => "superseded",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "proposed" => Some(MatchStatus::Proposed),
            "negotiating" => Some(MatchStatus::Negotiating),
            "confirmed" => Some(MatchStatus::Confirmed),
            "rejected" => Some(MatchStatus::Rejected),
            "expired" => Some(MatchStatus::Expired),
            "superseded" => Some(MatchStatus::Superseded),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MatchStatus::Confirmed
                | MatchStatus::Rejected
                | MatchStatus::Expired
                | MatchStatus::Superseded
        )
    }
}

/// Per-factor breakdown behind a match's composite score (C5), kept for
/// audit/explainability.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub price_fit: f64,
    pub quality_fit: f64,
    pub location_fit: f64,
    pub reliability_fit: f64,
    pub composite: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskDecision {
    Pass,
    Warn,
    Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub requirement_id: RequirementId,
    pub availability_id: AvailabilityId,
    pub commodity_id: CommodityId,
    pub matched_quantity: f64,
    pub matched_price: i64,
    pub score_breakdown: ScoreBreakdown,
    pub risk_decision: RiskDecision,
    pub risk_reasons: Vec<String>,
    pub status: MatchStatus,
    pub negotiation_id: Option<crate::ids::NegotiationId>,
    pub created_at: DateTime<Utc>,
    pub version: u32,
}

impl Match {
    pub fn is_actionable(&self) -> bool {
        !self.status.is_terminal() && self.risk_decision != RiskDecision::Block
    }
}
