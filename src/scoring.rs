//! Scorer (C5) — weighted four-factor composite match score.

use crate::config::CommodityConfig;
use crate::domain::{Availability, LocationSpec, Requirement, ScoreBreakdown};
use crate::risk::RiskStatus;
use rayon::prelude::*;

fn quality_fit(requirement: &Requirement, availability: &Availability) -> f64 {
    if requirement.accepted_quality_params.is_empty() {
        return 1.0;
    }
    let mut hits = 0usize;
    for (param, (min, max)) in &requirement.accepted_quality_params {
        if let Some(value) = availability.quality_params.get(param) {
            if value >= min && value <= max {
                hits += 1;
            }
        }
    }
    hits as f64 / requirement.accepted_quality_params.len() as f64
}

fn price_fit(requirement: &Requirement, availability: &Availability) -> f64 {
    if requirement.target_price == 0 {
        return 0.0;
    }
    let diff = (availability.asking_price - requirement.target_price) as f64;
    (1.0 - diff / requirement.target_price as f64).clamp(0.0, 1.0)
}

/// 1.0 if an exact registered-location match exists; otherwise a linear
/// decay to 0 at `max_km` for the nearest ad-hoc pairing.
fn delivery_fit(requirement: &Requirement, availability: &Availability, max_km: f64) -> f64 {
    let origin = &availability.origin_location;
    if let Some(origin_id) = origin.registered_id() {
        if requirement
            .delivery_locations
            .iter()
            .any(|l| l.registered_id() == Some(origin_id))
        {
            return 1.0;
        }
    }
    let Some(origin_coords) = origin.coordinates() else {
        return 0.0;
    };
    let nearest = requirement
        .delivery_locations
        .iter()
        .filter_map(LocationSpec::coordinates)
        .map(|p| crate::domain::haversine_km(p, origin_coords))
        .fold(f64::INFINITY, f64::min);
    if !nearest.is_finite() {
        return 0.0;
    }
    (1.0 - nearest / max_km).clamp(0.0, 1.0)
}

fn risk_fit(risk_status: RiskStatus) -> f64 {
    match risk_status {
        RiskStatus::Pass => 1.0,
        RiskStatus::Warn => 0.5,
        RiskStatus::Fail => 0.0,
    }
}

/// Computes the composite score for a single (requirement, availability)
/// pair. `risk_status` should already have short-circuited FAIL upstream
/// (a FAIL risk decision always short-circuits before scoring).
pub fn score_pair(
    requirement: &Requirement,
    availability: &Availability,
    risk_status: RiskStatus,
    config: &CommodityConfig,
    ai_recommended: bool,
) -> ScoreBreakdown {
    let quality = quality_fit(requirement, availability);
    let price = price_fit(requirement, availability);
    let delivery = delivery_fit(requirement, availability, config.max_km);
    let risk = risk_fit(risk_status);

    let mut composite = config.weight_quality * quality
        + config.weight_price * price
        + config.weight_delivery * delivery
        + config.weight_risk * risk;

    if risk_status == RiskStatus::Warn {
        composite *= 0.9;
    }
    if ai_recommended {
        composite = (composite * 1.05).min(1.0);
    }

    ScoreBreakdown {
        price_fit: price,
        quality_fit: quality,
        location_fit: delivery,
        reliability_fit: risk,
        composite: composite.clamp(0.0, 1.0),
    }
}

/// A scored candidate, carried through C7's ranking step.
pub struct ScoredCandidate<'a> {
    pub availability: &'a Availability,
    pub risk_status: RiskStatus,
    pub breakdown: ScoreBreakdown,
}

/// Scores a candidate set in parallel (CPU-only, never suspends). The
/// caller supplies each candidate's pre-computed risk status (risk checks
/// stay in C3/C6, not here) and AI-recommendation flag.
pub fn score_batch<'a>(
    requirement: &Requirement,
    candidates: &'a [(Availability, RiskStatus, bool)],
    config: &CommodityConfig,
) -> Vec<ScoredCandidate<'a>> {
    candidates
        .par_iter()
        .map(|(availability, risk_status, ai_recommended)| ScoredCandidate {
            availability,
            risk_status: *risk_status,
            breakdown: score_pair(requirement, availability, *risk_status, config, *ai_recommended),
        })
        .collect()
}
