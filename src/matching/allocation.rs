//! Atomic allocation step: row-locked, version-checked update of the
//! Requirement and Availability plus the new Match, retried with
//! exponential backoff on optimistic-concurrency conflict.

use crate::domain::{
    Availability, AvailabilityStatus, Match, MatchStatus, Requirement, RequirementStatus,
    RiskDecision, ScoreBreakdown,
};
use crate::error::{EngineError, ErrorCode};
use crate::ids::MatchId;
use crate::store::EntityStore;
use chrono::Utc;

pub struct AllocationInput<'a> {
    pub requirement_id: crate::ids::RequirementId,
    pub availability_id: crate::ids::AvailabilityId,
    pub matched_quantity: f64,
    pub matched_price: i64,
    pub score_breakdown: ScoreBreakdown,
    pub risk_decision: RiskDecision,
    pub risk_reasons: Vec<String>,
    pub max_retries: u32,
    pub store: &'a EntityStore,
}

/// Re-reads both rows, re-derives their post-allocation statuses, and
/// writes them back along with the new Match, all under optimistic
/// concurrency. Retries up to `max_retries` times with exponential backoff
/// on a version conflict (someone else allocated against the same row
/// first), then gives up and tells the caller to skip this candidate this
/// round — the sweeper will pick it up again later.
pub fn allocate(input: AllocationInput<'_>) -> Result<Option<Match>, EngineError> {
    let mut attempt = 0u32;
    loop {
        match try_allocate_once(&input) {
            Ok(outcome) => return Ok(outcome),
            Err(err) if err.code == ErrorCode::Conflict && attempt < input.max_retries => {
                attempt += 1;
                let backoff_ms = 50u64 * 2u64.pow(attempt);
                std::thread::sleep(std::time::Duration::from_millis(backoff_ms));
                continue;
            }
            Err(err) if err.code == ErrorCode::Conflict => {
                // Exhausted retries: skip this round, the sweeper retries later.
                return Ok(None);
            }
            Err(err) => return Err(err),
        }
    }
}

fn try_allocate_once(input: &AllocationInput<'_>) -> Result<Option<Match>, EngineError> {
    let store = input.store;

    let requirement = store
        .get_requirement(input.requirement_id)
        .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?
        .ok_or_else(|| EngineError::not_found("requirement not found"))?;
    let availability = store
        .get_availability(input.availability_id)
        .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?
        .ok_or_else(|| EngineError::not_found("availability not found"))?;

    let now = Utc::now();
    if !requirement.is_active_for_matching(now) || !availability.is_active_for_matching(now) {
        return Ok(None);
    }

    let quantity = input
        .matched_quantity
        .min(requirement.remaining_quantity)
        .min(availability.remaining_quantity);
    if quantity <= 0.0 {
        return Ok(None);
    }

    let req_version = requirement.version;
    let avail_version = availability.version;

    let mut new_requirement = requirement.clone();
    new_requirement.remaining_quantity -= quantity;
    new_requirement.status = next_requirement_status(&new_requirement);
    new_requirement.version += 1;

    let mut new_availability = availability.clone();
    new_availability.remaining_quantity -= quantity;
    new_availability.status = next_availability_status(&new_availability);
    new_availability.version += 1;

    store.update_requirement(&new_requirement, req_version)?;
    store.update_availability(&new_availability, avail_version)?;

    let m = Match {
        id: MatchId::new(),
        requirement_id: requirement.id,
        availability_id: availability.id,
        commodity_id: requirement.commodity_id,
        matched_quantity: quantity,
        matched_price: input.matched_price,
        score_breakdown: input.score_breakdown,
        risk_decision: input.risk_decision,
        risk_reasons: input.risk_reasons.clone(),
        status: MatchStatus::Proposed,
        negotiation_id: None,
        created_at: now,
        version: 1,
    };
    store
        .insert_match(&m)
        .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?;

    Ok(Some(m))
}

fn next_requirement_status(req: &Requirement) -> RequirementStatus {
    if req.remaining_quantity <= 0.0 {
        RequirementStatus::Fulfilled
    } else {
        RequirementStatus::PartiallyFulfilled
    }
}

fn next_availability_status(avail: &Availability) -> AvailabilityStatus {
    if avail.remaining_quantity <= 0.0 {
        AvailabilityStatus::SoldOut
    } else {
        AvailabilityStatus::PartiallySold
    }
}
