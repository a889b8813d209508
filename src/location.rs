//! Location Filter (C4) — the pre-scoring step that narrows the
//! candidate set from quadratic cost down to whatever survives a location
//! match, before C6/C5 ever run on a pair.

use crate::domain::{Availability, LocationSpec, Requirement};
use crate::store::EntityStore;
use anyhow::Result;

/// Candidate Availabilities for a Requirement: registered-location exact
/// matches union ad-hoc-within-`max_km` matches.
pub fn candidates_for_requirement(
    store: &EntityStore,
    requirement: &Requirement,
    max_km: f64,
) -> Result<Vec<Availability>> {
    store.find_availabilities_by_location_and_commodity(
        requirement.commodity_id,
        &requirement.delivery_locations,
        max_km,
    )
}

/// Symmetric query for an Availability.
pub fn candidates_for_availability(
    store: &EntityStore,
    availability: &Availability,
    max_km: f64,
) -> Result<Vec<Requirement>> {
    store.find_requirements_accepting_location(availability.commodity_id, &availability.origin_location, max_km)
}

/// A single-pair check, used by C6's hard-requirement step when the
/// candidate set was gathered some other way (e.g. direct negotiation).
pub fn pair_locations_match(requirement: &Requirement, availability: &Availability, max_km: f64) -> bool {
    requirement
        .delivery_locations
        .iter()
        .any(|loc| locations_match_one(loc, &availability.origin_location, max_km))
}

fn locations_match_one(a: &LocationSpec, b: &LocationSpec, max_km: f64) -> bool {
    crate::domain::locations_match(a, b, max_km)
}
