//! Match Validator (C6) — fail-fast hard-requirement, capability,
//! insider-trading, party-links, AI-advisory pipeline.

use crate::capability::CapabilityDecision;
use crate::config::CommodityConfig;
use crate::domain::{Availability, Requirement};
use crate::location::pair_locations_match;
use crate::risk::{check_party_links, RiskStatus};
use crate::domain::Partner;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub reasons: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn fail(reason: impl Into<String>) -> Self {
        Self { valid: false, reasons: vec![reason.into()], warnings: vec![] }
    }
}

pub struct ValidationInput<'a> {
    pub requirement: &'a Requirement,
    pub availability: &'a Availability,
    pub buyer: &'a Partner,
    pub seller: &'a Partner,
    pub buyer_capability: &'a CapabilityDecision,
    pub seller_capability: &'a CapabilityDecision,
    pub now: DateTime<Utc>,
    pub config: &'a CommodityConfig,
    pub ai_advisory_confidence: Option<f64>,
}

/// Runs the validation pipeline, in order, fail-fast.
pub fn validate_match(input: &ValidationInput) -> ValidationResult {
    let ValidationInput {
        requirement,
        availability,
        buyer,
        seller,
        buyer_capability,
        seller_capability,
        now,
        config,
        ai_advisory_confidence,
    } = input;

    // 1. Hard requirements.
    if requirement.commodity_id != availability.commodity_id {
        return ValidationResult::fail("commodity mismatch");
    }
    // `availability.remaining_quantity >= min(requirement.quantity,
    // partial_fill_threshold)`. A zero (default) threshold means any
    // non-empty remaining quantity is an acceptable partial fill.
    let min_required = requirement.quantity.min(config.partial_fill_threshold);
    if availability.remaining_quantity <= 0.0 || availability.remaining_quantity < min_required {
        return ValidationResult::fail("availability below partial-fill threshold");
    }
    if let Some(max_price) = requirement.max_price {
        if availability.asking_price > max_price {
            return ValidationResult::fail("asking price exceeds requirement's max price");
        }
    }
    if !requirement.is_active_for_matching(*now) {
        return ValidationResult::fail("requirement is not active");
    }
    if !availability.is_active_for_matching(*now) {
        return ValidationResult::fail("availability is not active");
    }
    if !pair_locations_match(requirement, availability, config.max_km) {
        return ValidationResult::fail("no delivery-location overlap");
    }

    // 2. Capability validation via C2 on both sides.
    if !buyer_capability.is_allowed() {
        return ValidationResult::fail(format!("buyer capability denied: {}", buyer_capability.code));
    }
    if !seller_capability.is_allowed() {
        return ValidationResult::fail(format!("seller capability denied: {}", seller_capability.code));
    }

    // 3. Insider-trading check.
    if buyer.id == seller.id {
        return ValidationResult::fail("buyer and seller are the same partner");
    }
    if buyer.parent_partner_id == Some(seller.id) || seller.parent_partner_id == Some(buyer.id) {
        return ValidationResult::fail("buyer and seller are in a parent/branch relation");
    }
    if let (Some(a), Some(b)) = (&buyer.corporate_group_id, &seller.corporate_group_id) {
        if a == b {
            return ValidationResult::fail("buyer and seller share a corporate group");
        }
    }
    if let (Some(a), Some(b)) = (&buyer.tax_id, &seller.tax_id) {
        if a == b {
            return ValidationResult::fail("buyer and seller share a tax id");
        }
    }

    // 4. Party-links via C3.
    let links = check_party_links(buyer, seller);
    let mut warnings = Vec::new();
    if links.status == RiskStatus::Fail {
        return ValidationResult::fail(links.reason);
    }
    if links.status == RiskStatus::Warn {
        warnings.push(links.reason);
    }

    // 5. AI advisory (non-blocking).
    if requirement.ai_budget_flag {
        warnings.push("requirement carries an unrealistic AI budget flag".to_string());
    }
    if let Some(confidence) = ai_advisory_confidence {
        if *confidence < config.ai_advisory_confidence_threshold {
            warnings.push(format!("AI advisory confidence {confidence:.2} below threshold"));
        }
    }

    ValidationResult { valid: true, reasons: vec![], warnings }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityStatus;
    use crate::domain::{AvailabilityStatus, LocationSpec, PartnerStatus, PartnerType, RequirementStatus, RiskPrecheckStatus};
    use crate::ids::{AvailabilityId, CommodityId, PartnerId, RequirementId};
    use std::collections::HashMap;

    fn allowed() -> CapabilityDecision {
        CapabilityDecision { status: CapabilityStatus::Allowed, code: "ALLOWED".into(), reason: "ok".into() }
    }

    fn partner(id: PartnerId) -> Partner {
        Partner {
            id,
            legal_name: "X".into(),
            partner_type: PartnerType::Buyer,
            primary_country: "IN".into(),
            tax_id: None,
            national_id: None,
            mobile: None,
            email: None,
            rating: 4.0,
            payment_performance: 90.0,
            delivery_performance: 90.0,
            credit_limit: 100,
            credit_used: 0,
            corporate_group_id: None,
            parent_partner_id: None,
            status: PartnerStatus::Active,
            version: 1,
        }
    }

    fn requirement() -> Requirement {
        Requirement {
            id: RequirementId::new(),
            buyer_id: PartnerId::new(),
            commodity_id: CommodityId::new(),
            quantity: 50.0,
            remaining_quantity: 50.0,
            unit: "MT".into(),
            target_price: 7200,
            max_price: None,
            delivery_locations: vec![LocationSpec::registered("L1")],
            accepted_quality_params: HashMap::new(),
            valid_until: Utc::now() + chrono::Duration::days(10),
            status: RequirementStatus::Active,
            risk_precheck_status: RiskPrecheckStatus::Pass,
            ai_budget_flag: false,
            created_at: Utc::now(),
            version: 1,
        }
    }

    fn availability(commodity_id: crate::ids::CommodityId) -> Availability {
        Availability {
            id: AvailabilityId::new(),
            seller_id: PartnerId::new(),
            commodity_id,
            quantity: 60.0,
            remaining_quantity: 60.0,
            unit: "MT".into(),
            asking_price: 7150,
            min_price: None,
            origin_location: LocationSpec::registered("L1"),
            delivery_locations: vec![],
            quality_params: HashMap::new(),
            valid_until: Utc::now() + chrono::Duration::days(10),
            status: AvailabilityStatus::Available,
            created_at: Utc::now(),
            version: 1,
        }
    }

    #[test]
    fn rejects_same_partner_as_buyer_and_seller() {
        let req = requirement();
        let avail = availability(req.commodity_id);
        let shared = partner(req.buyer_id);
        let seller = partner(avail.seller_id);
        let result = validate_match(&ValidationInput {
            requirement: &req,
            availability: &avail,
            buyer: &shared,
            seller: &partner(shared.id),
            buyer_capability: &allowed(),
            seller_capability: &allowed(),
            now: Utc::now(),
            config: &CommodityConfig::default(),
            ai_advisory_confidence: None,
        });
        let _ = seller;
        assert!(!result.valid);
    }

    #[test]
    fn valid_pair_passes() {
        let req = requirement();
        let avail = availability(req.commodity_id);
        let buyer = partner(req.buyer_id);
        let seller = partner(avail.seller_id);
        let result = validate_match(&ValidationInput {
            requirement: &req,
            availability: &avail,
            buyer: &buyer,
            seller: &seller,
            buyer_capability: &allowed(),
            seller_capability: &allowed(),
            now: Utc::now(),
            config: &CommodityConfig::default(),
            ai_advisory_confidence: None,
        });
        assert!(result.valid);
    }
}
