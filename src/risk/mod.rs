//! Risk Engine (C3) — role/circular/duplicate/party-link checks, partner
//! and trade risk scoring, exposure monitoring.
//!
//! Assembles several single-purpose calculators behind one public API, the
//! same shape the service template's `RiskManager` uses to gather
//! `KellyCalculator`/`VaRCalculator`/`DrawdownMonitor`, generalized from
//! position-sizing risk to partner-compliance risk.

pub mod default_risk;
pub mod exposure;
pub mod party_links;

pub use default_risk::{predict_default_risk, DefaultRiskModel, DefaultRiskPrediction, RiskLevel};
pub use exposure::{monitor_exposure, ExposureZone};
pub use party_links::check_party_links;

use crate::domain::{Availability, Commodity, Partner, PartnerType, Requirement};
use crate::store::queries::OrderSide;
use crate::store::EntityStore;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskStatus {
    Pass,
    Warn,
    Fail,
}

impl RiskStatus {
    pub fn worst(self, other: RiskStatus) -> RiskStatus {
        self.max(other)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub status: RiskStatus,
    pub code: String,
    pub reason: String,
}

impl RiskAssessment {
    pub fn pass(code: &str) -> Self {
        Self { status: RiskStatus::Pass, code: code.into(), reason: "ok".into() }
    }

    pub fn warn(code: &str, reason: impl Into<String>) -> Self {
        Self { status: RiskStatus::Warn, code: code.into(), reason: reason.into() }
    }

    pub fn fail(code: &str, reason: impl Into<String>) -> Self {
        Self { status: RiskStatus::Fail, code: code.into(), reason: reason.into() }
    }
}

/// TRADER always passes here; same-day opposite-side intent is
/// caught by `check_circular_trading`.
pub fn validate_role(partner: &Partner, side: OrderSide) -> RiskAssessment {
    match (partner.partner_type, side) {
        (PartnerType::Trader, _) | (PartnerType::Internal, _) | (PartnerType::Broker, _) => {
            RiskAssessment::pass("ROLE_OK")
        }
        (PartnerType::Buyer, OrderSide::Sell) => {
            RiskAssessment::fail("ROLE_VIOLATION", "buyer partners may not hold open sell availabilities")
        }
        (PartnerType::Seller, OrderSide::Buy) => {
            RiskAssessment::fail("ROLE_VIOLATION", "seller partners may not hold open buy requirements")
        }
        (PartnerType::Transporter, _) | (PartnerType::ServiceProvider, _) => {
            RiskAssessment::fail("ROLE_VIOLATION", "this partner type may not trade directly")
        }
        _ => RiskAssessment::pass("ROLE_OK"),
    }
}

/// FAIL if an open opposite-side order exists for the same
/// partner/commodity/day. Cross-day flips are allowed.
pub fn check_circular_trading(
    store: &EntityStore,
    partner_id: crate::ids::PartnerId,
    commodity_id: crate::ids::CommodityId,
    side: OrderSide,
    date: NaiveDate,
) -> anyhow::Result<RiskAssessment> {
    let opposite = match side {
        OrderSide::Buy => OrderSide::Sell,
        OrderSide::Sell => OrderSide::Buy,
    };
    let exists = store.find_open_orders_same_day(partner_id, commodity_id, opposite, date)?;
    Ok(if exists {
        RiskAssessment::fail("CIRCULAR_TRADING", "an open opposite-side order exists for this commodity today")
    } else {
        RiskAssessment::pass("NO_CIRCULAR_TRADE")
    })
}

/// Pre-flight check mirroring the unique partial index
/// enforced atomically at write time; this just tells the caller whether a
/// write would be rejected, without attempting it.
pub fn check_duplicate(existing_dedup_keys: &[String], candidate_key: &str) -> RiskAssessment {
    if existing_dedup_keys.iter().any(|k| k == candidate_key) {
        RiskAssessment::fail("DUPLICATE_ORDER", "an identical open order already exists")
    } else {
        RiskAssessment::pass("NO_DUPLICATE")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartnerSide {
    Buyer,
    Seller,
}

/// Weighted score: credit (40), rating (30), performance (30).
/// `trade_value` is in the same minor-unit currency as `credit_limit`.
pub fn assess_partner_risk(partner: &Partner, trade_value: i64, side: PartnerSide) -> (f64, RiskAssessment) {
    let headroom = partner.credit_headroom();
    let credit_component = if headroom >= trade_value {
        40.0 * (1.0 - partner.credit_utilisation())
    } else {
        40.0 * (1.0 - partner.credit_utilisation()) * (headroom as f64 / trade_value.max(1) as f64).clamp(0.0, 1.0)
    };
    let rating_component = (partner.rating * 6.0).clamp(0.0, 30.0);
    let performance = match side {
        PartnerSide::Buyer => partner.payment_performance,
        PartnerSide::Seller => partner.delivery_performance,
    };
    let performance_component = (performance * 0.3).clamp(0.0, 30.0);

    let score = (credit_component + rating_component + performance_component).clamp(0.0, 100.0);
    let assessment = if score >= 80.0 {
        RiskAssessment::pass("PARTNER_RISK_OK")
    } else if score >= 60.0 {
        RiskAssessment::warn("PARTNER_RISK_MARGINAL", format!("partner risk score {score:.1} in WARN band"))
    } else {
        RiskAssessment::fail("PARTNER_RISK_LOW", format!("partner risk score {score:.1} below threshold"))
    };
    (score, assessment)
}

/// Combined view returned by `assess_trade_risk`, retained on the Match for
/// explainability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRiskAssessment {
    pub status: RiskStatus,
    pub reasons: Vec<String>,
    pub buyer_score: f64,
    pub seller_score: f64,
}

/// Combines buyer/seller assessment, party-links, and
/// internal-branch/group overrides; the final status is the worst
/// contributor, with party-links FAIL/internal-branch FAIL as hard
/// overrides and party-links WARN upgrading an otherwise-PASS to WARN.
pub fn assess_trade_risk(
    buyer: &Partner,
    seller: &Partner,
    requirement: &Requirement,
    availability: &Availability,
) -> TradeRiskAssessment {
    let trade_value = availability.asking_price * requirement.quantity.min(availability.quantity) as i64;
    let (buyer_score, buyer_assessment) = assess_partner_risk(buyer, trade_value, PartnerSide::Buyer);
    let (seller_score, seller_assessment) = assess_partner_risk(seller, trade_value, PartnerSide::Seller);
    let party_links = check_party_links(buyer, seller);

    let same_group = buyer
        .corporate_group_id
        .as_ref()
        .zip(seller.corporate_group_id.as_ref())
        .map(|(a, b)| a == b)
        .unwrap_or(false);
    let same_branch = buyer.parent_partner_id == Some(seller.id) || seller.parent_partner_id == Some(buyer.id);

    let mut reasons = Vec::new();
    let mut status = buyer_assessment.status.worst(seller_assessment.status);
    reasons.push(buyer_assessment.reason.clone());
    reasons.push(seller_assessment.reason.clone());

    if party_links.status == RiskStatus::Fail {
        status = RiskStatus::Fail;
        reasons.push(party_links.reason.clone());
    } else if party_links.status == RiskStatus::Warn && status == RiskStatus::Pass {
        status = RiskStatus::Warn;
        reasons.push(party_links.reason.clone());
    }

    if same_group || same_branch {
        status = RiskStatus::Fail;
        reasons.push("buyer and seller belong to the same corporate group/branch".to_string());
    }

    TradeRiskAssessment { status, reasons, buyer_score, seller_score }
}

/// International-flow checks — fixed order, short-circuit on FAIL.
pub fn assess_international_flow(
    sanctioned: bool,
    license_decision_denied: bool,
    availability_currency_ok: bool,
    commodity: &Commodity,
    phytosanitary_present: bool,
    quality_standard_met: bool,
    high_value_without_lc: bool,
) -> Vec<RiskAssessment> {
    let mut results = Vec::new();

    if sanctioned {
        results.push(RiskAssessment::fail("SANCTIONED", "destination country is sanctioned"));
        return results;
    }
    results.push(RiskAssessment::pass("SANCTIONS_OK"));

    if license_decision_denied {
        results.push(RiskAssessment::fail("EXPORT_LICENSE_MISSING", "export/import license check failed"));
        return results;
    }
    results.push(RiskAssessment::pass("LICENSE_OK"));

    if !availability_currency_ok {
        results.push(RiskAssessment::fail(
            "CURRENCY_NOT_SUPPORTED",
            "availability currency is not in the commodity's supported currencies",
        ));
        return results;
    }
    results.push(RiskAssessment::pass("CURRENCY_OK"));

    if commodity.export_regulations.phytosanitary_required && !phytosanitary_present {
        results.push(RiskAssessment::warn("PHYTOSANITARY_ADVISORY", "phytosanitary/fumigation certificate not on file"));
    }
    if !quality_standard_met {
        results.push(RiskAssessment::warn("QUALITY_STANDARD_ADVISORY", "quality standard not confirmed"));
    }
    if high_value_without_lc {
        results.push(RiskAssessment::warn(
            "PAYMENT_TERMS_ADVISORY",
            "high-value international trade without letter-of-credit support",
        ));
    }

    results
}
