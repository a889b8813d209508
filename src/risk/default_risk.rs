//! Default-risk prediction (C3.7). The ML model service is an
//! external collaborator; `DefaultRiskModel` is the seam a real model
//! plugs into later. Only the rule-based fallback ships in this crate.

use crate::domain::Partner;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultRiskPrediction {
    pub probability: f64,
    pub risk_level: RiskLevel,
    pub confidence: String,
    pub factors: Vec<String>,
}

/// Additional context C3.7 considers beyond the Partner record itself.
#[derive(Debug, Clone, Default)]
pub struct DefaultRiskContext {
    pub trade_history_count: u32,
    pub dispute_rate: f64,
    pub avg_payment_delay_days: f64,
    pub avg_trade_value: i64,
}

/// Seam for a real ML model service. Not implemented by this crate beyond
/// the rule-based fallback.
pub trait DefaultRiskModel: Send + Sync {
    fn predict(&self, partner: &Partner, context: &DefaultRiskContext) -> DefaultRiskPrediction;
}

pub struct RuleBasedDefaultRiskModel;

impl DefaultRiskModel for RuleBasedDefaultRiskModel {
    fn predict(&self, partner: &Partner, context: &DefaultRiskContext) -> DefaultRiskPrediction {
        predict_default_risk(partner, context)
    }
}

/// Deterministically derives a risk level from the rule-based score used by
/// `assess_partner_risk`, declaring `confidence = "low"` since no trained
/// model backs this path: a deterministic score is an acceptable stand-in
/// when no trained model is available.
pub fn predict_default_risk(partner: &Partner, context: &DefaultRiskContext) -> DefaultRiskPrediction {
    let utilisation = partner.credit_utilisation();
    let mut factors = vec![format!("credit_utilisation={:.2}", utilisation)];

    let mut probability = utilisation * 0.4;
    probability += (1.0 - partner.rating / 5.0) * 0.2;
    probability += (1.0 - partner.payment_performance / 100.0) * 0.2;
    probability += context.dispute_rate.clamp(0.0, 1.0) * 0.1;
    probability += (context.avg_payment_delay_days / 90.0).clamp(0.0, 1.0) * 0.1;
    probability = probability.clamp(0.0, 1.0);

    factors.push(format!("rating={:.1}", partner.rating));
    factors.push(format!("payment_performance={:.1}", partner.payment_performance));
    factors.push(format!("dispute_rate={:.2}", context.dispute_rate));
    factors.push(format!("avg_payment_delay_days={:.1}", context.avg_payment_delay_days));
    factors.push(format!("trade_history_count={}", context.trade_history_count));

    let risk_level = if probability < 0.25 {
        RiskLevel::Low
    } else if probability < 0.5 {
        RiskLevel::Medium
    } else if probability < 0.75 {
        RiskLevel::High
    } else {
        RiskLevel::Critical
    };

    DefaultRiskPrediction {
        probability,
        risk_level,
        confidence: "low".to_string(),
        factors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PartnerStatus, PartnerType};
    use crate::ids::PartnerId;

    #[test]
    fn high_utilisation_and_low_rating_means_higher_risk() {
        let weak = Partner {
            id: PartnerId::new(),
            legal_name: "Weak".into(),
            partner_type: PartnerType::Buyer,
            primary_country: "IN".into(),
            tax_id: None,
            national_id: None,
            mobile: None,
            email: None,
            rating: 1.0,
            payment_performance: 40.0,
            delivery_performance: 40.0,
            credit_limit: 100,
            credit_used: 95,
            corporate_group_id: None,
            parent_partner_id: None,
            status: PartnerStatus::Active,
            version: 1,
        };
        let strong = Partner { rating: 4.8, payment_performance: 98.0, credit_used: 10, ..weak.clone() };
        let weak_pred = predict_default_risk(&weak, &DefaultRiskContext::default());
        let strong_pred = predict_default_risk(&strong, &DefaultRiskContext::default());
        assert!(weak_pred.probability > strong_pred.probability);
        assert_eq!(weak_pred.confidence, "low");
    }
}
