//! Exposure monitoring (C3.8).

use crate::domain::Partner;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExposureZone {
    Green,
    Yellow,
    Red,
}

/// GREEN <60%, YELLOW 60-85%, RED >85% of `credit_limit` utilisation.
pub fn monitor_exposure(partner: &Partner) -> ExposureZone {
    let utilisation = partner.credit_utilisation();
    if utilisation > 0.85 {
        ExposureZone::Red
    } else if utilisation >= 0.60 {
        ExposureZone::Yellow
    } else {
        ExposureZone::Green
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PartnerStatus, PartnerType};
    use crate::ids::PartnerId;

    fn partner(limit: i64, used: i64) -> Partner {
        Partner {
            id: PartnerId::new(),
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
            credit_limit: limit,
            credit_used: used,
            corporate_group_id: None,
            parent_partner_id: None,
            status: PartnerStatus::Active,
            version: 1,
        }
    }

    #[test]
    fn zones_match_thresholds() {
        assert_eq!(monitor_exposure(&partner(100, 10)), ExposureZone::Green);
        assert_eq!(monitor_exposure(&partner(100, 70)), ExposureZone::Yellow);
        assert_eq!(monitor_exposure(&partner(100, 90)), ExposureZone::Red);
    }
}
