//! Party-links check (C3.5): FAIL on same national_id/tax_id, WARN
//! on same mobile or corporate email domain. Severities are fixed, not tunable.

use super::{RiskAssessment, RiskStatus};
use crate::domain::Partner;

pub fn check_party_links(buyer: &Partner, seller: &Partner) -> RiskAssessment {
    if let (Some(a), Some(b)) = (&buyer.national_id, &seller.national_id) {
        if a == b {
            return RiskAssessment::fail("SAME_PAN", "buyer and seller share the same national id");
        }
    }
    if let (Some(a), Some(b)) = (&buyer.tax_id, &seller.tax_id) {
        if a == b {
            return RiskAssessment::fail("SAME_TAX_ID", "buyer and seller share the same tax id");
        }
    }
    if let (Some(a), Some(b)) = (&buyer.mobile, &seller.mobile) {
        if a == b {
            return RiskAssessment::warn("SAME_MOBILE", "buyer and seller share the same mobile number");
        }
    }
    if let (Some(a), Some(b)) = (buyer.email_domain(), seller.email_domain()) {
        if a == b {
            return RiskAssessment::warn("SAME_EMAIL_DOMAIN", "buyer and seller share the same corporate email domain");
        }
    }
    RiskAssessment { status: RiskStatus::Pass, code: "NO_PARTY_LINKS".into(), reason: "no links found".into() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PartnerStatus, PartnerType};
    use crate::ids::PartnerId;

    fn partner(national_id: Option<&str>, tax_id: Option<&str>, mobile: Option<&str>, email: Option<&str>) -> Partner {
        Partner {
            id: PartnerId::new(),
            legal_name: "X".into(),
            partner_type: PartnerType::Buyer,
            primary_country: "IN".into(),
            tax_id: tax_id.map(String::from),
            national_id: national_id.map(String::from),
            mobile: mobile.map(String::from),
            email: email.map(String::from),
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

    #[test]
    fn same_national_id_fails() {
        let a = partner(Some("PAN1"), None, None, None);
        let b = partner(Some("PAN1"), None, None, None);
        assert_eq!(check_party_links(&a, &b).code, "SAME_PAN");
    }

    #[test]
    fn same_email_domain_warns() {
        let a = partner(Some("PAN1"), None, None, Some("ops@acme.com"));
        let b = partner(Some("PAN2"), None, None, Some("finance@acme.com"));
        let result = check_party_links(&a, &b);
        assert_eq!(result.status, RiskStatus::Warn);
        assert_eq!(result.code, "SAME_EMAIL_DOMAIN");
    }

    #[test]
    fn unrelated_partners_pass() {
        let a = partner(Some("PAN1"), Some("GST1"), Some("111"), Some("a@x.com"));
        let b = partner(Some("PAN2"), Some("GST2"), Some("222"), Some("b@y.com"));
        assert_eq!(check_party_links(&a, &b).status, RiskStatus::Pass);
    }
}
