//! Capability Resolver (C2) — pure function, no I/O.
//!
//! Documents and the sanctions check are passed in by the caller: both are
//! external collaborators, so this module never touches the store.

use crate::domain::{Commodity, DocumentType, Partner, PartnerDocument, PartnerType};
use crate::store::queries::OrderSide;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CapabilityStatus {
    Allowed,
    Denied,
    Warn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDecision {
    pub status: CapabilityStatus,
    pub code: String,
    pub reason: String,
}

impl CapabilityDecision {
    fn allowed() -> Self {
        Self {
            status: CapabilityStatus::Allowed,
            code: "ALLOWED".into(),
            reason: "capability check passed".into(),
        }
    }

    fn denied(code: &str, reason: impl Into<String>) -> Self {
        Self {
            status: CapabilityStatus::Denied,
            code: code.into(),
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.status == CapabilityStatus::Allowed
    }
}

/// Resolves whether `partner` may trade `commodity` on `side` between
/// `partner_country` and `trade_country`, given their verified documents.
/// Precedence, fixed: sanctions > restricted-destination >
/// missing/expired license > domestic document rules.
pub fn resolve_capability(
    partner: &Partner,
    documents: &[PartnerDocument],
    side: OrderSide,
    commodity: &Commodity,
    partner_country: &str,
    trade_country: &str,
    now: DateTime<Utc>,
    sanctioned: impl Fn(&str) -> bool,
) -> CapabilityDecision {
    if partner.partner_type == PartnerType::ServiceProvider {
        return CapabilityDecision::denied("SERVICE_PROVIDER_NOT_TRADING", "service providers may not trade");
    }

    if sanctioned(trade_country) {
        return CapabilityDecision::denied("SANCTIONED_COUNTRY", format!("{trade_country} is on the sanctions list"));
    }

    let regs = match side {
        OrderSide::Sell => &commodity.export_regulations,
        OrderSide::Buy => &commodity.import_regulations,
    };

    let is_international = partner_country != trade_country;

    if is_international && regs.restricted_countries.iter().any(|c| c == trade_country) {
        return CapabilityDecision::denied("RESTRICTED_DESTINATION", format!("{trade_country} is a restricted destination"));
    }

    if is_international {
        let license_type = match side {
            OrderSide::Sell => DocumentType::ForeignExportLicense,
            OrderSide::Buy => DocumentType::ForeignImportLicense,
        };
        let usable_license = documents
            .iter()
            .find(|d| d.document_type == license_type && d.is_usable(now));

        match usable_license {
            None => {
                if regs.license_required {
                    return CapabilityDecision::denied(
                        "EXPORT_LICENSE_MISSING",
                        "no verified, unexpired export/import license on file",
                    );
                }
                return CapabilityDecision::denied(
                    "DESTINATION_NOT_COVERED",
                    "international trade requires a verified license",
                );
            }
            Some(doc) => {
                if doc.is_expired(now) {
                    return CapabilityDecision::denied("EXPORT_LICENSE_EXPIRED", "export/import license has expired");
                }
                if !doc.covers_country(trade_country) {
                    return CapabilityDecision::denied(
                        "DESTINATION_NOT_COVERED",
                        format!("license does not cover {trade_country}"),
                    );
                }
            }
        }
        return CapabilityDecision::allowed();
    }

    // Domestic trade: partner must be domiciled in the trade country and
    // hold the domestic document set (GST + PAN, per the India worked example).
    if partner_country != trade_country {
        return CapabilityDecision::denied(
            "FOREIGN_ENTITY_DOMESTIC_TRADE",
            "foreign entities may not trade domestically in this market",
        );
    }

    let has_gst = documents
        .iter()
        .any(|d| d.document_type == DocumentType::Gst && d.is_usable(now));
    let has_pan = documents
        .iter()
        .any(|d| d.document_type == DocumentType::Pan && d.is_usable(now));

    if !has_gst || !has_pan {
        return CapabilityDecision::denied(
            "DOMESTIC_DOCUMENTS_INCOMPLETE",
            "verified GST and PAN are required for domestic trade",
        );
    }

    CapabilityDecision::allowed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PartnerStatus, RegulationSchedule};
    use crate::ids::{CommodityId, PartnerDocumentId, PartnerId};

    fn commodity() -> Commodity {
        Commodity {
            id: CommodityId::new(),
            name: "Cotton".into(),
            category: "fiber".into(),
            export_regulations: RegulationSchedule {
                license_required: true,
                accepted_license_types: vec!["IEC".into()],
                restricted_countries: vec!["XX".into()],
                minimum_export_value: None,
                phytosanitary_required: false,
            },
            import_regulations: RegulationSchedule::default(),
            supported_currencies: vec!["USD".into(), "INR".into()],
            quality_standards: vec![],
            seasonal_commodity: false,
            harvest_season: None,
            shelf_life_days: None,
        }
    }

    fn partner() -> Partner {
        Partner {
            id: PartnerId::new(),
            legal_name: "Exporter".into(),
            partner_type: PartnerType::Seller,
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

    #[test]
    fn sanctions_take_precedence_over_everything() {
        let decision = resolve_capability(
            &partner(),
            &[],
            OrderSide::Sell,
            &commodity(),
            "IN",
            "YY",
            Utc::now(),
            |c| c == "YY",
        );
        assert_eq!(decision.code, "SANCTIONED_COUNTRY");
    }

    #[test]
    fn restricted_destination_beats_missing_license() {
        let decision = resolve_capability(
            &partner(),
            &[],
            OrderSide::Sell,
            &commodity(),
            "IN",
            "XX",
            Utc::now(),
            |_| false,
        );
        assert_eq!(decision.code, "RESTRICTED_DESTINATION");
    }

    #[test]
    fn missing_export_license_denied() {
        let decision = resolve_capability(
            &partner(),
            &[],
            OrderSide::Sell,
            &commodity(),
            "IN",
            "US",
            Utc::now(),
            |_| false,
        );
        assert_eq!(decision.code, "EXPORT_LICENSE_MISSING");
    }

    #[test]
    fn valid_license_covering_all_allows() {
        let doc = PartnerDocument {
            id: PartnerDocumentId::new(),
            partner_id: partner().id,
            document_type: DocumentType::ForeignExportLicense,
            ocr_data: std::collections::HashMap::from([("license_countries".to_string(), "ALL".to_string())]),
            issue_date: Utc::now(),
            expiry_date: Some(Utc::now() + chrono::Duration::days(365)),
            verified: true,
        };
        let decision = resolve_capability(
            &partner(),
            &[doc],
            OrderSide::Sell,
            &commodity(),
            "IN",
            "US",
            Utc::now(),
            |_| false,
        );
        assert!(decision.is_allowed());
    }

    #[test]
    fn domestic_trade_requires_gst_and_pan() {
        let decision = resolve_capability(
            &partner(),
            &[],
            OrderSide::Sell,
            &commodity(),
            "IN",
            "IN",
            Utc::now(),
            |_| false,
        );
        assert_eq!(decision.code, "DOMESTIC_DOCUMENTS_INCOMPLETE");
    }
}
