//! Partner and PartnerDocument entities.

use crate::ids::{PartnerDocumentId, PartnerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartnerType {
    Buyer,
    Seller,
    Trader,
    Broker,
    Transporter,
    ServiceProvider,
    Internal,
}

impl PartnerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartnerType::Buyer => "buyer",
            PartnerType::Seller => "seller",
            PartnerType::Trader => "trader",
            PartnerType::Broker => "broker",
            PartnerType::Transporter => "transporter",
            PartnerType::ServiceProvider => "service_provider",
            PartnerType::Internal => "internal",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "buyer" => Some(PartnerType::Buyer),
            "seller" => Some(PartnerType::Seller),
            "trader" => Some(PartnerType::Trader),
            "broker" => Some(PartnerType::Broker),
            "transporter" => Some(PartnerType::Transporter),
            "service_provider" => Some(PartnerType::ServiceProvider),
            "internal" => Some(PartnerType::Internal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartnerStatus {
    Pending,
    Active,
    Suspended,
}

impl PartnerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartnerStatus::Pending => "pending",
            PartnerStatus::Active => "active",
            PartnerStatus::Suspended => "suspended",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PartnerStatus::Pending),
            "active" => Some(PartnerStatus::Active),
            "suspended" => Some(PartnerStatus::Suspended),
            _ => None,
        }
    }
}

/// A legal trading entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partner {
    pub id: PartnerId,
    pub legal_name: String,
    pub partner_type: PartnerType,
    pub primary_country: String,
    pub tax_id: Option<String>,
    pub national_id: Option<String>,
    pub mobile: Option<String>,
    pub email: Option<String>,
    pub rating: f64,
    pub payment_performance: f64,
    pub delivery_performance: f64,
    pub credit_limit: i64,
    pub credit_used: i64,
    pub corporate_group_id: Option<String>,
    pub parent_partner_id: Option<PartnerId>,
    pub status: PartnerStatus,
    pub version: u32,
}

impl Partner {
    /// Fraction of `credit_limit` currently drawn, in [0, 1] (saturating).
    pub fn credit_utilisation(&self) -> f64 {
        if self.credit_limit <= 0 {
            return 1.0;
        }
        (self.credit_used as f64 / self.credit_limit as f64).clamp(0.0, 1.0)
    }

    pub fn credit_headroom(&self) -> i64 {
        (self.credit_limit - self.credit_used).max(0)
    }

    /// Email domain, used by the party-links WARN-on-same-domain rule.
    pub fn email_domain(&self) -> Option<&str> {
        self.email.as_deref().and_then(|e| e.split('@').nth(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Gst,
    Pan,
    Iec,
    ForeignExportLicense,
    ForeignImportLicense,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Gst => "gst",
            DocumentType::Pan => "pan",
            DocumentType::Iec => "iec",
            DocumentType::ForeignExportLicense => "foreign_export_license",
            DocumentType::ForeignImportLicense => "foreign_import_license",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "gst" => Some(DocumentType::Gst),
            "pan" => Some(DocumentType::Pan),
            "iec" => Some(DocumentType::Iec),
            "foreign_export_license" => Some(DocumentType::ForeignExportLicense),
            "foreign_import_license" => Some(DocumentType::ForeignImportLicense),
            _ => None,
        }
    }
}

/// A verified (or pending) document backing a partner's trading capability
/// `ocr_data` is a free-form key→value bag from the external
/// OCR/document-verification collaborator — it is genuinely
/// unstructured input, so it stays a map rather than a typed struct, with
/// accessors for the fields this engine actually reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartnerDocument {
    pub id: PartnerDocumentId,
    pub partner_id: PartnerId,
    pub document_type: DocumentType,
    pub ocr_data: HashMap<String, String>,
    pub issue_date: DateTime<Utc>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub verified: bool,
}

impl PartnerDocument {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_date.map(|exp| exp <= now).unwrap_or(false)
    }

    /// A document is "usable" iff verified and not expired.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.verified && !self.is_expired(now)
    }

    /// Countries covered by an export/import license's `license_countries`
    /// OCR field, comma-separated, or the literal "ALL".
    pub fn license_countries(&self) -> Vec<String> {
        self.ocr_data
            .get("license_countries")
            .map(|raw| raw.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default()
    }

    pub fn covers_country(&self, country: &str) -> bool {
        let countries = self.license_countries();
        countries.iter().any(|c| c == "ALL" || c == country)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_partner() -> Partner {
        Partner {
            id: PartnerId::new(),
            legal_name: "Acme Traders".into(),
            partner_type: PartnerType::Buyer,
            primary_country: "IN".into(),
            tax_id: Some("GST123".into()),
            national_id: Some("PAN123".into()),
            mobile: Some("9999999999".into()),
            email: Some("ops@acme.com".into()),
            rating: 4.2,
            payment_performance: 90.0,
            delivery_performance: 85.0,
            credit_limit: 1_000_000,
            credit_used: 400_000,
            corporate_group_id: None,
            parent_partner_id: None,
            status: PartnerStatus::Active,
            version: 1,
        }
    }

    #[test]
    fn credit_utilisation_is_fractional() {
        let p = sample_partner();
        assert!((p.credit_utilisation() - 0.4).abs() < 1e-9);
        assert_eq!(p.credit_headroom(), 600_000);
    }

    #[test]
    fn zero_limit_is_fully_utilised() {
        let mut p = sample_partner();
        p.credit_limit = 0;
        assert_eq!(p.credit_utilisation(), 1.0);
    }

    #[test]
    fn email_domain_extraction() {
        let p = sample_partner();
        assert_eq!(p.email_domain(), Some("acme.com"));
    }

    #[test]
    fn document_usable_requires_verified_and_unexpired() {
        let now = Utc::now();
        let mut doc = PartnerDocument {
            id: PartnerDocumentId::new(),
            partner_id: PartnerId::new(),
            document_type: DocumentType::Iec,
            ocr_data: HashMap::from([("license_countries".to_string(), "US,ALL".to_string())]),
            issue_date: now,
            expiry_date: Some(now + chrono::Duration::days(30)),
            verified: true,
        };
        assert!(doc.is_usable(now));
        assert!(doc.covers_country("ANY"));

        doc.verified = false;
        assert!(!doc.is_usable(now));

        doc.verified = true;
        doc.expiry_date = Some(now - chrono::Duration::days(1));
        assert!(doc.is_expired(now));
        assert!(!doc.is_usable(now));
    }
}
