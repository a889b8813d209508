//! Commodity entity and its export/import regulation schedules.

use crate::ids::CommodityId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegulationSchedule {
    pub license_required: bool,
    pub accepted_license_types: Vec<String>,
    pub restricted_countries: Vec<String>,
    pub minimum_export_value: Option<i64>,
    pub phytosanitary_required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commodity {
    pub id: CommodityId,
    pub name: String,
    pub category: String,
    pub export_regulations: RegulationSchedule,
    pub import_regulations: RegulationSchedule,
    pub supported_currencies: Vec<String>,
    pub quality_standards: Vec<String>,
    pub seasonal_commodity: bool,
    pub harvest_season: Option<String>,
    pub shelf_life_days: Option<u32>,
}

impl Commodity {
    pub fn supports_currency(&self, currency: &str) -> bool {
        self.supported_currencies.iter().any(|c| c == currency)
    }

    pub fn destination_restricted(&self, country: &str) -> bool {
        self.export_regulations
            .restricted_countries
            .iter()
            .any(|c| c == country)
    }
}
