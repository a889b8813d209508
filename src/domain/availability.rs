//! Availability (SELL order) entity.

use super::location::LocationSpec;
use crate::ids::{AvailabilityId, CommodityId, PartnerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    Available,
    PartiallySold,
    SoldOut,
    Cancelled,
    Expired,
}

impl AvailabilityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvailabilityStatus::Available => "available",
            AvailabilityStatus::PartiallySold => "partially_sold",
            AvailabilityStatus::SoldOut => "sold_out",
            AvailabilityStatus::Cancelled => "cancelled",
            AvailabilityStatus::Expired => "expired",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "available" => Some(AvailabilityStatus::Available),
            "partially_sold" => Some(AvailabilityStatus::PartiallySold),
            "sold_out" => Some(AvailabilityStatus::SoldOut),
            "cancelled" => Some(AvailabilityStatus::Cancelled),
            "expired" => Some(AvailabilityStatus::Expired),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self,
            AvailabilityStatus::Available | AvailabilityStatus::PartiallySold
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Availability {
    pub id: AvailabilityId,
    pub seller_id: PartnerId,
    pub commodity_id: CommodityId,
    pub quantity: f64,
    pub remaining_quantity: f64,
    pub unit: String,
    pub asking_price: i64,
    pub min_price: Option<i64>,
    pub origin_location: LocationSpec,
    pub delivery_locations: Vec<LocationSpec>,
    pub quality_params: HashMap<String, f64>,
    pub valid_until: DateTime<Utc>,
    pub status: AvailabilityStatus,
    pub created_at: DateTime<Utc>,
    pub version: u32,
}

impl Availability {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.valid_until
    }

    pub fn is_active_for_matching(&self, now: DateTime<Utc>) -> bool {
        self.status.is_open() && !self.is_expired(now) && self.remaining_quantity > 0.0
    }

    pub fn dedup_key(&self) -> String {
        let mut locs: Vec<String> = self
            .delivery_locations
            .iter()
            .map(|l| format!("{l:?}"))
            .collect();
        locs.sort();
        format!(
            "{}|{}|{}|{}|{:?}|{}",
            self.seller_id, self.commodity_id, self.quantity, self.asking_price, self.origin_location, locs.join(",")
        )
    }
}
