//! Requirement (BUY order) entity.

use super::location::LocationSpec;
use crate::ids::{CommodityId, PartnerId, RequirementId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementStatus {
    Draft,
    Active,
    PartiallyFulfilled,
    Fulfilled,
    Cancelled,
    Expired,
}

impl RequirementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequirementStatus::Draft => "draft",
            RequirementStatus::Active => "active",
            RequirementStatus::PartiallyFulfilled => "partially_fulfilled",
            RequirementStatus::Fulfilled => "fulfilled",
            RequirementStatus::Cancelled => "cancelled",
            RequirementStatus::Expired => "expired",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(RequirementStatus::Draft),
            "active" => Some(RequirementStatus::Active),
            "partially_fulfilled" => Some(RequirementStatus::PartiallyFulfilled),
            "fulfilled" => Some(RequirementStatus::Fulfilled),
            "cancelled" => Some(RequirementStatus::Cancelled),
            "expired" => Some(RequirementStatus::Expired),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self,
            RequirementStatus::Draft
                | RequirementStatus::Active
                | RequirementStatus::PartiallyFulfilled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskPrecheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    pub id: RequirementId,
    pub buyer_id: PartnerId,
    pub commodity_id: CommodityId,
    pub quantity: f64,
    pub remaining_quantity: f64,
    pub unit: String,
    pub target_price: i64,
    pub max_price: Option<i64>,
    pub delivery_locations: Vec<LocationSpec>,
    pub accepted_quality_params: HashMap<String, (f64, f64)>,
    pub valid_until: DateTime<Utc>,
    pub status: RequirementStatus,
    pub risk_precheck_status: RiskPrecheckStatus,
    pub ai_budget_flag: bool,
    pub created_at: DateTime<Utc>,
    pub version: u32,
}

impl Requirement {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.valid_until
    }

    pub fn is_active_for_matching(&self, now: DateTime<Utc>) -> bool {
        self.status.is_open() && !self.is_expired(now) && self.remaining_quantity > 0.0
    }

    /// Dedup key for the unique partial index: identical
    /// (buyer, commodity, quantity, price, delivery-set, quality-params).
    pub fn dedup_key(&self) -> String {
        let mut locs: Vec<String> = self
            .delivery_locations
            .iter()
            .map(|l| format!("{l:?}"))
            .collect();
        locs.sort();
        format!(
            "{}|{}|{}|{}|{}",
            self.buyer_id,
            self.commodity_id,
            self.quantity,
            self.target_price,
            locs.join(",")
        )
    }
}
