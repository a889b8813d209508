//! Negotiation, Offer and Message entities.
//!
//! The state-machine transition logic lives in `crate::negotiation` (C9);
//! this module holds only the persisted entity shapes.

use crate::ids::{MatchId, MessageId, NegotiationId, OfferId, PartnerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    Active,
    Accepted,
    Rejected,
    Expired,
    Withdrawn,
}

impl NegotiationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationStatus::Active => "active",
            NegotiationStatus::Accepted => "accepted",
            NegotiationStatus::Rejected => "rejected",
            NegotiationStatus::Expired => "expired",
            NegotiationStatus::Withdrawn => "withdrawn",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(NegotiationStatus::Active),
            "accepted" => Some(NegotiationStatus::Accepted),
            "rejected" => Some(NegotiationStatus::Rejected),
            "expired" => Some(NegotiationStatus::Expired),
            "withdrawn" => Some(NegotiationStatus::Withdrawn),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, NegotiationStatus::Active)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Negotiation {
    pub id: NegotiationId,
    pub match_id: MatchId,
    pub buyer_id: PartnerId,
    pub seller_id: PartnerId,
    pub status: NegotiationStatus,
    pub current_price: i64,
    pub current_quantity: f64,
    pub round: u32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub version: u32,
}

impl Negotiation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn can_accept_offer(&self) -> bool {
        self.status == NegotiationStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferOrigin {
    Buyer,
    Seller,
    AiSuggested,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub negotiation_id: NegotiationId,
    pub origin: OfferOrigin,
    pub price: i64,
    pub quantity: f64,
    pub round: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageVisibility {
    Public,
    InternalOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub negotiation_id: NegotiationId,
    pub sender_id: PartnerId,
    pub body: String,
    pub visibility: MessageVisibility,
    pub created_at: DateTime<Utc>,
}
