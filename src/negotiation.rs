//! Negotiation State Machine (C9).
//!
//! Modeled the way the service template's `backtest_v2::oms::OmsOrder`
//! models an order's lifecycle — an explicit state enum with
//! `is_terminal`/`can_*` predicates and transition methods on the entity —
//! generalized here to return `Result<(), EngineError>` instead of
//! panicking, so callers get a `code`.

use crate::domain::{Message, MessageVisibility, Negotiation, NegotiationStatus, Offer, OfferOrigin};
use crate::error::{EngineError, ErrorCode};
use crate::ids::{MessageId, NegotiationId, OfferId, PartnerId};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Buyer,
    Seller,
    Internal,
}

fn actor_role(negotiation: &Negotiation, actor_id: PartnerId, is_internal: bool) -> Option<Actor> {
    if is_internal {
        return Some(Actor::Internal);
    }
    if negotiation.buyer_id == actor_id {
        Some(Actor::Buyer)
    } else if negotiation.seller_id == actor_id {
        Some(Actor::Seller)
    } else {
        None
    }
}

/// Authorisation rule: external users may only act on negotiations
/// where they are buyer or seller; internal users get read-only access —
/// they can observe but never call a mutating transition.
pub fn authorize(
    negotiation: &Negotiation,
    actor_id: PartnerId,
    is_internal: bool,
) -> Result<Actor, EngineError> {
    match actor_role(negotiation, actor_id, is_internal) {
        Some(Actor::Internal) => Err(EngineError::unauthorized("internal users have read-only access to negotiations")),
        Some(role) => Ok(role),
        None => Err(EngineError::unauthorized("actor is not a party to this negotiation")),
    }
}

/// Starts a new Negotiation at round 1 with the initiator's opening Offer
/// accepting the terms of its parent Match.
pub fn start(
    match_id: crate::ids::MatchId,
    buyer_id: PartnerId,
    seller_id: PartnerId,
    initiator_id: PartnerId,
    opening_price: i64,
    opening_quantity: f64,
    ttl: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<(Negotiation, Offer), EngineError> {
    let origin = if initiator_id == buyer_id {
        OfferOrigin::Buyer
    } else if initiator_id == seller_id {
        OfferOrigin::Seller
    } else {
        return Err(EngineError::unauthorized("initiator must be the buyer or seller of the underlying orders"));
    };

    let negotiation = Negotiation {
        id: NegotiationId::new(),
        match_id,
        buyer_id,
        seller_id,
        status: NegotiationStatus::Active,
        current_price: opening_price,
        current_quantity: opening_quantity,
        round: 1,
        expires_at: now + ttl,
        created_at: now,
        version: 1,
    };
    let offer = Offer {
        id: OfferId::new(),
        negotiation_id: negotiation.id,
        origin,
        price: opening_price,
        quantity: opening_quantity,
        round: 1,
        created_at: now,
    };
    Ok((negotiation, offer))
}

/// Records a counter-offer. Fails `NotActive` if the
/// negotiation has already reached a terminal state or expired, and
/// `SelfBidding` if `actor` is the same side that made the previous round's
/// offer (the actor of round N+1 must differ from the actor of
/// round N").
pub fn offer(
    negotiation: &Negotiation,
    actor_id: PartnerId,
    is_internal: bool,
    last_offer_origin: OfferOrigin,
    price: i64,
    quantity: f64,
    now: DateTime<Utc>,
) -> Result<(Negotiation, Offer), EngineError> {
    let role = authorize(negotiation, actor_id, is_internal)?;
    if !negotiation.can_accept_offer() || negotiation.is_expired(now) {
        return Err(EngineError::new(ErrorCode::NotActive, "negotiation is not active"));
    }

    let origin = match role {
        Actor::Buyer => OfferOrigin::Buyer,
        Actor::Seller => OfferOrigin::Seller,
        Actor::Internal => unreachable!("authorize rejects internal actors"),
    };
    if origin == last_offer_origin {
        return Err(EngineError::new(ErrorCode::SelfBidding, "the same side may not make two consecutive offers"));
    }

    let mut next = negotiation.clone();
    next.current_price = price;
    next.current_quantity = quantity;
    next.round += 1;
    next.version += 1;

    let new_offer = Offer {
        id: OfferId::new(),
        negotiation_id: negotiation.id,
        origin,
        price,
        quantity,
        round: next.round,
        created_at: now,
    };
    Ok((next, new_offer))
}

/// Tracks which side made the last Offer, since `accept` may only be
/// called by the side that did NOT make it. The caller supplies
/// this (derived from `list_offers`) since the `Negotiation` entity itself
/// doesn't carry per-offer origin.
pub fn accept(
    negotiation: &Negotiation,
    actor_id: PartnerId,
    is_internal: bool,
    last_offer_origin: OfferOrigin,
    now: DateTime<Utc>,
) -> Result<Negotiation, EngineError> {
    let role = authorize(negotiation, actor_id, is_internal)?;

    if negotiation.status == NegotiationStatus::Accepted {
        // Idempotent terminal re-application.
        return Ok(negotiation.clone());
    }
    if !negotiation.can_accept_offer() || negotiation.is_expired(now) {
        return Err(EngineError::new(ErrorCode::NotActive, "negotiation is not active"));
    }

    let made_last_offer = matches!(
        (role, last_offer_origin),
        (Actor::Buyer, OfferOrigin::Buyer) | (Actor::Seller, OfferOrigin::Seller)
    );
    if made_last_offer {
        return Err(EngineError::unauthorized("the party who made the last offer cannot accept it"));
    }

    let mut next = negotiation.clone();
    next.status = NegotiationStatus::Accepted;
    next.version += 1;
    Ok(next)
}

/// `reject`: ACTIVE → REJECTED, idempotent on repeat by the same
/// actor in the same terminal state.
pub fn reject(
    negotiation: &Negotiation,
    actor_id: PartnerId,
    is_internal: bool,
    now: DateTime<Utc>,
) -> Result<Negotiation, EngineError> {
    authorize(negotiation, actor_id, is_internal)?;
    if negotiation.status == NegotiationStatus::Rejected {
        return Ok(negotiation.clone());
    }
    if !negotiation.can_accept_offer() || negotiation.is_expired(now) {
        return Err(EngineError::new(ErrorCode::NotActive, "negotiation is not active"));
    }
    let mut next = negotiation.clone();
    next.status = NegotiationStatus::Rejected;
    next.version += 1;
    Ok(next)
}

/// `withdraw`: ACTIVE → WITHDRAWN, initiator-only, idempotent on
/// repeat.
pub fn withdraw(
    negotiation: &Negotiation,
    initiator_id: PartnerId,
    is_internal: bool,
    now: DateTime<Utc>,
) -> Result<Negotiation, EngineError> {
    authorize(negotiation, initiator_id, is_internal)?;
    if negotiation.status == NegotiationStatus::Withdrawn {
        return Ok(negotiation.clone());
    }
    if !negotiation.can_accept_offer() || negotiation.is_expired(now) {
        return Err(EngineError::new(ErrorCode::NotActive, "negotiation is not active"));
    }
    let mut next = negotiation.clone();
    next.status = NegotiationStatus::Withdrawn;
    next.version += 1;
    Ok(next)
}

/// Sweeper-driven expiry transition: ACTIVE → EXPIRED once past
/// `expires_at`, driven by the background sweeper.
pub fn tick(negotiation: &Negotiation, now: DateTime<Utc>) -> Option<Negotiation> {
    if negotiation.can_accept_offer() && negotiation.is_expired(now) {
        let mut next = negotiation.clone();
        next.status = NegotiationStatus::Expired;
        next.version += 1;
        Some(next)
    } else {
        None
    }
}

/// A non-binding AI-suggested counter-offer. Never mutates state.
#[derive(Debug, Clone)]
pub struct SuggestedCounter {
    pub price: i64,
    pub quantity: f64,
    pub confidence: f64,
    pub rationale: String,
}

/// Splits the difference between the current offer and the negotiation's
/// opening price, biased slightly toward the midpoint — a conservative
/// placeholder for a real pricing model (a `DefaultRiskModel`-style
/// seam: this crate ships only the rule-based version).
pub fn ai_suggest_counter(negotiation: &Negotiation, opening_price: i64) -> SuggestedCounter {
    let midpoint = (negotiation.current_price + opening_price) as f64 / 2.0;
    SuggestedCounter {
        price: midpoint.round() as i64,
        quantity: negotiation.current_quantity,
        confidence: 0.5,
        rationale: "midpoint of current offer and opening price".to_string(),
    }
}

pub fn post_message(
    negotiation_id: NegotiationId,
    sender_id: PartnerId,
    body: String,
    visibility: MessageVisibility,
    now: DateTime<Utc>,
) -> Message {
    Message {
        id: MessageId::new(),
        negotiation_id,
        sender_id,
        body,
        visibility,
        created_at: now,
    }
}
