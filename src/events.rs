//! Domain event catalogue and the handler/bus seams C10 fans out to.

use crate::ids::{AuditId, EventId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RequirementCreated,
    RequirementUpdated,
    RequirementCancelled,
    RequirementStatusChanged,
    AvailabilityCreated,
    AvailabilityUpdated,
    AvailabilityCancelled,
    AvailabilityStatusChanged,
    PartnerStatusChanged,
    MatchProposed,
    MatchNotified,
    MatchRejected,
    MatchExpired,
    NegotiationStarted,
    OfferMade,
    NegotiationAccepted,
    NegotiationRejected,
    NegotiationExpired,
    MessageSent,
    RiskWarning,
    RiskBlock,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::RequirementCreated => "RequirementCreated",
            EventType::RequirementUpdated => "RequirementUpdated",
            EventType::RequirementCancelled => "RequirementCancelled",
            EventType::RequirementStatusChanged => "RequirementStatusChanged",
            EventType::AvailabilityCreated => "AvailabilityCreated",
            EventType::AvailabilityUpdated => "AvailabilityUpdated",
            EventType::AvailabilityCancelled => "AvailabilityCancelled",
            EventType::AvailabilityStatusChanged => "AvailabilityStatusChanged",
            EventType::PartnerStatusChanged => "PartnerStatusChanged",
            EventType::MatchProposed => "MatchProposed",
            EventType::MatchNotified => "MatchNotified",
            EventType::MatchRejected => "MatchRejected",
            EventType::MatchExpired => "MatchExpired",
            EventType::NegotiationStarted => "NegotiationStarted",
            EventType::OfferMade => "OfferMade",
            EventType::NegotiationAccepted => "NegotiationAccepted",
            EventType::NegotiationRejected => "NegotiationRejected",
            EventType::NegotiationExpired => "NegotiationExpired",
            EventType::MessageSent => "MessageSent",
            EventType::RiskWarning => "RiskWarning",
            EventType::RiskBlock => "RiskBlock",
        }
    }
}

/// The envelope every outbox row is deserialized into before fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_id: EventId,
    pub occurred_at: DateTime<Utc>,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// In-process subscriber. Implementors should not block; slow work
/// belongs behind its own queue.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &DomainEvent) -> anyhow::Result<()>;
}

/// Seam for an external message bus (Kafka, SNS, ...). Not implemented
/// beyond a test double in this crate.
pub trait ExternalBus: Send + Sync {
    fn publish(&self, topic: &str, event: &DomainEvent) -> anyhow::Result<()>;
}

/// Records that a given subscriber has already processed `event_id`,
/// backing the `processed_events` table's consumer-side idempotence
/// (complementary to the Outbox's own dispatch-side retry).
#[derive(Debug, Clone)]
pub struct ProcessedEventKey {
    pub event_id: EventId,
    pub subscriber: String,
}

/// An operator-facing alert raised when an outbox row is dead-lettered.
#[derive(Debug, Clone)]
pub struct DeadLetterAlert {
    pub audit_id: AuditId,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub attempts: u32,
}
