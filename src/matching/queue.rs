//! Priority queue for the matching scheduler.
//!
//! `Ord` is composed as (priority, then enqueue time, then sequence) — the
//! same "timestamp, then tie-break fields" shape the service template uses
//! for its market-data event ordering, generalized from market-data event
//! priority to engine-event priority.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    RequirementCreated { requirement_id: crate::ids::RequirementId },
    AvailabilityCreated { availability_id: crate::ids::AvailabilityId },
    RiskStatusChanged { partner_id: crate::ids::PartnerId },
    OrderCancelled { requirement_id: Option<crate::ids::RequirementId>, availability_id: Option<crate::ids::AvailabilityId> },
    OrderUpdated { requirement_id: Option<crate::ids::RequirementId>, availability_id: Option<crate::ids::AvailabilityId> },
    SweeperTick,
}

impl SchedulerEvent {
    /// The aggregate this event touches, used for micro-batch coalescing
    /// (events touching the same requirement or availability coalesce).
    pub fn aggregate_key(&self) -> Option<String> {
        match self {
            SchedulerEvent::RequirementCreated { requirement_id } => Some(format!("req:{requirement_id}")),
            SchedulerEvent::AvailabilityCreated { availability_id } => Some(format!("avail:{availability_id}")),
            SchedulerEvent::RiskStatusChanged { partner_id } => Some(format!("partner:{partner_id}")),
            SchedulerEvent::OrderCancelled { requirement_id, availability_id }
            | SchedulerEvent::OrderUpdated { requirement_id, availability_id } => requirement_id
                .map(|id| format!("req:{id}"))
                .or_else(|| availability_id.map(|id| format!("avail:{id}"))),
            SchedulerEvent::SweeperTick => None,
        }
    }

    pub fn default_priority(&self) -> EventPriority {
        match self {
            SchedulerEvent::RequirementCreated { .. } | SchedulerEvent::AvailabilityCreated { .. } => {
                EventPriority::High
            }
            SchedulerEvent::OrderCancelled { .. } | SchedulerEvent::OrderUpdated { .. } => EventPriority::High,
            SchedulerEvent::RiskStatusChanged { .. } => EventPriority::Medium,
            SchedulerEvent::SweeperTick => EventPriority::Low,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrioritizedEvent {
    pub priority: EventPriority,
    pub enqueued_at: DateTime<Utc>,
    pub seq: u64,
    pub event: SchedulerEvent,
}

impl PrioritizedEvent {
    pub fn new(event: SchedulerEvent, seq: u64, now: DateTime<Utc>) -> Self {
        Self { priority: event.default_priority(), enqueued_at: now, seq, event }
    }
}

impl PartialEq for PrioritizedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.enqueued_at == other.enqueued_at && self.seq == other.seq
    }
}
impl Eq for PrioritizedEvent {}

impl Ord for PrioritizedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.enqueued_at.cmp(&self.enqueued_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for PrioritizedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
