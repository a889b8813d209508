//! Outbox record entity (C10).
//!
//! Written in the same transaction as the entity mutation that produced it
//! (`crate::store`'s `txn` helper); drained by the background dispatcher in
//! `crate::outbox`.

use crate::ids::OutboxId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Dispatched,
    Failed,
    DeadLettered,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Dispatched => "dispatched",
            OutboxStatus::Failed => "failed",
            OutboxStatus::DeadLettered => "dead_lettered",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OutboxStatus::Pending),
            "dispatched" => Some(OutboxStatus::Dispatched),
            "failed" => Some(OutboxStatus::Failed),
            "dead_lettered" => Some(OutboxStatus::DeadLettered),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: OutboxId,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// Backoff schedule: 10s, 30s, 90s, 300s, 600s, then dead-letter.
    pub const BACKOFF_SECONDS: [i64; 5] = [10, 30, 90, 300, 600];
    pub const MAX_ATTEMPTS: u32 = 5;

    pub fn next_backoff(attempts: u32) -> i64 {
        let idx = (attempts as usize).min(Self::BACKOFF_SECONDS.len() - 1);
        Self::BACKOFF_SECONDS[idx]
    }

    pub fn should_dead_letter(attempts: u32) -> bool {
        attempts >= Self::MAX_ATTEMPTS
    }
}
