//! Notification Router (C8): preference-filtered, debounced,
//! privacy-scoped fan-out of match events to end users.

pub mod debounce;

use crate::collaborators::{IdentityProvider, NotificationChannel, NotificationPreferenceProvider};
use crate::domain::{Availability, Match, Requirement};
use crate::events::{DomainEvent, EventHandler};
use crate::ids::UserId;
use crate::store::EntityStore;
use debounce::NotificationDebounce;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    Push,
    Email,
    Sms,
    InApp,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Push => "PUSH",
            Channel::Email => "EMAIL",
            Channel::Sms => "SMS",
            Channel::InApp => "IN_APP",
        }
    }
}

/// A single user's notification settings (quiet hours, channel set).
#[derive(Debug, Clone)]
pub struct NotificationPreference {
    pub opted_in: bool,
    /// `Some(n)` means "only notify me about my top-n ranked matches for a
    /// given order"; `None` means no ranking filter.
    pub top_n: Option<usize>,
    pub channels: Vec<Channel>,
}

impl Default for NotificationPreference {
    fn default() -> Self {
        Self { opted_in: true, top_n: None, channels: vec![Channel::InApp] }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientRole {
    Buyer,
    Seller,
}

/// Which `Match`es rank within a recipient's top-N for the order they own,
/// used to enforce the "notify only top-N" preference. The caller supplies
/// this (derived from `list_matches_for_requirement`/`..._for_availability`
/// ranked by `score_breakdown.composite`) since ranking needs sibling
/// matches the router itself doesn't fetch.
pub struct RankedRecipient {
    pub user_id: UserId,
    pub role: RecipientRole,
    pub rank: usize,
}

pub struct NotificationRouter {
    debounce: NotificationDebounce,
    channels: HashMap<Channel, Box<dyn NotificationChannel>>,
}

impl NotificationRouter {
    pub fn new(debounce_window: std::time::Duration) -> Self {
        Self { debounce: NotificationDebounce::new(debounce_window), channels: HashMap::new() }
    }

    pub fn register_channel(&mut self, channel: Channel, handler: Box<dyn NotificationChannel>) {
        self.channels.insert(channel, handler);
    }

    /// Builds a per-recipient, privacy-scoped payload for
    /// `MatchProposed` and dispatches it across the recipient's preferred
    /// channels, subject to opt-in, top-N ranking, and debounce.
    pub fn notify_match_proposed(
        &self,
        m: &Match,
        requirement: &Requirement,
        availability: &Availability,
        recipients: &[RankedRecipient],
        preferences: &HashMap<UserId, NotificationPreference>,
    ) -> Vec<UserId> {
        let mut notified = Vec::new();
        for recipient in recipients {
            let pref = preferences.get(&recipient.user_id).cloned().unwrap_or_default();
            if !pref.opted_in {
                continue;
            }
            if let Some(top_n) = pref.top_n {
                if recipient.rank >= top_n {
                    continue;
                }
            }
            if !self.debounce.try_acquire(recipient.user_id, "MatchProposed") {
                continue;
            }

            let payload = payload_for(m, requirement, availability, recipient.role);
            for channel in &pref.channels {
                if let Some(handler) = self.channels.get(channel) {
                    let _ = handler.send(recipient.user_id, &payload);
                }
            }
            notified.push(recipient.user_id);
        }
        notified
    }

    pub fn cleanup(&self) {
        self.debounce.cleanup();
    }
}

/// Privacy rule: a recipient only ever sees fields they're
/// authorised to see — never the counterparty's identity or aggregate
/// match counts across other orders.
fn payload_for(
    m: &Match,
    requirement: &Requirement,
    availability: &Availability,
    role: RecipientRole,
) -> serde_json::Value {
    match role {
        RecipientRole::Buyer => serde_json::json!({
            "match_id": m.id.to_string(),
            "requirement_id": requirement.id.to_string(),
            "matched_quantity": m.matched_quantity,
            "matched_price": m.matched_price,
            "score": m.score_breakdown.composite,
        }),
        RecipientRole::Seller => serde_json::json!({
            "match_id": m.id.to_string(),
            "availability_id": availability.id.to_string(),
            "matched_quantity": m.matched_quantity,
            "matched_price": m.matched_price,
            "score": m.score_breakdown.composite,
        }),
    }
}

/// Bridges the Outbox (C10) to the Notification Router: on `MatchProposed`
/// it loads the match and its two orders, resolves each side's users via
/// `IdentityProvider`, ranks the match among its siblings for the top-N
/// preference, and fans out through `NotificationRouter`.
pub struct MatchNotificationHandler {
    store: Arc<EntityStore>,
    router: Arc<Mutex<NotificationRouter>>,
    identity: Arc<dyn IdentityProvider>,
    preferences: Arc<dyn NotificationPreferenceProvider>,
    deadline: std::time::Duration,
}

impl MatchNotificationHandler {
    pub fn new(
        store: Arc<EntityStore>,
        router: Arc<Mutex<NotificationRouter>>,
        identity: Arc<dyn IdentityProvider>,
        preferences: Arc<dyn NotificationPreferenceProvider>,
        deadline: std::time::Duration,
    ) -> Self {
        Self { store, router, identity, preferences, deadline }
    }

    fn rank_among(matches: &[Match], target: crate::ids::MatchId) -> usize {
        let mut sorted = matches.to_vec();
        sorted.sort_by(|a, b| {
            b.score_breakdown.composite.partial_cmp(&a.score_breakdown.composite).unwrap_or(std::cmp::Ordering::Equal)
        });
        sorted.iter().position(|m| m.id == target).unwrap_or(0)
    }
}

impl EventHandler for MatchNotificationHandler {
    /// Bounded by its own `notification_deadline`, separate from the
    /// dispatcher's generic `publish_deadline` — fan-out resolves its own
    /// recipients and preferences first, which can be slower than a plain
    /// handler call.
    fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        let started = std::time::Instant::now();
        let result = self.handle_match_proposed(event);
        if started.elapsed() > self.deadline {
            return Err(anyhow::anyhow!(
                "match notification fan-out exceeded its deadline ({:?} > {:?})",
                started.elapsed(),
                self.deadline
            ));
        }
        result
    }
}

impl MatchNotificationHandler {
    fn handle_match_proposed(&self, event: &DomainEvent) -> anyhow::Result<()> {
        if event.event_type != "MatchProposed" {
            return Ok(());
        }
        let match_id: crate::ids::MatchId = event
            .payload
            .get("match_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("MatchProposed payload missing match_id"))?
            .parse()?;
        let Some(m) = self.store.get_match(match_id)? else { return Ok(()) };
        let Some(requirement) = self.store.get_requirement(m.requirement_id)? else { return Ok(()) };
        let Some(availability) = self.store.get_availability(m.availability_id)? else { return Ok(()) };

        let buyer_rank = Self::rank_among(&self.store.list_matches_for_requirement(requirement.id)?, m.id);
        let seller_rank = Self::rank_among(&self.store.list_matches_for_availability(availability.id)?, m.id);

        let buyer_users = self.identity.users_for_partner(requirement.buyer_id);
        let seller_users = self.identity.users_for_partner(availability.seller_id);

        let mut recipients = Vec::new();
        let mut preferences = HashMap::new();
        for user_id in buyer_users {
            preferences.insert(user_id, self.preferences.preference_for(user_id));
            recipients.push(RankedRecipient { user_id, role: RecipientRole::Buyer, rank: buyer_rank });
        }
        for user_id in seller_users {
            preferences.insert(user_id, self.preferences.preference_for(user_id));
            recipients.push(RankedRecipient { user_id, role: RecipientRole::Seller, rank: seller_rank });
        }

        let router = self.router.lock().map_err(|_| anyhow::anyhow!("notification router lock poisoned"))?;
        router.notify_match_proposed(&m, &requirement, &availability, &recipients, &preferences);
        Ok(())
    }
}
