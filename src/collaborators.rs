//! External collaborator contracts. This crate defines these traits
//! and ships only in-memory test doubles; real implementations (KYC
//! provider, OCR service, sanctions feed, notification gateways, message
//! bus) live outside this crate's scope.

use crate::domain::{Partner, PartnerDocument};
use crate::events::DomainEvent;
use crate::ids::{PartnerId, UserId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

/// Resolves a user to the partner(s)/roles they act for (the
/// `CommandContext` is built from this upstream of the engine).
pub trait IdentityProvider: Send + Sync {
    fn partner_for_user(&self, user_id: UserId) -> Option<PartnerId>;
    fn is_internal_user(&self, user_id: UserId) -> bool;
    /// Reverse of `partner_for_user`: every user authorised to receive
    /// notifications on behalf of a partner organisation.
    fn users_for_partner(&self, partner_id: PartnerId) -> Vec<UserId>;
}

/// Per-user notification settings lookup. Separate from
/// `IdentityProvider` because preference storage is a distinct concern from
/// identity/role resolution.
pub trait NotificationPreferenceProvider: Send + Sync {
    fn preference_for(&self, user_id: UserId) -> crate::notify::NotificationPreference;
}

/// `NotificationPreferenceProvider` that hands every user the default
/// preference (opted in, no ranking filter, in-app only). Used where no
/// preference store is wired up.
#[derive(Debug, Default)]
pub struct DefaultNotificationPreferences;

impl NotificationPreferenceProvider for DefaultNotificationPreferences {
    fn preference_for(&self, _user_id: UserId) -> crate::notify::NotificationPreference {
        crate::notify::NotificationPreference::default()
    }
}

/// Supplies verified documents for a partner. The Entity Store also
/// persists documents (`PartnerDocument` rows); this trait is the seam for
/// a live KYC/OCR re-verification pass ahead of a trade.
pub trait DocumentService: Send + Sync {
    fn documents_for(&self, partner_id: PartnerId) -> Vec<PartnerDocument>;
}

/// Sanctions list lookup. Implementations typically wrap a
/// periodically-refreshed external feed.
pub trait SanctionsList: Send + Sync {
    fn is_sanctioned(&self, country_code: &str) -> bool;
}

/// Outbound notification channel. One implementation per channel
/// kind (PUSH/EMAIL/SMS/IN_APP); the Notification Router picks among
/// whichever channels are registered.
pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> &'static str;
    fn send(&self, user_id: UserId, payload: &serde_json::Value) -> anyhow::Result<()>;
}

/// In-memory `SanctionsList` double backed by a fixed set, for tests.
#[derive(Debug, Default)]
pub struct StaticSanctionsList {
    sanctioned: HashSet<String>,
}

impl StaticSanctionsList {
    pub fn new(countries: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { sanctioned: countries.into_iter().map(Into::into).collect() }
    }
}

impl SanctionsList for StaticSanctionsList {
    fn is_sanctioned(&self, country_code: &str) -> bool {
        self.sanctioned.contains(country_code)
    }
}

/// In-memory `IdentityProvider` double backed by explicit maps, for tests.
#[derive(Debug, Default)]
pub struct InMemoryIdentityProvider {
    partners: HashMap<UserId, PartnerId>,
    internal_users: HashSet<UserId>,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, user_id: UserId, partner_id: PartnerId) {
        self.partners.insert(user_id, partner_id);
    }

    pub fn mark_internal(&mut self, user_id: UserId) {
        self.internal_users.insert(user_id);
    }
}

impl IdentityProvider for InMemoryIdentityProvider {
    fn partner_for_user(&self, user_id: UserId) -> Option<PartnerId> {
        self.partners.get(&user_id).copied()
    }

    fn is_internal_user(&self, user_id: UserId) -> bool {
        self.internal_users.contains(&user_id)
    }

    fn users_for_partner(&self, partner_id: PartnerId) -> Vec<UserId> {
        self.partners
            .iter()
            .filter(|(_, p)| **p == partner_id)
            .map(|(u, _)| *u)
            .collect()
    }
}

/// In-memory `DocumentService` double backed by a partner→documents map.
#[derive(Debug, Default)]
pub struct InMemoryDocumentService {
    by_partner: HashMap<PartnerId, Vec<PartnerDocument>>,
}

impl InMemoryDocumentService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, document: PartnerDocument) {
        self.by_partner.entry(document.partner_id).or_default().push(document);
    }
}

impl DocumentService for InMemoryDocumentService {
    fn documents_for(&self, partner_id: PartnerId) -> Vec<PartnerDocument> {
        self.by_partner.get(&partner_id).cloned().unwrap_or_default()
    }
}

/// In-memory `NotificationChannel` double that records sent payloads for
/// assertions in integration tests instead of actually dispatching.
pub struct RecordingNotificationChannel {
    kind: &'static str,
    sent: Mutex<Vec<(UserId, serde_json::Value)>>,
}

impl RecordingNotificationChannel {
    pub fn new(kind: &'static str) -> Self {
        Self { kind, sent: Mutex::new(Vec::new()) }
    }

    pub fn sent(&self) -> Vec<(UserId, serde_json::Value)> {
        self.sent.lock().clone()
    }
}

impl NotificationChannel for RecordingNotificationChannel {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn send(&self, user_id: UserId, payload: &serde_json::Value) -> anyhow::Result<()> {
        self.sent.lock().push((user_id, payload.clone()));
        Ok(())
    }
}

/// In-memory `EventHandler`/`ExternalBus` double that records every
/// published event, used by integration tests to assert the catalogue
/// fired in the expected order.
pub struct RecordingBus {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self { events: Mutex::new(Vec::new()) }
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().clone()
    }
}

impl Default for RecordingBus {
    fn default() -> Self {
        Self::new()
    }
}

impl crate::events::EventHandler for RecordingBus {
    fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

impl crate::events::ExternalBus for RecordingBus {
    fn publish(&self, _topic: &str, event: &DomainEvent) -> anyhow::Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
