//! The scheduler itself: priority queue, bounded parallelism, micro-batch
//! coalescing, sweeper, and the per-event matching pipeline.

use super::allocation::{allocate, AllocationInput};
use super::queue::{EventPriority, PrioritizedEvent, SchedulerEvent};
use crate::capability::{resolve_capability, CapabilityDecision};
use crate::collaborators::SanctionsList;
use crate::config::CommodityConfigTable;
use crate::domain::{Availability, Match, Partner, PartnerType, Requirement};
use crate::ids::{AvailabilityId, CommodityId, RequirementId};
use crate::location::{candidates_for_availability, candidates_for_requirement};
use crate::risk::{assess_trade_risk, RiskStatus};
use crate::scoring::score_pair;
use crate::store::queries::OrderSide;
use crate::store::EntityStore;
use crate::validator::{validate_match, ValidationInput};
use chrono::Utc;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tracing::{debug, warn};

/// Matches proposed within this window, scored within 5% of each other on
/// the same (requirement, buyer, seller) triple, are suppressed as
/// duplicates.
const DUPLICATE_SUPPRESSION_WINDOW_SECS: i64 = 300;
const DUPLICATE_SCORE_SIMILARITY: f64 = 0.95;

pub struct MatchingScheduler {
    store: Arc<EntityStore>,
    commodity_configs: Arc<std::sync::RwLock<CommodityConfigTable>>,
    sanctions: Arc<dyn SanctionsList>,
    queue: AsyncMutex<BinaryHeap<PrioritizedEvent>>,
    semaphore: Arc<Semaphore>,
    seq: AtomicU64,
    pending_debounce: AsyncMutex<HashMap<String, chrono::DateTime<Utc>>>,
    micro_batch_window: std::time::Duration,
    backpressure_threshold: usize,
    allocation_top_n: usize,
    allocation_max_retries: u32,
}

impl MatchingScheduler {
    pub fn new(
        store: Arc<EntityStore>,
        commodity_configs: Arc<std::sync::RwLock<CommodityConfigTable>>,
        sanctions: Arc<dyn SanctionsList>,
        concurrency: usize,
        micro_batch_window: std::time::Duration,
        backpressure_threshold: usize,
        allocation_top_n: usize,
        allocation_max_retries: u32,
    ) -> Self {
        Self {
            store,
            commodity_configs,
            sanctions,
            queue: AsyncMutex::new(BinaryHeap::new()),
            semaphore: Arc::new(Semaphore::new(concurrency)),
            seq: AtomicU64::new(0),
            pending_debounce: AsyncMutex::new(HashMap::new()),
            micro_batch_window,
            backpressure_threshold,
            allocation_top_n,
            allocation_max_retries,
        }
    }

    /// Enqueues an event, applying the backpressure rule: past the
    /// configured queue-depth threshold, LOW events are dropped with a
    /// `DeferredToSweeper` audit entry; MEDIUM/HIGH are never dropped
    /// exponential backoff.
    pub async fn enqueue(&self, event: SchedulerEvent) {
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.backpressure_threshold && event.default_priority() == EventPriority::Low {
            drop(queue);
            let _ = self.store.record_audit(
                "scheduler",
                "queue",
                "DeferredToSweeper",
                None,
                serde_json::json!({ "reason": "queue depth over backpressure threshold" }),
            );
            return;
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        queue.push(PrioritizedEvent::new(event, seq, Utc::now()));
    }

    /// Drains the queue once, coalescing events that share an aggregate key
    /// within `micro_batch_window`, then processes each distinct aggregate
    /// with bounded parallelism. Intended to be called in a loop from a
    /// `tokio::spawn`ed task.
    pub async fn drain_once(self: &Arc<Self>) {
        let batch = self.coalesce().await;
        let mut handles = Vec::new();
        for event in batch {
            let scheduler = self.clone();
            let permit = scheduler.semaphore.clone().acquire_owned().await;
            // `process_event` is CPU-only except for the allocation retry
            // backoff, which sleeps the thread (exponential backoff
            // is expressed as a blocking retry loop); run it off the Tokio
            // worker pool so a contended allocation never stalls other
            // in-flight matches (suspension points, not CPU work, may
            // block a handler).
            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                scheduler.process_event(event);
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Pops everything currently queued, deduplicating to the most recent
    /// event per aggregate key within the micro-batch window.
    async fn coalesce(&self) -> Vec<SchedulerEvent> {
        let mut queue = self.queue.lock().await;
        if queue.is_empty() {
            return Vec::new();
        }
        let mut pending = self.pending_debounce.lock().await;
        let now = Utc::now();
        let mut ordered = Vec::new();
        let mut seen_keys: HashMap<String, usize> = HashMap::new();

        while let Some(item) = queue.pop() {
            match item.event.aggregate_key() {
                Some(key) => {
                    let last_seen = pending.get(&key).copied();
                    let within_window = last_seen
                        .map(|t| now.signed_duration_since(t).num_milliseconds() < self.micro_batch_window.as_millis() as i64)
                        .unwrap_or(false);
                    pending.insert(key.clone(), now);
                    if within_window {
                        if let Some(&idx) = seen_keys.get(&key) {
                            ordered[idx] = item.event;
                            continue;
                        }
                    }
                    seen_keys.insert(key, ordered.len());
                    ordered.push(item.event);
                }
                None => ordered.push(item.event),
            }
        }
        ordered
    }

    fn process_event(&self, event: SchedulerEvent) {
        let result = match event {
            SchedulerEvent::RequirementCreated { requirement_id } => self.match_requirement(requirement_id),
            SchedulerEvent::OrderUpdated { requirement_id: Some(id), .. } => self.match_requirement(id),
            SchedulerEvent::AvailabilityCreated { availability_id } => self.match_availability(availability_id),
            SchedulerEvent::OrderUpdated { availability_id: Some(id), .. } => self.match_availability(id),
            SchedulerEvent::RiskStatusChanged { partner_id } => self.reevaluate_partner(partner_id),
            SchedulerEvent::OrderCancelled { .. } => Ok(()),
            SchedulerEvent::SweeperTick => self.sweep(),
            SchedulerEvent::OrderUpdated { .. } => Ok(()),
        };
        if let Err(err) = result {
            warn!(error = %err, "matching pipeline failed for event");
        }
    }

    /// Safety-net sweep: re-scans every still-open Requirement and
    /// re-matches it directly (the same work `RequirementCreated` would
    /// trigger), and separately drives expired negotiations to their
    /// terminal state. Callers wire this to a `tokio::time::interval` task
    /// at `sweeper_interval`.
    fn sweep(&self) -> anyhow::Result<()> {
        let requirements = self.store.list_open_requirements()?;
        debug!(count = requirements.len(), "sweeper tick: re-scanning open requirements");
        for requirement in requirements {
            if let Err(err) = self.match_requirement(requirement.id) {
                warn!(requirement_id = %requirement.id, error = %err, "sweeper re-match failed");
            }
        }
        self.expire_negotiations()
    }

    /// Transitions every ACTIVE negotiation past its TTL to EXPIRED.
    fn expire_negotiations(&self) -> anyhow::Result<()> {
        let now = Utc::now();
        for negotiation in self.store.list_active_negotiations()? {
            if let Some(expired) = crate::negotiation::tick(&negotiation, now) {
                let expected_version = negotiation.version;
                if let Err(err) = self.store.update_negotiation(&expired, expected_version, None, "NegotiationExpired") {
                    warn!(negotiation_id = %negotiation.id, error = %err, "failed to persist negotiation expiry");
                }
            }
        }
        Ok(())
    }

    /// Handler for `RiskStatusChanged`/`PartnerStatusChanged`: a partner
    /// whose risk status or standing changed may no longer be eligible to
    /// match, so every open order on the opposite side of its own orders
    /// needs re-evaluating against it. Cheapest correct approach is to
    /// re-drive the normal per-order matching pipeline for everything it
    /// still has open; a suspended/blocked partner's own orders are no
    /// longer active-for-matching so this naturally becomes a no-op for
    /// them, while counterparties considering it get re-scored on their own
    /// next tick (triggered here for any of its own still-open orders).
    fn reevaluate_partner(&self, partner_id: crate::ids::PartnerId) -> anyhow::Result<()> {
        for requirement in self.store.list_open_requirements_for_buyer(partner_id)? {
            if let Err(err) = self.match_requirement(requirement.id) {
                warn!(requirement_id = %requirement.id, error = %err, "re-evaluation failed for partner's requirement");
            }
        }
        for availability in self.store.list_open_availabilities_for_seller(partner_id)? {
            if let Err(err) = self.match_availability(availability.id) {
                warn!(availability_id = %availability.id, error = %err, "re-evaluation failed for partner's availability");
            }
        }
        Ok(())
    }

    /// The pipeline driven from the Requirement side: C4 candidates →
    /// C6/C3 bilateral validation → C5 score → rank → atomic allocate top-N.
    fn match_requirement(&self, requirement_id: RequirementId) -> anyhow::Result<()> {
        let Some(requirement) = self.store.get_requirement(requirement_id)? else {
            return Ok(());
        };
        if !requirement.is_active_for_matching(Utc::now()) {
            return Ok(());
        }
        let configs = self.commodity_configs.read().unwrap();
        let config = configs.resolve(&requirement.commodity_id.to_string()).clone();
        drop(configs);

        let candidates = candidates_for_requirement(&self.store, &requirement, config.max_km)?;
        self.score_and_allocate(&requirement, candidates, &config)
    }

    /// The symmetric pipeline driven from the Availability side.
    fn match_availability(&self, availability_id: AvailabilityId) -> anyhow::Result<()> {
        let Some(availability) = self.store.get_availability(availability_id)? else {
            return Ok(());
        };
        if !availability.is_active_for_matching(Utc::now()) {
            return Ok(());
        }
        let configs = self.commodity_configs.read().unwrap();
        let config = configs.resolve(&availability.commodity_id.to_string()).clone();
        drop(configs);

        let candidates = candidates_for_availability(&self.store, &availability, config.max_km)?;
        for requirement in candidates {
            if !requirement.is_active_for_matching(Utc::now()) {
                continue;
            }
            self.score_and_allocate(&requirement, vec![availability.clone()], &config)?;
        }
        Ok(())
    }

    fn score_and_allocate(
        &self,
        requirement: &Requirement,
        candidates: Vec<Availability>,
        config: &crate::config::CommodityConfig,
    ) -> anyhow::Result<()> {
        let Some(buyer) = self.store.get_partner(requirement.buyer_id)? else {
            return Ok(());
        };
        let Some(commodity) = self.store.get_commodity(requirement.commodity_id)? else {
            return Ok(());
        };
        let buyer_documents = self.store.list_partner_documents(buyer.id)?;
        let now = Utc::now();

        let mut ranked: Vec<(Availability, crate::domain::ScoreBreakdown, crate::domain::RiskDecision, Vec<String>)> = Vec::new();

        for availability in candidates {
            if availability.commodity_id != requirement.commodity_id {
                continue;
            }
            let Some(seller) = self.store.get_partner(availability.seller_id)? else {
                continue;
            };
            let seller_documents = self.store.list_partner_documents(seller.id)?;

            let buyer_capability = resolve_capability(
                &buyer,
                &buyer_documents,
                OrderSide::Buy,
                &commodity,
                &buyer.primary_country,
                &seller.primary_country,
                now,
                |c| self.sanctions.is_sanctioned(c),
            );
            let seller_capability = resolve_capability(
                &seller,
                &seller_documents,
                OrderSide::Sell,
                &commodity,
                &seller.primary_country,
                &buyer.primary_country,
                now,
                |c| self.sanctions.is_sanctioned(c),
            );

            let validation = validate_match(&ValidationInput {
                requirement,
                availability: &availability,
                buyer: &buyer,
                seller: &seller,
                buyer_capability: &buyer_capability,
                seller_capability: &seller_capability,
                now,
                config,
                ai_advisory_confidence: None,
            });
            if !validation.valid {
                self.store.record_audit(
                    "match_attempt",
                    &format!("{}:{}", requirement.id, availability.id),
                    "rejected",
                    None,
                    serde_json::json!({ "reasons": validation.reasons }),
                )?;
                continue;
            }

            let trade_risk = assess_trade_risk(&buyer, &seller, requirement, &availability);
            if trade_risk.status == RiskStatus::Fail {
                self.store.record_audit(
                    "match_attempt",
                    &format!("{}:{}", requirement.id, availability.id),
                    "risk_block",
                    None,
                    serde_json::json!({ "reasons": trade_risk.reasons }),
                )?;
                continue;
            }

            let capability_ok = buyer_capability.is_allowed() && seller_capability.is_allowed();
            if !capability_ok {
                continue;
            }

            let breakdown = score_pair(requirement, &availability, trade_risk.status, config, false);
            if breakdown.composite < config.min_score {
                continue;
            }

            let risk_decision = match trade_risk.status {
                RiskStatus::Pass => crate::domain::RiskDecision::Pass,
                RiskStatus::Warn => crate::domain::RiskDecision::Warn,
                RiskStatus::Fail => crate::domain::RiskDecision::Block,
            };
            let mut reasons = trade_risk.reasons.clone();
            reasons.extend(validation.warnings.clone());
            ranked.push((availability, breakdown, risk_decision, reasons));
        }

        ranked.sort_by(|a, b| b.1.composite.partial_cmp(&a.1.composite).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(self.allocation_top_n);

        for (availability, breakdown, risk_decision, reasons) in ranked {
            if self.is_duplicate(requirement.id, availability.id, breakdown.composite)? {
                continue;
            }
            let outcome = allocate(AllocationInput {
                requirement_id: requirement.id,
                availability_id: availability.id,
                matched_quantity: requirement.remaining_quantity.min(availability.remaining_quantity),
                matched_price: availability.asking_price,
                score_breakdown: breakdown,
                risk_decision,
                risk_reasons: reasons,
                max_retries: self.allocation_max_retries,
                store: &self.store,
            });
            match outcome {
                Ok(Some(_m)) => {}
                Ok(None) => debug!("allocation skipped (conflict exhausted or already filled)"),
                Err(err) => warn!(error = %err.reason, code = %err.code, "allocation rejected"),
            }
        }
        Ok(())
    }

    /// Duplicate-match suppression: a Match on the same (requirement,
    /// availability) within the window, scored within 5% of the candidate
    /// score, is treated as a repeat rather than proposed again.
    fn is_duplicate(&self, requirement_id: RequirementId, availability_id: AvailabilityId, score: f64) -> anyhow::Result<bool> {
        let recent = self
            .store
            .recent_matches_for_triple(requirement_id, availability_id, DUPLICATE_SUPPRESSION_WINDOW_SECS)?;
        Ok(recent.iter().any(|m: &Match| {
            let diff = (m.score_breakdown.composite - score).abs();
            diff <= (1.0 - DUPLICATE_SCORE_SIMILARITY)
        }))
    }
}

/// Role check applied ahead of matching: only Buyer/Seller/Trader/
/// Internal/Broker may hold open orders on the relevant side. Exposed for
/// callers creating Requirements/Availabilities (engine.rs), since the
/// scheduler itself assumes the order already passed this gate at creation.
pub fn validate_order_role(partner: &Partner, side: OrderSide) -> bool {
    matches!(
        (partner.partner_type, side),
        (PartnerType::Trader, _)
            | (PartnerType::Internal, _)
            | (PartnerType::Broker, _)
            | (PartnerType::Buyer, OrderSide::Buy)
            | (PartnerType::Seller, OrderSide::Sell)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::StaticSanctionsList;
    use crate::config::CommodityConfigTable;

    #[tokio::test]
    async fn enqueue_drops_low_priority_past_backpressure_threshold() {
        let store = Arc::new(EntityStore::in_memory().unwrap());
        let configs = Arc::new(std::sync::RwLock::new(CommodityConfigTable::empty()));
        let sanctions: Arc<dyn SanctionsList> = Arc::new(StaticSanctionsList::new(Vec::<String>::new()));
        let scheduler = Arc::new(MatchingScheduler::new(store, configs, sanctions, 4, std::time::Duration::from_millis(1), 1, 5, 3));
        for _ in 0..2 {
            scheduler.enqueue(SchedulerEvent::SweeperTick).await;
        }
        let queue = scheduler.queue.lock().await;
        assert!(queue.len() <= 1);
    }
}
