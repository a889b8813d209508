//! Outbox dispatcher (C10): polls undispatched records, fans them
//! out to in-process subscribers and the external bus, retries with
//! exponential backoff, and dead-letters after too many failures.
//!
//! Background-task shape follows the service template's `tokio::spawn` +
//! `tokio::time::interval` loop idiom (see `main.rs`'s latency/throughput
//! snapshot tasks), generalized from a metrics snapshot tick to an outbox
//! claim-and-publish tick.

use crate::domain::{OutboxRecord, OutboxStatus};
use crate::events::{DomainEvent, EventHandler, ExternalBus};
use crate::ids::EventId;
use crate::store::EntityStore;
use anyhow::anyhow;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, warn};

pub struct OutboxDispatcher {
    store: Arc<EntityStore>,
    handlers: Vec<Box<dyn EventHandler>>,
    bus: Option<Box<dyn ExternalBus>>,
    batch_size: usize,
    max_attempts: u32,
    backoff_schedule: Vec<Duration>,
    publish_deadline: Duration,
    db_deadline: Duration,
}

impl OutboxDispatcher {
    pub fn new(
        store: Arc<EntityStore>,
        backoff_schedule: Vec<Duration>,
        max_attempts: u32,
        publish_deadline: Duration,
        db_deadline: Duration,
    ) -> Self {
        Self {
            store,
            handlers: Vec::new(),
            bus: None,
            batch_size: 50,
            max_attempts,
            backoff_schedule,
            publish_deadline,
            db_deadline,
        }
    }

    pub fn register_handler(&mut self, handler: Box<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn set_bus(&mut self, bus: Box<dyn ExternalBus>) {
        self.bus = Some(bus);
    }

    /// Runs the poll loop forever on the current Tokio runtime. Call via
    /// `tokio::spawn` from `Engine::bootstrap`. Each tick's claim-and-publish
    /// work is blocking (synchronous SQLite + synchronous handlers), so it
    /// runs on the blocking pool rather than stalling this worker thread —
    /// the same reasoning as the matching scheduler's `drain_once`.
    pub async fn run(self: Arc<Self>, poll_interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let dispatcher = self.clone();
                    let result = tokio::task::spawn_blocking(move || dispatcher.dispatch_once()).await;
                    match result {
                        Ok(Err(err)) => error!(error = %err, "outbox dispatch tick failed"),
                        Err(err) => error!(error = %err, "outbox dispatch tick panicked"),
                        Ok(Ok(())) => {}
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Claims one batch and attempts to publish each record, synchronously
    /// (the store's connection is not `Send`-friendly across awaits, and
    /// every handler here is expected to be non-blocking local fan-out).
    pub fn dispatch_once(&self) -> anyhow::Result<()> {
        let claim_started = Instant::now();
        let batch = self.store.claim_outbox_batch(self.batch_size)?;
        if claim_started.elapsed() > self.db_deadline {
            warn!(elapsed_ms = claim_started.elapsed().as_millis() as u64, "outbox batch claim exceeded its deadline");
        }
        for record in batch {
            self.dispatch_record(record)?;
        }
        Ok(())
    }

    fn dispatch_record(&self, record: OutboxRecord) -> anyhow::Result<()> {
        if record.status != OutboxStatus::Pending {
            return Ok(());
        }

        let event = DomainEvent {
            event_id: EventId::new(),
            occurred_at: record.created_at,
            aggregate_type: record.aggregate_type.clone(),
            aggregate_id: record.aggregate_id.clone(),
            event_type: record.event_type.clone(),
            payload: record.payload.clone(),
        };

        let topic = record.aggregate_type.clone();
        let publish_result = self.publish_with_deadline(&event, &topic);

        match publish_result {
            Ok(()) => {
                self.store.mark_outbox_dispatched(record.id)?;
            }
            Err(err) => {
                let attempts = record.attempts + 1;
                if attempts >= self.max_attempts {
                    self.store.mark_outbox_dead(record.id)?;
                    self.store.record_audit(
                        "outbox",
                        &record.id.to_string(),
                        "dead_lettered",
                        None,
                        serde_json::json!({
                            "aggregate_type": record.aggregate_type,
                            "event_type": record.event_type,
                            "attempts": attempts,
                            "error": err.to_string(),
                        }),
                    )?;
                    warn!(
                        aggregate_type = %record.aggregate_type,
                        event_type = %record.event_type,
                        attempts,
                        "outbox record dead-lettered"
                    );
                } else {
                    let backoff = self
                        .backoff_schedule
                        .get(attempts as usize - 1)
                        .copied()
                        .unwrap_or_else(|| *self.backoff_schedule.last().unwrap());
                    let next_attempt_at = Utc::now() + chrono::Duration::from_std(backoff).unwrap_or(chrono::Duration::seconds(600));
                    self.store.mark_outbox_retry(record.id, attempts, next_attempt_at)?;
                }
            }
        }
        Ok(())
    }

    /// Every subscriber/bus call here is synchronous, so the "deadline" is
    /// enforced by measurement rather than preemption: a publish that runs
    /// past `publish_deadline` is treated as failed and falls into the same
    /// backoff/dead-letter path a handler error would.
    fn publish_with_deadline(&self, event: &DomainEvent, topic: &str) -> anyhow::Result<()> {
        let started = Instant::now();
        for handler in &self.handlers {
            handler.handle(event)?;
        }
        if let Some(bus) = &self.bus {
            bus.publish(topic, event)?;
        }
        let elapsed = started.elapsed();
        if elapsed > self.publish_deadline {
            return Err(anyhow!("publish exceeded deadline ({elapsed:?} > {:?})", self.publish_deadline));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::RecordingBus;
    use std::sync::Arc as StdArc;

    #[test]
    fn dispatches_pending_record_to_handlers_and_marks_dispatched() {
        let store = StdArc::new(EntityStore::in_memory().unwrap());
        let partner = crate::domain::Partner {
            id: crate::ids::PartnerId::new(),
            legal_name: "Acme".into(),
            partner_type: crate::domain::PartnerType::Buyer,
            primary_country: "IN".into(),
            tax_id: None,
            national_id: None,
            mobile: None,
            email: None,
            rating: 4.0,
            payment_performance: 90.0,
            delivery_performance: 90.0,
            credit_limit: 100,
            credit_used: 0,
            corporate_group_id: None,
            parent_partner_id: None,
            status: crate::domain::PartnerStatus::Active,
            version: 1,
        };
        // upsert_partner enqueues a PartnerStatusChanged outbox record.
        store.upsert_partner(&partner).unwrap();

        let mut dispatcher =
            OutboxDispatcher::new(store.clone(), vec![Duration::from_secs(10)], 5, Duration::from_secs(3), Duration::from_secs(5));
        let bus = StdArc::new(RecordingBus::new());
        dispatcher.set_bus(Box::new(ArcBus(bus.clone())));
        dispatcher.dispatch_once().unwrap();

        assert_eq!(bus.events().len(), 1);
        assert_eq!(bus.events()[0].event_type, "PartnerStatusChanged");
    }

    struct ArcBus(StdArc<RecordingBus>);
    impl ExternalBus for ArcBus {
        fn publish(&self, topic: &str, event: &DomainEvent) -> anyhow::Result<()> {
            self.0.publish(topic, event)
        }
    }
}
