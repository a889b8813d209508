//! Entity Store (C1): typed persistence + optimistic concurrency +
//! transactional outbox co-write.

mod rows;
pub mod schema;

pub mod queries;

use crate::domain::*;
use crate::error::{EngineError, EngineResult};
use crate::ids::*;
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, Transaction};

/// The sole persistence authority. A single shared connection behind
/// a `parking_lot::Mutex`, matching the template's one-connection-per-store
/// style but kept open for the lifetime of the process since the Outbox
/// dispatcher and the matching scheduler both need a handle.
pub struct EntityStore {
    conn: Mutex<Connection>,
}

impl EntityStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| format!("opening db {path}"))?;
        schema::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory db")?;
        schema::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Runs `f` inside a transaction and commits on success. Every public
    /// mutating method below is a single call to this helper, so "writes
    /// are transactional and always go through the Outbox" is
    /// enforced structurally rather than by convention.
    fn txn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("beginning transaction")?;
        let out = f(&tx)?;
        tx.commit().context("committing transaction")?;
        Ok(out)
    }

    fn enqueue_outbox(
        tx: &Transaction,
        aggregate_type: &str,
        aggregate_id: &str,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<OutboxId> {
        let id = OutboxId::new();
        let now = Utc::now();
        tx.execute(
            "INSERT INTO outbox (id, aggregate_type, aggregate_id, event_type, payload, status, attempts, next_attempt_at, created_at, dispatched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 0, ?6, ?6, NULL)",
            params![
                id.to_string(),
                aggregate_type,
                aggregate_id,
                event_type,
                payload.to_string(),
                now.to_rfc3339(),
            ],
        )
        .context("enqueuing outbox record")?;
        Ok(id)
    }

    fn insert_audit(
        tx: &Transaction,
        subject_type: &str,
        subject_id: &str,
        action: &str,
        actor_user_id: Option<&str>,
        detail: serde_json::Value,
    ) -> Result<()> {
        let id = AuditId::new();
        tx.execute(
            "INSERT INTO audit_entries (id, subject_type, subject_id, action, actor_user_id, detail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.to_string(),
                subject_type,
                subject_id,
                action,
                actor_user_id,
                detail.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )
        .context("inserting audit entry")?;
        Ok(())
    }

    // ---- Partners ----------------------------------------------------

    pub fn upsert_partner(&self, partner: &Partner) -> Result<()> {
        self.txn(|tx| {
            rows::upsert_partner(tx, partner)?;
            Self::enqueue_outbox(
                tx,
                "partner",
                &partner.id.to_string(),
                "PartnerStatusChanged",
                serde_json::json!({ "partner_id": partner.id.to_string(), "status": partner.status.as_str() }),
            )?;
            Ok(())
        })
    }

    pub fn get_partner(&self, id: PartnerId) -> Result<Option<Partner>> {
        let conn = self.conn.lock();
        rows::get_partner(&conn, id)
    }

    pub fn insert_partner_document(&self, doc: &PartnerDocument) -> Result<()> {
        self.txn(|tx| rows::insert_partner_document(tx, doc))
    }

    pub fn list_partner_documents(&self, partner_id: PartnerId) -> Result<Vec<PartnerDocument>> {
        let conn = self.conn.lock();
        rows::list_partner_documents(&conn, partner_id)
    }

    // ---- Commodities ---------------------------------------------------

    pub fn upsert_commodity(&self, commodity: &Commodity) -> Result<()> {
        let conn = self.conn.lock();
        rows::upsert_commodity(&conn, commodity)
    }

    pub fn get_commodity(&self, id: CommodityId) -> Result<Option<Commodity>> {
        let conn = self.conn.lock();
        rows::get_commodity(&conn, id)
    }

    // ---- Requirements ---------------------------------------------------

    /// Inserts a new Requirement. Returns `EngineError::Duplicate` if the
    /// dedup unique index rejects it.
    pub fn insert_requirement(&self, req: &Requirement) -> EngineResult<()> {
        self.txn(|tx| {
            rows::insert_requirement(tx, req)?;
            Self::enqueue_outbox(
                tx,
                "requirement",
                &req.id.to_string(),
                "RequirementCreated",
                serde_json::json!({ "requirement_id": req.id.to_string(), "buyer_id": req.buyer_id.to_string() }),
            )?;
            Ok(())
        })
        .map_err(map_unique_violation)
    }

    pub fn get_requirement(&self, id: RequirementId) -> Result<Option<Requirement>> {
        let conn = self.conn.lock();
        rows::get_requirement(&conn, id)
    }

    pub fn list_open_requirements_for_buyer(&self, buyer_id: PartnerId) -> Result<Vec<Requirement>> {
        let conn = self.conn.lock();
        rows::list_open_requirements_for_buyer(&conn, buyer_id)
    }

    pub fn list_open_requirements(&self) -> Result<Vec<Requirement>> {
        let conn = self.conn.lock();
        rows::list_open_requirements(&conn)
    }

    /// Optimistic-concurrency update: fails with `Conflict` if `expected_version`
    /// does not match the stored row.
    pub fn update_requirement(&self, req: &Requirement, expected_version: u32) -> EngineResult<()> {
        self.txn(|tx| {
            let affected = rows::update_requirement(tx, req, expected_version)?;
            if affected == 0 {
                return Err(anyhow!(ConflictMarker));
            }
            Self::enqueue_outbox(
                tx,
                "requirement",
                &req.id.to_string(),
                "RequirementStatusChanged",
                serde_json::json!({ "requirement_id": req.id.to_string(), "status": req.status.as_str() }),
            )?;
            Ok(())
        })
        .map_err(map_conflict)
    }

    // ---- Availabilities --------------------------------------------------

    pub fn insert_availability(&self, avail: &Availability) -> EngineResult<()> {
        self.txn(|tx| {
            rows::insert_availability(tx, avail)?;
            Self::enqueue_outbox(
                tx,
                "availability",
                &avail.id.to_string(),
                "AvailabilityCreated",
                serde_json::json!({ "availability_id": avail.id.to_string(), "seller_id": avail.seller_id.to_string() }),
            )?;
            Ok(())
        })
        .map_err(map_unique_violation)
    }

    pub fn get_availability(&self, id: AvailabilityId) -> Result<Option<Availability>> {
        let conn = self.conn.lock();
        rows::get_availability(&conn, id)
    }

    pub fn list_open_availabilities_for_seller(&self, seller_id: PartnerId) -> Result<Vec<Availability>> {
        let conn = self.conn.lock();
        rows::list_open_availabilities_for_seller(&conn, seller_id)
    }

    pub fn update_availability(
        &self,
        avail: &Availability,
        expected_version: u32,
    ) -> EngineResult<()> {
        self.txn(|tx| {
            let affected = rows::update_availability(tx, avail, expected_version)?;
            if affected == 0 {
                return Err(anyhow!(ConflictMarker));
            }
            Self::enqueue_outbox(
                tx,
                "availability",
                &avail.id.to_string(),
                "AvailabilityStatusChanged",
                serde_json::json!({ "availability_id": avail.id.to_string(), "status": avail.status.as_str() }),
            )?;
            Ok(())
        })
        .map_err(map_conflict)
    }

    // ---- Matches ---------------------------------------------------------

    pub fn insert_match(&self, m: &Match) -> Result<()> {
        self.txn(|tx| {
            rows::insert_match(tx, m)?;
            Self::insert_audit(
                tx,
                "match",
                &m.id.to_string(),
                "match_proposed",
                None,
                serde_json::json!({ "score": m.score_breakdown.composite, "risk_decision": format!("{:?}", m.risk_decision) }),
            )?;
            Self::enqueue_outbox(
                tx,
                "match",
                &m.id.to_string(),
                "MatchProposed",
                serde_json::json!({
                    "match_id": m.id.to_string(),
                    "requirement_id": m.requirement_id.to_string(),
                    "availability_id": m.availability_id.to_string(),
                }),
            )?;
            Ok(())
        })
    }

    pub fn get_match(&self, id: MatchId) -> Result<Option<Match>> {
        let conn = self.conn.lock();
        rows::get_match(&conn, id)
    }

    pub fn update_match_status(&self, m: &Match, expected_version: u32) -> EngineResult<()> {
        self.txn(|tx| {
            let affected = rows::update_match(tx, m, expected_version)?;
            if affected == 0 {
                return Err(anyhow!(ConflictMarker));
            }
            let event_type = match m.status {
                MatchStatus::Rejected => "MatchRejected",
                MatchStatus::Expired => "MatchExpired",
                _ => "MatchNotified",
            };
            Self::enqueue_outbox(
                tx,
                "match",
                &m.id.to_string(),
                event_type,
                serde_json::json!({ "match_id": m.id.to_string(), "status": m.status.as_str() }),
            )?;
            Ok(())
        })
        .map_err(map_conflict)
    }

    pub fn list_matches_for_requirement(&self, requirement_id: RequirementId) -> Result<Vec<Match>> {
        let conn = self.conn.lock();
        rows::list_matches_for_requirement(&conn, requirement_id)
    }

    pub fn list_matches_for_availability(
        &self,
        availability_id: AvailabilityId,
    ) -> Result<Vec<Match>> {
        let conn = self.conn.lock();
        rows::list_matches_for_availability(&conn, availability_id)
    }

    /// Recent matches for the (requirement, buyer, seller) triple within
    /// `window_secs`, used by C7's duplicate-match suppression.
    pub fn recent_matches_for_triple(
        &self,
        requirement_id: RequirementId,
        availability_id: AvailabilityId,
        window_secs: i64,
    ) -> Result<Vec<Match>> {
        let conn = self.conn.lock();
        rows::recent_matches_for_pair(&conn, requirement_id, availability_id, window_secs)
    }

    // ---- Negotiations, Offers, Messages -----------------------------------

    pub fn insert_negotiation(&self, neg: &Negotiation, opening_offer: &Offer) -> Result<()> {
        self.txn(|tx| {
            rows::insert_negotiation(tx, neg)?;
            rows::insert_offer(tx, opening_offer)?;
            Self::enqueue_outbox(
                tx,
                "negotiation",
                &neg.id.to_string(),
                "NegotiationStarted",
                serde_json::json!({ "negotiation_id": neg.id.to_string(), "match_id": neg.match_id.to_string() }),
            )?;
            Ok(())
        })
    }

    pub fn get_negotiation(&self, id: NegotiationId) -> Result<Option<Negotiation>> {
        let conn = self.conn.lock();
        rows::get_negotiation(&conn, id)
    }

    pub fn list_active_negotiations(&self) -> Result<Vec<Negotiation>> {
        let conn = self.conn.lock();
        rows::list_active_negotiations(&conn)
    }

    pub fn update_negotiation(
        &self,
        neg: &Negotiation,
        expected_version: u32,
        new_offer: Option<&Offer>,
        event_type: &str,
    ) -> EngineResult<()> {
        self.txn(|tx| {
            let affected = rows::update_negotiation(tx, neg, expected_version)?;
            if affected == 0 {
                return Err(anyhow!(ConflictMarker));
            }
            if let Some(offer) = new_offer {
                rows::insert_offer(tx, offer)?;
            }
            Self::enqueue_outbox(
                tx,
                "negotiation",
                &neg.id.to_string(),
                event_type,
                serde_json::json!({ "negotiation_id": neg.id.to_string(), "status": neg.status.as_str(), "round": neg.round }),
            )?;
            Ok(())
        })
        .map_err(map_conflict)
    }

    pub fn list_offers(&self, negotiation_id: NegotiationId) -> Result<Vec<Offer>> {
        let conn = self.conn.lock();
        rows::list_offers(&conn, negotiation_id)
    }

    pub fn insert_message(&self, msg: &Message) -> Result<()> {
        self.txn(|tx| {
            rows::insert_message(tx, msg)?;
            Self::enqueue_outbox(
                tx,
                "negotiation",
                &msg.negotiation_id.to_string(),
                "MessageSent",
                serde_json::json!({ "message_id": msg.id.to_string(), "negotiation_id": msg.negotiation_id.to_string() }),
            )?;
            Ok(())
        })
    }

    // ---- Outbox ------------------------------------------------------------

    pub fn claim_outbox_batch(&self, limit: usize) -> Result<Vec<OutboxRecord>> {
        let conn = self.conn.lock();
        rows::claim_outbox_batch(&conn, limit)
    }

    pub fn mark_outbox_dispatched(&self, id: OutboxId) -> Result<()> {
        let conn = self.conn.lock();
        rows::mark_outbox_dispatched(&conn, id)
    }

    pub fn mark_outbox_retry(&self, id: OutboxId, attempts: u32, next_attempt_at: chrono::DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock();
        rows::mark_outbox_retry(&conn, id, attempts, next_attempt_at)
    }

    pub fn mark_outbox_dead(&self, id: OutboxId) -> Result<()> {
        let conn = self.conn.lock();
        rows::mark_outbox_dead(&conn, id)
    }

    // ---- Audit ---------------------------------------------------------------

    pub fn record_audit(
        &self,
        subject_type: &str,
        subject_id: &str,
        action: &str,
        actor_user_id: Option<&str>,
        detail: serde_json::Value,
    ) -> Result<()> {
        self.txn(|tx| Self::insert_audit(tx, subject_type, subject_id, action, actor_user_id, detail))
    }

    // ---- Idempotency -----------------------------------------------------------

    pub fn check_idempotency(&self, command_type: &str, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        rows::check_idempotency(&conn, command_type, key)
    }

    pub fn record_idempotency(&self, command_type: &str, key: &str, entity_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        rows::record_idempotency(&conn, command_type, key, entity_id)
    }

    // ---- Specialised queries (C3/C4) --------------------------------------------

    pub fn find_availabilities_by_location_and_commodity(
        &self,
        commodity_id: CommodityId,
        delivery_locations: &[LocationSpec],
        max_km: f64,
    ) -> Result<Vec<Availability>> {
        let conn = self.conn.lock();
        queries::find_availabilities_by_location_and_commodity(&conn, commodity_id, delivery_locations, max_km)
    }

    pub fn find_requirements_accepting_location(
        &self,
        commodity_id: CommodityId,
        origin: &LocationSpec,
        max_km: f64,
    ) -> Result<Vec<Requirement>> {
        let conn = self.conn.lock();
        queries::find_requirements_accepting_location(&conn, commodity_id, origin, max_km)
    }

    pub fn find_open_orders_same_day(
        &self,
        partner_id: PartnerId,
        commodity_id: CommodityId,
        opposite_side: queries::OrderSide,
        date: chrono::NaiveDate,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        queries::find_open_orders_same_day(&conn, partner_id, commodity_id, opposite_side, date)
    }

    pub fn find_partner_links(&self, field: &str, value: &str, exclude: PartnerId) -> Result<Vec<PartnerId>> {
        let conn = self.conn.lock();
        queries::find_partner_links(&conn, field, value, exclude)
    }
}

/// Marker error distinguished by `map_conflict`/`map_unique_violation` from
/// genuine I/O failures, since `rusqlite`'s `anyhow`-wrapped errors don't
/// carry a typed discriminant past `.context()`.
#[derive(Debug)]
struct ConflictMarker;
impl std::fmt::Display for ConflictMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "version conflict")
    }
}
impl std::error::Error for ConflictMarker {}

fn map_conflict(err: anyhow::Error) -> EngineError {
    if err.downcast_ref::<ConflictMarker>().is_some() {
        EngineError::conflict("stored version does not match expected version")
    } else {
        EngineError::new(crate::error::ErrorCode::Conflict, err.to_string())
    }
}

fn map_unique_violation(err: anyhow::Error) -> EngineError {
    if let Some(sql_err) = err.downcast_ref::<rusqlite::Error>() {
        if matches!(
            sql_err,
            rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
        ) {
            return EngineError::new(
                crate::error::ErrorCode::Duplicate,
                "an identical open order already exists",
            );
        }
    }
    EngineError::new(crate::error::ErrorCode::Conflict, err.to_string())
}
