//! The `Engine`: wires C1–C10 behind the command interface, owns
//! bootstrap/shutdown of the background tasks (scheduler drain loop,
//! sweeper, outbox dispatcher, notification debounce cleanup).
//!
//! Follows the service template's `AppState`-holds-everything shape: one
//! struct owning the store, the scheduler, the dispatcher and the
//! collaborator handles, constructed once in `main.rs` and handed to every
//! command.

use crate::capability::resolve_capability;
use crate::collaborators::{DefaultNotificationPreferences, DocumentService, IdentityProvider, SanctionsList};
use crate::config::{CommodityConfigTable, PlatformConfig};
use crate::context::CommandContext;
use crate::domain::*;
use crate::error::{EngineError, ErrorCode, EngineResult};
use crate::ids::*;
use crate::matching::scheduler::{validate_order_role, MatchingScheduler};
use crate::matching::queue::SchedulerEvent;
use crate::negotiation;
use crate::notify::{MatchNotificationHandler, NotificationRouter};
use crate::outbox::OutboxDispatcher;
use crate::risk::{self, RiskStatus};
use crate::store::queries::OrderSide;
use crate::store::EntityStore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Everything a command needs, assembled once at bootstrap.
pub struct Engine {
    pub store: Arc<EntityStore>,
    pub scheduler: Arc<MatchingScheduler>,
    pub dispatcher: Arc<OutboxDispatcher>,
    pub commodity_configs: Arc<RwLock<CommodityConfigTable>>,
    pub identity: Arc<dyn IdentityProvider>,
    pub documents: Arc<dyn DocumentService>,
    pub sanctions: Arc<dyn SanctionsList>,
    pub notifications: Arc<std::sync::Mutex<NotificationRouter>>,
    config: PlatformConfig,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

impl Engine {
    pub fn new(
        config: PlatformConfig,
        store: Arc<EntityStore>,
        identity: Arc<dyn IdentityProvider>,
        documents: Arc<dyn DocumentService>,
        sanctions: Arc<dyn SanctionsList>,
    ) -> Self {
        let commodity_configs = Arc::new(RwLock::new(
            config
                .commodity_config_path
                .as_ref()
                .and_then(|p| CommodityConfigTable::load_from_path(p).ok())
                .unwrap_or_else(CommodityConfigTable::empty),
        ));
        let scheduler = Arc::new(MatchingScheduler::new(
            store.clone(),
            commodity_configs.clone(),
            sanctions.clone(),
            config.scheduler_concurrency,
            config.micro_batch_window,
            config.queue_backpressure_threshold,
            config.allocation_top_n,
            config.allocation_max_retries,
        ));
        let notifications = Arc::new(std::sync::Mutex::new(NotificationRouter::new(
            config.notification_debounce_window,
        )));

        let mut dispatcher_inner = OutboxDispatcher::new(
            store.clone(),
            config.outbox_backoff_schedule.clone(),
            config.outbox_max_attempts,
            config.publish_deadline,
            config.db_deadline,
        );
        // C7 -> C10 -> C8: a proposed match is only worth anything once its
        // recipients hear about it.
        dispatcher_inner.register_handler(Box::new(MatchNotificationHandler::new(
            store.clone(),
            notifications.clone(),
            identity.clone(),
            Arc::new(DefaultNotificationPreferences),
            config.notification_deadline,
        )));
        let dispatcher = Arc::new(dispatcher_inner);

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        Self {
            store,
            scheduler,
            dispatcher,
            commodity_configs,
            identity,
            documents,
            sanctions,
            notifications,
            config,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Spawns the background loops: matching drain,
    /// sweeper tick, outbox dispatcher. Returns immediately; the loops run
    /// on the current Tokio runtime until `shutdown()` is called.
    pub fn bootstrap(self: &Arc<Self>) {
        let scheduler = self.scheduler.clone();
        let mut shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = scheduler.drain_once() => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        let scheduler = self.scheduler.clone();
        let sweeper_interval = self.config.sweeper_interval;
        let mut shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweeper_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        scheduler.enqueue(SchedulerEvent::SweeperTick).await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        let dispatcher = self.dispatcher.clone();
        let poll_interval = self.config.outbox_poll_interval;
        let shutdown = self.shutdown_rx.clone();
        tokio::spawn(dispatcher.run(poll_interval, shutdown));
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    fn resolve_partner(&self, id: PartnerId) -> EngineResult<Partner> {
        self.store
            .get_partner(id)
            .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?
            .ok_or_else(|| EngineError::not_found("partner not found"))
    }

    fn resolve_commodity(&self, id: CommodityId) -> EngineResult<Commodity> {
        self.store
            .get_commodity(id)
            .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?
            .ok_or_else(|| EngineError::not_found("commodity not found"))
    }

    // ---- CreateRequirement --------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn create_requirement(
        &self,
        ctx: &CommandContext,
        buyer_id: PartnerId,
        commodity_id: CommodityId,
        quantity: f64,
        unit: String,
        target_price: i64,
        max_price: Option<i64>,
        delivery_locations: Vec<LocationSpec>,
        accepted_quality_params: HashMap<String, (f64, f64)>,
        valid_until: chrono::DateTime<Utc>,
        idempotency_key: &str,
    ) -> EngineResult<Requirement> {
        if !ctx.may_act_as(buyer_id) {
            return Err(EngineError::unauthorized("caller may not act as this buyer"));
        }
        if let Some(existing) = self
            .store
            .check_idempotency("CreateRequirement", idempotency_key)
            .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?
        {
            let id: RequirementId = existing
                .parse()
                .map_err(|_| EngineError::new(ErrorCode::Conflict, "corrupt idempotency record"))?;
            return self
                .store
                .get_requirement(id)
                .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?
                .ok_or_else(|| EngineError::not_found("requirement not found"));
        }

        let buyer = self.resolve_partner(buyer_id)?;
        let commodity = self.resolve_commodity(commodity_id)?;

        if !validate_order_role(&buyer, OrderSide::Buy) {
            return Err(EngineError::new(ErrorCode::RoleViolation, "this partner type may not post buy requirements")
                .with_fix("use a BUYER, TRADER, BROKER or INTERNAL partner"));
        }

        let role_check = risk::validate_role(&buyer, OrderSide::Buy);
        if role_check.status == RiskStatus::Fail {
            return Err(EngineError::new(ErrorCode::RoleViolation, role_check.reason));
        }

        let today = Utc::now().date_naive();
        let circular = risk::check_circular_trading(&self.store, buyer_id, commodity_id, OrderSide::Buy, today)
            .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?;
        if circular.status == RiskStatus::Fail {
            return Err(EngineError::new(ErrorCode::CircularTrading, circular.reason)
                .with_fix("wait until the next calendar day to flip sides for this commodity"));
        }

        let documents = self.documents.documents_for(buyer_id);
        let capability = resolve_capability(
            &buyer,
            &documents,
            OrderSide::Buy,
            &commodity,
            &buyer.primary_country,
            &buyer.primary_country,
            Utc::now(),
            |c| self.sanctions.is_sanctioned(c),
        );
        if !capability.is_allowed() {
            return Err(EngineError::new(ErrorCode::CapabilityDenied, capability.reason.clone())
                .with_fix(how_to_fix_capability(&capability.code)));
        }

        let requirement = Requirement {
            id: RequirementId::new(),
            buyer_id,
            commodity_id,
            quantity,
            remaining_quantity: quantity,
            unit,
            target_price,
            max_price,
            delivery_locations,
            accepted_quality_params,
            valid_until,
            status: RequirementStatus::Active,
            risk_precheck_status: RiskPrecheckStatus::Pass,
            ai_budget_flag: false,
            created_at: Utc::now(),
            version: 1,
        };

        self.store.insert_requirement(&requirement)?;
        self.store
            .record_idempotency("CreateRequirement", idempotency_key, &requirement.id.to_string())
            .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?;

        let scheduler = self.scheduler.clone();
        let requirement_id = requirement.id;
        tokio::spawn(async move {
            scheduler
                .enqueue(SchedulerEvent::RequirementCreated { requirement_id })
                .await;
        });

        Ok(requirement)
    }

    // ---- CreateAvailability -------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn create_availability(
        &self,
        ctx: &CommandContext,
        seller_id: PartnerId,
        commodity_id: CommodityId,
        total_quantity: f64,
        unit: String,
        asking_price: i64,
        min_price: Option<i64>,
        origin_location: LocationSpec,
        delivery_locations: Vec<LocationSpec>,
        quality_params: HashMap<String, f64>,
        valid_until: chrono::DateTime<Utc>,
        idempotency_key: &str,
    ) -> EngineResult<Availability> {
        if !ctx.may_act_as(seller_id) {
            return Err(EngineError::unauthorized("caller may not act as this seller"));
        }
        if let LocationSpec::AdHoc { lat, lng, radius_km, .. } = &origin_location {
            if !(-90.0..=90.0).contains(lat) || !(-180.0..=180.0).contains(lng) || *radius_km <= 0.0 {
                return Err(EngineError::new(ErrorCode::AdHocLocationInvalid, "ad-hoc coordinates out of range"));
            }
        }
        if let Some(existing) = self
            .store
            .check_idempotency("CreateAvailability", idempotency_key)
            .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?
        {
            let id: AvailabilityId = existing
                .parse()
                .map_err(|_| EngineError::new(ErrorCode::Conflict, "corrupt idempotency record"))?;
            return self
                .store
                .get_availability(id)
                .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?
                .ok_or_else(|| EngineError::not_found("availability not found"));
        }

        let seller = self.resolve_partner(seller_id)?;
        let commodity = self.resolve_commodity(commodity_id)?;

        if !validate_order_role(&seller, OrderSide::Sell) {
            return Err(EngineError::new(ErrorCode::RoleViolation, "this partner type may not post sell availabilities")
                .with_fix("use a SELLER, TRADER, BROKER or INTERNAL partner"));
        }

        let role_check = risk::validate_role(&seller, OrderSide::Sell);
        if role_check.status == RiskStatus::Fail {
            return Err(EngineError::new(ErrorCode::RoleViolation, role_check.reason));
        }

        let today = Utc::now().date_naive();
        let circular = risk::check_circular_trading(&self.store, seller_id, commodity_id, OrderSide::Sell, today)
            .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?;
        if circular.status == RiskStatus::Fail {
            return Err(EngineError::new(ErrorCode::CircularTrading, circular.reason)
                .with_fix("wait until the next calendar day to flip sides for this commodity"));
        }

        let documents = self.documents.documents_for(seller_id);
        let capability = resolve_capability(
            &seller,
            &documents,
            OrderSide::Sell,
            &commodity,
            &seller.primary_country,
            &seller.primary_country,
            Utc::now(),
            |c| self.sanctions.is_sanctioned(c),
        );
        if !capability.is_allowed() {
            return Err(EngineError::new(ErrorCode::CapabilityDenied, capability.reason.clone())
                .with_fix(how_to_fix_capability(&capability.code)));
        }

        let availability = Availability {
            id: AvailabilityId::new(),
            seller_id,
            commodity_id,
            quantity: total_quantity,
            remaining_quantity: total_quantity,
            unit,
            asking_price,
            min_price,
            origin_location,
            delivery_locations,
            quality_params,
            valid_until,
            status: AvailabilityStatus::Available,
            created_at: Utc::now(),
            version: 1,
        };

        self.store.insert_availability(&availability)?;
        self.store
            .record_idempotency("CreateAvailability", idempotency_key, &availability.id.to_string())
            .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?;

        let scheduler = self.scheduler.clone();
        let availability_id = availability.id;
        tokio::spawn(async move {
            scheduler
                .enqueue(SchedulerEvent::AvailabilityCreated { availability_id })
                .await;
        });

        Ok(availability)
    }

    // ---- CancelOrder ----------------------------------------------------------

    pub fn cancel_requirement(&self, ctx: &CommandContext, requirement_id: RequirementId) -> EngineResult<Requirement> {
        let mut req = self
            .store
            .get_requirement(requirement_id)
            .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?
            .ok_or_else(|| EngineError::not_found("requirement not found"))?;
        if !ctx.may_act_as(req.buyer_id) {
            return Err(EngineError::unauthorized("caller is not the owning buyer"));
        }
        if !req.status.is_open() {
            return Err(EngineError::new(ErrorCode::AlreadyTerminal, "requirement is already terminal"));
        }
        let expected_version = req.version;
        req.status = RequirementStatus::Cancelled;
        req.version += 1;
        self.store.update_requirement(&req, expected_version)?;
        Ok(req)
    }

    pub fn cancel_availability(&self, ctx: &CommandContext, availability_id: AvailabilityId) -> EngineResult<Availability> {
        let mut avail = self
            .store
            .get_availability(availability_id)
            .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?
            .ok_or_else(|| EngineError::not_found("availability not found"))?;
        if !ctx.may_act_as(avail.seller_id) {
            return Err(EngineError::unauthorized("caller is not the owning seller"));
        }
        if !avail.status.is_open() {
            return Err(EngineError::new(ErrorCode::AlreadyTerminal, "availability is already terminal"));
        }
        let expected_version = avail.version;
        avail.status = AvailabilityStatus::Cancelled;
        avail.version += 1;
        self.store.update_availability(&avail, expected_version)?;
        Ok(avail)
    }

    /// Cancelling a partner cancels its open orders: every Requirement where
    /// it is the buyer and every Availability where it is the seller moves
    /// to `Cancelled` alongside the partner's own status flip.
    pub fn suspend_partner(&self, ctx: &CommandContext, partner_id: PartnerId) -> EngineResult<()> {
        if !matches!(ctx.role, crate::context::CallerRole::Internal) {
            return Err(EngineError::unauthorized("only internal users may suspend a partner"));
        }
        let mut partner = self.resolve_partner(partner_id)?;
        partner.status = PartnerStatus::Suspended;
        partner.version += 1;
        self.store
            .upsert_partner(&partner)
            .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?;

        self.cancel_open_orders_for_partner(partner_id);

        let scheduler = self.scheduler.clone();
        tokio::spawn(async move {
            scheduler
                .enqueue(SchedulerEvent::RiskStatusChanged { partner_id })
                .await;
        });
        Ok(())
    }

    /// Best-effort cascade: a conflict on one order (someone else mutated it
    /// concurrently) is logged and does not block cancelling the rest.
    fn cancel_open_orders_for_partner(&self, partner_id: PartnerId) {
        match self.store.list_open_requirements_for_buyer(partner_id) {
            Ok(requirements) => {
                for mut req in requirements {
                    let expected_version = req.version;
                    req.status = RequirementStatus::Cancelled;
                    req.version += 1;
                    if let Err(err) = self.store.update_requirement(&req, expected_version) {
                        warn!(requirement_id = %req.id, error = %err, "failed to cancel requirement on partner suspension");
                    }
                }
            }
            Err(err) => warn!(%partner_id, error = %err, "failed to list open requirements for suspended partner"),
        }

        match self.store.list_open_availabilities_for_seller(partner_id) {
            Ok(availabilities) => {
                for mut avail in availabilities {
                    let expected_version = avail.version;
                    avail.status = AvailabilityStatus::Cancelled;
                    avail.version += 1;
                    if let Err(err) = self.store.update_availability(&avail, expected_version) {
                        warn!(availability_id = %avail.id, error = %err, "failed to cancel availability on partner suspension");
                    }
                }
            }
            Err(err) => warn!(%partner_id, error = %err, "failed to list open availabilities for suspended partner"),
        }
    }

    // ---- AssessTradeRisk -------------------------------------------------------

    pub fn assess_trade_risk(
        &self,
        requirement_id: RequirementId,
        availability_id: AvailabilityId,
    ) -> EngineResult<risk::TradeRiskAssessment> {
        let requirement = self
            .store
            .get_requirement(requirement_id)
            .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?
            .ok_or_else(|| EngineError::not_found("requirement not found"))?;
        let availability = self
            .store
            .get_availability(availability_id)
            .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?
            .ok_or_else(|| EngineError::not_found("availability not found"))?;
        let buyer = self.resolve_partner(requirement.buyer_id)?;
        let seller = self.resolve_partner(availability.seller_id)?;
        Ok(risk::assess_trade_risk(&buyer, &seller, &requirement, &availability))
    }

    // ---- GetMatches -----------------------------------------------------------

    pub fn matches_for_requirement(&self, ctx: &CommandContext, requirement_id: RequirementId) -> EngineResult<Vec<Match>> {
        let requirement = self
            .store
            .get_requirement(requirement_id)
            .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?
            .ok_or_else(|| EngineError::not_found("requirement not found"))?;
        if !ctx.may_act_as(requirement.buyer_id) {
            return Err(EngineError::unauthorized("caller is not the owning buyer"));
        }
        self.store
            .list_matches_for_requirement(requirement_id)
            .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))
    }

    pub fn matches_for_availability(&self, ctx: &CommandContext, availability_id: AvailabilityId) -> EngineResult<Vec<Match>> {
        let availability = self
            .store
            .get_availability(availability_id)
            .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?
            .ok_or_else(|| EngineError::not_found("availability not found"))?;
        if !ctx.may_act_as(availability.seller_id) {
            return Err(EngineError::unauthorized("caller is not the owning seller"));
        }
        self.store
            .list_matches_for_availability(availability_id)
            .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))
    }

    // ---- StartNegotiation / Offer / Accept / Reject / Withdraw --------------

    pub fn start_negotiation(
        &self,
        ctx: &CommandContext,
        match_id: MatchId,
        initiator_id: PartnerId,
        opening_price: i64,
        opening_quantity: f64,
    ) -> EngineResult<Negotiation> {
        if !ctx.may_act_as(initiator_id) {
            return Err(EngineError::unauthorized("caller may not act as this initiator"));
        }
        let m = self
            .store
            .get_match(match_id)
            .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?
            .ok_or_else(|| EngineError::not_found("match not found"))?;
        let requirement = self
            .store
            .get_requirement(m.requirement_id)
            .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?
            .ok_or_else(|| EngineError::not_found("requirement not found"))?;
        let availability = self
            .store
            .get_availability(m.availability_id)
            .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?
            .ok_or_else(|| EngineError::not_found("availability not found"))?;

        if initiator_id != requirement.buyer_id && initiator_id != availability.seller_id {
            return Err(EngineError::new(ErrorCode::InvalidPair, "initiator must be the buyer or seller of the matched pair"));
        }

        let configs = self.commodity_configs.read().unwrap();
        let ttl_hours = configs.resolve(&m.commodity_id.to_string()).negotiation_ttl_hours;
        drop(configs);

        let (negotiation, opening_offer) = negotiation::start(
            match_id,
            requirement.buyer_id,
            availability.seller_id,
            initiator_id,
            opening_price,
            opening_quantity,
            chrono::Duration::hours(ttl_hours),
            Utc::now(),
        )?;

        self.store
            .insert_negotiation(&negotiation, &opening_offer)
            .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?;
        Ok(negotiation)
    }

    pub fn offer(
        &self,
        ctx: &CommandContext,
        negotiation_id: NegotiationId,
        actor_id: PartnerId,
        price: i64,
        quantity: f64,
    ) -> EngineResult<Offer> {
        let is_internal = matches!(ctx.role, crate::context::CallerRole::Internal);
        if !is_internal && !ctx.may_act_as(actor_id) {
            return Err(EngineError::unauthorized("caller may not act as this actor"));
        }
        let negotiation = self
            .store
            .get_negotiation(negotiation_id)
            .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?
            .ok_or_else(|| EngineError::not_found("negotiation not found"))?;
        let expected_version = negotiation.version;

        let offers = self
            .store
            .list_offers(negotiation_id)
            .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?;
        let last_offer_origin = offers.last().map(|o| o.origin).unwrap_or(OfferOrigin::Buyer);

        let (next, new_offer) =
            negotiation::offer(&negotiation, actor_id, is_internal, last_offer_origin, price, quantity, Utc::now())?;

        self.store
            .update_negotiation(&next, expected_version, Some(&new_offer), "OfferMade")?;
        Ok(new_offer)
    }

    pub fn accept(&self, ctx: &CommandContext, negotiation_id: NegotiationId, actor_id: PartnerId) -> EngineResult<Negotiation> {
        self.terminate_negotiation(ctx, negotiation_id, actor_id, NegotiationAction::Accept)
    }

    pub fn reject(&self, ctx: &CommandContext, negotiation_id: NegotiationId, actor_id: PartnerId) -> EngineResult<Negotiation> {
        self.terminate_negotiation(ctx, negotiation_id, actor_id, NegotiationAction::Reject)
    }

    pub fn withdraw(&self, ctx: &CommandContext, negotiation_id: NegotiationId, actor_id: PartnerId) -> EngineResult<Negotiation> {
        self.terminate_negotiation(ctx, negotiation_id, actor_id, NegotiationAction::Withdraw)
    }

    fn terminate_negotiation(
        &self,
        ctx: &CommandContext,
        negotiation_id: NegotiationId,
        actor_id: PartnerId,
        action: NegotiationAction,
    ) -> EngineResult<Negotiation> {
        let is_internal = matches!(ctx.role, crate::context::CallerRole::Internal);
        if !is_internal && !ctx.may_act_as(actor_id) {
            return Err(EngineError::unauthorized("caller may not act as this actor"));
        }
        let negotiation = self
            .store
            .get_negotiation(negotiation_id)
            .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?
            .ok_or_else(|| EngineError::not_found("negotiation not found"))?;
        let expected_version = negotiation.version;

        let next = match action {
            NegotiationAction::Accept => {
                let offers = self
                    .store
                    .list_offers(negotiation_id)
                    .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?;
                let last_offer_origin = offers
                    .last()
                    .map(|o| o.origin)
                    .unwrap_or(OfferOrigin::Buyer);
                negotiation::accept(&negotiation, actor_id, is_internal, last_offer_origin, Utc::now())?
            }
            NegotiationAction::Reject => negotiation::reject(&negotiation, actor_id, is_internal, Utc::now())?,
            NegotiationAction::Withdraw => negotiation::withdraw(&negotiation, actor_id, is_internal, Utc::now())?,
        };

        if next.version == negotiation.version {
            // Idempotent no-op re-application of an already-terminal state.
            return Ok(next);
        }

        let event_type = match next.status {
            NegotiationStatus::Accepted => "NegotiationAccepted",
            NegotiationStatus::Rejected => "NegotiationRejected",
            NegotiationStatus::Withdrawn => "NegotiationRejected",
            _ => "NegotiationUpdated",
        };
        self.store.update_negotiation(&next, expected_version, None, event_type)?;
        Ok(next)
    }

    pub fn post_message(
        &self,
        ctx: &CommandContext,
        negotiation_id: NegotiationId,
        sender_id: PartnerId,
        body: String,
    ) -> EngineResult<Message> {
        if !ctx.may_act_as(sender_id) {
            return Err(EngineError::unauthorized("caller may not act as this sender"));
        }
        let msg = negotiation::post_message(negotiation_id, sender_id, body, MessageVisibility::Public, Utc::now());
        self.store
            .insert_message(&msg)
            .map_err(|e| EngineError::new(ErrorCode::Conflict, e.to_string()))?;
        Ok(msg)
    }
}

enum NegotiationAction {
    Accept,
    Reject,
    Withdraw,
}

fn how_to_fix_capability(code: &str) -> &'static str {
    match code {
        "EXPORT_LICENSE_MISSING" | "DESTINATION_NOT_COVERED" => {
            "upload an export/import license certificate and get it verified"
        }
        "DOMESTIC_DOCUMENTS_INCOMPLETE" => "upload and verify GST and PAN documents",
        "SANCTIONED_COUNTRY" => "this destination cannot be traded with under current sanctions",
        "RESTRICTED_DESTINATION" => "this commodity cannot be shipped to this destination",
        _ => "review the partner's verified document set",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{InMemoryDocumentService, InMemoryIdentityProvider, StaticSanctionsList};
    use crate::domain::{DocumentType, PartnerDocument, PartnerStatus, PartnerType};
    use std::collections::HashMap as Map;

    fn test_engine() -> Arc<Engine> {
        let store = Arc::new(EntityStore::in_memory().unwrap());
        let identity = Arc::new(InMemoryIdentityProvider::new());
        let documents = Arc::new(InMemoryDocumentService::new());
        let sanctions = Arc::new(StaticSanctionsList::new(Vec::<String>::new()));
        let mut config = PlatformConfig::from_env();
        config.db_path = ":memory:".into();
        Arc::new(Engine::new(config, store, identity, documents, sanctions))
    }

    fn make_partner(partner_type: PartnerType, country: &str) -> Partner {
        Partner {
            id: PartnerId::new(),
            legal_name: "Test Partner".into(),
            partner_type,
            primary_country: country.into(),
            tax_id: Some(format!("TAX-{}", PartnerId::new())),
            national_id: Some(format!("NAT-{}", PartnerId::new())),
            mobile: None,
            email: None,
            rating: 4.5,
            payment_performance: 95.0,
            delivery_performance: 95.0,
            credit_limit: 10_000_000,
            credit_used: 0,
            corporate_group_id: None,
            parent_partner_id: None,
            status: PartnerStatus::Active,
            version: 1,
        }
    }

    fn verified_doc(partner_id: PartnerId, kind: DocumentType) -> PartnerDocument {
        PartnerDocument {
            id: PartnerDocumentId::new(),
            partner_id,
            document_type: kind,
            ocr_data: Map::new(),
            issue_date: Utc::now(),
            expiry_date: Some(Utc::now() + chrono::Duration::days(365)),
            verified: true,
        }
    }

    fn make_commodity() -> Commodity {
        Commodity {
            id: CommodityId::new(),
            name: "Cotton".into(),
            category: "fiber".into(),
            export_regulations: RegulationSchedule::default(),
            import_regulations: RegulationSchedule::default(),
            supported_currencies: vec!["INR".into()],
            quality_standards: vec![],
            seasonal_commodity: false,
            harvest_season: None,
            shelf_life_days: None,
        }
    }

    #[tokio::test]
    async fn create_requirement_rejects_wrong_caller() {
        let engine = test_engine();
        let buyer = make_partner(PartnerType::Buyer, "IN");
        let commodity = make_commodity();
        engine.store.upsert_partner(&buyer).unwrap();
        engine.store.upsert_commodity(&commodity).unwrap();
        engine
            .store
            .insert_partner_document(&verified_doc(buyer.id, DocumentType::Gst))
            .unwrap();
        engine
            .store
            .insert_partner_document(&verified_doc(buyer.id, DocumentType::Pan))
            .unwrap();

        let impostor_ctx = CommandContext::external(UserId::new(), PartnerId::new());
        let result = engine.create_requirement(
            &impostor_ctx,
            buyer.id,
            commodity.id,
            50.0,
            "MT".into(),
            7200,
            None,
            vec![LocationSpec::registered("L1")],
            Map::new(),
            Utc::now() + chrono::Duration::days(10),
            "idem-1",
        );
        assert!(matches!(result, Err(e) if e.code == ErrorCode::Unauthorized));
    }

    #[tokio::test]
    async fn create_requirement_succeeds_and_is_idempotent() {
        let engine = test_engine();
        let buyer = make_partner(PartnerType::Buyer, "IN");
        let commodity = make_commodity();
        engine.store.upsert_partner(&buyer).unwrap();
        engine.store.upsert_commodity(&commodity).unwrap();
        engine
            .store
            .insert_partner_document(&verified_doc(buyer.id, DocumentType::Gst))
            .unwrap();
        engine
            .store
            .insert_partner_document(&verified_doc(buyer.id, DocumentType::Pan))
            .unwrap();

        let ctx = CommandContext::external(UserId::new(), buyer.id);
        let req1 = engine
            .create_requirement(
                &ctx,
                buyer.id,
                commodity.id,
                50.0,
                "MT".into(),
                7200,
                None,
                vec![LocationSpec::registered("L1")],
                Map::new(),
                Utc::now() + chrono::Duration::days(10),
                "idem-1",
            )
            .unwrap();
        let req2 = engine
            .create_requirement(
                &ctx,
                buyer.id,
                commodity.id,
                50.0,
                "MT".into(),
                7200,
                None,
                vec![LocationSpec::registered("L1")],
                Map::new(),
                Utc::now() + chrono::Duration::days(10),
                "idem-1",
            )
            .unwrap();
        assert_eq!(req1.id, req2.id);
    }

    #[tokio::test]
    async fn circular_trading_blocks_same_day_opposite_side() {
        let engine = test_engine();
        let trader = make_partner(PartnerType::Trader, "IN");
        let commodity = make_commodity();
        engine.store.upsert_partner(&trader).unwrap();
        engine.store.upsert_commodity(&commodity).unwrap();
        engine
            .store
            .insert_partner_document(&verified_doc(trader.id, DocumentType::Gst))
            .unwrap();
        engine
            .store
            .insert_partner_document(&verified_doc(trader.id, DocumentType::Pan))
            .unwrap();

        let ctx = CommandContext::external(UserId::new(), trader.id);
        engine
            .create_requirement(
                &ctx,
                trader.id,
                commodity.id,
                10.0,
                "MT".into(),
                100,
                None,
                vec![LocationSpec::registered("L1")],
                Map::new(),
                Utc::now() + chrono::Duration::days(5),
                "buy-1",
            )
            .unwrap();

        let result = engine.create_availability(
            &ctx,
            trader.id,
            commodity.id,
            10.0,
            "MT".into(),
            90,
            None,
            LocationSpec::registered("L1"),
            vec![],
            Map::new(),
            Utc::now() + chrono::Duration::days(5),
            "sell-1",
        );
        assert!(matches!(result, Err(e) if e.code == ErrorCode::CircularTrading));
    }
}
