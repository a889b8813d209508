//! Property-style checks for invariants that must hold across every code
//! path, not just the happy-path scenarios: quantity conservation, exactly-
//! once idempotency, the FAIL short-circuit, the outbox co-write, the WARN
//! score multiplier, and the circular-trading day boundary.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tradecore_engine::collaborators::{InMemoryDocumentService, InMemoryIdentityProvider, StaticSanctionsList};
use tradecore_engine::config::{CommodityConfig, PlatformConfig};
use tradecore_engine::context::CommandContext;
use tradecore_engine::domain::*;
use tradecore_engine::ids::*;
use tradecore_engine::matching::SchedulerEvent;
use tradecore_engine::risk::{self, RiskStatus};
use tradecore_engine::scoring::score_pair;
use tradecore_engine::store::queries::OrderSide;
use tradecore_engine::store::EntityStore;
use tradecore_engine::Engine;

fn test_engine() -> Arc<Engine> {
    let store = Arc::new(EntityStore::in_memory().unwrap());
    let identity = Arc::new(InMemoryIdentityProvider::new());
    let documents = Arc::new(InMemoryDocumentService::new());
    let sanctions = Arc::new(StaticSanctionsList::new(Vec::<String>::new()));
    let mut config = PlatformConfig::from_env();
    config.db_path = ":memory:".into();
    Arc::new(Engine::new(config, store, identity, documents, sanctions))
}

fn partner(partner_type: PartnerType, country: &str) -> Partner {
    Partner {
        id: PartnerId::new(),
        legal_name: format!("{partner_type:?} co"),
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
        ocr_data: HashMap::new(),
        issue_date: Utc::now() - Duration::days(30),
        expiry_date: Some(Utc::now() + Duration::days(365)),
        verified: true,
    }
}

fn domestic_commodity() -> Commodity {
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

fn give_domestic_docs(engine: &Engine, partner_id: PartnerId) {
    engine.store.insert_partner_document(&verified_doc(partner_id, DocumentType::Gst)).unwrap();
    engine.store.insert_partner_document(&verified_doc(partner_id, DocumentType::Pan)).unwrap();
}

async fn drain(engine: &Engine) {
    engine.scheduler.drain_once().await;
}

fn requirement_fixture(buyer_id: PartnerId, commodity_id: CommodityId, quantity: f64) -> Requirement {
    Requirement {
        id: RequirementId::new(),
        buyer_id,
        commodity_id,
        quantity,
        remaining_quantity: quantity,
        unit: "MT".into(),
        target_price: 7200,
        max_price: None,
        delivery_locations: vec![LocationSpec::registered("L1")],
        accepted_quality_params: HashMap::new(),
        valid_until: Utc::now() + Duration::days(10),
        status: RequirementStatus::Active,
        risk_precheck_status: RiskPrecheckStatus::Pass,
        ai_budget_flag: false,
        created_at: Utc::now(),
        version: 1,
    }
}

fn availability_fixture(seller_id: PartnerId, commodity_id: CommodityId, quantity: f64) -> Availability {
    Availability {
        id: AvailabilityId::new(),
        seller_id,
        commodity_id,
        quantity,
        remaining_quantity: quantity,
        unit: "MT".into(),
        asking_price: 7150,
        min_price: None,
        origin_location: LocationSpec::registered("L1"),
        delivery_locations: vec![],
        quality_params: HashMap::new(),
        valid_until: Utc::now() + Duration::days(10),
        status: AvailabilityStatus::Available,
        created_at: Utc::now(),
        version: 1,
    }
}

// ---- remaining_quantity conservation under a partial fill ------------------

#[tokio::test]
async fn partial_fill_conserves_quantity_on_both_sides() {
    let engine = test_engine();
    let commodity = domestic_commodity();
    engine.store.upsert_commodity(&commodity).unwrap();

    let buyer = partner(PartnerType::Buyer, "IN");
    let seller = partner(PartnerType::Seller, "IN");
    engine.store.upsert_partner(&buyer).unwrap();
    engine.store.upsert_partner(&seller).unwrap();
    give_domestic_docs(&engine, buyer.id);
    give_domestic_docs(&engine, seller.id);

    let buyer_ctx = CommandContext::external(UserId::new(), buyer.id);
    let seller_ctx = CommandContext::external(UserId::new(), seller.id);

    // Requirement asks for 12, availability only offers 7 — a partial fill.
    let requirement = engine
        .create_requirement(
            &buyer_ctx,
            buyer.id,
            commodity.id,
            12.0,
            "MT".into(),
            7200,
            None,
            vec![LocationSpec::registered("L1")],
            HashMap::new(),
            Utc::now() + Duration::days(10),
            "req-partial",
        )
        .unwrap();
    let availability = engine
        .create_availability(
            &seller_ctx,
            seller.id,
            commodity.id,
            7.0,
            "MT".into(),
            7150,
            None,
            LocationSpec::registered("L1"),
            vec![],
            HashMap::new(),
            Utc::now() + Duration::days(10),
            "avail-partial",
        )
        .unwrap();

    engine
        .scheduler
        .enqueue(SchedulerEvent::RequirementCreated { requirement_id: requirement.id })
        .await;
    drain(&engine).await;

    let matches = engine.matches_for_requirement(&buyer_ctx, requirement.id).unwrap();
    assert_eq!(matches.len(), 1);
    let matched_quantity = matches[0].matched_quantity;
    assert!((matched_quantity - 7.0).abs() < 1e-9, "the smaller side's full quantity is matched");

    let final_requirement = engine.store.get_requirement(requirement.id).unwrap().unwrap();
    let final_availability = engine.store.get_availability(availability.id).unwrap().unwrap();

    assert!((final_requirement.remaining_quantity + matched_quantity - 12.0).abs() < 1e-9);
    assert_eq!(final_requirement.status, RequirementStatus::PartiallyFulfilled);
    assert!((final_availability.remaining_quantity + matched_quantity - 7.0).abs() < 1e-9);
    assert_eq!(final_availability.status, AvailabilityStatus::SoldOut);
}

// ---- idempotency key dedup: repeat calls never create a second entity -----

#[tokio::test]
async fn repeat_create_requirement_with_same_key_returns_the_same_entity() {
    let engine = test_engine();
    let commodity = domestic_commodity();
    engine.store.upsert_commodity(&commodity).unwrap();

    let buyer = partner(PartnerType::Buyer, "IN");
    engine.store.upsert_partner(&buyer).unwrap();
    give_domestic_docs(&engine, buyer.id);
    let buyer_ctx = CommandContext::external(UserId::new(), buyer.id);

    let first = engine
        .create_requirement(
            &buyer_ctx,
            buyer.id,
            commodity.id,
            50.0,
            "MT".into(),
            7200,
            None,
            vec![LocationSpec::registered("L1")],
            HashMap::new(),
            Utc::now() + Duration::days(10),
            "dedup-key",
        )
        .unwrap();

    let second = engine
        .create_requirement(
            &buyer_ctx,
            buyer.id,
            commodity.id,
            999.0, // different payload, same key: ignored, the original wins
            "MT".into(),
            1,
            None,
            vec![],
            HashMap::new(),
            Utc::now() + Duration::days(10),
            "dedup-key",
        )
        .unwrap();

    assert_eq!(first.id, second.id);
    assert!((second.quantity - 50.0).abs() < 1e-9, "the replayed call must not mutate the original entity");
}

// ---- a FAIL-risk pair is never persisted as a Match ------------------------

#[tokio::test]
async fn fail_risk_pair_never_produces_a_persisted_match() {
    let engine = test_engine();
    let commodity = domestic_commodity();
    engine.store.upsert_commodity(&commodity).unwrap();

    let buyer = partner(PartnerType::Buyer, "IN");
    let mut seller = partner(PartnerType::Seller, "IN");
    // Exhausted credit headroom, bottom-of-scale rating and performance:
    // partner risk score collapses to 0, well under the 60 FAIL threshold.
    seller.credit_used = seller.credit_limit;
    seller.rating = 0.0;
    seller.delivery_performance = 0.0;
    engine.store.upsert_partner(&buyer).unwrap();
    engine.store.upsert_partner(&seller).unwrap();
    give_domestic_docs(&engine, buyer.id);
    give_domestic_docs(&engine, seller.id);

    let buyer_ctx = CommandContext::external(UserId::new(), buyer.id);
    let seller_ctx = CommandContext::external(UserId::new(), seller.id);

    let requirement = engine
        .create_requirement(
            &buyer_ctx,
            buyer.id,
            commodity.id,
            50.0,
            "MT".into(),
            7200,
            None,
            vec![LocationSpec::registered("L1")],
            HashMap::new(),
            Utc::now() + Duration::days(10),
            "req-fail-risk",
        )
        .unwrap();
    engine
        .create_availability(
            &seller_ctx,
            seller.id,
            commodity.id,
            60.0,
            "MT".into(),
            7150,
            None,
            LocationSpec::registered("L1"),
            vec![],
            HashMap::new(),
            Utc::now() + Duration::days(10),
            "avail-fail-risk",
        )
        .unwrap();

    engine
        .scheduler
        .enqueue(SchedulerEvent::RequirementCreated { requirement_id: requirement.id })
        .await;
    drain(&engine).await;

    let matches = engine.matches_for_requirement(&buyer_ctx, requirement.id).unwrap();
    assert!(matches.is_empty(), "a FAIL-risk pair must never be scored, allocated or persisted as a Match");
}

// ---- every state-changing write enqueues its outbox row in the same txn ---

#[tokio::test]
async fn requirement_creation_enqueues_its_outbox_row_atomically() {
    let engine = test_engine();
    let commodity = domestic_commodity();
    engine.store.upsert_commodity(&commodity).unwrap();

    let buyer = partner(PartnerType::Buyer, "IN");
    engine.store.upsert_partner(&buyer).unwrap();
    give_domestic_docs(&engine, buyer.id);
    let buyer_ctx = CommandContext::external(UserId::new(), buyer.id);

    let requirement = engine
        .create_requirement(
            &buyer_ctx,
            buyer.id,
            commodity.id,
            50.0,
            "MT".into(),
            7200,
            None,
            vec![LocationSpec::registered("L1")],
            HashMap::new(),
            Utc::now() + Duration::days(10),
            "req-outbox",
        )
        .unwrap();

    let batch = engine.store.claim_outbox_batch(10).unwrap();
    let row = batch
        .iter()
        .find(|r| r.aggregate_type == "requirement" && r.aggregate_id == requirement.id.to_string())
        .expect("insert_requirement must enqueue a RequirementCreated outbox row in the same transaction");
    assert_eq!(row.event_type, "RequirementCreated");
    assert_eq!(row.attempts, 0);
}

// ---- WARN always scores at exactly 0.9x of the equivalent PASS score ------

#[test]
fn warn_risk_status_scores_at_exactly_nine_tenths_of_pass_across_varied_pairs() {
    let cases: Vec<(f64, i64, i64)> = vec![
        (50.0, 7200, 7150),
        (10.0, 5000, 4800),
        (200.0, 12000, 12000),
    ];

    for (quantity, target_price, asking_price) in cases {
        let mut requirement = requirement_fixture(PartnerId::new(), CommodityId::new(), quantity);
        requirement.target_price = target_price;
        let mut availability = availability_fixture(PartnerId::new(), requirement.commodity_id, quantity);
        availability.asking_price = asking_price;

        let config = CommodityConfig::default();
        let pass = score_pair(&requirement, &availability, RiskStatus::Pass, &config, false);
        let warn = score_pair(&requirement, &availability, RiskStatus::Warn, &config, false);

        assert!(
            (warn.composite - pass.composite * 0.9).abs() < 1e-9,
            "WARN composite must be exactly 0.9x the PASS composite for the same pair"
        );
    }
}

// ---- delivery fit boundary: 1.0 at the origin, 0.0 at max_km --------------

#[test]
fn delivery_fit_is_one_at_zero_distance_and_zero_at_max_km() {
    let mut requirement = requirement_fixture(PartnerId::new(), CommodityId::new(), 10.0);
    requirement.delivery_locations = vec![LocationSpec::ad_hoc(10.0, 20.0, 0.0)];
    let mut availability = availability_fixture(PartnerId::new(), requirement.commodity_id, 10.0);
    availability.origin_location = LocationSpec::ad_hoc(10.0, 20.0, 0.0);

    // Isolate delivery_fit: give it the entire weight, zero everything else.
    let isolate_delivery = CommodityConfig {
        weight_quality: 0.0,
        weight_price: 0.0,
        weight_delivery: 1.0,
        weight_risk: 0.0,
        max_km: 100.0,
        ..CommodityConfig::default()
    };

    let same_point = score_pair(&requirement, &availability, RiskStatus::Pass, &isolate_delivery, false);
    assert!((same_point.composite - 1.0).abs() < 1e-9, "zero distance must score a perfect delivery fit");

    // Roughly 1 degree of latitude at the equator is ~111km; push the
    // availability's origin out past max_km and the fit must bottom out.
    let mut far_availability = availability;
    far_availability.origin_location = LocationSpec::ad_hoc(11.0, 20.0, 0.0);
    let far = score_pair(&requirement, &far_availability, RiskStatus::Pass, &isolate_delivery, false);
    assert!((far.composite - 0.0).abs() < 1e-9, "a pair past max_km must score zero delivery fit");
}

// ---- circular trading is blocked same-day, but not across a day boundary -

#[test]
fn circular_trading_blocks_same_day_but_not_the_next_day() {
    let store = EntityStore::in_memory().unwrap();
    let commodity = domestic_commodity();
    store.upsert_commodity(&commodity).unwrap();
    let trader = partner(PartnerType::Trader, "IN");
    store.upsert_partner(&trader).unwrap();

    let today = Utc::now().date_naive();
    let yesterday = today - chrono::Duration::days(1);

    // An open SELL availability posted "today" for this trader/commodity.
    let mut availability = availability_fixture(trader.id, commodity.id, 10.0);
    availability.status = AvailabilityStatus::Available;
    store.insert_availability(&availability).unwrap();

    let blocked = risk::check_circular_trading(&store, trader.id, commodity.id, OrderSide::Buy, today).unwrap();
    assert_eq!(blocked.status, RiskStatus::Fail, "an open opposite-side order the same day must fail the check");

    let allowed = risk::check_circular_trading(&store, trader.id, commodity.id, OrderSide::Buy, yesterday).unwrap();
    assert_eq!(allowed.status, RiskStatus::Pass, "the check is scoped to the given calendar day, not all history");
}
