//! End-to-end scenarios driving the matching, risk and negotiation engines
//! together through a shared `EntityStore`, the way a live deployment
//! would see a requirement and availability flow from creation to an
//! accepted negotiation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tradecore_engine::collaborators::{InMemoryDocumentService, InMemoryIdentityProvider, StaticSanctionsList};
use tradecore_engine::config::PlatformConfig;
use tradecore_engine::context::CommandContext;
use tradecore_engine::domain::*;
use tradecore_engine::ids::*;
use tradecore_engine::matching::SchedulerEvent;
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

/// Drains the scheduler's queue once and waits for every spawned matching
/// task to finish, the way the background drain loop does in production.
async fn drain(engine: &Engine) {
    engine.scheduler.drain_once().await;
}

// ---- Scenario A: domestic happy path, perfect score -----------------------

#[tokio::test]
async fn scenario_a_domestic_happy_path_proposes_a_perfectly_scored_match() {
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
            "req-a",
        )
        .unwrap();

    let availability = engine
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
            "avail-a",
        )
        .unwrap();

    engine
        .scheduler
        .enqueue(SchedulerEvent::RequirementCreated { requirement_id: requirement.id })
        .await;
    drain(&engine).await;

    let matches = engine.matches_for_requirement(&buyer_ctx, requirement.id).unwrap();
    assert_eq!(matches.len(), 1);
    let m = &matches[0];
    assert_eq!(m.availability_id, availability.id);
    assert_eq!(m.risk_decision, RiskDecision::Pass);
    assert!((m.score_breakdown.composite - 1.0).abs() < 1e-6);
    assert_eq!(m.status, MatchStatus::Proposed);
}

// ---- Scenario B: missing export license blocks an international pair -----

#[tokio::test]
async fn scenario_b_missing_export_license_blocks_the_match() {
    let engine = test_engine();
    let mut commodity = domestic_commodity();
    commodity.export_regulations.license_required = true;
    commodity.export_regulations.accepted_license_types = vec!["foreign_export_license".into()];
    engine.store.upsert_commodity(&commodity).unwrap();

    let buyer = partner(PartnerType::Buyer, "AE");
    let seller = partner(PartnerType::Seller, "IN");
    engine.store.upsert_partner(&buyer).unwrap();
    engine.store.upsert_partner(&seller).unwrap();
    give_domestic_docs(&engine, buyer.id);
    // Seller has no export license at all.
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
            "req-b",
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
            "avail-b",
        )
        .unwrap();

    engine
        .scheduler
        .enqueue(SchedulerEvent::RequirementCreated { requirement_id: requirement.id })
        .await;
    drain(&engine).await;

    let matches = engine.matches_for_requirement(&buyer_ctx, requirement.id).unwrap();
    assert!(matches.is_empty(), "missing export license must prevent a proposed match");
}

// ---- Scenario C: party-links between buyer and seller blocks the match ---

#[tokio::test]
async fn scenario_c_shared_tax_id_blocks_the_match() {
    let engine = test_engine();
    let commodity = domestic_commodity();
    engine.store.upsert_commodity(&commodity).unwrap();

    let mut seller = partner(PartnerType::Seller, "IN");
    let mut buyer = partner(PartnerType::Buyer, "IN");
    let shared_tax_id = "SHARED-TAX-1".to_string();
    buyer.tax_id = Some(shared_tax_id.clone());
    seller.tax_id = Some(shared_tax_id);
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
            "req-c",
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
            "avail-c",
        )
        .unwrap();

    engine
        .scheduler
        .enqueue(SchedulerEvent::RequirementCreated { requirement_id: requirement.id })
        .await;
    drain(&engine).await;

    let matches = engine.matches_for_requirement(&buyer_ctx, requirement.id).unwrap();
    assert!(matches.is_empty(), "a shared tax id is an insider-trading signal and must block the pair");
}

// ---- Scenario D: a WARN-level party link still proposes, scored at 0.9x --

#[tokio::test]
async fn scenario_d_shared_mobile_warns_and_applies_the_ninety_percent_penalty() {
    let engine = test_engine();
    let commodity = domestic_commodity();
    engine.store.upsert_commodity(&commodity).unwrap();

    let mut buyer = partner(PartnerType::Buyer, "IN");
    let mut seller = partner(PartnerType::Seller, "IN");
    let shared_mobile = "+911234567890".to_string();
    buyer.mobile = Some(shared_mobile.clone());
    seller.mobile = Some(shared_mobile);
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
            "req-d",
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
            "avail-d",
        )
        .unwrap();

    engine
        .scheduler
        .enqueue(SchedulerEvent::RequirementCreated { requirement_id: requirement.id })
        .await;
    drain(&engine).await;

    let matches = engine.matches_for_requirement(&buyer_ctx, requirement.id).unwrap();
    assert_eq!(matches.len(), 1);
    let m = &matches[0];
    assert_eq!(m.risk_decision, RiskDecision::Warn);
    // Quality/price/delivery are all 1.0 here; only the risk factor drops
    // from PASS (1.0) to WARN (0.5), and the whole composite then takes the
    // 0.9x WARN multiplier: (0.4 + 0.3 + 0.15 + 0.15 * 0.5) * 0.9 = 0.8325.
    assert!((m.score_breakdown.composite - 0.8325).abs() < 1e-6);
}

// ---- Scenario E: negotiation runs through offer/counter to acceptance ----

#[tokio::test]
async fn scenario_e_negotiation_accepts_after_a_counter_offer() {
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
            "req-e",
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
            "avail-e",
        )
        .unwrap();

    engine
        .scheduler
        .enqueue(SchedulerEvent::RequirementCreated { requirement_id: requirement.id })
        .await;
    drain(&engine).await;

    let m = engine.matches_for_requirement(&buyer_ctx, requirement.id).unwrap().remove(0);

    let negotiation = engine
        .start_negotiation(&seller_ctx, m.id, seller.id, 7150, 50.0)
        .unwrap();
    assert_eq!(negotiation.round, 1);

    let counter = engine.offer(&buyer_ctx, negotiation.id, buyer.id, 7175, 50.0).unwrap();
    assert_eq!(counter.round, 2);

    let accepted = engine.accept(&seller_ctx, negotiation.id, seller.id).unwrap();
    assert_eq!(accepted.status, NegotiationStatus::Accepted);

    // Idempotent re-application: a repeat accept by the same actor is a
    // no-op, not an error.
    let accepted_again = engine.accept(&seller_ctx, negotiation.id, seller.id).unwrap();
    assert_eq!(accepted_again.status, NegotiationStatus::Accepted);
}

// ---- Scenario F: concurrent allocation only lets one side win the race ---

#[tokio::test]
async fn scenario_f_two_requirements_competing_for_one_availability_only_one_wins_fully() {
    let engine = test_engine();
    let commodity = domestic_commodity();
    engine.store.upsert_commodity(&commodity).unwrap();

    let buyer_a = partner(PartnerType::Buyer, "IN");
    let buyer_b = partner(PartnerType::Buyer, "IN");
    let seller = partner(PartnerType::Seller, "IN");
    engine.store.upsert_partner(&buyer_a).unwrap();
    engine.store.upsert_partner(&buyer_b).unwrap();
    engine.store.upsert_partner(&seller).unwrap();
    give_domestic_docs(&engine, buyer_a.id);
    give_domestic_docs(&engine, buyer_b.id);
    give_domestic_docs(&engine, seller.id);

    let ctx_a = CommandContext::external(UserId::new(), buyer_a.id);
    let ctx_b = CommandContext::external(UserId::new(), buyer_b.id);
    let seller_ctx = CommandContext::external(UserId::new(), seller.id);

    let req_a = engine
        .create_requirement(
            &ctx_a,
            buyer_a.id,
            commodity.id,
            40.0,
            "MT".into(),
            7200,
            None,
            vec![LocationSpec::registered("L1")],
            HashMap::new(),
            Utc::now() + Duration::days(10),
            "req-f-a",
        )
        .unwrap();
    let req_b = engine
        .create_requirement(
            &ctx_b,
            buyer_b.id,
            commodity.id,
            40.0,
            "MT".into(),
            7200,
            None,
            vec![LocationSpec::registered("L1")],
            HashMap::new(),
            Utc::now() + Duration::days(10),
            "req-f-b",
        )
        .unwrap();

    // Only 40 units total — not enough to fully satisfy both 40-unit
    // requirements.
    let availability = engine
        .create_availability(
            &seller_ctx,
            seller.id,
            commodity.id,
            40.0,
            "MT".into(),
            7150,
            None,
            LocationSpec::registered("L1"),
            vec![],
            HashMap::new(),
            Utc::now() + Duration::days(10),
            "avail-f",
        )
        .unwrap();

    engine
        .scheduler
        .enqueue(SchedulerEvent::RequirementCreated { requirement_id: req_a.id })
        .await;
    engine
        .scheduler
        .enqueue(SchedulerEvent::RequirementCreated { requirement_id: req_b.id })
        .await;
    drain(&engine).await;

    let matches_a = engine.matches_for_requirement(&ctx_a, req_a.id).unwrap();
    let matches_b = engine.matches_for_requirement(&ctx_b, req_b.id).unwrap();
    let total_matched: f64 = matches_a.iter().chain(matches_b.iter()).map(|m| m.matched_quantity).sum();

    assert!(total_matched <= 40.0 + 1e-9, "allocation must never over-commit the availability's remaining quantity");

    let final_availability = engine.store.get_availability(availability.id).unwrap().unwrap();
    assert!(final_availability.remaining_quantity >= 0.0);
    assert!((final_availability.remaining_quantity - (40.0 - total_matched)).abs() < 1e-9);
}
