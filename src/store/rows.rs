//! Row <-> entity mapping and hand-written SQL (matching the
//! template's preference for direct `conn.prepare(...)` over an ORM").

use crate::domain::*;
use crate::ids::*;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::str::FromStr;

fn parse_dt(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn parse_id<T>(s: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    s.parse::<T>()
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn parse_json<T: serde::de::DeserializeOwned>(s: &str) -> rusqlite::Result<T> {
    serde_json::from_str(s).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn parse_enum<T>(s: &str, from_str: fn(&str) -> Option<T>, type_name: &'static str) -> rusqlite::Result<T> {
    from_str(s).ok_or_else(|| {
        rusqlite::Error::ToSqlConversionFailure(format!("invalid {type_name}: {s:?}").into())
    })
}

// ---- Partners --------------------------------------------------------------

pub fn upsert_partner(tx: &Transaction, p: &Partner) -> Result<()> {
    tx.execute(
        "INSERT INTO partners (id, legal_name, partner_type, primary_country, tax_id, national_id, mobile, email, rating, payment_performance, delivery_performance, credit_limit, credit_used, corporate_group_id, parent_partner_id, status, version)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)
         ON CONFLICT(id) DO UPDATE SET
           legal_name=excluded.legal_name, partner_type=excluded.partner_type,
           primary_country=excluded.primary_country, tax_id=excluded.tax_id,
           national_id=excluded.national_id, mobile=excluded.mobile, email=excluded.email,
           rating=excluded.rating, payment_performance=excluded.payment_performance,
           delivery_performance=excluded.delivery_performance, credit_limit=excluded.credit_limit,
           credit_used=excluded.credit_used, corporate_group_id=excluded.corporate_group_id,
           parent_partner_id=excluded.parent_partner_id, status=excluded.status, version=excluded.version",
        params![
            p.id.to_string(),
            p.legal_name,
            p.partner_type.as_str(),
            p.primary_country,
            p.tax_id,
            p.national_id,
            p.mobile,
            p.email,
            p.rating,
            p.payment_performance,
            p.delivery_performance,
            p.credit_limit,
            p.credit_used,
            p.corporate_group_id,
            p.parent_partner_id.map(|id| id.to_string()),
            p.status.as_str(),
            p.version,
        ],
    )
    .context("upserting partner")?;
    Ok(())
}

fn row_to_partner(row: &Row) -> rusqlite::Result<Partner> {
    let id: String = row.get("id")?;
    let parent: Option<String> = row.get("parent_partner_id")?;
    Ok(Partner {
        id: parse_id(&id)?,
        legal_name: row.get("legal_name")?,
        partner_type: parse_enum(&row.get::<_, String>("partner_type")?, PartnerType::from_str, "partner_type")?,
        primary_country: row.get("primary_country")?,
        tax_id: row.get("tax_id")?,
        national_id: row.get("national_id")?,
        mobile: row.get("mobile")?,
        email: row.get("email")?,
        rating: row.get("rating")?,
        payment_performance: row.get("payment_performance")?,
        delivery_performance: row.get("delivery_performance")?,
        credit_limit: row.get("credit_limit")?,
        credit_used: row.get("credit_used")?,
        corporate_group_id: row.get("corporate_group_id")?,
        parent_partner_id: parent.map(|s| parse_id(&s)).transpose()?,
        status: parse_enum(&row.get::<_, String>("status")?, PartnerStatus::from_str, "partner status")?,
        version: row.get("version")?,
    })
}

pub fn get_partner(conn: &Connection, id: PartnerId) -> Result<Option<Partner>> {
    conn.query_row(
        "SELECT * FROM partners WHERE id = ?1",
        params![id.to_string()],
        row_to_partner,
    )
    .optional()
    .context("fetching partner")
}

pub fn insert_partner_document(tx: &Transaction, d: &PartnerDocument) -> Result<()> {
    tx.execute(
        "INSERT INTO partner_documents (id, partner_id, document_type, ocr_data, issue_date, expiry_date, verified)
         VALUES (?1,?2,?3,?4,?5,?6,?7)",
        params![
            d.id.to_string(),
            d.partner_id.to_string(),
            d.document_type.as_str(),
            serde_json::to_string(&d.ocr_data)?,
            d.issue_date.to_rfc3339(),
            d.expiry_date.map(|e| e.to_rfc3339()),
            d.verified,
        ],
    )
    .context("inserting partner document")?;
    Ok(())
}

fn row_to_document(row: &Row) -> rusqlite::Result<PartnerDocument> {
    let ocr_raw: String = row.get("ocr_data")?;
    let expiry: Option<String> = row.get("expiry_date")?;
    Ok(PartnerDocument {
        id: parse_id(&row.get::<_, String>("id")?)?,
        partner_id: parse_id(&row.get::<_, String>("partner_id")?)?,
        document_type: parse_enum(&row.get::<_, String>("document_type")?, DocumentType::from_str, "document_type")?,
        ocr_data: parse_json(&ocr_raw).unwrap_or_default(),
        issue_date: parse_dt(&row.get::<_, String>("issue_date")?)?,
        expiry_date: expiry.map(|e| parse_dt(&e)).transpose()?,
        verified: row.get("verified")?,
    })
}

pub fn list_partner_documents(conn: &Connection, partner_id: PartnerId) -> Result<Vec<PartnerDocument>> {
    let mut stmt = conn.prepare("SELECT * FROM partner_documents WHERE partner_id = ?1")?;
    let rows = stmt
        .query_map(params![partner_id.to_string()], row_to_document)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("listing partner documents")?;
    Ok(rows)
}

// ---- Commodities ------------------------------------------------------------

pub fn upsert_commodity(conn: &Connection, c: &Commodity) -> Result<()> {
    conn.execute(
        "INSERT INTO commodities (id, name, category, export_regulations, import_regulations, supported_currencies, quality_standards, seasonal_commodity, harvest_season, shelf_life_days)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
         ON CONFLICT(id) DO UPDATE SET
           name=excluded.name, category=excluded.category,
           export_regulations=excluded.export_regulations, import_regulations=excluded.import_regulations,
           supported_currencies=excluded.supported_currencies, quality_standards=excluded.quality_standards,
           seasonal_commodity=excluded.seasonal_commodity, harvest_season=excluded.harvest_season,
           shelf_life_days=excluded.shelf_life_days",
        params![
            c.id.to_string(),
            c.name,
            c.category,
            serde_json::to_string(&c.export_regulations)?,
            serde_json::to_string(&c.import_regulations)?,
            serde_json::to_string(&c.supported_currencies)?,
            serde_json::to_string(&c.quality_standards)?,
            c.seasonal_commodity,
            c.harvest_season,
            c.shelf_life_days,
        ],
    )
    .context("upserting commodity")?;
    Ok(())
}

fn row_to_commodity(row: &Row) -> rusqlite::Result<Commodity> {
    Ok(Commodity {
        id: parse_id(&row.get::<_, String>("id")?)?,
        name: row.get("name")?,
        category: row.get("category")?,
        export_regulations: parse_json(&row.get::<_, String>("export_regulations")?)?,
        import_regulations: parse_json(&row.get::<_, String>("import_regulations")?)?,
        supported_currencies: parse_json(&row.get::<_, String>("supported_currencies")?)?,
        quality_standards: parse_json(&row.get::<_, String>("quality_standards")?)?,
        seasonal_commodity: row.get("seasonal_commodity")?,
        harvest_season: row.get("harvest_season")?,
        shelf_life_days: row.get("shelf_life_days")?,
    })
}

pub fn get_commodity(conn: &Connection, id: CommodityId) -> Result<Option<Commodity>> {
    conn.query_row(
        "SELECT * FROM commodities WHERE id = ?1",
        params![id.to_string()],
        row_to_commodity,
    )
    .optional()
    .context("fetching commodity")
}

// ---- Requirements -------------------------------------------------------------

pub fn insert_requirement(tx: &Transaction, r: &Requirement) -> Result<()> {
    tx.execute(
        "INSERT INTO requirements (id, buyer_id, commodity_id, quantity, remaining_quantity, unit, target_price, max_price, delivery_locations, accepted_quality_params, valid_until, status, risk_precheck_status, ai_budget_flag, created_at, created_date, dedup_hash, version)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)",
        params![
            r.id.to_string(),
            r.buyer_id.to_string(),
            r.commodity_id.to_string(),
            r.quantity,
            r.remaining_quantity,
            r.unit,
            r.target_price,
            r.max_price,
            serde_json::to_string(&r.delivery_locations)?,
            serde_json::to_string(&r.accepted_quality_params)?,
            r.valid_until.to_rfc3339(),
            r.status.as_str(),
            format!("{:?}", r.risk_precheck_status).to_uppercase(),
            r.ai_budget_flag,
            r.created_at.to_rfc3339(),
            r.created_at.date_naive().to_string(),
            r.dedup_key(),
            r.version,
        ],
    )
    .context("inserting requirement")?;
    Ok(())
}

fn row_to_requirement(row: &Row) -> rusqlite::Result<Requirement> {
    Ok(Requirement {
        id: parse_id(&row.get::<_, String>("id")?)?,
        buyer_id: parse_id(&row.get::<_, String>("buyer_id")?)?,
        commodity_id: parse_id(&row.get::<_, String>("commodity_id")?)?,
        quantity: row.get("quantity")?,
        remaining_quantity: row.get("remaining_quantity")?,
        unit: row.get("unit")?,
        target_price: row.get("target_price")?,
        max_price: row.get("max_price")?,
        delivery_locations: parse_json(&row.get::<_, String>("delivery_locations")?)?,
        accepted_quality_params: parse_json(&row.get::<_, String>("accepted_quality_params")?)?,
        valid_until: parse_dt(&row.get::<_, String>("valid_until")?)?,
        status: parse_enum(&row.get::<_, String>("status")?, RequirementStatus::from_str, "requirement status")?,
        risk_precheck_status: match row.get::<_, String>("risk_precheck_status")?.as_str() {
            "PASS" => RiskPrecheckStatus::Pass,
            "WARN" => RiskPrecheckStatus::Warn,
            _ => RiskPrecheckStatus::Fail,
        },
        ai_budget_flag: row.get("ai_budget_flag")?,
        created_at: parse_dt(&row.get::<_, String>("created_at")?)?,
        version: row.get("version")?,
    })
}

pub fn get_requirement(conn: &Connection, id: RequirementId) -> Result<Option<Requirement>> {
    conn.query_row(
        "SELECT * FROM requirements WHERE id = ?1",
        params![id.to_string()],
        row_to_requirement,
    )
    .optional()
    .context("fetching requirement")
}

pub fn list_open_requirements_for_buyer(conn: &Connection, buyer_id: PartnerId) -> Result<Vec<Requirement>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM requirements WHERE buyer_id = ?1 AND status IN ('draft','active','partially_fulfilled')",
    )?;
    let rows = stmt
        .query_map(params![buyer_id.to_string()], row_to_requirement)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("listing open requirements for buyer")?;
    Ok(rows)
}

pub fn list_open_requirements(conn: &Connection) -> Result<Vec<Requirement>> {
    let mut stmt =
        conn.prepare("SELECT * FROM requirements WHERE status IN ('draft','active','partially_fulfilled')")?;
    let rows = stmt
        .query_map([], row_to_requirement)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("listing open requirements")?;
    Ok(rows)
}

pub fn update_requirement(tx: &Transaction, r: &Requirement, expected_version: u32) -> Result<usize> {
    let affected = tx
        .execute(
            "UPDATE requirements SET remaining_quantity=?1, status=?2, risk_precheck_status=?3, version=?4
             WHERE id=?5 AND version=?6",
            params![
                r.remaining_quantity,
                r.status.as_str(),
                format!("{:?}", r.risk_precheck_status).to_uppercase(),
                r.version,
                r.id.to_string(),
                expected_version,
            ],
        )
        .context("updating requirement")?;
    Ok(affected)
}

// ---- Availabilities -----------------------------------------------------------

pub fn insert_availability(tx: &Transaction, a: &Availability) -> Result<()> {
    let (lat, lng) = a.origin_location.coordinates().unzip();
    tx.execute(
        "INSERT INTO availabilities (id, seller_id, commodity_id, quantity, remaining_quantity, unit, asking_price, min_price, origin_location, delivery_locations, quality_params, valid_until, status, created_at, created_date, dedup_hash, origin_lat, origin_lng, version)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)",
        params![
            a.id.to_string(),
            a.seller_id.to_string(),
            a.commodity_id.to_string(),
            a.quantity,
            a.remaining_quantity,
            a.unit,
            a.asking_price,
            a.min_price,
            serde_json::to_string(&a.origin_location)?,
            serde_json::to_string(&a.delivery_locations)?,
            serde_json::to_string(&a.quality_params)?,
            a.valid_until.to_rfc3339(),
            a.status.as_str(),
            a.created_at.to_rfc3339(),
            a.created_at.date_naive().to_string(),
            a.dedup_key(),
            lat,
            lng,
            a.version,
        ],
    )
    .context("inserting availability")?;
    Ok(())
}

fn row_to_availability(row: &Row) -> rusqlite::Result<Availability> {
    Ok(Availability {
        id: parse_id(&row.get::<_, String>("id")?)?,
        seller_id: parse_id(&row.get::<_, String>("seller_id")?)?,
        commodity_id: parse_id(&row.get::<_, String>("commodity_id")?)?,
        quantity: row.get("quantity")?,
        remaining_quantity: row.get("remaining_quantity")?,
        unit: row.get("unit")?,
        asking_price: row.get("asking_price")?,
        min_price: row.get("min_price")?,
        origin_location: parse_json(&row.get::<_, String>("origin_location")?)?,
        delivery_locations: parse_json(&row.get::<_, String>("delivery_locations")?)?,
        quality_params: parse_json(&row.get::<_, String>("quality_params")?)?,
        valid_until: parse_dt(&row.get::<_, String>("valid_until")?)?,
        status: parse_enum(&row.get::<_, String>("status")?, AvailabilityStatus::from_str, "availability status")?,
        created_at: parse_dt(&row.get::<_, String>("created_at")?)?,
        version: row.get("version")?,
    })
}

pub fn get_availability(conn: &Connection, id: AvailabilityId) -> Result<Option<Availability>> {
    conn.query_row(
        "SELECT * FROM availabilities WHERE id = ?1",
        params![id.to_string()],
        row_to_availability,
    )
    .optional()
    .context("fetching availability")
}

pub fn list_open_availabilities_for_seller(conn: &Connection, seller_id: PartnerId) -> Result<Vec<Availability>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM availabilities WHERE seller_id = ?1 AND status IN ('available','partially_sold')",
    )?;
    let rows = stmt
        .query_map(params![seller_id.to_string()], row_to_availability)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("listing open availabilities for seller")?;
    Ok(rows)
}

pub fn update_availability(tx: &Transaction, a: &Availability, expected_version: u32) -> Result<usize> {
    let affected = tx
        .execute(
            "UPDATE availabilities SET remaining_quantity=?1, status=?2, version=?3
             WHERE id=?4 AND version=?5",
            params![
                a.remaining_quantity,
                a.status.as_str(),
                a.version,
                a.id.to_string(),
                expected_version,
            ],
        )
        .context("updating availability")?;
    Ok(affected)
}

// ---- Matches --------------------------------------------------------------------

pub fn insert_match(tx: &Transaction, m: &Match) -> Result<()> {
    tx.execute(
        "INSERT INTO matches (id, requirement_id, availability_id, commodity_id, matched_quantity, matched_price, score_breakdown, risk_decision, risk_reasons, status, negotiation_id, created_at, version)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
        params![
            m.id.to_string(),
            m.requirement_id.to_string(),
            m.availability_id.to_string(),
            m.commodity_id.to_string(),
            m.matched_quantity,
            m.matched_price,
            serde_json::to_string(&m.score_breakdown)?,
            format!("{:?}", m.risk_decision).to_uppercase(),
            serde_json::to_string(&m.risk_reasons)?,
            m.status.as_str(),
            m.negotiation_id.map(|id| id.to_string()),
            m.created_at.to_rfc3339(),
            m.version,
        ],
    )
    .context("inserting match")?;
    Ok(())
}

fn row_to_match(row: &Row) -> rusqlite::Result<Match> {
    let neg: Option<String> = row.get("negotiation_id")?;
    Ok(Match {
        id: parse_id(&row.get::<_, String>("id")?)?,
        requirement_id: parse_id(&row.get::<_, String>("requirement_id")?)?,
        availability_id: parse_id(&row.get::<_, String>("availability_id")?)?,
        commodity_id: parse_id(&row.get::<_, String>("commodity_id")?)?,
        matched_quantity: row.get("matched_quantity")?,
        matched_price: row.get("matched_price")?,
        score_breakdown: parse_json(&row.get::<_, String>("score_breakdown")?)?,
        risk_decision: match row.get::<_, String>("risk_decision")?.as_str() {
            "PASS" => RiskDecision::Pass,
            "WARN" => RiskDecision::Warn,
            _ => RiskDecision::Block,
        },
        risk_reasons: parse_json(&row.get::<_, String>("risk_reasons")?)?,
        status: parse_enum(&row.get::<_, String>("status")?, MatchStatus::from_str, "match status")?,
        negotiation_id: neg.map(|s| parse_id(&s)).transpose()?,
        created_at: parse_dt(&row.get::<_, String>("created_at")?)?,
        version: row.get("version")?,
    })
}

pub fn get_match(conn: &Connection, id: MatchId) -> Result<Option<Match>> {
    conn.query_row("SELECT * FROM matches WHERE id = ?1", params![id.to_string()], row_to_match)
        .optional()
        .context("fetching match")
}

pub fn update_match(tx: &Transaction, m: &Match, expected_version: u32) -> Result<usize> {
    let affected = tx
        .execute(
            "UPDATE matches SET status=?1, negotiation_id=?2, version=?3 WHERE id=?4 AND version=?5",
            params![
                m.status.as_str(),
                m.negotiation_id.map(|id| id.to_string()),
                m.version,
                m.id.to_string(),
                expected_version,
            ],
        )
        .context("updating match")?;
    Ok(affected)
}

pub fn list_matches_for_requirement(conn: &Connection, requirement_id: RequirementId) -> Result<Vec<Match>> {
    let mut stmt = conn.prepare("SELECT * FROM matches WHERE requirement_id = ?1 ORDER BY created_at DESC")?;
    let rows = stmt
        .query_map(params![requirement_id.to_string()], row_to_match)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("listing matches for requirement")?;
    Ok(rows)
}

pub fn list_matches_for_availability(conn: &Connection, availability_id: AvailabilityId) -> Result<Vec<Match>> {
    let mut stmt = conn.prepare("SELECT * FROM matches WHERE availability_id = ?1 ORDER BY created_at DESC")?;
    let rows = stmt
        .query_map(params![availability_id.to_string()], row_to_match)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("listing matches for availability")?;
    Ok(rows)
}

pub fn recent_matches_for_pair(
    conn: &Connection,
    requirement_id: RequirementId,
    availability_id: AvailabilityId,
    window_secs: i64,
) -> Result<Vec<Match>> {
    let cutoff = (Utc::now() - chrono::Duration::seconds(window_secs)).to_rfc3339();
    let mut stmt = conn.prepare(
        "SELECT * FROM matches WHERE requirement_id = ?1 AND availability_id = ?2 AND created_at >= ?3",
    )?;
    let rows = stmt
        .query_map(params![requirement_id.to_string(), availability_id.to_string(), cutoff], row_to_match)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("listing recent matches")?;
    Ok(rows)
}

// ---- Negotiations, Offers, Messages -----------------------------------------------

pub fn insert_negotiation(tx: &Transaction, n: &Negotiation) -> Result<()> {
    tx.execute(
        "INSERT INTO negotiations (id, match_id, buyer_id, seller_id, status, current_price, current_quantity, round, expires_at, created_at, version)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
        params![
            n.id.to_string(),
            n.match_id.to_string(),
            n.buyer_id.to_string(),
            n.seller_id.to_string(),
            n.status.as_str(),
            n.current_price,
            n.current_quantity,
            n.round,
            n.expires_at.to_rfc3339(),
            n.created_at.to_rfc3339(),
            n.version,
        ],
    )
    .context("inserting negotiation")?;
    Ok(())
}

fn row_to_negotiation(row: &Row) -> rusqlite::Result<Negotiation> {
    Ok(Negotiation {
        id: parse_id(&row.get::<_, String>("id")?)?,
        match_id: parse_id(&row.get::<_, String>("match_id")?)?,
        buyer_id: parse_id(&row.get::<_, String>("buyer_id")?)?,
        seller_id: parse_id(&row.get::<_, String>("seller_id")?)?,
        status: parse_enum(&row.get::<_, String>("status")?, NegotiationStatus::from_str, "negotiation status")?,
        current_price: row.get("current_price")?,
        current_quantity: row.get("current_quantity")?,
        round: row.get("round")?,
        expires_at: parse_dt(&row.get::<_, String>("expires_at")?)?,
        created_at: parse_dt(&row.get::<_, String>("created_at")?)?,
        version: row.get("version")?,
    })
}

pub fn get_negotiation(conn: &Connection, id: NegotiationId) -> Result<Option<Negotiation>> {
    conn.query_row(
        "SELECT * FROM negotiations WHERE id = ?1",
        params![id.to_string()],
        row_to_negotiation,
    )
    .optional()
    .context("fetching negotiation")
}

pub fn list_active_negotiations(conn: &Connection) -> Result<Vec<Negotiation>> {
    let mut stmt = conn.prepare("SELECT * FROM negotiations WHERE status = 'active'")?;
    let rows = stmt
        .query_map([], row_to_negotiation)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("listing active negotiations")?;
    Ok(rows)
}

pub fn update_negotiation(tx: &Transaction, n: &Negotiation, expected_version: u32) -> Result<usize> {
    let affected = tx
        .execute(
            "UPDATE negotiations SET status=?1, current_price=?2, current_quantity=?3, round=?4, version=?5
             WHERE id=?6 AND version=?7",
            params![
                n.status.as_str(),
                n.current_price,
                n.current_quantity,
                n.round,
                n.version,
                n.id.to_string(),
                expected_version,
            ],
        )
        .context("updating negotiation")?;
    Ok(affected)
}

pub fn insert_offer(tx: &Transaction, o: &Offer) -> Result<()> {
    tx.execute(
        "INSERT INTO offers (id, negotiation_id, origin, price, quantity, round, created_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7)",
        params![
            o.id.to_string(),
            o.negotiation_id.to_string(),
            format!("{:?}", o.origin),
            o.price,
            o.quantity,
            o.round,
            o.created_at.to_rfc3339(),
        ],
    )
    .context("inserting offer")?;
    Ok(())
}

fn row_to_offer(row: &Row) -> rusqlite::Result<Offer> {
    let origin_raw: String = row.get("origin")?;
    let origin = match origin_raw.as_str() {
        "Buyer" => OfferOrigin::Buyer,
        "Seller" => OfferOrigin::Seller,
        _ => OfferOrigin::AiSuggested,
    };
    Ok(Offer {
        id: parse_id(&row.get::<_, String>("id")?)?,
        negotiation_id: parse_id(&row.get::<_, String>("negotiation_id")?)?,
        origin,
        price: row.get("price")?,
        quantity: row.get("quantity")?,
        round: row.get("round")?,
        created_at: parse_dt(&row.get::<_, String>("created_at")?)?,
    })
}

pub fn list_offers(conn: &Connection, negotiation_id: NegotiationId) -> Result<Vec<Offer>> {
    let mut stmt = conn.prepare("SELECT * FROM offers WHERE negotiation_id = ?1 ORDER BY round ASC")?;
    let rows = stmt
        .query_map(params![negotiation_id.to_string()], row_to_offer)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("listing offers")?;
    Ok(rows)
}

pub fn insert_message(tx: &Transaction, m: &Message) -> Result<()> {
    tx.execute(
        "INSERT INTO messages (id, negotiation_id, sender_id, body, visibility, created_at)
         VALUES (?1,?2,?3,?4,?5,?6)",
        params![
            m.id.to_string(),
            m.negotiation_id.to_string(),
            m.sender_id.to_string(),
            m.body,
            format!("{:?}", m.visibility),
            m.created_at.to_rfc3339(),
        ],
    )
    .context("inserting message")?;
    Ok(())
}

// ---- Outbox -----------------------------------------------------------------------

fn row_to_outbox(row: &Row) -> rusqlite::Result<OutboxRecord> {
    let dispatched: Option<String> = row.get("dispatched_at")?;
    Ok(OutboxRecord {
        id: parse_id(&row.get::<_, String>("id")?)?,
        aggregate_type: row.get("aggregate_type")?,
        aggregate_id: row.get("aggregate_id")?,
        event_type: row.get("event_type")?,
        payload: parse_json(&row.get::<_, String>("payload")?)?,
        status: parse_enum(&row.get::<_, String>("status")?, OutboxStatus::from_str, "outbox status")?,
        attempts: row.get("attempts")?,
        next_attempt_at: parse_dt(&row.get::<_, String>("next_attempt_at")?)?,
        created_at: parse_dt(&row.get::<_, String>("created_at")?)?,
        dispatched_at: dispatched.map(|d| parse_dt(&d)).transpose()?,
    })
}

pub fn claim_outbox_batch(conn: &Connection, limit: usize) -> Result<Vec<OutboxRecord>> {
    let now = Utc::now().to_rfc3339();
    let mut stmt = conn.prepare(
        "SELECT * FROM outbox WHERE status = 'pending' AND next_attempt_at <= ?1 ORDER BY created_at ASC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![now, limit as i64], row_to_outbox)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("claiming outbox batch")?;
    Ok(rows)
}

pub fn mark_outbox_dispatched(conn: &Connection, id: OutboxId) -> Result<()> {
    conn.execute(
        "UPDATE outbox SET status='dispatched', dispatched_at=?1 WHERE id=?2",
        params![Utc::now().to_rfc3339(), id.to_string()],
    )
    .context("marking outbox dispatched")?;
    Ok(())
}

pub fn mark_outbox_retry(conn: &Connection, id: OutboxId, attempts: u32, next_attempt_at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE outbox SET status='pending', attempts=?1, next_attempt_at=?2 WHERE id=?3",
        params![attempts, next_attempt_at.to_rfc3339(), id.to_string()],
    )
    .context("marking outbox retry")?;
    Ok(())
}

pub fn mark_outbox_dead(conn: &Connection, id: OutboxId) -> Result<()> {
    conn.execute(
        "UPDATE outbox SET status='dead_lettered' WHERE id=?1",
        params![id.to_string()],
    )
    .context("marking outbox dead")?;
    Ok(())
}

// ---- Idempotency ----------------------------------------------------------------------

pub fn check_idempotency(conn: &Connection, command_type: &str, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT entity_id FROM idempotency_log WHERE command_type = ?1 AND idempotency_key = ?2",
        params![command_type, key],
        |row| row.get(0),
    )
    .optional()
    .context("checking idempotency log")
}

pub fn record_idempotency(conn: &Connection, command_type: &str, key: &str, entity_id: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO idempotency_log (command_type, idempotency_key, entity_id, created_at)
         VALUES (?1,?2,?3,?4)",
        params![command_type, key, entity_id, Utc::now().to_rfc3339()],
    )
    .context("recording idempotency")?;
    Ok(())
}
