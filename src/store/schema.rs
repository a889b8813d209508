//! Centralised schema creation. Run once at bootstrap; every
//! statement is idempotent so repeated calls (e.g. in tests) are safe.

use anyhow::{Context, Result};
use rusqlite::Connection;

pub fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        ",
    )
    .context("setting pragmas")?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS partners (
            id TEXT PRIMARY KEY,
            legal_name TEXT NOT NULL,
            partner_type TEXT NOT NULL,
            primary_country TEXT NOT NULL,
            tax_id TEXT,
            national_id TEXT,
            mobile TEXT,
            email TEXT,
            rating REAL NOT NULL,
            payment_performance REAL NOT NULL,
            delivery_performance REAL NOT NULL,
            credit_limit INTEGER NOT NULL,
            credit_used INTEGER NOT NULL,
            corporate_group_id TEXT,
            parent_partner_id TEXT,
            status TEXT NOT NULL,
            version INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_partners_tax_id ON partners(tax_id);
        CREATE INDEX IF NOT EXISTS idx_partners_national_id ON partners(national_id);
        CREATE INDEX IF NOT EXISTS idx_partners_mobile ON partners(mobile);
        CREATE INDEX IF NOT EXISTS idx_partners_email_domain ON partners(email);

        CREATE TABLE IF NOT EXISTS partner_documents (
            id TEXT PRIMARY KEY,
            partner_id TEXT NOT NULL REFERENCES partners(id),
            document_type TEXT NOT NULL,
            ocr_data TEXT NOT NULL,
            issue_date TEXT NOT NULL,
            expiry_date TEXT,
            verified INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_documents_partner ON partner_documents(partner_id);

        CREATE TABLE IF NOT EXISTS commodities (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            export_regulations TEXT NOT NULL,
            import_regulations TEXT NOT NULL,
            supported_currencies TEXT NOT NULL,
            quality_standards TEXT NOT NULL,
            seasonal_commodity INTEGER NOT NULL,
            harvest_season TEXT,
            shelf_life_days INTEGER
        );

        CREATE TABLE IF NOT EXISTS requirements (
            id TEXT PRIMARY KEY,
            buyer_id TEXT NOT NULL REFERENCES partners(id),
            commodity_id TEXT NOT NULL REFERENCES commodities(id),
            quantity REAL NOT NULL,
            remaining_quantity REAL NOT NULL,
            unit TEXT NOT NULL,
            target_price INTEGER NOT NULL,
            max_price INTEGER,
            delivery_locations TEXT NOT NULL,
            accepted_quality_params TEXT NOT NULL,
            valid_until TEXT NOT NULL,
            status TEXT NOT NULL,
            risk_precheck_status TEXT NOT NULL,
            ai_budget_flag INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            created_date TEXT NOT NULL,
            dedup_hash TEXT NOT NULL,
            version INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS uq_requirements_dedup
            ON requirements(buyer_id, commodity_id, dedup_hash)
            WHERE status IN ('draft', 'active', 'partially_fulfilled');
        CREATE INDEX IF NOT EXISTS idx_requirements_circular
            ON requirements(buyer_id, commodity_id, created_date);
        CREATE INDEX IF NOT EXISTS idx_requirements_status ON requirements(status);

        CREATE TABLE IF NOT EXISTS availabilities (
            id TEXT PRIMARY KEY,
            seller_id TEXT NOT NULL REFERENCES partners(id),
            commodity_id TEXT NOT NULL REFERENCES commodities(id),
            quantity REAL NOT NULL,
            remaining_quantity REAL NOT NULL,
            unit TEXT NOT NULL,
            asking_price INTEGER NOT NULL,
            min_price INTEGER,
            origin_location TEXT NOT NULL,
            delivery_locations TEXT NOT NULL,
            quality_params TEXT NOT NULL,
            valid_until TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            created_date TEXT NOT NULL,
            dedup_hash TEXT NOT NULL,
            origin_lat REAL,
            origin_lng REAL,
            version INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS uq_availabilities_dedup
            ON availabilities(seller_id, commodity_id, dedup_hash)
            WHERE status IN ('available', 'partially_sold');
        CREATE INDEX IF NOT EXISTS idx_availabilities_circular
            ON availabilities(seller_id, commodity_id, created_date);
        CREATE INDEX IF NOT EXISTS idx_availabilities_status ON availabilities(status);
        CREATE INDEX IF NOT EXISTS idx_availabilities_bbox
            ON availabilities(origin_lat, origin_lng);

        CREATE TABLE IF NOT EXISTS matches (
            id TEXT PRIMARY KEY,
            requirement_id TEXT NOT NULL REFERENCES requirements(id),
            availability_id TEXT NOT NULL REFERENCES availabilities(id),
            commodity_id TEXT NOT NULL REFERENCES commodities(id),
            matched_quantity REAL NOT NULL,
            matched_price INTEGER NOT NULL,
            score_breakdown TEXT NOT NULL,
            risk_decision TEXT NOT NULL,
            risk_reasons TEXT NOT NULL,
            status TEXT NOT NULL,
            negotiation_id TEXT,
            created_at TEXT NOT NULL,
            version INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS uq_matches_active_pair
            ON matches(requirement_id, availability_id)
            WHERE status IN ('proposed', 'negotiating');
        CREATE INDEX IF NOT EXISTS idx_matches_requirement ON matches(requirement_id);
        CREATE INDEX IF NOT EXISTS idx_matches_availability ON matches(availability_id);
        CREATE INDEX IF NOT EXISTS idx_matches_recent
            ON matches(requirement_id, availability_id, created_at);

        CREATE TABLE IF NOT EXISTS negotiations (
            id TEXT PRIMARY KEY,
            match_id TEXT NOT NULL REFERENCES matches(id),
            buyer_id TEXT NOT NULL REFERENCES partners(id),
            seller_id TEXT NOT NULL REFERENCES partners(id),
            status TEXT NOT NULL,
            current_price INTEGER NOT NULL,
            current_quantity REAL NOT NULL,
            round INTEGER NOT NULL,
            expires_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            version INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_negotiations_match ON negotiations(match_id);
        CREATE INDEX IF NOT EXISTS idx_negotiations_parties
            ON negotiations(buyer_id, seller_id);

        CREATE TABLE IF NOT EXISTS offers (
            id TEXT PRIMARY KEY,
            negotiation_id TEXT NOT NULL REFERENCES negotiations(id),
            origin TEXT NOT NULL,
            price INTEGER NOT NULL,
            quantity REAL NOT NULL,
            round INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_offers_negotiation ON offers(negotiation_id, round);

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            negotiation_id TEXT NOT NULL REFERENCES negotiations(id),
            sender_id TEXT NOT NULL,
            body TEXT NOT NULL,
            visibility TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_negotiation ON messages(negotiation_id);

        CREATE TABLE IF NOT EXISTS outbox (
            id TEXT PRIMARY KEY,
            aggregate_type TEXT NOT NULL,
            aggregate_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL,
            attempts INTEGER NOT NULL,
            next_attempt_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            dispatched_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_outbox_aggregate ON outbox(aggregate_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_outbox_pending
            ON outbox(status, next_attempt_at);

        CREATE TABLE IF NOT EXISTS audit_entries (
            id TEXT PRIMARY KEY,
            subject_type TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            action TEXT NOT NULL,
            actor_user_id TEXT,
            detail TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_audit_subject ON audit_entries(subject_type, subject_id);

        CREATE TABLE IF NOT EXISTS idempotency_log (
            command_type TEXT NOT NULL,
            idempotency_key TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (command_type, idempotency_key)
        );

        CREATE TABLE IF NOT EXISTS processed_events (
            event_id TEXT NOT NULL,
            subscriber TEXT NOT NULL,
            processed_at TEXT NOT NULL,
            PRIMARY KEY (event_id, subscriber)
        );
        ",
    )
    .context("creating schema")?;

    Ok(())
}
