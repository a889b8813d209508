//! Specialised queries used by C3/C4: location pre-filtering,
//! circular-trade same-day lookup, and party-link lookups.

use super::rows;
use crate::domain::*;
use crate::ids::*;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, Row};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Coarse bounding box, in degrees, big enough to contain every point within
/// `max_km` of `center` — a cheap SQL prefilter ahead of the exact haversine
/// check.
fn bounding_box(center: (f64, f64), max_km: f64) -> (f64, f64, f64, f64) {
    let (lat, lng) = center;
    let lat_delta = max_km / 111.0;
    let lng_delta = max_km / (111.0 * lat.to_radians().cos().max(0.1));
    (lat - lat_delta, lat + lat_delta, lng - lng_delta, lng + lng_delta)
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

fn parse_dt(s: &str) -> rusqlite::Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn row_to_availability(row: &Row) -> rusqlite::Result<Availability> {
    // Delegates to the same column layout as rows::row_to_availability via
    // `SELECT *`, duplicated here because that function is private to rows.rs.
    let origin_location: LocationSpec = parse_json(&row.get::<_, String>("origin_location")?)?;
    Ok(Availability {
        id: parse_id(&row.get::<_, String>("id")?)?,
        seller_id: parse_id(&row.get::<_, String>("seller_id")?)?,
        commodity_id: parse_id(&row.get::<_, String>("commodity_id")?)?,
        quantity: row.get("quantity")?,
        remaining_quantity: row.get("remaining_quantity")?,
        unit: row.get("unit")?,
        asking_price: row.get("asking_price")?,
        min_price: row.get("min_price")?,
        origin_location,
        delivery_locations: parse_json(&row.get::<_, String>("delivery_locations")?)?,
        quality_params: parse_json(&row.get::<_, String>("quality_params")?)?,
        valid_until: parse_dt(&row.get::<_, String>("valid_until")?)?,
        status: parse_enum(&row.get::<_, String>("status")?, AvailabilityStatus::from_str, "availability status")?,
        created_at: parse_dt(&row.get::<_, String>("created_at")?)?,
        version: row.get("version")?,
    })
}

/// Candidates for a Requirement's delivery-locations set: active
/// Availabilities whose registered location matches, or whose origin falls
/// within `max_km` of any ad-hoc point in the requirement's set. The SQL
/// bounding box narrows the scan; `locations_match` (haversine) makes the
/// final call.
pub fn find_availabilities_by_location_and_commodity(
    conn: &Connection,
    commodity_id: CommodityId,
    delivery_locations: &[LocationSpec],
    max_km: f64,
) -> Result<Vec<Availability>> {
    let mut candidates: Vec<Availability> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    // Registered-location exact matches: a plain equality scan, no bbox needed.
    let registered_ids: Vec<&str> = delivery_locations.iter().filter_map(|l| l.registered_id()).collect();
    if !registered_ids.is_empty() {
        let mut stmt = conn.prepare(
            "SELECT * FROM availabilities WHERE commodity_id = ?1 AND status IN ('available','partially_sold')",
        )?;
        let rows = stmt
            .query_map(params![commodity_id.to_string()], row_to_availability)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("scanning availabilities for registered-location match")?;
        for a in rows {
            if let Some(reg) = a.origin_location.registered_id() {
                if registered_ids.contains(&reg) && seen.insert(a.id) {
                    candidates.push(a);
                }
            }
        }
    }

    // Ad-hoc points: bounding-box prefilter per point, then haversine refine.
    for loc in delivery_locations {
        if let Some(point) = loc.coordinates() {
            let (lat_min, lat_max, lng_min, lng_max) = bounding_box(point, max_km);
            let mut stmt = conn.prepare(
                "SELECT * FROM availabilities
                 WHERE commodity_id = ?1 AND status IN ('available','partially_sold')
                   AND origin_lat BETWEEN ?2 AND ?3 AND origin_lng BETWEEN ?4 AND ?5",
            )?;
            let rows = stmt
                .query_map(
                    params![commodity_id.to_string(), lat_min, lat_max, lng_min, lng_max],
                    row_to_availability,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("scanning availabilities for ad-hoc location match")?;
            for a in rows {
                if seen.contains(&a.id) {
                    continue;
                }
                if let Some(coords) = a.origin_location.coordinates() {
                    if haversine_km(point, coords) <= max_km {
                        seen.insert(a.id);
                        candidates.push(a);
                    }
                }
            }
        }
    }

    Ok(candidates)
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

/// Symmetric query for an Availability: active Requirements whose
/// delivery-locations set accepts this availability's origin.
pub fn find_requirements_accepting_location(
    conn: &Connection,
    commodity_id: CommodityId,
    origin: &LocationSpec,
    max_km: f64,
) -> Result<Vec<Requirement>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM requirements WHERE commodity_id = ?1 AND status IN ('draft','active','partially_fulfilled')",
    )?;
    let rows = stmt
        .query_map(params![commodity_id.to_string()], row_to_requirement)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("scanning requirements for location match")?;
    Ok(rows
        .into_iter()
        .filter(|r| matches_any(origin, &r.delivery_locations, max_km))
        .collect())
}

/// Any open order from `partner_id` for `commodity_id` on the opposite side,
/// on `date` — used by C3.2's circular-trading guard.
pub fn find_open_orders_same_day(
    conn: &Connection,
    partner_id: PartnerId,
    commodity_id: CommodityId,
    opposite_side: OrderSide,
    date: chrono::NaiveDate,
) -> Result<bool> {
    let date_str = date.to_string();
    let exists: bool = match opposite_side {
        OrderSide::Buy => conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM requirements WHERE buyer_id = ?1 AND commodity_id = ?2
                     AND created_date = ?3 AND status IN ('draft','active','partially_fulfilled'))",
                params![partner_id.to_string(), commodity_id.to_string(), date_str],
                |row| row.get(0),
            )
            .context("checking same-day buy orders")?,
        OrderSide::Sell => conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM availabilities WHERE seller_id = ?1 AND commodity_id = ?2
                     AND created_date = ?3 AND status IN ('available','partially_sold'))",
                params![partner_id.to_string(), commodity_id.to_string(), date_str],
                |row| row.get(0),
            )
            .context("checking same-day sell orders")?,
    };
    Ok(exists)
}

/// Partners sharing a `tax_id`/`national_id`/`mobile` with `partner_id`,
/// excluding itself — used by C3.5's party-links check.
pub fn find_partner_links(
    conn: &Connection,
    field: &str,
    value: &str,
    exclude: PartnerId,
) -> Result<Vec<PartnerId>> {
    let column = match field {
        "tax_id" => "tax_id",
        "national_id" => "national_id",
        "mobile" => "mobile",
        _ => return Ok(Vec::new()),
    };
    let sql = format!("SELECT id FROM partners WHERE {column} = ?1 AND id != ?2");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![value, exclude.to_string()], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("finding partner links")?;
    Ok(rows.into_iter().filter_map(|s| s.parse().ok()).collect())
}

#[allow(unused_imports)]
pub use rows::{get_availability, get_requirement};
