//! Audit trail entity — every risk/validator rejection and
//! every state transition worth explaining later is appended here.

use crate::ids::AuditId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditId,
    pub subject_type: String,
    pub subject_id: String,
    pub action: String,
    pub actor_user_id: Option<String>,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
