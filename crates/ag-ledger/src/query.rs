// query.rs — Filter, pagination, and statistics shapes for ledger reads.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::manifest::Manifest;
use ag_seal::Seal;

/// Hard ceiling on page size; larger requests are clamped, not rejected.
pub const MAX_PAGE_SIZE: u32 = 200;

/// Filters for `Ledger::query` and `Ledger::stats`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryFilters {
    pub org_id: Option<String>,
    pub agent_id: Option<String>,
    pub provider: Option<String>,
    pub approved: Option<bool>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

/// One audit record: a manifest joined with its seal.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AuditRecord {
    pub manifest: Manifest,
    pub seal: Seal,
}

/// A page of audit records, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct QueryPage {
    /// Total records matching the filters, ignoring pagination.
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
    pub records: Vec<AuditRecord>,
}

/// Aggregates over the filtered window.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LedgerStats {
    pub total: u64,
    pub approved: u64,
    pub denied: u64,
    /// approved / total; 0 when the window is empty.
    pub approval_rate: f64,
    pub by_provider: BTreeMap<String, u64>,
    /// Up to ten busiest agents, descending by manifest count.
    pub top_agents: Vec<AgentCount>,
    pub denials_by_reason: BTreeMap<String, u64>,
}

/// One entry in the top-agents ranking.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AgentCount {
    pub agent_id: String,
    pub count: u64,
}
