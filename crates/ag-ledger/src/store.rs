// store.rs — The ledger store.
//
// One SQLite connection behind a mutex. Statements on the hot path are
// single-row, index-backed inserts and lookups; the mutex is held for the
// duration of one statement or one small transaction, never across I/O the
// gateway does elsewhere.
//
// `append` writes manifest + seal in a single transaction so the client can
// never observe a seal whose manifest was not durably recorded (or vice
// versa). `mark_executed` is a conditional update — the store serializes it
// per seal_id and at most one caller observes success.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::auth_event::{AuthEvent, AuthEventType};
use crate::error::LedgerError;
use crate::manifest::Manifest;
use crate::query::{AgentCount, AuditRecord, LedgerStats, QueryFilters, QueryPage, MAX_PAGE_SIZE};
use crate::registry::{Agent, Organization};
use crate::schema;
use ag_seal::payload::{format_timestamp, truncate_to_micros};
use ag_seal::Seal;

/// The outcome of a `mark_executed` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// This call consumed the seal.
    Marked { executed_at: DateTime<Utc> },
    /// The seal was already consumed; carries the original timestamp.
    AlreadyExecuted { executed_at: DateTime<Utc> },
    /// No seal with that id exists.
    NotFound,
}

/// Append-mostly store for manifests, seals, auth events, and the registry.
pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    /// Open (or create) the ledger database at the given path and install
    /// the schema, triggers included.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        schema::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory ledger for tests and ephemeral runs. Same schema, same
    /// triggers, nothing survives the process.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        schema::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("ledger mutex poisoned")
    }

    /// Liveness probe: one trivial statement against the database.
    pub fn ping(&self) -> Result<(), LedgerError> {
        self.conn().query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    // ── Hot path ──

    /// Insert a manifest and its seal atomically.
    ///
    /// A manifest-id collision surfaces as [`LedgerError::DuplicateManifest`]
    /// so the orchestrator can regenerate and retry once.
    pub fn append(&self, manifest: &Manifest, seal: &Seal) -> Result<(), LedgerError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO manifests (manifest_id, created_at, agent_id, org_id, user_id,
                                    provider, method, parameters, reasoning,
                                    confidence_score, environment, raw_manifest)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                manifest.manifest_id.to_string(),
                format_timestamp(manifest.created_at),
                manifest.agent_id,
                manifest.org_id,
                manifest.user_id,
                manifest.provider,
                manifest.method,
                serde_json::to_string(&manifest.parameters)?,
                manifest.reasoning,
                manifest.confidence_score,
                manifest.environment,
                serde_json::to_string(&manifest.raw_manifest)?,
            ],
        )
        .map_err(LedgerError::from_insert)?;

        tx.execute(
            "INSERT INTO seals (seal_id, manifest_id, approved, policy_version, denial_reason,
                                signature, public_key, issued_at, expires_at,
                                was_executed, executed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                seal.seal_id,
                seal.manifest_id.to_string(),
                seal.approved,
                seal.policy_version,
                seal.denial_reason,
                seal.signature,
                seal.public_key,
                format_timestamp(seal.issued_at),
                format_timestamp(seal.expires_at),
                seal.was_executed,
                seal.executed_at.map(format_timestamp),
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Consume a seal: `(was_executed=0, NULL) → (1, now)` exactly once.
    pub fn mark_executed(
        &self,
        seal_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ExecutionOutcome, LedgerError> {
        let executed_at = truncate_to_micros(now);
        let conn = self.conn();

        let updated = conn.execute(
            "UPDATE seals SET was_executed = 1, executed_at = ?2
             WHERE seal_id = ?1 AND was_executed = 0",
            rusqlite::params![seal_id, format_timestamp(executed_at)],
        )?;
        if updated == 1 {
            return Ok(ExecutionOutcome::Marked { executed_at });
        }

        // No row transitioned: either the seal is unknown or already spent.
        let existing: Option<Option<String>> = conn
            .query_row(
                "SELECT executed_at FROM seals WHERE seal_id = ?1",
                [seal_id],
                |row| row.get(0),
            )
            .optional()?;
        match existing {
            None => Ok(ExecutionOutcome::NotFound),
            Some(stored) => {
                let value = stored.unwrap_or_default();
                Ok(ExecutionOutcome::AlreadyExecuted {
                    executed_at: parse_timestamp("executed_at", &value)?,
                })
            }
        }
    }

    pub fn get_manifest(&self, manifest_id: Uuid) -> Result<Option<Manifest>, LedgerError> {
        self.conn()
            .query_row(
                "SELECT manifest_id, created_at, agent_id, org_id, user_id, provider, method,
                        parameters, reasoning, confidence_score, environment, raw_manifest
                 FROM manifests WHERE manifest_id = ?1",
                [manifest_id.to_string()],
                manifest_from_row,
            )
            .optional()
            .map_err(LedgerError::Sqlite)?
            .transpose()
    }

    pub fn get_seal(&self, seal_id: &str) -> Result<Option<Seal>, LedgerError> {
        self.conn()
            .query_row(
                "SELECT seal_id, manifest_id, approved, policy_version, denial_reason, signature,
                        public_key, issued_at, expires_at, was_executed, executed_at
                 FROM seals WHERE seal_id = ?1",
                [seal_id],
                seal_from_row,
            )
            .optional()
            .map_err(LedgerError::Sqlite)?
            .transpose()
    }

    // ── Queries ──

    /// Filtered audit query, newest first, offset-paginated.
    pub fn query(
        &self,
        filters: &QueryFilters,
        limit: u32,
        offset: u32,
    ) -> Result<QueryPage, LedgerError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let (where_clause, params) = build_where(filters);
        let conn = self.conn();

        let total: u64 = conn.query_row(
            &format!(
                "SELECT count(*) FROM manifests m JOIN seals s ON s.manifest_id = m.manifest_id {}",
                where_clause
            ),
            rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
            |row| row.get::<_, i64>(0),
        )? as u64;

        let sql = format!(
            "SELECT m.manifest_id, m.created_at, m.agent_id, m.org_id, m.user_id, m.provider,
                    m.method, m.parameters, m.reasoning, m.confidence_score, m.environment,
                    m.raw_manifest,
                    s.seal_id, s.manifest_id, s.approved, s.policy_version, s.denial_reason,
                    s.signature, s.public_key, s.issued_at, s.expires_at, s.was_executed,
                    s.executed_at
             FROM manifests m JOIN seals s ON s.manifest_id = m.manifest_id
             {}
             ORDER BY m.created_at DESC
             LIMIT {} OFFSET {}",
            where_clause, limit, offset
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(
            params.iter().map(|p| p.as_ref()),
        ))?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let manifest = manifest_from_row(row)??;
            let seal = seal_from_offset_row(row, 12)??;
            records.push(AuditRecord { manifest, seal });
        }

        Ok(QueryPage {
            total,
            limit,
            offset,
            records,
        })
    }

    /// Aggregates over the filtered window.
    pub fn stats(&self, filters: &QueryFilters) -> Result<LedgerStats, LedgerError> {
        let (where_clause, params) = build_where(filters);
        let conn = self.conn();
        let bind = || rusqlite::params_from_iter(params.iter().map(|p| p.as_ref()));

        let (total, approved): (u64, u64) = conn.query_row(
            &format!(
                "SELECT count(*), coalesce(sum(s.approved), 0)
                 FROM manifests m JOIN seals s ON s.manifest_id = m.manifest_id {}",
                where_clause
            ),
            bind(),
            |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64)),
        )?;
        let denied = total - approved;
        let approval_rate = if total > 0 {
            approved as f64 / total as f64
        } else {
            0.0
        };

        let mut by_provider = std::collections::BTreeMap::new();
        {
            let sql = format!(
                "SELECT m.provider, count(*)
                 FROM manifests m JOIN seals s ON s.manifest_id = m.manifest_id {}
                 GROUP BY m.provider",
                where_clause
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(bind())?;
            while let Some(row) = rows.next()? {
                by_provider.insert(row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64);
            }
        }

        let mut top_agents = Vec::new();
        {
            let sql = format!(
                "SELECT m.agent_id, count(*) AS n
                 FROM manifests m JOIN seals s ON s.manifest_id = m.manifest_id {}
                 GROUP BY m.agent_id ORDER BY n DESC, m.agent_id ASC LIMIT 10",
                where_clause
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(bind())?;
            while let Some(row) = rows.next()? {
                top_agents.push(AgentCount {
                    agent_id: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                });
            }
        }

        let mut denials_by_reason = std::collections::BTreeMap::new();
        {
            let sql = format!(
                "SELECT coalesce(s.denial_reason, 'unspecified'), count(*)
                 FROM manifests m JOIN seals s ON s.manifest_id = m.manifest_id {}
                 {} s.approved = 0
                 GROUP BY s.denial_reason",
                where_clause,
                if where_clause.is_empty() { "WHERE" } else { "AND" },
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(bind())?;
            while let Some(row) = rows.next()? {
                denials_by_reason.insert(row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64);
            }
        }

        Ok(LedgerStats {
            total,
            approved,
            denied,
            approval_rate,
            by_provider,
            top_agents,
            denials_by_reason,
        })
    }

    // ── Auth events ──

    pub fn record_auth_event(&self, event: &AuthEvent) -> Result<(), LedgerError> {
        self.conn().execute(
            "INSERT INTO auth_events (event_id, event_type, agent_id, org_id, endpoint, ip,
                                      success, failure_reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                event.event_id.to_string(),
                event.event_type.as_str(),
                event.agent_id,
                event.org_id,
                event.endpoint,
                event.ip,
                event.success,
                event.failure_reason,
                format_timestamp(event.created_at),
            ],
        )?;
        Ok(())
    }

    /// Most recent auth events, newest first. Forensics and test support.
    pub fn recent_auth_events(&self, limit: u32) -> Result<Vec<AuthEvent>, LedgerError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT event_id, event_type, agent_id, org_id, endpoint, ip, success,
                    failure_reason, created_at
             FROM auth_events ORDER BY created_at DESC LIMIT ?1",
        )?;
        let mut rows = stmt.query([limit])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(auth_event_from_row(row)??);
        }
        Ok(events)
    }

    // ── Registry ──

    pub fn insert_organization(&self, org: &Organization) -> Result<(), LedgerError> {
        self.conn().execute(
            "INSERT INTO organizations (org_id, name, contact_email, created_at, active)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                org.org_id,
                org.name,
                org.contact_email,
                format_timestamp(org.created_at),
                org.active,
            ],
        )?;
        Ok(())
    }

    pub fn get_organization(&self, org_id: &str) -> Result<Option<Organization>, LedgerError> {
        self.conn()
            .query_row(
                "SELECT org_id, name, contact_email, created_at, active
                 FROM organizations WHERE org_id = ?1",
                [org_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, bool>(4)?,
                    ))
                },
            )
            .optional()?
            .map(|(org_id, name, contact_email, created_at, active)| {
                Ok(Organization {
                    org_id,
                    name,
                    contact_email,
                    created_at: parse_timestamp("created_at", &created_at)?,
                    active,
                })
            })
            .transpose()
    }

    /// Flip the only mutable organization field.
    pub fn set_organization_active(&self, org_id: &str, active: bool) -> Result<bool, LedgerError> {
        let updated = self.conn().execute(
            "UPDATE organizations SET active = ?2 WHERE org_id = ?1",
            rusqlite::params![org_id, active],
        )?;
        Ok(updated == 1)
    }

    pub fn insert_agent(&self, agent: &Agent) -> Result<(), LedgerError> {
        self.conn().execute(
            "INSERT INTO agents (agent_id, org_id, name, description, api_key_hash,
                                 created_at, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                agent.agent_id,
                agent.org_id,
                agent.name,
                agent.description,
                agent.api_key_hash,
                format_timestamp(agent.created_at),
                agent.active,
            ],
        )?;
        Ok(())
    }

    pub fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, LedgerError> {
        self.conn()
            .query_row(
                "SELECT agent_id, org_id, name, description, api_key_hash, created_at, active
                 FROM agents WHERE agent_id = ?1",
                [agent_id],
                agent_from_row,
            )
            .optional()?
            .transpose()
    }

    pub fn list_agents(&self, org_id: &str) -> Result<Vec<Agent>, LedgerError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT agent_id, org_id, name, description, api_key_hash, created_at, active
             FROM agents WHERE org_id = ?1 ORDER BY created_at ASC",
        )?;
        let mut rows = stmt.query([org_id])?;
        let mut agents = Vec::new();
        while let Some(row) = rows.next()? {
            agents.push(agent_from_row(row)??);
        }
        Ok(agents)
    }

    /// Flip the only mutable agent field.
    pub fn set_agent_active(&self, agent_id: &str, active: bool) -> Result<bool, LedgerError> {
        let updated = self.conn().execute(
            "UPDATE agents SET active = ?2 WHERE agent_id = ?1",
            rusqlite::params![agent_id, active],
        )?;
        Ok(updated == 1)
    }

    /// Run arbitrary statements against the store. Test support for proving
    /// the immutability triggers hold even for direct SQL.
    #[cfg(test)]
    fn execute_raw(&self, sql: &str) -> Result<usize, rusqlite::Error> {
        self.conn().execute(sql, [])
    }
}

// ── Row mapping ──
// rusqlite's query_row closure returns rusqlite::Result, so JSON/timestamp
// parsing is deferred behind a nested Result and flattened by callers.

fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| LedgerError::CorruptColumn {
            column: column.to_string(),
            value: value.to_string(),
        })
}

fn parse_uuid(column: &str, value: &str) -> Result<Uuid, LedgerError> {
    Uuid::parse_str(value).map_err(|_| LedgerError::CorruptColumn {
        column: column.to_string(),
        value: value.to_string(),
    })
}

fn manifest_from_row(row: &Row<'_>) -> rusqlite::Result<Result<Manifest, LedgerError>> {
    let manifest_id: String = row.get(0)?;
    let created_at: String = row.get(1)?;
    let parameters: String = row.get(7)?;
    let raw_manifest: String = row.get(11)?;
    let agent_id: String = row.get(2)?;
    let org_id: String = row.get(3)?;
    let user_id: Option<String> = row.get(4)?;
    let provider: String = row.get(5)?;
    let method: String = row.get(6)?;
    let reasoning: String = row.get(8)?;
    let confidence_score: Option<f64> = row.get(9)?;
    let environment: String = row.get(10)?;

    Ok((|| {
        Ok(Manifest {
            manifest_id: parse_uuid("manifest_id", &manifest_id)?,
            created_at: parse_timestamp("created_at", &created_at)?,
            agent_id,
            org_id,
            user_id,
            provider,
            method,
            parameters: serde_json::from_str(&parameters)?,
            reasoning,
            confidence_score,
            environment,
            raw_manifest: serde_json::from_str(&raw_manifest)?,
        })
    })())
}

fn seal_from_row(row: &Row<'_>) -> rusqlite::Result<Result<Seal, LedgerError>> {
    seal_from_offset_row(row, 0)
}

fn seal_from_offset_row(
    row: &Row<'_>,
    base: usize,
) -> rusqlite::Result<Result<Seal, LedgerError>> {
    let seal_id: String = row.get(base)?;
    let manifest_id: String = row.get(base + 1)?;
    let approved: bool = row.get(base + 2)?;
    let policy_version: String = row.get(base + 3)?;
    let denial_reason: Option<String> = row.get(base + 4)?;
    let signature: String = row.get(base + 5)?;
    let public_key: String = row.get(base + 6)?;
    let issued_at: String = row.get(base + 7)?;
    let expires_at: String = row.get(base + 8)?;
    let was_executed: bool = row.get(base + 9)?;
    let executed_at: Option<String> = row.get(base + 10)?;

    Ok((|| {
        Ok(Seal {
            seal_id,
            manifest_id: parse_uuid("manifest_id", &manifest_id)?,
            approved,
            policy_version,
            denial_reason,
            signature,
            public_key,
            issued_at: parse_timestamp("issued_at", &issued_at)?,
            expires_at: parse_timestamp("expires_at", &expires_at)?,
            was_executed,
            executed_at: executed_at
                .map(|t| parse_timestamp("executed_at", &t))
                .transpose()?,
        })
    })())
}

fn auth_event_from_row(row: &Row<'_>) -> rusqlite::Result<Result<AuthEvent, LedgerError>> {
    let event_id: String = row.get(0)?;
    let event_type: String = row.get(1)?;
    let agent_id: Option<String> = row.get(2)?;
    let org_id: Option<String> = row.get(3)?;
    let endpoint: Option<String> = row.get(4)?;
    let ip: Option<String> = row.get(5)?;
    let success: bool = row.get(6)?;
    let failure_reason: Option<String> = row.get(7)?;
    let created_at: String = row.get(8)?;

    Ok((|| {
        Ok(AuthEvent {
            event_id: parse_uuid("event_id", &event_id)?,
            event_type: AuthEventType::parse(&event_type).ok_or_else(|| {
                LedgerError::CorruptColumn {
                    column: "event_type".to_string(),
                    value: event_type.clone(),
                }
            })?,
            agent_id,
            org_id,
            endpoint,
            ip,
            success,
            failure_reason,
            created_at: parse_timestamp("created_at", &created_at)?,
        })
    })())
}

fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<Result<Agent, LedgerError>> {
    let agent_id: String = row.get(0)?;
    let org_id: String = row.get(1)?;
    let name: String = row.get(2)?;
    let description: Option<String> = row.get(3)?;
    let api_key_hash: Option<String> = row.get(4)?;
    let created_at: String = row.get(5)?;
    let active: bool = row.get(6)?;

    Ok((|| {
        Ok(Agent {
            agent_id,
            org_id,
            name,
            description,
            api_key_hash,
            created_at: parse_timestamp("created_at", &created_at)?,
            active,
        })
    })())
}

/// Build the WHERE clause and bind parameters for the active filters.
fn build_where(filters: &QueryFilters) -> (String, Vec<Box<dyn ToSql>>) {
    let mut clauses: Vec<&str> = Vec::new();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(org_id) = &filters.org_id {
        clauses.push("m.org_id = ?");
        params.push(Box::new(org_id.clone()));
    }
    if let Some(agent_id) = &filters.agent_id {
        clauses.push("m.agent_id = ?");
        params.push(Box::new(agent_id.clone()));
    }
    if let Some(provider) = &filters.provider {
        clauses.push("m.provider = ?");
        params.push(Box::new(provider.clone()));
    }
    if let Some(approved) = filters.approved {
        clauses.push("s.approved = ?");
        params.push(Box::new(approved));
    }
    if let Some(from) = filters.created_from {
        clauses.push("m.created_at >= ?");
        params.push(Box::new(format_timestamp(from)));
    }
    if let Some(to) = filters.created_to {
        clauses.push("m.created_at <= ?");
        params.push(Box::new(format_timestamp(to)));
    }

    if clauses.is_empty() {
        (String::new(), params)
    } else {
        // Positional `?` placeholders bind in clause order.
        let mut numbered = Vec::new();
        for (i, clause) in clauses.iter().enumerate() {
            numbered.push(clause.replace('?', &format!("?{}", i + 1)));
        }
        (format!("WHERE {}", numbered.join(" AND ")), params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration as StdDuration;

    use ag_seal::SealSigner;

    fn signer() -> SealSigner {
        SealSigner::generate(StdDuration::from_secs(300)).unwrap()
    }

    fn sample_manifest(agent_id: &str, org_id: &str, provider: &str) -> Manifest {
        Manifest {
            manifest_id: Uuid::new_v4(),
            created_at: truncate_to_micros(Utc::now()),
            agent_id: agent_id.into(),
            org_id: org_id.into(),
            user_id: None,
            provider: provider.into(),
            method: "create_payment".into(),
            parameters: json!({"amount": 3500, "currency": "usd"}),
            reasoning: "monthly invoice".into(),
            confidence_score: Some(0.9),
            environment: "production".into(),
            raw_manifest: json!({"action": {"provider": provider}}),
        }
    }

    fn appended(ledger: &Ledger, approved: bool) -> (Manifest, Seal) {
        let manifest = sample_manifest("agent-1", "org-1", "stripe");
        let seal = signer().issue(
            manifest.manifest_id,
            approved,
            "sha256:aaaa",
            if approved { None } else { Some("over limit".into()) },
        );
        ledger.append(&manifest, &seal).unwrap();
        (manifest, seal)
    }

    #[test]
    fn append_and_read_round_trip() {
        let ledger = Ledger::open_in_memory().unwrap();
        let (manifest, seal) = appended(&ledger, true);

        let stored_manifest = ledger.get_manifest(manifest.manifest_id).unwrap().unwrap();
        assert_eq!(stored_manifest, manifest);

        let stored_seal = ledger.get_seal(&seal.seal_id).unwrap().unwrap();
        assert_eq!(stored_seal, seal);
        // Round-tripped seals still verify: stored fields rebuild the
        // signed payload exactly.
        assert!(stored_seal.signature_is_valid());
    }

    #[test]
    fn parameters_survive_byte_for_byte_under_canonicalization() {
        let ledger = Ledger::open_in_memory().unwrap();
        let (manifest, _) = appended(&ledger, true);
        let stored = ledger.get_manifest(manifest.manifest_id).unwrap().unwrap();
        assert_eq!(
            ag_canonical::to_canonical_bytes(&stored.parameters),
            ag_canonical::to_canonical_bytes(&manifest.parameters)
        );
    }

    #[test]
    fn duplicate_manifest_id_is_reported() {
        let ledger = Ledger::open_in_memory().unwrap();
        let (manifest, _) = appended(&ledger, true);

        let mut second = sample_manifest("agent-2", "org-1", "stripe");
        second.manifest_id = manifest.manifest_id;
        let seal = signer().issue(second.manifest_id, true, "sha256:aaaa", None);
        match ledger.append(&second, &seal) {
            Err(LedgerError::DuplicateManifest) => {}
            other => panic!("expected DuplicateManifest, got {:?}", other),
        }
    }

    #[test]
    fn failed_append_leaves_no_partial_state() {
        let ledger = Ledger::open_in_memory().unwrap();
        let (manifest, _) = appended(&ledger, true);

        // Collides on manifest_id; the transaction must roll back the seal too.
        let mut second = sample_manifest("agent-2", "org-1", "stripe");
        second.manifest_id = manifest.manifest_id;
        let orphan_seal = signer().issue(second.manifest_id, true, "sha256:aaaa", None);
        assert!(ledger.append(&second, &orphan_seal).is_err());
        assert!(ledger.get_seal(&orphan_seal.seal_id).unwrap().is_none());
    }

    #[test]
    fn manifests_refuse_update_and_delete_at_the_store() {
        let ledger = Ledger::open_in_memory().unwrap();
        let (manifest, _) = appended(&ledger, true);

        let update = ledger.execute_raw("UPDATE manifests SET agent_id = 'attacker'");
        assert!(update.is_err());
        let delete = ledger.execute_raw("DELETE FROM manifests");
        assert!(delete.is_err());

        // Record is byte-identical after the attempts.
        let stored = ledger.get_manifest(manifest.manifest_id).unwrap().unwrap();
        assert_eq!(stored, manifest);
    }

    #[test]
    fn auth_events_refuse_update_and_delete_at_the_store() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger
            .record_auth_event(&AuthEvent::new(AuthEventType::Login, true).with_org("org-1"))
            .unwrap();

        assert!(ledger
            .execute_raw("UPDATE auth_events SET success = 0")
            .is_err());
        assert!(ledger.execute_raw("DELETE FROM auth_events").is_err());
        assert_eq!(ledger.recent_auth_events(10).unwrap().len(), 1);
    }

    #[test]
    fn seal_frozen_fields_refuse_update() {
        let ledger = Ledger::open_in_memory().unwrap();
        let (_, seal) = appended(&ledger, false);

        let flip = ledger.execute_raw(&format!(
            "UPDATE seals SET approved = 1 WHERE seal_id = '{}'",
            seal.seal_id
        ));
        assert!(flip.is_err());

        let stored = ledger.get_seal(&seal.seal_id).unwrap().unwrap();
        assert!(!stored.approved);
    }

    #[test]
    fn seals_refuse_delete() {
        let ledger = Ledger::open_in_memory().unwrap();
        let (_, seal) = appended(&ledger, true);
        assert!(ledger.execute_raw("DELETE FROM seals").is_err());
        assert!(ledger.get_seal(&seal.seal_id).unwrap().is_some());
    }

    #[test]
    fn mark_executed_succeeds_exactly_once() {
        let ledger = Ledger::open_in_memory().unwrap();
        let (_, seal) = appended(&ledger, true);

        let first = ledger.mark_executed(&seal.seal_id, Utc::now()).unwrap();
        let t1 = match first {
            ExecutionOutcome::Marked { executed_at } => executed_at,
            other => panic!("expected Marked, got {:?}", other),
        };

        let second = ledger.mark_executed(&seal.seal_id, Utc::now()).unwrap();
        match second {
            ExecutionOutcome::AlreadyExecuted { executed_at } => assert_eq!(executed_at, t1),
            other => panic!("expected AlreadyExecuted, got {:?}", other),
        }

        let stored = ledger.get_seal(&seal.seal_id).unwrap().unwrap();
        assert!(stored.was_executed);
        assert_eq!(stored.executed_at, Some(t1));
    }

    #[test]
    fn mark_executed_unknown_seal_is_not_found() {
        let ledger = Ledger::open_in_memory().unwrap();
        assert_eq!(
            ledger.mark_executed("seal_missing", Utc::now()).unwrap(),
            ExecutionOutcome::NotFound
        );
    }

    #[test]
    fn executed_seal_cannot_be_unexecuted() {
        let ledger = Ledger::open_in_memory().unwrap();
        let (_, seal) = appended(&ledger, true);
        ledger.mark_executed(&seal.seal_id, Utc::now()).unwrap();

        let revert = ledger.execute_raw(&format!(
            "UPDATE seals SET was_executed = 0, executed_at = NULL WHERE seal_id = '{}'",
            seal.seal_id
        ));
        assert!(revert.is_err());
    }

    #[test]
    fn query_filters_and_paginates_newest_first() {
        let ledger = Ledger::open_in_memory().unwrap();
        for i in 0..5 {
            let mut manifest = sample_manifest("agent-1", "org-1", "stripe");
            manifest.created_at =
                truncate_to_micros(Utc::now()) + chrono::Duration::seconds(i);
            let seal = signer().issue(manifest.manifest_id, i % 2 == 0, "sha256:aaaa", None);
            ledger.append(&manifest, &seal).unwrap();
        }
        let mut other_org = sample_manifest("agent-9", "org-2", "aws");
        other_org.created_at = truncate_to_micros(Utc::now()) + chrono::Duration::seconds(100);
        let seal = signer().issue(other_org.manifest_id, true, "sha256:aaaa", None);
        ledger.append(&other_org, &seal).unwrap();

        // Org filter.
        let filters = QueryFilters {
            org_id: Some("org-1".into()),
            ..Default::default()
        };
        let page = ledger.query(&filters, 3, 0).unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.records.len(), 3);
        // Newest first.
        assert!(page.records[0].manifest.created_at >= page.records[1].manifest.created_at);

        // Second page.
        let page2 = ledger.query(&filters, 3, 3).unwrap();
        assert_eq!(page2.records.len(), 2);

        // Approved filter composes.
        let approved_only = QueryFilters {
            org_id: Some("org-1".into()),
            approved: Some(true),
            ..Default::default()
        };
        let page3 = ledger.query(&approved_only, 10, 0).unwrap();
        assert_eq!(page3.total, 3);
        assert!(page3.records.iter().all(|r| r.seal.approved));
    }

    #[test]
    fn query_clamps_page_size() {
        let ledger = Ledger::open_in_memory().unwrap();
        let page = ledger
            .query(&QueryFilters::default(), 100_000, 0)
            .unwrap();
        assert_eq!(page.limit, MAX_PAGE_SIZE);
    }

    #[test]
    fn stats_aggregate_the_filtered_window() {
        let ledger = Ledger::open_in_memory().unwrap();
        for (provider, approved) in [
            ("stripe", true),
            ("stripe", true),
            ("stripe", false),
            ("aws", false),
        ] {
            let manifest = sample_manifest("agent-1", "org-1", provider);
            let seal = signer().issue(
                manifest.manifest_id,
                approved,
                "sha256:aaaa",
                if approved { None } else { Some("over limit".into()) },
            );
            ledger.append(&manifest, &seal).unwrap();
        }

        let stats = ledger.stats(&QueryFilters::default()).unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.approved, 2);
        assert_eq!(stats.denied, 2);
        assert!((stats.approval_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.by_provider["stripe"], 3);
        assert_eq!(stats.by_provider["aws"], 1);
        assert_eq!(stats.top_agents[0].agent_id, "agent-1");
        assert_eq!(stats.denials_by_reason["over limit"], 2);

        // Provider-scoped window.
        let stripe_only = QueryFilters {
            provider: Some("stripe".into()),
            ..Default::default()
        };
        let stats = ledger.stats(&stripe_only).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.denied, 1);
    }

    #[test]
    fn organizations_allow_only_active_updates() {
        let ledger = Ledger::open_in_memory().unwrap();
        let org = Organization {
            org_id: "org-1".into(),
            name: "Acme".into(),
            contact_email: "ops@acme.test".into(),
            created_at: truncate_to_micros(Utc::now()),
            active: true,
        };
        ledger.insert_organization(&org).unwrap();

        assert!(ledger
            .execute_raw("UPDATE organizations SET name = 'Evil Acme'")
            .is_err());
        assert!(ledger.execute_raw("DELETE FROM organizations").is_err());

        assert!(ledger.set_organization_active("org-1", false).unwrap());
        let stored = ledger.get_organization("org-1").unwrap().unwrap();
        assert!(!stored.active);
        assert_eq!(stored.name, "Acme");
    }

    #[test]
    fn agents_allow_only_active_updates() {
        let ledger = Ledger::open_in_memory().unwrap();
        let org = Organization {
            org_id: "org-1".into(),
            name: "Acme".into(),
            contact_email: "ops@acme.test".into(),
            created_at: truncate_to_micros(Utc::now()),
            active: true,
        };
        ledger.insert_organization(&org).unwrap();
        let agent = Agent {
            agent_id: "agent-1".into(),
            org_id: "org-1".into(),
            name: "deploy bot".into(),
            description: Some("release automation".into()),
            api_key_hash: None,
            created_at: truncate_to_micros(Utc::now()),
            active: true,
        };
        ledger.insert_agent(&agent).unwrap();

        assert!(ledger
            .execute_raw("UPDATE agents SET org_id = 'org-2'")
            .is_err());
        assert!(ledger.execute_raw("DELETE FROM agents").is_err());

        assert!(ledger.set_agent_active("agent-1", false).unwrap());
        assert!(!ledger.get_agent("agent-1").unwrap().unwrap().active);

        let listed = ledger.list_agents("org-1").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].agent_id, "agent-1");
    }

    #[test]
    fn persistent_ledger_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("ledger.db");
        let (manifest, seal) = {
            let ledger = Ledger::open(&db_path).unwrap();
            let manifest = sample_manifest("agent-1", "org-1", "stripe");
            let seal = signer().issue(manifest.manifest_id, true, "sha256:aaaa", None);
            ledger.append(&manifest, &seal).unwrap();
            (manifest, seal)
        };

        let reopened = Ledger::open(&db_path).unwrap();
        assert_eq!(
            reopened.get_manifest(manifest.manifest_id).unwrap().unwrap(),
            manifest
        );
        assert_eq!(reopened.get_seal(&seal.seal_id).unwrap().unwrap(), seal);
    }
}
