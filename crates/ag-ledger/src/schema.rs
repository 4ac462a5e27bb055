// schema.rs — Ledger schema: tables, indexes, immutability triggers.
//
// The triggers are the load-bearing part. Append-only is enforced here, in
// the store itself, so no application bug can rewrite history:
//
//   manifests     — no UPDATE, no DELETE
//   seals         — UPDATE only as the single (was_executed=0, NULL) →
//                   (1, t) transition with every other field unchanged;
//                   no DELETE
//   auth_events   — no UPDATE, no DELETE
//   organizations — UPDATE only to `active`; no DELETE
//   agents        — UPDATE only to `active`; no DELETE
//
// `IS NOT` comparisons are used throughout so NULL columns compare sanely.

use rusqlite::Connection;

use crate::error::LedgerError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS manifests (
    manifest_id      TEXT PRIMARY KEY,
    created_at       TEXT NOT NULL,
    agent_id         TEXT NOT NULL,
    org_id           TEXT NOT NULL,
    user_id          TEXT,
    provider         TEXT NOT NULL,
    method           TEXT NOT NULL,
    parameters       TEXT NOT NULL,
    reasoning        TEXT NOT NULL,
    confidence_score REAL,
    environment      TEXT NOT NULL,
    raw_manifest     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_manifests_agent_id    ON manifests(agent_id);
CREATE INDEX IF NOT EXISTS idx_manifests_org_id      ON manifests(org_id);
CREATE INDEX IF NOT EXISTS idx_manifests_created_at  ON manifests(created_at);
CREATE INDEX IF NOT EXISTS idx_manifests_provider    ON manifests(provider);
CREATE INDEX IF NOT EXISTS idx_manifests_environment ON manifests(environment);

CREATE TABLE IF NOT EXISTS seals (
    seal_id        TEXT PRIMARY KEY,
    manifest_id    TEXT NOT NULL UNIQUE REFERENCES manifests(manifest_id),
    approved       INTEGER NOT NULL,
    policy_version TEXT NOT NULL,
    denial_reason  TEXT,
    signature      TEXT NOT NULL,
    public_key     TEXT NOT NULL,
    issued_at      TEXT NOT NULL,
    expires_at     TEXT NOT NULL,
    was_executed   INTEGER NOT NULL DEFAULT 0,
    executed_at    TEXT
);

CREATE INDEX IF NOT EXISTS idx_seals_manifest_id ON seals(manifest_id);
CREATE INDEX IF NOT EXISTS idx_seals_approved    ON seals(approved);
CREATE INDEX IF NOT EXISTS idx_seals_issued_at   ON seals(issued_at);

CREATE TABLE IF NOT EXISTS auth_events (
    event_id       TEXT PRIMARY KEY,
    event_type     TEXT NOT NULL,
    agent_id       TEXT,
    org_id         TEXT,
    endpoint       TEXT,
    ip             TEXT,
    success        INTEGER NOT NULL,
    failure_reason TEXT,
    created_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_auth_events_org_id     ON auth_events(org_id);
CREATE INDEX IF NOT EXISTS idx_auth_events_created_at ON auth_events(created_at);

CREATE TABLE IF NOT EXISTS organizations (
    org_id        TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    contact_email TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    active        INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS agents (
    agent_id     TEXT PRIMARY KEY,
    org_id       TEXT NOT NULL REFERENCES organizations(org_id),
    name         TEXT NOT NULL,
    description  TEXT,
    api_key_hash TEXT,
    created_at   TEXT NOT NULL,
    active       INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_agents_org_id ON agents(org_id);

CREATE TRIGGER IF NOT EXISTS manifests_no_update BEFORE UPDATE ON manifests
BEGIN
    SELECT RAISE(ABORT, 'manifests are append-only');
END;

CREATE TRIGGER IF NOT EXISTS manifests_no_delete BEFORE DELETE ON manifests
BEGIN
    SELECT RAISE(ABORT, 'manifests are append-only');
END;

CREATE TRIGGER IF NOT EXISTS seals_frozen_fields BEFORE UPDATE ON seals
WHEN NEW.seal_id IS NOT OLD.seal_id
  OR NEW.manifest_id IS NOT OLD.manifest_id
  OR NEW.approved IS NOT OLD.approved
  OR NEW.policy_version IS NOT OLD.policy_version
  OR NEW.denial_reason IS NOT OLD.denial_reason
  OR NEW.signature IS NOT OLD.signature
  OR NEW.public_key IS NOT OLD.public_key
  OR NEW.issued_at IS NOT OLD.issued_at
  OR NEW.expires_at IS NOT OLD.expires_at
BEGIN
    SELECT RAISE(ABORT, 'seal fields are frozen at issue time');
END;

CREATE TRIGGER IF NOT EXISTS seals_execution_monotonic BEFORE UPDATE ON seals
WHEN NOT (OLD.was_executed = 0 AND NEW.was_executed = 1 AND NEW.executed_at IS NOT NULL)
BEGIN
    SELECT RAISE(ABORT, 'seal execution only transitions unexecuted to executed');
END;

CREATE TRIGGER IF NOT EXISTS seals_no_delete BEFORE DELETE ON seals
BEGIN
    SELECT RAISE(ABORT, 'seals are append-only');
END;

CREATE TRIGGER IF NOT EXISTS auth_events_no_update BEFORE UPDATE ON auth_events
BEGIN
    SELECT RAISE(ABORT, 'auth events are append-only');
END;

CREATE TRIGGER IF NOT EXISTS auth_events_no_delete BEFORE DELETE ON auth_events
BEGIN
    SELECT RAISE(ABORT, 'auth events are append-only');
END;

CREATE TRIGGER IF NOT EXISTS organizations_active_only BEFORE UPDATE ON organizations
WHEN NEW.org_id IS NOT OLD.org_id
  OR NEW.name IS NOT OLD.name
  OR NEW.contact_email IS NOT OLD.contact_email
  OR NEW.created_at IS NOT OLD.created_at
BEGIN
    SELECT RAISE(ABORT, 'only the active flag of an organization may change');
END;

CREATE TRIGGER IF NOT EXISTS organizations_no_delete BEFORE DELETE ON organizations
BEGIN
    SELECT RAISE(ABORT, 'organizations are deactivated, never deleted');
END;

CREATE TRIGGER IF NOT EXISTS agents_active_only BEFORE UPDATE ON agents
WHEN NEW.agent_id IS NOT OLD.agent_id
  OR NEW.org_id IS NOT OLD.org_id
  OR NEW.name IS NOT OLD.name
  OR NEW.description IS NOT OLD.description
  OR NEW.api_key_hash IS NOT OLD.api_key_hash
  OR NEW.created_at IS NOT OLD.created_at
BEGIN
    SELECT RAISE(ABORT, 'only the active flag of an agent may change');
END;

CREATE TRIGGER IF NOT EXISTS agents_no_delete BEFORE DELETE ON agents
BEGIN
    SELECT RAISE(ABORT, 'agents are deactivated, never deleted');
END;
"#;

/// Install the full schema on a fresh or existing connection. Idempotent.
pub fn init(conn: &Connection) -> Result<(), LedgerError> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
