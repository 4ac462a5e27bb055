// service.rs — Registration and authentication on top of the ledger registry.
//
// The service composes the token signer with the ledger-backed registry:
// a bearer token authorizes a request only if its signature checks out AND
// its (agent, org) pair is still present and active. Auth events for these
// outcomes are recorded by the gateway layer, which knows endpoint and
// peer address.

use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use ag_ledger::{Agent, Ledger, Organization};

use crate::error::IdentityError;
use crate::token::TokenSigner;

/// The identity attached to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub agent_id: String,
    pub org_id: String,
    pub scope: String,
}

/// Result of bootstrapping an organization.
#[derive(Debug, Clone)]
pub struct OrgRegistration {
    pub organization: Organization,
    pub admin_agent: Agent,
    pub token: String,
}

/// Result of registering an agent.
#[derive(Debug, Clone)]
pub struct AgentRegistration {
    pub agent: Agent,
    pub token: String,
}

/// Hash an API key for storage. SHA-256, lowercase hex.
pub fn hash_api_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Registration, token issuance, and request authentication.
pub struct IdentityService {
    ledger: Arc<Ledger>,
    tokens: TokenSigner,
}

impl IdentityService {
    pub fn new(ledger: Arc<Ledger>, tokens: TokenSigner) -> Self {
        Self { ledger, tokens }
    }

    /// Bootstrap a new organization with an admin agent and a bearer token.
    /// Unauthenticated by design — it is the first-use entrypoint.
    pub fn register_organization(
        &self,
        name: &str,
        contact_email: &str,
    ) -> Result<OrgRegistration, IdentityError> {
        let now = Utc::now();
        let organization = Organization {
            org_id: format!("org_{}", Uuid::new_v4().simple()),
            name: name.to_string(),
            contact_email: contact_email.to_string(),
            created_at: now,
            active: true,
        };
        let admin_agent = Agent {
            agent_id: format!("agent_{}", Uuid::new_v4().simple()),
            org_id: organization.org_id.clone(),
            name: format!("{} admin", name),
            description: Some("organization admin agent".to_string()),
            api_key_hash: None,
            created_at: now,
            active: true,
        };

        self.ledger.insert_organization(&organization)?;
        self.ledger.insert_agent(&admin_agent)?;
        let token = self
            .tokens
            .issue(&admin_agent.agent_id, &organization.org_id, "admin")?;

        tracing::info!(org_id = %organization.org_id, "organization registered");
        Ok(OrgRegistration {
            organization,
            admin_agent,
            token,
        })
    }

    /// Register an agent under the caller's organization and issue it a token.
    pub fn register_agent(
        &self,
        org_id: &str,
        name: &str,
        description: Option<String>,
        api_key: Option<&str>,
    ) -> Result<AgentRegistration, IdentityError> {
        // The org must exist and be active; tokens for inactive orgs fail
        // earlier, but the registry check also covers direct callers.
        match self.ledger.get_organization(org_id)? {
            Some(org) if org.active => {}
            _ => {
                return Err(IdentityError::OrganizationNotActive {
                    org_id: org_id.to_string(),
                })
            }
        }

        let agent = Agent {
            agent_id: format!("agent_{}", Uuid::new_v4().simple()),
            org_id: org_id.to_string(),
            name: name.to_string(),
            description,
            api_key_hash: api_key.map(hash_api_key),
            created_at: Utc::now(),
            active: true,
        };
        self.ledger.insert_agent(&agent)?;
        let token = self.tokens.issue(&agent.agent_id, org_id, "agent")?;

        tracing::info!(agent_id = %agent.agent_id, org_id, "agent registered");
        Ok(AgentRegistration { agent, token })
    }

    /// Authenticate a bearer token: signature, expiry, then registry state.
    pub fn authenticate(&self, token: &str) -> Result<AuthContext, IdentityError> {
        let claims = self.tokens.validate(token)?;

        let agent = match self.ledger.get_agent(&claims.sub)? {
            Some(agent) if agent.active && agent.org_id == claims.org => agent,
            _ => {
                return Err(IdentityError::AgentNotActive {
                    agent_id: claims.sub,
                })
            }
        };
        match self.ledger.get_organization(&agent.org_id)? {
            Some(org) if org.active => {}
            _ => {
                return Err(IdentityError::OrganizationNotActive {
                    org_id: agent.org_id,
                })
            }
        }

        Ok(AuthContext {
            agent_id: claims.sub,
            org_id: claims.org,
            scope: claims.scope,
        })
    }

    /// Verify a presented API key against an agent's stored hash.
    ///
    /// Constant-time comparison of the hex digests; an agent without a
    /// stored hash never matches.
    pub fn verify_api_key(&self, agent_id: &str, presented: &str) -> Result<bool, IdentityError> {
        let Some(agent) = self.ledger.get_agent(agent_id)? else {
            return Ok(false);
        };
        if !agent.active {
            return Ok(false);
        }
        let Some(stored) = &agent.api_key_hash else {
            return Ok(false);
        };
        let candidate = hash_api_key(presented);
        Ok(
            ring::constant_time::verify_slices_are_equal(stored.as_bytes(), candidate.as_bytes())
                .is_ok(),
        )
    }

    /// Look up an organization, active or not.
    pub fn organization(&self, org_id: &str) -> Result<Option<Organization>, IdentityError> {
        Ok(self.ledger.get_organization(org_id)?)
    }

    /// List an organization's agents.
    pub fn agents(&self, org_id: &str) -> Result<Vec<Agent>, IdentityError> {
        Ok(self.ledger.list_agents(org_id)?)
    }
}
