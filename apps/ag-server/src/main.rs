//! # ag-server
//!
//! The AgentGate gateway daemon.
//!
//! `ag-server serve` binds the REST surface, opens the SQLite ledger, loads
//! the Ed25519 signing key, uploads the compiled policy to OPA, and starts
//! validating manifests. `ag-server keygen` provisions the signing key a
//! deployment needs before first start.
//!
//! ## Usage
//!
//! ```text
//! ag-server keygen --out agentgate-seal.pk8
//! ag-server serve --config agentgate.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ag_engine::{OpaBackend, OpaConfig, PolicyBackend};
use ag_gateway::{build_router, AppState, GatewayConfig};
use ag_identity::{IdentityService, TokenSigner, DEFAULT_TOKEN_TTL_SECS};
use ag_ledger::Ledger;
use ag_seal::SealSigner;

/// AgentGate — policy-sealed authorization gateway for autonomous agents.
#[derive(Parser)]
#[command(name = "ag-server", version, about)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "agentgate.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway (the default when no subcommand is given).
    Serve {
        /// Override the configured listen address.
        #[arg(long)]
        listen: Option<String>,
    },
    /// Generate an Ed25519 signing key as a PKCS#8 file.
    Keygen {
        /// Output path for the key file.
        #[arg(long, default_value = "agentgate-seal.pk8")]
        out: PathBuf,
        /// Overwrite an existing key file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("ag_gateway=info".parse()?)
                .add_directive("ag_engine=info".parse()?)
                .add_directive("ag_identity=info".parse()?)
                .add_directive("ag_server=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Serve { listen: None }) {
        Commands::Keygen { out, force } => keygen(&out, force),
        Commands::Serve { listen } => serve(&cli.config, listen).await,
    }
}

/// Provision the deployment's signing key. The private key is written once,
/// owner-readable only, and never travels anywhere else.
fn keygen(out: &Path, force: bool) -> Result<()> {
    if out.exists() && !force {
        anyhow::bail!(
            "{} already exists — pass --force to overwrite (existing seals stay verifiable; \
             they carry their issuing public key)",
            out.display()
        );
    }
    let key = ag_seal::generate_pkcs8_key().context("key generation failed")?;
    std::fs::write(out, &key).with_context(|| format!("failed to write {}", out.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(out, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to restrict permissions on {}", out.display()))?;
    }
    println!("wrote signing key to {}", out.display());
    Ok(())
}

async fn serve(config_path: &Path, listen_override: Option<String>) -> Result<()> {
    let mut config = if config_path.exists() {
        GatewayConfig::from_file(config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))?
    } else {
        tracing::info!(
            path = %config_path.display(),
            "no config file found; using defaults"
        );
        GatewayConfig::default()
    };
    if let Some(listen) = listen_override {
        config.listen_addr = listen;
    }

    let ledger = Arc::new(
        Ledger::open(&config.database_path)
            .with_context(|| format!("failed to open ledger at {}", config.database_path.display()))?,
    );
    let signer = Arc::new(
        SealSigner::from_key_file(&config.signing_key_path, config.seal_ttl()).with_context(
            || {
                format!(
                    "failed to load signing key from {} — run `ag-server keygen` first",
                    config.signing_key_path.display()
                )
            },
        )?,
    );
    let identity = Arc::new(IdentityService::new(
        Arc::clone(&ledger),
        TokenSigner::new(config.jwt_secret.as_bytes(), DEFAULT_TOKEN_TTL_SECS),
    ));
    let backend = Arc::new(OpaBackend::new(OpaConfig {
        base_url: config.opa_url.clone(),
        policy_name: config.opa_policy_name.clone(),
        source_path: config.policy_source_path.clone(),
        eval_deadline: config.eval_deadline(),
    })?);

    // Initial policy load. Failure is non-fatal: until a reload succeeds,
    // every validation fails closed, which is the safe state.
    match backend.reload().await {
        Ok(policy) => {
            tracing::info!(version = %policy.version, rules = policy.rule_count, "policy loaded")
        }
        Err(e) => {
            tracing::warn!(error = %e, "initial policy load failed; validations deny until a successful reload")
        }
    }

    let listen_addr = config.listen_addr.clone();
    let state = AppState::new(
        config,
        backend as Arc<dyn PolicyBackend>,
        signer,
        ledger,
        identity,
    );
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", listen_addr))?;
    tracing::info!(%listen_addr, "agentgate listening");
    axum::serve(listener, router).await?;
    Ok(())
}
