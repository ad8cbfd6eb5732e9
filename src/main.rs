use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use ark_std::rand::{rngs::StdRng, SeedableRng};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use zk_review::api;
use zk_review::challenge::{ChallengeIssuer, LogSender};
use zk_review::config::{AppConfig, LoggingConfig};
use zk_review::pool::VerificationPool;
use zk_review::prover::{split_depth_prefix, Prover};
use zk_review::storage::Storage;
use zk_review::{Identity, IdentityStore, ReviewService, Verifier};

const PROVING_KEY_FILE: &str = "proving.key";
const VERIFYING_KEY_FILE: &str = "verifying.key";

#[derive(Parser)]
#[command(name = "zk-review", version, about = "Anonymous reviews gated by group membership proofs")]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, env = "ZK_REVIEW_CONFIG", default_value = "zk-review.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve,
    /// Generate proving and verifying keys for the configured tree depth
    Setup {
        /// Overwrite existing keys
        #[arg(long)]
        force: bool,
    },
    /// Manage client identities
    Identity {
        #[command(subcommand)]
        action: IdentityAction,
    },
}

#[derive(Subcommand)]
enum IdentityAction {
    /// Create an identity for a group and print its commitment
    Generate {
        #[arg(long)]
        group: String,
        #[arg(long, default_value = "identities.json")]
        store: PathBuf,
    },
    /// Print the commitment and export string of a stored identity
    Show {
        #[arg(long)]
        group: String,
        #[arg(long, default_value = "identities.json")]
        store: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("loading config from {:?}", cli.config))?;

    init_logging(&config.logging)?;

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Setup { force } => setup(&config, force),
        Commands::Identity { action } => identity(action),
    }
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if let Some(ref log_file) = logging.file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .with_context(|| format!("opening log file {:?}", log_file))?;
        let file_layer = fmt::layer()
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false);
        if logging.json {
            subscriber.with(file_layer.json()).init();
        } else {
            subscriber.with(file_layer).init();
        }
    } else if logging.json {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer()).init();
    }
    Ok(())
}

fn setup(config: &AppConfig, force: bool) -> Result<()> {
    let key_dir = config.key_dir();
    let pk_path = key_dir.join(PROVING_KEY_FILE);
    let vk_path = key_dir.join(VERIFYING_KEY_FILE);

    if !force && (pk_path.exists() || vk_path.exists()) {
        bail!("keys already exist in {:?}; pass --force to overwrite", key_dir);
    }
    std::fs::create_dir_all(&key_dir)
        .with_context(|| format!("creating key directory {:?}", key_dir))?;

    let depth = config.proving.tree_depth;
    info!(depth, "Running circuit setup");
    let mut rng = StdRng::from_entropy();
    let (prover, vk) = Prover::setup_with_rng(depth, &mut rng)?;
    let verifier = Verifier::new(vk, depth)?;

    prover.save_proving_key(&pk_path)?;
    verifier.save(&vk_path)?;
    info!(?pk_path, ?vk_path, "Wrote keys");
    Ok(())
}

fn load_keys(config: &AppConfig) -> Result<(Verifier, Vec<u8>)> {
    let key_dir = config.key_dir();
    let vk_path = key_dir.join(VERIFYING_KEY_FILE);
    let pk_path = key_dir.join(PROVING_KEY_FILE);

    if !vk_path.exists() {
        bail!("no verifying key at {:?}; run `zk-review setup` first", vk_path);
    }
    let verifier = Verifier::load(&vk_path)
        .with_context(|| format!("loading verifying key {:?}", vk_path))?;
    if verifier.depth() != config.proving.tree_depth {
        bail!(
            "verifying key was made for depth {} but config says {}",
            verifier.depth(),
            config.proving.tree_depth
        );
    }

    let proving_key = read_proving_key(&pk_path, verifier.depth())?;
    Ok((verifier, proving_key))
}

fn read_proving_key(path: &Path, depth: usize) -> Result<Vec<u8>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("reading proving key {:?}", path))?;
    let (key_depth, _) = split_depth_prefix(&bytes).map_err(anyhow::Error::msg)?;
    if key_depth != depth {
        bail!(
            "proving key was made for depth {} but verifying key for {}",
            key_depth,
            depth
        );
    }
    Ok(bytes)
}

async fn serve(config: AppConfig) -> Result<()> {
    let (verifier, proving_key) = load_keys(&config)?;

    let db_path = config.storage.data_dir.join("db");
    let storage = Arc::new(Storage::open(&db_path)?);
    storage.seed(&config.groups, &config.targets)?;

    let issuer = match &config.challenge.secret {
        Some(secret) => ChallengeIssuer::from_hex(secret, config.challenge_ttl())?,
        None => ChallengeIssuer::ephemeral(config.challenge_ttl())?,
    };
    let pool = VerificationPool::new(config.proving.verify_workers, config.verify_timeout());

    let service = Arc::new(
        ReviewService::new(storage, issuer, verifier, pool)
            .with_sender(Arc::new(LogSender {
                reveal_codes: config.challenge.reveal_codes,
            }))
            .with_proving_key(proving_key),
    );

    let app = api::router(service.clone(), &config.server);
    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    info!(
        %addr,
        depth = config.proving.tree_depth,
        groups = config.groups.len(),
        targets = config.targets.len(),
        "Listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    service.shutdown()?;
    Ok(())
}

async fn shutdown_signal() {
    wait_for_signal(tokio::signal::ctrl_c()).await
}

/// Resolve when `signal` fires. If the listener fails, never resolve so the
/// server keeps running until the process is stopped another way.
async fn wait_for_signal<F>(signal: F)
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn identity(action: IdentityAction) -> Result<()> {
    match action {
        IdentityAction::Generate { group, store } => {
            let mut identities = IdentityStore::open(&store)?;
            if identities.get(&group).is_some() {
                bail!("an identity for group {} already exists in {:?}", group, store);
            }
            let identity = Identity::create();
            let commitment = identity.commitment_string();
            identities.save(&group, identity)?;
            println!("{}", commitment);
        }
        IdentityAction::Show { group, store } => {
            let identities = IdentityStore::open(&store)?;
            let Some(identity) = identities.get(&group) else {
                bail!("no identity for group {} in {:?}", group, store);
            };
            println!("commitment: {}", identity.commitment_string());
            println!("export:     {}", identity.export());
        }
    }
    Ok(())
}
