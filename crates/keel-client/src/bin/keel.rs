use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use keel_client::{ClientConfig, DirectoryProofSource, LightClient, PersistedState, StateStore};
use keel_core::types::HashValue;
use keel_core::{agree_on_waypoint, TrustedState, Waypoint};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Keel light client", long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Trusted state file, overrides `state_path` from the config
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Verify transaction batches in parallel
    #[arg(long, global = true)]
    parallel: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a bootstrap state from one or more waypoints
    Init {
        /// Waypoint as `<version>:<hex>`; repeat once per independent source
        #[arg(long = "waypoint", required = true)]
        waypoints: Vec<Waypoint>,

        /// Replace an existing state file
        #[arg(long)]
        force: bool,
    },
    /// Ratchet the trusted state with the proofs in a directory
    Sync {
        #[arg(long)]
        proofs: PathBuf,
    },
    /// Print the trusted state
    Status,
    /// Fetch and verify a transaction
    Transaction {
        #[arg(long)]
        proofs: PathBuf,
        #[arg(long)]
        version: u64,
    },
    /// Fetch and verify a state value
    Value {
        #[arg(long)]
        proofs: PathBuf,
        /// Hashed key, 64 hex characters
        #[arg(long)]
        key: String,
    },
}

fn load_config(args: &Args) -> Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    if let Some(state) = &args.state {
        config.state_path = Some(state.clone());
    }
    config.verify_parallel |= args.parallel;
    Ok(config)
}

fn state_store(config: &ClientConfig) -> Result<StateStore> {
    config
        .state_path
        .clone()
        .map(StateStore::new)
        .ok_or_else(|| anyhow!("no state file: pass --state or set state_path in the config"))
}

fn open_client(config: ClientConfig, proofs: PathBuf) -> Result<LightClient<DirectoryProofSource>> {
    let source = DirectoryProofSource::new(proofs, config.max_proof_bytes);
    LightClient::restore(source, config).context("Failed to restore trusted state")
}

fn parse_key(key: &str) -> Result<HashValue> {
    let bytes = hex::decode(key.trim_start_matches("0x")).context("Key is not hex")?;
    HashValue::from_slice(&bytes).map_err(|e| anyhow!("Invalid key: {e}"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    match args.command {
        Command::Init { waypoints, force } => {
            let store = state_store(&config)?;
            if !force && store.load()?.is_some() {
                bail!("{} already holds a trusted state; use --force to replace it", store.path().display());
            }
            let agreed = agree_on_waypoint(&waypoints, config.required_waypoint_agreement)?;
            store.save(&PersistedState {
                trusted_state: TrustedState::from(agreed.waypoint),
                latest_record: None,
            })?;
            info!(
                waypoint = %agreed.waypoint,
                agreeing = agreed.source_agreement,
                path = %store.path().display(),
                "bootstrap state written"
            );
        }
        Command::Sync { proofs } => {
            let client = open_client(config, proofs)?;
            let outcome = client.sync()?;
            let progress = client.progress();
            println!(
                "{:?}: version {} epoch {}",
                outcome,
                progress.head_version,
                progress.head_epoch.map_or_else(|| "-".to_string(), |e| e.to_string())
            );
        }
        Command::Status => {
            let store = state_store(&config)?;
            let state = store
                .load()?
                .ok_or_else(|| anyhow!("{} holds no trusted state", store.path().display()))?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Command::Transaction { proofs, version } => {
            let client = open_client(config, proofs)?;
            let transaction = client.get_transaction(version)?;
            println!("{}", hex::encode(transaction));
        }
        Command::Value { proofs, key } => {
            let client = open_client(config, proofs)?;
            match client.get_state_value(parse_key(&key)?)? {
                Some(value) => println!("{}", hex::encode(value)),
                None => println!("absent"),
            }
        }
    }
    Ok(())
}
