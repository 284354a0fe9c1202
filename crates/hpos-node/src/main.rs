use clap::{Parser, Subcommand};
use hpos_core::GenesisValidator;
use hpos_crypto::{Address, SignatureScheme};
use hpos_node::{runtime, GenesisFile, Node, NodeConfig};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hpos-node")]
#[command(about = "Hybrid Proof-of-Stake node", version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node
    Start {
        /// Configuration file path
        #[arg(short, long, default_value = "./config.toml")]
        config: String,

        /// Override data directory
        #[arg(short, long)]
        data_dir: Option<String>,
    },

    /// Initialize a new node's data directory
    Init {
        /// Data directory
        #[arg(short, long, default_value = "./data")]
        data_dir: String,

        /// Also bootstrap a single-validator genesis document, generating
        /// a validator key if one isn't already present.
        #[arg(short, long)]
        genesis: bool,

        /// Stake credited to the bootstrap validator, used only with `--genesis`.
        #[arg(long, default_value = "1000000")]
        genesis_stake: u64,
    },

    /// Validator key operations
    Validator {
        #[command(subcommand)]
        command: ValidatorCommands,
    },

    /// Show static node status from its data directory
    Status {
        /// Data directory
        #[arg(short, long, default_value = "./data")]
        data_dir: String,
    },
}

#[derive(Subcommand)]
enum ValidatorCommands {
    /// Generate a validator keypair
    Keygen {
        /// Output path
        #[arg(short, long)]
        output: String,
    },

    /// Show a validator key's address
    Info {
        /// Path to a keypair file written by `keygen`
        #[arg(short, long)]
        path: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}={},hyper=warn,h2=warn", env!("CARGO_PKG_NAME"), log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Start { config, data_dir } => {
            start_node(&config, data_dir).await?;
        }
        Commands::Init {
            data_dir,
            genesis,
            genesis_stake,
        } => {
            init_node(&data_dir, genesis, genesis_stake)?;
        }
        Commands::Validator { command } => {
            handle_validator_command(command)?;
        }
        Commands::Status { data_dir } => {
            show_status(&data_dir)?;
        }
    }

    Ok(())
}

async fn start_node(config_path: &str, data_dir_override: Option<String>) -> anyhow::Result<()> {
    tracing::info!(config_path, "loading configuration");
    let mut config = NodeConfig::from_file(config_path)?;

    if let Some(data_dir) = data_dir_override {
        config.data_dir = data_dir;
    }

    let node = Arc::new(Node::new(config).await?);
    node.clone().start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("received shutdown signal");

    node.stop().await?;
    tracing::info!("node stopped gracefully");

    Ok(())
}

fn init_node(data_dir: &str, create_genesis: bool, genesis_stake: u64) -> anyhow::Result<()> {
    tracing::info!(data_dir, "initializing node");

    std::fs::create_dir_all(data_dir)?;
    std::fs::create_dir_all(format!("{data_dir}/keys"))?;

    let mut config = NodeConfig::default();
    config.data_dir = data_dir.to_string();

    if create_genesis {
        let key_path = format!("{data_dir}/keys/validator.json");
        let address = if std::path::Path::new(&key_path).exists() {
            tracing::info!(%key_path, "reusing existing validator key");
            key_file_address(&key_path)?
        } else {
            let address = runtime::generate_keypair(SignatureScheme::Ed25519, &key_path)?;
            tracing::info!(%key_path, %address, "generated bootstrap validator key");
            address
        };

        config.chain.is_validator = true;
        config.chain.min_stake = config.chain.min_stake.min(genesis_stake);

        let genesis = GenesisFile {
            initial_validators: vec![GenesisValidator {
                address,
                public_key_hex: String::new(),
                stake: genesis_stake,
                commission_bps: 0,
            }],
            allocations: vec![],
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            extra_data: b"hpos genesis".to_vec(),
            gas_limit: 10_000_000,
        };
        genesis.to_file(format!("{data_dir}/genesis.json"))?;
        tracing::info!(%address, stake = genesis_stake, "genesis document written");
    }

    config.to_file(format!("{data_dir}/config.toml"))?;
    tracing::info!("node initialized; edit {data_dir}/config.toml to configure it");

    Ok(())
}

fn handle_validator_command(command: ValidatorCommands) -> anyhow::Result<()> {
    match command {
        ValidatorCommands::Keygen { output } => {
            let address = runtime::generate_keypair(SignatureScheme::Ed25519, &output)?;
            tracing::info!(%output, %address, "validator keypair generated");
            tracing::warn!("keep this file secure — it is the node's signing identity");
        }
        ValidatorCommands::Info { path } => {
            let address = key_file_address(&path)?;
            tracing::info!(%path, %address, "validator key");
        }
    }
    Ok(())
}

fn key_file_address(path: &str) -> anyhow::Result<Address> {
    #[derive(serde::Deserialize)]
    struct KeyFile {
        public_key_hex: String,
    }
    let contents = std::fs::read_to_string(path)?;
    let file: KeyFile = serde_json::from_str(&contents)?;
    let public_key = hpos_crypto::PublicKey::from_hex(SignatureScheme::Ed25519, &file.public_key_hex)?;
    Ok(public_key.to_address())
}

fn show_status(data_dir: &str) -> anyhow::Result<()> {
    let config_path = format!("{data_dir}/config.toml");
    let config = NodeConfig::from_file(&config_path)?;
    tracing::info!(chain_id = config.chain.chain_id, data_dir, "chain configuration");

    match GenesisFile::from_file(config.genesis_path()) {
        Ok(genesis) => {
            tracing::info!(
                validators = genesis.initial_validators.len(),
                timestamp = genesis.timestamp,
                "genesis document present"
            );
        }
        Err(err) => tracing::warn!(error = %err, "no genesis document found; run `init --genesis` first"),
    }

    match config.validator_key_path() {
        Some(path) if std::path::Path::new(&path).exists() => {
            let address = key_file_address(&path)?;
            tracing::info!(%path, %address, "validator key present");
        }
        Some(path) => tracing::warn!(%path, "node is configured as a validator but no key file exists"),
        None => tracing::info!("node is not configured as a validator"),
    }

    Ok(())
}
