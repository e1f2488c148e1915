#![forbid(unsafe_code)]
//! Command-line front end for the SPV header store

use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use colored::*;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use trinity_spv::blockchain::{Block, Blockchain};
use trinity_spv::config::{load_config, load_config_from, Config};
use trinity_spv::crypto::hash_from_reversed_hex;
use trinity_spv::error::ChainError;
use trinity_spv::merkle::MerkleBlockMessage;
use trinity_spv::persistence::Database;
use trinity_spv::sync::{HeaderSynchronizer, SyncOutcome};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the config file (default: ./config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Link headers from a file, one 80-byte header hex per line
    Import {
        file: PathBuf,
        /// Headers per batch
        #[arg(long, default_value_t = 2000)]
        batch: usize,
    },
    /// Show the main-chain tip
    Tip,
    /// Show one stored block
    Block {
        #[arg(long, conflicts_with = "hash", required_unless_present = "hash")]
        height: Option<u32>,
        /// Block hash in explorer (reversed) hex
        #[arg(long)]
        hash: Option<String>,
    },
    /// Apply a hex-encoded merkleblock payload to its block
    Merkle { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    let chain = Arc::new(open_chain(&config)?);

    match cli.command {
        Commands::Import { file, batch } => import(chain, &config, &file, batch).await?,
        Commands::Tip => print_block(&chain.tip()?),
        Commands::Block { height, hash } => {
            let block = match (height, hash) {
                (Some(h), _) => chain.block_at_height(h)?,
                (None, Some(hex)) => chain.block_by_hash(&hash_from_reversed_hex(&hex)?)?,
                (None, None) => None,
            };
            match block {
                Some(block) => print_block(&block),
                None => {
                    eprintln!("{}", "Block not found".bright_red());
                    std::process::exit(1);
                }
            }
        }
        Commands::Merkle { file } => {
            let payload = std::fs::read_to_string(&file)?;
            let bytes = hex::decode(payload.trim())
                .map_err(|e| ChainError::InvalidMerkleProof(format!("Payload is not hex: {}", e)))?;
            let message = MerkleBlockMessage::from_bytes(&bytes)?;
            let sync = HeaderSynchronizer::new(chain, config.sync.max_orphan_batches);
            let block = sync.receive_merkle_block(&message).await?;
            println!("{}", "✅ Merkle proof applied".bright_green());
            print_block(&block);
        }
    }

    Ok(())
}

fn open_chain(config: &Config) -> Result<Blockchain, ChainError> {
    if let Some(parent) = Path::new(&config.database.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = Database::open(&config.database.path)?;
    Blockchain::open(Box::new(db), config.chain_params()?)
}

async fn import(
    chain: Arc<Blockchain>,
    config: &Config,
    file: &Path,
    batch_size: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", format!("📥 Importing headers from {}", file.display()).bright_cyan());

    let contents = std::fs::read_to_string(file)?;
    let mut headers = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let raw = hex::decode(line)
            .map_err(|e| ChainError::InvalidHeader(format!("line {}: {}", line_no + 1, e)))?;
        headers.push(raw);
    }

    let sync = HeaderSynchronizer::new(chain.clone(), config.sync.max_orphan_batches);
    for chunk in headers.chunks(batch_size.max(1)) {
        match sync.receive_headers(chunk.to_vec()).await? {
            SyncOutcome::Linked { blocks, tip_height } => {
                println!("  linked {} headers, tip height {}", blocks.len(), tip_height);
            }
            SyncOutcome::Buffered { missing_parent } => {
                println!(
                    "  {} waiting for parent {}",
                    "buffered".yellow(),
                    trinity_spv::crypto::hash_to_reversed_hex(&missing_parent)
                );
            }
        }
    }

    let stats = sync.stats().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    if sync.pending_orphans().await > 0 {
        println!(
            "{}",
            format!("⚠️  {} batches still waiting for their parent", sync.pending_orphans().await).yellow()
        );
    }
    print_block(&chain.tip()?);
    Ok(())
}

fn print_block(block: &Block) {
    let time = Utc
        .timestamp_opt(block.header.timestamp as i64, 0)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_default();
    let summary = json!({
        "hash": block.hash_hex(),
        "height": block.height,
        "previous_hash": trinity_spv::crypto::hash_to_reversed_hex(&block.previous_hash()),
        "merkle_root": trinity_spv::crypto::hash_to_reversed_hex(&block.header.merkle_root),
        "time": time,
        "bits": format!("{:08x}", block.header.bits),
        "chain_work": format!("{:#x}", block.chain_work),
        "main_chain": block.main_chain,
        "synced": block.synced,
        "transactions": block.transactions.iter().map(|tx| tx.reversed_hex()).collect::<Vec<_>>(),
    });
    match serde_json::to_string_pretty(&summary) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("{}", format!("Failed to render block: {}", e).bright_red()),
    }
}
