//! Evidence Vault CLI
//!
//! Command-line access to evidence storage, verification, audit trail
//! inspection, signing keys and Merkle batches.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use evidence_vault::audit::verify_log_file;
use evidence_vault::crypto::KeyStore;
use evidence_vault::hashing::HashManager;
use evidence_vault::storage::remote_store_from_config;
use evidence_vault::{EvidenceVault, VaultConfig};

#[derive(Parser)]
#[command(name = "evidence-vault")]
#[command(about = "Tamper-evident evidence storage for land-registry fraud cases")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the signing key pair
    Keygen {
        /// Key identifier (defaults to the configured key_id)
        #[arg(long)]
        key_id: Option<String>,

        /// RSA modulus size in bits (defaults to the configured key_size)
        #[arg(long)]
        key_size: Option<usize>,

        /// Replace an existing key pair
        #[arg(long)]
        overwrite: bool,
    },

    /// Write the public signing key to a file
    ExportPublicKey {
        output: PathBuf,
    },

    /// Hash a file or JSON document
    Hash {
        path: PathBuf,

        /// Hash the canonical JSON form instead of the raw bytes
        #[arg(long)]
        json: bool,
    },

    /// Store evidence for a record
    Store {
        record_id: String,

        /// JSON file with the analysis result
        #[arg(short, long)]
        analysis: PathBuf,

        /// JSON file with ML predictions
        #[arg(short, long)]
        ml_predictions: Option<PathBuf>,

        /// Referenced document (repeatable)
        #[arg(short, long)]
        document: Vec<String>,

        #[arg(long, default_value = "system")]
        actor: String,
    },

    /// Verify stored evidence against its expected hash
    Verify {
        record_id: String,
        expected_hash: String,
    },

    /// Verify the audit trail hash chain
    VerifyAudit {
        /// Audit log to check (defaults to the vault's log)
        #[arg(short, long)]
        log_path: Option<PathBuf>,
    },

    /// Show the audit history of a record
    History {
        record_id: String,
    },

    /// Export audit entries as a JSON array
    ExportAudit {
        output: PathBuf,

        #[arg(short, long)]
        record_id: Option<String>,
    },

    /// Commit a JSON array of evidence items to a Merkle batch
    Batch {
        items: PathBuf,

        #[arg(short, long)]
        batch_id: Option<String>,
    },

    /// Check that an evidence item belongs to a batch
    VerifyBatch {
        batch_id: String,
        record_id: String,

        /// JSON file with the evidence item
        evidence: PathBuf,
    },

    /// Vault statistics
    Stats,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "evidence_vault=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(2);
        }
    }
}

/// Returns whether the checked artifact was valid
async fn run(cli: Cli) -> Result<bool> {
    let config = VaultConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Keygen {
            key_id,
            key_size,
            overwrite,
        } => {
            let store = KeyStore::new(&config.keys_dir())?;
            let key_id = key_id.unwrap_or_else(|| config.key_id.clone());
            let key_pair =
                store.generate_key_pair(&key_id, key_size.unwrap_or(config.key_size), overwrite)?;
            info!("Generated key pair {}", key_id);
            print_json(&store.metadata(&key_pair.key_id)?)?;
        }
        Commands::ExportPublicKey { output } => {
            let vault = open_vault(config)?;
            vault.signature_manager().export_public_key(&output)?;
            println!("{}", output.display());
        }
        Commands::Hash { path, json } => {
            let hasher = HashManager::new();
            let hash = if json {
                hasher.hash(&read_json(&path)?)?
            } else {
                hasher.hash_file(&path)?
            };
            println!("{}", hash);
        }
        Commands::Store {
            record_id,
            analysis,
            ml_predictions,
            document,
            actor,
        } => {
            let vault = open_vault(config)?;
            let analysis_result = read_json(&analysis)?;
            let ml_predictions = ml_predictions.as_deref().map(read_json).transpose()?;
            let documents = (!document.is_empty()).then_some(document);

            let package = vault
                .store_evidence(&record_id, analysis_result, ml_predictions, documents, &actor)
                .await?;
            print_json(&package)?;
        }
        Commands::Verify {
            record_id,
            expected_hash,
        } => {
            let vault = open_vault(config)?;
            let result = vault.verify_evidence(&record_id, &expected_hash).await?;
            print_json(&result)?;
            return Ok(result.is_valid);
        }
        Commands::VerifyAudit { log_path } => {
            let report = match log_path {
                Some(path) => verify_log_file(&path)?,
                None => open_vault(config)?.audit_trail().verify_integrity().await?,
            };
            print_json(&report)?;
            return Ok(report.is_valid);
        }
        Commands::History { record_id } => {
            let vault = open_vault(config)?;
            print_json(&vault.audit_trail().get_history(&record_id).await?)?;
        }
        Commands::ExportAudit { output, record_id } => {
            let vault = open_vault(config)?;
            let count = vault
                .audit_trail()
                .export_json(&output, record_id.as_deref())
                .await?;
            println!("Exported {} entries to {}", count, output.display());
        }
        Commands::Batch { items, batch_id } => {
            let vault = open_vault(config)?;
            let items = match read_json(&items)? {
                Value::Array(items) => items,
                _ => return Err(anyhow!("{} must contain a JSON array", items.display())),
            };
            let info = vault
                .create_evidence_batch(&items, batch_id.as_deref())
                .await?;
            print_json(&info)?;
        }
        Commands::VerifyBatch {
            batch_id,
            record_id,
            evidence,
        } => {
            let vault = open_vault(config)?;
            let evidence = read_json(&evidence)?;
            let result = vault
                .batch_manager()
                .verify_evidence_in_batch(&batch_id, &record_id, &evidence)?;
            print_json(&result)?;
            return Ok(result.is_valid);
        }
        Commands::Stats => {
            let vault = open_vault(config)?;
            print_json(&vault.statistics().await?)?;
        }
    }

    Ok(true)
}

fn open_vault(config: VaultConfig) -> Result<EvidenceVault> {
    let remote_store = remote_store_from_config(&config)?;
    Ok(EvidenceVault::open(config, remote_store)?)
}

fn read_json(path: &Path) -> Result<Value> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
