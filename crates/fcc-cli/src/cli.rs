use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "fcc",
    about = "Fiscal chain connector: hash-chained document submission",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Submit a batch of documents through the pipeline
    Submit(SubmitArgs),
    /// Print the canonical payload and chain hash of a document
    Hash(HashArgs),
    /// Check a document's fields and tax arithmetic
    Validate(ValidateArgs),
    /// Audit the hash chains of a batch of hashed documents
    Verify(VerifyArgs),
    /// Show the effective pipeline configuration
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct SubmitArgs {
    /// JSON file holding an array of documents, in submission order
    pub batch: PathBuf,
    /// Pipeline configuration file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Hex Ed25519 secret key; the deterministic signer is used without one
    #[arg(long)]
    pub signing_key: Option<String>,
    /// Artificial latency of the simulated authority, in milliseconds
    #[arg(long, default_value_t = 0)]
    pub latency_ms: u64,
}

#[derive(Args)]
pub struct HashArgs {
    /// JSON file holding one document
    pub document: PathBuf,
    /// Head hash to link after; the document's own prev_hash is used otherwise
    #[arg(long)]
    pub prev: Option<String>,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// JSON file holding one document
    pub document: PathBuf,
}

#[derive(Args)]
pub struct VerifyArgs {
    /// JSON file holding an array of hashed documents, in chain order per series
    pub batch: PathBuf,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Configuration file to load and validate
    #[arg(long)]
    pub path: Option<PathBuf>,
}
