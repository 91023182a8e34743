use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use colored::Colorize;
use tracing::info;

use fcc_crypto::{ChainHasher, SigningKey};
use fcc_ledger::{SeriesAudit, SeriesAuditor};
use fcc_pipeline::{
    DeterministicSigner, DocumentSigner, Ed25519Signer, InvoicePipeline, PipelineConfig,
    SimulatedAuthority, SubmitMode, SubmitOutcome,
};
use fcc_store::InMemoryStore;
use fcc_types::{validate_document, ChainHash, FiscalDocument, SeriesKey, SharedClock, SystemClock};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Submit(args) => cmd_submit(args, cli.format),
        Command::Hash(args) => cmd_hash(args, cli.format),
        Command::Validate(args) => cmd_validate(args),
        Command::Verify(args) => cmd_verify(args, cli.format),
        Command::Config(args) => cmd_config(args),
    }
}

fn cmd_submit(args: SubmitArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let documents = read_documents(&args.batch)?;

    let signer: Arc<dyn DocumentSigner> = match &args.signing_key {
        Some(hex) => {
            let key = SigningKey::from_hex(hex).context("invalid --signing-key")?;
            Arc::new(Ed25519Signer::new(key))
        }
        None => Arc::new(DeterministicSigner),
    };
    let clock: SharedClock = Arc::new(SystemClock);
    let authority = SimulatedAuthority::new(clock.clone())
        .with_latency(Duration::from_millis(args.latency_ms));
    let store = Arc::new(InMemoryStore::new());
    let pipeline = InvoicePipeline::new(store, signer, Arc::new(authority), config, clock)?;

    info!(documents = documents.len(), batch = %args.batch.display(), "submitting batch");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let outcomes = runtime.block_on(async {
        let sweeper = pipeline.spawn_sweeper();
        let mut outcomes = Vec::with_capacity(documents.len());
        for document in documents.iter().cloned() {
            outcomes.push(pipeline.submit(document, SubmitMode::SignAndSend).await);
        }
        sweeper.shutdown().await;
        outcomes
    });

    let mut audits = Vec::new();
    for (key, _) in group_by_series(&documents)? {
        audits.push(pipeline.audit_series(&key)?);
    }

    match format {
        OutputFormat::Json => {
            let report = serde_json::json!({ "outcomes": outcomes, "audits": audits });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            for (document, outcome) in documents.iter().zip(&outcomes) {
                print_outcome(document, outcome);
            }
            println!();
            for audit in &audits {
                print_audit(audit);
            }
        }
    }

    let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
    if failed > 0 {
        bail!("{failed} of {} documents failed", outcomes.len());
    }
    Ok(())
}

fn cmd_hash(args: HashArgs, format: OutputFormat) -> anyhow::Result<()> {
    let document: FiscalDocument = read_json(&args.document)?;
    let prev = match &args.prev {
        Some(hex) => Some(ChainHash::from_hex(hex).context("invalid --prev")?),
        None => document.prev_hash.clone(),
    };
    let payload = ChainHasher::canonical_payload(&document, prev.as_ref())
        .with_context(|| format!("document {} total overflows", document.number))?;
    let hash = ChainHash::from_digest(ChainHasher::digest(payload.as_bytes()));

    match format {
        OutputFormat::Json => {
            let report = serde_json::json!({ "payload": payload, "hash": hash });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            println!("Payload: {}", payload.dimmed());
            println!("Hash:    {}", hash.as_str().yellow().bold());
        }
    }
    Ok(())
}

fn cmd_validate(args: ValidateArgs) -> anyhow::Result<()> {
    let document: FiscalDocument = read_json(&args.document)?;
    match validate_document(&document) {
        Ok(()) => {
            println!(
                "{} Document {} is valid (total {})",
                "✓".green().bold(),
                document.number.bold(),
                document.total().unwrap_or_default()
            );
            Ok(())
        }
        Err(e) => {
            println!("{} {}", "✗".red().bold(), e);
            bail!("document {} is invalid", document.number)
        }
    }
}

fn cmd_verify(args: VerifyArgs, format: OutputFormat) -> anyhow::Result<()> {
    let documents = read_documents(&args.batch)?;
    let audits: Vec<SeriesAudit> = group_by_series(&documents)?
        .into_iter()
        .map(|(key, docs)| SeriesAuditor::audit(&key, &docs))
        .collect();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&audits)?),
        OutputFormat::Text => audits.iter().for_each(print_audit),
    }

    let broken = audits.iter().filter(|a| !a.is_valid()).count();
    if broken > 0 {
        bail!("{broken} series failed verification");
    }
    Ok(())
}

fn cmd_config(args: ConfigArgs) -> anyhow::Result<()> {
    let config = load_config(args.path.as_deref())?;
    let source = args
        .path
        .as_ref()
        .map_or_else(|| "defaults".to_string(), |p| p.display().to_string());
    println!("{} Configuration valid ({})", "✓".green().bold(), source.dimmed());
    print!("{}", config.to_toml_string()?);
    Ok(())
}

fn print_outcome(document: &FiscalDocument, outcome: &SubmitOutcome) {
    let label = format!("{}|{} #{}", document.taxpayer_id, document.series, document.number);
    match &outcome.error {
        None => {
            let replay = if outcome.replayed { " (replayed)" } else { "" };
            println!(
                "{} {} {}{}",
                "✓".green().bold(),
                label.bold(),
                outcome.status.to_string().green(),
                replay.dimmed()
            );
            if let Some(authority_id) = &outcome.authority_id {
                println!("  Authority: {}", authority_id.cyan());
            }
            if let Some(hash) = outcome.hash() {
                let prev = outcome.prev_hash().map_or("", ChainHash::as_str);
                println!("  Hash: {}", hash.as_str().yellow());
                let prev = if prev.is_empty() { "(genesis)" } else { prev };
                println!("  Prev: {}", prev.dimmed());
            }
        }
        Some(err) => {
            println!(
                "{} {} {} [{}] {}",
                "✗".red().bold(),
                label.bold(),
                outcome.status.to_string().red(),
                err.code.as_str().yellow(),
                err.message
            );
        }
    }
}

fn print_audit(audit: &SeriesAudit) {
    if audit.is_valid() {
        println!(
            "{} Series {}: {} documents, chain intact",
            "✓".green().bold(),
            audit.key.to_string().bold(),
            audit.document_count
        );
        return;
    }
    println!(
        "{} Series {}: {} violations in {} documents",
        "✗".red().bold(),
        audit.key.to_string().bold(),
        audit.violations.len(),
        audit.document_count
    );
    for v in &audit.violations {
        println!("  #{} ({}): {:?} {}", v.position, v.number, v.kind, v.description.dimmed());
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("cannot parse {}", path.display()))
}

/// A batch file holds either an array of documents or a single one.
fn read_documents(path: &Path) -> anyhow::Result<Vec<FiscalDocument>> {
    let value: serde_json::Value = read_json(path)?;
    let documents = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };
    Ok(documents)
}

/// Split documents by series, keeping first-seen series order and the
/// relative order of documents within each series.
fn group_by_series(
    documents: &[FiscalDocument],
) -> anyhow::Result<Vec<(SeriesKey, Vec<FiscalDocument>)>> {
    let mut groups: Vec<(SeriesKey, Vec<FiscalDocument>)> = Vec::new();
    for document in documents {
        let key = document
            .series_key()
            .with_context(|| format!("document {}", document.number))?;
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, docs)) => docs.push(document.clone()),
            None => groups.push((key, vec![document.clone()])),
        }
    }
    Ok(groups)
}
