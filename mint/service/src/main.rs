// Copyright (c) 2024 The Botho Foundation

//! BTH Mint Service
//!
//! Mints one sequenced asset per qualifying deposit.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bth_mint_core::{MintConfig, SourceKind, StateStore};
use bth_mint_service::{
    indexer::{BlockfrostClient, LedgerIndex, PolicyHistory},
    node::NodeCli,
    notify::create_notifier,
    scheduler::{run_once, Scheduler},
    source::{DepositSource, FixtureSource, LiveSource},
    MintWorkflow, WorkflowSettings,
};

/// BTH Mint Service - mint one asset per deposit
#[derive(Parser, Debug)]
#[command(name = "bth-mint")]
#[command(about = "Deposit watcher that mints one sequenced asset per deposit")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "mint.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Run a single tick after reconciliation and exit
    #[arg(long)]
    once: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the mint state and exit
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose);

    let config = MintConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    let store = Arc::new(
        StateStore::load(&config.service.state_file).context("Failed to load mint state")?,
    );

    if let Some(Command::Status) = args.command {
        println!("{}", store.summary());
        return Ok(());
    }

    info!("BTH Mint Service starting...");
    info!("  Watching: {}", config.watch.address);
    info!("  Target amount: {}", config.watch.target_amount);
    info!("  Network: {}", config.node.network);
    info!("  Source: {:?}", config.service.source);
    info!("  {}", store.summary());

    std::fs::create_dir_all(&config.mint.work_dir).with_context(|| {
        format!(
            "Failed to create work dir {}",
            config.mint.work_dir.display()
        )
    })?;

    let node = Arc::new(NodeCli::new(config.node.clone(), config.mint.clone()));
    node.probe().await.context("Node CLI is not usable")?;

    let index: Option<Arc<dyn LedgerIndex>> = if config.indexer.project_id.is_empty() {
        None
    } else {
        Some(Arc::new(BlockfrostClient::new(
            &config.indexer,
            config.node.network,
        )?))
    };

    let source: Box<dyn DepositSource> = match (config.service.source, &index) {
        (SourceKind::Live, Some(index)) => Box::new(LiveSource::new(
            index.clone(),
            store.clone(),
            config.watch.address.clone(),
        )),
        (SourceKind::Live, None) => anyhow::bail!("indexer.project_id is required for live mode"),
        (SourceKind::Fixture, _) => {
            let path = config
                .service
                .fixture_file
                .clone()
                .context("service.fixture_file is required for fixture mode")?;
            info!("Reading deposits from fixture {}", path.display());
            Box::new(FixtureSource::new(
                path,
                store.clone(),
                config.watch.address.clone(),
            ))
        }
    };

    let mut workflow = MintWorkflow::new(
        WorkflowSettings::from_config(&config),
        store.clone(),
        source,
        node.clone(),
        node,
        create_notifier(&config.notify)?,
    );

    match index {
        Some(index) => {
            let history = PolicyHistory::new(
                index,
                config.mint.policy_id.clone(),
                config.mint.name_prefix.clone(),
            );
            let report = workflow
                .reconcile(&history)
                .await
                .context("Startup reconciliation failed")?;
            if !report.is_empty() {
                info!("Reconciled: {}", store.summary());
            }
        }
        None => warn!("No indexer configured, skipping startup reconciliation"),
    }

    if args.once {
        if let Some(report) = run_once(&mut workflow).await {
            info!("Single tick: {:?}", report);
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scheduler = Scheduler::new(
        workflow,
        Duration::from_secs(config.service.poll_interval_secs),
        shutdown_rx,
    );
    let handle = tokio::spawn(scheduler.run());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, finishing current tick...");
    let _ = shutdown_tx.send(());

    let workflow = handle.await?;
    info!("Stopped. {}", workflow.store().summary());

    Ok(())
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
