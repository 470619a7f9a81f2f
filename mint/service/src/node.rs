// Copyright (c) 2024 The Botho Foundation

//! Chain node access through the node CLI.
//!
//! Every invocation is bounded by the configured timeout; a timeout is
//! reported as an error like any other failure.

use async_trait::async_trait;
use bth_mint_core::{FundUnit, MintSettings, NodeConfig};
use serde::Deserialize;
use std::{fmt, io, path::PathBuf, process::ExitStatus, time::Duration};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::{
    delegate::{ChainNode, MintDelegate, MintReceipt, MintRequest},
    error::{DelegationError, SourceError},
    wire::parse_fund_units,
};

/// Why a CLI invocation failed.
#[derive(Debug)]
enum CliFailure {
    Spawn(io::Error),
    Timeout(Duration),
    Exit { status: ExitStatus, output: String },
}

impl fmt::Display for CliFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliFailure::Spawn(e) => write!(f, "could not run node CLI: {}", e),
            CliFailure::Timeout(d) => write!(f, "timed out after {}s", d.as_secs()),
            CliFailure::Exit { status, output } => {
                write!(f, "{} (output: {})", status, output.trim())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct Tip {
    slot: u64,
}

/// Node CLI wrapper used both for queries and for delegation.
pub struct NodeCli {
    node: NodeConfig,
    mint: MintSettings,
}

impl NodeCli {
    pub fn new(node: NodeConfig, mint: MintSettings) -> Self {
        Self { node, mint }
    }

    /// Check that the CLI runs and the node answers. Returns the tip slot.
    pub async fn probe(&self) -> Result<u64, SourceError> {
        let slot = self.current_slot().await?;
        info!("Node CLI reachable, tip slot {}", slot);
        Ok(slot)
    }

    fn network_args(&self) -> Vec<String> {
        match self.node.magic() {
            None => vec!["--mainnet".to_string()],
            Some(magic) => vec!["--testnet-magic".to_string(), magic.to_string()],
        }
    }

    fn socket_args(&self) -> Vec<String> {
        vec![
            "--socket-path".to_string(),
            self.node.socket_path.display().to_string(),
        ]
    }

    fn work_file(&self, name: &str) -> PathBuf {
        self.mint.work_dir.join(name)
    }

    async fn run(&self, args: &[String]) -> Result<String, CliFailure> {
        let timeout = Duration::from_secs(self.node.timeout_secs);
        debug!("Running {} {}", self.node.cli_path.display(), args.join(" "));

        let child = Command::new(&self.node.cli_path)
            .args(args)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(timeout, child)
            .await
            .map_err(|_| CliFailure::Timeout(timeout))?
            .map_err(CliFailure::Spawn)?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CliFailure::Exit {
                status: output.status,
                output: format!("{}{}", stdout, stderr),
            });
        }

        Ok(stdout)
    }

    /// Arguments for `transaction build`.
    fn build_args(&self, request: &MintRequest, tx_file: &str) -> Vec<String> {
        let asset_id = format!("{}.{}", self.mint.policy_id, request.asset.hex);
        let mint_spec = format!("{} {}", request.quantity, asset_id);
        let tx_out = format!(
            "{}+{}+{} {}",
            request.recipient, self.mint.min_output_value, request.quantity, asset_id
        );

        let mut args: Vec<String> = vec!["conway".into(), "transaction".into(), "build".into()];
        for input in &request.inputs {
            args.push("--tx-in".into());
            args.push(input.clone());
        }
        args.extend([
            "--mint".into(),
            mint_spec,
            "--minting-script-file".into(),
            self.mint.script_file.display().to_string(),
            "--tx-out".into(),
            tx_out,
            "--invalid-hereafter".into(),
            request.invalid_hereafter.to_string(),
        ]);
        if let Some(metadata) = &self.mint.metadata_file {
            args.push("--metadata-json-file".into());
            args.push(metadata.display().to_string());
        }
        args.extend([
            "--change-address".into(),
            request.change_address.clone(),
            "--witness-override".into(),
            "1".into(),
            "--out-file".into(),
            tx_file.to_string(),
        ]);
        args.extend(self.network_args());
        args.extend(self.socket_args());
        args
    }

    async fn transaction_id(&self, signed_file: &str) -> Option<String> {
        let args: Vec<String> = vec![
            "conway".into(),
            "transaction".into(),
            "txid".into(),
            "--tx-file".into(),
            signed_file.into(),
        ];

        match self.run(&args).await {
            Ok(out) => Some(parse_txid(&out)),
            Err(e) => {
                warn!("Could not compute transaction id for {}: {}", signed_file, e);
                None
            }
        }
    }
}

/// Newer CLIs print `{"txhash": ...}`, older ones the bare hash.
fn parse_txid(out: &str) -> String {
    #[derive(Deserialize)]
    struct TxId {
        txhash: String,
    }

    serde_json::from_str::<TxId>(out)
        .map(|t| t.txhash)
        .unwrap_or_else(|_| out.trim().to_string())
}

#[async_trait]
impl ChainNode for NodeCli {
    async fn current_slot(&self) -> Result<u64, SourceError> {
        let mut args: Vec<String> = vec!["query".into(), "tip".into()];
        args.extend(self.network_args());
        args.extend(self.socket_args());

        let out = self.run(&args).await.map_err(|e| SourceError::Node {
            command: "query tip".into(),
            message: e.to_string(),
        })?;

        let tip: Tip = serde_json::from_str(&out).map_err(|e| SourceError::Node {
            command: "query tip".into(),
            message: format!("failed to parse slot: {}", e),
        })?;
        Ok(tip.slot)
    }

    async fn fund_units(&self, address: &str) -> Result<Vec<FundUnit>, SourceError> {
        let utxo_file = self.work_file("utxos.json");
        let mut args: Vec<String> = vec![
            "query".into(),
            "utxo".into(),
            "--address".into(),
            address.into(),
            "--out-file".into(),
            utxo_file.display().to_string(),
        ];
        args.extend(self.network_args());
        args.extend(self.socket_args());

        let node_error = |message: String| SourceError::Node {
            command: "query utxo".into(),
            message,
        };

        self.run(&args)
            .await
            .map_err(|e| node_error(e.to_string()))?;

        let data = tokio::fs::read(&utxo_file)
            .await
            .map_err(|e| node_error(format!("failed to read {}: {}", utxo_file.display(), e)))?;

        parse_fund_units(&data).map_err(|e| node_error(format!("failed to parse utxos: {}", e)))
    }
}

#[async_trait]
impl MintDelegate for NodeCli {
    async fn mint(&self, request: &MintRequest) -> Result<MintReceipt, DelegationError> {
        let tx_file = self
            .work_file(&format!("mint-{}.raw", request.sequence))
            .display()
            .to_string();
        let signed_file = self
            .work_file(&format!("mint-{}.signed", request.sequence))
            .display()
            .to_string();

        info!(
            "Building mint of {} (hex={}) to {}",
            request.asset.display, request.asset.hex, request.recipient
        );
        self.run(&self.build_args(request, &tx_file))
            .await
            .map_err(|e| DelegationError::Build(e.to_string()))?;

        let mut sign_args: Vec<String> = vec![
            "conway".into(),
            "transaction".into(),
            "sign".into(),
            "--tx-body-file".into(),
            tx_file,
            "--signing-key-file".into(),
            self.mint.signing_key_file.display().to_string(),
            "--out-file".into(),
            signed_file.clone(),
        ];
        sign_args.extend(self.network_args());
        self.run(&sign_args)
            .await
            .map_err(|e| DelegationError::Sign(e.to_string()))?;

        let tx_id = self.transaction_id(&signed_file).await;

        let mut submit_args: Vec<String> = vec![
            "conway".into(),
            "transaction".into(),
            "submit".into(),
            "--tx-file".into(),
            signed_file,
        ];
        submit_args.extend(self.network_args());
        submit_args.extend(self.socket_args());
        let output = self
            .run(&submit_args)
            .await
            .map_err(|e| DelegationError::Submit(e.to_string()))?;

        Ok(MintReceipt {
            tx_id,
            output: output.trim().to_string(),
        })
    }
}
