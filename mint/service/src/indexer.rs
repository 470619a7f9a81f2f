// Copyright (c) 2024 The Botho Foundation

//! Ledger indexer client.
//!
//! The indexer answers three questions: which outputs sit at the watched
//! address, who sent a given transaction, and which assets exist under the
//! minting policy.

use async_trait::async_trait;
use bth_mint_core::{asset::parse_sequence, IndexerConfig, Network};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tracing::debug;

use crate::{error::SourceError, wire::BASE_UNIT};

/// An output at an address as reported by the indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressOutput {
    pub tx_hash: String,
    pub output_index: u32,
    /// Base-currency value
    pub value: u64,
    pub carries_foreign_value: bool,
}

/// Read access to a ledger indexing service.
#[async_trait]
pub trait LedgerIndex: Send + Sync {
    /// Outputs currently held at `address`.
    async fn address_outputs(&self, address: &str) -> Result<Vec<AddressOutput>, SourceError>;

    /// Address of the first input of `tx_hash`.
    async fn transaction_sender(&self, tx_hash: &str) -> Result<String, SourceError>;

    /// Asset ids (policy id followed by hex name) minted under `policy_id`.
    async fn policy_assets(&self, policy_id: &str) -> Result<Vec<String>, SourceError>;
}

/// Source of truth for which sequences have already been minted.
#[async_trait]
pub trait MintHistory: Send + Sync {
    /// Highest sequence found on-chain, 0 if none.
    async fn max_minted_sequence(&self) -> Result<u64, SourceError>;
}

/// Mint history derived from the assets under the minting policy.
pub struct PolicyHistory {
    index: Arc<dyn LedgerIndex>,
    policy_id: String,
    name_prefix: String,
}

impl PolicyHistory {
    pub fn new(
        index: Arc<dyn LedgerIndex>,
        policy_id: impl Into<String>,
        name_prefix: impl Into<String>,
    ) -> Self {
        Self {
            index,
            policy_id: policy_id.into(),
            name_prefix: name_prefix.into(),
        }
    }
}

#[async_trait]
impl MintHistory for PolicyHistory {
    async fn max_minted_sequence(&self) -> Result<u64, SourceError> {
        let assets = self.index.policy_assets(&self.policy_id).await?;

        let max = assets
            .iter()
            .filter_map(|asset| {
                let hex_name = asset.strip_prefix(self.policy_id.as_str()).unwrap_or(asset);
                parse_sequence(&self.name_prefix, hex_name)
            })
            .max()
            .unwrap_or(0);

        debug!(
            "Found {} assets under policy, max sequence {}",
            assets.len(),
            max
        );
        Ok(max)
    }
}

#[derive(Debug, Deserialize)]
struct RawAmount {
    unit: String,
    quantity: String,
}

#[derive(Debug, Deserialize)]
struct RawUtxo {
    tx_hash: String,
    #[serde(default)]
    output_index: u32,
    amount: Vec<RawAmount>,
}

#[derive(Debug, Deserialize)]
struct RawTxInput {
    address: String,
}

#[derive(Debug, Deserialize)]
struct RawTxUtxos {
    inputs: Vec<RawTxInput>,
}

#[derive(Debug, Deserialize)]
struct RawAsset {
    asset: String,
}

/// Items per page requested from list endpoints; also the API maximum.
const PAGE_SIZE: usize = 100;

/// Client for a Blockfrost-compatible indexer API.
pub struct BlockfrostClient {
    client: Client,
    base_url: String,
    project_id: String,
    max_pages: u32,
}

impl BlockfrostClient {
    /// Create a client for the configured network.
    pub fn new(config: &IndexerConfig, network: Network) -> Result<Self, SourceError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(network).to_string());

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SourceError::Request {
                target: base_url.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id: config.project_id.clone(),
            max_pages: config.max_pages,
        })
    }

    async fn get(&self, path: &str) -> Result<(String, StatusCode, String), SourceError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .header("project_id", &self.project_id)
            .send()
            .await
            .map_err(|e| SourceError::Request {
                target: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| SourceError::Request {
            target: url.clone(),
            message: e.to_string(),
        })?;

        Ok((url, status, body))
    }

    /// Fetch every page of a list endpoint.
    ///
    /// Stops at the first short page. A 404 means an empty list. Running
    /// out of `max_pages` while pages are still full is an error, never a
    /// truncated list.
    async fn get_pages<T: Send>(
        &self,
        path: &str,
        parse: fn(&str, &str) -> Result<Vec<T>, SourceError>,
    ) -> Result<Vec<T>, SourceError> {
        let mut items = Vec::new();

        for page in 1..=self.max_pages {
            let (url, status, body) = self
                .get(&format!("{}?count={}&page={}", path, PAGE_SIZE, page))
                .await?;
            if status == StatusCode::NOT_FOUND {
                return Ok(items);
            }

            let page_items = parse(&url, &body)?;
            let full = page_items.len() >= PAGE_SIZE;
            items.extend(page_items);
            if !full {
                return Ok(items);
            }
        }

        Err(SourceError::Response {
            target: format!("{}{}", self.base_url, path),
            message: format!("more than {} full pages of results", self.max_pages),
        })
    }
}

#[async_trait]
impl LedgerIndex for BlockfrostClient {
    async fn address_outputs(&self, address: &str) -> Result<Vec<AddressOutput>, SourceError> {
        // An address that never received anything is reported as not found
        self.get_pages(&format!("/addresses/{}/utxos", address), parse_address_outputs)
            .await
    }

    async fn transaction_sender(&self, tx_hash: &str) -> Result<String, SourceError> {
        let (url, _, body) = self.get(&format!("/txs/{}/utxos", tx_hash)).await?;
        parse_transaction_sender(&url, &body)
    }

    async fn policy_assets(&self, policy_id: &str) -> Result<Vec<String>, SourceError> {
        // Nothing minted under the policy yet is reported as not found
        self.get_pages(&format!("/assets/policy/{}", policy_id), parse_policy_assets)
            .await
    }
}

fn default_base_url(network: Network) -> &'static str {
    match network {
        Network::Mainnet => "https://cardano-mainnet.blockfrost.io/api/v0",
        Network::Preprod => "https://cardano-preprod.blockfrost.io/api/v0",
        Network::Preview => "https://cardano-preview.blockfrost.io/api/v0",
    }
}

/// Build the error for a body that did not match the expected shape,
/// keeping whatever the service said.
fn unexpected(url: &str, body: &str, err: serde_json::Error) -> SourceError {
    let message = match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => value.to_string(),
        Err(_) => format!("{}; raw={}", err, body.trim()),
    };
    SourceError::Response {
        target: url.to_string(),
        message,
    }
}

fn parse_address_outputs(url: &str, body: &str) -> Result<Vec<AddressOutput>, SourceError> {
    let utxos: Vec<RawUtxo> = serde_json::from_str(body).map_err(|e| unexpected(url, body, e))?;

    Ok(utxos
        .into_iter()
        .map(|utxo| {
            let mut value = 0u64;
            let mut foreign = false;
            for amount in &utxo.amount {
                if amount.unit == BASE_UNIT {
                    value = amount.quantity.parse().unwrap_or(0);
                } else {
                    foreign = true;
                }
            }
            AddressOutput {
                tx_hash: utxo.tx_hash,
                output_index: utxo.output_index,
                value,
                carries_foreign_value: foreign,
            }
        })
        .collect())
}

fn parse_transaction_sender(url: &str, body: &str) -> Result<String, SourceError> {
    let tx: RawTxUtxos = serde_json::from_str(body).map_err(|e| unexpected(url, body, e))?;

    tx.inputs
        .into_iter()
        .next()
        .map(|input| input.address)
        .ok_or_else(|| SourceError::Response {
            target: url.to_string(),
            message: "transaction has no inputs".to_string(),
        })
}

fn parse_policy_assets(url: &str, body: &str) -> Result<Vec<String>, SourceError> {
    let assets: Vec<RawAsset> = serde_json::from_str(body).map_err(|e| unexpected(url, body, e))?;
    Ok(assets.into_iter().map(|a| a.asset).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bth_mint_core::AssetName;
    use std::collections::HashMap;

    const URL: &str = "https://indexer/addresses/addr1/utxos";

    #[test]
    fn test_parse_address_outputs() {
        let body = r#"[
            {"tx_hash": "aa", "output_index": 0, "amount": [{"unit": "lovelace", "quantity": "27000000"}]},
            {"tx_hash": "bb", "output_index": 3, "amount": [
                {"unit": "lovelace", "quantity": "1400000"},
                {"unit": "1d0c466c6f", "quantity": "1"}
            ]}
        ]"#;

        let outputs = parse_address_outputs(URL, body).unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].tx_hash, "aa");
        assert_eq!(outputs[0].value, 27_000_000);
        assert!(!outputs[0].carries_foreign_value);
        assert_eq!(outputs[1].output_index, 3);
        assert!(outputs[1].carries_foreign_value);
    }

    #[test]
    fn test_error_object_is_reported_with_target() {
        let body = r#"{"status_code": 403, "error": "Forbidden", "message": "Invalid project token."}"#;

        let err = parse_address_outputs(URL, body).unwrap_err();
        let text = err.to_string();
        assert!(text.contains(URL));
        assert!(text.contains("Invalid project token."));
    }

    #[test]
    fn test_parse_transaction_sender() {
        let body = r#"{"hash": "aa", "inputs": [{"address": "addr1sender"}, {"address": "addr1other"}], "outputs": []}"#;
        assert_eq!(parse_transaction_sender(URL, body).unwrap(), "addr1sender");

        let empty = r#"{"hash": "aa", "inputs": [], "outputs": []}"#;
        assert!(parse_transaction_sender(URL, empty).is_err());
    }

    struct FakeIndex {
        assets: Vec<String>,
    }

    #[async_trait]
    impl LedgerIndex for FakeIndex {
        async fn address_outputs(&self, _: &str) -> Result<Vec<AddressOutput>, SourceError> {
            Ok(Vec::new())
        }

        async fn transaction_sender(&self, _: &str) -> Result<String, SourceError> {
            Ok(String::new())
        }

        async fn policy_assets(&self, _: &str) -> Result<Vec<String>, SourceError> {
            Ok(self.assets.clone())
        }
    }

    #[tokio::test]
    async fn test_policy_history_max() {
        let policy = "1d0cf168";
        let asset = |prefix: &str, n: u64| {
            format!("{}{}", policy, AssetName::for_sequence(prefix, n).hex)
        };

        let index = FakeIndex {
            assets: vec![
                asset("Flowmass", 3),
                asset("Flowmass", 11),
                asset("Other", 99),
                format!("{}zz", policy),
            ],
        };
        let history = PolicyHistory::new(Arc::new(index), policy, "Flowmass");
        assert_eq!(history.max_minted_sequence().await.unwrap(), 11);

        let empty = PolicyHistory::new(Arc::new(FakeIndex { assets: vec![] }), policy, "Flowmass");
        assert_eq!(empty.max_minted_sequence().await.unwrap(), 0);
    }

    #[test]
    fn test_parse_policy_assets() {
        let body = r#"[{"asset": "1d0c466c6f", "quantity": "1"}]"#;
        assert_eq!(parse_policy_assets(URL, body).unwrap(), vec!["1d0c466c6f"]);
        assert!(parse_policy_assets(URL, "[]").unwrap().is_empty());
    }

    /// Minimal HTTP server answering with canned bodies keyed by request
    /// target; anything else gets a 404. Returns the base URL and the
    /// targets requested so far.
    async fn serve(
        routes: HashMap<String, String>,
    ) -> (String, Arc<std::sync::Mutex<Vec<String>>>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = requests.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }

                let request = String::from_utf8_lossy(&request);
                let target = request.split_whitespace().nth(1).unwrap_or("").to_string();
                seen.lock().unwrap().push(target.clone());

                let (status, body) = match routes.get(&target) {
                    Some(body) => ("200 OK", body.clone()),
                    None => ("404 Not Found", r#"{"status_code":404}"#.to_string()),
                };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (base_url, requests)
    }

    fn client(base_url: &str, max_pages: u32) -> BlockfrostClient {
        let config = IndexerConfig {
            project_id: "test".into(),
            base_url: Some(base_url.to_string()),
            timeout_secs: 5,
            max_pages,
        };
        BlockfrostClient::new(&config, Network::Mainnet).unwrap()
    }

    fn utxo_page(outputs: &[(String, u64)]) -> String {
        let utxos: Vec<serde_json::Value> = outputs
            .iter()
            .map(|(tx_hash, value)| {
                serde_json::json!({
                    "tx_hash": tx_hash,
                    "output_index": 0,
                    "amount": [{"unit": "lovelace", "quantity": value.to_string()}],
                })
            })
            .collect();
        serde_json::Value::Array(utxos).to_string()
    }

    fn change_outputs(count: usize) -> Vec<(String, u64)> {
        (0..count).map(|i| (format!("change{}", i), 1_000_000)).collect()
    }

    #[tokio::test]
    async fn test_deposit_on_later_page_is_found() {
        use crate::source::{DepositSource, LiveSource};
        use bth_mint_core::{Deposit, StateStore};

        let path = "/addresses/addr1monitor/utxos";
        let mut routes = HashMap::new();
        routes.insert(
            format!("{}?count=100&page=1", path),
            utxo_page(&change_outputs(PAGE_SIZE)),
        );
        routes.insert(
            format!("{}?count=100&page=2", path),
            utxo_page(&[("deposit".to_string(), 27_000_000)]),
        );
        routes.insert(
            "/txs/deposit/utxos".to_string(),
            r#"{"inputs": [{"address": "addrX"}], "outputs": []}"#.to_string(),
        );
        let (base_url, requests) = serve(routes).await;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::load(dir.path().join("mint.state")).unwrap());
        let source = LiveSource::new(Arc::new(client(&base_url, 10)), store, "addr1monitor");

        let deposits = source.fetch_new_deposits(27_000_000).await.unwrap();
        assert_eq!(deposits, vec![Deposit::new("deposit", "addrX", 27_000_000)]);

        let requests = requests.lock().unwrap().clone();
        assert_eq!(
            requests,
            vec![
                format!("{}?count=100&page=1", path),
                format!("{}?count=100&page=2", path),
                "/txs/deposit/utxos".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_page_limit_is_an_error() {
        let path = "/addresses/addr1monitor/utxos";
        let mut routes = HashMap::new();
        for page in 1..=2 {
            routes.insert(
                format!("{}?count=100&page={}", path, page),
                utxo_page(&change_outputs(PAGE_SIZE)),
            );
        }
        let (base_url, _) = serve(routes).await;

        let err = client(&base_url, 2)
            .address_outputs("addr1monitor")
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Response { .. }));
    }

    #[tokio::test]
    async fn test_unknown_address_and_policy_are_empty() {
        let (base_url, requests) = serve(HashMap::new()).await;
        let client = client(&base_url, 10);

        assert!(client.address_outputs("addr1new").await.unwrap().is_empty());
        assert!(client.policy_assets("1d0c").await.unwrap().is_empty());
        assert_eq!(requests.lock().unwrap().len(), 2);
    }
}
