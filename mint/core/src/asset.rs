// Copyright (c) 2024 The Botho Foundation

//! Asset names derived from mint sequence numbers.

use serde::{Deserialize, Serialize};

/// Name of the asset minted for one sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetName {
    /// Human readable name, e.g. `Flowmass 7`
    pub display: String,

    /// Lowercase hex encoding of `display`, the on-chain form
    pub hex: String,
}

impl AssetName {
    /// Derive the asset name for `sequence` under `prefix`.
    pub fn for_sequence(prefix: &str, sequence: u64) -> Self {
        let display = format!("{} {}", prefix, sequence);
        let hex = hex::encode(display.as_bytes());
        Self { display, hex }
    }
}

/// Recover the sequence number from an on-chain hex asset name.
///
/// Returns `None` for names that are not valid hex, not UTF-8, or not of the
/// form `"<prefix> <n>"`.
pub fn parse_sequence(prefix: &str, hex_name: &str) -> Option<u64> {
    let bytes = hex::decode(hex_name).ok()?;
    let name = String::from_utf8(bytes).ok()?;
    let rest = name.strip_prefix(prefix)?.strip_prefix(' ')?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}
