// Copyright (c) 2024 The Botho Foundation

//! Observed deposit types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sender reported when the depositing transaction's inputs could not be
/// resolved.
pub const UNKNOWN_SENDER: &str = "unknown";

/// Identifier of a deposit (the depositing transaction hash).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DepositId(String);

impl DepositId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DepositId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DepositId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DepositId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A transfer into the watched address matching the target amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    /// Depositing transaction
    pub id: DepositId,

    /// Address of the first input of the depositing transaction
    pub sender: String,

    /// Amount in base units
    pub amount: u64,
}

impl Deposit {
    pub fn new(id: impl Into<DepositId>, sender: impl Into<String>, amount: u64) -> Self {
        Self {
            id: id.into(),
            sender: sender.into(),
            amount,
        }
    }

    /// Whether the sender was resolved to a real address.
    pub fn has_known_sender(&self) -> bool {
        !self.sender.is_empty() && self.sender != UNKNOWN_SENDER
    }
}
