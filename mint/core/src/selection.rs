// Copyright (c) 2024 The Botho Foundation

//! Coin selection for mint transactions.

use serde::{Deserialize, Serialize};

use crate::error::SelectionError;

/// A spendable output at the watched address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundUnit {
    /// Locator passed to the transaction builder (`txhash#index`)
    pub id: String,

    /// Base-currency value
    pub value: u64,

    /// Whether the unit also holds other assets
    pub carries_foreign_value: bool,
}

impl FundUnit {
    pub fn new(id: impl Into<String>, value: u64, carries_foreign_value: bool) -> Self {
        Self {
            id: id.into(),
            value,
            carries_foreign_value,
        }
    }
}

/// Inputs chosen for one mint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub inputs: Vec<FundUnit>,
    pub total: u64,
}

impl Selection {
    /// Locators of the selected inputs, in selection order.
    pub fn locators(&self) -> Vec<String> {
        self.inputs.iter().map(|u| u.id.clone()).collect()
    }
}

/// Select inputs using the largest-first algorithm.
///
/// Units carrying foreign value are never selected so unrelated holdings are
/// not swept into the mint transaction. Either the returned selection covers
/// `required` or nothing is returned.
pub fn select_inputs(available: &[FundUnit], required: u64) -> Result<Selection, SelectionError> {
    let mut candidates: Vec<&FundUnit> = available
        .iter()
        .filter(|u| !u.carries_foreign_value && u.value > 0)
        .collect();

    // Stable sort keeps the source order among equal values
    candidates.sort_by(|a, b| b.value.cmp(&a.value));

    let mut inputs = Vec::new();
    let mut total = 0u64;

    for unit in candidates {
        if total >= required {
            break;
        }
        total = total.saturating_add(unit.value);
        inputs.push(unit.clone());
    }

    if total < required {
        return Err(SelectionError::InsufficientFunds {
            have: total,
            required,
        });
    }

    Ok(Selection { inputs, total })
}
