// Copyright (c) 2024 The Botho Foundation

//! Parsing of the node CLI's UTxO query output.
//!
//! Older CLI releases print `{"<txhash#ix>": [{"unit", "quantity"}]}`, newer
//! ones print `{"<txhash#ix>": {"value": {"lovelace": n, "<policy>":
//! {"<name>": n}}}}`. The older shape is tried first and the newer one only
//! when that fails.

use bth_mint_core::FundUnit;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Unit name of the base currency.
pub const BASE_UNIT: &str = "lovelace";

#[derive(Debug, Deserialize)]
struct UnitAmount {
    unit: String,
    quantity: Value,
}

#[derive(Debug, Deserialize)]
struct ValueEntry {
    value: BTreeMap<String, Value>,
}

/// Parse a UTxO snapshot into fund units.
pub fn parse_fund_units(data: &[u8]) -> Result<Vec<FundUnit>, serde_json::Error> {
    match serde_json::from_slice::<BTreeMap<String, Vec<UnitAmount>>>(data) {
        Ok(units) => Ok(from_unit_lists(units)),
        Err(_) => {
            let entries: BTreeMap<String, ValueEntry> = serde_json::from_slice(data)?;
            Ok(from_value_maps(entries))
        }
    }
}

fn from_unit_lists(units: BTreeMap<String, Vec<UnitAmount>>) -> Vec<FundUnit> {
    units
        .into_iter()
        .map(|(locator, amounts)| {
            let mut value = 0u64;
            let mut foreign = false;
            for amount in amounts {
                if amount.unit == BASE_UNIT {
                    value = quantity(&amount.quantity).unwrap_or(0);
                } else {
                    foreign = true;
                }
            }
            FundUnit::new(locator, value, foreign)
        })
        .collect()
}

fn from_value_maps(entries: BTreeMap<String, ValueEntry>) -> Vec<FundUnit> {
    entries
        .into_iter()
        .map(|(locator, entry)| {
            let mut value = 0u64;
            let mut foreign = false;
            for (unit, amount) in entry.value {
                if unit == BASE_UNIT {
                    value = quantity(&amount).unwrap_or(0);
                } else if amount.as_object().is_some_and(|assets| !assets.is_empty()) {
                    foreign = true;
                }
            }
            FundUnit::new(locator, value, foreign)
        })
        .collect()
}

/// Quantities appear both as JSON numbers and as decimal strings.
fn quantity(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
