//! Model cost table.
//!
//! Every model invocation costs a fixed integer number of credits. The table
//! is loaded once and injected; an unknown model is a hard error rather than
//! a silently defaulted cost.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{LedgerError, Result};

/// Immutable mapping of model identifier to credit cost.
///
/// Every constructor, deserialization included, rejects negative costs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "HashMap<String, i64>", into = "HashMap<String, i64>")]
pub struct ModelCostTable {
    costs: HashMap<String, i64>,
}

const DEFAULT_COSTS: [(&str, i64); 10] = [
    ("gpt-4o-mini", 1),
    ("gpt-4.1-mini", 1),
    ("gpt-4o", 5),
    ("gpt-4.1", 5),
    ("claude-3-5-haiku", 2),
    ("claude-3-5-sonnet", 10),
    ("claude-3-7-sonnet", 10),
    ("gemini-2.0-flash", 1),
    ("gemini-1.5-pro", 5),
    ("deepseek-chat", 1),
];

impl Default for ModelCostTable {
    fn default() -> Self {
        Self {
            costs: DEFAULT_COSTS
                .iter()
                .map(|(model, cost)| ((*model).to_string(), *cost))
                .collect(),
        }
    }
}

impl TryFrom<HashMap<String, i64>> for ModelCostTable {
    type Error = LedgerError;

    fn try_from(costs: HashMap<String, i64>) -> Result<Self> {
        if let Some((model, cost)) = costs.iter().find(|(_, cost)| **cost < 0) {
            return Err(LedgerError::Configuration(format!(
                "negative cost {cost} for model {model}"
            )));
        }
        Ok(Self { costs })
    }
}

impl From<ModelCostTable> for HashMap<String, i64> {
    fn from(table: ModelCostTable) -> Self {
        table.costs
    }
}

impl ModelCostTable {
    /// Build a table from `(model, cost)` pairs.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Configuration` if a cost is negative.
    pub fn from_entries<K: Into<String>>(
        entries: impl IntoIterator<Item = (K, i64)>,
    ) -> Result<Self> {
        entries
            .into_iter()
            .map(|(model, cost)| (model.into(), cost))
            .collect::<HashMap<_, _>>()
            .try_into()
    }

    /// Parse a JSON object of `{"model": cost}`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Configuration` if the document is malformed or a
    /// cost is negative.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| LedgerError::Configuration(format!("invalid model cost table: {e}")))
    }

    /// Credit cost of one invocation of `model`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::UnknownModel` if the model is not in the table.
    pub fn cost_of(&self, model: &str) -> Result<i64> {
        self.costs
            .get(model)
            .copied()
            .ok_or_else(|| LedgerError::UnknownModel {
                model: model.to_string(),
            })
    }

    /// Number of priced models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.costs.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.costs.is_empty()
    }
}
