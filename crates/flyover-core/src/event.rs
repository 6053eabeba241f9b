//! Pull request event descriptor, read once per run from the CI event file.

use serde::Deserialize;
use std::path::Path;

use crate::error::{FlyoverError, Result};

/// What happened to the pull request. Actions we don't recognize fold into
/// `Other` and take the deploy path, same as `synchronize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Opened,
    Reopened,
    Synchronize,
    Closed,
    #[serde(other)]
    Other,
}

impl Action {
    pub fn is_closed(self) -> bool {
        matches!(self, Action::Closed)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    pub action: Action,
    #[serde(default)]
    pub number: Option<u64>,
}

impl Event {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    /// The PR number, or the fatal input error when the triggering event
    /// wasn't a pull request.
    pub fn pr_number(&self) -> Result<u64> {
        self.number.ok_or(FlyoverError::MissingPrNumber)
    }
}
