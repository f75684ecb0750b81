//! Deployment-time booth configuration.
//!
//! A [`BoothConfig`] picks the tree depth and which of the two booth shapes
//! is deployed: a two-sided booth that routes votes into separate support and
//! oppose accumulators, or a single-sided box that is its own accumulator.
//! The vote sink for withdrawals is either an external collection address or
//! the booth's own reserve.
//!
//! Configs load from JSON and can be overridden with `QV_DEPTH`,
//! `QV_TWO_SIDED` and `QV_SINK_EXTERNAL`.

use crate::error::{BallotError, Result};
use crate::smt::check_depth;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default tree depth (512 motions per card).
pub const DEFAULT_DEPTH: u8 = 9;

/// Shape of a booth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoothConfig {
    /// Sparse ledger depth; motion ids must be below `2^depth`.
    pub depth: u8,
    /// `true`: support and oppose accumulators; `false`: one side, the booth itself.
    pub two_sided: bool,
    /// `true`: withdrawn votes go to the collection address; `false`: back to the reserve.
    pub sink_is_external: bool,
}

impl Default for BoothConfig {
    fn default() -> Self {
        Self {
            depth: DEFAULT_DEPTH,
            two_sided: true,
            sink_is_external: false,
        }
    }
}

impl BoothConfig {
    /// Single-sided box draining withdrawn votes to an external collection address.
    pub fn ballot_box(depth: u8) -> Self {
        Self {
            depth,
            two_sided: false,
            sink_is_external: true,
        }
    }

    /// Two-sided booth returning withdrawn votes to its reserve.
    pub fn voting_booth(depth: u8) -> Self {
        Self {
            depth,
            two_sided: true,
            sink_is_external: false,
        }
    }

    /// Loads a config from JSON; a missing file yields the default.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = std::fs::read(path)
            .map_err(|err| BallotError::Io(format!("failed to read {}: {err}", path.display())))?;
        let config: Self = serde_json::from_slice(&bytes)
            .map_err(|err| BallotError::Decode(format!("invalid config {}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `QV_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Config from `path` (or the default when none is given) with `QV_*`
    /// overrides applied on top.  Unlike [`BoothConfig::load`], a named file
    /// that does not exist is an error.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        Self::resolve_with(path, |key| std::env::var(key).ok())
    }

    fn resolve_with<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = match path {
            Some(path) if !path.exists() => {
                return Err(BallotError::Io(format!("config {} not found", path.display())))
            }
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.with_overrides(lookup)
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(depth) = lookup("QV_DEPTH").filter(|v| !v.trim().is_empty()) {
            self.depth = depth
                .trim()
                .parse()
                .map_err(|_| BallotError::Decode(format!("QV_DEPTH={depth} is not a depth")))?;
        }
        if let Some(flag) = lookup("QV_TWO_SIDED") {
            self.two_sided = parse_flag("QV_TWO_SIDED", &flag)?;
        }
        if let Some(flag) = lookup("QV_SINK_EXTERNAL") {
            self.sink_is_external = parse_flag("QV_SINK_EXTERNAL", &flag)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Rejects depths the ledger cannot represent.
    pub fn validate(&self) -> Result<()> {
        check_depth(self.depth)
    }

    /// Compact encoding bound into the booth template.
    pub(crate) fn layout_bytes(&self) -> [u8; 3] {
        [
            self.depth,
            u8::from(self.two_sided),
            u8::from(self.sink_is_external),
        ]
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(BallotError::Decode(format!("{key}={other} is not a flag"))),
    }
}
