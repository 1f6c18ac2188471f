use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::id::Id;
use crate::store::DEFAULT_HISTORY_MS;

/// Settings of one world model instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldModelConfig {
    /// Fixed root id. Random when unset.
    pub root_id: Option<Id>,
    /// Seed for deterministic id generation.
    pub id_seed: Option<u64>,
    /// Also notify observers about rejected mutations.
    pub notify_rejected: bool,
    pub history_ms: f64,
    pub backup_path: Option<PathBuf>,
    /// Attribute namespace stripped from replicated updates.
    pub filter_namespace: Option<String>,
}

impl Default for WorldModelConfig {
    fn default() -> Self {
        Self {
            root_id: None,
            id_seed: None,
            notify_rejected: false,
            history_ms: DEFAULT_HISTORY_MS,
            backup_path: None,
            filter_namespace: None,
        }
    }
}

impl WorldModelConfig {
    /// Reads `SCENEGRAPH_*` variables on top of the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = lookup("SCENEGRAPH_ROOT_ID") {
            config.root_id = Some(
                raw.parse()
                    .with_context(|| format!("SCENEGRAPH_ROOT_ID is not a valid id: {raw}"))?,
            );
        }
        if let Some(raw) = lookup("SCENEGRAPH_ID_SEED") {
            config.id_seed = Some(
                raw.trim()
                    .parse()
                    .with_context(|| format!("SCENEGRAPH_ID_SEED is not an integer: {raw}"))?,
            );
        }
        if let Some(raw) = lookup("SCENEGRAPH_NOTIFY_REJECTED") {
            config.notify_rejected = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => anyhow::bail!("SCENEGRAPH_NOTIFY_REJECTED must be a boolean, got {raw}"),
            };
        }
        if let Some(raw) = lookup("SCENEGRAPH_HISTORY_MS") {
            let history: f64 = raw
                .trim()
                .parse()
                .with_context(|| format!("SCENEGRAPH_HISTORY_MS is not a number: {raw}"))?;
            if !history.is_finite() || history < 0.0 {
                anyhow::bail!("SCENEGRAPH_HISTORY_MS must be a non-negative number, got {raw}");
            }
            config.history_ms = history;
        }
        if let Some(raw) = lookup("SCENEGRAPH_BACKUP_PATH") {
            config.backup_path = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("SCENEGRAPH_FILTER_NAMESPACE") {
            let namespace = raw.trim().trim_end_matches(':').to_string();
            if !namespace.is_empty() {
                config.filter_namespace = Some(namespace);
            }
        }
        // Logged updates reference the root id, so a replay into a fresh
        // random root would reject them all.
        if config.backup_path.is_some() && config.root_id.is_none() {
            anyhow::bail!("SCENEGRAPH_BACKUP_PATH requires SCENEGRAPH_ROOT_ID to be set");
        }
        Ok(config)
    }
}
