use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Optional local settings file layered under the environment (§1.1).
///
/// Every field is optional: a terminal may run from environment variables
/// alone, with no settings file at all.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocalSettings {
    pub terminal_id: Option<String>,
    pub port: Option<u16>,
    pub peer_terminals: Option<Vec<String>>,
    pub cloud_base_url: Option<String>,
    pub cloud_service_key: Option<String>,
    pub sync_backoff_base_ms: Option<u64>,
    pub sync_max_retries: Option<u32>,
    pub reconcile_interval_secs: Option<u64>,
    pub reconcile_divergence_threshold: Option<i64>,
    pub max_message_bytes: Option<usize>,
    pub data_dir: Option<String>,
}

impl LocalSettings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading settings file {}", path.display()))?;
        let settings: LocalSettings = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing settings file {}", path.display()))?;
        Ok(settings)
    }
}
