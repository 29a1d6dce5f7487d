//! Terminal configuration loading (§6, §1.1 ambient stack).
//!
//! Required identity (`TERMINAL_ID`, `TERMINAL_PORT`) comes from the
//! environment only — startup refuses to proceed without it (§4.7). Tunables
//! that are convenient to template across a fleet of terminals (peer list,
//! backoff base, reconciliation interval/threshold) may additionally be
//! supplied by a local YAML settings file; environment variables, when
//! present, always win over the file.

mod settings;

pub use settings::LocalSettings;

use anyhow::{bail, Context, Result};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalConfig {
    pub terminal_id: String,
    pub port: u16,
    pub peer_terminals: Vec<String>,
    pub cloud_base_url: Option<String>,
    pub cloud_service_key: Option<String>,
    pub sync_backoff_base_ms: u64,
    pub sync_max_retries: u32,
    pub reconcile_interval_secs: u64,
    pub reconcile_divergence_threshold: i64,
    pub max_message_bytes: usize,
    pub data_dir: PathBuf,
}

const UNSET: &str = "UNSET";

impl TerminalConfig {
    /// Load from the process environment, optionally layered over a local
    /// YAML settings file named by `POS_SETTINGS_FILE`.
    ///
    /// Fails fast (refuses to start) if `TERMINAL_ID` is empty or `TERMINAL_PORT`
    /// is outside `[1024, 65535]` (§4.7). Cloud credentials are the one pair of
    /// "required" variables from §6 that are allowed to be absent: missing or
    /// literal `UNSET` puts the cloud uplink in degraded/dormant mode instead
    /// of refusing to start.
    pub fn load_from_env() -> Result<Self> {
        let settings = match std::env::var("POS_SETTINGS_FILE") {
            Ok(path) if !path.is_empty() => {
                Some(LocalSettings::load(&path).with_context(|| format!("loading {path}"))?)
            }
            _ => None,
        };
        Self::build(settings, |k| std::env::var(k).ok())
    }

    /// Core assembly logic, parameterized over an environment lookup so tests
    /// can exercise it without mutating real process environment variables.
    fn build(settings: Option<LocalSettings>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let settings = settings.unwrap_or_default();

        let terminal_id = env("TERMINAL_ID")
            .or(settings.terminal_id)
            .context("TERMINAL_ID is required")?;
        if terminal_id.trim().is_empty() {
            bail!("TERMINAL_ID must not be empty");
        }

        let port_str = env("TERMINAL_PORT")
            .or_else(|| settings.port.map(|p| p.to_string()))
            .context("TERMINAL_PORT is required")?;
        let port: u16 = port_str
            .parse()
            .with_context(|| format!("TERMINAL_PORT {port_str:?} is not a valid integer"))?;
        if !(1024..=65535).contains(&port) {
            bail!("TERMINAL_PORT {port} must be in [1024, 65535]");
        }

        let peer_terminals = match env("PEER_TERMINALS") {
            Some(s) => split_peer_list(&s),
            None => settings.peer_terminals.unwrap_or_default(),
        };

        let cloud_base_url = normalize_optional(env("CLOUD_BASE_URL").or(settings.cloud_base_url));
        let cloud_service_key =
            normalize_optional(env("CLOUD_SERVICE_KEY").or(settings.cloud_service_key));

        let sync_backoff_base_ms = parse_or_default(
            env("SYNC_BACKOFF_BASE_MS").or_else(|| settings.sync_backoff_base_ms.map(|v| v.to_string())),
            2000,
        )?;
        let sync_max_retries = parse_or_default(
            env("SYNC_MAX_RETRIES").or_else(|| settings.sync_max_retries.map(|v| v.to_string())),
            10,
        )?;
        let reconcile_interval_secs = parse_or_default(
            env("RECONCILE_INTERVAL_SECS")
                .or_else(|| settings.reconcile_interval_secs.map(|v| v.to_string())),
            600,
        )?;
        let reconcile_divergence_threshold = parse_or_default(
            env("RECONCILE_DIVERGENCE_THRESHOLD")
                .or_else(|| settings.reconcile_divergence_threshold.map(|v| v.to_string())),
            10,
        )?;
        let max_message_bytes = parse_or_default(
            env("MAX_MESSAGE_BYTES").or_else(|| settings.max_message_bytes.map(|v| v.to_string())),
            1_048_576,
        )?;

        let data_dir = match env("POS_DATA_DIR").or(settings.data_dir) {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir(&terminal_id)?,
        };

        Ok(TerminalConfig {
            terminal_id,
            port,
            peer_terminals,
            cloud_base_url,
            cloud_service_key,
            sync_backoff_base_ms,
            sync_max_retries,
            reconcile_interval_secs,
            reconcile_divergence_threshold,
            max_message_bytes,
            data_dir,
        })
    }

    /// `true` if the cloud uplink should stay dormant (§4.5 degraded mode,
    /// §6: unset or literal `UNSET` in either credential).
    pub fn cloud_disabled(&self) -> bool {
        self.cloud_base_url.is_none() || self.cloud_service_key.is_none()
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.sqlite3", self.terminal_id))
    }
}

fn normalize_optional(v: Option<String>) -> Option<String> {
    match v {
        None => None,
        Some(s) if s.is_empty() || s == UNSET => None,
        Some(s) => Some(s),
    }
}

fn split_peer_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_or_default<T: std::str::FromStr>(v: Option<String>, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match v {
        None => Ok(default),
        Some(s) => s
            .parse()
            .map_err(|e| anyhow::anyhow!("failed to parse {s:?}: {e}")),
    }
}

fn default_data_dir(terminal_id: &str) -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("com", "storepos", "terminal")
        .context("could not resolve platform user-data directory")?;
    let mut dir = dirs.data_dir().to_path_buf();
    dir.push(terminal_id);
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn refuses_to_start_without_terminal_id() {
        let env = env_map(&[("TERMINAL_PORT", "9100")]);
        let err = TerminalConfig::build(None, |k| env.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains("TERMINAL_ID"));
    }

    #[test]
    fn refuses_to_start_with_privileged_port() {
        let env = env_map(&[("TERMINAL_ID", "L1"), ("TERMINAL_PORT", "80")]);
        let err = TerminalConfig::build(None, |k| env.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains("1024"));
    }

    #[test]
    fn empty_peer_list_is_legal() {
        let env = env_map(&[("TERMINAL_ID", "L1"), ("TERMINAL_PORT", "9100")]);
        let cfg = TerminalConfig::build(None, |k| env.get(k).cloned()).unwrap();
        assert!(cfg.peer_terminals.is_empty());
    }

    #[test]
    fn unset_cloud_credential_disables_uplink() {
        let env = env_map(&[
            ("TERMINAL_ID", "L1"),
            ("TERMINAL_PORT", "9100"),
            ("CLOUD_BASE_URL", "UNSET"),
            ("CLOUD_SERVICE_KEY", "UNSET"),
        ]);
        let cfg = TerminalConfig::build(None, |k| env.get(k).cloned()).unwrap();
        assert!(cfg.cloud_disabled());
    }

    #[test]
    fn env_overrides_local_settings_file() {
        let settings = LocalSettings {
            terminal_id: Some("FROM_FILE".into()),
            sync_backoff_base_ms: Some(5000),
            ..Default::default()
        };
        let env = env_map(&[("TERMINAL_ID", "FROM_ENV"), ("TERMINAL_PORT", "9100")]);
        let cfg = TerminalConfig::build(Some(settings), |k| env.get(k).cloned()).unwrap();
        assert_eq!(cfg.terminal_id, "FROM_ENV");
        assert_eq!(cfg.sync_backoff_base_ms, 5000);
    }
}
