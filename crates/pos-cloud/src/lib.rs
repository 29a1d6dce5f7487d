//! C5 CloudUplink (§4.4): drains `peer_ack` outbox rows to the cloud ingest
//! endpoint and marks them `cloud_ack`.
//!
//! **Gating rule (invariant):** this module only ever reads rows at status
//! `peer_ack`. A row at `pending` is never sent to the cloud — peer sync is
//! upstream of cloud sync, not the other way around.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use pos_db::{AckStage, OutboxRow};
use rand::Rng;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

const DRAIN_INTERVAL: Duration = Duration::from_secs(5);
const DRAIN_BATCH_LIMIT: i64 = 100;
const MAX_CONCURRENT_POSTS: usize = 5;
const MAX_BACKOFF_MS: u64 = 60_000;

#[derive(Debug, Clone)]
pub struct CloudUplinkConfig {
    pub base_url: String,
    pub service_key: String,
    pub terminal_id: String,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

#[derive(Serialize)]
struct IngestBody<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    payload: &'a serde_json::Value,
    timestamp: DateTime<Utc>,
}

pub struct CloudUplink {
    http: reqwest::Client,
    config: Option<CloudUplinkConfig>,
    /// Next moment each outbox row is eligible for another POST attempt,
    /// keyed by outbox id (mirrors `pending_acks` in `pos-peer`'s client).
    retry_deadlines: Mutex<HashMap<String, Instant>>,
}

impl CloudUplink {
    /// `config = None` puts the uplink in dormant/degraded mode (§6:
    /// missing or `UNSET` cloud credentials) — `run` then idles forever
    /// without issuing any HTTP calls.
    pub fn new(config: Option<CloudUplinkConfig>) -> Self {
        CloudUplink {
            http: reqwest::Client::new(),
            config,
            retry_deadlines: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_dormant(&self) -> bool {
        self.config.is_none()
    }

    /// Runs the drain loop until `shutdown` fires.
    pub async fn run(&self, pool: &SqlitePool, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let Some(config) = &self.config else {
            info!("cloud uplink is dormant (no cloud credentials configured)");
            let _ = shutdown.changed().await;
            return;
        };

        let mut tick = tokio::time::interval(DRAIN_INTERVAL);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.drain_once(pool, config).await {
                        warn!(error = %e, "cloud drain tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Runs one drain pass: posts every due `peer_ack` row once. Exposed so
    /// scenario tests can step the retry/backoff state machine deterministically
    /// instead of racing a real timer.
    pub async fn drain_once(&self, pool: &SqlitePool, config: &CloudUplinkConfig) -> Result<()> {
        let rows = pos_bus::get_pending(pool, "peer_ack", DRAIN_BATCH_LIMIT).await?;

        let now = Instant::now();
        let due: Vec<OutboxRow> = {
            let deadlines = self.retry_deadlines.lock().await;
            rows.into_iter()
                .filter(|row| deadlines.get(&row.id).map_or(true, |deadline| *deadline <= now))
                .collect()
        };

        stream::iter(due)
            .for_each_concurrent(MAX_CONCURRENT_POSTS, |row| async move {
                if let Err(e) = self.post_one(pool, config, &row).await {
                    warn!(outbox_id = %row.id, error = %e, "cloud post failed");
                }
            })
            .await;

        Ok(())
    }

    async fn post_one(
        &self,
        pool: &SqlitePool,
        config: &CloudUplinkConfig,
        row: &OutboxRow,
    ) -> Result<()> {
        let Ok(topic) = pos_schemas::Topic::parse(&row.topic) else {
            warn!(outbox_id = %row.id, topic = %row.topic, "unrecognized topic, dead-lettering without posting");
            pos_bus::mark_error(pool, &row.id).await?;
            self.retry_deadlines.lock().await.remove(&row.id);
            return Ok(());
        };
        let slug = topic.cloud_slug();
        let url = format!(
            "{}/functions/v1/ingest/{}",
            config.base_url.trim_end_matches('/'),
            slug
        );

        let body = IngestBody {
            id: &row.id,
            kind: &row.topic,
            payload: &row.payload,
            timestamp: row.created_at,
        };

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&config.service_key)
            .header("x-terminal-id", &config.terminal_id)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?;

        if resp.status().is_success() {
            pos_bus::mark_sent(pool, &row.id, AckStage::Cloud).await?;
            self.retry_deadlines.lock().await.remove(&row.id);
            info!(outbox_id = %row.id, topic = %row.topic, "cloud ack");
            return Ok(());
        }

        let status = resp.status();
        warn!(outbox_id = %row.id, %status, "cloud ingest rejected row");
        let retries = pos_bus::increment_retries(pool, &row.id).await?;
        if retries as u32 >= config.max_retries {
            pos_bus::mark_error(pool, &row.id).await?;
            self.retry_deadlines.lock().await.remove(&row.id);
        } else {
            let deadline = Instant::now() + backoff_delay(config.backoff_base_ms, retries as u32);
            self.retry_deadlines.lock().await.insert(row.id.clone(), deadline);
        }
        Ok(())
    }
}

/// Same shape as `pos-peer`'s connection backoff: doubles per attempt off
/// `base_ms`, capped at `MAX_BACKOFF_MS`, with a little jitter so a burst of
/// rows rejected in the same tick doesn't retry in lockstep.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let capped_attempt = attempt.min(10);
    let exp = base_ms.saturating_mul(1u64 << capped_attempt);
    let capped = exp.min(MAX_BACKOFF_MS);
    let jitter_bound = (capped / 5).max(1);
    let jitter = rand::thread_rng().gen_range(0..=jitter_bound);
    Duration::from_millis(capped.saturating_add(jitter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dormant_uplink_has_no_config() {
        let uplink = CloudUplink::new(None);
        assert!(uplink.is_dormant());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let small = backoff_delay(100, 0);
        let large = backoff_delay(100, 20);
        assert!(small.as_millis() < large.as_millis());
        assert!(large.as_millis() as u64 <= MAX_BACKOFF_MS + MAX_BACKOFF_MS / 5);
    }
}
