//! Outbox dispatch worker
//!
//! Drains the email outbox in batches. Batch size, inter-batch delay,
//! jitter, retry cap and rate cap all come from the settings table and
//! are re-read every cycle, so they can be tuned at runtime.
//!
//! Delivery goes to an HTTP mail gateway (`mail_gateway_url` setting).
//! An empty gateway URL is dev mode: rows are marked sent and logged.

use governor::{Quota, RateLimiter};
use rand::Rng;
use sqlx::SqlitePool;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use yiba_common::db::settings::{get_setting, get_setting_i64};
use yiba_common::events::{EventBus, YibaEvent};
use yiba_common::Result;

use crate::db::outbox;

/// Dispatch tunables, re-read from settings each cycle
#[derive(Debug, Clone, PartialEq)]
struct DispatchConfig {
    batch_size: i64,
    batch_delay_ms: i64,
    batch_jitter_ms: i64,
    max_attempts: i64,
    rate_per_minute: i64,
    poll_interval_ms: i64,
    gateway_url: String,
    from_address: String,
}

async fn load_config(pool: &SqlitePool) -> Result<DispatchConfig> {
    Ok(DispatchConfig {
        batch_size: get_setting_i64(pool, "campaign_batch_size", 25).await?,
        batch_delay_ms: get_setting_i64(pool, "campaign_batch_delay_ms", 2000).await?,
        batch_jitter_ms: get_setting_i64(pool, "campaign_batch_jitter_ms", 500).await?,
        max_attempts: get_setting_i64(pool, "campaign_max_attempts", 3).await?,
        rate_per_minute: get_setting_i64(pool, "campaign_rate_per_minute", 60).await?,
        poll_interval_ms: get_setting_i64(pool, "outbox_poll_interval_ms", 1000).await?,
        gateway_url: get_setting(pool, "mail_gateway_url").await?.unwrap_or_default(),
        from_address: get_setting(pool, "mail_from_address")
            .await?
            .unwrap_or_default(),
    })
}

/// Spawn the outbox dispatch worker
pub fn spawn_dispatch_worker(pool: SqlitePool, events: EventBus) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Outbox dispatch worker started");
        let client = reqwest::Client::new();

        let mut current_rate: i64 = 0;
        let mut limiter = None;

        loop {
            let config = match load_config(&pool).await {
                Ok(config) => config,
                Err(e) => {
                    error!("Failed to load dispatch config: {}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            // Rebuild the rate limiter only when the cap changes, so its
            // token state survives across batches
            if limiter.is_none() || current_rate != config.rate_per_minute {
                let per_minute = NonZeroU32::new(config.rate_per_minute.clamp(1, 6000) as u32)
                    .unwrap_or(NonZeroU32::new(60).unwrap());
                limiter = Some(RateLimiter::direct(Quota::per_minute(per_minute)));
                current_rate = config.rate_per_minute;
            }

            let batch = match outbox::next_batch(&pool, config.batch_size.max(1)).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!("Failed to read outbox batch: {}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            if batch.is_empty() {
                tokio::time::sleep(Duration::from_millis(
                    config.poll_interval_ms.clamp(100, 60_000) as u64,
                ))
                .await;
                continue;
            }

            debug!("Dispatching outbox batch of {}", batch.len());
            let mut touched_campaigns = Vec::new();

            for email in &batch {
                if let Some(limiter) = &limiter {
                    limiter.until_ready().await;
                }

                let outcome = deliver(&client, &config, &email.recipient, &email.subject, &email.body)
                    .await;

                let result = match outcome {
                    Ok(()) => outbox::mark_sent(&pool, email.id).await,
                    Err(e) => {
                        warn!("Delivery to {} failed: {}", email.recipient, e);
                        outbox::mark_attempt_failed(&pool, email.id, &e.to_string(), config.max_attempts)
                            .await
                    }
                };
                if let Err(e) = result {
                    error!("Failed to update outbox row {}: {}", email.id, e);
                }

                if let Some(campaign_id) = email.campaign_id {
                    if !touched_campaigns.contains(&campaign_id) {
                        touched_campaigns.push(campaign_id);
                    }
                }
            }

            for campaign_id in touched_campaigns {
                match outbox::refresh_campaign_progress(&pool, campaign_id).await {
                    Ok(campaign) => {
                        events.emit(YibaEvent::CampaignProgress {
                            campaign_id,
                            sent: campaign.sent,
                            total: campaign.total,
                            timestamp: chrono::Utc::now(),
                        });
                    }
                    Err(e) => error!("Failed to refresh campaign {}: {}", campaign_id, e),
                }
            }

            // Inter-batch delay with jitter spreads load on the gateway
            let jitter = if config.batch_jitter_ms > 0 {
                rand::thread_rng().gen_range(0..=config.batch_jitter_ms) as u64
            } else {
                0
            };
            tokio::time::sleep(Duration::from_millis(
                config.batch_delay_ms.max(0) as u64 + jitter,
            ))
            .await;
        }
    })
}

/// Deliver one email via the HTTP mail gateway
async fn deliver(
    client: &reqwest::Client,
    config: &DispatchConfig,
    recipient: &str,
    subject: &str,
    body: &str,
) -> anyhow::Result<()> {
    if config.gateway_url.is_empty() {
        // Dev mode: no gateway configured
        info!("Mail (dev mode) to={} subject={}", recipient, subject);
        return Ok(());
    }

    let response = client
        .post(&config.gateway_url)
        .json(&serde_json::json!({
            "from": config.from_address,
            "to": recipient,
            "subject": subject,
            "body": body,
        }))
        .send()
        .await?;

    if !response.status().is_success() {
        anyhow::bail!("Mail gateway returned {}", response.status());
    }
    Ok(())
}
