//! Worker pool draining the processing queue against the scoring service.
//!
//! Workers coordinate only through the transactional queue: `claim_next`
//! hands each of them the least-recently-checked entry under a row lock,
//! so no channels are needed and a transiently failing order cannot
//! monopolise a worker. Every non-terminal outcome releases the claim with
//! a fresh `last_check`, which keeps the rotation going.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::client::{AccrualClient, ClientError};
use crate::store::{OrderStatus, OrderStore, QueueStatus, StoreError};

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Body of a 200 reply from `GET /api/orders/<number>`.
#[derive(Debug, Deserialize)]
struct AccrualReply {
    #[serde(default)]
    status: String,
    accrual: Option<Decimal>,
}

#[derive(Debug, Error)]
enum ProcessError {
    #[error("shutting down")]
    Cancelled,
    #[error(transparent)]
    Transport(reqwest::Error),
    #[error("decode scoring reply: {0}")]
    Decode(reqwest::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct WorkerPool {
    store: Arc<dyn OrderStore>,
    client: Arc<AccrualClient>,
    workers: usize,
    interval: Duration,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn OrderStore>,
        client: Arc<AccrualClient>,
        workers: usize,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            client,
            workers,
            interval,
            handles: Vec::new(),
        }
    }

    /// Spawns the workers. Each drains the queue until `shutdown` flips.
    pub fn start(&mut self, shutdown: watch::Receiver<bool>) {
        for id in 0..self.workers {
            let store = Arc::clone(&self.store);
            let client = Arc::clone(&self.client);
            let interval = self.interval;
            let shutdown = shutdown.clone();
            self.handles.push(tokio::spawn(run_worker(
                id, store, client, interval, shutdown,
            )));
        }
        info!(
            workers = self.workers,
            interval_ms = self.interval.as_millis() as u64,
            "accrual workers started"
        );
    }

    /// Resolves once every worker has exited.
    pub async fn wait(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn run_worker(
    id: usize,
    store: Arc<dyn OrderStore>,
    client: Arc<AccrualClient>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        if client.wait_if_rate_limited(&mut shutdown).await.is_err() {
            break;
        }

        match store.claim_next().await {
            Ok(number) => {
                match process_number(store.as_ref(), &client, &number, &mut shutdown).await {
                    Ok(()) => {}
                    Err(ProcessError::Cancelled) => break,
                    Err(err) => warn!(worker = id, number = %number, error = %err, "process order"),
                }
            }
            Err(StoreError::NoQueueItems) => {}
            Err(err) => warn!(worker = id, error = %err, "claim queue entry"),
        }

        if !sleep_interval(interval, &mut shutdown).await {
            break;
        }
    }
    info!(worker = id, "accrual worker stopped");
}

/// Sleeps for `interval`, returning `false` when shutdown fired instead.
async fn sleep_interval(interval: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if interval.is_zero() {
        return !*shutdown.borrow();
    }
    tokio::select! {
        _ = tokio::time::sleep(interval) => true,
        _ = shutdown.changed() => false,
    }
}

async fn process_number(
    store: &dyn OrderStore,
    client: &AccrualClient,
    number: &str,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), ProcessError> {
    let path = format!("/api/orders/{number}");

    let response = match client.get(&path, shutdown).await {
        Ok(response) => response,
        Err(ClientError::Cancelled) => return Err(ProcessError::Cancelled),
        Err(ClientError::Http(err)) => {
            release_claim(store, number).await;
            return Err(ProcessError::Transport(err));
        }
    };

    match response.status() {
        StatusCode::OK => {
            let reply: AccrualReply = match response.json().await {
                Ok(reply) => reply,
                Err(err) => {
                    release_claim(store, number).await;
                    return Err(ProcessError::Decode(err));
                }
            };
            apply_reply(store, number, reply).await
        }
        StatusCode::NO_CONTENT => {
            // Order not yet known to the scoring service.
            store
                .update_queue_status(number, QueueStatus::Processing, Utc::now())
                .await?;
            Ok(())
        }
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = parse_retry_after(response.headers().get(reqwest::header::RETRY_AFTER));
            client
                .set_rate_limit_until(Instant::now() + retry_after)
                .await;
            store
                .update_queue_status(number, QueueStatus::Processing, Utc::now())
                .await?;
            Ok(())
        }
        StatusCode::INTERNAL_SERVER_ERROR => {
            warn!(number = %number, "scoring service returned 500");
            store
                .update_queue_status(number, QueueStatus::Processing, Utc::now())
                .await?;
            Ok(())
        }
        status => {
            warn!(number = %number, status = %status, "unexpected scoring response status");
            store
                .update_queue_status(number, QueueStatus::Processing, Utc::now())
                .await?;
            Ok(())
        }
    }
}

async fn apply_reply(
    store: &dyn OrderStore,
    number: &str,
    reply: AccrualReply,
) -> Result<(), ProcessError> {
    let mut status = reply.status.trim().to_uppercase();
    if status.is_empty() {
        status = OrderStatus::Processing.as_str().to_string();
    }

    match OrderStatus::parse(&status) {
        OrderStatus::Processed => match reply.accrual {
            Some(accrual) => {
                // Idempotent: the applied flag and the order row lock make
                // repeated PROCESSED replies credit at most once.
                store.apply_accrual(number, accrual).await?;
            }
            None => {
                // The protocol allows PROCESSED with no accrual; the order
                // completes without a credit.
                warn!(number = %number, "accrual missing on PROCESSED reply");
                store
                    .update_order_status(number, &OrderStatus::Processed, None)
                    .await?;
                store.delete_queue(number).await?;
            }
        },
        OrderStatus::Invalid => {
            store
                .update_order_status(number, &OrderStatus::Invalid, None)
                .await?;
            store.delete_queue(number).await?;
        }
        interim => {
            store
                .update_order_status(number, &interim, reply.accrual)
                .await?;
            store
                .update_queue_status(number, QueueStatus::Processing, Utc::now())
                .await?;
        }
    }
    Ok(())
}

/// Releases a claimed entry so rotation picks it up again later. Failures
/// are logged and swallowed; the primary error wins.
async fn release_claim(store: &dyn OrderStore, number: &str) {
    if let Err(err) = store
        .update_queue_status(number, QueueStatus::Processing, Utc::now())
        .await
    {
        error!(number = %number, error = %err, "release queue claim");
    }
}

fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Duration {
    let Some(raw) = value.and_then(|v| v.to_str().ok()) else {
        return DEFAULT_RETRY_AFTER;
    };
    match raw.trim().parse::<i64>() {
        Ok(seconds) if seconds > 0 => Duration::from_secs(seconds as u64),
        _ => DEFAULT_RETRY_AFTER,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn retry_after_parses_whole_seconds() {
        let value = HeaderValue::from_static("2");
        assert_eq!(
            parse_retry_after(Some(&value)),
            Duration::from_secs(2)
        );
        let value = HeaderValue::from_static(" 30 ");
        assert_eq!(
            parse_retry_after(Some(&value)),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn retry_after_defaults_to_a_minute() {
        assert_eq!(parse_retry_after(None), DEFAULT_RETRY_AFTER);
        for raw in ["", "abc", "-5", "0", "1.5"] {
            let value = HeaderValue::from_str(raw).unwrap();
            assert_eq!(parse_retry_after(Some(&value)), DEFAULT_RETRY_AFTER, "{raw:?}");
        }
    }

    #[test]
    fn reply_decodes_with_optional_fields() {
        let reply: AccrualReply =
            serde_json::from_str(r#"{"order":"18","status":"PROCESSED","accrual":42.5}"#).unwrap();
        assert_eq!(reply.status, "PROCESSED");
        assert_eq!(reply.accrual, Some(Decimal::new(425, 1)));

        let reply: AccrualReply = serde_json::from_str(r#"{"order":"18"}"#).unwrap();
        assert!(reply.status.is_empty());
        assert!(reply.accrual.is_none());
    }
}
