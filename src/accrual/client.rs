//! Gatekeeper for calls to the external scoring service.
//!
//! Every outbound request flows through [`AccrualClient`], which carries
//! the process-wide backpressure deadline: once any worker sees a 429,
//! every worker pauses until the deadline passes instead of stampeding the
//! service.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::{RwLock, watch};
use tokio::time::Instant;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("shutting down")]
    Cancelled,
    #[error("scoring request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub struct AccrualClient {
    base_url: String,
    http: reqwest::Client,
    /// Monotonic deadline before which no request leaves the process.
    rate_limit_until: RwLock<Option<Instant>>,
}

impl AccrualClient {
    pub fn new(base_url: &str) -> Self {
        let trimmed = base_url.trim_end_matches('/');
        let base_url = if trimmed.is_empty() { base_url } else { trimmed };
        Self {
            base_url: base_url.to_string(),
            http: reqwest::Client::new(),
            rate_limit_until: RwLock::new(None),
        }
    }

    /// Suspends until the shared rate-limit deadline has passed, returning
    /// immediately when none is set. Cancellable through `shutdown`.
    pub async fn wait_if_rate_limited(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ClientError> {
        loop {
            let until = *self.rate_limit_until.read().await;
            let Some(until) = until else {
                return Ok(());
            };
            if Instant::now() >= until {
                return Ok(());
            }

            tokio::select! {
                _ = tokio::time::sleep_until(until) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Err(ClientError::Cancelled);
                    }
                }
            }
        }
    }

    /// Issues `GET base_url + path` with a per-request timeout. The caller
    /// is responsible for consuming the response body.
    pub async fn get(
        &self,
        path: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<reqwest::Response, ClientError> {
        self.wait_if_rate_limited(shutdown).await?;

        let url = format!("{}{}", self.base_url, path);
        tokio::select! {
            response = self.http.get(&url).timeout(REQUEST_TIMEOUT).send() => Ok(response?),
            _ = shutdown.changed() => Err(ClientError::Cancelled),
        }
    }

    /// Publishes a new deadline. The deadline only ever extends; a late 429
    /// must not shorten a pause another worker already established.
    pub async fn set_rate_limit_until(&self, deadline: Instant) {
        let mut until = self.rate_limit_until.write().await;
        if until.is_none_or(|current| deadline > current) {
            *until = Some(deadline);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_trimmed() {
        let client = AccrualClient::new("http://localhost:8081/");
        assert_eq!(client.base_url, "http://localhost:8081");
    }

    #[tokio::test]
    async fn deadline_extends_monotonically() {
        let client = AccrualClient::new("http://localhost:8081");
        let near = Instant::now() + Duration::from_secs(1);
        let far = Instant::now() + Duration::from_secs(10);

        client.set_rate_limit_until(far).await;
        client.set_rate_limit_until(near).await;

        assert_eq!(*client.rate_limit_until.read().await, Some(far));
    }

    #[tokio::test]
    async fn wait_returns_immediately_without_deadline() {
        let client = AccrualClient::new("http://localhost:8081");
        let (_tx, mut rx) = watch::channel(false);

        tokio::time::timeout(Duration::from_millis(50), client.wait_if_rate_limited(&mut rx))
            .await
            .expect("wait should not block")
            .unwrap();
    }

    #[tokio::test]
    async fn wait_observes_cancellation() {
        let client = AccrualClient::new("http://localhost:8081");
        client
            .set_rate_limit_until(Instant::now() + Duration::from_secs(30))
            .await;

        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(true);
        });

        let res = tokio::time::timeout(
            Duration::from_secs(1),
            client.wait_if_rate_limited(&mut rx),
        )
        .await
        .expect("cancellation should unblock the wait");
        assert!(matches!(res, Err(ClientError::Cancelled)));
    }

    #[tokio::test]
    async fn wait_resumes_after_deadline() {
        let client = AccrualClient::new("http://localhost:8081");
        client
            .set_rate_limit_until(Instant::now() + Duration::from_millis(50))
            .await;

        let (_tx, mut rx) = watch::channel(false);
        let started = Instant::now();
        client.wait_if_rate_limited(&mut rx).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
