use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use ce_outbox::{CloudEvent, Relay, RelayContext, RelayError, RelayErrors};
use serde::Deserialize;

pub const CLOUDEVENTS_BATCH_CONTENT_TYPE: &str = "application/cloudevents-batch+json";

/// Body of a `207 Multi-Status` answer: the events the receiver rejected.
#[derive(Debug, Deserialize)]
struct PartialFailure {
    failed: Vec<String>,
}

/// Sink that POSTs each batch in CloudEvents batched JSON mode.
///
/// Any 2xx other than 207 acknowledges the whole batch. A 207 lists failed
/// event ids, which go back to the queue; everything else fails the batch.
pub struct HttpRelay {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpRelay {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout,
        }
    }

    async fn post(&self, events: &[CloudEvent]) -> Result<(), RelayError> {
        let resp = self
            .client
            .post(self.url.as_str())
            .header(reqwest::header::CONTENT_TYPE, CLOUDEVENTS_BATCH_CONTENT_TYPE)
            .timeout(self.timeout)
            .json(events)
            .send()
            .await
            .map_err(|error| RelayError::Failed(format!("post {}: {error}", self.url)))?;

        let status = resp.status();
        if status == reqwest::StatusCode::MULTI_STATUS {
            let body: PartialFailure = resp.json().await.map_err(|error| {
                RelayError::Failed(format!("decode partial failure body: {error}"))
            })?;
            let failed: HashSet<String> = body.failed.into_iter().collect();
            let mut errors = RelayErrors::new();
            for event in events.iter().filter(|event| failed.contains(&event.id)) {
                errors.push(event, "rejected by receiver");
            }
            if errors.is_empty() {
                return Ok(());
            }
            return Err(errors.into());
        }
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(RelayError::Failed(format!(
            "{} returned {status}: {}",
            self.url,
            body.chars().take(256).collect::<String>()
        )))
    }
}

#[async_trait]
impl Relay for HttpRelay {
    async fn relay(&self, context: &RelayContext, events: &[CloudEvent]) -> Result<(), RelayError> {
        tokio::select! {
            result = self.post(events) => result,
            () = context.cancelled() => Err(RelayError::Failed(
                "relay cancelled before the receiver answered".to_string(),
            )),
        }
    }
}
