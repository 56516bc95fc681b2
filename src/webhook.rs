use std::time::Duration;

use log::{debug, info, warn};
use serde_derive::Serialize;

use crate::config::Endpoint;
use crate::error::TransportError;
use crate::messages::{DeliveryOutcome, PresenceEdge, SessionStatus};

/// Outbound HTTP. Returns the response status code.
pub trait Transport {
    async fn post_json(
        &self,
        endpoint: &Endpoint,
        body: String,
        timeout: Duration,
    ) -> Result<u16, TransportError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tagwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(HttpTransport { client })
    }
}

impl Transport for HttpTransport {
    async fn post_json(
        &self,
        endpoint: &Endpoint,
        body: String,
        timeout: Duration,
    ) -> Result<u16, TransportError> {
        let response = self
            .client
            .post(endpoint.url().clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .body(body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Http(err)
                }
            })?;
        Ok(response.status().as_u16())
    }
}

#[derive(Debug, Serialize)]
struct WebhookMessage {
    rfid_poll_result: PollResult,
}

#[derive(Debug, Serialize)]
struct PollResult {
    timestamp: String,
    event_type: &'static str,
    tag_present: bool,
    tag_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    wifi_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_status: Option<&'static str>,
}

impl PollResult {
    fn new(edge: &PresenceEdge, status: &SessionStatus) -> Self {
        let tag_present = edge.kind.tag_present();
        let tag_id = edge
            .token
            .as_ref()
            .map(|token| token.to_string())
            .unwrap_or_default();
        let tag_type = edge.token.as_ref().map(|token| token.kind().label());

        PollResult {
            timestamp: status.timestamp.clone(),
            event_type: edge.kind.event_type(),
            tag_present,
            tag_id,
            tag_type: tag_type.filter(|_| tag_present),
            wifi_status: tag_present.then(|| status.wifi_status()),
            time_status: tag_present.then(|| status.time_status()),
        }
    }
}

pub fn payload(edge: &PresenceEdge, status: &SessionStatus) -> Result<String, serde_json::Error> {
    serde_json::to_string(&WebhookMessage {
        rfid_poll_result: PollResult::new(edge, status),
    })
}

/// Sends one notification per edge. Nothing is retried or queued.
pub struct NotificationDispatcher<T> {
    transport: T,
    endpoint: Endpoint,
    timeout: Duration,
}

impl<T: Transport> NotificationDispatcher<T> {
    pub fn new(transport: T, endpoint: Endpoint, timeout: Duration) -> Self {
        NotificationDispatcher {
            transport,
            endpoint,
            timeout,
        }
    }

    /// The caller must only dispatch while the network is connected.
    pub async fn dispatch(&self, edge: &PresenceEdge, status: &SessionStatus) -> DeliveryOutcome {
        let body = match payload(edge, status) {
            Ok(body) => body,
            Err(err) => {
                warn!("Could not encode webhook payload: {}", err);
                return DeliveryOutcome::Unreachable;
            }
        };
        debug!(
            "POST {} {} (edge observed {:?} ago)",
            self.endpoint.url(),
            body,
            edge.observed_at.elapsed()
        );

        let outcome = match self
            .transport
            .post_json(&self.endpoint, body, self.timeout)
            .await
        {
            Ok(code) => DeliveryOutcome::from_status(code),
            Err(err) => {
                warn!("Webhook to {} failed: {}", self.endpoint.host(), err);
                DeliveryOutcome::Unreachable
            }
        };

        match outcome {
            DeliveryOutcome::Delivered => info!("Webhook delivered ({:?})", edge.kind),
            DeliveryOutcome::Rejected(code) => {
                warn!("Webhook rejected with status {}, dropping", code)
            }
            DeliveryOutcome::Unreachable => warn!("Webhook unreachable, dropping"),
        }
        outcome
    }
}
