//! Notification dispatcher: email (SMTP), generic webhook, and Slack.
//!
//! Deliveries are independent per channel; one failure never blocks the
//! others. Transient transport failures retry up to 3 times with 2/4/8 s
//! backoff; permanent failures (HTTP 4xx, authentication) fail
//! immediately. Delivery failure never rolls back the alert history row
//! or the cooldown — the alert is recorded as triggered regardless.

mod email;
mod webhook;

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use firewatch_config::{ChannelKind, NotificationChannelConfig};

/// Canonical JSON envelope posted to webhooks and rendered for the other
/// channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertNotification {
    pub device_id: Uuid,
    pub device_name: String,
    pub metric_type: String,
    pub severity: String,
    pub threshold_value: f64,
    pub actual_value: f64,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
}

impl AlertNotification {
    /// Subject line used by email and Slack.
    pub fn subject(&self) -> String {
        format!(
            "[{}] {} alert on {}",
            self.severity.to_uppercase(),
            self.metric_type,
            self.device_name
        )
    }
}

/// Delivery outcome for one channel.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub channel_id: i64,
    pub channel_name: String,
    pub result: Result<(), String>,
}

/// Internal error classification driving the retry decision.
#[derive(Debug)]
pub(crate) enum NotifyError {
    /// Timeout / connection failure — worth retrying.
    Transient(String),
    /// 4xx, authentication, configuration — retrying cannot help.
    Permanent(String),
}

impl NotifyError {
    fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Permanent(m) => m,
        }
    }
}

const MAX_RETRIES: u32 = 3;
const INITIAL_DELAY: Duration = Duration::from_secs(2);

/// Retry transient failures with exponential backoff.
async fn with_retries<F, Fut>(what: &str, operation: F) -> Result<(), NotifyError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<(), NotifyError>>,
{
    let mut delay = INITIAL_DELAY;
    for attempt in 0..=MAX_RETRIES {
        if attempt > 0 {
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
        match operation().await {
            Ok(()) => return Ok(()),
            Err(NotifyError::Transient(m)) if attempt < MAX_RETRIES => {
                warn!(channel = what, attempt, error = %m, "transient delivery failure, will retry");
            }
            Err(e) => return Err(e),
        }
    }
    unreachable!("retry loop always returns")
}

/// Dispatches formatted alerts to configured channels.
pub struct Dispatcher {
    channels: Vec<NotificationChannelConfig>,
    http: reqwest::Client,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("channels", &self.channels.len())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(channels: Vec<NotificationChannelConfig>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { channels, http }
    }

    fn channel(&self, id: i64) -> Option<&NotificationChannelConfig> {
        self.channels.iter().find(|c| c.id == id)
    }

    /// Deliver the notification to each listed channel. Channels run
    /// concurrently; the result carries one entry per requested id.
    pub async fn send(&self, notification: &AlertNotification, channel_ids: &[i64]) -> Vec<Delivery> {
        let deliveries = channel_ids.iter().map(|id| async move {
            match self.channel(*id) {
                Some(channel) if channel.enabled => {
                    let result = self
                        .deliver(channel, notification)
                        .await
                        .map_err(|e| e.message().to_owned());
                    if let Err(ref reason) = result {
                        warn!(channel = %channel.name, error = %reason, "notification delivery failed");
                    } else {
                        debug!(channel = %channel.name, "notification delivered");
                    }
                    Delivery {
                        channel_id: *id,
                        channel_name: channel.name.clone(),
                        result,
                    }
                }
                Some(channel) => Delivery {
                    channel_id: *id,
                    channel_name: channel.name.clone(),
                    result: Err("channel disabled".into()),
                },
                None => Delivery {
                    channel_id: *id,
                    channel_name: String::new(),
                    result: Err(format!("unknown channel id {id}")),
                },
            }
        });

        join_all(deliveries).await
    }

    /// Send a test message through one channel.
    pub async fn test(&self, channel_id: i64) -> Delivery {
        let notification = AlertNotification {
            device_id: Uuid::nil(),
            device_name: "test-device".into(),
            metric_type: "test".into(),
            severity: "info".into(),
            threshold_value: 0.0,
            actual_value: 0.0,
            message: "Test notification from firewatch".into(),
            triggered_at: Utc::now(),
        };
        self.send(&notification, &[channel_id])
            .await
            .into_iter()
            .next()
            .unwrap_or(Delivery {
                channel_id,
                channel_name: String::new(),
                result: Err("no delivery attempted".into()),
            })
    }

    async fn deliver(
        &self,
        channel: &NotificationChannelConfig,
        notification: &AlertNotification,
    ) -> Result<(), NotifyError> {
        match &channel.kind {
            ChannelKind::Email(cfg) => {
                with_retries(&channel.name, || email::send(cfg, notification)).await
            }
            ChannelKind::Webhook(cfg) => {
                with_retries(&channel.name, || {
                    webhook::post_json(&self.http, cfg, notification)
                })
                .await
            }
            ChannelKind::Slack(cfg) => {
                with_retries(&channel.name, || {
                    webhook::post_slack(&self.http, cfg, notification)
                })
                .await
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use firewatch_config::WebhookChannel;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notification() -> AlertNotification {
        AlertNotification {
            device_id: Uuid::nil(),
            device_name: "edge-fw-01".into(),
            metric_type: "cpu".into(),
            severity: "critical".into(),
            threshold_value: 90.0,
            actual_value: 95.0,
            message: "CPU Usage is 95.0% (threshold: > 90.0%)".into(),
            triggered_at: Utc::now(),
        }
    }

    fn webhook_channel(id: i64, url: String) -> NotificationChannelConfig {
        NotificationChannelConfig {
            id,
            name: format!("hook-{id}"),
            enabled: true,
            kind: ChannelKind::Webhook(WebhookChannel { url, token: None }),
        }
    }

    #[tokio::test]
    async fn webhook_delivers_canonical_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/alert"))
            .and(body_partial_json(serde_json::json!({
                "device_name": "edge-fw-01",
                "metric_type": "cpu",
                "severity": "critical",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = Dispatcher::new(vec![webhook_channel(1, format!("{}/alert", server.uri()))]);
        let deliveries = dispatcher.send(&notification(), &[1]).await;

        assert_eq!(deliveries.len(), 1);
        assert!(deliveries[0].result.is_ok());
    }

    #[tokio::test]
    async fn http_4xx_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1) // no retries
            .mount(&server)
            .await;

        let dispatcher = Dispatcher::new(vec![webhook_channel(1, server.uri())]);
        let deliveries = dispatcher.send(&notification(), &[1]).await;
        assert!(deliveries[0].result.is_err());
    }

    #[tokio::test]
    async fn one_channel_failure_does_not_block_others() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/good"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/bad"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let dispatcher = Dispatcher::new(vec![
            webhook_channel(1, format!("{}/bad", server.uri())),
            webhook_channel(2, format!("{}/good", server.uri())),
        ]);
        let deliveries = dispatcher.send(&notification(), &[1, 2]).await;

        assert!(deliveries[0].result.is_err());
        assert!(deliveries[1].result.is_ok());
    }

    #[tokio::test]
    async fn unknown_channel_reports_failure() {
        let dispatcher = Dispatcher::new(vec![]);
        let deliveries = dispatcher.send(&notification(), &[99]).await;
        assert!(deliveries[0].result.is_err());
    }

    #[tokio::test]
    async fn bearer_token_is_attached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer sekrit"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let channel = NotificationChannelConfig {
            id: 1,
            name: "hook".into(),
            enabled: true,
            kind: ChannelKind::Webhook(WebhookChannel {
                url: server.uri(),
                token: Some("sekrit".into()),
            }),
        };
        let dispatcher = Dispatcher::new(vec![channel]);
        let deliveries = dispatcher.send(&notification(), &[1]).await;
        assert!(deliveries[0].result.is_ok());
    }
}
