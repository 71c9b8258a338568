// Webhook and Slack delivery over HTTP POST.

use serde_json::json;

use firewatch_config::{SlackChannel, WebhookChannel};

use super::{AlertNotification, NotifyError};

fn classify(err: &reqwest::Error) -> NotifyError {
    if err.is_timeout() || err.is_connect() {
        NotifyError::Transient(err.to_string())
    } else {
        NotifyError::Permanent(err.to_string())
    }
}

/// POST the canonical JSON envelope.
pub(super) async fn post_json(
    http: &reqwest::Client,
    cfg: &WebhookChannel,
    notification: &AlertNotification,
) -> Result<(), NotifyError> {
    let mut request = http.post(&cfg.url).json(notification);
    if let Some(token) = &cfg.token {
        request = request.bearer_auth(token);
    }

    let resp = request.send().await.map_err(|e| classify(&e))?;
    let status = resp.status();
    if status.is_success() {
        Ok(())
    } else {
        // 4xx and 5xx alike: the request reached the endpoint, retrying
        // the same payload will not change the answer.
        Err(NotifyError::Permanent(format!("HTTP {status}")))
    }
}

/// POST a Slack incoming-webhook message.
pub(super) async fn post_slack(
    http: &reqwest::Client,
    cfg: &SlackChannel,
    notification: &AlertNotification,
) -> Result<(), NotifyError> {
    let payload = json!({
        "text": format!("*{}*\n{}", notification.subject(), notification.message),
    });

    let resp = http
        .post(&cfg.webhook_url)
        .json(&payload)
        .send()
        .await
        .map_err(|e| classify(&e))?;

    let status = resp.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(NotifyError::Permanent(format!("HTTP {status}")))
    }
}
