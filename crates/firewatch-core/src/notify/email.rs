// SMTP delivery via lettre's async transport.

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;

use firewatch_config::EmailChannel;

use super::{AlertNotification, NotifyError};

fn transport(cfg: &EmailChannel) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotifyError> {
    let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.smtp_host)
        .map_err(|e| NotifyError::Permanent(format!("SMTP relay config: {e}")))?
        .port(cfg.smtp_port);

    // The credential is exposed only here, at the transport boundary.
    if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
        builder = builder.credentials(Credentials::new(
            user.expose_secret().to_owned(),
            pass.expose_secret().to_owned(),
        ));
    }

    Ok(builder.build())
}

/// Send the alert to every configured recipient in one message.
pub(super) async fn send(
    cfg: &EmailChannel,
    notification: &AlertNotification,
) -> Result<(), NotifyError> {
    let from: Mailbox = cfg
        .from
        .parse()
        .map_err(|e| NotifyError::Permanent(format!("invalid from address: {e}")))?;

    let mut builder = Message::builder().from(from).subject(notification.subject());
    for recipient in &cfg.recipients {
        let to: Mailbox = recipient
            .parse()
            .map_err(|e| NotifyError::Permanent(format!("invalid recipient {recipient}: {e}")))?;
        builder = builder.to(to);
    }

    let body = format!(
        "{}\n\nDevice: {} ({})\nMetric: {}\nActual: {}\nThreshold: {}\nTriggered: {}",
        notification.message,
        notification.device_name,
        notification.device_id,
        notification.metric_type,
        notification.actual_value,
        notification.threshold_value,
        notification.triggered_at,
    );
    let message = builder
        .body(body)
        .map_err(|e| NotifyError::Permanent(format!("message build: {e}")))?;

    let mailer = transport(cfg)?;
    match mailer.send(message).await {
        Ok(_) => Ok(()),
        // 4yz SMTP codes and connection drops are worth another attempt;
        // 5yz (including auth rejections) are not.
        Err(e) if e.is_transient() => Err(NotifyError::Transient(e.to_string())),
        Err(e) if e.is_permanent() => Err(NotifyError::Permanent(e.to_string())),
        Err(e) => Err(NotifyError::Transient(e.to_string())),
    }
}
