use crate::config::MailConfig;
use crate::utils::validation::escape_html;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;

const NOT_SPECIFIED: &str = "not specified";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Invalid email address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build email: {0}")]
    Build(String),

    #[error("{0}")]
    Send(String),

    #[error("Mail relay timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends one HTML message to `recipient`.
    async fn notify(&self, subject: &str, recipient: &str, body_html: &str)
    -> Result<(), NotifyError>;

    fn backend_name(&self) -> &'static str;
}

/// STARTTLS relay authenticated with the admin account.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
    timeout: Duration,
}

impl SmtpNotifier {
    pub fn new(config: &MailConfig, timeout: Duration) -> Result<Self, NotifyError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.relay_host)
            .map_err(|e| NotifyError::Build(e.to_string()))?
            .port(config.relay_port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .timeout(Some(timeout))
            .build();

        Ok(Self {
            transport,
            sender: mailbox(&config.admin_email)?,
            timeout,
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(
        &self,
        subject: &str,
        recipient: &str,
        body_html: &str,
    ) -> Result<(), NotifyError> {
        let message = Message::builder()
            .from(self.sender.clone())
            .to(mailbox(recipient)?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body_html.to_string())
            .map_err(|e| NotifyError::Build(e.to_string()))?;

        match tokio::time::timeout(self.timeout, self.transport.send(message)).await {
            Ok(Ok(_)) => {
                tracing::info!("📧 Email sent to {}: {}", recipient, subject);
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!("Email sending failed: {}", e);
                Err(NotifyError::Send(e.to_string()))
            }
            Err(_) => {
                tracing::error!("Email sending timed out after {:?}", self.timeout);
                Err(NotifyError::Timeout(self.timeout))
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "smtp"
    }
}

/// Writes messages to the log instead of sending them.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        subject: &str,
        recipient: &str,
        body_html: &str,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            "📧 [log mail] to={} subject={:?} ({} bytes of HTML)",
            recipient,
            subject,
            body_html.len()
        );
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "log"
    }
}

fn mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address
        .parse::<Mailbox>()
        .map_err(|e| NotifyError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

pub fn setup_notifier(
    config: &MailConfig,
    timeout: Duration,
) -> Result<Arc<dyn Notifier>, NotifyError> {
    match config.backend.to_lowercase().as_str() {
        "log" | "none" => {
            tracing::warn!("⚠️ Mail backend is 'log', notifications are not delivered");
            Ok(Arc::new(LogNotifier))
        }
        "smtp" => Ok(Arc::new(SmtpNotifier::new(config, timeout)?)),
        other => {
            tracing::warn!("Unknown mail backend '{}', using smtp", other);
            Ok(Arc::new(SmtpNotifier::new(config, timeout)?))
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub email: Option<String>,
    pub username: Option<String>,
    pub department: Option<String>,
}

/// Request to add a base model to the platform.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelRequest {
    pub model_name: Option<String>,
    pub reason: Option<String>,
    #[serde(default)]
    pub user_info: UserInfo,
}

impl ModelRequest {
    pub fn subject(&self) -> String {
        format!(
            "[Fine-tune Gateway] New model request: {}",
            or_unspecified(&self.model_name)
        )
    }
}

fn or_unspecified(value: &Option<String>) -> &str {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(NOT_SPECIFIED)
}

/// `REQ{YYYYMMDDHHMMSS}`
pub fn model_request_id(now: DateTime<Local>) -> String {
    format!("REQ{}", now.format("%Y%m%d%H%M%S"))
}

fn row(label: &str, value: &str) -> String {
    format!(
        r#"<tr><td style="padding: 8px; border-bottom: 1px solid #e0e0e0;"><strong>{}:</strong></td><td style="padding: 8px; border-bottom: 1px solid #e0e0e0;">{}</td></tr>"#,
        label,
        escape_html(value)
    )
}

/// HTML body of the administrator notification.
pub fn render_model_request_email(
    request: &ModelRequest,
    request_id: &str,
    submitted_at: DateTime<Local>,
) -> String {
    let user = &request.user_info;
    format!(
        r#"<html>
<body style="font-family: Arial, sans-serif; line-height: 1.6;">
  <div style="max-width: 600px; margin: 0 auto; padding: 20px; border: 1px solid #e0e0e0; border-radius: 5px;">
    <h2 style="color: #3949ab; border-bottom: 2px solid #3949ab; padding-bottom: 10px;">New model request</h2>
    <div style="background-color: #f5f5f5; padding: 15px; border-radius: 5px; margin: 15px 0;">
      <p><strong>Request ID:</strong> {request_id}</p>
      <p><strong>Date:</strong> {date}</p>
    </div>
    <h3 style="color: #424242;">Request details</h3>
    <table style="width: 100%; border-collapse: collapse;">
      {model}
      {reason}
    </table>
    <h3 style="color: #424242;">Requester</h3>
    <table style="width: 100%; border-collapse: collapse;">
      {email}
      {username}
      {department}
    </table>
    <div style="background-color: #fff8e1; padding: 15px; border-left: 4px solid #ffc107; margin: 20px 0;">
      <p style="margin: 0;">Please reply to the requester within 24 hours.</p>
    </div>
    <p style="color: #757575; font-size: 12px; text-align: center; margin-top: 30px;">Sent automatically by the fine-tune gateway.</p>
  </div>
</body>
</html>
"#,
        request_id = escape_html(request_id),
        date = submitted_at.format("%Y-%m-%d %H:%M:%S"),
        model = row("Model name", or_unspecified(&request.model_name)),
        reason = row("Reason", or_unspecified(&request.reason)),
        email = row("Email", or_unspecified(&user.email)),
        username = row("Username", or_unspecified(&user.username)),
        department = row("Department", or_unspecified(&user.department)),
    )
}
