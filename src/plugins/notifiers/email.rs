use async_trait::async_trait;
use lettre::message::{Mailbox, header};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::{EmailConfig, SmtpSecurity};
use crate::plugins::traits::{DispatchError, Mailer};
use crate::{AppError, Result};

/// Plain-text SMTP mailer for batched price alerts.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let from: Mailbox = config.sender().parse().map_err(|e| {
            AppError::Email(format!("invalid sender address '{}': {}", config.sender(), e))
        })?;
        let to: Mailbox = config.recipient.parse().map_err(|e| {
            AppError::Email(format!("invalid recipient address '{}': {}", config.recipient, e))
        })?;

        let builder = match config.security {
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
                .map_err(|e| AppError::Email(format!("SMTP relay setup failed: {}", e)))?,
            SmtpSecurity::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                    .map_err(|e| AppError::Email(format!("SMTP STARTTLS setup failed: {}", e)))?
            }
            SmtpSecurity::None => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
            }
        };

        let mut builder = builder
            .port(config.smtp_port)
            .timeout(Some(config.timeout()));

        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }
}

/// Sorts SMTP failures into the two classes the notification queue acts on.
///
/// 5xx replies (bad credentials, rejected sender or recipient) and
/// client-side errors will fail identically on retry, so they are permanent.
/// Everything else, including 4xx replies, timeouts and connection or TLS
/// errors, is transient.
pub fn classify_smtp_error(err: &lettre::transport::smtp::Error) -> DispatchError {
    if err.is_permanent() || err.is_client() {
        DispatchError::Permanent(err.to_string())
    } else {
        DispatchError::Transient(err.to_string())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, subject: &str, body: &str) -> std::result::Result<(), DispatchError> {
        let email = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .header(header::ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| DispatchError::Permanent(format!("failed to build message: {}", e)))?;

        match self.transport.send(email).await {
            Ok(response) => {
                tracing::debug!(code = %response.code(), "SMTP server accepted batch");
                Ok(())
            }
            Err(e) => Err(classify_smtp_error(&e)),
        }
    }
}
