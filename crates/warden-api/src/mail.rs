//! Outbound mail
//!
//! Handlers never wait on SMTP. They hand messages to [`MailQueue`], a bounded
//! channel drained by one background worker that owns the [`Mailer`].

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use warden_core::{MailConfig, Mailer, OutboundEmail, Result, WardenError};

/// SMTP relay over STARTTLS
pub struct SmtpMailer {
    transport: SmtpTransport,
    sender: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig) -> Result<Self> {
        let host = config
            .smtp_host
            .as_deref()
            .ok_or_else(|| WardenError::ConfigError("mail.smtp_host is not set".to_string()))?;

        let sender: Mailbox = config
            .default_sender
            .parse()
            .map_err(|e| WardenError::ConfigError(format!("Invalid default sender: {e}")))?;

        let mut builder = SmtpTransport::starttls_relay(host)
            .map_err(|e| WardenError::ConfigError(format!("Invalid SMTP relay: {e}")))?
            .port(config.smtp_port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            sender,
        })
    }

    fn build_message(&self, email: &OutboundEmail) -> Result<Message> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| WardenError::MailError(format!("Invalid recipient {}: {e}", email.to)))?;

        Message::builder()
            .from(self.sender.clone())
            .to(to)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())
            .map_err(|e| WardenError::MailError(format!("Failed to build message: {e}")))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<()> {
        let message = self.build_message(email)?;
        let transport = self.transport.clone();

        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| WardenError::MailError(format!("Mail task failed: {e}")))?
            .map_err(|e| WardenError::MailError(format!("SMTP delivery failed: {e}")))?;

        Ok(())
    }
}

/// Writes messages to the log instead of sending them
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<()> {
        info!(to = %email.to, subject = %email.subject, body = %email.body, "Mail not sent (no SMTP host configured)");
        Ok(())
    }
}

/// SMTP when a host is configured, otherwise the log
pub fn build_mailer(config: &MailConfig) -> Result<Arc<dyn Mailer>> {
    if config.smtp_host.is_some() {
        Ok(Arc::new(SmtpMailer::new(config)?))
    } else {
        warn!("No SMTP host configured, outgoing mail will only be logged");
        Ok(Arc::new(LogMailer))
    }
}

/// Submit-and-forget front end for a [`Mailer`]
#[derive(Clone)]
pub struct MailQueue {
    sender: mpsc::Sender<OutboundEmail>,
}

impl MailQueue {
    /// Spawn the delivery worker; it stops once every queue handle is dropped
    pub fn start(mailer: Arc<dyn Mailer>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<OutboundEmail>(capacity.max(1));

        let worker = tokio::spawn(async move {
            while let Some(email) = receiver.recv().await {
                match mailer.send(&email).await {
                    Ok(()) => debug!(to = %email.to, subject = %email.subject, "Mail delivered"),
                    Err(e) => error!(to = %email.to, subject = %email.subject, error = %e, "Mail delivery failed"),
                }
            }
            debug!("Mail queue closed");
        });

        (Self { sender }, worker)
    }

    /// Queue a message without waiting; returns false if it was dropped
    pub fn submit(&self, email: OutboundEmail) -> bool {
        match self.sender.try_send(email) {
            Ok(()) => true,
            Err(TrySendError::Full(email)) => {
                error!(to = %email.to, subject = %email.subject, "Mail queue full, message dropped");
                false
            }
            Err(TrySendError::Closed(email)) => {
                error!(to = %email.to, subject = %email.subject, "Mail queue closed, message dropped");
                false
            }
        }
    }
}

/// Test doubles shared by unit and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// Records every message it is asked to send
    #[derive(Default)]
    pub struct RecordingMailer {
        sent: Mutex<Vec<OutboundEmail>>,
        failing: AtomicBool,
    }

    impl RecordingMailer {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every subsequent send fail
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub async fn sent(&self) -> Vec<OutboundEmail> {
            self.sent.lock().await.clone()
        }

        /// Wait until at least `count` messages were handed to the mailer
        pub async fn wait_for(&self, count: usize) -> Vec<OutboundEmail> {
            for _ in 0..200 {
                let sent = self.sent().await;
                if sent.len() >= count {
                    return sent;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            self.sent().await
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: &OutboundEmail) -> Result<()> {
            self.sent.lock().await.push(email.clone());
            if self.failing.load(Ordering::SeqCst) {
                return Err(WardenError::MailError("recording mailer set to fail".to_string()));
            }
            Ok(())
        }
    }
}
