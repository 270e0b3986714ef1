use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};

use crate::config::SmtpConfig;

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Sends one HTML message to a single recipient.
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct SmtpMailer {
    host: String,
    port: u16,
    credentials: Credentials,
    from: String,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig) -> Self {
        Self {
            host: cfg.host.clone(),
            port: cfg.port,
            credentials: Credentials::new(cfg.username.clone(), cfg.password.clone()),
            from: cfg.from.clone(),
        }
    }

    fn transport(&self) -> anyhow::Result<SmtpTransport> {
        Ok(SmtpTransport::relay(&self.host)
            .context("smtp relay")?
            .port(self.port)
            .credentials(self.credentials.clone())
            .build())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> anyhow::Result<()> {
        let message = Message::builder()
            .from(self.from.parse().context("parse from address")?)
            .to(to.parse().context("parse recipient address")?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html_body.to_string())
            .context("build message")?;

        let mailer = self.transport()?;
        tokio::task::spawn_blocking(move || mailer.send(&message))
            .await
            .context("smtp task")?
            .context("smtp send")?;
        Ok(())
    }
}
