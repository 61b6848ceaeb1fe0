use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use serde::Deserialize;

use super::{settings_from, DeliveryMethod, Settings};
use crate::config::EnvConfig;
use crate::mail::{BoxError, MailError, Message};

/// Settings for the `smtp` delivery method.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpSettings {
    /// SMTP server hostname.
    pub host: String,

    /// SMTP server port (default: 587).
    #[serde(default = "default_port")]
    pub port: u16,

    /// SMTP username for authentication.
    #[serde(default)]
    pub username: Option<String>,

    /// SMTP password for authentication.
    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub tls: SmtpTls,

    /// Connection timeout in seconds (default: 10).
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpTls {
    #[default]
    Starttls,
    Tls,
    None,
}

fn default_port() -> u16 {
    587
}

fn default_timeout() -> u64 {
    10
}

/// SMTP delivery using lettre.
#[derive(Clone)]
pub struct SmtpDelivery {
    transport: Arc<AsyncSmtpTransport<Tokio1Executor>>,
}

impl SmtpDelivery {
    /// Create a delivery method from environment variables.
    ///
    /// Reads `SMTP_HOST`, `SMTP_PORT`, `SMTP_USERNAME`, `SMTP_PASSWORD`, `SMTP_TLS`
    /// and `SMTP_TIMEOUT`, loading `.env` first.
    pub fn from_env() -> Result<Self, MailError> {
        dotenvy::dotenv().ok();

        let config = SmtpSettings::from_env_with_prefix("SMTP").map_err(|e| {
            MailError::InvalidSettings {
                method: "smtp".to_string(),
                reason: e.to_string(),
            }
        })?;

        Self::from_config(config)
    }

    /// Create a delivery method from explicit configuration.
    pub fn from_config(config: SmtpSettings) -> Result<Self, MailError> {
        let invalid = |e: lettre::transport::smtp::Error| MailError::InvalidSettings {
            method: "smtp".to_string(),
            reason: e.to_string(),
        };

        let mut builder = match config.tls {
            SmtpTls::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host),
            SmtpTls::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host).map_err(invalid)?,
            SmtpTls::Starttls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host).map_err(invalid)?
            }
        };

        builder = builder
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout)));

        if let (Some(username), Some(password)) = (config.username, config.password) {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            transport: Arc::new(builder.build()),
        })
    }

    /// Constructor registered as the `smtp` delivery method.
    pub fn from_settings(settings: &Settings) -> Result<Arc<dyn DeliveryMethod>, MailError> {
        let config: SmtpSettings = settings_from("smtp", settings)?;
        Ok(Arc::new(Self::from_config(config)?))
    }
}

#[async_trait]
impl DeliveryMethod for SmtpDelivery {
    async fn deliver(&self, message: &Message) -> Result<(), BoxError> {
        self.transport.send(message.to_email()?).await?;
        Ok(())
    }
}
