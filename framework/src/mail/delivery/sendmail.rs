use std::sync::Arc;

use async_trait::async_trait;
use lettre::{AsyncSendmailTransport, AsyncTransport, Tokio1Executor};
use serde::Deserialize;

use super::{settings_from, DeliveryMethod, Settings};
use crate::mail::{BoxError, MailError, Message};

/// Settings for the `sendmail` delivery method.
#[derive(Debug, Clone, Deserialize)]
pub struct SendmailSettings {
    /// Path to the sendmail binary.
    pub location: String,
}

/// Pipes messages to a local sendmail binary.
pub struct SendmailDelivery {
    transport: AsyncSendmailTransport<Tokio1Executor>,
}

impl SendmailDelivery {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            transport: AsyncSendmailTransport::<Tokio1Executor>::new_with_command(location.into()),
        }
    }

    /// Constructor registered as the `sendmail` delivery method.
    pub fn from_settings(settings: &Settings) -> Result<Arc<dyn DeliveryMethod>, MailError> {
        let config: SendmailSettings = settings_from("sendmail", settings)?;
        Ok(Arc::new(Self::new(config.location)))
    }
}

#[async_trait]
impl DeliveryMethod for SendmailDelivery {
    async fn deliver(&self, message: &Message) -> Result<(), BoxError> {
        self.transport.send(message.to_email()?).await?;
        Ok(())
    }
}
