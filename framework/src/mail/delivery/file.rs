use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use lettre::{AsyncFileTransport, AsyncTransport, Tokio1Executor};
use serde::Deserialize;

use super::{settings_from, DeliveryMethod, Settings};
use crate::mail::{BoxError, MailError, Message};

/// Settings for the `file` delivery method.
#[derive(Debug, Clone, Deserialize)]
pub struct FileSettings {
    /// Directory the `.eml` files are written to. Created on first delivery.
    pub location: PathBuf,
}

/// Writes each message to `<location>/<uuid>.eml`.
pub struct FileDelivery {
    location: PathBuf,
    transport: AsyncFileTransport<Tokio1Executor>,
}

impl FileDelivery {
    pub fn new(location: impl Into<PathBuf>) -> Self {
        let location = location.into();
        Self {
            transport: AsyncFileTransport::<Tokio1Executor>::new(&location),
            location,
        }
    }

    pub fn location(&self) -> &std::path::Path {
        &self.location
    }

    /// Constructor registered as the `file` delivery method.
    pub fn from_settings(settings: &Settings) -> Result<Arc<dyn DeliveryMethod>, MailError> {
        let config: FileSettings = settings_from("file", settings)?;
        Ok(Arc::new(Self::new(config.location)))
    }
}

#[async_trait]
impl DeliveryMethod for FileDelivery {
    async fn deliver(&self, message: &Message) -> Result<(), BoxError> {
        let email = message.to_email()?;
        tokio::fs::create_dir_all(&self.location).await?;
        let id = self.transport.send(email).await?;
        tracing::debug!(%id, location = %self.location.display(), "message written");
        Ok(())
    }
}
