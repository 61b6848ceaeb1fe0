//! Delivery methods and the registry that builds them by name.
//!
//! A delivery method is registered under a symbolic name together with a
//! constructor and a default settings record. Resolving a name deep-merges the
//! defaults with the class's settings override and then with any per-call
//! options before calling the constructor.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use super::{BoxError, MailError, Message};

mod file;
mod sendmail;
mod smtp;
mod testing;

pub use file::{FileDelivery, FileSettings};
pub use sendmail::{SendmailDelivery, SendmailSettings};
pub use smtp::{SmtpDelivery, SmtpSettings, SmtpTls};
pub use testing::{deliveries, Deliveries, TestDelivery};

/// Async transport backend.
///
/// Implement this trait to provide alternative backends (e.g., SES, Mailgun).
#[async_trait]
pub trait DeliveryMethod: Send + Sync + 'static {
    async fn deliver(&self, message: &Message) -> Result<(), BoxError>;
}

/// A settings record: a JSON object.
pub type Settings = Map<String, Value>;

pub type Constructor =
    Arc<dyn Fn(&Settings) -> Result<Arc<dyn DeliveryMethod>, MailError> + Send + Sync>;

/// A delivery method given by registered name or as a ready instance.
#[derive(Clone)]
pub enum DeliveryMethodChoice {
    Named(String),
    Instance(Arc<dyn DeliveryMethod>),
}

impl fmt::Debug for DeliveryMethodChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMethodChoice::Named(name) => f.debug_tuple("Named").field(name).finish(),
            DeliveryMethodChoice::Instance(_) => f.write_str("Instance(..)"),
        }
    }
}

impl From<&str> for DeliveryMethodChoice {
    fn from(name: &str) -> Self {
        DeliveryMethodChoice::Named(name.to_string())
    }
}

impl From<String> for DeliveryMethodChoice {
    fn from(name: String) -> Self {
        DeliveryMethodChoice::Named(name)
    }
}

impl From<Arc<dyn DeliveryMethod>> for DeliveryMethodChoice {
    fn from(method: Arc<dyn DeliveryMethod>) -> Self {
        DeliveryMethodChoice::Instance(method)
    }
}

#[derive(Clone)]
pub struct BackendDescriptor {
    name: String,
    constructor: Constructor,
    defaults: Settings,
}

impl BackendDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn defaults(&self) -> &Settings {
        &self.defaults
    }

    pub fn build(&self, settings: &Settings) -> Result<Arc<dyn DeliveryMethod>, MailError> {
        (self.constructor)(settings)
    }
}

impl fmt::Debug for BackendDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendDescriptor")
            .field("name", &self.name)
            .field("defaults", &self.defaults)
            .finish()
    }
}

/// A delivery method ready to be attached to a message.
#[derive(Clone)]
pub(crate) struct ResolvedMethod {
    pub handler: Arc<dyn DeliveryMethod>,
    pub name: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct BackendRegistry {
    entries: BTreeMap<String, BackendDescriptor>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `smtp`, `sendmail`, `file` and `test`.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            "smtp",
            SmtpDelivery::from_settings,
            object(json!({ "host": "localhost", "port": 25, "tls": "none" })),
        );
        registry.register(
            "sendmail",
            SendmailDelivery::from_settings,
            object(json!({ "location": "/usr/sbin/sendmail" })),
        );
        registry.register(
            "file",
            FileDelivery::from_settings,
            object(json!({ "location": "tmp/mails" })),
        );
        registry.register(
            "test",
            TestDelivery::constructor(deliveries().clone()),
            Settings::new(),
        );
        registry
    }

    /// Add or replace a delivery method.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F, defaults: Settings)
    where
        F: Fn(&Settings) -> Result<Arc<dyn DeliveryMethod>, MailError> + Send + Sync + 'static,
    {
        let name = name.into();
        self.entries.insert(
            name.clone(),
            BackendDescriptor {
                name,
                constructor: Arc::new(constructor),
                defaults,
            },
        );
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&BackendDescriptor> {
        self.entries.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Build the delivery method for `choice`. Instances are used as is.
    pub(crate) fn resolve(
        &self,
        choice: &DeliveryMethodChoice,
        class_settings: Option<&Settings>,
        call_settings: Option<&Settings>,
    ) -> Result<ResolvedMethod, MailError> {
        let name = match choice {
            DeliveryMethodChoice::Instance(handler) => {
                return Ok(ResolvedMethod {
                    handler: handler.clone(),
                    name: None,
                })
            }
            DeliveryMethodChoice::Named(name) if name.trim().is_empty() => {
                return Err(MailError::NoDeliveryMethod)
            }
            DeliveryMethodChoice::Named(name) => name,
        };

        let descriptor = self
            .get(name)
            .ok_or_else(|| MailError::UnknownDeliveryMethod(name.clone()))?;

        let mut settings = descriptor.defaults.clone();
        for layer in [class_settings, call_settings].into_iter().flatten() {
            deep_merge(&mut settings, layer);
        }

        tracing::debug!(delivery_method = %name, "resolved delivery method");
        Ok(ResolvedMethod {
            handler: descriptor.build(&settings)?,
            name: Some(name.clone()),
        })
    }
}

/// Overlay `overlay` onto `base`, merging nested objects key by key.
pub fn deep_merge(base: &mut Settings, overlay: &Settings) {
    for (key, value) in overlay {
        if let Value::Object(incoming) = value {
            if let Some(Value::Object(existing)) = base.get_mut(key) {
                deep_merge(existing, incoming);
                continue;
            }
        }
        base.insert(key.clone(), value.clone());
    }
}

/// Deserialize a settings record into a backend's typed settings.
pub fn settings_from<T: DeserializeOwned>(method: &str, settings: &Settings) -> Result<T, MailError> {
    serde_json::from_value(Value::Object(settings.clone())).map_err(|e| {
        MailError::InvalidSettings {
            method: method.to_string(),
            reason: e.to_string(),
        }
    })
}

/// Unwrap a `json!` object literal.
pub(crate) fn object(value: Value) -> Settings {
    match value {
        Value::Object(map) => map,
        _ => Settings::new(),
    }
}
