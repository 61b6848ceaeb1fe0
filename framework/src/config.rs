use serde::de::DeserializeOwned;
use serde::Deserialize;

pub use config::ConfigError;

/// Load any deserializable struct from environment variables.
///
/// Field names map to upper-cased variables, optionally behind a prefix:
/// `from_env_with_prefix("MAILER")` reads `delivery_method` from
/// `MAILER_DELIVERY_METHOD`.
pub trait EnvConfig: Sized {
    fn from_env() -> Result<Self, ConfigError>;
    fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError>;
}

impl<D> EnvConfig for D
where
    D: DeserializeOwned,
{
    fn from_env() -> Result<Self, ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::default())
            .build()?
            .try_deserialize()
    }

    fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::with_prefix(prefix))
            .build()?
            .try_deserialize()
    }
}

/// Delivery flags applied to a mailer class with
/// [`MailerClass::configure`](crate::mail::MailerClass::configure).
///
/// ```ignore
/// let config = DeliveryConfig::from_env_with_prefix("MAILER")?;
/// application_mailer.configure(&config);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeliveryConfig {
    /// Registered delivery method name (default: `smtp`).
    #[serde(default = "default_delivery_method")]
    pub delivery_method: String,

    /// Set to `false` to compose without sending (default: true).
    #[serde(default = "default_true")]
    pub perform_deliveries: bool,

    /// Set to `false` to swallow transport errors (default: true).
    #[serde(default = "default_true")]
    pub raise_delivery_errors: bool,

    /// Queue used by `deliver_later` (default: `mailers`).
    #[serde(default = "default_queue_name")]
    pub deliver_later_queue_name: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            delivery_method: default_delivery_method(),
            perform_deliveries: true,
            raise_delivery_errors: true,
            deliver_later_queue_name: default_queue_name(),
        }
    }
}

fn default_delivery_method() -> String {
    "smtp".to_string()
}

fn default_true() -> bool {
    true
}

fn default_queue_name() -> String {
    "mailers".to_string()
}
