pub mod config;
pub mod jobs;
pub mod mail;

pub use config::{DeliveryConfig, EnvConfig};
pub use mail::{MailError, MailOptions, MailerClass, Mailers};
