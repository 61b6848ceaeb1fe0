//! Mailer classes, message composition and pluggable delivery.
//!
//! A [`MailerClass`] is a named bundle of actions. An action fills in a
//! [`Composer`] and calls [`Composer::mail`], which merges the header layers
//! (class defaults, instance headers, call-site options), renders the body
//! formats and assembles a single- or multipart [`Message`]. Delivering sends
//! the message through the class's delivery method inside its callback chain,
//! or defers the whole call to the job queue.
//!
//! # Quick Start
//!
//! ```ignore
//! let users = MailerClass::new("UserMailer");
//! users.default("from", "hello@example.com");
//! users.action("welcome", |m, args| {
//!     let email = args[0].as_str().unwrap_or_default();
//!     m.assign("email", email);
//!     m.mail(MailOptions::new().to(email))?;
//!     Ok(())
//! });
//!
//! // Send in place
//! users.deliver("welcome", vec![json!("ada@example.com")])?.deliver_now().await?;
//!
//! // Or queue for a worker
//! users
//!     .deliver("welcome", vec![json!("ada@example.com")])?
//!     .deliver_later(&queue, DeliverLaterOptions::new())
//!     .await?;
//! ```
//!
//! # Delivery methods
//!
//! Every root class knows `smtp`, `sendmail`, `file` and `test`. Settings are
//! JSON objects deep-merged over each method's defaults:
//!
//! | Method | Settings |
//! |--------|----------|
//! | `smtp` | `host`, `port`, `username`, `password`, `tls` (`starttls`, `tls`, `none`), `timeout` |
//! | `sendmail` | `location` |
//! | `file` | `location` |
//! | `test` | none; messages land in [`deliveries()`] |
//!
//! [`SmtpDelivery::from_env`] reads `SMTP_HOST`, `SMTP_PORT`, `SMTP_USERNAME`,
//! `SMTP_PASSWORD`, `SMTP_TLS` and `SMTP_TIMEOUT`.

mod assembler;
mod attachments;
mod callbacks;
mod class;
mod collector;
mod composer;
mod defaults;
mod delivery;
mod error;
mod headers;
mod job;
mod mailers;
mod message;
mod message_delivery;
mod observers;
mod template;
mod wire;

pub use attachments::{Attachment, Attachments};
pub use callbacks::{
    AfterFn, AroundFn, BeforeFn, BoxFuture, CallbackChain, ChainOutcome, DeliverStep, Next,
    Rescue, RescueFn, RescueHandlers,
};
pub use class::{ActionFn, MailerClass};
pub use collector::{FormatCollector, Fragment};
pub use composer::{Composer, MailOptions, Params};
pub use defaults::{humanize, DefaultValue, HeaderDefaults};
pub use delivery::{
    deep_merge, deliveries, settings_from, BackendDescriptor, BackendRegistry, Constructor,
    Deliveries, DeliveryMethod, DeliveryMethodChoice, FileDelivery, FileSettings,
    SendmailDelivery, SendmailSettings, Settings, SmtpDelivery, SmtpSettings, SmtpTls,
    TestDelivery,
};
pub use error::{BoxError, ErrorKind, MailError};
pub use headers::{canonical_name, is_address_field, same_name, HeaderMap, HeaderValue};
pub use job::{DeliveryVariant, HasMailers, MailDeliveryJob, MAIL_DELIVERY_JOB};
pub use mailers::Mailers;
pub use message::{Body, ContentType, Delivery, Disposition, Message, Part};
pub use message_delivery::{DeliverLaterOptions, DeliveryOutcome, MessageDelivery, Parameterized};
pub use observers::{Hooks, Interceptor, Observer};
pub use template::{
    format_content_type, MemoryTemplates, MemoryTranslations, NoTranslations, RenderContext,
    Rendered, TemplateDescriptor, TemplateRenderer, Translator,
};
