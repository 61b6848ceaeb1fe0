use std::error::Error as StdError;

use thiserror::Error;

use crate::jobs::JobError;

/// Boxed error produced by a delivery method.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Coarse classification of a [`MailError`].
///
/// Only [`ErrorKind::Action`] and [`ErrorKind::Transport`] errors are routed
/// through handlers registered with
/// [`MailerClass::rescue_from`](super::MailerClass::rescue_from).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    MissingTemplate,
    Action,
    Transport,
    Misuse,
    Queue,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid delivery method {0:?}")]
    UnknownDeliveryMethod(String),

    #[error("delivery method cannot be empty")]
    NoDeliveryMethod,

    #[error("invalid settings for delivery method {method:?}: {reason}")]
    InvalidSettings { method: String, reason: String },

    #[error("you must supply at least one format")]
    NoFormats,

    #[error("ambiguous templates for {path}/{name}: more than one template renders {format}")]
    AmbiguousTemplates {
        path: String,
        name: String,
        format: String,
    },

    #[error("missing template {path}/{name}{}", with_format(.format))]
    MissingTemplate {
        path: String,
        name: String,
        format: Option<String>,
    },

    #[error("can't add attachments after `mail` was called; add them before calling `mail`")]
    AttachmentsAfterMail,

    #[error("{mailer} has no action {action:?}")]
    NoSuchAction { mailer: String, action: String },

    #[error("unknown mailer {0:?}")]
    UnknownMailer(String),

    #[error("invalid email address: {0}")]
    InvalidAddress(String),

    #[error("invalid header {0}")]
    InvalidHeader(String),

    #[error("cannot build message: {0}")]
    Build(String),

    #[error(
        "the message was already built; calling deliver_later now would silently drop local \
         changes, so create a fresh delivery and call deliver_later on it instead"
    )]
    DeliverLaterAfterMessage,

    #[error("action failed: {0:#}")]
    Action(#[from] anyhow::Error),

    #[error("delivery failed: {0}")]
    Transport(#[source] BoxError),

    #[error(transparent)]
    Queue(#[from] JobError),
}

fn with_format(format: &Option<String>) -> String {
    match format {
        Some(format) => format!(" with format {format}"),
        None => String::new(),
    }
}

impl MailError {
    /// Wrap any error raised from inside an action.
    pub fn action(err: impl Into<anyhow::Error>) -> Self {
        MailError::Action(err.into())
    }

    /// Wrap a transport failure.
    pub fn transport(err: impl Into<BoxError>) -> Self {
        MailError::Transport(err.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MailError::MissingTemplate { .. } => ErrorKind::MissingTemplate,
            MailError::Action(_) => ErrorKind::Action,
            MailError::Transport(_) => ErrorKind::Transport,
            MailError::DeliverLaterAfterMessage => ErrorKind::Misuse,
            MailError::Queue(_) => ErrorKind::Queue,
            _ => ErrorKind::Configuration,
        }
    }

    /// Whether registered rescue handlers may intercept this error.
    pub fn is_rescuable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Action | ErrorKind::Transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(MailError::NoFormats.kind(), ErrorKind::Configuration);
        assert_eq!(
            MailError::UnknownDeliveryMethod("carrier_pigeon".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(MailError::DeliverLaterAfterMessage.kind(), ErrorKind::Misuse);
        assert_eq!(
            MailError::transport(std::io::Error::other("connection reset")).kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            MailError::action(anyhow::anyhow!("user not found")).kind(),
            ErrorKind::Action
        );
    }

    #[test]
    fn only_action_and_transport_are_rescuable() {
        assert!(MailError::action(anyhow::anyhow!("boom")).is_rescuable());
        assert!(MailError::transport(std::io::Error::other("down")).is_rescuable());
        assert!(!MailError::AttachmentsAfterMail.is_rescuable());
        assert!(!MailError::DeliverLaterAfterMessage.is_rescuable());
    }

    #[test]
    fn missing_template_message() {
        let err = MailError::MissingTemplate {
            path: "user_mailer".into(),
            name: "welcome".into(),
            format: Some("html".into()),
        };
        assert_eq!(
            err.to_string(),
            "missing template user_mailer/welcome with format html"
        );
    }
}
