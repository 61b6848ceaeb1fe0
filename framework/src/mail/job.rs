//! Background job that replays a deferred mailer call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::composer::Params;
use super::mailers::Mailers;
use super::{ErrorKind, MailError};
use crate::jobs::{Job, JobError, JobOpts, JobResult};

/// Job type under which deferred deliveries are queued.
pub const MAIL_DELIVERY_JOB: &str = "letterbox::mail_delivery";

/// Trait for application state that provides the mailer directory.
///
/// Implement this on your app state to run [`MailDeliveryJob`]:
///
/// ```ignore
/// #[derive(Clone)]
/// pub struct AppState {
///     pub mailers: Mailers,
///     // ...
/// }
///
/// impl HasMailers for AppState {
///     fn mailers(&self) -> &Mailers {
///         &self.mailers
///     }
/// }
/// ```
pub trait HasMailers: Send + Sync + 'static {
    fn mailers(&self) -> &Mailers;
}

/// Which deliver call the worker makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryVariant {
    DeliverNow,
    DeliverNowUnchecked,
}

/// A deferred mailer call.
///
/// Only the call is stored: the mailer's name, the action, its arguments and
/// params. The worker resolves the mailer through [`HasMailers`] and composes
/// the message from scratch, so templates and defaults are those in effect
/// when the job runs.
///
/// ```ignore
/// let registry = JobRegistry::new().register::<MailDeliveryJob<AppState>>();
/// Worker::new(queue, registry, app_state).queues(["mailers"]).start();
/// ```
///
/// The job will retry up to 3 times with exponential backoff on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailDeliveryJob<S = ()> {
    pub mailer: String,
    pub action: String,
    pub delivery: DeliveryVariant,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub params: Option<Params>,
    #[serde(skip)]
    _marker: std::marker::PhantomData<S>,
}

impl<S> MailDeliveryJob<S> {
    pub fn new(
        mailer: impl Into<String>,
        action: impl Into<String>,
        delivery: DeliveryVariant,
        args: Vec<Value>,
        params: Option<Params>,
    ) -> Self {
        Self {
            mailer: mailer.into(),
            action: action.into(),
            delivery,
            args,
            params,
            _marker: std::marker::PhantomData,
        }
    }
}

pub(crate) fn mail_delivery_opts() -> JobOpts {
    JobOpts {
        max_attempts: 3,
        ..Default::default()
    }
}

#[async_trait]
impl<S: HasMailers> Job for MailDeliveryJob<S> {
    const JOB_TYPE: &'static str = MAIL_DELIVERY_JOB;
    type Context = S;

    fn default_opts() -> JobOpts {
        mail_delivery_opts()
    }

    async fn perform(self, ctx: &Self::Context) -> JobResult {
        let class = ctx
            .mailers()
            .get(&self.mailer)
            .ok_or_else(|| MailError::UnknownMailer(self.mailer.clone()))
            .map_err(replay_error)?;

        let mut delivery = match self.params {
            Some(params) => class.with(params).deliver(&self.action, self.args),
            None => class.deliver(&self.action, self.args),
        }
        .map_err(replay_error)?;
        let outcome = match self.delivery {
            DeliveryVariant::DeliverNow => delivery.deliver_now().await,
            DeliveryVariant::DeliverNowUnchecked => delivery.deliver_now_unchecked().await,
        }
        .map_err(replay_error)?;

        tracing::debug!(mailer = %self.mailer, action = %self.action, ?outcome, "replayed delivery");
        Ok(Some(json!({ "outcome": outcome })))
    }
}

/// Action, transport and queue failures may pass on a later attempt. Anything
/// else comes from configuration or misuse and fails the entry outright.
fn replay_error(err: MailError) -> Box<dyn std::error::Error + Send + Sync> {
    match err.kind() {
        ErrorKind::Action | ErrorKind::Transport | ErrorKind::Queue => Box::new(err),
        _ => Box::new(JobError::Permanent(err.to_string())),
    }
}
