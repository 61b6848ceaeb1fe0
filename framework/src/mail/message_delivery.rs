//! Lazy delivery handles returned by [`MailerClass::deliver`].
//!
//! Nothing runs until the message is asked for. `deliver_now` composes and
//! sends in place; `deliver_later` serializes the call itself (mailer, action,
//! arguments, params) and leaves composition to whichever worker picks the
//! job up.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use super::callbacks::{BoxFuture, ChainOutcome, DeliverStep};
use super::composer::{Composer, Params};
use super::job::{mail_delivery_opts, DeliveryVariant, MailDeliveryJob, MAIL_DELIVERY_JOB};
use super::{MailError, MailerClass, Message};
use crate::jobs::{JobEntry, JobError, JobOpts, QueueProvider};

/// What happened to a delivery that returned without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// The transport accepted the message.
    Delivered,
    /// `perform_deliveries` is off; the transport was not called.
    Skipped,
    /// The transport failed and `raise_delivery_errors` is off.
    Failed,
    /// A `before_deliver` callback halted the chain.
    Aborted,
    /// The action never called `mail`, or its error was rescued.
    NoMessage,
}

/// When and where a deferred delivery runs.
#[derive(Debug, Clone, Default)]
pub struct DeliverLaterOptions {
    pub wait: Option<Duration>,
    pub wait_until: Option<OffsetDateTime>,
    pub queue: Option<String>,
}

impl DeliverLaterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run no earlier than `wait` from now. Wins over `wait_until`.
    pub fn wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }

    pub fn wait_until(mut self, at: OffsetDateTime) -> Self {
        self.wait_until = Some(at);
        self
    }

    /// Use this queue instead of the class's `deliver_later_queue_name`.
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }
}

/// A pending call of one mailer action.
pub struct MessageDelivery {
    class: Arc<MailerClass>,
    action: String,
    args: Vec<Value>,
    params: Option<Params>,
    processed: Option<Composer>,
}

impl MessageDelivery {
    pub(crate) fn new(
        class: Arc<MailerClass>,
        action: &str,
        args: Vec<Value>,
        params: Option<Params>,
    ) -> Self {
        Self {
            class,
            action: action.to_string(),
            args,
            params,
            processed: None,
        }
    }

    pub fn class(&self) -> &Arc<MailerClass> {
        &self.class
    }

    pub fn action_name(&self) -> &str {
        &self.action
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn params(&self) -> Option<&Params> {
        self.params.as_ref()
    }

    /// Whether the action already ran on this handle.
    pub fn is_processed(&self) -> bool {
        self.processed.is_some()
    }

    /// The composed message, running the action on first use. If the action
    /// never called `mail` the message is empty.
    pub fn message(&mut self) -> Result<&Message, MailError> {
        Ok(self.processed()?.message())
    }

    fn processed(&mut self) -> Result<&mut Composer, MailError> {
        let composer = match self.processed.take() {
            Some(composer) => composer,
            None => {
                let mut composer = Composer::new(
                    self.class.clone(),
                    self.action.as_str(),
                    self.params.clone().unwrap_or_default(),
                );
                composer.process(&self.args)?;
                composer
            }
        };
        Ok(self.processed.insert(composer))
    }

    /// Compose and deliver now, honoring `perform_deliveries` and
    /// `raise_delivery_errors`.
    pub async fn deliver_now(&mut self) -> Result<DeliveryOutcome, MailError> {
        self.deliver(true).await
    }

    /// Compose and deliver now, ignoring `perform_deliveries` and
    /// `raise_delivery_errors`.
    pub async fn deliver_now_unchecked(&mut self) -> Result<DeliveryOutcome, MailError> {
        self.deliver(false).await
    }

    async fn deliver(&mut self, checked: bool) -> Result<DeliveryOutcome, MailError> {
        let composer = self.processed()?;
        let class = composer.class().clone();
        let step = TransportStep {
            checked,
            outcome: Mutex::new(DeliveryOutcome::NoMessage),
        };

        let callbacks = class.callbacks();
        let rescue = class.rescue_handlers();
        match callbacks.run(composer, &step, &rescue).await? {
            ChainOutcome::Aborted => Ok(DeliveryOutcome::Aborted),
            ChainOutcome::Completed => Ok(step.outcome.into_inner()),
        }
    }

    /// Enqueue the call to be composed and delivered by a worker. The
    /// returned id is the job's id.
    pub async fn deliver_later(
        &self,
        queue: &impl QueueProvider,
        options: DeliverLaterOptions,
    ) -> Result<Uuid, MailError> {
        self.enqueue(queue, options, DeliveryVariant::DeliverNow).await
    }

    /// Like [`deliver_later`](Self::deliver_later), but the worker delivers
    /// with [`deliver_now_unchecked`](Self::deliver_now_unchecked).
    pub async fn deliver_later_unchecked(
        &self,
        queue: &impl QueueProvider,
        options: DeliverLaterOptions,
    ) -> Result<Uuid, MailError> {
        self.enqueue(queue, options, DeliveryVariant::DeliverNowUnchecked)
            .await
    }

    async fn enqueue(
        &self,
        queue: &impl QueueProvider,
        options: DeliverLaterOptions,
        delivery: DeliveryVariant,
    ) -> Result<Uuid, MailError> {
        if self.is_processed() {
            return Err(MailError::DeliverLaterAfterMessage);
        }

        let job = MailDeliveryJob::<()>::new(
            self.class.name(),
            &self.action,
            delivery,
            self.args.clone(),
            self.params.clone(),
        );
        let payload = serde_json::to_value(&job).map_err(JobError::from)?;
        let opts = JobOpts {
            delay: options.wait,
            run_at: options.wait_until,
            queue: options
                .queue
                .unwrap_or_else(|| self.class.deliver_later_queue_name()),
            ..mail_delivery_opts()
        };

        let entry = JobEntry::new(MAIL_DELIVERY_JOB, payload, &opts);
        queue.insert(&entry).await?;

        tracing::info!(
            mailer = self.class.name(),
            action = %self.action,
            job_id = %entry.id,
            queue = %entry.queue,
            run_at = %entry.run_at,
            "delivery enqueued"
        );
        Ok(entry.id)
    }
}

impl std::fmt::Debug for MessageDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageDelivery")
            .field("mailer", &self.class.name())
            .field("action", &self.action)
            .field("args", &self.args)
            .field("params", &self.params)
            .field("processed", &self.is_processed())
            .finish()
    }
}

/// The innermost step of the deliver chain: interceptors, the transport call
/// and observers.
struct TransportStep {
    checked: bool,
    outcome: Mutex<DeliveryOutcome>,
}

impl DeliverStep for TransportStep {
    fn call<'a>(&'a self, composer: &'a mut Composer) -> BoxFuture<'a, Result<(), MailError>> {
        Box::pin(async move {
            let result = transmit(composer, self.checked).await;
            *self.outcome.lock() = match &result {
                Ok(outcome) => *outcome,
                Err(_) => DeliveryOutcome::Failed,
            };
            result.map(|_| ())
        })
    }
}

async fn transmit(composer: &mut Composer, checked: bool) -> Result<DeliveryOutcome, MailError> {
    if !composer.has_message() {
        return Ok(DeliveryOutcome::NoMessage);
    }
    let class = composer.class().clone();
    let action = composer.action_name().to_string();
    let message = composer.message_mut();

    class.interceptors().inform(message);

    if checked && !message.perform_deliveries() {
        tracing::info!(
            mailer = class.name(),
            %action,
            "perform_deliveries is off, delivery skipped"
        );
        return Ok(DeliveryOutcome::Skipped);
    }

    let Some(handler) = message.delivery_method().cloned() else {
        return Err(MailError::NoDeliveryMethod);
    };

    match handler.deliver(message).await {
        Ok(()) => {
            tracing::info!(
                mailer = class.name(),
                %action,
                delivery_method = message.delivery_method_name().unwrap_or("custom"),
                "message delivered"
            );
            class.observers().inform(message);
            Ok(DeliveryOutcome::Delivered)
        }
        Err(err) if checked && !message.raise_delivery_errors() => {
            tracing::warn!(
                mailer = class.name(),
                %action,
                error = %err,
                "delivery failed, raise_delivery_errors is off"
            );
            Ok(DeliveryOutcome::Failed)
        }
        Err(err) => Err(MailError::Transport(err)),
    }
}

/// Deliveries that carry a params bag, created by [`MailerClass::with`].
#[derive(Debug, Clone)]
pub struct Parameterized {
    class: Arc<MailerClass>,
    params: Params,
}

impl Parameterized {
    pub(crate) fn new(class: Arc<MailerClass>, params: Params) -> Self {
        Self { class, params }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn deliver(&self, action: &str, args: Vec<Value>) -> Result<MessageDelivery, MailError> {
        self.class.check_action(action)?;
        Ok(MessageDelivery::new(
            self.class.clone(),
            action,
            args,
            Some(self.params.clone()),
        ))
    }
}
