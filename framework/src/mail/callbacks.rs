//! The deliver callback chain and rescue handlers.
//!
//! `before` callbacks run in registration order and may halt delivery by
//! returning [`ControlFlow::Break`]; a halted chain skips the transport and
//! every `after` callback. `around` callbacks nest, first registered
//! outermost, with the transport step innermost. Rescue handlers wrap the
//! `around` nesting, and `after` callbacks run once it has finished, whether
//! it succeeded, failed, or was rescued.

use std::fmt;
use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;

use super::composer::Composer;
use super::{ErrorKind, MailError};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type BeforeFn = Arc<dyn Fn(&mut Composer) -> ControlFlow<()> + Send + Sync>;
pub type AfterFn = Arc<dyn Fn(&mut Composer) + Send + Sync>;
pub type AroundFn = Arc<
    dyn for<'a> Fn(&'a mut Composer, Next<'a>) -> BoxFuture<'a, Result<(), MailError>>
        + Send
        + Sync,
>;

/// The innermost step of the chain.
pub trait DeliverStep: Send + Sync {
    fn call<'a>(&'a self, composer: &'a mut Composer) -> BoxFuture<'a, Result<(), MailError>>;
}

/// The rest of the chain, handed to an `around` callback.
///
/// ```ignore
/// class.around_deliver(|composer, next| {
///     Box::pin(async move {
///         let started = Instant::now();
///         let result = next.run(composer).await;
///         tracing::info!(elapsed = ?started.elapsed(), "delivered");
///         result
///     })
/// });
/// ```
pub struct Next<'a> {
    arounds: &'a [AroundFn],
    step: &'a dyn DeliverStep,
}

impl<'a> Next<'a> {
    pub fn run(self, composer: &'a mut Composer) -> BoxFuture<'a, Result<(), MailError>> {
        match self.arounds.split_first() {
            Some((around, rest)) => around(
                composer,
                Next {
                    arounds: rest,
                    step: self.step,
                },
            ),
            None => self.step.call(composer),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutcome {
    Completed,
    /// A `before` callback halted delivery.
    Aborted,
}

#[derive(Clone, Default)]
pub struct CallbackChain {
    befores: Vec<BeforeFn>,
    afters: Vec<AfterFn>,
    arounds: Vec<AroundFn>,
}

impl CallbackChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before<F>(&mut self, callback: F)
    where
        F: Fn(&mut Composer) -> ControlFlow<()> + Send + Sync + 'static,
    {
        self.befores.push(Arc::new(callback));
    }

    pub fn after<F>(&mut self, callback: F)
    where
        F: Fn(&mut Composer) + Send + Sync + 'static,
    {
        self.afters.push(Arc::new(callback));
    }

    pub fn around<F>(&mut self, callback: F)
    where
        F: for<'a> Fn(&'a mut Composer, Next<'a>) -> BoxFuture<'a, Result<(), MailError>>
            + Send
            + Sync
            + 'static,
    {
        self.arounds.push(Arc::new(callback));
    }

    pub fn is_empty(&self) -> bool {
        self.befores.is_empty() && self.afters.is_empty() && self.arounds.is_empty()
    }

    pub(crate) async fn run(
        &self,
        composer: &mut Composer,
        step: &dyn DeliverStep,
        rescue: &RescueHandlers,
    ) -> Result<ChainOutcome, MailError> {
        for before in &self.befores {
            if before(composer).is_break() {
                tracing::info!(
                    mailer = composer.class().name(),
                    action = composer.action_name(),
                    "delivery halted by before_deliver callback"
                );
                return Ok(ChainOutcome::Aborted);
            }
        }

        let next = Next {
            arounds: &self.arounds,
            step,
        };
        let result = match next.run(composer).await {
            Ok(()) => Ok(()),
            Err(err) => rescue.handle(err, composer),
        };

        for after in &self.afters {
            after(composer);
        }

        result.map(|()| ChainOutcome::Completed)
    }
}

impl fmt::Debug for CallbackChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackChain")
            .field("before", &self.befores.len())
            .field("around", &self.arounds.len())
            .field("after", &self.afters.len())
            .finish()
    }
}

/// What a rescue handler did with the error it was offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rescue {
    Handled,
    Unhandled,
}

pub type RescueFn = Arc<dyn Fn(&MailError, &mut Composer) -> Rescue + Send + Sync>;

/// Handlers for [`ErrorKind::Action`] and [`ErrorKind::Transport`] errors.
#[derive(Clone, Default)]
pub struct RescueHandlers {
    handlers: Vec<(ErrorKind, RescueFn)>,
}

impl RescueHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&mut self, kind: ErrorKind, handler: F)
    where
        F: Fn(&MailError, &mut Composer) -> Rescue + Send + Sync + 'static,
    {
        self.handlers.push((kind, Arc::new(handler)));
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Offer `err` to matching handlers, most recently registered first.
    pub(crate) fn handle(&self, err: MailError, composer: &mut Composer) -> Result<(), MailError> {
        if !err.is_rescuable() {
            return Err(err);
        }
        let kind = err.kind();
        for (_, handler) in self.handlers.iter().rev().filter(|(k, _)| *k == kind) {
            if handler(&err, composer) == Rescue::Handled {
                tracing::debug!(
                    mailer = composer.class().name(),
                    action = composer.action_name(),
                    error = %err,
                    "error rescued"
                );
                return Ok(());
            }
        }
        Err(err)
    }
}

impl fmt::Debug for RescueHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|(kind, _)| kind))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::mail::MailerClass;

    type Log = Arc<Mutex<Vec<String>>>;

    struct RecordingStep {
        log: Log,
        fail: bool,
    }

    impl DeliverStep for RecordingStep {
        fn call<'a>(&'a self, _composer: &'a mut Composer) -> BoxFuture<'a, Result<(), MailError>> {
            Box::pin(async move {
                self.log.lock().push("deliver".into());
                if self.fail {
                    Err(MailError::transport(std::io::Error::other("refused")))
                } else {
                    Ok(())
                }
            })
        }
    }

    fn composer() -> Composer {
        Composer::new(MailerClass::new("UserMailer"), "welcome", Default::default())
    }

    fn before(chain: &mut CallbackChain, log: &Log, name: &'static str, halt: bool) {
        let log = log.clone();
        chain.before(move |_: &mut Composer| {
            log.lock().push(name.into());
            if halt {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
    }

    fn after(chain: &mut CallbackChain, log: &Log, name: &'static str) {
        let log = log.clone();
        chain.after(move |_: &mut Composer| log.lock().push(name.into()));
    }

    fn around(chain: &mut CallbackChain, log: &Log, name: &'static str) {
        let log = log.clone();
        chain.around(move |composer, next| {
            let log = log.clone();
            Box::pin(async move {
                log.lock().push(format!("{name}:in"));
                let result = next.run(composer).await;
                log.lock().push(format!("{name}:out"));
                result
            })
        });
    }

    #[tokio::test]
    async fn runs_in_order() {
        let log = Log::default();
        let mut chain = CallbackChain::new();
        before(&mut chain, &log, "b1", false);
        before(&mut chain, &log, "b2", false);
        around(&mut chain, &log, "outer");
        around(&mut chain, &log, "inner");
        after(&mut chain, &log, "a1");
        after(&mut chain, &log, "a2");

        let step = RecordingStep {
            log: log.clone(),
            fail: false,
        };
        let outcome = chain
            .run(&mut composer(), &step, &RescueHandlers::new())
            .await
            .unwrap();

        assert_eq!(outcome, ChainOutcome::Completed);
        assert_eq!(
            *log.lock(),
            vec!["b1", "b2", "outer:in", "inner:in", "deliver", "inner:out", "outer:out", "a1", "a2"]
        );
    }

    #[tokio::test]
    async fn halting_skips_delivery_and_afters() {
        let log = Log::default();
        let mut chain = CallbackChain::new();
        before(&mut chain, &log, "b1", true);
        before(&mut chain, &log, "b2", false);
        around(&mut chain, &log, "around");
        after(&mut chain, &log, "a1");

        let step = RecordingStep {
            log: log.clone(),
            fail: false,
        };
        let outcome = chain
            .run(&mut composer(), &step, &RescueHandlers::new())
            .await
            .unwrap();

        assert_eq!(outcome, ChainOutcome::Aborted);
        assert_eq!(*log.lock(), vec!["b1"]);
    }

    #[tokio::test]
    async fn afters_run_before_unrescued_error_propagates() {
        let log = Log::default();
        let mut chain = CallbackChain::new();
        after(&mut chain, &log, "a1");

        let step = RecordingStep {
            log: log.clone(),
            fail: true,
        };
        let err = chain
            .run(&mut composer(), &step, &RescueHandlers::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(*log.lock(), vec!["deliver", "a1"]);
    }

    #[tokio::test]
    async fn rescue_wraps_arounds() {
        let log = Log::default();
        let mut chain = CallbackChain::new();
        around(&mut chain, &log, "around");
        after(&mut chain, &log, "a1");

        let mut rescue = RescueHandlers::new();
        let rescue_log = log.clone();
        rescue.add(ErrorKind::Transport, move |err: &MailError, _: &mut Composer| {
            rescue_log.lock().push(format!("rescued: {err}"));
            Rescue::Handled
        });

        let step = RecordingStep {
            log: log.clone(),
            fail: true,
        };
        let outcome = chain.run(&mut composer(), &step, &rescue).await.unwrap();

        assert_eq!(outcome, ChainOutcome::Completed);
        assert_eq!(
            *log.lock(),
            vec![
                "around:in",
                "deliver",
                "around:out",
                "rescued: delivery failed: refused",
                "a1"
            ]
        );
    }

    #[test]
    fn latest_matching_handler_wins() {
        let log = Log::default();
        let mut rescue = RescueHandlers::new();
        for (name, verdict) in [("first", Rescue::Handled), ("second", Rescue::Unhandled)] {
            let log = log.clone();
            rescue.add(ErrorKind::Action, move |_: &MailError, _: &mut Composer| {
                log.lock().push(name.into());
                verdict
            });
        }

        let mut composer = composer();
        let result = rescue.handle(MailError::action(anyhow::anyhow!("boom")), &mut composer);
        assert!(result.is_ok());
        assert_eq!(*log.lock(), vec!["second", "first"]);

        let result = rescue.handle(MailError::NoFormats, &mut composer);
        assert!(matches!(result, Err(MailError::NoFormats)));
    }
}
