use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{DeliveryMethod, Settings};
use crate::mail::{BoxError, MailError, Message};

/// Messages recorded by the `test` delivery method.
#[derive(Clone, Debug, Default)]
pub struct Deliveries {
    inner: Arc<Mutex<Vec<Message>>>,
}

impl Deliveries {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, message: Message) {
        self.inner.lock().push(message);
    }

    pub fn all(&self) -> Vec<Message> {
        self.inner.lock().clone()
    }

    pub fn last(&self) -> Option<Message> {
        self.inner.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Drain every recorded message.
    pub fn take(&self) -> Vec<Message> {
        std::mem::take(&mut *self.inner.lock())
    }
}

/// The store behind the built-in `test` delivery method.
pub fn deliveries() -> &'static Deliveries {
    static DELIVERIES: OnceLock<Deliveries> = OnceLock::new();
    DELIVERIES.get_or_init(Deliveries::new)
}

/// Records messages instead of sending them. Like a real transport, it
/// refuses messages without a sender or recipients.
#[derive(Clone, Debug)]
pub struct TestDelivery {
    deliveries: Deliveries,
}

impl TestDelivery {
    pub fn new(deliveries: Deliveries) -> Self {
        Self { deliveries }
    }

    /// A constructor recording into `deliveries`, for registering a `test`
    /// method with its own store.
    pub fn constructor(
        deliveries: Deliveries,
    ) -> impl Fn(&Settings) -> Result<Arc<dyn DeliveryMethod>, MailError> + Send + Sync + 'static
    {
        move |_settings: &Settings| {
            Ok(Arc::new(TestDelivery::new(deliveries.clone())) as Arc<dyn DeliveryMethod>)
        }
    }
}

#[async_trait]
impl DeliveryMethod for TestDelivery {
    async fn deliver(&self, message: &Message) -> Result<(), BoxError> {
        let envelope = message.envelope()?;
        if envelope.from().is_none() {
            return Err(MailError::InvalidAddress("missing sender".to_string()).into());
        }
        self.deliveries.push(message.detached());
        Ok(())
    }
}
