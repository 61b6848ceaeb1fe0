//! Observers and interceptors fired around the transport call.

use std::fmt;
use std::sync::Arc;

use super::Message;

/// Told about every message after the transport accepted it.
pub trait Observer: Send + Sync + 'static {
    fn delivered(&self, message: &Message);
}

/// Sees every message right before the transport call and may change it.
pub trait Interceptor: Send + Sync + 'static {
    fn delivering(&self, message: &mut Message);
}

impl<F> Observer for F
where
    F: Fn(&Message) + Send + Sync + 'static,
{
    fn delivered(&self, message: &Message) {
        self(message)
    }
}

impl<F> Interceptor for F
where
    F: Fn(&mut Message) + Send + Sync + 'static,
{
    fn delivering(&self, message: &mut Message) {
        self(message)
    }
}

/// An ordered set of hooks, compared by identity.
pub struct Hooks<T: ?Sized> {
    items: Vec<Arc<T>>,
}

impl<T: ?Sized> Hooks<T> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Add a hook unless this exact instance is already registered.
    pub fn register(&mut self, hook: Arc<T>) {
        if !self.contains(&hook) {
            self.items.push(hook);
        }
    }

    /// Returns whether the hook was present.
    pub fn unregister(&mut self, hook: &Arc<T>) -> bool {
        let before = self.items.len();
        self.items
            .retain(|item| !std::ptr::addr_eq(Arc::as_ptr(item), Arc::as_ptr(hook)));
        self.items.len() != before
    }

    pub fn contains(&self, hook: &Arc<T>) -> bool {
        self.items
            .iter()
            .any(|item| std::ptr::addr_eq(Arc::as_ptr(item), Arc::as_ptr(hook)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: ?Sized> Clone for Hooks<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }
}

impl<T: ?Sized> Default for Hooks<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for Hooks<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks").field("len", &self.items.len()).finish()
    }
}

impl Hooks<dyn Observer> {
    pub(crate) fn inform(&self, message: &Message) {
        for observer in &self.items {
            observer.delivered(message);
        }
    }
}

impl Hooks<dyn Interceptor> {
    pub(crate) fn inform(&self, message: &mut Message) {
        for interceptor in &self.items {
            interceptor.delivering(message);
        }
    }
}
