use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::job::HasMailers;
use super::MailerClass;

/// Mailer classes by name. Deferred deliveries find their mailer here when a
/// worker replays them.
#[derive(Clone, Default)]
pub struct Mailers {
    classes: Arc<RwLock<HashMap<String, Arc<MailerClass>>>>,
}

impl Mailers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `class` under its name, replacing any class of the same name.
    pub fn register(&self, class: &Arc<MailerClass>) -> &Self {
        self.classes
            .write()
            .insert(class.name().to_string(), class.clone());
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<MailerClass>> {
        self.classes.read().get(name).cloned()
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<MailerClass>> {
        self.classes.write().remove(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.classes.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.classes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.read().is_empty()
    }
}

impl HasMailers for Mailers {
    fn mailers(&self) -> &Mailers {
        self
    }
}

impl std::fmt::Debug for Mailers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Mailers").field(&self.names()).finish()
    }
}
