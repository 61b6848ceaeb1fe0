//! Class-level header defaults.

use std::fmt;
use std::sync::Arc;

use heck::ToSnakeCase;

use serde_json::Value;

use super::composer::Composer;
use super::delivery::Settings;
use super::headers::{same_name, HeaderMap, HeaderValue};

type Producer = Arc<dyn Fn(&Composer) -> HeaderValue + Send + Sync>;

/// A default header value: fixed, or produced per composition.
#[derive(Clone)]
pub enum DefaultValue {
    Static(HeaderValue),
    Producer(Producer),
}

impl DefaultValue {
    /// A value computed fresh for each composition.
    pub fn lazy<F, V>(produce: F) -> Self
    where
        F: Fn() -> V + Send + Sync + 'static,
        V: Into<HeaderValue>,
    {
        DefaultValue::Producer(Arc::new(move |_| produce().into()))
    }

    /// A value computed from the mailer instance being composed.
    pub fn with_mailer<F, V>(produce: F) -> Self
    where
        F: Fn(&Composer) -> V + Send + Sync + 'static,
        V: Into<HeaderValue>,
    {
        DefaultValue::Producer(Arc::new(move |composer| produce(composer).into()))
    }

    fn evaluate(&self, composer: &Composer) -> HeaderValue {
        match self {
            DefaultValue::Static(value) => value.clone(),
            DefaultValue::Producer(produce) => produce(composer),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Static(value) => f.debug_tuple("Static").field(value).finish(),
            DefaultValue::Producer(_) => f.write_str("Producer(..)"),
        }
    }
}

impl From<HeaderValue> for DefaultValue {
    fn from(value: HeaderValue) -> Self {
        DefaultValue::Static(value)
    }
}

impl From<&str> for DefaultValue {
    fn from(value: &str) -> Self {
        DefaultValue::Static(value.into())
    }
}

impl From<String> for DefaultValue {
    fn from(value: String) -> Self {
        DefaultValue::Static(value.into())
    }
}

impl From<Vec<&str>> for DefaultValue {
    fn from(value: Vec<&str>) -> Self {
        DefaultValue::Static(value.into())
    }
}

impl From<Vec<String>> for DefaultValue {
    fn from(value: Vec<String>) -> Self {
        DefaultValue::Static(value.into())
    }
}

/// Delivery method settings, kept as JSON text until composition.
impl From<Settings> for DefaultValue {
    fn from(value: Settings) -> Self {
        DefaultValue::Static(Value::Object(value).to_string().into())
    }
}

/// Ordered header name -> default value.
#[derive(Clone, Debug, Default)]
pub struct HeaderDefaults {
    entries: Vec<(String, DefaultValue)>,
}

impl HeaderDefaults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults every mailer starts from.
    pub fn builtin() -> Self {
        let mut defaults = Self::new();
        defaults.set("mime_version", "1.0");
        defaults.set("charset", "UTF-8");
        defaults.set("content_type", "text/plain");
        defaults.set(
            "parts_order",
            vec!["text/plain", "text/enriched", "text/html"],
        );
        defaults
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<DefaultValue>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| same_name(n, &name)) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&DefaultValue> {
        self.entries
            .iter()
            .find(|(n, _)| same_name(n, name))
            .map(|(_, v)| v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `self` layered over `parent`; entries from `self` win.
    pub fn merged_over(&self, parent: &HeaderDefaults) -> HeaderDefaults {
        let mut merged = parent.clone();
        for (name, value) in &self.entries {
            merged.set(name.clone(), value.clone());
        }
        merged
    }

    /// Evaluate every entry once in the context of `composer`.
    pub fn evaluate(&self, composer: &Composer) -> HeaderMap {
        self.entries
            .iter()
            .map(|(name, value)| (name.clone(), value.evaluate(composer)))
            .collect()
    }
}

/// `welcome_email` -> `Welcome email`.
pub fn humanize(action: &str) -> String {
    let words = action.to_snake_case().replace('_', " ");
    let mut chars = words.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
