//! Template lookup and default-subject translation seams.
//!
//! The pipeline only needs to find the templates of an action and render
//! them into a body plus content type; any engine can sit behind
//! [`TemplateRenderer`]. [`MemoryTemplates`] is a closure-backed renderer
//! for tests and small applications.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::MailError;

/// A template found for an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateDescriptor {
    pub path: String,
    pub name: String,
    /// `text`, `html`, or a MIME type such as `text/calendar`.
    pub format: String,
}

impl TemplateDescriptor {
    pub fn content_type(&self) -> String {
        format_content_type(&self.format)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub body: String,
    pub content_type: String,
}

/// What a template can see of the mailer instance rendering it.
pub struct RenderContext<'a> {
    pub mailer: &'a str,
    pub action: &'a str,
    pub params: &'a Map<String, Value>,
    pub assigns: &'a Map<String, Value>,
}

impl RenderContext<'_> {
    /// Look up an assign, then a param, as a display string.
    pub fn get(&self, key: &str) -> Option<String> {
        self.assigns
            .get(key)
            .or_else(|| self.params.get(key))
            .map(|value| match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
    }
}

pub trait TemplateRenderer: Send + Sync {
    /// Templates for `name` under `path`, in discovery order.
    fn find_templates(&self, path: &str, name: &str) -> Vec<TemplateDescriptor>;

    fn render(
        &self,
        template: &TemplateDescriptor,
        ctx: &RenderContext<'_>,
    ) -> Result<Rendered, MailError>;
}

/// MIME type for a format name.
pub fn format_content_type(format: &str) -> String {
    match format {
        "text" => "text/plain".to_string(),
        "html" => "text/html".to_string(),
        other if other.contains('/') => other.to_ascii_lowercase(),
        other => format!("application/{other}"),
    }
}

type TemplateFn = Arc<dyn Fn(&RenderContext<'_>) -> String + Send + Sync>;

/// Templates registered as closures.
///
/// ```ignore
/// let templates = MemoryTemplates::new()
///     .add("user_mailer", "welcome", "text", |ctx| {
///         format!("Welcome, {}!", ctx.get("name").unwrap_or_default())
///     });
/// ```
#[derive(Clone, Default)]
pub struct MemoryTemplates {
    templates: Vec<(TemplateDescriptor, TemplateFn)>,
}

impl MemoryTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(mut self, path: &str, name: &str, format: &str, render: F) -> Self
    where
        F: Fn(&RenderContext<'_>) -> String + Send + Sync + 'static,
    {
        let descriptor = TemplateDescriptor {
            path: path.to_string(),
            name: name.to_string(),
            format: format.to_string(),
        };
        self.templates.push((descriptor, Arc::new(render)));
        self
    }
}

impl TemplateRenderer for MemoryTemplates {
    fn find_templates(&self, path: &str, name: &str) -> Vec<TemplateDescriptor> {
        self.templates
            .iter()
            .filter(|(t, _)| t.path == path && t.name == name)
            .map(|(t, _)| t.clone())
            .collect()
    }

    fn render(
        &self,
        template: &TemplateDescriptor,
        ctx: &RenderContext<'_>,
    ) -> Result<Rendered, MailError> {
        let (descriptor, render) = self
            .templates
            .iter()
            .find(|(t, _)| t == template)
            .ok_or_else(|| MailError::MissingTemplate {
                path: template.path.clone(),
                name: template.name.clone(),
                format: Some(template.format.clone()),
            })?;
        Ok(Rendered {
            body: render(ctx),
            content_type: descriptor.content_type(),
        })
    }
}

/// Translation lookup used for default subjects.
pub trait Translator: Send + Sync {
    fn translate(&self, scope: &str, key: &str, default: &str) -> String;
}

/// Always returns the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTranslations;

impl Translator for NoTranslations {
    fn translate(&self, _scope: &str, _key: &str, default: &str) -> String {
        default.to_string()
    }
}

/// Translations keyed by `"{scope}.{key}"`.
#[derive(Debug, Clone, Default)]
pub struct MemoryTranslations {
    entries: HashMap<String, String>,
}

impl MemoryTranslations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, path: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(path.into(), value.into());
        self
    }
}

impl Translator for MemoryTranslations {
    fn translate(&self, scope: &str, key: &str, default: &str) -> String {
        self.entries
            .get(&format!("{scope}.{key}"))
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }
}
