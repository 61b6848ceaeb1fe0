//! Gathering rendered body fragments for a composition.

use super::template::{format_content_type, RenderContext, TemplateDescriptor, TemplateRenderer};
use super::MailError;

/// One rendered body: content type plus text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub content_type: String,
    pub body: String,
}

#[derive(Debug, Clone)]
struct FormatRequest {
    content_type: String,
    body: Option<String>,
}

/// Passed to the block of [`Composer::mail_with`](super::Composer::mail_with).
/// Each call adds one fragment; formats without an explicit body are rendered
/// from the action's templates.
#[derive(Debug, Default)]
pub struct FormatCollector {
    requests: Vec<FormatRequest>,
}

impl FormatCollector {
    fn request(&mut self, format: &str, body: Option<String>) -> &mut Self {
        self.requests.push(FormatRequest {
            content_type: format_content_type(format),
            body,
        });
        self
    }

    pub fn text(&mut self) -> &mut Self {
        self.request("text", None)
    }

    pub fn text_with(&mut self, body: impl Into<String>) -> &mut Self {
        self.request("text", Some(body.into()))
    }

    pub fn html(&mut self) -> &mut Self {
        self.request("html", None)
    }

    pub fn html_with(&mut self, body: impl Into<String>) -> &mut Self {
        self.request("html", Some(body.into()))
    }

    /// A format given by MIME type, e.g. `text/calendar`.
    pub fn custom(&mut self, mime: &str) -> &mut Self {
        self.request(mime, None)
    }

    pub fn custom_with(&mut self, mime: &str, body: impl Into<String>) -> &mut Self {
        self.request(mime, Some(body.into()))
    }

    /// Render every listed format from templates.
    pub fn any(&mut self, formats: &[&str]) -> Result<&mut Self, MailError> {
        if formats.is_empty() {
            return Err(MailError::NoFormats);
        }
        for format in formats {
            self.request(format, None);
        }
        Ok(self)
    }

    /// Use the same body for every listed format.
    pub fn any_with(
        &mut self,
        formats: &[&str],
        body: impl Into<String>,
    ) -> Result<&mut Self, MailError> {
        if formats.is_empty() {
            return Err(MailError::NoFormats);
        }
        let body = body.into();
        for format in formats {
            self.request(format, Some(body.clone()));
        }
        Ok(self)
    }

    pub fn all(&mut self, formats: &[&str]) -> Result<&mut Self, MailError> {
        self.any(formats)
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Where the templates of one composition live.
pub(crate) struct TemplateLookup<'a> {
    pub renderer: &'a dyn TemplateRenderer,
    pub path: &'a str,
    pub name: &'a str,
}

impl TemplateLookup<'_> {
    fn missing(&self, format: Option<String>) -> MailError {
        MailError::MissingTemplate {
            path: self.path.to_string(),
            name: self.name.to_string(),
            format,
        }
    }

    fn render(
        &self,
        template: &TemplateDescriptor,
        ctx: &RenderContext<'_>,
    ) -> Result<Fragment, MailError> {
        let rendered = self.renderer.render(template, ctx)?;
        Ok(Fragment {
            content_type: rendered.content_type,
            body: rendered.body,
        })
    }
}

/// Resolve the requests made inside a format block.
///
/// A block that requests no format fails with [`MailError::NoFormats`]; it
/// never falls back to template discovery.
pub(crate) fn collect_from_block(
    collector: FormatCollector,
    lookup: &TemplateLookup<'_>,
    ctx: &RenderContext<'_>,
) -> Result<Vec<Fragment>, MailError> {
    if collector.is_empty() {
        return Err(MailError::NoFormats);
    }
    let templates = lookup.renderer.find_templates(lookup.path, lookup.name);
    collector
        .requests
        .into_iter()
        .map(|request| match request.body {
            Some(body) => Ok(Fragment {
                content_type: request.content_type,
                body,
            }),
            None => {
                let template = templates
                    .iter()
                    .find(|t| t.content_type() == request.content_type)
                    .ok_or_else(|| lookup.missing(Some(request.content_type.clone())))?;
                lookup.render(template, ctx)
            }
        })
        .collect()
}

/// An explicit body becomes the only fragment.
pub(crate) fn collect_from_body(body: String, default_content_type: &str) -> Vec<Fragment> {
    vec![Fragment {
        content_type: default_content_type.to_string(),
        body,
    }]
}

/// Render every template of the action, one fragment per format.
pub(crate) fn collect_from_templates(
    lookup: &TemplateLookup<'_>,
    ctx: &RenderContext<'_>,
) -> Result<Vec<Fragment>, MailError> {
    let templates = lookup.renderer.find_templates(lookup.path, lookup.name);
    if templates.is_empty() {
        return Err(lookup.missing(None));
    }

    let mut seen: Vec<String> = Vec::with_capacity(templates.len());
    for template in &templates {
        let content_type = template.content_type();
        if seen.contains(&content_type) {
            return Err(MailError::AmbiguousTemplates {
                path: lookup.path.to_string(),
                name: lookup.name.to_string(),
                format: template.format.clone(),
            });
        }
        seen.push(content_type);
    }

    templates
        .iter()
        .map(|template| lookup.render(template, ctx))
        .collect()
}
