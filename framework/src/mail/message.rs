//! Message and part types.

use std::fmt;
use std::sync::Arc;

use super::delivery::DeliveryMethod;
use super::headers::{HeaderMap, HeaderValue};

/// A parsed `Content-Type`: the MIME type plus its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    mime: String,
    params: Vec<(String, String)>,
}

impl ContentType {
    pub fn new(mime: impl Into<String>) -> Self {
        Self {
            mime: mime.into().trim().to_ascii_lowercase(),
            params: Vec::new(),
        }
    }

    /// Parse `type/subtype; key=value; ...`. Quotes around values are removed.
    pub fn parse(value: &str) -> Self {
        let mut pieces = value.split(';');
        let mut content_type = ContentType::new(pieces.next().unwrap_or_default());
        for piece in pieces {
            if let Some((key, val)) = piece.split_once('=') {
                content_type.set_param(key.trim(), val.trim().trim_matches('"'));
            }
        }
        content_type
    }

    pub fn multipart(subtype: &str) -> Self {
        Self::new(format!("multipart/{subtype}"))
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn is_multipart(&self) -> bool {
        self.mime.starts_with("multipart/")
    }

    pub fn is_text(&self) -> bool {
        self.mime.starts_with("text/")
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_param(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.params.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            Some(param) => param.1 = value,
            None => self.params.push((name.to_ascii_lowercase(), value)),
        }
    }

    pub fn remove_param(&mut self, name: &str) {
        self.params.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mime)?;
        for (key, value) in &self.params {
            if value.chars().any(|c| c.is_whitespace() || "()<>@,;:\\\"/[]?=".contains(c)) {
                write!(f, "; {key}=\"{value}\"")?;
            } else {
                write!(f, "; {key}={value}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Inline,
    Attachment,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Inline => write!(f, "inline"),
            Disposition::Attachment => write!(f, "attachment"),
        }
    }
}

/// Either raw content or nested parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Body {
    #[default]
    Empty,
    Content(Vec<u8>),
    Multipart(Vec<Part>),
}

impl Body {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Body::Content(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    pub fn parts(&self) -> &[Part] {
        match self {
            Body::Multipart(parts) => parts,
            _ => &[],
        }
    }
}

/// A node of a multipart message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub(crate) content_type: ContentType,
    pub(crate) charset: Option<String>,
    pub(crate) disposition: Option<Disposition>,
    pub(crate) filename: Option<String>,
    pub(crate) content_id: Option<String>,
    pub(crate) transfer_encoding: Option<String>,
    pub(crate) body: Body,
}

impl Part {
    /// A leaf part holding `body`.
    pub fn new(content_type: ContentType, body: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type,
            charset: None,
            disposition: None,
            filename: None,
            content_id: None,
            transfer_encoding: None,
            body: Body::Content(body.into()),
        }
    }

    /// A `multipart/<subtype>` container.
    pub fn multipart(subtype: &str, parts: Vec<Part>) -> Self {
        Self {
            content_type: ContentType::multipart(subtype),
            charset: None,
            disposition: None,
            filename: None,
            content_id: None,
            transfer_encoding: None,
            body: Body::Multipart(parts),
        }
    }

    pub fn content_type(&self) -> &ContentType {
        &self.content_type
    }

    pub fn mime(&self) -> &str {
        self.content_type.mime()
    }

    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    pub fn disposition(&self) -> Option<Disposition> {
        self.disposition
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn content_id(&self) -> Option<&str> {
        self.content_id.as_deref()
    }

    pub fn transfer_encoding(&self) -> Option<&str> {
        self.transfer_encoding.as_deref()
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_text(&self) -> Option<&str> {
        self.body.as_text()
    }

    pub fn parts(&self) -> &[Part] {
        self.body.parts()
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self.body, Body::Multipart(_))
    }

    pub fn is_attachment(&self) -> bool {
        self.disposition == Some(Disposition::Attachment)
            || (self.disposition == Some(Disposition::Inline) && self.filename.is_some())
    }

    pub fn is_inline_attachment(&self) -> bool {
        self.is_attachment() && self.disposition == Some(Disposition::Inline)
    }

    pub(crate) fn collect_attachments<'a>(&'a self, out: &mut Vec<&'a Part>) {
        if self.is_attachment() {
            out.push(self);
        }
        for part in self.parts() {
            part.collect_attachments(out);
        }
    }
}

/// The transport a message is handed to and the flags that govern the call.
#[derive(Clone)]
pub struct Delivery {
    pub(crate) handler: Option<Arc<dyn DeliveryMethod>>,
    pub(crate) method_name: Option<String>,
    pub(crate) perform_deliveries: bool,
    pub(crate) raise_delivery_errors: bool,
}

impl Default for Delivery {
    fn default() -> Self {
        Self {
            handler: None,
            method_name: None,
            perform_deliveries: true,
            raise_delivery_errors: true,
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("method", &self.method_name)
            .field("has_handler", &self.handler.is_some())
            .field("perform_deliveries", &self.perform_deliveries)
            .field("raise_delivery_errors", &self.raise_delivery_errors)
            .finish()
    }
}

/// A composed email: header fields plus a single body or a tree of parts.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub(crate) headers: HeaderMap,
    pub(crate) content_type: Option<ContentType>,
    pub(crate) charset: Option<String>,
    pub(crate) mime_version: Option<String>,
    pub(crate) body: Body,
    pub(crate) boundary: Option<String>,
    pub(crate) parts_order: Vec<String>,
    pub(crate) delivery: Delivery,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header access for interceptors.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    fn addresses(&self, name: &str) -> Vec<String> {
        self.headers
            .get(name)
            .map(HeaderValue::to_list)
            .unwrap_or_default()
    }

    pub fn from(&self) -> Vec<String> {
        self.addresses("from")
    }

    pub fn to(&self) -> Vec<String> {
        self.addresses("to")
    }

    pub fn cc(&self) -> Vec<String> {
        self.addresses("cc")
    }

    pub fn bcc(&self) -> Vec<String> {
        self.addresses("bcc")
    }

    pub fn subject(&self) -> Option<&str> {
        self.headers.get("subject").and_then(HeaderValue::as_text)
    }

    pub fn set_subject(&mut self, subject: impl Into<String>) {
        self.headers.insert("Subject", subject.into());
    }

    pub fn content_type(&self) -> Option<&ContentType> {
        self.content_type.as_ref()
    }

    pub fn mime(&self) -> Option<&str> {
        self.content_type.as_ref().map(ContentType::mime)
    }

    /// Replacing the content type drops its parameters; the charset is kept
    /// separately and reapplied when the message is rendered.
    pub(crate) fn set_content_type(&mut self, content_type: ContentType) {
        self.content_type = Some(content_type);
    }

    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    pub(crate) fn set_charset(&mut self, charset: impl Into<String>) {
        let charset = charset.into();
        if let Some(content_type) = self.content_type.as_mut() {
            if content_type.is_text() {
                content_type.set_param("charset", charset.clone());
            } else {
                content_type.remove_param("charset");
            }
        }
        self.charset = Some(charset);
    }

    pub fn mime_version(&self) -> Option<&str> {
        self.mime_version.as_deref()
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_text(&self) -> Option<&str> {
        self.body.as_text()
    }

    pub fn parts(&self) -> &[Part] {
        self.body.parts()
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self.body, Body::Multipart(_))
    }

    pub fn boundary(&self) -> Option<&str> {
        self.boundary.as_deref()
    }

    pub fn parts_order(&self) -> &[String] {
        &self.parts_order
    }

    /// Every attachment part, searched recursively.
    pub fn attachments(&self) -> Vec<&Part> {
        let mut out = Vec::new();
        for part in self.parts() {
            part.collect_attachments(&mut out);
        }
        out
    }

    pub fn has_attachments(&self) -> bool {
        !self.attachments().is_empty()
    }

    pub fn delivery_method(&self) -> Option<&Arc<dyn DeliveryMethod>> {
        self.delivery.handler.as_ref()
    }

    /// Symbolic name of the delivery method, when it was resolved by name.
    pub fn delivery_method_name(&self) -> Option<&str> {
        self.delivery.method_name.as_deref()
    }

    pub fn perform_deliveries(&self) -> bool {
        self.delivery.perform_deliveries
    }

    pub fn raise_delivery_errors(&self) -> bool {
        self.delivery.raise_delivery_errors
    }

    /// A copy without the transport handle, for recording delivered mail.
    pub fn detached(&self) -> Message {
        Message {
            delivery: Delivery {
                handler: None,
                ..self.delivery.clone()
            },
            ..self.clone()
        }
    }
}

/// Two messages are equal when their headers and content match; boundaries
/// and the delivery handle are not compared.
impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.headers == other.headers
            && self.content_type == other.content_type
            && self.charset == other.charset
            && self.mime_version == other.mime_version
            && self.body == other.body
            && self.parts_order == other.parts_order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_content_type() {
        let ct = ContentType::parse("Text/HTML; charset=\"ISO-8859-1\"; format=flowed");
        assert_eq!(ct.mime(), "text/html");
        assert_eq!(ct.param("Charset"), Some("ISO-8859-1"));
        assert_eq!(ct.param("format"), Some("flowed"));
        assert_eq!(ct.to_string(), "text/html; charset=ISO-8859-1; format=flowed");
    }

    #[test]
    fn quotes_special_params() {
        let mut ct = ContentType::multipart("mixed");
        ct.set_param("boundary", "--==_mimepart_abc");
        assert_eq!(ct.to_string(), "multipart/mixed; boundary=\"--==_mimepart_abc\"");
    }

    #[test]
    fn charset_follows_text_types() {
        let mut message = Message::new();
        message.set_content_type(ContentType::new("text/plain"));
        message.set_charset("UTF-8");
        assert_eq!(message.content_type().unwrap().param("charset"), Some("UTF-8"));

        message.set_content_type(ContentType::multipart("alternative"));
        message.set_charset("UTF-8");
        assert_eq!(message.content_type().unwrap().param("charset"), None);
        assert_eq!(message.charset(), Some("UTF-8"));
    }

    #[test]
    fn finds_nested_attachments() {
        let mut attachment = Part::new(ContentType::new("application/pdf"), b"%PDF".to_vec());
        attachment.disposition = Some(Disposition::Attachment);
        attachment.filename = Some("invoice.pdf".into());

        let related = Part::multipart(
            "related",
            vec![Part::new(ContentType::new("text/html"), "<p>Hi</p>"), attachment],
        );

        let message = Message {
            body: Body::Multipart(vec![related]),
            ..Message::default()
        };
        let attachments = message.attachments();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].filename(), Some("invoice.pdf"));
    }

    #[test]
    fn address_fields_are_lists() {
        let mut message = Message::new();
        message.headers_mut().insert("to", vec!["a@x.com", "b@x.com"]);
        message.headers_mut().insert("from", "me@x.com");
        assert_eq!(message.to(), vec!["a@x.com", "b@x.com"]);
        assert_eq!(message.from(), vec!["me@x.com"]);
        assert!(message.cc().is_empty());
    }
}
