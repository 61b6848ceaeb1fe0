//! Turning rendered fragments and attachments into a message body.

use uuid::Uuid;

use super::attachments::Attachments;
use super::collector::Fragment;
use super::message::{Body, ContentType, Message, Part};

/// Everything the assembler needs besides the message itself.
pub(crate) struct Assembly<'a> {
    pub fragments: Vec<Fragment>,
    pub attachments: &'a Attachments,
    /// Content type given at the call site, if any.
    pub explicit_content_type: Option<&'a str>,
    /// The class default, used when nothing else decides.
    pub default_content_type: &'a str,
    pub charset: &'a str,
    pub parts_order: &'a [String],
}

/// Build the body of `message`, then settle its content type, charset,
/// part order and boundary.
pub(crate) fn assemble(message: &mut Message, assembly: Assembly<'_>) {
    let Assembly {
        fragments,
        attachments,
        explicit_content_type,
        default_content_type,
        charset,
        parts_order,
    } = assembly;

    let mut parts: Vec<Part> = attachments.iter().map(|a| a.to_part()).collect();
    let has_attachments = !parts.is_empty();

    if fragments.len() == 1 && !has_attachments {
        if let Some(fragment) = fragments.into_iter().next() {
            message.set_content_type(ContentType::parse(&fragment.content_type));
            message.body = Body::Content(fragment.body.into_bytes());
        }
    } else if fragments.len() > 1 && has_attachments {
        let alternatives = fragments
            .into_iter()
            .map(|f| fragment_part(f, charset))
            .collect();
        parts.push(Part::multipart("alternative", alternatives));
        message.body = Body::Multipart(parts);
    } else {
        parts.extend(fragments.into_iter().map(|f| fragment_part(f, charset)));
        message.body = Body::Multipart(parts);
    }

    wrap_inline_attachments(message);

    let content_type = resolve_content_type(message, explicit_content_type, default_content_type);
    message.set_content_type(content_type);
    message.set_charset(charset);

    if message.is_multipart() {
        message.parts_order = parts_order.to_vec();
        if let Body::Multipart(parts) = &mut message.body {
            sort_parts(parts, parts_order);
        }
        message.boundary = Some(generate_boundary());
    }
}

fn fragment_part(fragment: Fragment, charset: &str) -> Part {
    let content_type = ContentType::parse(&fragment.content_type);
    let is_text = content_type.is_text();
    let mut part = Part::new(content_type, fragment.body.into_bytes());
    if is_text {
        part.charset = Some(charset.to_string());
    }
    part
}

/// When inline and regular attachments are both present, move the body parts
/// and inline attachments into a `multipart/related` part so the regular
/// attachments stay at the top level.
pub(crate) fn wrap_inline_attachments(message: &mut Message) {
    let attachments = message.attachments();
    let any_inline = attachments.iter().any(|p| p.is_inline_attachment());
    let any_regular = attachments.iter().any(|p| !p.is_inline_attachment());
    if !(any_inline && any_regular) {
        return;
    }

    let Body::Multipart(parts) = &mut message.body else {
        return;
    };
    let (regular, related): (Vec<Part>, Vec<Part>) = std::mem::take(parts)
        .into_iter()
        .partition(|p| p.is_attachment() && !p.is_inline_attachment());

    parts.push(Part::multipart("related", related));
    parts.extend(regular);
}

/// The call-site content type wins. Otherwise attachments decide between
/// `related` (all inline) and `mixed`, a bare multipart is `alternative`, and
/// a single body keeps its own type, falling back to the class default.
pub(crate) fn resolve_content_type(
    message: &Message,
    explicit: Option<&str>,
    default: &str,
) -> ContentType {
    if let Some(explicit) = explicit.filter(|ct| !ct.trim().is_empty()) {
        return ContentType::parse(explicit);
    }

    let attachments = message.attachments();
    if !attachments.is_empty() {
        if attachments.iter().all(|p| p.is_inline_attachment()) {
            ContentType::multipart("related")
        } else {
            ContentType::multipart("mixed")
        }
    } else if message.is_multipart() {
        ContentType::multipart("alternative")
    } else {
        message
            .content_type()
            .map(|ct| ContentType::new(ct.mime()))
            .unwrap_or_else(|| ContentType::parse(default))
    }
}

/// Stable sort by (is attachment, position in `order`), recursing into
/// nested containers. Types missing from `order` keep their relative order
/// after the listed ones.
pub(crate) fn sort_parts(parts: &mut [Part], order: &[String]) {
    for part in parts.iter_mut() {
        if let Body::Multipart(children) = &mut part.body {
            sort_parts(children, order);
        }
    }
    parts.sort_by_key(|part| {
        let rank = order
            .iter()
            .position(|mime| mime.eq_ignore_ascii_case(part.mime()))
            .unwrap_or(usize::MAX);
        (part.is_attachment(), rank)
    });
}

fn generate_boundary() -> String {
    format!("--==_mimepart_{}", Uuid::new_v4().simple())
}
