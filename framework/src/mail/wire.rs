//! Conversion of a [`Message`] into a `lettre` email and its SMTP envelope.
//!
//! Header encoding, folding, boundaries and transfer encodings are left to
//! lettre's builder.

use std::time::SystemTime;

use lettre::address::Envelope;
use lettre::message::header::{
    self, ContentDisposition, ContentTransferEncoding, HeaderName, HeaderValue,
};
use lettre::message::{Mailbox, MessageBuilder, MultiPart, SinglePart};
use lettre::Address;
use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;

use super::headers::{canonical_name, is_address_field, key};
use super::message::{Body, ContentType, Disposition, Message, Part};
use super::MailError;

/// Header names set through typed builder calls or derived from the body.
const BUILT_IN: [&str; 8] = [
    "date",
    "message_id",
    "subject",
    "mime_version",
    "content_type",
    "content_transfer_encoding",
    "content_disposition",
    "content_id",
];

enum Node {
    Single(SinglePart),
    Multi(MultiPart),
}

impl Message {
    /// Build the `lettre` email handed to the transports. `Bcc` recipients
    /// stay in the envelope but are not written as a header.
    pub fn to_email(&self) -> Result<lettre::Message, MailError> {
        let mut builder = lettre::Message::builder().envelope(self.envelope()?);
        builder = self.apply_headers(builder)?;

        let email = match &self.body {
            Body::Multipart(parts) => {
                let subtype = self
                    .content_type()
                    .map(|ct| ct.mime().trim_start_matches("multipart/"))
                    .unwrap_or("mixed");
                builder.multipart(multipart(subtype, parts, self.boundary())?)
            }
            Body::Content(bytes) => {
                builder.singlepart(single(&self.leaf_content_type(), bytes.clone())?)
            }
            Body::Empty => builder.singlepart(single(&self.leaf_content_type(), Vec::new())?),
        };
        email.map_err(|e| MailError::Build(e.to_string()))
    }

    /// The message as it goes on the wire.
    pub fn formatted(&self) -> Result<Vec<u8>, MailError> {
        Ok(self.to_email()?.formatted())
    }

    /// Envelope sender (`Sender`, else the first `From`) and recipients
    /// (`To`, `Cc` and `Bcc`).
    pub fn envelope(&self) -> Result<Envelope, MailError> {
        let sender = self
            .headers
            .get("sender")
            .or_else(|| self.headers.get("from"))
            .and_then(|value| value.to_list().into_iter().next())
            .map(|addr| mailbox(&addr).map(|mailbox| mailbox.email))
            .transpose()?;

        let mut recipients: Vec<Address> = Vec::new();
        for addr in self.to().into_iter().chain(self.cc()).chain(self.bcc()) {
            let address = mailbox(&addr)?.email;
            if !recipients.contains(&address) {
                recipients.push(address);
            }
        }

        Envelope::new(sender, recipients).map_err(|e| MailError::InvalidAddress(e.to_string()))
    }

    fn leaf_content_type(&self) -> ContentType {
        let mut content_type = self
            .content_type()
            .cloned()
            .unwrap_or_else(|| ContentType::new("text/plain"));
        if let (true, Some(charset)) = (content_type.is_text(), self.charset()) {
            content_type.set_param("charset", charset);
        }
        content_type
    }

    fn apply_headers(&self, mut builder: MessageBuilder) -> Result<MessageBuilder, MailError> {
        builder = match self.headers.get("date").map(|value| value.joined()) {
            Some(date) => {
                let parsed = OffsetDateTime::parse(date.trim(), &Rfc2822)
                    .map_err(|_| MailError::InvalidHeader(format!("Date: {date}")))?;
                builder.date(SystemTime::from(parsed))
            }
            None => builder.date_now(),
        };
        builder = builder.message_id(self.headers.get("message_id").map(|value| value.joined()));
        if let Some(subject) = self.headers.get("subject") {
            builder = builder.subject(subject.joined());
        }

        for (name, value) in self.headers.iter() {
            let field = key(name);
            if BUILT_IN.contains(&field.as_str()) {
                continue;
            }
            if is_address_field(name) {
                for addr in value.to_list() {
                    let mbox = mailbox(&addr)?;
                    builder = match field.as_str() {
                        "from" => builder.from(mbox),
                        "to" => builder.to(mbox),
                        "cc" => builder.cc(mbox),
                        "reply_to" => builder.reply_to(mbox),
                        "sender" => builder.sender(mbox),
                        _ => builder,
                    };
                }
                continue;
            }
            let header_name = HeaderName::new_from_ascii(canonical_name(name))
                .map_err(|_| MailError::InvalidHeader(name.to_string()))?;
            builder = builder.raw_header(HeaderValue::new(header_name, value.joined()));
        }
        Ok(builder)
    }
}

fn mailbox(value: &str) -> Result<Mailbox, MailError> {
    value
        .parse::<Mailbox>()
        .map_err(|_| MailError::InvalidAddress(value.to_string()))
}

fn content_type_header(content_type: &ContentType) -> Result<header::ContentType, MailError> {
    let rendered = content_type.to_string();
    header::ContentType::parse(&rendered)
        .map_err(|_| MailError::Build(format!("content type {rendered:?}")))
}

fn single(content_type: &ContentType, body: Vec<u8>) -> Result<SinglePart, MailError> {
    Ok(SinglePart::builder()
        .header(content_type_header(content_type)?)
        .body(body))
}

fn multipart(subtype: &str, parts: &[Part], boundary: Option<&str>) -> Result<MultiPart, MailError> {
    let mut builder = match subtype {
        "alternative" => MultiPart::alternative(),
        "related" => MultiPart::related(),
        _ => MultiPart::mixed(),
    };
    if let Some(boundary) = boundary {
        builder = builder.boundary(boundary);
    }

    let mut multipart = builder.build();
    for part in parts {
        multipart = match node(part)? {
            Node::Single(single) => multipart.singlepart(single),
            Node::Multi(nested) => multipart.multipart(nested),
        };
    }
    Ok(multipart)
}

fn node(part: &Part) -> Result<Node, MailError> {
    let bytes = match part.body() {
        Body::Multipart(children) => {
            let subtype = part.mime().trim_start_matches("multipart/");
            return Ok(Node::Multi(multipart(subtype, children, None)?));
        }
        Body::Content(bytes) => bytes.clone(),
        Body::Empty => Vec::new(),
    };

    let mut content_type = part.content_type().clone();
    if let (true, Some(charset)) = (content_type.is_text(), part.charset()) {
        content_type.set_param("charset", charset);
    }

    let mut builder = SinglePart::builder().header(content_type_header(&content_type)?);
    match part.transfer_encoding().map(str::to_ascii_lowercase).as_deref() {
        Some("base64") => builder = builder.header(ContentTransferEncoding::Base64),
        Some("quoted-printable") => {
            builder = builder.header(ContentTransferEncoding::QuotedPrintable)
        }
        _ => {}
    }
    match (part.disposition(), part.filename()) {
        (Some(Disposition::Attachment), Some(filename)) => {
            builder = builder.header(ContentDisposition::attachment(filename))
        }
        (Some(Disposition::Inline), _) => builder = builder.header(ContentDisposition::inline()),
        _ => {}
    }
    if let Some(cid) = part.content_id() {
        builder = builder.header(header::ContentId::from(format!("<{cid}>")));
    }
    Ok(Node::Single(builder.body(bytes)))
}
