//! Attachments added by an action before it calls `mail`.

use uuid::Uuid;

use super::message::{ContentType, Disposition, Part};
use super::MailError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    filename: String,
    content_type: ContentType,
    content: Vec<u8>,
    inline: bool,
    content_id: Option<String>,
}

impl Attachment {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content_type(&self) -> &ContentType {
        &self.content_type
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn is_inline(&self) -> bool {
        self.inline
    }

    pub fn content_id(&self) -> Option<&str> {
        self.content_id.as_deref()
    }

    /// `cid:` URL to reference an inline attachment from an HTML body.
    pub fn url(&self) -> Option<String> {
        self.content_id.as_ref().map(|cid| format!("cid:{cid}"))
    }

    pub(crate) fn to_part(&self) -> Part {
        let mut part = Part::new(self.content_type.clone(), self.content.clone());
        part.filename = Some(self.filename.clone());
        part.content_id = self.content_id.clone();
        part.transfer_encoding = Some("base64".to_string());
        part.disposition = Some(if self.inline {
            Disposition::Inline
        } else {
            Disposition::Attachment
        });
        part
    }
}

/// Pending attachments of one composition. Frozen once `mail` runs.
#[derive(Debug, Clone, Default)]
pub struct Attachments {
    items: Vec<Attachment>,
    frozen: bool,
}

impl Attachments {
    /// Attach a file, sniffing its content type from the bytes.
    pub fn add(
        &mut self,
        filename: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Result<&Attachment, MailError> {
        let content = content.into();
        let filename = filename.into();
        let content_type = guess_content_type(&content);
        self.push(filename, content_type, content, false)
    }

    pub fn add_with_type(
        &mut self,
        filename: impl Into<String>,
        content_type: &str,
        content: impl Into<Vec<u8>>,
    ) -> Result<&Attachment, MailError> {
        self.push(
            filename.into(),
            ContentType::parse(content_type),
            content.into(),
            false,
        )
    }

    /// Attach a file meant to be referenced from the HTML body by content-id.
    pub fn inline(
        &mut self,
        filename: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Result<&Attachment, MailError> {
        let content = content.into();
        let filename = filename.into();
        let content_type = guess_content_type(&content);
        self.push(filename, content_type, content, true)
    }

    fn push(
        &mut self,
        filename: String,
        content_type: ContentType,
        content: Vec<u8>,
        inline: bool,
    ) -> Result<&Attachment, MailError> {
        if self.frozen {
            return Err(MailError::AttachmentsAfterMail);
        }
        let content_id = inline.then(|| format!("{}@letterbox", Uuid::new_v4().simple()));
        self.items.retain(|a| a.filename != filename);
        self.items.push(Attachment {
            filename,
            content_type,
            content,
            inline,
            content_id,
        });
        match self.items.last() {
            Some(attachment) => Ok(attachment),
            None => unreachable!("attachment was just pushed"),
        }
    }

    pub fn get(&self, filename: &str) -> Option<&Attachment> {
        self.items.iter().find(|a| a.filename == filename)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attachment> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub(crate) fn freeze(&mut self) {
        self.frozen = true;
    }
}

/// Sniffed from the bytes; the filename plays no part.
fn guess_content_type(content: &[u8]) -> ContentType {
    ContentType::new(tree_magic_mini::from_u8(content))
}
