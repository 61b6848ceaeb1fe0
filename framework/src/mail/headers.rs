//! Ordered, multi-value header fields.

/// Header fields whose value is a list of mailboxes.
const ADDRESS_FIELDS: [&str; 6] = ["from", "to", "cc", "bcc", "reply_to", "sender"];

/// A header value: a single string, or a list for address fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Text(String),
    List(Vec<String>),
}

impl HeaderValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(text) => Some(text),
            HeaderValue::List(_) => None,
        }
    }

    /// Every value, flattening a single text value into a one-element list.
    pub fn to_list(&self) -> Vec<String> {
        match self {
            HeaderValue::Text(text) => vec![text.clone()],
            HeaderValue::List(items) => items.clone(),
        }
    }

    /// Render the value the way it appears on the wire, before encoding.
    pub fn joined(&self) -> String {
        match self {
            HeaderValue::Text(text) => text.clone(),
            HeaderValue::List(items) => items.join(", "),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            HeaderValue::Text(text) => text.is_empty(),
            HeaderValue::List(items) => items.is_empty(),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Text(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Text(value)
    }
}

impl From<&String> for HeaderValue {
    fn from(value: &String) -> Self {
        HeaderValue::Text(value.clone())
    }
}

impl From<Vec<String>> for HeaderValue {
    fn from(value: Vec<String>) -> Self {
        HeaderValue::List(value)
    }
}

impl From<Vec<&str>> for HeaderValue {
    fn from(value: Vec<&str>) -> Self {
        HeaderValue::List(value.into_iter().map(String::from).collect())
    }
}

impl<const N: usize> From<[&str; N]> for HeaderValue {
    fn from(value: [&str; N]) -> Self {
        HeaderValue::List(value.into_iter().map(String::from).collect())
    }
}

/// Header names compare case-insensitively, with `_` and `-` treated alike so
/// that `reply_to` and `Reply-To` name the same field.
pub fn same_name(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.bytes().zip(b.bytes()).all(|(x, y)| {
            let x = if x == b'_' { b'-' } else { x };
            let y = if y == b'_' { b'-' } else { y };
            x.eq_ignore_ascii_case(&y)
        })
}

/// Normalized lookup key: lowercase with underscores.
pub(crate) fn key(name: &str) -> String {
    name.to_ascii_lowercase().replace('-', "_")
}

pub fn is_address_field(name: &str) -> bool {
    ADDRESS_FIELDS.iter().any(|field| same_name(field, name))
}

/// Canonical wire spelling of a header name (`reply_to` -> `Reply-To`).
pub fn canonical_name(name: &str) -> String {
    match key(name).as_str() {
        "message_id" => return "Message-ID".to_string(),
        "mime_version" => return "MIME-Version".to_string(),
        "content_id" => return "Content-ID".to_string(),
        _ => {}
    }
    name.split(['-', '_'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Insertion-ordered header fields. A name may appear more than once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    fields: Vec<(String, HeaderValue)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, replacing every existing field of the same name. The
    /// first occurrence keeps its position.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<HeaderValue>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter().position(|(n, _)| same_name(n, &name)) {
            Some(idx) => {
                self.fields[idx].1 = value;
                let mut seen = 0;
                self.fields.retain(|(n, _)| {
                    if same_name(n, &name) {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
            }
            None => self.fields.push((name, value)),
        }
    }

    /// Add a field without touching existing fields of the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<HeaderValue>) {
        self.fields.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.fields
            .iter()
            .find(|(n, _)| same_name(n, name))
            .map(|(_, v)| v)
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a HeaderValue> + 'a {
        self.fields
            .iter()
            .filter(move |(n, _)| same_name(n, name))
            .map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove every field with this name, returning the first value.
    pub fn remove(&mut self, name: &str) -> Option<HeaderValue> {
        let first = self
            .fields
            .iter()
            .position(|(n, _)| same_name(n, name))
            .map(|idx| self.fields.remove(idx).1);
        self.fields.retain(|(n, _)| !same_name(n, name));
        first
    }

    /// Overlay `other` onto `self`; fields from `other` win on collision.
    pub fn merge(&mut self, other: HeaderMap) {
        for (name, value) in other.fields {
            self.insert(name, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<N: Into<String>, V: Into<HeaderValue>> FromIterator<(N, V)> for HeaderMap {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let mut map = HeaderMap::new();
        for (name, value) in iter {
            map.insert(name, value);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_compare_loosely() {
        assert!(same_name("reply_to", "Reply-To"));
        assert!(same_name("SUBJECT", "subject"));
        assert!(!same_name("to", "cc"));
        assert!(!same_name("to", "top"));
    }

    #[test]
    fn canonical_names() {
        assert_eq!(canonical_name("reply_to"), "Reply-To");
        assert_eq!(canonical_name("x-mailer"), "X-Mailer");
        assert_eq!(canonical_name("message_id"), "Message-ID");
        assert_eq!(canonical_name("subject"), "Subject");
    }

    #[test]
    fn insert_replaces_in_place() {
        let mut headers = HeaderMap::new();
        headers.insert("to", "a@x.com");
        headers.insert("Subject", "Hi");
        headers.append("X-Tag", "one");
        headers.append("x_tag", "two");
        headers.insert("TO", vec!["b@x.com", "c@x.com"]);
        headers.insert("X-Tag", "three");

        let names: Vec<_> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["to", "Subject", "X-Tag"]);
        assert_eq!(
            headers.get("to"),
            Some(&HeaderValue::List(vec!["b@x.com".into(), "c@x.com".into()]))
        );
        assert_eq!(headers.get_all("x-tag").count(), 1);
    }

    #[test]
    fn append_keeps_every_value() {
        let mut headers = HeaderMap::new();
        headers.append("Received", "from a");
        headers.append("Received", "from b");
        let all: Vec<_> = headers.get_all("received").map(|v| v.joined()).collect();
        assert_eq!(all, vec!["from a", "from b"]);

        assert_eq!(headers.remove("received"), Some("from a".into()));
        assert!(headers.is_empty());
    }

    #[test]
    fn merge_prefers_other() {
        let mut base: HeaderMap = [("from", "a@x.com"), ("subject", "Default")]
            .into_iter()
            .collect();
        let call: HeaderMap = [("Subject", "Welcome")].into_iter().collect();
        base.merge(call);
        assert_eq!(base.get("subject").and_then(|v| v.as_text()), Some("Welcome"));
        assert_eq!(base.get("from").and_then(|v| v.as_text()), Some("a@x.com"));
    }

    #[test]
    fn address_fields() {
        assert!(is_address_field("Reply-To"));
        assert!(is_address_field("bcc"));
        assert!(!is_address_field("subject"));
    }
}
