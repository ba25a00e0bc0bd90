//! Conversion between raw directory attributes and service values.

use std::collections::{HashMap, HashSet};

use ldap3::{Mod, SearchEntry};

/// Attributes of a new entry, in insertion order.
pub type Attributes = Vec<(String, Vec<String>)>;

/// Raw attribute value as returned by the directory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    #[default]
    Absent,
    Text(String),
    TextList(Vec<String>),
    Binary(Vec<u8>),
    BinaryList(Vec<Vec<u8>>),
}

impl AttributeValue {
    /// Flatten into an ordered list of strings.
    ///
    /// Binary values are decoded as UTF-8, invalid sequences are replaced.
    pub fn normalize(&self) -> Vec<String> {
        match self {
            AttributeValue::Absent => Vec::new(),
            AttributeValue::Text(value) => vec![value.clone()],
            AttributeValue::TextList(values) => values.clone(),
            AttributeValue::Binary(bytes) => {
                vec![String::from_utf8_lossy(bytes).into_owned()]
            },
            AttributeValue::BinaryList(values) => values
                .iter()
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .collect(),
        }
    }

    fn from_text(mut values: Vec<String>) -> Self {
        match values.len() {
            0 => AttributeValue::Absent,
            1 => AttributeValue::Text(values.remove(0)),
            _ => AttributeValue::TextList(values),
        }
    }

    fn from_binary(mut values: Vec<Vec<u8>>) -> Self {
        match values.len() {
            0 => AttributeValue::Absent,
            1 => AttributeValue::Binary(values.remove(0)),
            _ => AttributeValue::BinaryList(values),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_owned())
    }
}

impl From<Vec<&str>> for AttributeValue {
    fn from(values: Vec<&str>) -> Self {
        AttributeValue::TextList(values.into_iter().map(Into::into).collect())
    }
}

/// A directory entry read by a search.
///
/// Attribute names are matched case-insensitively.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Entry {
    pub dn: String,
    attrs: HashMap<String, AttributeValue>,
}

impl Entry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attrs: HashMap::new(),
        }
    }

    /// Set an attribute, replacing any previous value.
    pub fn with(
        mut self,
        name: &str,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attrs.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> &AttributeValue {
        const ABSENT: &AttributeValue = &AttributeValue::Absent;
        self.attrs.get(&name.to_ascii_lowercase()).unwrap_or(ABSENT)
    }

    /// Normalized values of an attribute, empty when absent.
    pub fn values(&self, name: &str) -> Vec<String> {
        self.get(name).normalize()
    }

    pub fn first(&self, name: &str) -> Option<String> {
        self.values(name).into_iter().next()
    }
}

impl From<SearchEntry> for Entry {
    fn from(entry: SearchEntry) -> Self {
        let mut attrs = HashMap::new();
        for (name, values) in entry.attrs {
            attrs.insert(
                name.to_ascii_lowercase(),
                AttributeValue::from_text(values),
            );
        }
        for (name, values) in entry.bin_attrs {
            attrs.insert(
                name.to_ascii_lowercase(),
                AttributeValue::from_binary(values),
            );
        }

        Self { dn: entry.dn, attrs }
    }
}

/// Kind of attribute modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Delete,
    Replace,
}

/// Outbound modification of one attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub operation: Operation,
    pub attribute: String,
    pub values: Vec<String>,
}

impl Change {
    fn new(
        operation: Operation,
        attribute: impl Into<String>,
        values: Vec<String>,
    ) -> Self {
        Self {
            operation,
            attribute: attribute.into(),
            values,
        }
    }

    pub fn add(attribute: impl Into<String>, values: Vec<String>) -> Self {
        Self::new(Operation::Add, attribute, values)
    }

    pub fn delete(attribute: impl Into<String>, values: Vec<String>) -> Self {
        Self::new(Operation::Delete, attribute, values)
    }

    pub fn replace(attribute: impl Into<String>, values: Vec<String>) -> Self {
        Self::new(Operation::Replace, attribute, values)
    }
}

impl From<Change> for Mod<String> {
    fn from(change: Change) -> Self {
        let values: HashSet<String> = change.values.into_iter().collect();
        match change.operation {
            Operation::Add => Mod::Add(change.attribute, values),
            Operation::Delete => Mod::Delete(change.attribute, values),
            Operation::Replace => Mod::Replace(change.attribute, values),
        }
    }
}

/// Escape a value placed inside a search filter (RFC 4515).
pub fn escape_filter_value(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '*' => out.push_str(r"\2a"),
            '(' => out.push_str(r"\28"),
            ')' => out.push_str(r"\29"),
            '\\' => out.push_str(r"\5c"),
            '\0' => out.push_str(r"\00"),
            c => out.push(c),
        }
    }
    out
}

/// Escape a value placed inside a DN attribute value (RFC 4514).
pub fn escape_dn_value(input: &str) -> String {
    let last = input.chars().count().saturating_sub(1);
    let mut out = String::with_capacity(input.len());
    for (i, c) in input.chars().enumerate() {
        match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                out.push('\\');
                out.push(c);
            },
            '#' if i == 0 => out.push_str(r"\#"),
            ' ' if i == 0 || i == last => out.push_str(r"\ "),
            '\0' => out.push_str(r"\00"),
            c => out.push(c),
        }
    }
    out
}

/// Split a DN into its first RDN and the parent DN.
///
/// Escaped commas inside the RDN value do not separate components.
pub fn split_rdn(dn: &str) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (i, c) in dn.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            ',' => return Some((&dn[..i], &dn[i + 1..])),
            _ => {},
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert!(AttributeValue::Absent.normalize().is_empty());
        assert_eq!(AttributeValue::from("a").normalize(), vec!["a"]);
        assert_eq!(
            AttributeValue::from(vec!["a", "b"]).normalize(),
            vec!["a", "b"]
        );
        assert_eq!(
            AttributeValue::Binary(b"uuid-1".to_vec()).normalize(),
            vec!["uuid-1"]
        );
        assert_eq!(
            AttributeValue::BinaryList(vec![b"x".to_vec(), vec![0xff]])
                .normalize(),
            vec!["x".to_string(), "\u{fffd}".to_string()]
        );
    }

    #[test]
    fn test_normalize_is_encoding_independent() {
        let expected = vec!["max@schule-sh.de".to_string()];
        for value in [
            AttributeValue::from("max@schule-sh.de"),
            AttributeValue::from(vec!["max@schule-sh.de"]),
            AttributeValue::Binary(b"max@schule-sh.de".to_vec()),
            AttributeValue::BinaryList(vec![b"max@schule-sh.de".to_vec()]),
        ] {
            assert_eq!(value.normalize(), expected, "{value:?}");
        }
    }

    #[test]
    fn test_split_rdn() {
        assert_eq!(
            split_rdn("uid=max,ou=oeffentlicheSchulen,dc=de"),
            Some(("uid=max", "ou=oeffentlicheSchulen,dc=de"))
        );
        assert_eq!(
            split_rdn(r"uid=a\,b,ou=oeffentlicheSchulen"),
            Some((r"uid=a\,b", "ou=oeffentlicheSchulen"))
        );
        assert_eq!(split_rdn(r"uid=a\\,ou=x"), Some((r"uid=a\\", "ou=x")));
        assert_eq!(split_rdn("uid=max"), None);
    }

    #[test]
    fn test_entry_lookup_is_case_insensitive() {
        let entry = Entry::new("uid=max,ou=oeffentlicheSchulen,dc=de")
            .with("mailPrimaryAddress", "max@schule-sh.de");

        assert_eq!(
            entry.first("mailprimaryaddress").as_deref(),
            Some("max@schule-sh.de")
        );
        assert_eq!(entry.get("MAILPRIMARYADDRESS"), entry.get("mailPrimaryAddress"));
        assert!(entry.values("givenName").is_empty());
        assert_eq!(entry.first("sn"), None);
    }

    #[test]
    fn test_from_search_entry() {
        let search = SearchEntry {
            dn: "uid=max,dc=de".into(),
            attrs: HashMap::from([
                ("cn".to_string(), vec!["max".to_string()]),
                (
                    "member".to_string(),
                    vec!["uid=a".to_string(), "uid=b".to_string()],
                ),
            ]),
            bin_attrs: HashMap::from([(
                "entryUUID".to_string(),
                vec![b"0000-1111".to_vec()],
            )]),
        };

        let entry = Entry::from(search);
        assert_eq!(entry.get("cn"), &AttributeValue::Text("max".into()));
        assert_eq!(entry.values("member"), vec!["uid=a", "uid=b"]);
        assert_eq!(entry.first("entryuuid").as_deref(), Some("0000-1111"));
    }

    #[test]
    fn test_change_into_mod() {
        let change = Change::replace("sn", vec!["Muster".into()]);
        match Mod::from(change) {
            Mod::Replace(attr, values) => {
                assert_eq!(attr, "sn");
                assert!(values.contains("Muster"));
            },
            _ => panic!("expected replace"),
        }
        assert!(matches!(
            Mod::from(Change::delete("member", vec![])),
            Mod::Delete(_, _)
        ));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape_filter_value("a*(b)\\"), r"a\2a\28b\29\5c");
        assert_eq!(escape_filter_value("max.muster"), "max.muster");
        assert_eq!(escape_dn_value("a,b+c"), r"a\,b\+c");
        assert_eq!(escape_dn_value("#x "), r"\#x\ ");
        assert_eq!(escape_dn_value("max"), "max");
    }
}
