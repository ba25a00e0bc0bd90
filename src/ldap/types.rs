//! Identity data exchanged with the directory.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a person in the domain model.
pub type PersonId = String;
/// Stable username of a person, used as LDAP `uid`.
pub type PersonReferrer = String;

/// Default public-school email domain.
pub const DEFAULT_OEFFENTLICHE_SCHULEN_DOMAIN: &str = "schule-sh.de";
/// Default private-school email domain.
pub const DEFAULT_ERSATZSCHULEN_DOMAIN: &str = "ersatzschule-sh.de";

pub const INET_ORG_PERSON: &str = "inetOrgPerson";
pub const GROUP_OF_NAMES: &str = "groupOfNames";
pub const ORGANIZATIONAL_UNIT: &str = "organizationalUnit";

/// Group identifier prefix, followed by the school `kennung`.
pub const GROUP_PREFIX: &str = "lehrer-";

/// Entity kinds named in search failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LdapEntityType {
    Lehrer,
}

impl fmt::Display for LdapEntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LdapEntityType::Lehrer => f.write_str("lehrer"),
        }
    }
}

/// Directory subtree a teacher is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootName {
    /// Public schools.
    OeffentlicheSchulen,
    /// Private schools.
    ErsatzSchulen,
}

impl RootName {
    pub fn as_str(&self) -> &'static str {
        match self {
            RootName::OeffentlicheSchulen => "oeffentlicheSchulen",
            RootName::ErsatzSchulen => "ersatzSchulen",
        }
    }
}

impl fmt::Display for RootName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transient identity of a person.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonData {
    pub id: PersonId,
    pub vorname: String,
    pub familienname: String,
    pub referrer: Option<PersonReferrer>,
    pub ldap_entry_uuid: Option<String>,
}

impl PersonData {
    pub fn new(
        id: impl Into<String>,
        vorname: impl Into<String>,
        familienname: impl Into<String>,
        referrer: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            vorname: vorname.into(),
            familienname: familienname.into(),
            referrer,
            ldap_entry_uuid: None,
        }
    }
}

/// Normalized view of a person entry.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LdapPersonAttributes {
    pub entry_uuid: Option<String>,
    pub dn: String,
    pub given_name: Option<String>,
    pub surname: Option<String>,
    pub cn: Option<String>,
    pub mail_primary_address: Option<String>,
    pub mail_alternative_address: Option<String>,
}

impl LdapPersonAttributes {
    /// Names of the readable fields without a value.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("GivenName", &self.given_name),
            ("Surname", &self.surname),
            ("CN", &self.cn),
            ("MailPrimaryAddress", &self.mail_primary_address),
            ("MailAlternativeAddress", &self.mail_alternative_address),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_none())
        .map(|(name, _)| name)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_name_display() {
        assert_eq!(RootName::OeffentlicheSchulen.to_string(), "oeffentlicheSchulen");
        assert_eq!(RootName::ErsatzSchulen.as_str(), "ersatzSchulen");
        assert_eq!(LdapEntityType::Lehrer.to_string(), "lehrer");
    }

    #[test]
    fn test_person_attributes_serialize_camel_case() {
        let attrs = LdapPersonAttributes {
            dn: "uid=max,ou=oeffentlicheSchulen,dc=schule-sh,dc=de".into(),
            mail_primary_address: Some("max@schule-sh.de".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&attrs).unwrap();
        assert_eq!(json["mailPrimaryAddress"], "max@schule-sh.de");
        assert!(json["entryUuid"].is_null());
    }

    #[test]
    fn test_missing_fields() {
        let attrs = LdapPersonAttributes {
            given_name: Some("Max".into()),
            surname: Some("Muster".into()),
            cn: Some("mmuster".into()),
            mail_primary_address: Some("max@schule-sh.de".into()),
            ..Default::default()
        };
        assert_eq!(attrs.missing_fields(), vec!["MailAlternativeAddress"]);

        assert_eq!(LdapPersonAttributes::default().missing_fields(), vec![
            "GivenName",
            "Surname",
            "CN",
            "MailPrimaryAddress",
            "MailAlternativeAddress",
        ]);
    }
}
