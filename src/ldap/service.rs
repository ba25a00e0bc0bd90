//! Synchronization of teacher entries with the directory.
//!
//! Every operation follows the same shape: arguments are validated first,
//! then the directory work runs inside the [`RetryPolicy`] with a fresh,
//! bound connection per attempt.

use std::sync::Arc;

use ldap3::Scope;
use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;

use super::client::{DirectoryConnection, DirectoryError, LdapClient};
use super::codec::{
    Change, Entry, escape_dn_value, escape_filter_value, split_rdn,
};
use super::retry::RetryPolicy;
use super::types::{
    DEFAULT_ERSATZSCHULEN_DOMAIN, DEFAULT_OEFFENTLICHE_SCHULEN_DOMAIN,
    INET_ORG_PERSON, LdapEntityType, LdapPersonAttributes, PersonData,
    PersonId, PersonReferrer, RootName,
};
use crate::config::LdapInstanceConfig;
use crate::error::{LdapError, Result};
use crate::event::{DomainEvent, EventPublisher, LdapPersonEntryChangedEvent};

const PASSWORD_LENGTH: usize = 12;
const ENTRY_UUID: &str = "entryUUID";
const MAIL_PRIMARY_ADDRESS: &str = "mailPrimaryAddress";
const MAIL_ALTERNATIVE_ADDRESS: &str = "mailAlternativeAddress";

type Connection = Box<dyn DirectoryConnection>;

/// Directory synchronization service.
pub struct LdapClientService {
    pub(super) client: Arc<dyn LdapClient>,
    pub(super) config: Arc<LdapInstanceConfig>,
    events: Arc<dyn EventPublisher>,
    pub(super) retry: RetryPolicy,
}

impl LdapClientService {
    /// Create a new [`LdapClientService`].
    pub fn new(
        client: Arc<dyn LdapClient>,
        config: Arc<LdapInstanceConfig>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config);
        Self {
            client,
            config,
            events,
            retry,
        }
    }

    /// Replace the retry policy derived from configuration.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Map an email domain to the subtree holding its teachers.
    ///
    /// Built-in default domains stay valid when custom ones are configured.
    pub fn get_root_name(&self, email_domain: &str) -> Result<RootName> {
        if email_domain == self.config.oeffentliche_schulen_domain()
            || email_domain == DEFAULT_OEFFENTLICHE_SCHULEN_DOMAIN
        {
            Ok(RootName::OeffentlicheSchulen)
        } else if email_domain == self.config.ersatzschulen_domain()
            || email_domain == DEFAULT_ERSATZSCHULEN_DOMAIN
        {
            Ok(RootName::ErsatzSchulen)
        } else {
            tracing::error!(
                "LDAP: Could not get root-name because email-domain is invalid, domain:{email_domain}"
            );
            Err(LdapError::EmailDomain {
                domain: email_domain.to_owned(),
            })
        }
    }

    pub(super) fn base_dn(&self) -> &str {
        &self.config.base_dn
    }

    fn root_dn(&self, root: RootName) -> String {
        format!("ou={root},{}", self.base_dn())
    }

    /// `uid=<referrer>,ou=<root>,<base>`.
    pub(super) fn lehrer_dn(&self, referrer: &str, root: RootName) -> String {
        format!("uid={},{}", escape_dn_value(referrer), self.root_dn(root))
    }

    fn require_referrer<'a>(&self, person: &'a PersonData) -> Result<&'a str> {
        person.referrer.as_deref().ok_or_else(|| {
            tracing::error!(
                "LDAP: Person {} has no referrer, cannot sync with directory",
                person.id
            );
            LdapError::MissingReferrer {
                person_id: person.id.clone(),
            }
        })
    }

    /// Open a connection and bind as admin.
    pub(super) async fn bind(&self) -> Result<Connection> {
        let fail = |err: DirectoryError| {
            tracing::error!(error = %err, "Could not connect to LDAP");
            LdapError::Bind(err)
        };

        let mut conn = self.client.get_client().await.map_err(fail)?;
        conn.bind(&self.config.bind_dn, self.config.admin_password())
            .await
            .map_err(fail)?;

        tracing::trace!("LDAP: Successfully connected");
        Ok(conn)
    }

    pub(super) fn uid_filter(referrer: &str) -> String {
        format!("(uid={})", escape_filter_value(referrer))
    }

    /// Locate a person entry anywhere under the base DN.
    pub(super) async fn find_person(
        &self,
        conn: &mut dyn DirectoryConnection,
        referrer: &str,
        attrs: &[&str],
    ) -> Result<Option<Entry>> {
        let entries = conn
            .search(
                self.base_dn(),
                Scope::Subtree,
                &Self::uid_filter(referrer),
                attrs,
            )
            .await?;
        Ok(entries.into_iter().next())
    }

    /// Read `entryUUID` of a person. Failures yield `None`.
    async fn fetch_entry_uuid(
        &self,
        conn: &mut dyn DirectoryConnection,
        base: &str,
        referrer: &str,
    ) -> Option<String> {
        match conn
            .search(base, Scope::Subtree, &Self::uid_filter(referrer), &[
                ENTRY_UUID,
            ])
            .await
        {
            Ok(entries) => entries.first().and_then(|e| e.first(ENTRY_UUID)),
            Err(err) => {
                tracing::debug!(error = %err, "entryUUID lookup failed");
                None
            },
        }
    }

    async fn publish(&self, event: DomainEvent) {
        if let Err(err) = self.events.publish(&event).await {
            tracing::warn!(
                error = %err,
                event_type = event.event_type(),
                "failed to publish event"
            );
        }
    }

    /// Whether a teacher entry exists for `referrer`.
    pub async fn is_lehrer_existing(
        &self,
        referrer: &str,
        email_domain: &str,
    ) -> Result<bool> {
        let root = self.get_root_name(email_domain)?;
        let base = self.root_dn(root);

        self.retry
            .execute("is_lehrer_existing", || {
                self.is_lehrer_existing_once(&base, referrer)
            })
            .await
    }

    async fn is_lehrer_existing_once(
        &self,
        base: &str,
        referrer: &str,
    ) -> Result<bool> {
        let mut conn = self.bind().await?;
        let entries = conn
            .search(base, Scope::Subtree, &Self::uid_filter(referrer), &[])
            .await?;
        Ok(!entries.is_empty())
    }

    /// Create a teacher entry and add it to the school group.
    ///
    /// An existing entry is left untouched and `person` is returned as is.
    /// `entryUUID` is written from `entry_uuid_override`, or from the person
    /// id when no override is given.
    pub async fn create_lehrer(
        &self,
        person: &PersonData,
        email_domain: &str,
        kennung: &str,
        entry_uuid_override: Option<&str>,
    ) -> Result<PersonData> {
        let root = self.get_root_name(email_domain)?;
        let referrer = self.require_referrer(person)?;
        let base = self.root_dn(root);
        let dn = self.lehrer_dn(referrer, root);
        let entry_uuid = entry_uuid_override.unwrap_or(person.id.as_str());

        let Some(created) = self
            .retry
            .execute("create_lehrer", || {
                self.create_lehrer_once(person, referrer, &base, &dn, entry_uuid)
            })
            .await?
        else {
            return Ok(person.clone());
        };

        // group membership has its own connection and retry budget.
        self.add_person_to_group(referrer, kennung, &dn)
            .await
            .map_err(|err| {
                tracing::error!(
                    error = %err,
                    "LDAP: Failed to add lehrer {referrer} to group lehrer-{kennung}"
                );
                match err {
                    LdapError::AddPersonToGroup { .. } => err,
                    other => LdapError::AddPersonToGroup {
                        group_id: format!("lehrer-{kennung}"),
                        message: other.to_string(),
                    },
                }
            })?;

        if created.ldap_entry_uuid.is_none() {
            tracing::error!(
                "LDAP: Could not get EntryUUID for referrer:{referrer}, personId:{}",
                person.id
            );
        }

        Ok(created)
    }

    /// Returns `None` when the entry already exists.
    async fn create_lehrer_once(
        &self,
        person: &PersonData,
        referrer: &str,
        base: &str,
        dn: &str,
        entry_uuid: &str,
    ) -> Result<Option<PersonData>> {
        let mut conn = self.bind().await?;

        let existing = conn
            .search(base, Scope::Subtree, &Self::uid_filter(referrer), &[])
            .await?;
        if !existing.is_empty() {
            tracing::info!("LDAP: Lehrer {dn} exists, nothing to create");
            return Ok(None);
        }

        let attrs = vec![
            ("objectclass".to_owned(), vec![INET_ORG_PERSON.to_owned()]),
            ("cn".to_owned(), vec![referrer.to_owned()]),
            ("sn".to_owned(), vec![person.familienname.clone()]),
            ("givenName".to_owned(), vec![person.vorname.clone()]),
            ("uid".to_owned(), vec![referrer.to_owned()]),
            (ENTRY_UUID.to_owned(), vec![entry_uuid.to_owned()]),
        ];

        conn.add(dn, attrs).await.map_err(|source| {
            tracing::error!(error = %source, "LDAP: Creating lehrer FAILED, uid:{dn}");
            LdapError::CreateLehrer {
                dn: dn.to_owned(),
                source,
            }
        })?;
        tracing::info!("LDAP: Successfully created lehrer {dn}");

        let ldap_entry_uuid =
            self.fetch_entry_uuid(conn.as_mut(), base, referrer).await;

        Ok(Some(PersonData {
            ldap_entry_uuid,
            ..person.clone()
        }))
    }

    /// Delete the teacher entry of `person`. A missing entry is a success.
    ///
    /// Group memberships are left as they are.
    pub async fn delete_lehrer(
        &self,
        person: &PersonData,
        kennung: &str,
        email_domain: &str,
    ) -> Result<PersonData> {
        let root = self.get_root_name(email_domain)?;
        let referrer = self.require_referrer(person)?;
        let base = self.root_dn(root);

        self.retry
            .execute("delete_lehrer", || {
                self.delete_lehrer_once(person, referrer, &base, kennung)
            })
            .await
    }

    async fn delete_lehrer_once(
        &self,
        person: &PersonData,
        referrer: &str,
        base: &str,
        kennung: &str,
    ) -> Result<PersonData> {
        let mut conn = self.bind().await?;

        let entries = conn
            .search(base, Scope::Subtree, &Self::uid_filter(referrer), &[])
            .await?;
        let Some(entry) = entries.first() else {
            tracing::info!(
                "LDAP: Lehrer {referrer} does not exist, nothing to delete"
            );
            return Ok(person.clone());
        };

        conn.delete(&entry.dn).await.map_err(|source| {
            tracing::error!(error = %source, "LDAP: Deleting lehrer FAILED, uid:{}", entry.dn);
            LdapError::DeleteLehrer {
                dn: entry.dn.clone(),
                source,
            }
        })?;
        tracing::info!(kennung, "LDAP: Successfully deleted lehrer {}", entry.dn);

        Ok(person.clone())
    }

    /// Delete a teacher entry located by `referrer` under the base DN.
    pub async fn delete_lehrer_by_referrer(
        &self,
        referrer: &str,
    ) -> Result<PersonReferrer> {
        self.retry
            .execute("delete_lehrer_by_referrer", || {
                self.delete_lehrer_by_referrer_once(referrer)
            })
            .await
    }

    async fn delete_lehrer_by_referrer_once(
        &self,
        referrer: &str,
    ) -> Result<PersonReferrer> {
        let mut conn = self.bind().await?;

        let entry = self
            .find_person(conn.as_mut(), referrer, &[])
            .await?
            .ok_or_else(|| {
                tracing::error!(
                    "LDAP: Deleting lehrer FAILED, no entry for referrer:{referrer}"
                );
                LdapError::Search(LdapEntityType::Lehrer)
            })?;

        conn.delete(&entry.dn).await.map_err(|source| {
            tracing::error!(error = %source, "LDAP: Deleting lehrer FAILED, uid:{}", entry.dn);
            LdapError::DeleteLehrer {
                dn: entry.dn.clone(),
                source,
            }
        })?;
        tracing::info!("LDAP: Successfully deleted lehrer by referrer:{referrer}");

        Ok(referrer.to_owned())
    }

    /// Replace names of a person and optionally rename its `uid`.
    ///
    /// A rename also rewrites the member DN in every group of the person.
    /// The group fix-up runs under its own retry on a fresh connection.
    pub async fn modify_person_attributes(
        &self,
        old_referrer: &str,
        given_name: Option<&str>,
        surname: Option<&str>,
        new_uid: Option<&str>,
    ) -> Result<PersonReferrer> {
        let old_dn = self
            .retry
            .execute("modify_person_attributes", || {
                self.modify_person_attributes_once(
                    old_referrer,
                    given_name,
                    surname,
                    new_uid,
                )
            })
            .await?;

        if let (Some(old_dn), Some(uid)) = (old_dn, new_uid) {
            let old_dn = old_dn.as_str();
            self.retry
                .execute("update_member_dn_in_groups", move || async move {
                    let mut conn = self.bind().await?;
                    self.update_member_dn_in_groups(
                        old_referrer,
                        uid,
                        old_dn,
                        conn.as_mut(),
                    )
                    .await
                })
                .await
                .map_err(|err| {
                    tracing::error!(
                        error = %err,
                        "LDAP: Failed to update groups for person: {old_referrer}"
                    );
                    err
                })?;
        }

        Ok(old_referrer.to_owned())
    }

    /// Returns the DN before the rename when `new_uid` was applied.
    async fn modify_person_attributes_once(
        &self,
        old_referrer: &str,
        given_name: Option<&str>,
        surname: Option<&str>,
        new_uid: Option<&str>,
    ) -> Result<Option<String>> {
        let mut conn = self.bind().await?;

        let entry = self
            .find_person(conn.as_mut(), old_referrer, &[])
            .await?
            .ok_or_else(|| {
                tracing::error!(
                    "LDAP: Modification FAILED, no entry for person:{old_referrer}"
                );
                LdapError::Search(LdapEntityType::Lehrer)
            })?;

        let mut changes = Vec::new();
        if let Some(uid) = new_uid {
            changes.push(Change::replace("cn", vec![uid.to_owned()]));
        }
        if let Some(given_name) = given_name {
            changes.push(Change::replace("givenName", vec![given_name.to_owned()]));
        }
        if let Some(surname) = surname {
            changes.push(Change::replace("sn", vec![surname.to_owned()]));
        }

        if changes.is_empty() {
            tracing::debug!("LDAP: No attributes to modify for person:{old_referrer}");
            return Ok(None);
        }

        let fail = |source| LdapError::ModifyPersonAttributes {
            referrer: old_referrer.to_owned(),
            source,
        };

        conn.modify(&entry.dn, changes).await.map_err(fail)?;
        tracing::info!("LDAP: Successfully modified givenName/sn/cn for person:{old_referrer}");

        let Some(uid) = new_uid else {
            return Ok(None);
        };

        let new_rdn = format!("uid={}", escape_dn_value(uid));
        conn.modify_dn(&entry.dn, &new_rdn).await.map_err(fail)?;
        tracing::info!("LDAP: Successfully modified uid for person:{old_referrer}");

        Ok(Some(entry.dn))
    }

    /// Read the normalized attributes of a person.
    ///
    /// When no entry exists a placeholder entry is created in the subtree
    /// matching `email_domain`.
    pub async fn get_person_attributes(
        &self,
        person_id: &str,
        referrer: &str,
        email_domain: &str,
    ) -> Result<LdapPersonAttributes> {
        self.retry
            .execute("get_person_attributes", || {
                self.get_person_attributes_once(person_id, referrer, email_domain)
            })
            .await
    }

    async fn get_person_attributes_once(
        &self,
        person_id: &str,
        referrer: &str,
        email_domain: &str,
    ) -> Result<LdapPersonAttributes> {
        let mut conn = self.bind().await?;

        let attrs = [
            ENTRY_UUID,
            "givenName",
            "sn",
            "cn",
            MAIL_PRIMARY_ADDRESS,
            MAIL_ALTERNATIVE_ADDRESS,
        ];
        if let Some(entry) =
            self.find_person(conn.as_mut(), referrer, &attrs).await?
        {
            let attributes = LdapPersonAttributes {
                entry_uuid: entry.first(ENTRY_UUID),
                dn: entry.dn.clone(),
                given_name: entry.first("givenName"),
                surname: entry.first("sn"),
                cn: entry.first("cn"),
                mail_primary_address: entry.first(MAIL_PRIMARY_ADDRESS),
                mail_alternative_address: entry.first(MAIL_ALTERNATIVE_ADDRESS),
            };

            for name in attributes.missing_fields() {
                tracing::warn!(
                    "LDAP: {name} was undefined, referrer:{referrer}, personId:{person_id}"
                );
            }

            return Ok(attributes);
        }

        tracing::warn!(
            "LDAP: Fetching person-attributes FAILED, no entry for referrer:{referrer}, personId:{person_id}"
        );

        let root = self.get_root_name(email_domain)?;
        let dn = self.lehrer_dn(referrer, root);
        let placeholder = vec![
            ("objectclass".to_owned(), vec![INET_ORG_PERSON.to_owned()]),
            ("uid".to_owned(), vec![referrer.to_owned()]),
            ("cn".to_owned(), vec![referrer.to_owned()]),
            ("sn".to_owned(), vec![referrer.to_owned()]),
        ];
        conn.add(&dn, placeholder).await.map_err(|source| {
            tracing::error!(error = %source, "LDAP: Creating empty PersonEntry FAILED, DN:{dn}");
            LdapError::CreateLehrer {
                dn: dn.clone(),
                source,
            }
        })?;
        tracing::info!("LDAP: Successfully created empty PersonEntry, DN:{dn}");

        let entry_uuid = self
            .fetch_entry_uuid(conn.as_mut(), self.base_dn(), referrer)
            .await;

        Ok(LdapPersonAttributes {
            entry_uuid,
            dn,
            ..Default::default()
        })
    }

    /// Replace the primary address, keeping the previous one as
    /// alternative address.
    pub async fn change_email_address_by_person_id(
        &self,
        person_id: &str,
        referrer: &str,
        new_address: &str,
    ) -> Result<PersonId> {
        let domain = match new_address.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
                domain
            },
            _ => {
                tracing::error!(
                    "LDAP: Invalid email-address:{new_address}, personId:{person_id}, referrer:{referrer}"
                );
                return Err(LdapError::EmailAddress {
                    address: new_address.to_owned(),
                });
            },
        };
        self.get_root_name(domain)?;

        let alternative = self
            .retry
            .execute("change_email_address_by_person_id", || {
                self.change_email_address_once(person_id, referrer, new_address)
            })
            .await?;

        self.publish(DomainEvent::LdapPersonEntryChanged(
            LdapPersonEntryChangedEvent {
                person_id: person_id.to_owned(),
                mail_primary_address: Some(new_address.to_owned()),
                mail_alternative_address: Some(alternative),
                user_password_changed: false,
            },
        ))
        .await;

        Ok(person_id.to_owned())
    }

    /// Returns the alternative address written.
    async fn change_email_address_once(
        &self,
        person_id: &str,
        referrer: &str,
        new_address: &str,
    ) -> Result<String> {
        let mut conn = self.bind().await?;

        let entry = self
            .find_person(conn.as_mut(), referrer, &[MAIL_PRIMARY_ADDRESS])
            .await?
            .ok_or_else(|| {
                tracing::error!(
                    "LDAP: Modifying mailPrimaryAddress FAILED, no entry for personId:{person_id}, referrer:{referrer}"
                );
                LdapError::Search(LdapEntityType::Lehrer)
            })?;

        let alternative = entry
            .first(MAIL_PRIMARY_ADDRESS)
            .unwrap_or_else(|| new_address.to_owned());

        conn.modify(&entry.dn, vec![
            Change::replace(MAIL_PRIMARY_ADDRESS, vec![new_address.to_owned()]),
            Change::replace(MAIL_ALTERNATIVE_ADDRESS, vec![alternative.clone()]),
        ])
        .await
        .map_err(|err| {
            tracing::error!(
                error = %err,
                "LDAP: Modifying mailPrimaryAddress and mailAlternativeAddress FAILED"
            );
            LdapError::ModifyEmail(err)
        })?;

        tracing::info!(
            "LDAP: Successfully modified mailPrimaryAddress and mailAlternativeAddress for personId:{person_id}, referrer:{referrer}"
        );

        Ok(alternative)
    }

    /// Set a freshly generated `userPassword` and return it.
    pub async fn change_user_password_by_person_id(
        &self,
        person_id: &str,
        referrer: &str,
    ) -> Result<String> {
        let password = self
            .retry
            .execute("change_user_password_by_person_id", || {
                self.change_user_password_once(person_id, referrer)
            })
            .await?;

        self.publish(DomainEvent::LdapPersonEntryChanged(
            LdapPersonEntryChangedEvent {
                person_id: person_id.to_owned(),
                user_password_changed: true,
                ..Default::default()
            },
        ))
        .await;

        Ok(password)
    }

    async fn change_user_password_once(
        &self,
        person_id: &str,
        referrer: &str,
    ) -> Result<String> {
        let mut conn = self.bind().await?;

        let entry = self
            .find_person(conn.as_mut(), referrer, &[])
            .await?
            .ok_or_else(|| {
                tracing::error!(
                    "LDAP: Modifying userPassword (UEM) FAILED, no entry for personId:{person_id}, referrer:{referrer}"
                );
                LdapError::Search(LdapEntityType::Lehrer)
            })?;

        let password = generate_password();
        conn.modify(&entry.dn, vec![Change::replace("userPassword", vec![
            password.clone(),
        ])])
        .await
        .map_err(|err| {
            tracing::error!(
                error = %err,
                "LDAP: Modifying userPassword (UEM) FAILED for personId:{person_id}, referrer:{referrer}"
            );
            LdapError::ModifyUserPassword(err)
        })?;

        tracing::info!(
            "LDAP: Successfully modified userPassword (UEM) for personId:{person_id}, referrer:{referrer}"
        );

        Ok(password)
    }

    /// Bind once without retry.
    pub async fn check_connection(&self) -> Result<()> {
        self.bind().await.map(|_| ())
    }

    /// Swap the first RDN of `old_dn` for `uid=<new_referrer>`.
    pub fn create_new_lehrer_uid_from_old_uid(
        old_dn: &str,
        new_referrer: &str,
    ) -> String {
        let new_rdn = format!("uid={}", escape_dn_value(new_referrer));
        match split_rdn(old_dn) {
            Some((_, parent)) => format!("{new_rdn},{parent}"),
            None => new_rdn,
        }
    }
}

fn generate_password() -> String {
    Alphanumeric.sample_string(&mut OsRng, PASSWORD_LENGTH)
}
