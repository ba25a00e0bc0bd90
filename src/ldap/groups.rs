//! School group membership of teachers.
//!
//! Each school `kennung` owns one `groupOfNames` entry,
//! `cn=lehrer-<kennung>,cn=groups,ou=<kennung>,<base>`. It is created with the
//! first member and deleted with the last one.

use ldap3::Scope;

use super::client::{DirectoryConnection, DirectoryError};
use super::codec::{
    Attributes, Change, Entry, escape_dn_value, escape_filter_value,
};
use super::service::LdapClientService;
use super::types::{
    GROUP_OF_NAMES, GROUP_PREFIX, LdapEntityType, ORGANIZATIONAL_UNIT,
};
use crate::error::{LdapError, Result};

impl LdapClientService {
    fn group_id(kennung: &str) -> String {
        format!("{GROUP_PREFIX}{kennung}")
    }

    fn group_filter(group_id: &str) -> String {
        format!(
            "(&(objectclass={GROUP_OF_NAMES})(cn={}))",
            escape_filter_value(group_id)
        )
    }

    fn ou_dn(&self, kennung: &str) -> String {
        format!("ou={},{}", escape_dn_value(kennung), self.base_dn())
    }

    async fn find_group(
        &self,
        conn: &mut dyn DirectoryConnection,
        group_id: &str,
    ) -> std::result::Result<Option<Entry>, DirectoryError> {
        let groups = conn
            .search(
                self.base_dn(),
                Scope::Subtree,
                &Self::group_filter(group_id),
                &["member"],
            )
            .await?;
        Ok(groups.into_iter().next())
    }

    /// Add `person_dn` to the group of school `kennung`.
    ///
    /// Returns `false` when the person already is a member.
    pub async fn add_person_to_group(
        &self,
        referrer: &str,
        kennung: &str,
        person_dn: &str,
    ) -> Result<bool> {
        self.retry
            .execute("add_person_to_group", || {
                self.add_person_to_group_once(referrer, kennung, person_dn)
            })
            .await
    }

    async fn add_person_to_group_once(
        &self,
        referrer: &str,
        kennung: &str,
        person_dn: &str,
    ) -> Result<bool> {
        let group_id = Self::group_id(kennung);
        let fail = |err: DirectoryError| LdapError::AddPersonToGroup {
            group_id: group_id.clone(),
            message: err.to_string(),
        };

        let mut conn = self.bind().await?;
        self.ensure_organizational_unit(conn.as_mut(), kennung)
            .await
            .map_err(fail)?;

        if let Some(group) =
            self.find_group(conn.as_mut(), &group_id).await.map_err(fail)?
        {
            if group.values("member").iter().any(|m| m == person_dn) {
                tracing::info!(
                    "LDAP: Person {referrer} is already in group {group_id}"
                );
                return Ok(false);
            }

            conn.modify(&group.dn, vec![Change::add("member", vec![
                person_dn.to_owned(),
            ])])
            .await
            .map_err(|err| {
                tracing::error!(
                    "LDAP: Failed to add person to group {group_id}, errMsg: {err}"
                );
                fail(err)
            })?;
            tracing::info!(
                "LDAP: Successfully added person {referrer} to group {group_id}"
            );
            return Ok(true);
        }

        let group_dn = format!(
            "cn={},cn=groups,{}",
            escape_dn_value(&group_id),
            self.ou_dn(kennung)
        );
        let attrs: Attributes = vec![
            ("objectclass".to_owned(), vec![GROUP_OF_NAMES.to_owned()]),
            ("cn".to_owned(), vec![group_id.clone()]),
            ("member".to_owned(), vec![person_dn.to_owned()]),
        ];
        conn.add(&group_dn, attrs).await.map_err(|err| {
            tracing::error!(
                "LDAP: Failed to create group {group_id}, errMsg: {err}"
            );
            fail(err)
        })?;
        tracing::info!(
            "LDAP: Successfully created group {group_id} and added person {referrer}"
        );

        Ok(true)
    }

    /// Create `ou=<kennung>` when missing and report a missing
    /// `cn=groups` role below it.
    async fn ensure_organizational_unit(
        &self,
        conn: &mut dyn DirectoryConnection,
        kennung: &str,
    ) -> std::result::Result<(), DirectoryError> {
        let ou_dn = self.ou_dn(kennung);
        let units = conn
            .search(
                &ou_dn,
                Scope::Base,
                &format!("(objectClass={ORGANIZATIONAL_UNIT})"),
                &[],
            )
            .await?;

        if units.is_empty() {
            let attrs: Attributes = vec![
                ("objectclass".to_owned(), vec![ORGANIZATIONAL_UNIT.to_owned()]),
                ("ou".to_owned(), vec![kennung.to_owned()]),
            ];
            conn.add(&ou_dn, attrs).await.map_err(|err| {
                tracing::error!(
                    "LDAP: Failed to create organizational unit {ou_dn}, errMsg: {err}"
                );
                err
            })?;
            tracing::info!(
                "LDAP: Successfully created organizational unit {ou_dn}"
            );
        }

        let role_dn = format!("cn=groups,{ou_dn}");
        let roles = conn
            .search(
                &role_dn,
                Scope::Base,
                "(objectClass=organizationalRole)",
                &[],
            )
            .await?;
        if roles.is_empty() {
            tracing::warn!("LDAP: Organizational role {role_dn} not found");
        }

        Ok(())
    }

    /// Remove `person_dn` from the group of school `kennung`.
    ///
    /// The group is deleted when the person was its only member.
    pub async fn remove_person_from_group(
        &self,
        person_uid: &str,
        kennung: &str,
        person_dn: &str,
    ) -> Result<bool> {
        self.retry
            .execute("remove_person_from_group", || {
                self.remove_person_from_group_once(
                    person_uid, kennung, person_dn,
                )
            })
            .await
    }

    async fn remove_person_from_group_once(
        &self,
        person_uid: &str,
        kennung: &str,
        person_dn: &str,
    ) -> Result<bool> {
        let group_id = Self::group_id(kennung);
        let fail = |err: DirectoryError| {
            tracing::error!(
                "LDAP: Failed to remove person from group {group_id}, errMsg: {err}"
            );
            LdapError::RemovePersonFromGroup {
                group_id: group_id.clone(),
                message: err.to_string(),
            }
        };

        let mut conn = self.bind().await?;
        let group = self
            .find_group(conn.as_mut(), &group_id)
            .await
            .map_err(fail)?
            .ok_or_else(|| {
                tracing::error!("LDAP: Group {group_id} not found");
                LdapError::GroupNotFound {
                    group_id: group_id.clone(),
                }
            })?;

        let members = group.values("member");
        if !members.iter().any(|m| m == person_dn) {
            tracing::error!(
                "LDAP: Person {person_uid} is not in group {group_id}"
            );
            return Err(LdapError::PersonNotInGroup {
                uid: person_uid.to_owned(),
                group_id: group_id.clone(),
            });
        }

        if members.len() == 1 {
            conn.delete(&group.dn).await.map_err(fail)?;
            tracing::info!("LDAP: Successfully deleted group {group_id}");
            return Ok(true);
        }

        conn.modify(&group.dn, vec![Change::delete("member", vec![
            person_dn.to_owned(),
        ])])
        .await
        .map_err(fail)?;
        tracing::info!(
            "LDAP: Successfully removed person {person_uid} from group {group_id}"
        );

        Ok(true)
    }

    /// Remove a teacher, named by username, from the group of `kennung`.
    pub async fn remove_person_from_group_by_username_and_kennung(
        &self,
        username: &str,
        kennung: &str,
        email_domain: &str,
    ) -> Result<bool> {
        let root = self.get_root_name(email_domain)?;
        let person_dn = self.lehrer_dn(username, root);
        self.remove_person_from_group(username, kennung, &person_dn)
            .await
    }

    /// Rewrite `old_dn` to its renamed form in every group listing it.
    ///
    /// Uses the caller's connection. Failing groups are logged and skipped.
    pub async fn update_member_dn_in_groups(
        &self,
        old_referrer: &str,
        new_referrer: &str,
        old_dn: &str,
        conn: &mut dyn DirectoryConnection,
    ) -> Result<String> {
        let groups = conn
            .search(
                self.base_dn(),
                Scope::Subtree,
                &format!("(member={})", escape_filter_value(old_dn)),
                &["member"],
            )
            .await
            .map_err(|err| {
                tracing::error!(
                    error = %err,
                    "LDAP: Error while searching for groups for person: {old_referrer}"
                );
                LdapError::GroupSearch {
                    referrer: old_referrer.to_owned(),
                }
            })?;

        if groups.is_empty() {
            let message = format!("No groups found for person:{old_referrer}");
            tracing::info!("LDAP: {message}");
            return Ok(message);
        }

        let new_dn =
            Self::create_new_lehrer_uid_from_old_uid(old_dn, new_referrer);
        let mut failed = 0;
        for group in &groups {
            let members = group
                .values("member")
                .into_iter()
                .map(|member| {
                    if member == old_dn {
                        new_dn.clone()
                    } else {
                        member
                    }
                })
                .collect();

            match conn
                .modify(&group.dn, vec![Change::replace("member", members)])
                .await
            {
                Ok(()) => tracing::info!(
                    "LDAP: Updated member data for group: {}",
                    group.dn
                ),
                Err(err) => {
                    failed += 1;
                    tracing::error!(
                        "LDAP: Error while updating member data for group: {}, errMsg: {err}",
                        group.dn
                    );
                },
            }
        }

        if failed > 0 {
            tracing::warn!(
                failed,
                total = groups.len(),
                "LDAP: Some groups kept the old member DN of {old_referrer}"
            );
        }

        let message = format!("Updated member data for {} groups.", groups.len());
        tracing::info!("LDAP: {message}");
        Ok(message)
    }

    /// DNs of all groups listing the person as member.
    pub async fn get_groups_for_person(
        &self,
        person_id: &str,
        referrer: &str,
    ) -> Result<Vec<String>> {
        self.retry
            .execute("get_groups_for_person", || {
                self.get_groups_for_person_once(person_id, referrer)
            })
            .await
    }

    async fn get_groups_for_person_once(
        &self,
        person_id: &str,
        referrer: &str,
    ) -> Result<Vec<String>> {
        let mut conn = self.bind().await?;

        let person = self
            .find_person(conn.as_mut(), referrer, &[])
            .await?
            .ok_or_else(|| {
                tracing::error!(
                    "LDAP: Fetching groups FAILED, no entry for personId:{person_id}, referrer:{referrer}"
                );
                LdapError::Search(LdapEntityType::Lehrer)
            })?;

        let groups = conn
            .search(
                self.base_dn(),
                Scope::Subtree,
                &format!("(member={})", escape_filter_value(&person.dn)),
                &["cn"],
            )
            .await
            .map_err(|err| {
                tracing::error!(
                    error = %err,
                    "LDAP: Fetching groups failed, personId:{person_id}, referrer:{referrer}"
                );
                LdapError::FetchGroups {
                    person_id: person_id.to_owned(),
                    referrer: referrer.to_owned(),
                }
            })?;

        if groups.is_empty() {
            tracing::info!(
                "LDAP: No groups found for person, personId:{person_id}, referrer:{referrer}"
            );
        }

        Ok(groups.into_iter().map(|group| group.dn).collect())
    }
}
