//! Error handler for lehrer-sync.

use crate::ldap::client::DirectoryError;
use crate::ldap::types::LdapEntityType;

pub type Result<T> = std::result::Result<T, LdapError>;

/// Enum representing failures of directory synchronization.
///
/// Validation variants (`EmailDomain`, `EmailAddress`, `MissingReferrer`) are
/// returned before any directory I/O. Every other variant wraps or describes
/// the underlying [`DirectoryError`].
#[derive(Debug, thiserror::Error)]
pub enum LdapError {
    #[error("LDAP bind FAILED")]
    Bind(#[source] DirectoryError),

    #[error("LDAP: email domain {domain} does not match any root")]
    EmailDomain { domain: String },
    #[error("LDAP: email address {address} cannot be split into local part and domain")]
    EmailAddress { address: String },
    #[error("LDAP: person {person_id} has no referrer")]
    MissingReferrer { person_id: String },

    #[error("LDAP: {0} could not be found")]
    Search(LdapEntityType),

    #[error("LDAP: creating lehrer {dn} FAILED")]
    CreateLehrer {
        dn: String,
        #[source]
        source: DirectoryError,
    },
    #[error("LDAP: deleting lehrer {dn} FAILED")]
    DeleteLehrer {
        dn: String,
        #[source]
        source: DirectoryError,
    },
    #[error("LDAP: modifying attributes of {referrer} FAILED")]
    ModifyPersonAttributes {
        referrer: String,
        #[source]
        source: DirectoryError,
    },

    #[error("LDAP: failed to add person to group {group_id}: {message}")]
    AddPersonToGroup { group_id: String, message: String },
    #[error("LDAP: failed to remove person from group {group_id}: {message}")]
    RemovePersonFromGroup { group_id: String, message: String },
    #[error("LDAP: Group {group_id} not found")]
    GroupNotFound { group_id: String },
    #[error("LDAP: Person {uid} is not in group {group_id}")]
    PersonNotInGroup { uid: String, group_id: String },
    #[error("LDAP: Error while searching for groups for person: {referrer}")]
    GroupSearch { referrer: String },
    #[error("LDAP: Fetching groups failed, personId:{person_id}, referrer:{referrer}")]
    FetchGroups { person_id: String, referrer: String },

    #[error("LDAP: modifying mailPrimaryAddress and mailAlternativeAddress FAILED")]
    ModifyEmail(#[source] DirectoryError),
    #[error("LDAP: modifying userPassword FAILED")]
    ModifyUserPassword(#[source] DirectoryError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl LdapError {
    /// Short, stable name of the error kind for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            LdapError::Bind(_) => "bind",
            LdapError::EmailDomain { .. } => "email_domain",
            LdapError::EmailAddress { .. } => "email_address",
            LdapError::MissingReferrer { .. } => "missing_referrer",
            LdapError::Search(_) => "search",
            LdapError::CreateLehrer { .. } => "create_lehrer",
            LdapError::DeleteLehrer { .. } => "delete_lehrer",
            LdapError::ModifyPersonAttributes { .. } => {
                "modify_person_attributes"
            },
            LdapError::AddPersonToGroup { .. } => "add_person_to_group",
            LdapError::RemovePersonFromGroup { .. } => {
                "remove_person_from_group"
            },
            LdapError::GroupNotFound { .. } => "group_not_found",
            LdapError::PersonNotInGroup { .. } => "person_not_in_group",
            LdapError::GroupSearch { .. } => "group_search",
            LdapError::FetchGroups { .. } => "fetch_groups",
            LdapError::ModifyEmail(_) => "modify_email",
            LdapError::ModifyUserPassword(_) => "modify_user_password",
            LdapError::Directory(_) => "directory",
        }
    }
}
