//! Directory connection provider.
//!
//! Every public service call asks [`LdapClient::get_client`] for a fresh
//! [`DirectoryConnection`]; nothing is pooled or cached.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::controls::RawControl;
use ldap3::{
    Ldap, LdapConnAsync, LdapConnSettings, Mod, Scope, SearchEntry,
    SearchResult,
};

use super::codec::{Attributes, Change, Entry};

/// `noSuchObject` result code.
const NO_SUCH_OBJECT: u32 = 32;
/// OpenLDAP Relax Rules control, required to write `entryUUID`.
const RELAX_RULES_OID: &str = "1.3.6.1.4.1.4203.666.5.12";
const ENTRY_UUID: &str = "entryUUID";

pub type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

/// Failure reported by a directory round-trip.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory unreachable: {0}")]
    Transport(String),
    #[error("directory returned rc={rc}: {text}")]
    Rejected { rc: u32, text: String },
}

impl From<ldap3::LdapError> for DirectoryError {
    fn from(err: ldap3::LdapError) -> Self {
        match err {
            ldap3::LdapError::LdapResult { result } => {
                DirectoryError::Rejected {
                    rc: result.rc,
                    text: result.text,
                }
            },
            err => DirectoryError::Transport(err.to_string()),
        }
    }
}

/// One open session with the directory.
#[async_trait]
pub trait DirectoryConnection: Send {
    async fn bind(&mut self, dn: &str, password: &str) -> DirectoryResult<()>;

    /// Search under `base`. A missing base yields an empty result.
    async fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: &[&str],
    ) -> DirectoryResult<Vec<Entry>>;

    async fn add(&mut self, dn: &str, attrs: Attributes)
    -> DirectoryResult<()>;

    async fn modify(
        &mut self,
        dn: &str,
        changes: Vec<Change>,
    ) -> DirectoryResult<()>;

    /// Rename the leaf RDN of `dn`, keeping its parent.
    async fn modify_dn(&mut self, dn: &str, new_rdn: &str)
    -> DirectoryResult<()>;

    async fn delete(&mut self, dn: &str) -> DirectoryResult<()>;
}

/// Source of fresh directory connections.
#[async_trait]
pub trait LdapClient: Send + Sync {
    async fn get_client(&self) -> DirectoryResult<Box<dyn DirectoryConnection>>;
}

/// [`LdapClient`] backed by `ldap3`.
#[derive(Debug, Clone)]
pub struct Ldap3Client {
    url: String,
    timeout: Option<Duration>,
}

impl Ldap3Client {
    /// Create a new [`Ldap3Client`].
    pub fn new(url: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl LdapClient for Ldap3Client {
    async fn get_client(&self) -> DirectoryResult<Box<dyn DirectoryConnection>> {
        let mut settings = LdapConnSettings::new();
        if let Some(timeout) = self.timeout {
            settings = settings.set_conn_timeout(timeout);
        }

        let (conn, ldap) =
            LdapConnAsync::with_settings(settings, &self.url).await?;
        ldap3::drive!(conn);

        tracing::trace!(url = %self.url, "ldap connection opened");

        Ok(Box::new(Ldap3Connection { ldap }))
    }
}

/// Critical Relax Rules control for the next operation.
fn relax_rules() -> RawControl {
    RawControl {
        ctype: RELAX_RULES_OID.into(),
        crit: true,
        val: None,
    }
}

/// Single `ldap3` session.
pub struct Ldap3Connection {
    ldap: Ldap,
}

#[async_trait]
impl DirectoryConnection for Ldap3Connection {
    async fn bind(&mut self, dn: &str, password: &str) -> DirectoryResult<()> {
        self.ldap.simple_bind(dn, password).await?.success()?;
        Ok(())
    }

    async fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: &[&str],
    ) -> DirectoryResult<Vec<Entry>> {
        let SearchResult(entries, result) = self
            .ldap
            .search(base, scope, filter, attrs.to_vec())
            .await?;

        if result.rc == NO_SUCH_OBJECT {
            return Ok(Vec::new());
        }
        result.success()?;

        Ok(entries
            .into_iter()
            .map(|entry| Entry::from(SearchEntry::construct(entry)))
            .collect())
    }

    async fn add(
        &mut self,
        dn: &str,
        attrs: Attributes,
    ) -> DirectoryResult<()> {
        let relax = attrs
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case(ENTRY_UUID));
        let attrs = attrs
            .into_iter()
            .map(|(name, values)| {
                (name, values.into_iter().collect::<HashSet<_>>())
            })
            .collect::<Vec<_>>();

        if relax {
            self.ldap.with_controls(relax_rules());
        }

        self.ldap.add(dn, attrs).await?.success()?;
        Ok(())
    }

    async fn modify(
        &mut self,
        dn: &str,
        changes: Vec<Change>,
    ) -> DirectoryResult<()> {
        let mods = changes.into_iter().map(Mod::from).collect::<Vec<_>>();
        self.ldap.modify(dn, mods).await?.success()?;
        Ok(())
    }

    async fn modify_dn(
        &mut self,
        dn: &str,
        new_rdn: &str,
    ) -> DirectoryResult<()> {
        self.ldap.modifydn(dn, new_rdn, true, None).await?.success()?;
        Ok(())
    }

    async fn delete(&mut self, dn: &str) -> DirectoryResult<()> {
        self.ldap.delete(dn).await?.success()?;
        Ok(())
    }
}
