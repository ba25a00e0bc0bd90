//! LDAP support.

pub mod client;
pub mod codec;
mod groups;
pub mod retry;
mod service;
#[cfg(test)]
pub(crate) mod testing;
pub mod types;

pub use client::{DirectoryConnection, DirectoryError, Ldap3Client, LdapClient};
pub use retry::RetryPolicy;
pub use service::LdapClientService;
pub use types::{LdapPersonAttributes, PersonData, RootName};
