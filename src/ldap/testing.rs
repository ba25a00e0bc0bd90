//! Scripted directory for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ldap3::Scope;

use super::client::{DirectoryConnection, DirectoryResult, LdapClient};
use super::codec::{Attributes, Change, Entry};
use crate::event::{DomainEvent, EventError, EventPublisher};

/// A directory call seen by [`FakeClient`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Bind { dn: String },
    Search { base: String, filter: String },
    Add { dn: String, attrs: Attributes },
    Modify { dn: String, changes: Vec<Change> },
    ModifyDn { dn: String, new_rdn: String },
    Delete { dn: String },
}

struct ScriptedSearch {
    key: String,
    sticky: bool,
    result: DirectoryResult<Vec<Entry>>,
}

#[derive(Default)]
struct FakeState {
    connect: VecDeque<DirectoryResult<()>>,
    bind: VecDeque<DirectoryResult<()>>,
    search: Vec<ScriptedSearch>,
    add: VecDeque<DirectoryResult<()>>,
    modify: VecDeque<DirectoryResult<()>>,
    modify_dn: VecDeque<DirectoryResult<()>>,
    delete: VecDeque<DirectoryResult<()>>,
    calls: Vec<Call>,
    connections: usize,
}

/// In-memory [`LdapClient`].
///
/// Results are consumed in order per operation and default to success.
/// Searches are matched by a key contained in `"<base> <filter>"` and
/// default to an empty result.
#[derive(Clone, Default)]
pub struct FakeClient {
    state: Arc<Mutex<FakeState>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn on_connect(&self, result: DirectoryResult<()>) {
        self.with_state(|s| s.connect.push_back(result));
    }

    pub fn on_bind(&self, result: DirectoryResult<()>) {
        self.with_state(|s| s.bind.push_back(result));
    }

    /// Answer the next search matching `key` once.
    pub fn on_search(&self, key: &str, result: DirectoryResult<Vec<Entry>>) {
        self.with_state(|s| {
            s.search.push(ScriptedSearch {
                key: key.to_owned(),
                sticky: false,
                result,
            })
        });
    }

    /// Answer every search matching `key`.
    pub fn on_search_always(
        &self,
        key: &str,
        result: DirectoryResult<Vec<Entry>>,
    ) {
        self.with_state(|s| {
            s.search.push(ScriptedSearch {
                key: key.to_owned(),
                sticky: true,
                result,
            })
        });
    }

    pub fn on_add(&self, result: DirectoryResult<()>) {
        self.with_state(|s| s.add.push_back(result));
    }

    pub fn on_modify(&self, result: DirectoryResult<()>) {
        self.with_state(|s| s.modify.push_back(result));
    }

    pub fn on_delete(&self, result: DirectoryResult<()>) {
        self.with_state(|s| s.delete.push_back(result));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.with_state(|s| s.calls.clone())
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.with_state(|s| s.calls.iter().filter(|c| predicate(c)).count())
    }

    /// Every `add` call as `(dn, attributes)`.
    pub fn adds(&self) -> Vec<(String, Attributes)> {
        self.with_state(|s| {
            s.calls
                .iter()
                .filter_map(|call| match call {
                    Call::Add { dn, attrs } => Some((dn.clone(), attrs.clone())),
                    _ => None,
                })
                .collect()
        })
    }

    /// Number of `get_client` calls, failed ones included.
    pub fn connections(&self) -> usize {
        self.with_state(|s| s.connections)
    }

    /// Open a connection without going through `get_client`.
    pub fn connect(&self) -> Box<dyn DirectoryConnection> {
        Box::new(FakeConnection {
            state: Arc::clone(&self.state),
        })
    }
}

#[async_trait]
impl LdapClient for FakeClient {
    async fn get_client(&self) -> DirectoryResult<Box<dyn DirectoryConnection>> {
        self.with_state(|s| {
            s.connections += 1;
            s.connect.pop_front().unwrap_or(Ok(()))
        })?;
        Ok(self.connect())
    }
}

struct FakeConnection {
    state: Arc<Mutex<FakeState>>,
}

impl FakeConnection {
    fn record(
        &self,
        call: Call,
        f: impl FnOnce(&mut FakeState) -> Option<DirectoryResult<()>>,
    ) -> DirectoryResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        f(&mut state).unwrap_or(Ok(()))
    }
}

#[async_trait]
impl DirectoryConnection for FakeConnection {
    async fn bind(&mut self, dn: &str, _password: &str) -> DirectoryResult<()> {
        self.record(Call::Bind { dn: dn.to_owned() }, |s| s.bind.pop_front())
    }

    async fn search(
        &mut self,
        base: &str,
        _scope: Scope,
        filter: &str,
        _attrs: &[&str],
    ) -> DirectoryResult<Vec<Entry>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Search {
            base: base.to_owned(),
            filter: filter.to_owned(),
        });

        let haystack = format!("{base} {filter}");
        let Some(index) = state
            .search
            .iter()
            .position(|scripted| haystack.contains(&scripted.key))
        else {
            return Ok(Vec::new());
        };

        if state.search[index].sticky {
            state.search[index].result.clone()
        } else {
            state.search.remove(index).result
        }
    }

    async fn add(
        &mut self,
        dn: &str,
        attrs: Attributes,
    ) -> DirectoryResult<()> {
        self.record(
            Call::Add {
                dn: dn.to_owned(),
                attrs,
            },
            |s| s.add.pop_front(),
        )
    }

    async fn modify(
        &mut self,
        dn: &str,
        changes: Vec<Change>,
    ) -> DirectoryResult<()> {
        self.record(
            Call::Modify {
                dn: dn.to_owned(),
                changes,
            },
            |s| s.modify.pop_front(),
        )
    }

    async fn modify_dn(
        &mut self,
        dn: &str,
        new_rdn: &str,
    ) -> DirectoryResult<()> {
        self.record(
            Call::ModifyDn {
                dn: dn.to_owned(),
                new_rdn: new_rdn.to_owned(),
            },
            |s| s.modify_dn.pop_front(),
        )
    }

    async fn delete(&mut self, dn: &str) -> DirectoryResult<()> {
        self.record(Call::Delete { dn: dn.to_owned() }, |s| {
            s.delete.pop_front()
        })
    }
}

/// [`EventPublisher`] keeping every published event.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<DomainEvent>>,
    failing: bool,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Publisher rejecting every event.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            failing: true,
            ..Default::default()
        })
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), EventError> {
        if self.failing {
            return Err(EventError::Serialization(serde::de::Error::custom(
                "broker unavailable",
            )));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
