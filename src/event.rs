//! Publish domain events as CloudEvents on RabbitMQ.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;
use serde::Serialize;
use url::Url;

use crate::config::Broker;
use crate::ldap::types::PersonId;

const CONTENT_ENCODING: &str = "utf8";
const CONTENT_TYPE: &str = "application/cloudevents+json";
const DATA_CONTENT_TYPE: &str = "application/json";
const CLOUDEVENT_VERSION: &str = "1.0";
const SOURCE: &str = "lehrer-sync";
const ID_LENGTH: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("invalid broker address: {0}")]
    Url(#[from] url::ParseError),
    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),
    #[error("cannot serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A directory entry of a person was modified.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LdapPersonEntryChangedEvent {
    pub person_id: PersonId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mail_primary_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mail_alternative_address: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub user_password_changed: bool,
}

/// Events emitted by the directory synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DomainEvent {
    LdapPersonEntryChanged(LdapPersonEntryChangedEvent),
}

impl DomainEvent {
    /// CloudEvents `type` attribute.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::LdapPersonEntryChanged(_) => {
                "de.schule-sh.ldap.person-entry-changed"
            },
        }
    }
}

/// Port for emitting domain events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<(), EventError>;
}

#[derive(Debug, Serialize)]
struct Cloudevent<'a> {
    specversion: &'static str,
    r#type: &'static str,
    source: &'static str,
    id: String,
    time: String,
    datacontenttype: &'static str,
    data: &'a DomainEvent,
}

impl<'a> Cloudevent<'a> {
    fn new(data: &'a DomainEvent) -> Self {
        Cloudevent {
            specversion: CLOUDEVENT_VERSION,
            r#type: data.event_type(),
            source: SOURCE,
            id: Alphanumeric.sample_string(&mut OsRng, ID_LENGTH),
            time: Utc::now().to_rfc3339(),
            datacontenttype: DATA_CONTENT_TYPE,
            data,
        }
    }
}

/// RabbitMQ publisher. Events are dropped when no broker is configured.
#[derive(Clone, Default)]
pub struct EventService {
    queue: String,
    conn: Option<Arc<Connection>>,
}

impl EventService {
    /// Create a new [`EventService`].
    pub async fn new(config: &Broker) -> Result<Self, EventError> {
        let addr = Url::parse(&config.address)?;
        let conn_config = ConnectionProperties::default()
            .with_connection_name("lehrer_sync_events".into());
        let conn = Connection::connect(addr.as_str(), conn_config).await?;

        tracing::info!(host = ?addr.host_str(), "rabbitmq connected");

        Ok(Self {
            queue: config.queue.clone(),
            conn: Some(Arc::new(conn)),
        })
    }

    async fn create_channel(
        conn: &Connection,
        queue: &str,
    ) -> Result<Channel, EventError> {
        let channel = conn.create_channel().await?;
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(channel)
    }
}

#[async_trait]
impl EventPublisher for EventService {
    async fn publish(&self, event: &DomainEvent) -> Result<(), EventError> {
        let Some(conn) = &self.conn else {
            tracing::debug!(
                event_type = event.event_type(),
                "no broker configured, event dropped"
            );
            return Ok(());
        };
        let channel = Self::create_channel(conn, &self.queue).await?;

        let payload = serde_json::to_string(&Cloudevent::new(event))?;
        channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                payload.as_bytes(),
                BasicProperties::default()
                    .with_content_encoding(CONTENT_ENCODING.into())
                    .with_content_type(CONTENT_TYPE.into()),
            )
            .await?;

        tracing::trace!(event_type = event.event_type(), "event sent");

        Ok(())
    }
}
