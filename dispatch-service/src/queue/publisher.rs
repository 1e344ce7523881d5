//! Async RabbitMQ publisher for the AMQP queue backend.
//!
//! One publisher holds the connection; each model queue gets a cheap
//! [`AmqpQueue`] handle onto it.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions},
    publisher_confirm::Confirmation,
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::dispatch::WorkQueue;

/// Async RabbitMQ publisher with connection management.
///
/// The publisher maintains a persistent connection and channel to RabbitMQ,
/// automatically reconnecting on failure.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

struct PublisherInner {
    url: String,
    /// Durable queues declared on every (re)connect
    queues: Vec<String>,
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
}

impl Publisher {
    /// Create a publisher that declares `queues` once connected.
    pub fn new(url: String, queues: Vec<String>) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                url,
                queues,
                connection: RwLock::new(None),
                channel: RwLock::new(None),
            }),
        }
    }

    /// Handle that publishes to `name` through this publisher.
    pub fn queue(&self, name: impl Into<String>) -> AmqpQueue {
        AmqpQueue {
            name: name.into(),
            publisher: self.clone(),
        }
    }

    /// Ensure we have a valid connection and channel.
    pub async fn ensure_connected(&self) -> Result<Channel> {
        {
            let channel = self.inner.channel.read().await;
            if let Some(ch) = channel.as_ref() {
                if ch.status().connected() {
                    return Ok(ch.clone());
                }
            }
        }

        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        // Double-check after acquiring write lock
        if let Some(ch) = channel.as_ref() {
            if ch.status().connected() {
                return Ok(ch.clone());
            }
        }

        info!("rabbitmq_publisher_connecting");

        let conn = Connection::connect(&self.inner.url, ConnectionProperties::default())
            .await
            .context("Failed to connect to RabbitMQ")?;

        info!("rabbitmq_publisher_connected");

        let ch = conn
            .create_channel()
            .await
            .context("Failed to create channel")?;

        ch.confirm_select(ConfirmSelectOptions::default())
            .await
            .context("Failed to enable publisher confirms")?;

        // Declaring is idempotent; workers may have created them already.
        for queue in &self.inner.queues {
            ch.queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to declare queue {}", queue))?;
        }

        info!(queues = ?self.inner.queues, "rabbitmq_queues_declared");

        *connection = Some(conn);
        *channel = Some(ch.clone());

        Ok(ch)
    }

    /// Publish a JSON body to `queue` and wait for the broker confirm.
    pub async fn publish(&self, queue: &str, body: &[u8]) -> Result<()> {
        let channel = self.ensure_connected().await?;

        let confirmation = channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into()),
            )
            .await
            .with_context(|| format!("Failed to publish to {}", queue))?
            .await
            .context("Failed to confirm publish")?;
        confirmation_result(queue, confirmation)?;

        info!(queue = %queue, body_length = body.len(), "rabbitmq_published");

        Ok(())
    }

    /// Close the connection gracefully.
    pub async fn close(&self) {
        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        if let Some(ch) = channel.take() {
            if let Err(e) = ch.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_channel_close_error");
            }
        }

        if let Some(conn) = connection.take() {
            if let Err(e) = conn.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_connection_close_error");
            }
        }

        info!("rabbitmq_publisher_closed");
    }
}

/// Only a broker ack counts as published.
fn confirmation_result(queue: &str, confirmation: Confirmation) -> Result<()> {
    match confirmation {
        Confirmation::Ack(_) => Ok(()),
        Confirmation::Nack(_) => bail!("broker nacked publish to {}", queue),
        Confirmation::NotRequested => bail!("publish to {} was not confirmed", queue),
    }
}

/// A single durable RabbitMQ queue on a shared [`Publisher`].
#[derive(Clone)]
pub struct AmqpQueue {
    name: String,
    publisher: Publisher,
}

#[async_trait]
impl WorkQueue for AmqpQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn append(&self, payload: &[u8]) -> Result<()> {
        self.publisher.publish(&self.name, payload).await
    }
}
