//! NATS-brokered cross-process bridge.
//!
//! Wraps a [`LocalBus`] for in-process delivery and mirrors every message on
//! a NATS subject so sibling server processes converge. Subjects reuse the
//! topic names under a configurable prefix.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::{Bus, BusMessage, LocalBus};

#[derive(Debug, thiserror::Error)]
pub enum NatsBusError {
    #[error("NATS connection failed: {0}")]
    Connect(String),
}

/// Configuration for the bridge connection.
#[derive(Debug, Clone)]
pub struct NatsBusConfig {
    pub url: String,
    pub client_name: String,
    pub subject_prefix: String,
    pub connect_timeout: Duration,
}

impl Default for NatsBusConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            client_name: "trove-server".to_string(),
            subject_prefix: "trove".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// The brokered bus: local fan-out plus NATS mirroring.
#[derive(Clone)]
pub struct NatsBus {
    local: LocalBus,
    client: async_nats::Client,
    prefix: String,
    bridged: std::sync::Arc<dashmap::DashSet<String>>,
}

impl NatsBus {
    pub async fn connect(config: NatsBusConfig) -> Result<Self, NatsBusError> {
        let options = async_nats::ConnectOptions::new()
            .name(&config.client_name)
            .connection_timeout(config.connect_timeout);
        let client = async_nats::connect_with_options(&config.url, options)
            .await
            .map_err(|e| NatsBusError::Connect(e.to_string()))?;
        info!(url = %config.url, "connected to NATS bridge");
        Ok(Self {
            local: LocalBus::new(),
            client,
            prefix: config.subject_prefix,
            bridged: std::sync::Arc::new(dashmap::DashSet::new()),
        })
    }

    fn subject(&self, topic: &str) -> String {
        format!("{}.{}", self.prefix, topic)
    }

    /// Start mirroring a topic from NATS into the local bus, once per topic.
    /// Messages this process published come back too; coherence handling is
    /// idempotent so the echo is harmless.
    async fn bridge_topic(&self, topic: &str) {
        if !self.bridged.insert(topic.to_string()) {
            return;
        }
        let subject = self.subject(topic);
        let local = self.local.clone();
        let topic = topic.to_string();
        match self.client.subscribe(subject.clone()).await {
            Ok(mut subscriber) => {
                tokio::spawn(async move {
                    while let Some(msg) = subscriber.next().await {
                        match serde_json::from_slice::<BusMessage>(&msg.payload) {
                            Ok(message) => local.publish(&topic, message).await,
                            Err(e) => {
                                error!(subject = %msg.subject, "undecodable bus message: {e}");
                            }
                        }
                    }
                });
            }
            Err(e) => error!(subject = %subject, "NATS subscribe failed: {e}"),
        }
    }
}

#[async_trait]
impl Bus for NatsBus {
    async fn publish(&self, topic: &str, message: BusMessage) {
        match serde_json::to_vec(&message) {
            Ok(payload) => {
                if let Err(e) = self
                    .client
                    .publish(self.subject(topic), payload.into())
                    .await
                {
                    error!(topic, "NATS publish failed: {e}");
                }
                debug!(topic, "published bus message");
            }
            Err(e) => error!(topic, "unserializable bus message: {e}"),
        }
        // Local delivery does not depend on the broker round-trip.
        self.local.publish(topic, message).await;
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage> {
        let receiver = self.local.subscribe(topic);
        let this = self.clone();
        let topic = topic.to_string();
        tokio::spawn(async move {
            this.bridge_topic(&topic).await;
        });
        receiver
    }
}
