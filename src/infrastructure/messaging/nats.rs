//! NATS transport for the consumer loop.

use super::{BusMessage, ConsumeReport, MessagingError, consume, subscription_subjects};
use crate::application::services::EventDispatcher;
use crate::config::EventsConfig;
use futures::StreamExt;
use futures::stream::select_all;
use tokio::sync::watch;
use tracing::info;

/// Core NATS subscriber feeding the dispatcher.
#[derive(Debug, Clone)]
pub struct NatsConsumer {
    client: async_nats::Client,
    subjects: Vec<String>,
}

impl NatsConsumer {
    /// Connects to the configured servers.
    ///
    /// # Errors
    ///
    /// Returns `MessagingError::Connect` if no server can be reached.
    pub async fn connect(config: &EventsConfig) -> Result<Self, MessagingError> {
        let servers = config.servers.join(",");
        let client = async_nats::connect(servers.as_str())
            .await
            .map_err(|e| MessagingError::Connect(e.to_string()))?;
        info!(servers = %servers, "connected to nats");
        Ok(Self {
            client,
            subjects: subscription_subjects(&config.subject_prefix),
        })
    }

    /// Subjects this consumer subscribes to.
    #[must_use]
    pub fn subjects(&self) -> &[String] {
        &self.subjects
    }

    /// Subscribes and dispatches until `shutdown` turns true.
    ///
    /// # Errors
    ///
    /// Returns `MessagingError::Subscribe` if a subscription fails.
    pub async fn run(
        &self,
        dispatcher: &EventDispatcher,
        shutdown: watch::Receiver<bool>,
    ) -> Result<ConsumeReport, MessagingError> {
        let mut subscribers = Vec::with_capacity(self.subjects.len());
        for subject in &self.subjects {
            let subscriber = self
                .client
                .subscribe(subject.clone())
                .await
                .map_err(|e| MessagingError::Subscribe {
                    subject: subject.clone(),
                    message: e.to_string(),
                })?;
            info!(subject = %subject, "subscribed");
            subscribers.push(subscriber);
        }

        let stream = select_all(subscribers).map(|m| BusMessage {
            subject: m.subject.to_string(),
            payload: m.payload,
        });
        Ok(consume(stream, dispatcher, shutdown).await)
    }
}
