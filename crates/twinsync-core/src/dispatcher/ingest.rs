// ── Ingest tasks ──
//
// Bridge transport deliveries into the dispatcher. The transport fans
// out on a broadcast channel; a forwarder moves messages onto a bounded
// mpsc queue and a single ingest task drains it, so back-pressure lands
// on the transport side. Both tasks stop when the dispatcher shuts down.

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use twinsync_api::{InboundMessage, Topic, codec};

use super::{DispatchOutcome, EventDispatcher};
use crate::error::CoreError;
use crate::model::TelemetryEnvelope;

impl EventDispatcher {
    /// Decode one `(topic, payload)` pair and dispatch it.
    ///
    /// The topic's last segment selects the record type.
    pub fn ingest_message(&self, message: &InboundMessage) -> Result<DispatchOutcome, CoreError> {
        let topic: Topic = message.topic.parse()?;
        let record = codec::decode(topic.kind, &message.payload)?;
        self.on_telemetry(&TelemetryEnvelope::from(record))
    }

    /// Drain `rx` on a tokio task until the queue closes or the
    /// dispatcher shuts down. Undecodable messages are logged and
    /// dropped. Must be called from within a tokio runtime.
    pub fn spawn_ingest(&self, mut rx: mpsc::Receiver<InboundMessage>) -> JoinHandle<()> {
        let dispatcher = self.clone();
        let cancel = self.cancel_token().clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    message = rx.recv() => {
                        let Some(message) = message else { break };
                        match dispatcher.ingest_message(&message) {
                            Ok(outcome) => trace!(
                                topic = %message.topic,
                                twins = outcome.twins_updated.len(),
                                "message ingested"
                            ),
                            Err(CoreError::DispatcherUnavailable) => break,
                            Err(e) => warn!(topic = %message.topic, error = %e, "dropping message"),
                        }
                    }
                }
            }
            debug!("ingest task stopped");
        })
    }

    /// Create a bounded ingest queue sized from the config and spawn its
    /// ingest task.
    pub fn ingest_queue(&self) -> (mpsc::Sender<InboundMessage>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.config().ingest_queue_capacity.max(1));
        (tx, self.spawn_ingest(rx))
    }

    /// Forward a transport's inbound broadcast onto an ingest queue.
    pub fn forward_inbound(
        &self,
        mut inbound: broadcast::Receiver<InboundMessage>,
        tx: mpsc::Sender<InboundMessage>,
    ) -> JoinHandle<()> {
        let cancel = self.cancel_token().clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    result = inbound.recv() => match result {
                        Ok(message) => {
                            if tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "inbound forwarder lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            debug!("inbound forwarder stopped");
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::config::SyncConfig;

    fn message(topic: &str, payload: &'static str) -> InboundMessage {
        InboundMessage {
            topic: topic.to_owned(),
            payload: Bytes::from_static(payload.as_bytes()),
        }
    }

    #[test]
    fn ingest_message_routes_by_topic_kind() {
        let dispatcher = EventDispatcher::new(SyncConfig::default());
        let outcome = dispatcher
            .ingest_message(&message(
                "twinsync/EdgeDevice/SensorMsg",
                "{'deviceID': 'dev', 'locationID': 'loc', 'typeID': 1013, 'value': 3.5}",
            ))
            .unwrap();
        assert!(outcome.newly_known_device);
        assert!(dispatcher.connection_state("dev").unwrap().unwrap().is_connected());
    }

    #[test]
    fn ingest_message_reports_bad_input() {
        let dispatcher = EventDispatcher::new(SyncConfig::default());
        assert!(matches!(
            dispatcher.ingest_message(&message("not-a-topic", "{}")),
            Err(CoreError::Topic { .. })
        ));
        assert!(matches!(
            dispatcher.ingest_message(&message("twinsync/Edge/SensorMsg", "[1, 2")),
            Err(CoreError::Codec { .. })
        ));
    }

    #[tokio::test]
    async fn ingest_task_stops_on_shutdown() {
        let dispatcher = EventDispatcher::new(SyncConfig::default());
        let (tx, handle) = dispatcher.ingest_queue();
        tx.send(message(
            "twinsync/Edge/SensorMsg",
            r#"{"deviceID": "dev", "value": 1.0}"#,
        ))
        .await
        .unwrap();

        // Drain before shutting down.
        while !dispatcher.is_known_device("dev").unwrap() {
            tokio::task::yield_now().await;
        }
        assert!(dispatcher.shutdown());
        handle.await.unwrap();
    }
}
