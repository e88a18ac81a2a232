use crate::error::NetworkError;
use crate::interfaces::{InboundMessage, Network};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc;

const SUBSCRIPTION_BUFFER: usize = 256;

/// In-process publish/subscribe fan-out.
///
/// Every broadcast is delivered to all current subscribers of the topic
/// (including the publisher's own subscriptions) and kept in an outbox so
/// tests can inspect what was published. Full or closed subscriber queues
/// drop the message for that subscriber only.
#[derive(Debug, Default)]
pub struct LoopbackNetwork {
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<InboundMessage>>>>,
    outbox: Mutex<Vec<InboundMessage>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payloads broadcast on `topic`, oldest first.
    pub fn sent_on(&self, topic: &str) -> Vec<Vec<u8>> {
        self.outbox
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }
}

#[async_trait]
impl Network for LoopbackNetwork {
    async fn broadcast(&self, topic: &str, payload: Vec<u8>) -> Result<(), NetworkError> {
        let message = InboundMessage {
            topic: topic.to_string(),
            payload,
        };
        self.outbox.lock().push(message.clone());

        let mut subscribers = self.subscribers.lock();
        if let Some(senders) = subscribers.get_mut(topic) {
            senders.retain(|tx| match tx.try_send(message.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::warn!("network: subscriber queue full on {}, dropping message", topic);
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> mpsc::Receiver<InboundMessage> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.subscribers
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        rx
    }
}
