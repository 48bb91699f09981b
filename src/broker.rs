use std::collections::HashMap;
use std::sync::Mutex;

use rocket::tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::error::{Error, Result};
use crate::model::ids::NodeId;

/// Envelope of everything sent over the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub correlation_id: String,
    pub body: Vec<u8>,
}

#[rocket::async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, channel: &str, message: Message) -> Result<()>;
}

/// Per-node request and response channel names.
#[derive(Debug, Clone)]
pub struct ChannelNames {
    request_prefix: String,
    response_prefix: String,
}

impl ChannelNames {
    pub fn new(request_prefix: impl Into<String>, response_prefix: impl Into<String>) -> Self {
        Self {
            request_prefix: request_prefix.into(),
            response_prefix: response_prefix.into(),
        }
    }

    /// Where node `node_id` receives work.
    pub fn request(&self, node_id: NodeId) -> String {
        format!("{}{node_id}", self.request_prefix)
    }

    /// Where node `node_id` answers.
    pub fn response(&self, node_id: NodeId) -> String {
        format!("{}{node_id}", self.response_prefix)
    }
}

struct Queue {
    sender: UnboundedSender<Message>,
    receiver: Option<UnboundedReceiver<Message>>,
}

impl Queue {
    fn new() -> Self {
        let (sender, receiver) = unbounded_channel();
        Self {
            sender,
            receiver: Some(receiver),
        }
    }
}

/// In-process broker: one queue per channel, each with a single consumer.
///
/// Messages published before the consumer subscribes are buffered.
/// With [`ChannelBroker::at_least_once`] every message is delivered twice.
#[derive(Default)]
pub struct ChannelBroker {
    queues: Mutex<HashMap<String, Queue>>,
    redeliver: bool,
}

impl ChannelBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at_least_once() -> Self {
        Self {
            queues: Default::default(),
            redeliver: true,
        }
    }

    /// Take the consuming end of `channel`. Each channel has exactly one consumer.
    pub fn subscribe(&self, channel: &str) -> Result<UnboundedReceiver<Message>> {
        let mut queues = self.queues.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        queues
            .entry(channel.to_string())
            .or_insert_with(Queue::new)
            .receiver
            .take()
            .ok_or_else(|| Error::Broker(format!("channel {channel} already has a consumer")))
    }
}

#[rocket::async_trait]
impl Broker for ChannelBroker {
    async fn publish(&self, channel: &str, message: Message) -> Result<()> {
        let sender = {
            let mut queues = self.queues.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            queues
                .entry(channel.to_string())
                .or_insert_with(Queue::new)
                .sender
                .clone()
        };
        trace!("Publishing {} bytes to {channel}", message.body.len());
        if self.redeliver {
            sender
                .send(message.clone())
                .map_err(|_| Error::Broker(format!("channel {channel} is closed")))?;
        }
        sender
            .send(message)
            .map_err(|_| Error::Broker(format!("channel {channel} is closed")))
    }
}
