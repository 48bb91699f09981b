use serde::{Deserialize, Serialize};

use crate::error::MixnetError;
use crate::model::{ids::NodeId, payload::MixnetPayload};

/// Type discriminant some channels put in front of the serialised state.
pub const MESSAGE_TYPE: u8 = 0;

/// The token that circulates between the orchestrator and the nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MixnetState {
    pub payload: MixnetPayload,
    pub node_to_visit: NodeId,
    pub retry_count: u32,
    #[serde(default)]
    pub mixnet_error: Option<String>,
}

/// The part of a state that defines the logical request a node executes.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestContent<'a> {
    payload: &'a MixnetPayload,
    node_to_visit: NodeId,
}

impl MixnetState {
    /// A fresh token addressed to the first node.
    pub fn new(payload: MixnetPayload, retry_count: u32) -> Self {
        Self {
            payload,
            node_to_visit: 1,
            retry_count,
            mixnet_error: None,
        }
    }

    pub fn with_error(mut self, error: &MixnetError) -> Self {
        self.mixnet_error = Some(error.to_string());
        self
    }

    pub fn has_error(&self) -> bool {
        self.mixnet_error.is_some()
    }

    /// Serialise with the leading type byte.
    pub fn to_message_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = vec![MESSAGE_TYPE];
        serde_json::to_writer(&mut bytes, self)?;
        Ok(bytes)
    }

    /// Parse a message body, with or without the leading type byte.
    pub fn from_message_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        match bytes.split_first() {
            Some((&MESSAGE_TYPE, rest)) => serde_json::from_slice(rest),
            _ => serde_json::from_slice(bytes),
        }
    }

    /// Bytes identifying the request for exactly-once processing.
    ///
    /// Retry bookkeeping is left out, so a resent hop is the same request.
    pub fn request_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&RequestContent {
            payload: &self.payload,
            node_to_visit: self.node_to_visit,
        })
    }
}
