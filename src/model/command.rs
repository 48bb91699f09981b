use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ids::NodeId, serde_hex};

/// Names one logical request within one node's scope.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestIdentity {
    pub correlation_id: String,
    pub context_id: String,
    pub context: String,
    pub node_id: NodeId,
}

impl RequestIdentity {
    pub fn new(correlation_id: impl Into<String>, context_id: impl Into<String>, context: impl Into<String>, node_id: NodeId) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            context_id: context_id.into(),
            context: context.into(),
            node_id,
        }
    }
}

impl Display for RequestIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[correlationId: {}, contextId: {}, context: {}, nodeId: {}]",
            self.correlation_id, self.context_id, self.context, self.node_id
        )
    }
}

/// The permanent memory of a request a node has seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    #[serde(flatten)]
    pub identity: RequestIdentity,
    #[serde(with = "serde_hex")]
    pub request_payload: Vec<u8>,
    pub request_time: DateTime<Utc>,
    /// Written exactly once, after the computation succeeded.
    #[serde(default, with = "serde_hex::option")]
    pub response_payload: Option<Vec<u8>>,
    #[serde(default)]
    pub response_time: Option<DateTime<Utc>>,
}

impl CommandRecord {
    pub fn new(identity: RequestIdentity, request_payload: Vec<u8>) -> Self {
        Self {
            identity,
            request_payload,
            request_time: Utc::now(),
            response_payload: None,
            response_time: None,
        }
    }
}
