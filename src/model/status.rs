use chrono::{DateTime, Utc};
use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

use crate::model::ids::{BallotBoxId, EntityId, NodeId};

/// Mixing status of a ballot box. `NotFound` is never stored: it is the absence of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MixingStatus {
    NotFound,
    Processing,
    Mixed,
    Error,
}

impl From<MixingStatus> for Bson {
    fn from(status: MixingStatus) -> Self {
        to_bson(&status).expect("Serialisation is infallible")
    }
}

/// Status as reported by the online control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnlineStatus {
    NotStarted,
    Processing,
    Mixed,
    Error,
}

impl From<MixingStatus> for OnlineStatus {
    fn from(status: MixingStatus) -> Self {
        match status {
            MixingStatus::NotFound => Self::NotStarted,
            MixingStatus::Processing => Self::Processing,
            MixingStatus::Mixed => Self::Mixed,
            MixingStatus::Error => Self::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BallotBoxStatus {
    pub election_event_id: EntityId,
    pub ballot_box_id: EntityId,
    pub status: MixingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl BallotBoxStatus {
    pub fn new(id: &BallotBoxId, status: MixingStatus, error_message: Option<String>) -> Self {
        Self {
            election_event_id: id.election_event_id().clone(),
            ballot_box_id: id.ballot_box_id().clone(),
            status,
            error_message,
        }
    }

    pub fn not_found(id: &BallotBoxId) -> Self {
        Self::new(id, MixingStatus::NotFound, None)
    }
}

/// The token a run is waiting on: the node it was sent to and the retries it carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    pub node_to_visit: NodeId,
    pub retry_count: u32,
}

impl Hop {
    pub fn new(node_to_visit: NodeId, retry_count: u32) -> Self {
        Self {
            node_to_visit,
            retry_count,
        }
    }
}

/// The persisted status of one mixing run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub tenant_id: String,
    pub election_event_id: EntityId,
    pub ballot_box_id: EntityId,
    pub status: MixingStatus,
    pub error_message: Option<String>,
    /// Identifies the run; messages of an earlier run are ignored.
    pub correlation_id: String,
    /// Absent once the run is over or when nothing was dispatched.
    #[serde(default)]
    pub in_flight: Option<Hop>,
    pub updated_at: DateTime<Utc>,
}

impl StatusRecord {
    pub fn new(id: &BallotBoxId, correlation_id: String, status: MixingStatus) -> Self {
        Self {
            tenant_id: id.tenant_id().to_string(),
            election_event_id: id.election_event_id().clone(),
            ballot_box_id: id.ballot_box_id().clone(),
            status,
            error_message: None,
            correlation_id,
            in_flight: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_in_flight(mut self, hop: Hop) -> Self {
        self.in_flight = Some(hop);
        self
    }

    pub fn to_status(&self) -> BallotBoxStatus {
        BallotBoxStatus {
            election_event_id: self.election_event_id.clone(),
            ballot_box_id: self.ballot_box_id.clone(),
            status: self.status,
            error_message: self.error_message.clone(),
        }
    }
}
