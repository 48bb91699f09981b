use serde::{Deserialize, Serialize};

use crate::model::{
    ids::{EntityId, NodeId},
    payload::{MixnetInitialPayload, MixnetShufflePayload},
};

/// The initial payload of a ballot box, as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialPayloadRecord {
    pub election_event_id: EntityId,
    pub ballot_box_id: EntityId,
    pub payload: MixnetInitialPayload,
}

/// The signed output of one online node, as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShufflePayloadRecord {
    pub election_event_id: EntityId,
    pub ballot_box_id: EntityId,
    pub node_id: NodeId,
    pub payload: MixnetShufflePayload,
}
