use rocket::{serde::json::Json, Route, State};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::ids::EntityId;
use crate::offline::FinalizeOutcome;
use crate::services::Mixnet;

pub fn routes() -> Vec<Route> {
    routes![mix_offline]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineResponse {
    pub busy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub votes: Option<usize>,
}

#[post("/mixing/offline/electionevent/<election_event_id>/ballotbox/<ballot_box_id>")]
async fn mix_offline(
    election_event_id: EntityId,
    ballot_box_id: EntityId,
    mixnet: &State<Mixnet>,
) -> Result<Json<OfflineResponse>> {
    let id = mixnet.orchestrator.ballot_box(election_event_id, ballot_box_id);
    let response = match mixnet.finalizer.finalize(&id).await? {
        FinalizeOutcome::Busy => OfflineResponse {
            busy: true,
            votes: None,
        },
        FinalizeOutcome::Finalized { votes, .. } => OfflineResponse {
            busy: false,
            votes: Some(votes),
        },
    };
    Ok(Json(response))
}
