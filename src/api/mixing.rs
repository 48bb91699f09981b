use rocket::{serde::json::Json, Route, State};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{
    ids::EntityId,
    payload::MixDecryptOnlinePayload,
    status::{BallotBoxStatus, OnlineStatus},
};
use crate::orchestrator::Admission;
use crate::services::Mixnet;

pub fn routes() -> Vec<Route> {
    routes![start_mixing, start_mixing_batch, mixing_status, download_mixed,]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MixingResponse {
    #[serde(flatten)]
    pub status: BallotBoxStatus,
    /// A run for the ballot box was already in progress.
    pub busy: bool,
}

/// Start mixing one ballot box. With `wait=true` the answer is delayed until
/// the ballot box is MIXED or ERROR, or the configured wait elapses.
#[put("/mixing/electionevent/<election_event_id>/ballotbox/<ballot_box_id>?<wait>")]
async fn start_mixing(
    election_event_id: EntityId,
    ballot_box_id: EntityId,
    wait: Option<bool>,
    mixnet: &State<Mixnet>,
) -> Result<Json<MixingResponse>> {
    let orchestrator = &mixnet.orchestrator;
    let id = orchestrator.ballot_box(election_event_id, ballot_box_id);
    let admission = orchestrator.start(&id).await?;
    let busy = admission.is_busy();
    let status = match admission {
        Admission::Started(_) if wait.unwrap_or(false) => orchestrator.wait_for_terminal(&id).await?,
        other => other.into_status(),
    };
    Ok(Json(MixingResponse { status, busy }))
}

#[put("/mixing/electionevent/<election_event_id>", format = "json", data = "<ballot_box_ids>")]
async fn start_mixing_batch(
    election_event_id: EntityId,
    ballot_box_ids: Json<Vec<EntityId>>,
    mixnet: &State<Mixnet>,
) -> Json<Vec<BallotBoxStatus>> {
    let orchestrator = &mixnet.orchestrator;
    let ids: Vec<_> = ballot_box_ids
        .into_inner()
        .into_iter()
        .map(|bb| orchestrator.ballot_box(election_event_id.clone(), bb))
        .collect();
    Json(orchestrator.process_ballot_boxes(&ids).await)
}

#[get("/mixing/electionevent/<election_event_id>/ballotbox/<ballot_box_id>/status")]
async fn mixing_status(
    election_event_id: EntityId,
    ballot_box_id: EntityId,
    mixnet: &State<Mixnet>,
) -> Result<Json<OnlineStatus>> {
    let id = mixnet.orchestrator.ballot_box(election_event_id, ballot_box_id);
    Ok(Json(mixnet.orchestrator.online_status(&id).await?))
}

#[get("/mixing/electionevent/<election_event_id>/ballotbox/<ballot_box_id>/download")]
async fn download_mixed(
    election_event_id: EntityId,
    ballot_box_id: EntityId,
    mixnet: &State<Mixnet>,
) -> Result<Json<MixDecryptOnlinePayload>> {
    let id = mixnet.orchestrator.ballot_box(election_event_id, ballot_box_id);
    Ok(Json(mixnet.orchestrator.download(&id).await?))
}
