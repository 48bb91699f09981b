//! Persistence seams of the mix-net.
//!
//! Every write that can be repeated under at-least-once delivery reports
//! [`Persisted::Duplicate`] instead of failing, and every "create" is guarded
//! by a unique key so that concurrent creators cannot both win.

use crate::error::Result;
use crate::model::{
    ballot::{BallotBoxContext, ConfirmedVote},
    command::{CommandRecord, RequestIdentity},
    ids::BallotBoxId,
    payload::{MixnetInitialPayload, MixnetShufflePayload},
    status::{Hop, MixingStatus, StatusRecord},
};

mod memory;
mod mongo;

pub use memory::MemStore;
pub use mongo::MongoStore;

/// Outcome of an insert guarded by a unique key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persisted {
    Stored,
    Duplicate,
}

#[rocket::async_trait]
pub trait CommandStore: Send + Sync {
    async fn find_command(&self, identity: &RequestIdentity) -> Result<Option<CommandRecord>>;

    /// Create a record. Returns `false` if one with the same identity already exists.
    async fn insert_command(&self, record: CommandRecord) -> Result<bool>;

    /// Store the response of a record that does not have one yet.
    async fn save_response(&self, identity: &RequestIdentity, response: &[u8]) -> Result<()>;

    async fn delete_command(&self, identity: &RequestIdentity) -> Result<()>;
}

#[rocket::async_trait]
pub trait MixnetRepository: Send + Sync {
    async fn find_status(&self, id: &BallotBoxId) -> Result<Option<StatusRecord>>;

    /// Atomically start a run: succeeds only if the ballot box has no status
    /// record or its last run ended in ERROR.
    async fn claim(&self, record: StatusRecord) -> Result<bool>;

    /// Update the status of the run identified by `correlation_id`.
    /// Returns `false` if that run is no longer the current one.
    async fn update_status(
        &self,
        id: &BallotBoxId,
        correlation_id: &str,
        status: MixingStatus,
        error_message: Option<String>,
    ) -> Result<bool>;

    /// Move the run on from the token `expected`, leaving `next` in flight.
    /// Returns `false` unless the run is current, PROCESSING and waiting on
    /// `expected`, so that only one copy of a redelivered response counts.
    async fn advance(
        &self,
        id: &BallotBoxId,
        correlation_id: &str,
        expected: Hop,
        next: Option<Hop>,
        status: MixingStatus,
        error_message: Option<String>,
    ) -> Result<bool>;

    async fn save_initial_payload(&self, id: &BallotBoxId, payload: &MixnetInitialPayload) -> Result<Persisted>;

    async fn find_initial_payload(&self, id: &BallotBoxId) -> Result<Option<MixnetInitialPayload>>;

    async fn save_shuffle_payload(&self, id: &BallotBoxId, payload: &MixnetShufflePayload) -> Result<Persisted>;

    /// All shuffle payloads of the ballot box, ordered by node id.
    async fn find_shuffle_payloads(&self, id: &BallotBoxId) -> Result<Vec<MixnetShufflePayload>>;

    /// Forget the node outputs of an earlier, failed run.
    async fn delete_shuffle_payloads(&self, id: &BallotBoxId) -> Result<()>;
}

/// Read access to the election data mixing starts from.
#[rocket::async_trait]
pub trait BallotBoxSource: Send + Sync {
    async fn ballot_box(&self, id: &BallotBoxId) -> Result<Option<BallotBoxContext>>;

    async fn confirmed_votes(&self, id: &BallotBoxId) -> Result<Vec<ConfirmedVote>>;
}
