use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::model::{
    ballot::{BallotBoxContext, ConfirmedVote},
    command::{CommandRecord, RequestIdentity},
    ids::{BallotBoxId, EntityId, NodeId},
    payload::{MixnetInitialPayload, MixnetShufflePayload},
    status::{Hop, MixingStatus, StatusRecord},
};

use super::{BallotBoxSource, CommandStore, MixnetRepository, Persisted};

type BoxKey = (EntityId, EntityId);

fn key(id: &BallotBoxId) -> BoxKey {
    (id.election_event_id().clone(), id.ballot_box_id().clone())
}

#[derive(Default)]
struct Inner {
    commands: HashMap<RequestIdentity, CommandRecord>,
    statuses: HashMap<BoxKey, StatusRecord>,
    initial_payloads: HashMap<BoxKey, MixnetInitialPayload>,
    shuffle_payloads: BTreeMap<(BoxKey, NodeId), MixnetShufflePayload>,
    ballot_boxes: HashMap<BoxKey, BallotBoxContext>,
    confirmed_votes: HashMap<BoxKey, Vec<ConfirmedVote>>,
}

/// An in-process implementation of every store, used by tests and single-process setups.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave a map half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_ballot_box(&self, context: BallotBoxContext) {
        let key = (context.election_event_id.clone(), context.ballot_box_id.clone());
        self.lock().ballot_boxes.insert(key, context);
    }

    pub fn insert_confirmed_vote(&self, vote: ConfirmedVote) {
        let key = (vote.election_event_id.clone(), vote.ballot_box_id.clone());
        self.lock().confirmed_votes.entry(key).or_default().push(vote);
    }

    pub fn command_count(&self) -> usize {
        self.lock().commands.len()
    }

    pub fn commands(&self) -> Vec<CommandRecord> {
        self.lock().commands.values().cloned().collect()
    }
}

#[rocket::async_trait]
impl CommandStore for MemStore {
    async fn find_command(&self, identity: &RequestIdentity) -> Result<Option<CommandRecord>> {
        Ok(self.lock().commands.get(identity).cloned())
    }

    async fn insert_command(&self, record: CommandRecord) -> Result<bool> {
        let mut inner = self.lock();
        if inner.commands.contains_key(&record.identity) {
            return Ok(false);
        }
        inner.commands.insert(record.identity.clone(), record);
        Ok(true)
    }

    async fn save_response(&self, identity: &RequestIdentity, response: &[u8]) -> Result<()> {
        let mut inner = self.lock();
        match inner.commands.get_mut(identity) {
            Some(record) if record.response_payload.is_none() => {
                record.response_payload = Some(response.to_vec());
                record.response_time = Some(chrono::Utc::now());
                Ok(())
            }
            Some(_) => Err(Error::IdempotencyConflict(format!(
                "response of {identity} is already recorded"
            ))),
            None => Err(Error::not_found(format!("command {identity}"))),
        }
    }

    async fn delete_command(&self, identity: &RequestIdentity) -> Result<()> {
        self.lock().commands.remove(identity);
        Ok(())
    }
}

#[rocket::async_trait]
impl MixnetRepository for MemStore {
    async fn find_status(&self, id: &BallotBoxId) -> Result<Option<StatusRecord>> {
        Ok(self.lock().statuses.get(&key(id)).cloned())
    }

    async fn claim(&self, record: StatusRecord) -> Result<bool> {
        let mut inner = self.lock();
        let key = (record.election_event_id.clone(), record.ballot_box_id.clone());
        let claimable = inner
            .statuses
            .get(&key)
            .map_or(true, |existing| existing.status == MixingStatus::Error);
        if claimable {
            inner.statuses.insert(key, record);
        }
        Ok(claimable)
    }

    async fn update_status(
        &self,
        id: &BallotBoxId,
        correlation_id: &str,
        status: MixingStatus,
        error_message: Option<String>,
    ) -> Result<bool> {
        let mut inner = self.lock();
        match inner.statuses.get_mut(&key(id)) {
            Some(record) if record.correlation_id == correlation_id => {
                record.status = status;
                record.error_message = error_message;
                record.updated_at = chrono::Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn advance(
        &self,
        id: &BallotBoxId,
        correlation_id: &str,
        expected: Hop,
        next: Option<Hop>,
        status: MixingStatus,
        error_message: Option<String>,
    ) -> Result<bool> {
        let mut inner = self.lock();
        match inner.statuses.get_mut(&key(id)) {
            Some(record)
                if record.correlation_id == correlation_id
                    && record.status == MixingStatus::Processing
                    && record.in_flight == Some(expected) =>
            {
                record.status = status;
                record.error_message = error_message;
                record.in_flight = next;
                record.updated_at = chrono::Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn save_initial_payload(&self, id: &BallotBoxId, payload: &MixnetInitialPayload) -> Result<Persisted> {
        let mut inner = self.lock();
        let key = key(id);
        if inner.initial_payloads.contains_key(&key) {
            return Ok(Persisted::Duplicate);
        }
        inner.initial_payloads.insert(key, payload.clone());
        Ok(Persisted::Stored)
    }

    async fn find_initial_payload(&self, id: &BallotBoxId) -> Result<Option<MixnetInitialPayload>> {
        Ok(self.lock().initial_payloads.get(&key(id)).cloned())
    }

    async fn save_shuffle_payload(&self, id: &BallotBoxId, payload: &MixnetShufflePayload) -> Result<Persisted> {
        let node_id = payload
            .node_id
            .ok_or_else(|| Error::BadRequest("shuffle payload without node id".to_string()))?;
        let mut inner = self.lock();
        let key = (key(id), node_id);
        if inner.shuffle_payloads.contains_key(&key) {
            return Ok(Persisted::Duplicate);
        }
        inner.shuffle_payloads.insert(key, payload.clone());
        Ok(Persisted::Stored)
    }

    async fn find_shuffle_payloads(&self, id: &BallotBoxId) -> Result<Vec<MixnetShufflePayload>> {
        let box_key = key(id);
        Ok(self
            .lock()
            .shuffle_payloads
            .iter()
            .filter(|((k, _), _)| *k == box_key)
            .map(|(_, payload)| payload.clone())
            .collect())
    }

    async fn delete_shuffle_payloads(&self, id: &BallotBoxId) -> Result<()> {
        let box_key = key(id);
        self.lock()
            .shuffle_payloads
            .retain(|(k, _), _| *k != box_key);
        Ok(())
    }
}

#[rocket::async_trait]
impl BallotBoxSource for MemStore {
    async fn ballot_box(&self, id: &BallotBoxId) -> Result<Option<BallotBoxContext>> {
        Ok(self.lock().ballot_boxes.get(&key(id)).cloned())
    }

    async fn confirmed_votes(&self, id: &BallotBoxId) -> Result<Vec<ConfirmedVote>> {
        Ok(self
            .lock()
            .confirmed_votes
            .get(&key(id))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ballot_box_id, TestElection};

    #[rocket::async_test]
    async fn claim_is_refused_while_processing_or_mixed() {
        let store = MemStore::new();
        let id = ballot_box_id();

        assert!(store.claim(StatusRecord::new(&id, "run-1".into(), MixingStatus::Processing)).await.unwrap());
        assert!(!store.claim(StatusRecord::new(&id, "run-2".into(), MixingStatus::Processing)).await.unwrap());

        assert!(store.update_status(&id, "run-1", MixingStatus::Error, Some("boom".into())).await.unwrap());
        assert!(store.claim(StatusRecord::new(&id, "run-3".into(), MixingStatus::Processing)).await.unwrap());

        assert!(store.update_status(&id, "run-3", MixingStatus::Mixed, None).await.unwrap());
        assert!(!store.claim(StatusRecord::new(&id, "run-4".into(), MixingStatus::Processing)).await.unwrap());
    }

    #[rocket::async_test]
    async fn stale_run_cannot_update_status() {
        let store = MemStore::new();
        let id = ballot_box_id();
        store.claim(StatusRecord::new(&id, "current".into(), MixingStatus::Processing)).await.unwrap();
        assert!(!store.update_status(&id, "stale", MixingStatus::Mixed, None).await.unwrap());
        let record = store.find_status(&id).await.unwrap().unwrap();
        assert_eq!(record.status, MixingStatus::Processing);
    }

    #[rocket::async_test]
    async fn advance_requires_the_token_in_flight() {
        let store = MemStore::new();
        let id = ballot_box_id();
        let sent = Hop::new(2, 1);
        store
            .claim(StatusRecord::new(&id, "run".into(), MixingStatus::Processing).with_in_flight(sent))
            .await
            .unwrap();

        assert!(!store.advance(&id, "run", Hop::new(2, 0), None, MixingStatus::Error, None).await.unwrap());
        assert!(!store.advance(&id, "other", sent, None, MixingStatus::Error, None).await.unwrap());
        assert!(store.advance(&id, "run", sent, Some(Hop::new(3, 1)), MixingStatus::Processing, None).await.unwrap());
        assert!(!store.advance(&id, "run", sent, Some(Hop::new(3, 1)), MixingStatus::Processing, None).await.unwrap());
        assert_eq!(store.find_status(&id).await.unwrap().unwrap().in_flight, Some(Hop::new(3, 1)));
    }

    #[rocket::async_test]
    async fn payload_persistence_tolerates_duplicates() {
        let store = MemStore::new();
        let election = TestElection::new(3);
        let id = election.ballot_box.clone();
        let initial = election.initial_payload(&[&[2]]);

        assert_eq!(store.save_initial_payload(&id, &initial).await.unwrap(), Persisted::Stored);
        assert_eq!(store.save_initial_payload(&id, &initial).await.unwrap(), Persisted::Duplicate);
        assert_eq!(store.find_initial_payload(&id).await.unwrap(), Some(initial));
    }

    #[rocket::async_test]
    async fn second_response_is_refused() {
        let store = MemStore::new();
        let identity = RequestIdentity::new("c", "ctx-id", "ctx", 1);
        assert!(store.insert_command(CommandRecord::new(identity.clone(), b"req".to_vec())).await.unwrap());
        assert!(!store.insert_command(CommandRecord::new(identity.clone(), b"req".to_vec())).await.unwrap());
        store.save_response(&identity, b"rsp").await.unwrap();
        assert!(matches!(
            store.save_response(&identity, b"other").await,
            Err(Error::IdempotencyConflict(_))
        ));
    }
}
