use mongodb::{
    bson::{doc, to_bson, to_document, Bson, Document},
    options::{FindOptions, UpdateOptions},
    Database,
};
use rocket::futures::TryStreamExt;

use crate::error::{Error, Result};
use crate::model::{
    ballot::{BallotBoxContext, ConfirmedVote},
    command::{CommandRecord, RequestIdentity},
    ids::BallotBoxId,
    mongodb::{is_duplicate_key, Coll, InitialPayloadRecord, ShufflePayloadRecord},
    payload::{MixnetInitialPayload, MixnetShufflePayload},
    serde_hex,
    status::{Hop, MixingStatus, StatusRecord},
};

use super::{BallotBoxSource, CommandStore, MixnetRepository, Persisted};

/// MongoDB-backed implementation of every store.
#[derive(Clone)]
pub struct MongoStore {
    commands: Coll<CommandRecord>,
    statuses: Coll<StatusRecord>,
    initial_payloads: Coll<InitialPayloadRecord>,
    shuffle_payloads: Coll<ShufflePayloadRecord>,
    ballot_boxes: Coll<BallotBoxContext>,
    confirmed_votes: Coll<ConfirmedVote>,
}

impl MongoStore {
    pub fn new(db: &Database) -> Self {
        Self {
            commands: Coll::from_db(db),
            statuses: Coll::from_db(db),
            initial_payloads: Coll::from_db(db),
            shuffle_payloads: Coll::from_db(db),
            ballot_boxes: Coll::from_db(db),
            confirmed_votes: Coll::from_db(db),
        }
    }
}

fn identity_filter(identity: &RequestIdentity) -> Document {
    doc! {
        "correlation_id": identity.correlation_id.as_str(),
        "context_id": identity.context_id.as_str(),
        "context": identity.context.as_str(),
        "node_id": i64::from(identity.node_id),
    }
}

/// Filter on the snake_case fields of the mix-net's own records.
fn box_filter(id: &BallotBoxId) -> Document {
    doc! {
        "election_event_id": id.election_event_id().as_str(),
        "ballot_box_id": id.ballot_box_id().as_str(),
    }
}

/// Filter on the camelCase fields of the election data.
fn election_box_filter(id: &BallotBoxId) -> Document {
    doc! {
        "electionEventId": id.election_event_id().as_str(),
        "ballotBoxId": id.ballot_box_id().as_str(),
    }
}

fn insert_outcome<T>(result: std::result::Result<T, mongodb::error::Error>) -> Result<Persisted> {
    match result {
        Ok(_) => Ok(Persisted::Stored),
        Err(e) if is_duplicate_key(&e) => Ok(Persisted::Duplicate),
        Err(e) => Err(e.into()),
    }
}

#[rocket::async_trait]
impl CommandStore for MongoStore {
    async fn find_command(&self, identity: &RequestIdentity) -> Result<Option<CommandRecord>> {
        Ok(self.commands.find_one(identity_filter(identity), None).await?)
    }

    async fn insert_command(&self, record: CommandRecord) -> Result<bool> {
        let outcome = insert_outcome(self.commands.insert_one(record, None).await)?;
        Ok(outcome == Persisted::Stored)
    }

    async fn save_response(&self, identity: &RequestIdentity, response: &[u8]) -> Result<()> {
        let mut filter = identity_filter(identity);
        filter.insert("response_payload", Bson::Null);
        let update = doc! {
            "$set": {
                "response_payload": serde_hex::encode(response),
                "response_time": chrono::Utc::now().to_rfc3339(),
            }
        };
        let result = self.commands.update_one(filter, update, None).await?;
        if result.matched_count == 0 {
            return Err(Error::IdempotencyConflict(format!(
                "response of {identity} is already recorded or the command is gone"
            )));
        }
        Ok(())
    }

    async fn delete_command(&self, identity: &RequestIdentity) -> Result<()> {
        self.commands.delete_one(identity_filter(identity), None).await?;
        Ok(())
    }
}

#[rocket::async_trait]
impl MixnetRepository for MongoStore {
    async fn find_status(&self, id: &BallotBoxId) -> Result<Option<StatusRecord>> {
        Ok(self.statuses.find_one(box_filter(id), None).await?)
    }

    async fn claim(&self, record: StatusRecord) -> Result<bool> {
        let mut filter = doc! {
            "election_event_id": record.election_event_id.as_str(),
            "ballot_box_id": record.ballot_box_id.as_str(),
        };
        filter.insert(
            "status",
            doc! {"$nin": [MixingStatus::Processing, MixingStatus::Mixed]},
        );
        let update = doc! {"$set": to_document(&record)?};
        let options = UpdateOptions::builder().upsert(true).build();
        match self.statuses.update_one(filter, update, options).await {
            Ok(result) => Ok(result.matched_count > 0 || result.upserted_id.is_some()),
            // The upsert tried to insert next to a PROCESSING or MIXED record.
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_status(
        &self,
        id: &BallotBoxId,
        correlation_id: &str,
        status: MixingStatus,
        error_message: Option<String>,
    ) -> Result<bool> {
        let mut filter = box_filter(id);
        filter.insert("correlation_id", correlation_id);
        let update = doc! {
            "$set": {
                "status": status,
                "error_message": error_message,
                "updated_at": chrono::Utc::now().to_rfc3339(),
            }
        };
        let result = self.statuses.update_one(filter, update, None).await?;
        Ok(result.matched_count > 0)
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
        let mut filter = box_filter(id);
        filter.insert("correlation_id", correlation_id);
        filter.insert("status", MixingStatus::Processing);
        filter.insert("in_flight.node_to_visit", i64::from(expected.node_to_visit));
        filter.insert("in_flight.retry_count", i64::from(expected.retry_count));
        let update = doc! {
            "$set": {
                "status": status,
                "error_message": error_message,
                "in_flight": to_bson(&next)?,
                "updated_at": chrono::Utc::now().to_rfc3339(),
            }
        };
        let result = self.statuses.update_one(filter, update, None).await?;
        Ok(result.matched_count > 0)
    }

    async fn save_initial_payload(&self, id: &BallotBoxId, payload: &MixnetInitialPayload) -> Result<Persisted> {
        let record = InitialPayloadRecord {
            election_event_id: id.election_event_id().clone(),
            ballot_box_id: id.ballot_box_id().clone(),
            payload: payload.clone(),
        };
        insert_outcome(self.initial_payloads.insert_one(record, None).await)
    }

    async fn find_initial_payload(&self, id: &BallotBoxId) -> Result<Option<MixnetInitialPayload>> {
        Ok(self
            .initial_payloads
            .find_one(box_filter(id), None)
            .await?
            .map(|record| record.payload))
    }

    async fn save_shuffle_payload(&self, id: &BallotBoxId, payload: &MixnetShufflePayload) -> Result<Persisted> {
        let node_id = payload
            .node_id
            .ok_or_else(|| Error::BadRequest("shuffle payload without node id".to_string()))?;
        let record = ShufflePayloadRecord {
            election_event_id: id.election_event_id().clone(),
            ballot_box_id: id.ballot_box_id().clone(),
            node_id,
            payload: payload.clone(),
        };
        insert_outcome(self.shuffle_payloads.insert_one(record, None).await)
    }

    async fn find_shuffle_payloads(&self, id: &BallotBoxId) -> Result<Vec<MixnetShufflePayload>> {
        let options = FindOptions::builder().sort(doc! {"node_id": 1}).build();
        let records: Vec<ShufflePayloadRecord> = self
            .shuffle_payloads
            .find(box_filter(id), options)
            .await?
            .try_collect()
            .await?;
        Ok(records.into_iter().map(|record| record.payload).collect())
    }

    async fn delete_shuffle_payloads(&self, id: &BallotBoxId) -> Result<()> {
        self.shuffle_payloads.delete_many(box_filter(id), None).await?;
        Ok(())
    }
}

#[rocket::async_trait]
impl BallotBoxSource for MongoStore {
    async fn ballot_box(&self, id: &BallotBoxId) -> Result<Option<BallotBoxContext>> {
        Ok(self.ballot_boxes.find_one(election_box_filter(id), None).await?)
    }

    async fn confirmed_votes(&self, id: &BallotBoxId) -> Result<Vec<ConfirmedVote>> {
        Ok(self
            .confirmed_votes
            .find(election_box_filter(id), None)
            .await?
            .try_collect()
            .await?)
    }
}
