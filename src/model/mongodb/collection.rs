use std::ops::Deref;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};

use crate::model::{
    ballot::{BallotBoxContext, ConfirmedVote},
    command::CommandRecord,
    status::StatusRecord,
};

use super::records::{InitialPayloadRecord, ShufflePayloadRecord};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl MongoCollection for CommandRecord {
    const NAME: &'static str = "mix_dec_commands";
}

impl MongoCollection for StatusRecord {
    const NAME: &'static str = "mix_dec_ballot_box_status";
}

impl MongoCollection for InitialPayloadRecord {
    const NAME: &'static str = "mix_dec_initial_payloads";
}

impl MongoCollection for ShufflePayloadRecord {
    const NAME: &'static str = "mix_dec_shuffle_payloads";
}

impl MongoCollection for BallotBoxContext {
    const NAME: &'static str = "ballot_boxes";
}

impl MongoCollection for ConfirmedVote {
    const NAME: &'static str = "confirmed_votes";
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent. The unique indexes are what make command
/// creation and payload persistence safe under concurrent delivery.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    let command_index = IndexModel::builder()
        .keys(doc! {"correlation_id": 1, "context_id": 1, "context": 1, "node_id": 1})
        .options(unique.clone())
        .build();
    Coll::<CommandRecord>::from_db(db)
        .create_index(command_index, None)
        .await?;

    let status_index = IndexModel::builder()
        .keys(doc! {"election_event_id": 1, "ballot_box_id": 1})
        .options(unique.clone())
        .build();
    Coll::<StatusRecord>::from_db(db)
        .create_index(status_index, None)
        .await?;

    let initial_index = IndexModel::builder()
        .keys(doc! {"election_event_id": 1, "ballot_box_id": 1})
        .options(unique.clone())
        .build();
    Coll::<InitialPayloadRecord>::from_db(db)
        .create_index(initial_index, None)
        .await?;

    let shuffle_index = IndexModel::builder()
        .keys(doc! {"election_event_id": 1, "ballot_box_id": 1, "node_id": 1})
        .options(unique.clone())
        .build();
    Coll::<ShufflePayloadRecord>::from_db(db)
        .create_index(shuffle_index, None)
        .await?;

    let ballot_box_index = IndexModel::builder()
        .keys(doc! {"electionEventId": 1, "ballotBoxId": 1})
        .options(unique.clone())
        .build();
    Coll::<BallotBoxContext>::from_db(db)
        .create_index(ballot_box_index, None)
        .await?;

    let vote_index = IndexModel::builder()
        .keys(doc! {"electionEventId": 1, "ballotBoxId": 1, "verificationCardId": 1})
        .options(unique)
        .build();
    Coll::<ConfirmedVote>::from_db(db)
        .create_index(vote_index, None)
        .await?;

    Ok(())
}
