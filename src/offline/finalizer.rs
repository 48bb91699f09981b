use std::path::PathBuf;
use std::sync::Arc;

use num_bigint::BigUint;
use rocket::{http::Status, tokio};

use crate::crypto::{verify_decryptions, Ciphertext, KeyShare, MixnetEngine, SignatureService};
use crate::error::{Error, Result};
use crate::model::{
    ids::{BallotBoxId, NodeId},
    payload::{MixnetFinalPayload, MixnetInitialPayload, MixnetShufflePayload},
    status::MixingStatus,
};
use crate::store::{BallotBoxSource, MixnetRepository};

use super::{
    decode::factorize,
    lock::BallotBoxLocks,
    votes_file::{ballot_box_dir, write_final_payload, write_votes},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Another finalization of the ballot box is running.
    Busy,
    Finalized { votes: usize, path: PathBuf },
}

/// Applies the electoral board key to a mixed ballot box and decodes its votes.
pub struct OfflineFinalizer {
    node_count: NodeId,
    output_dir: PathBuf,
    reshuffle: bool,
    board_key: KeyShare,
    engine: Arc<dyn MixnetEngine>,
    signatures: Arc<dyn SignatureService>,
    repository: Arc<dyn MixnetRepository>,
    ballot_boxes: Arc<dyn BallotBoxSource>,
    locks: BallotBoxLocks,
}

impl OfflineFinalizer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_count: NodeId,
        output_dir: PathBuf,
        reshuffle: bool,
        board_key: KeyShare,
        engine: Arc<dyn MixnetEngine>,
        signatures: Arc<dyn SignatureService>,
        repository: Arc<dyn MixnetRepository>,
        ballot_boxes: Arc<dyn BallotBoxSource>,
    ) -> Self {
        Self {
            node_count,
            output_dir,
            reshuffle,
            board_key,
            engine,
            signatures,
            repository,
            ballot_boxes,
            locks: BallotBoxLocks::new(),
        }
    }

    pub fn output_dir(&self) -> &PathBuf {
        &self.output_dir
    }

    pub async fn finalize(&self, id: &BallotBoxId) -> Result<FinalizeOutcome> {
        let _guard = match self.locks.try_acquire(id) {
            Some(guard) => guard,
            None => {
                info!("Offline mixing of {id} is already running");
                return Ok(FinalizeOutcome::Busy);
            }
        };

        let status = self.repository.find_status(id).await?;
        if status.map(|record| record.status) != Some(MixingStatus::Mixed) {
            return Err(Error::NotMixed(id.to_string()));
        }

        let dir = ballot_box_dir(&self.output_dir, id);
        let initial = match self.repository.find_initial_payload(id).await? {
            Some(initial) => initial,
            None => {
                info!("{id} has no confirmed votes, writing an empty result");
                let path = write_votes(&dir, &[]).await?;
                return Ok(FinalizeOutcome::Finalized { votes: 0, path });
            }
        };

        let shuffles = self.repository.find_shuffle_payloads(id).await?;
        self.verify_online_outputs(id, &initial, &shuffles)?;

        let context = self
            .ballot_boxes
            .ballot_box(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("ballot box {id}")))?;
        let group = context.encryption_group.clone();
        let last = shuffles
            .last()
            .ok_or_else(|| Error::SignatureVerification(format!("{id} has no shuffle payloads")))?;
        let ciphertexts = last
            .verifiable_decryptions
            .as_ref()
            .map(|d| d.ciphertexts.clone())
            .ok_or_else(|| Error::BadRequest(format!("last shuffle payload of {id} has no decryptions")))?;
        let remaining = last
            .remaining_election_public_key
            .clone()
            .ok_or_else(|| Error::BadRequest(format!("last shuffle payload of {id} has no remaining key")))?;

        let engine = self.engine.clone();
        let key = self.board_key.clone();
        let reshuffle = self.reshuffle;
        let (task_group, task_remaining) = (group.clone(), remaining.clone());
        let output = tokio::task::spawn_blocking(move || {
            engine.mix_dec_offline(&task_group, &ciphertexts, &task_remaining, &key, reshuffle)
        })
        .await
        .map_err(|e| Error::Status(Status::InternalServerError, format!("offline mixing task failed: {e}")))??;

        let options: Vec<BigUint> = context
            .encoded_voting_options
            .iter()
            .map(|option| option.value().clone())
            .collect();
        let votes = output
            .verifiable_plaintext_decryption
            .decrypted_votes
            .iter()
            .filter(|vote| !vote.is_identity())
            .map(|vote| factorize(vote.value(), &options, context.number_of_selections))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Decoding(e.to_string()))?;

        let final_payload = MixnetFinalPayload {
            encryption_group: group,
            verifiable_shuffle: output.verifiable_shuffle,
            verifiable_plaintext_decryption: output.verifiable_plaintext_decryption,
            remaining_public_key: remaining,
        };
        write_final_payload(&dir, &final_payload).await?;
        let path = write_votes(&dir, &votes).await?;
        info!("Decoded {} votes of {id} to {}", votes.len(), path.display());
        Ok(FinalizeOutcome::Finalized {
            votes: votes.len(),
            path,
        })
    }

    /// Check signatures, hop order and decryption proofs of every online node.
    fn verify_online_outputs(
        &self,
        id: &BallotBoxId,
        initial: &MixnetInitialPayload,
        shuffles: &[MixnetShufflePayload],
    ) -> Result<()> {
        if shuffles.len() != self.node_count as usize {
            return Err(Error::SignatureVerification(format!(
                "{id} has {} of {} shuffle payloads",
                shuffles.len(),
                self.node_count
            )));
        }
        let group = initial
            .encryption_group
            .as_ref()
            .ok_or_else(|| Error::BadRequest(format!("initial payload of {id} has no group")))?;
        let mut inputs: &[Ciphertext] = initial.ciphertexts.as_deref().unwrap_or_default();
        let mut remaining = initial.election_public_key.as_ref();

        for (expected, payload) in (1..).zip(shuffles) {
            let rejected = |what: &str| Error::SignatureVerification(format!("{what} of node {expected} for {id}"));
            if payload.node_id != Some(expected) {
                return Err(rejected("shuffle payload"));
            }
            let signature = payload.signature.as_ref().ok_or_else(|| rejected("missing signature"))?;
            match self.signatures.verify(&payload.signable_bytes()?, signature, expected) {
                Ok(true) => {}
                Ok(false) => return Err(rejected("invalid signature")),
                Err(e) => {
                    warn!("Cannot verify the signature of node {expected} for {id}: {e}");
                    return Err(rejected("unverifiable signature"));
                }
            }
            if payload.previous_remaining_election_public_key.as_ref() != remaining {
                return Err(rejected("remaining key"));
            }

            let decryptions = payload
                .verifiable_decryptions
                .as_ref()
                .ok_or_else(|| rejected("missing decryptions"))?;
            let node_key = payload
                .node_election_public_key
                .as_ref()
                .ok_or_else(|| rejected("missing node key"))?;
            let decrypted_from = payload
                .verifiable_shuffle
                .as_ref()
                .map_or(inputs, |shuffle| shuffle.shuffled_ciphertexts.as_slice());
            if decrypted_from.len() != inputs.len() || !verify_decryptions(group, decrypted_from, decryptions, node_key) {
                return Err(rejected("decryption proofs"));
            }

            inputs = &decryptions.ciphertexts;
            remaining = payload.remaining_election_public_key.as_ref();
        }
        debug!("Verified the outputs of {} online nodes for {id}", shuffles.len());
        Ok(())
    }
}
