use serde::{Deserialize, Serialize};

use crate::crypto::{
    Ciphertext, ElGamalPublicKey, GqGroup, PayloadSignature, VerifiableDecryptions,
    VerifiablePlaintextDecryption, VerifiableShuffle,
};
use crate::error::MixnetError;
use crate::model::ids::{EntityId, NodeId};

/// The payload routed between nodes.
///
/// All fields of the variants are optional on the wire. [`MixnetPayload::mix_input`]
/// turns a payload with missing fields into a [`MixnetError::MissingFields`] instead
/// of failing deserialisation, so the error can be handed back in the state token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MixnetPayload {
    Initial(MixnetInitialPayload),
    Shuffle(MixnetShufflePayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MixnetInitialPayload {
    pub election_event_id: Option<EntityId>,
    pub ballot_box_id: Option<EntityId>,
    pub encryption_group: Option<GqGroup>,
    pub ciphertexts: Option<Vec<Ciphertext>>,
    pub election_public_key: Option<ElGamalPublicKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MixnetShufflePayload {
    pub election_event_id: Option<EntityId>,
    pub ballot_box_id: Option<EntityId>,
    pub encryption_group: Option<GqGroup>,
    pub election_public_key: Option<ElGamalPublicKey>,
    /// Absent when the hop had fewer than two ciphertexts to shuffle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifiable_shuffle: Option<VerifiableShuffle>,
    pub verifiable_decryptions: Option<VerifiableDecryptions>,
    pub remaining_election_public_key: Option<ElGamalPublicKey>,
    pub previous_remaining_election_public_key: Option<ElGamalPublicKey>,
    pub node_election_public_key: Option<ElGamalPublicKey>,
    pub node_id: Option<NodeId>,
    pub signature: Option<PayloadSignature>,
}

/// The validated view of a payload a node needs to run its hop.
#[derive(Debug)]
pub struct MixInput<'a> {
    pub election_event_id: &'a EntityId,
    pub ballot_box_id: &'a EntityId,
    pub encryption_group: &'a GqGroup,
    pub election_public_key: &'a ElGamalPublicKey,
    pub ciphertexts: &'a [Ciphertext],
    pub remaining_public_key: &'a ElGamalPublicKey,
    /// The node that produced the payload, with its signature. `None` for the initial payload.
    pub producer: Option<(NodeId, &'a PayloadSignature)>,
}

macro_rules! require {
    ($missing:ident, $payload:ident . $field:ident) => {
        match $payload.$field.as_ref() {
            Some(value) => Some(value),
            None => {
                $missing.push(stringify!($field));
                None
            }
        }
    };
}

impl MixnetPayload {
    pub fn election_event_id(&self) -> Option<&EntityId> {
        match self {
            Self::Initial(p) => p.election_event_id.as_ref(),
            Self::Shuffle(p) => p.election_event_id.as_ref(),
        }
    }

    pub fn ballot_box_id(&self) -> Option<&EntityId> {
        match self {
            Self::Initial(p) => p.ballot_box_id.as_ref(),
            Self::Shuffle(p) => p.ballot_box_id.as_ref(),
        }
    }

    /// Check that every required field is present and borrow them.
    pub fn mix_input(&self) -> Result<MixInput<'_>, MixnetError> {
        let mut missing = Vec::new();
        match self {
            Self::Initial(p) => {
                let election_event_id = require!(missing, p.election_event_id);
                let ballot_box_id = require!(missing, p.ballot_box_id);
                let encryption_group = require!(missing, p.encryption_group);
                let ciphertexts = require!(missing, p.ciphertexts);
                let election_public_key = require!(missing, p.election_public_key);
                match (election_event_id, ballot_box_id, encryption_group, ciphertexts, election_public_key) {
                    (Some(ee), Some(bb), Some(group), Some(ciphertexts), Some(pk)) => Ok(MixInput {
                        election_event_id: ee,
                        ballot_box_id: bb,
                        encryption_group: group,
                        election_public_key: pk,
                        ciphertexts,
                        remaining_public_key: pk,
                        producer: None,
                    }),
                    _ => Err(MixnetError::MissingFields(missing)),
                }
            }
            Self::Shuffle(p) => {
                let election_event_id = require!(missing, p.election_event_id);
                let ballot_box_id = require!(missing, p.ballot_box_id);
                let encryption_group = require!(missing, p.encryption_group);
                let election_public_key = require!(missing, p.election_public_key);
                let decryptions = require!(missing, p.verifiable_decryptions);
                let remaining = require!(missing, p.remaining_election_public_key);
                require!(missing, p.previous_remaining_election_public_key);
                require!(missing, p.node_election_public_key);
                let node_id = require!(missing, p.node_id);
                let signature = require!(missing, p.signature);
                match (
                    election_event_id,
                    ballot_box_id,
                    encryption_group,
                    election_public_key,
                    decryptions,
                    remaining,
                    node_id,
                    signature,
                ) {
                    (Some(ee), Some(bb), Some(group), Some(pk), Some(decryptions), Some(remaining), Some(node), Some(sig))
                        if missing.is_empty() =>
                    {
                        Ok(MixInput {
                            election_event_id: ee,
                            ballot_box_id: bb,
                            encryption_group: group,
                            election_public_key: pk,
                            ciphertexts: &decryptions.ciphertexts,
                            remaining_public_key: remaining,
                            producer: Some((*node, sig)),
                        })
                    }
                    _ => Err(MixnetError::MissingFields(missing)),
                }
            }
        }
    }
}

impl MixnetShufflePayload {
    /// The canonical bytes covered by the node's signature: the payload without its signature.
    pub fn signable_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let unsigned = Self {
            signature: None,
            ..self.clone()
        };
        serde_json::to_vec(&unsigned)
    }
}

/// The outcome of the offline stage, written next to the decoded votes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MixnetFinalPayload {
    pub encryption_group: GqGroup,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifiable_shuffle: Option<VerifiableShuffle>,
    pub verifiable_plaintext_decryption: VerifiablePlaintextDecryption,
    pub remaining_public_key: ElGamalPublicKey,
}

/// Everything the online nodes produced for one ballot box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MixDecryptOnlinePayload {
    pub election_event_id: EntityId,
    pub ballot_box_id: EntityId,
    /// Absent for a ballot box without confirmed votes, which is never mixed.
    pub initial_payload: Option<MixnetInitialPayload>,
    pub shuffle_payloads: Vec<MixnetShufflePayload>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestElection;

    #[test]
    fn initial_payload_yields_its_ciphertexts() {
        let election = TestElection::new(3);
        let payload = MixnetPayload::Initial(election.initial_payload(&[&[2], &[3]]));
        let input = payload.mix_input().unwrap();
        assert_eq!(input.ciphertexts.len(), 2);
        assert_eq!(input.remaining_public_key, &election.election_public_key);
        assert!(input.producer.is_none());
    }

    #[test]
    fn missing_fields_are_reported_by_name() {
        let election = TestElection::new(3);
        let mut initial = election.initial_payload(&[&[2]]);
        initial.ciphertexts = None;
        initial.encryption_group = None;
        let err = MixnetPayload::Initial(initial).mix_input().unwrap_err();
        assert_eq!(
            err,
            MixnetError::MissingFields(vec!["encryption_group", "ciphertexts"])
        );
        assert!(err.to_string().starts_with("payload contains null/missing fields"));
    }

    #[test]
    fn shuffle_payload_without_signature_is_incomplete() {
        let payload: MixnetPayload = serde_json::from_value(serde_json::json!({
            "type": "Shuffle",
            "electionEventId": "0b149cfdaad04b04b990c3b1d4ca7639",
            "ballotBoxId": "f0dd956605bb47d589f1bd7b195d6f38",
        }))
        .unwrap();
        match payload.mix_input() {
            Err(MixnetError::MissingFields(fields)) => {
                assert!(fields.contains(&"signature"));
                assert!(fields.contains(&"verifiable_decryptions"));
                assert!(!fields.contains(&"verifiable_shuffle"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
