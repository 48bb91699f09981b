use serde::{Deserialize, Serialize};

use crate::crypto::{Ciphertext, ElGamalPublicKey, GqElement, GqGroup};
use crate::model::ids::EntityId;

/// An encrypted vote whose casting the voter confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedVote {
    pub election_event_id: EntityId,
    pub ballot_box_id: EntityId,
    pub verification_card_id: String,
    pub encrypted_vote: Ciphertext,
}

/// Election configuration of one ballot box, as far as mixing and decoding need it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BallotBoxContext {
    pub election_event_id: EntityId,
    pub ballot_box_id: EntityId,
    pub ballot_id: String,
    pub encryption_group: GqGroup,
    pub election_public_key: ElGamalPublicKey,
    /// One distinct small prime per selectable voting option.
    pub encoded_voting_options: Vec<GqElement>,
    pub number_of_selections: usize,
}
