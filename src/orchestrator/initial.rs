use crate::crypto::Ciphertext;
use crate::model::{
    ballot::{BallotBoxContext, ConfirmedVote},
    payload::MixnetInitialPayload,
};

/// A shuffle always runs on at least this many ciphertexts.
pub const MIN_CIPHERTEXTS: usize = 2;

/// Build the payload the first node starts from.
///
/// Votes are ordered by verification card id, so the result does not depend on
/// the order the store returns them in. Short ballot boxes are padded with
/// trivial encryptions of the identity, which decode to no selection.
pub fn build_initial_payload(context: &BallotBoxContext, mut votes: Vec<ConfirmedVote>) -> MixnetInitialPayload {
    votes.sort_by(|a, b| a.verification_card_id.cmp(&b.verification_card_id));
    let mut ciphertexts: Vec<Ciphertext> = votes.into_iter().map(|vote| vote.encrypted_vote).collect();
    while ciphertexts.len() < MIN_CIPHERTEXTS {
        ciphertexts.push(Ciphertext::trivial(&context.encryption_group, &context.election_public_key));
    }

    MixnetInitialPayload {
        election_event_id: Some(context.election_event_id.clone()),
        ballot_box_id: Some(context.ballot_box_id.clone()),
        encryption_group: Some(context.encryption_group.clone()),
        ciphertexts: Some(ciphertexts),
        election_public_key: Some(context.election_public_key.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestElection;

    #[test]
    fn single_vote_is_padded_to_two() {
        let election = TestElection::new(3);
        let vote = election.confirmed_vote("card-1", &[2]);
        let payload = build_initial_payload(&election.context(), vec![vote.clone()]);

        let ciphertexts = payload.ciphertexts.unwrap();
        assert_eq!(ciphertexts.len(), 2);
        assert_eq!(ciphertexts[0], vote.encrypted_vote);
        assert_eq!(
            ciphertexts[1],
            Ciphertext::trivial(&election.group, &election.election_public_key)
        );
    }

    #[test]
    fn votes_are_ordered_by_verification_card() {
        let election = TestElection::new(3);
        let votes = vec![
            election.confirmed_vote("c", &[2]),
            election.confirmed_vote("a", &[3]),
            election.confirmed_vote("b", &[5]),
        ];
        let expected: Vec<_> = [1, 2, 0].iter().map(|&i| votes[i].encrypted_vote.clone()).collect();

        let payload = build_initial_payload(&election.context(), votes.clone());
        assert_eq!(payload.ciphertexts, Some(expected.clone()));

        let reversed = votes.into_iter().rev().collect();
        assert_eq!(build_initial_payload(&election.context(), reversed).ciphertexts, Some(expected));
    }
}
