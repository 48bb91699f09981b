use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{
    elgamal::{Ciphertext, DecryptionProof, ElGamalPublicKey, KeyShare},
    group::{GqElement, GqGroup},
    CryptoError,
};

/// Binds a shuffle's inputs, outputs and key together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShuffleArgument {
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiableShuffle {
    pub shuffled_ciphertexts: Vec<Ciphertext>,
    pub shuffle_argument: ShuffleArgument,
}

/// Partially decrypted ciphertexts together with one proof per ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiableDecryptions {
    pub ciphertexts: Vec<Ciphertext>,
    pub decryption_proofs: Vec<DecryptionProof>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiablePlaintextDecryption {
    pub decrypted_votes: Vec<GqElement>,
    pub decryption_proofs: Vec<DecryptionProof>,
}

/// Result of one online hop.
#[derive(Debug, Clone)]
pub struct OnlineMixOutput {
    pub verifiable_shuffle: Option<VerifiableShuffle>,
    pub verifiable_decryptions: VerifiableDecryptions,
    pub remaining_public_key: ElGamalPublicKey,
}

/// Result of the offline stage.
#[derive(Debug, Clone)]
pub struct OfflineMixOutput {
    pub verifiable_shuffle: Option<VerifiableShuffle>,
    pub verifiable_plaintext_decryption: VerifiablePlaintextDecryption,
}

/// The cryptographic operations the mix-net consumes.
///
/// Implementations are expected to be CPU-bound and are called from blocking tasks.
pub trait MixnetEngine: Send + Sync {
    /// Shuffle (when there are at least two ciphertexts) and strip `key_share` from every ciphertext.
    fn mix_dec_online(
        &self,
        group: &GqGroup,
        ciphertexts: &[Ciphertext],
        remaining_public_key: &ElGamalPublicKey,
        key_share: &KeyShare,
    ) -> Result<OnlineMixOutput, CryptoError>;

    /// Apply the last key share, which must account for the whole remaining key.
    fn mix_dec_offline(
        &self,
        group: &GqGroup,
        ciphertexts: &[Ciphertext],
        remaining_public_key: &ElGamalPublicKey,
        key_share: &KeyShare,
        shuffle: bool,
    ) -> Result<OfflineMixOutput, CryptoError>;
}

/// Re-encryption mix-net over plain ElGamal with Chaum-Pedersen decryption proofs.
#[derive(Debug, Default, Clone, Copy)]
pub struct ElGamalEngine;

impl ElGamalEngine {
    fn check_inputs(group: &GqGroup, ciphertexts: &[Ciphertext], remaining_public_key: &ElGamalPublicKey) -> Result<(), CryptoError> {
        group.validate()?;
        if ciphertexts.is_empty() {
            return Err(CryptoError::IncompatibleArguments(
                "there must be at least one ciphertext".to_string(),
            ));
        }
        if !group.contains(&remaining_public_key.0) {
            return Err(CryptoError::IncompatibleArguments(
                "the remaining public key is not a group member".to_string(),
            ));
        }
        if let Some(index) = ciphertexts.iter().position(|c| !c.is_member_of(group)) {
            return Err(CryptoError::IncompatibleArguments(format!(
                "ciphertext {index} is not a group member"
            )));
        }
        Ok(())
    }

    fn shuffle(group: &GqGroup, ciphertexts: &[Ciphertext], public_key: &ElGamalPublicKey) -> VerifiableShuffle {
        let mut rng = rand::thread_rng();
        let mut permutation: Vec<usize> = (0..ciphertexts.len()).collect();
        permutation.shuffle(&mut rng);
        let shuffled_ciphertexts: Vec<_> = permutation
            .iter()
            .map(|&i| ciphertexts[i].reencrypt(group, public_key, &group.random_exponent(&mut rng)))
            .collect();
        let shuffle_argument = ShuffleArgument {
            digest: shuffle_digest(group, public_key, ciphertexts, &shuffled_ciphertexts),
        };
        VerifiableShuffle {
            shuffled_ciphertexts,
            shuffle_argument,
        }
    }

    fn decrypt_all(group: &GqGroup, ciphertexts: &[Ciphertext], key_share: &KeyShare) -> Vec<(Ciphertext, DecryptionProof)> {
        let mut rng = rand::thread_rng();
        ciphertexts
            .iter()
            .map(|c| {
                let (phi, proof) = key_share.partial_decrypt(group, c, &mut rng);
                let decrypted = Ciphertext {
                    gamma: c.gamma.clone(),
                    phi,
                };
                (decrypted, proof)
            })
            .collect()
    }
}

impl MixnetEngine for ElGamalEngine {
    fn mix_dec_online(
        &self,
        group: &GqGroup,
        ciphertexts: &[Ciphertext],
        remaining_public_key: &ElGamalPublicKey,
        key_share: &KeyShare,
    ) -> Result<OnlineMixOutput, CryptoError> {
        Self::check_inputs(group, ciphertexts, remaining_public_key)?;

        let verifiable_shuffle = (ciphertexts.len() >= 2)
            .then(|| Self::shuffle(group, ciphertexts, remaining_public_key));
        let to_decrypt = verifiable_shuffle
            .as_ref()
            .map_or(ciphertexts, |s| s.shuffled_ciphertexts.as_slice());

        let (ciphertexts, decryption_proofs): (Vec<_>, Vec<_>) = Self::decrypt_all(group, to_decrypt, key_share)
            .into_iter()
            .unzip();
        let remaining_public_key = remaining_public_key.remove(group, &key_share.public_key(group));

        Ok(OnlineMixOutput {
            verifiable_shuffle,
            verifiable_decryptions: VerifiableDecryptions {
                ciphertexts,
                decryption_proofs,
            },
            remaining_public_key,
        })
    }

    fn mix_dec_offline(
        &self,
        group: &GqGroup,
        ciphertexts: &[Ciphertext],
        remaining_public_key: &ElGamalPublicKey,
        key_share: &KeyShare,
        shuffle: bool,
    ) -> Result<OfflineMixOutput, CryptoError> {
        Self::check_inputs(group, ciphertexts, remaining_public_key)?;
        if key_share.public_key(group) != *remaining_public_key {
            return Err(CryptoError::IncompatibleArguments(
                "the electoral board key does not match the remaining public key".to_string(),
            ));
        }

        let verifiable_shuffle = (shuffle && ciphertexts.len() >= 2)
            .then(|| Self::shuffle(group, ciphertexts, remaining_public_key));
        let to_decrypt = verifiable_shuffle
            .as_ref()
            .map_or(ciphertexts, |s| s.shuffled_ciphertexts.as_slice());

        let (decrypted_votes, decryption_proofs): (Vec<_>, Vec<_>) = Self::decrypt_all(group, to_decrypt, key_share)
            .into_iter()
            .map(|(c, proof)| (c.phi, proof))
            .unzip();

        Ok(OfflineMixOutput {
            verifiable_shuffle,
            verifiable_plaintext_decryption: VerifiablePlaintextDecryption {
                decrypted_votes,
                decryption_proofs,
            },
        })
    }
}

fn shuffle_digest(
    group: &GqGroup,
    public_key: &ElGamalPublicKey,
    inputs: &[Ciphertext],
    outputs: &[Ciphertext],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(group.p().to_str_radix(16).as_bytes());
    hasher.update(public_key.0.to_hex().as_bytes());
    for c in inputs.iter().chain(outputs) {
        hasher.update(b"|");
        hasher.update(c.gamma.to_hex().as_bytes());
        hasher.update(b",");
        hasher.update(c.phi.to_hex().as_bytes());
    }
    data_encoding::HEXLOWER.encode(&hasher.finalize())
}

/// Check every proof of a partial decryption step.
pub fn verify_decryptions(
    group: &GqGroup,
    inputs: &[Ciphertext],
    decryptions: &VerifiableDecryptions,
    node_public_key: &ElGamalPublicKey,
) -> bool {
    inputs.len() == decryptions.ciphertexts.len()
        && inputs.len() == decryptions.decryption_proofs.len()
        && inputs
            .iter()
            .zip(&decryptions.ciphertexts)
            .zip(&decryptions.decryption_proofs)
            .all(|((input, output), proof)| {
                input.gamma == output.gamma && proof.verify(group, node_public_key, input, &output.phi)
            })
}
