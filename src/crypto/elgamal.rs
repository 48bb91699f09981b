use std::fmt::{Debug, Formatter};

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::group::{GqElement, GqGroup, ZqElement};

/// An ElGamal ciphertext `(gamma, phi) = (g^r, pk^r * m)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext {
    pub gamma: GqElement,
    pub phi: GqElement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElGamalPublicKey(pub GqElement);

/// A secret exponent held by one node or by the electoral board.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyShare(ZqElement);

/// Chaum-Pedersen proof that `log_g(pk) == log_gamma(gamma^x)`, made non-interactive with SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionProof {
    pub e: ZqElement,
    pub z: ZqElement,
}

impl Ciphertext {
    /// The encryption of the identity message with exponent 1.
    pub fn trivial(group: &GqGroup, public_key: &ElGamalPublicKey) -> Self {
        Self {
            gamma: group.generator(),
            phi: public_key.0.clone(),
        }
    }

    pub fn encrypt(group: &GqGroup, public_key: &ElGamalPublicKey, message: &GqElement, r: &ZqElement) -> Self {
        Self {
            gamma: group.exp_g(r),
            phi: group.mul(&group.pow(&public_key.0, r), message),
        }
    }

    /// Re-randomise under the given key, leaving the plaintext unchanged.
    pub fn reencrypt(&self, group: &GqGroup, public_key: &ElGamalPublicKey, r: &ZqElement) -> Self {
        Self {
            gamma: group.mul(&self.gamma, &group.exp_g(r)),
            phi: group.mul(&self.phi, &group.pow(&public_key.0, r)),
        }
    }

    pub fn is_member_of(&self, group: &GqGroup) -> bool {
        group.contains(&self.gamma) && group.contains(&self.phi)
    }
}

impl ElGamalPublicKey {
    /// The key that remains once `share`'s holder has decrypted.
    pub fn remove(&self, group: &GqGroup, share: &ElGamalPublicKey) -> ElGamalPublicKey {
        ElGamalPublicKey(group.mul(&self.0, &group.inverse(&share.0)))
    }

    pub fn combine(&self, group: &GqGroup, other: &ElGamalPublicKey) -> ElGamalPublicKey {
        ElGamalPublicKey(group.mul(&self.0, &other.0))
    }
}

impl KeyShare {
    pub fn new(exponent: ZqElement) -> Self {
        Self(exponent)
    }

    pub fn generate<R: Rng + ?Sized>(group: &GqGroup, rng: &mut R) -> Self {
        Self(group.random_exponent(rng))
    }

    /// A share with exponent zero: decrypting with it changes nothing.
    pub fn zero() -> Self {
        Self(ZqElement::zero())
    }

    pub fn exponent(&self) -> &ZqElement {
        &self.0
    }

    pub fn public_key(&self, group: &GqGroup) -> ElGamalPublicKey {
        ElGamalPublicKey(group.exp_g(&self.0))
    }

    /// Strip this share from `phi`: returns `phi * gamma^-x` and a proof of correctness.
    pub fn partial_decrypt<R: Rng + ?Sized>(
        &self,
        group: &GqGroup,
        ciphertext: &Ciphertext,
        rng: &mut R,
    ) -> (GqElement, DecryptionProof) {
        let gamma_x = group.pow(&ciphertext.gamma, &self.0);
        let decrypted = group.mul(&ciphertext.phi, &group.inverse(&gamma_x));

        let b = group.random_exponent(rng);
        let t1 = group.exp_g(&b);
        let t2 = group.pow(&ciphertext.gamma, &b);
        let public_key = self.public_key(group);
        let e = challenge(group, &public_key, ciphertext, &gamma_x, &t1, &t2);
        let z = group.add_exponents(&b, &group.mul_exponents(&e, &self.0));
        (decrypted, DecryptionProof { e, z })
    }
}

impl Debug for KeyShare {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyShare(..)")
    }
}

impl DecryptionProof {
    /// Check that `decrypted` is `input` with the share behind `public_key` removed.
    pub fn verify(
        &self,
        group: &GqGroup,
        public_key: &ElGamalPublicKey,
        input: &Ciphertext,
        decrypted_phi: &GqElement,
    ) -> bool {
        if !group.contains(decrypted_phi) {
            return false;
        }
        // gamma^x = phi / phi'
        let gamma_x = group.mul(&input.phi, &group.inverse(decrypted_phi));
        let neg_e = group.inverse_exponent(&self.e);
        let t1 = group.mul(&group.exp_g(&self.z), &group.pow(&public_key.0, &neg_e));
        let t2 = group.mul(&group.pow(&input.gamma, &self.z), &group.pow(&gamma_x, &neg_e));
        challenge(group, public_key, input, &gamma_x, &t1, &t2) == self.e
    }
}

fn challenge(
    group: &GqGroup,
    public_key: &ElGamalPublicKey,
    ciphertext: &Ciphertext,
    gamma_x: &GqElement,
    t1: &GqElement,
    t2: &GqElement,
) -> ZqElement {
    let mut hasher = Sha256::new();
    for part in [
        group.p().to_str_radix(16),
        group.q().to_str_radix(16),
        group.generator().to_hex(),
        public_key.0.to_hex(),
        ciphertext.gamma.to_hex(),
        ciphertext.phi.to_hex(),
        gamma_x.to_hex(),
        t1.to_hex(),
        t2.to_hex(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update(b"|");
    }
    group.exponent_from_bytes(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use num_bigint::BigUint;

    use super::*;
    use crate::testing::test_group;

    #[test]
    fn decryption_with_all_shares_recovers_message() {
        let group = test_group();
        let mut rng = rand::thread_rng();
        let shares: Vec<_> = (0..3).map(|_| KeyShare::generate(&group, &mut rng)).collect();
        let public_key = shares
            .iter()
            .map(|s| s.public_key(&group))
            .reduce(|a, b| a.combine(&group, &b))
            .unwrap();
        let message = group.element(BigUint::from(15u32)).unwrap();
        let r = group.random_exponent(&mut rng);
        let mut ciphertext = Ciphertext::encrypt(&group, &public_key, &message, &r);
        ciphertext = ciphertext.reencrypt(&group, &public_key, &group.random_exponent(&mut rng));

        for share in &shares {
            let (phi, proof) = share.partial_decrypt(&group, &ciphertext, &mut rng);
            assert!(proof.verify(&group, &share.public_key(&group), &ciphertext, &phi));
            ciphertext.phi = phi;
        }
        assert_eq!(ciphertext.phi, message);
    }

    #[test]
    fn proof_rejects_wrong_decryption() {
        let group = test_group();
        let mut rng = rand::thread_rng();
        let share = KeyShare::generate(&group, &mut rng);
        let public_key = share.public_key(&group);
        let message = group.element(BigUint::from(2u32)).unwrap();
        let ciphertext = Ciphertext::encrypt(&group, &public_key, &message, &group.random_exponent(&mut rng));
        let (_, proof) = share.partial_decrypt(&group, &ciphertext, &mut rng);
        let forged = group.element(BigUint::from(3u32)).unwrap();
        assert!(!proof.verify(&group, &public_key, &ciphertext, &forged));
    }

    #[test]
    fn trivial_ciphertext_decrypts_to_identity() {
        let group = test_group();
        let mut rng = rand::thread_rng();
        let share = KeyShare::generate(&group, &mut rng);
        let trivial = Ciphertext::trivial(&group, &share.public_key(&group));
        let (phi, _) = share.partial_decrypt(&group, &trivial, &mut rng);
        assert!(phi.is_identity());
    }

    #[test]
    fn key_share_debug_is_redacted() {
        let share = KeyShare::generate(&test_group(), &mut rand::thread_rng());
        assert_eq!(format!("{share:?}"), "KeyShare(..)");
    }
}
