use std::fmt::{Debug, Formatter};

use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::CryptoError;
use crate::model::serde_hex;

/// The subgroup of quadratic residues of a safe prime `p = 2q + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GqGroup {
    #[serde(with = "serde_hex::biguint")]
    p: BigUint,
    #[serde(with = "serde_hex::biguint")]
    q: BigUint,
    #[serde(with = "serde_hex::biguint")]
    g: BigUint,
}

/// An element of a [`GqGroup`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GqElement(#[serde(with = "serde_hex::biguint")] BigUint);

/// An exponent, i.e. an element of `Z_q`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZqElement(#[serde(with = "serde_hex::biguint")] BigUint);

impl GqGroup {
    /// Build a group, checking that `p` is `2q + 1` and that `g` generates the order `q` subgroup.
    pub fn new(p: BigUint, q: BigUint, g: BigUint) -> Result<Self, CryptoError> {
        if p != &q * 2u32 + 1u32 {
            return Err(CryptoError::InvalidGroup("p must equal 2q + 1".to_string()));
        }
        if g <= BigUint::one() || g >= p {
            return Err(CryptoError::InvalidGroup("generator out of range".to_string()));
        }
        if !g.modpow(&q, &p).is_one() {
            return Err(CryptoError::InvalidGroup(
                "generator is not a quadratic residue".to_string(),
            ));
        }
        Ok(Self { p, q, g })
    }

    /// Re-run the structural checks, e.g. on a group that arrived over the wire.
    pub fn validate(&self) -> Result<(), CryptoError> {
        Self::new(self.p.clone(), self.q.clone(), self.g.clone()).map(|_| ())
    }

    pub fn p(&self) -> &BigUint {
        &self.p
    }

    pub fn q(&self) -> &BigUint {
        &self.q
    }

    pub fn generator(&self) -> GqElement {
        GqElement(self.g.clone())
    }

    pub fn identity(&self) -> GqElement {
        GqElement(BigUint::one())
    }

    pub fn contains(&self, element: &GqElement) -> bool {
        !element.0.is_zero() && element.0 < self.p && element.0.modpow(&self.q, &self.p).is_one()
    }

    /// Wrap a value, failing if it is not a member of the group.
    pub fn element(&self, value: BigUint) -> Result<GqElement, CryptoError> {
        let element = GqElement(value);
        if self.contains(&element) {
            Ok(element)
        } else {
            Err(CryptoError::NotAGroupMember(element.0.to_str_radix(16)))
        }
    }

    pub fn exponent(&self, value: BigUint) -> Result<ZqElement, CryptoError> {
        if value < self.q {
            Ok(ZqElement(value))
        } else {
            Err(CryptoError::IncompatibleArguments(
                "exponent must be smaller than q".to_string(),
            ))
        }
    }

    pub fn random_exponent<R: Rng + ?Sized>(&self, rng: &mut R) -> ZqElement {
        ZqElement(rng.gen_biguint_below(&self.q))
    }

    pub fn mul(&self, a: &GqElement, b: &GqElement) -> GqElement {
        GqElement((&a.0 * &b.0) % &self.p)
    }

    /// `base ^ exponent mod p`
    pub fn pow(&self, base: &GqElement, exponent: &ZqElement) -> GqElement {
        GqElement(base.0.modpow(&exponent.0, &self.p))
    }

    /// `g ^ exponent mod p`
    pub fn exp_g(&self, exponent: &ZqElement) -> GqElement {
        GqElement(self.g.modpow(&exponent.0, &self.p))
    }

    /// Inverse of a group member. Every member has order dividing `q`.
    pub fn inverse(&self, a: &GqElement) -> GqElement {
        let exponent = &self.q - BigUint::one();
        GqElement(a.0.modpow(&exponent, &self.p))
    }

    pub fn add_exponents(&self, a: &ZqElement, b: &ZqElement) -> ZqElement {
        ZqElement((&a.0 + &b.0) % &self.q)
    }

    pub fn mul_exponents(&self, a: &ZqElement, b: &ZqElement) -> ZqElement {
        ZqElement((&a.0 * &b.0) % &self.q)
    }

    /// `-a mod q`
    pub fn inverse_exponent(&self, a: &ZqElement) -> ZqElement {
        ZqElement((&self.q - &a.0 % &self.q) % &self.q)
    }

    /// Reduce arbitrary bytes (e.g. a hash digest) to an exponent.
    pub fn exponent_from_bytes(&self, bytes: &[u8]) -> ZqElement {
        ZqElement(BigUint::from_bytes_be(bytes) % &self.q)
    }
}

impl GqElement {
    pub fn value(&self) -> &BigUint {
        &self.0
    }

    pub fn is_identity(&self) -> bool {
        self.0.is_one()
    }

    pub fn to_hex(&self) -> String {
        self.0.to_str_radix(16)
    }
}

impl Debug for GqElement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "GqElement({})", self.0)
    }
}

impl ZqElement {
    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    pub fn value(&self) -> &BigUint {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl Debug for ZqElement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ZqElement({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_group;

    #[test]
    fn rejects_malformed_groups() {
        let p = BigUint::from(2039u32);
        let q = BigUint::from(1019u32);
        assert!(GqGroup::new(p.clone(), BigUint::from(1000u32), BigUint::from(4u32)).is_err());
        // 7 is a quadratic non-residue mod 2039.
        assert!(GqGroup::new(p.clone(), q.clone(), BigUint::from(7u32)).is_err());
        assert!(GqGroup::new(p, q, BigUint::from(4u32)).is_ok());
    }

    #[test]
    fn membership_follows_quadratic_residuosity() {
        let group = test_group();
        for prime in [2u32, 3, 5, 17] {
            assert!(group.element(BigUint::from(prime)).is_ok(), "{prime}");
        }
        assert!(group.element(BigUint::from(7u32)).is_err());
        assert!(group.element(BigUint::zero()).is_err());
        assert!(group.element(group.p().clone()).is_err());
    }

    #[test]
    fn inverse_cancels() {
        let group = test_group();
        let mut rng = rand::thread_rng();
        let a = group.exp_g(&group.random_exponent(&mut rng));
        assert!(group.mul(&a, &group.inverse(&a)).is_identity());
    }

    #[test]
    fn serialises_as_hex() {
        let group = test_group();
        let json = serde_json::to_string(&group.generator()).unwrap();
        assert_eq!(json, "\"4\"");
        let parsed: GqGroup = serde_json::from_str(&serde_json::to_string(&group).unwrap()).unwrap();
        assert_eq!(parsed, group);
    }
}
