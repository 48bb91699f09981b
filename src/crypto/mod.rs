//! Cryptographic building blocks consumed by the mix-net.
//!
//! The protocol code only talks to [`MixnetEngine`] and [`SignatureService`];
//! [`ElGamalEngine`] and [`CertificateSignatureService`] are the implementations
//! wired in by default.

use thiserror::Error;

mod elgamal;
mod engine;
mod group;
mod keystore;
mod signature;

pub use elgamal::{Ciphertext, DecryptionProof, ElGamalPublicKey, KeyShare};
pub use engine::{
    verify_decryptions, ElGamalEngine, MixnetEngine, OfflineMixOutput, OnlineMixOutput, ShuffleArgument,
    VerifiableDecryptions, VerifiablePlaintextDecryption, VerifiableShuffle,
};
pub use group::{GqElement, GqGroup, ZqElement};
pub use keystore::{
    node_keystore_file, ElectoralBoardKeyFile, Keystore, NodeKeys, NodeKeystoreFile, ELECTORAL_BOARD_FILE,
    ROOT_CERTIFICATE_FILE,
};
pub use signature::{
    Certificate, CertificateSignatureService, PayloadSignature, PlatformRootCa, SignatureError, SignatureService,
    SigningIdentity,
};

#[derive(Debug, Clone, Error)]
pub enum CryptoError {
    #[error("Incompatible input arguments: {0}")]
    IncompatibleArguments(String),
    #[error("Invalid group: {0}")]
    InvalidGroup(String),
    #[error("Value {0} is not a member of the group")]
    NotAGroupMember(String),
}
