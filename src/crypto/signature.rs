use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ids::NodeId, serde_hex};

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("Malformed key material: {0}")]
    Key(String),
    #[error("Invalid certificate chain: {0}")]
    Chain(String),
    #[error("No signing identity is configured")]
    NoSigningIdentity,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// A minimal certificate: an ed25519 public key bound to a subject by its issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub subject: String,
    /// Set for control-component certificates.
    #[serde(default)]
    pub node_id: Option<NodeId>,
    pub public_key: String,
    pub issuer: String,
    pub signature: String,
}

impl Certificate {
    fn issue(subject: String, node_id: Option<NodeId>, key: &VerifyingKey, issuer: &str, issuer_key: &SigningKey) -> Self {
        let mut certificate = Self {
            subject,
            node_id,
            public_key: serde_hex::encode(key.as_bytes()),
            issuer: issuer.to_string(),
            signature: String::new(),
        };
        let signature = issuer_key.sign(&certificate.tbs_bytes());
        certificate.signature = serde_hex::encode(&signature.to_bytes());
        certificate
    }

    /// The bytes covered by the issuer's signature.
    fn tbs_bytes(&self) -> Vec<u8> {
        let node = self.node_id.map(|n| n.to_string()).unwrap_or_default();
        format!("{}|{}|{}|{}", self.subject, node, self.public_key, self.issuer).into_bytes()
    }

    pub fn verifying_key(&self) -> Result<VerifyingKey, SignatureError> {
        let bytes: [u8; 32] = serde_hex::decode(&self.public_key)
            .map_err(|e| SignatureError::Key(e.to_string()))?
            .try_into()
            .map_err(|_| SignatureError::Key("public key must be 32 bytes".to_string()))?;
        VerifyingKey::from_bytes(&bytes).map_err(|e| SignatureError::Key(e.to_string()))
    }

    fn is_issued_by(&self, issuer: &Certificate) -> Result<bool, SignatureError> {
        if self.issuer != issuer.subject {
            return Ok(false);
        }
        let signature = decode_signature(&self.signature)?;
        Ok(issuer
            .verifying_key()?
            .verify(&self.tbs_bytes(), &signature)
            .is_ok())
    }
}

fn decode_signature(hex: &str) -> Result<Signature, SignatureError> {
    let bytes = serde_hex::decode(hex).map_err(|e| SignatureError::Key(e.to_string()))?;
    Signature::from_slice(&bytes).map_err(|e| SignatureError::Key(e.to_string()))
}

/// A detached signature over some content, with the signer's chain (leaf first, root last).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadSignature {
    pub signature_contents: String,
    pub certificate_chain: Vec<Certificate>,
}

/// A node's signing key together with its certificate chain.
#[derive(Clone)]
pub struct SigningIdentity {
    node_id: NodeId,
    signing_key: SigningKey,
    certificate_chain: Vec<Certificate>,
}

impl SigningIdentity {
    pub fn from_parts(node_id: NodeId, signing_key_hex: &str, certificate_chain: Vec<Certificate>) -> Result<Self, SignatureError> {
        let bytes: [u8; 32] = serde_hex::decode(signing_key_hex)
            .map_err(|e| SignatureError::Key(e.to_string()))?
            .try_into()
            .map_err(|_| SignatureError::Key("signing key must be 32 bytes".to_string()))?;
        let signing_key = SigningKey::from_bytes(&bytes);
        let leaf = certificate_chain
            .first()
            .ok_or_else(|| SignatureError::Chain("empty certificate chain".to_string()))?;
        if leaf.verifying_key()? != signing_key.verifying_key() {
            return Err(SignatureError::Chain(format!(
                "leaf certificate of node {node_id} does not match its signing key"
            )));
        }
        if leaf.node_id != Some(node_id) {
            return Err(SignatureError::Chain(format!(
                "leaf certificate is not issued to node {node_id}"
            )));
        }
        Ok(Self {
            node_id,
            signing_key,
            certificate_chain,
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn signing_key_hex(&self) -> String {
        serde_hex::encode(&self.signing_key.to_bytes())
    }

    pub fn certificate_chain(&self) -> &[Certificate] {
        &self.certificate_chain
    }

    pub fn sign(&self, content: &[u8]) -> PayloadSignature {
        let signature = self.signing_key.sign(content);
        PayloadSignature {
            signature_contents: serde_hex::encode(&signature.to_bytes()),
            certificate_chain: self.certificate_chain.clone(),
        }
    }
}

/// The platform root certificate authority. Only provisioning and tests hold its key.
pub struct PlatformRootCa {
    signing_key: SigningKey,
    certificate: Certificate,
}

pub const PLATFORM_ROOT_SUBJECT: &str = "Platform Root CA";

impl PlatformRootCa {
    pub fn generate<R: CryptoRng + RngCore>(rng: &mut R) -> Self {
        let signing_key = SigningKey::generate(rng);
        let certificate = Certificate::issue(
            PLATFORM_ROOT_SUBJECT.to_string(),
            None,
            &signing_key.verifying_key(),
            PLATFORM_ROOT_SUBJECT,
            &signing_key,
        );
        Self {
            signing_key,
            certificate,
        }
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn issue_node_identity<R: CryptoRng + RngCore>(&self, node_id: NodeId, rng: &mut R) -> SigningIdentity {
        let signing_key = SigningKey::generate(rng);
        let leaf = Certificate::issue(
            format!("Control Component {node_id}"),
            Some(node_id),
            &signing_key.verifying_key(),
            &self.certificate.subject,
            &self.signing_key,
        );
        SigningIdentity {
            node_id,
            signing_key,
            certificate_chain: vec![leaf, self.certificate.clone()],
        }
    }
}

/// Signing and verification of payloads on behalf of one party.
pub trait SignatureService: Send + Sync {
    fn sign(&self, content: &[u8]) -> Result<PayloadSignature, SignatureError>;

    /// `Ok(false)` for a well-formed but wrong signature or chain, `Err` for one that cannot be parsed.
    fn verify(&self, content: &[u8], signature: &PayloadSignature, signer: NodeId) -> Result<bool, SignatureError>;
}

/// Verifies chains up to a pinned platform root certificate.
pub struct CertificateSignatureService {
    root: Certificate,
    identity: Option<SigningIdentity>,
}

impl CertificateSignatureService {
    pub fn new(root: Certificate, identity: Option<SigningIdentity>) -> Result<Self, SignatureError> {
        if !root.is_issued_by(&root)? {
            return Err(SignatureError::Chain(
                "platform root certificate is not self-signed".to_string(),
            ));
        }
        if let Some(identity) = &identity {
            if identity.certificate_chain.last() != Some(&root) {
                return Err(SignatureError::Chain(format!(
                    "chain of node {} does not end at the platform root",
                    identity.node_id
                )));
            }
        }
        Ok(Self { root, identity })
    }

    fn chain_is_valid(&self, chain: &[Certificate]) -> Result<bool, SignatureError> {
        if chain.last() != Some(&self.root) {
            return Ok(false);
        }
        for pair in chain.windows(2) {
            if !pair[0].is_issued_by(&pair[1])? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl SignatureService for CertificateSignatureService {
    fn sign(&self, content: &[u8]) -> Result<PayloadSignature, SignatureError> {
        self.identity
            .as_ref()
            .map(|identity| identity.sign(content))
            .ok_or(SignatureError::NoSigningIdentity)
    }

    fn verify(&self, content: &[u8], signature: &PayloadSignature, signer: NodeId) -> Result<bool, SignatureError> {
        let leaf = match signature.certificate_chain.first() {
            Some(leaf) => leaf,
            None => return Ok(false),
        };
        if leaf.node_id != Some(signer) || !self.chain_is_valid(&signature.certificate_chain)? {
            return Ok(false);
        }
        let signature = decode_signature(&signature.signature_contents)?;
        Ok(leaf.verifying_key()?.verify(content, &signature).is_ok())
    }
}
