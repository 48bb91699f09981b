use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{
    elgamal::KeyShare,
    signature::{Certificate, CertificateSignatureService, SignatureError, SigningIdentity},
};
use crate::model::ids::NodeId;

pub const ROOT_CERTIFICATE_FILE: &str = "platform_root_ca.json";
pub const ELECTORAL_BOARD_FILE: &str = "electoral_board.json";

pub fn node_keystore_file(node_id: NodeId) -> String {
    format!("control_component_{node_id}.json")
}

/// On-disk form of one node's secrets.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeKeystoreFile {
    pub node_id: NodeId,
    pub signing_key: String,
    pub certificate_chain: Vec<Certificate>,
    pub key_share: KeyShare,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectoralBoardKeyFile {
    pub key_share: KeyShare,
}

/// Key material of a node running in this process.
#[derive(Clone)]
pub struct NodeKeys {
    pub identity: SigningIdentity,
    pub key_share: KeyShare,
}

/// Everything the running service needs to sign, verify and decrypt.
pub struct Keystore {
    root_certificate: Certificate,
    nodes: HashMap<NodeId, NodeKeys>,
    electoral_board_key: KeyShare,
}

impl Keystore {
    pub fn new(root_certificate: Certificate, nodes: HashMap<NodeId, NodeKeys>, electoral_board_key: KeyShare) -> Self {
        Self {
            root_certificate,
            nodes,
            electoral_board_key,
        }
    }

    /// Load the root certificate and the keys of `local_nodes` from `dir`.
    ///
    /// Every node chain is checked against the root here, so a bad keystore
    /// fails at startup instead of on the first message.
    pub fn load(dir: &Path, local_nodes: &[NodeId]) -> Result<Self, SignatureError> {
        let root_certificate: Certificate =
            serde_json::from_slice(&fs::read(dir.join(ROOT_CERTIFICATE_FILE))?)?;

        let mut nodes = HashMap::new();
        for &node_id in local_nodes {
            let file: NodeKeystoreFile =
                serde_json::from_slice(&fs::read(dir.join(node_keystore_file(node_id)))?)?;
            if file.node_id != node_id {
                return Err(SignatureError::Chain(format!(
                    "keystore file for node {node_id} belongs to node {}",
                    file.node_id
                )));
            }
            let identity = SigningIdentity::from_parts(node_id, &file.signing_key, file.certificate_chain)?;
            CertificateSignatureService::new(root_certificate.clone(), Some(identity.clone()))?;
            debug!("Loaded keystore of node {node_id}");
            nodes.insert(
                node_id,
                NodeKeys {
                    identity,
                    key_share: file.key_share,
                },
            );
        }

        let board_path = dir.join(ELECTORAL_BOARD_FILE);
        let electoral_board_key = if board_path.exists() {
            serde_json::from_slice::<ElectoralBoardKeyFile>(&fs::read(board_path)?)?.key_share
        } else {
            warn!(
                "No {ELECTORAL_BOARD_FILE} in keystore, offline decryption uses a zero electoral board key"
            );
            KeyShare::zero()
        };

        Ok(Self::new(root_certificate, nodes, electoral_board_key))
    }

    pub fn root_certificate(&self) -> &Certificate {
        &self.root_certificate
    }

    pub fn node(&self, node_id: NodeId) -> Option<&NodeKeys> {
        self.nodes.get(&node_id)
    }

    pub fn electoral_board_key(&self) -> &KeyShare {
        &self.electoral_board_key
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;
    use crate::crypto::signature::PlatformRootCa;
    use crate::testing::{scratch_dir, test_group};

    fn write_json<T: Serialize>(path: &Path, value: &T) {
        fs::write(path, serde_json::to_vec(value).unwrap()).unwrap();
    }

    fn node_file(root: &PlatformRootCa, node_id: NodeId) -> NodeKeystoreFile {
        let identity = root.issue_node_identity(node_id, &mut OsRng);
        NodeKeystoreFile {
            node_id,
            signing_key: identity.signing_key_hex(),
            certificate_chain: identity.certificate_chain().to_vec(),
            key_share: KeyShare::generate(&test_group(), &mut OsRng),
        }
    }

    #[test]
    fn loads_local_nodes_and_defaults_board_key() {
        let dir = scratch_dir();
        let root = PlatformRootCa::generate(&mut OsRng);
        write_json(&dir.join(ROOT_CERTIFICATE_FILE), root.certificate());
        write_json(&dir.join(node_keystore_file(1)), &node_file(&root, 1));
        write_json(&dir.join(node_keystore_file(2)), &node_file(&root, 2));

        let keystore = Keystore::load(&dir, &[1, 2]).unwrap();
        assert_eq!(keystore.root_certificate(), root.certificate());
        assert_eq!(keystore.node(2).unwrap().identity.node_id(), 2);
        assert!(keystore.node(3).is_none());
        assert!(keystore.electoral_board_key().exponent().is_zero());
    }

    #[test]
    fn chain_from_another_root_fails_to_load() {
        let dir = scratch_dir();
        let root = PlatformRootCa::generate(&mut OsRng);
        let rogue = PlatformRootCa::generate(&mut OsRng);
        write_json(&dir.join(ROOT_CERTIFICATE_FILE), root.certificate());
        write_json(&dir.join(node_keystore_file(1)), &node_file(&rogue, 1));

        assert!(matches!(
            Keystore::load(&dir, &[1]),
            Err(SignatureError::Chain(_))
        ));
    }

    #[test]
    fn missing_node_file_fails_to_load() {
        let dir = scratch_dir();
        let root = PlatformRootCa::generate(&mut OsRng);
        write_json(&dir.join(ROOT_CERTIFICATE_FILE), root.certificate());
        assert!(matches!(Keystore::load(&dir, &[1]), Err(SignatureError::Io(_))));
    }
}
