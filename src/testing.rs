//! Fixtures shared by the unit tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use num_bigint::BigUint;
use rand::rngs::OsRng;
use rocket::tokio::time::{sleep, Instant};

use crate::broker::{ChannelBroker, ChannelNames};
use crate::crypto::{
    CertificateSignatureService, Ciphertext, CryptoError, ElGamalEngine, ElGamalPublicKey, GqElement, GqGroup,
    KeyShare, Keystore, MixnetEngine, NodeKeys, OfflineMixOutput, OnlineMixOutput, PlatformRootCa, SigningIdentity,
};
use crate::model::{
    ballot::{BallotBoxContext, ConfirmedVote},
    ids::{BallotBoxId, EntityId, NodeId},
    payload::MixnetInitialPayload,
    status::{BallotBoxStatus, MixingStatus},
};
use crate::offline::OfflineFinalizer;
use crate::services::{Mixnet, MixnetSettings, Stores};
use crate::store::{MemStore, MixnetRepository};

pub const TENANT: &str = "100";

/// The safe-prime group p = 2039 = 2 * 1019 + 1 with generator 4.
pub fn test_group() -> GqGroup {
    GqGroup::new(BigUint::from(2039u32), BigUint::from(1019u32), BigUint::from(4u32))
        .expect("valid test group")
}

pub fn entity_id() -> EntityId {
    uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .parse()
        .expect("uuid is a valid id")
}

pub fn ballot_box_id() -> BallotBoxId {
    BallotBoxId::new(TENANT, entity_id(), entity_id())
}

/// A fresh, empty directory under the system temp dir.
pub fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("mixnet-test-{}", uuid::Uuid::new_v4().simple()));
    std::fs::create_dir_all(&dir).expect("temp dir is writable");
    dir
}

/// Keys, identities and vote encoding of one ballot box.
pub struct TestElection {
    pub group: GqGroup,
    pub ballot_box: BallotBoxId,
    pub node_keys: Vec<KeyShare>,
    pub board_key: KeyShare,
    pub election_public_key: ElGamalPublicKey,
    /// Options 2, 3, 5 and 17, all quadratic residues mod 2039.
    pub voting_options: Vec<GqElement>,
    pub root: PlatformRootCa,
    pub identities: Vec<SigningIdentity>,
}

impl TestElection {
    pub fn new(node_count: usize) -> Self {
        let group = test_group();
        let node_keys: Vec<KeyShare> = (0..node_count).map(|_| KeyShare::generate(&group, &mut OsRng)).collect();
        let board_key = KeyShare::generate(&group, &mut OsRng);
        let election_public_key = node_keys
            .iter()
            .fold(board_key.public_key(&group), |pk, share| pk.combine(&group, &share.public_key(&group)));
        let voting_options = [2u32, 3, 5, 17]
            .into_iter()
            .map(|prime| group.element(BigUint::from(prime)).expect("option is a group member"))
            .collect();
        let root = PlatformRootCa::generate(&mut OsRng);
        let identities = (1..=node_count as NodeId)
            .map(|node_id| root.issue_node_identity(node_id, &mut OsRng))
            .collect();

        Self {
            group,
            ballot_box: ballot_box_id(),
            node_keys,
            board_key,
            election_public_key,
            voting_options,
            root,
            identities,
        }
    }

    /// The plaintext of a vote: the product of the selected options.
    pub fn encode(&self, selections: &[u32]) -> GqElement {
        let product = selections
            .iter()
            .fold(BigUint::from(1u32), |acc, &option| acc * BigUint::from(option));
        self.group.element(product).expect("selections encode to a group member")
    }

    pub fn encrypt_vote(&self, selections: &[u32]) -> Ciphertext {
        let r = self.group.random_exponent(&mut OsRng);
        Ciphertext::encrypt(&self.group, &self.election_public_key, &self.encode(selections), &r)
    }

    pub fn initial_payload(&self, votes: &[&[u32]]) -> MixnetInitialPayload {
        MixnetInitialPayload {
            election_event_id: Some(self.ballot_box.election_event_id().clone()),
            ballot_box_id: Some(self.ballot_box.ballot_box_id().clone()),
            encryption_group: Some(self.group.clone()),
            ciphertexts: Some(votes.iter().map(|vote| self.encrypt_vote(vote)).collect()),
            election_public_key: Some(self.election_public_key.clone()),
        }
    }

    pub fn context(&self) -> BallotBoxContext {
        BallotBoxContext {
            election_event_id: self.ballot_box.election_event_id().clone(),
            ballot_box_id: self.ballot_box.ballot_box_id().clone(),
            ballot_id: "ballot-1".to_string(),
            encryption_group: self.group.clone(),
            election_public_key: self.election_public_key.clone(),
            encoded_voting_options: self.voting_options.clone(),
            number_of_selections: 2,
        }
    }

    pub fn confirmed_vote(&self, verification_card_id: &str, selections: &[u32]) -> ConfirmedVote {
        ConfirmedVote {
            election_event_id: self.ballot_box.election_event_id().clone(),
            ballot_box_id: self.ballot_box.ballot_box_id().clone(),
            verification_card_id: verification_card_id.to_string(),
            encrypted_vote: self.encrypt_vote(selections),
        }
    }

    pub fn keystore(&self) -> Keystore {
        let nodes: HashMap<NodeId, NodeKeys> = self
            .identities
            .iter()
            .zip(&self.node_keys)
            .map(|(identity, key_share)| {
                (
                    identity.node_id(),
                    NodeKeys {
                        identity: identity.clone(),
                        key_share: key_share.clone(),
                    },
                )
            })
            .collect();
        Keystore::new(self.root.certificate().clone(), nodes, self.board_key.clone())
    }

    /// The signature service of `node_id`, which also verifies everybody else.
    pub fn signature_service(&self, node_id: NodeId) -> CertificateSignatureService {
        CertificateSignatureService::new(
            self.root.certificate().clone(),
            Some(self.identities[node_id as usize - 1].clone()),
        )
        .expect("identity is issued by the root")
    }
}

/// Delegates to [`ElGamalEngine`] and counts the online hops it ran.
#[derive(Default)]
pub struct CountingEngine {
    pub calls: AtomicUsize,
    failing: AtomicBool,
}

impl CountingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every online hop fails until [`CountingEngine::recover`] is called.
    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(true),
        }
    }

    pub fn recover(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }
}

impl MixnetEngine for CountingEngine {
    fn mix_dec_online(
        &self,
        group: &GqGroup,
        ciphertexts: &[Ciphertext],
        remaining_public_key: &ElGamalPublicKey,
        key_share: &KeyShare,
    ) -> Result<OnlineMixOutput, CryptoError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(CryptoError::InvalidGroup("injected failure".to_string()));
        }
        ElGamalEngine.mix_dec_online(group, ciphertexts, remaining_public_key, key_share)
    }

    fn mix_dec_offline(
        &self,
        group: &GqGroup,
        ciphertexts: &[Ciphertext],
        remaining_public_key: &ElGamalPublicKey,
        key_share: &KeyShare,
        shuffle: bool,
    ) -> Result<OfflineMixOutput, CryptoError> {
        ElGamalEngine.mix_dec_offline(group, ciphertexts, remaining_public_key, key_share, shuffle)
    }
}

/// A complete mix-net running in-process on [`MemStore`] and [`ChannelBroker`].
pub struct TestNet {
    pub election: TestElection,
    pub store: Arc<MemStore>,
    pub mixnet: Mixnet,
    pub settings: MixnetSettings,
    engine: Arc<dyn MixnetEngine>,
}

impl TestNet {
    pub async fn start(node_count: usize, retry_count: u32) -> Self {
        Self::start_with(node_count, retry_count, Arc::new(ElGamalEngine), ChannelBroker::new()).await
    }

    pub async fn start_with(
        node_count: usize,
        retry_count: u32,
        engine: Arc<dyn MixnetEngine>,
        broker: ChannelBroker,
    ) -> Self {
        let election = TestElection::new(node_count);
        let store = Arc::new(MemStore::new());
        let settings = Self::settings(node_count, retry_count);
        let mixnet = Mixnet::start(
            &settings,
            &election.keystore(),
            Stores::shared(store.clone()),
            engine.clone(),
            Arc::new(broker),
        )
        .expect("test mix-net starts");

        Self {
            election,
            store,
            mixnet,
            settings,
            engine,
        }
    }

    /// Settings of a net whose nodes all run locally.
    pub fn settings(node_count: usize, retry_count: u32) -> MixnetSettings {
        MixnetSettings {
            tenant_id: TENANT.to_string(),
            node_count: node_count as NodeId,
            local_nodes: (1..=node_count as NodeId).collect(),
            retry_count,
            channels: ChannelNames::new("test-request-", "test-response-"),
            status_wait: Duration::from_secs(10),
            output_dir: scratch_dir(),
            offline_reshuffle: true,
        }
    }

    /// Register the ballot box and one confirmed vote per entry of `votes`.
    pub fn cast(&self, votes: &[&[u32]]) {
        self.store.insert_ballot_box(self.election.context());
        for (i, selections) in votes.iter().enumerate() {
            self.store
                .insert_confirmed_vote(self.election.confirmed_vote(&format!("card-{i:03}"), selections));
        }
    }

    /// Poll the ballot box until it reaches `status`.
    pub async fn wait_for(&self, status: MixingStatus) -> BallotBoxStatus {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let current = self.mixnet.orchestrator.status(&self.election.ballot_box).await.unwrap();
            if current.status == status {
                return current;
            }
            assert!(
                Instant::now() < deadline,
                "ballot box never reached {status:?}, last seen {current:?}"
            );
            sleep(Duration::from_millis(20)).await;
        }
    }

    /// A finalizer of this net's election reading from `store`.
    pub fn finalizer_over(&self, store: Arc<MemStore>) -> OfflineFinalizer {
        let repository: Arc<dyn MixnetRepository> = store.clone();
        OfflineFinalizer::new(
            self.settings.node_count,
            scratch_dir(),
            self.settings.offline_reshuffle,
            self.election.board_key.clone(),
            self.engine.clone(),
            Arc::new(CertificateSignatureService::new(self.election.root.certificate().clone(), None).unwrap()),
            repository,
            store,
        )
    }
}
