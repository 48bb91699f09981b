use std::sync::Arc;

use rocket::tokio::{self, sync::mpsc::UnboundedReceiver};

use crate::broker::{Broker, ChannelNames, Message};
use crate::crypto::{KeyShare, MixnetEngine, SignatureService};
use crate::error::{MixnetError, Result};
use crate::model::{
    command::RequestIdentity,
    ids::NodeId,
    payload::{MixInput, MixnetPayload, MixnetShufflePayload},
    state::MixnetState,
};
use crate::processor::{ExactlyOnceProcessor, ProcessError};

/// Context under which node hops are recorded for exactly-once processing.
pub const MIX_DEC_ONLINE_CONTEXT: &str = "MIXING_TALLY_MIX_DEC_ONLINE";

/// One control-component node's step of the online mix-net.
pub struct NodeMixWorker {
    node_id: NodeId,
    node_count: NodeId,
    key_share: KeyShare,
    engine: Arc<dyn MixnetEngine>,
    signatures: Arc<dyn SignatureService>,
    processor: ExactlyOnceProcessor,
    broker: Arc<dyn Broker>,
    channels: ChannelNames,
}

impl NodeMixWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: NodeId,
        node_count: NodeId,
        key_share: KeyShare,
        engine: Arc<dyn MixnetEngine>,
        signatures: Arc<dyn SignatureService>,
        processor: ExactlyOnceProcessor,
        broker: Arc<dyn Broker>,
        channels: ChannelNames,
    ) -> Self {
        Self {
            node_id,
            node_count,
            key_share,
            engine,
            signatures,
            processor,
            broker,
            channels,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Validate the token, run the hop and return the advanced token.
    ///
    /// Nothing is mutated on failure: the caller hands the original token back
    /// together with the error.
    pub async fn mix(&self, state: &MixnetState) -> std::result::Result<MixnetState, MixnetError> {
        if state.node_to_visit != self.node_id {
            return Err(MixnetError::Misaddressed {
                expected: state.node_to_visit,
                actual: self.node_id,
            });
        }

        let input = state.payload.mix_input()?;

        match &state.payload {
            MixnetPayload::Shuffle(previous) => self.verify_predecessor(previous, &input)?,
            MixnetPayload::Initial(_) if self.node_id != 1 => {
                return Err(MixnetError::UnexpectedInitialPayload(self.node_id));
            }
            MixnetPayload::Initial(_) => {}
        }

        let engine = self.engine.clone();
        let group = input.encryption_group.clone();
        let ciphertexts = input.ciphertexts.to_vec();
        let remaining = input.remaining_public_key.clone();
        let key_share = self.key_share.clone();
        let output = tokio::task::spawn_blocking(move || {
            engine.mix_dec_online(&group, &ciphertexts, &remaining, &key_share)
        })
        .await
        .map_err(|e| MixnetError::Computation(format!("mixing task failed: {e}")))??;

        let mut payload = MixnetShufflePayload {
            election_event_id: Some(input.election_event_id.clone()),
            ballot_box_id: Some(input.ballot_box_id.clone()),
            encryption_group: Some(input.encryption_group.clone()),
            election_public_key: Some(input.election_public_key.clone()),
            verifiable_shuffle: output.verifiable_shuffle,
            verifiable_decryptions: Some(output.verifiable_decryptions),
            remaining_election_public_key: Some(output.remaining_public_key),
            previous_remaining_election_public_key: Some(input.remaining_public_key.clone()),
            node_election_public_key: Some(self.key_share.public_key(input.encryption_group)),
            node_id: Some(self.node_id),
            signature: None,
        };
        let signable = payload
            .signable_bytes()
            .map_err(|e| MixnetError::Signing(e.to_string()))?;
        let signature = self
            .signatures
            .sign(&signable)
            .map_err(|e| MixnetError::Signing(e.to_string()))?;
        payload.signature = Some(signature);

        let next = self.node_id + 1;
        if next > self.node_count {
            debug!("Node {} is the last online node, payload is ready for the offline stage", self.node_id);
        }
        Ok(MixnetState {
            payload: MixnetPayload::Shuffle(payload),
            node_to_visit: next,
            retry_count: state.retry_count,
            mixnet_error: None,
        })
    }

    fn verify_predecessor(&self, previous: &MixnetShufflePayload, input: &MixInput<'_>) -> std::result::Result<(), MixnetError> {
        let (producer, signature) = input
            .producer
            .ok_or(MixnetError::MissingFields(vec!["node_id", "signature"]))?;
        let expected = self.node_id - 1;
        if producer != expected {
            return Err(MixnetError::OutOfOrder {
                expected,
                actual: producer,
            });
        }
        let signable = previous
            .signable_bytes()
            .map_err(|e| MixnetError::Computation(e.to_string()))?;
        match self.signatures.verify(&signable, signature, producer) {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!("Node {}: signature of node {producer} does not verify", self.node_id);
                Err(MixnetError::InvalidSignature)
            }
            Err(e) => {
                warn!("Node {}: signature of node {producer} cannot be checked: {e}", self.node_id);
                Err(MixnetError::InvalidSignature)
            }
        }
    }

    /// Handle one delivery from the request channel.
    pub async fn on_message(&self, message: Message) -> Result<()> {
        let state = MixnetState::from_message_bytes(&message.body)?;
        let context_id = match (state.payload.election_event_id(), state.payload.ballot_box_id()) {
            (Some(ee), Some(bb)) => format!("{ee}-{bb}"),
            _ => "unknown".to_string(),
        };
        info!(
            "Node {} received mixing request. [correlationId: {}, contextId: {context_id}, nodeToVisit: {}]",
            self.node_id, message.correlation_id, state.node_to_visit
        );
        let identity = RequestIdentity::new(
            &message.correlation_id,
            context_id,
            MIX_DEC_ONLINE_CONTEXT,
            self.node_id,
        );
        let request = state.request_bytes()?;

        let outcome = self
            .processor
            .process(&identity, &request, || async {
                let mixed = self.mix(&state).await?;
                mixed
                    .to_message_bytes()
                    .map_err(|e| MixnetError::Computation(e.to_string()))
            })
            .await;

        let response = match outcome {
            Ok(bytes) => bytes,
            Err(ProcessError::Task(e)) => {
                warn!("Node {} could not process {identity}: {e}", self.node_id);
                state.clone().with_error(&e).to_message_bytes()?
            }
            Err(ProcessError::Conflict(identity)) => {
                error!("Node {} refuses conflicting request {identity}", self.node_id);
                let mut failed = state.clone();
                failed.retry_count = 0;
                failed.mixnet_error = Some(ProcessError::<MixnetError>::Conflict(identity).to_string());
                failed.to_message_bytes()?
            }
            Err(ProcessError::InProgress(identity)) => {
                debug!("Node {}: {identity} is answered by another delivery", self.node_id);
                return Ok(());
            }
            Err(ProcessError::Store(e)) => return Err(e),
        };

        self.broker
            .publish(
                &self.channels.response(self.node_id),
                Message {
                    correlation_id: message.correlation_id,
                    body: response,
                },
            )
            .await
    }

    /// Consume the request channel until it closes.
    pub async fn run(self: Arc<Self>, mut requests: UnboundedReceiver<Message>) {
        info!("Node {} is listening for mixing requests", self.node_id);
        while let Some(message) = requests.recv().await {
            let worker = self.clone();
            tokio::spawn(async move {
                if let Err(e) = worker.on_message(message).await {
                    error!("Node {} failed to handle a message: {e}", worker.node_id);
                }
            });
        }
        info!("Node {} stopped listening", self.node_id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::broker::ChannelBroker;
    use crate::crypto::{verify_decryptions, ElGamalEngine};
    use crate::store::MemStore;
    use crate::testing::{CountingEngine, TestElection};

    const CHANNELS: (&str, &str) = ("request-", "response-");

    struct Fixture {
        election: TestElection,
        broker: Arc<ChannelBroker>,
        store: Arc<MemStore>,
    }

    impl Fixture {
        fn new(node_count: usize) -> Self {
            Self {
                election: TestElection::new(node_count),
                broker: Arc::new(ChannelBroker::new()),
                store: Arc::new(MemStore::new()),
            }
        }

        fn worker(&self, node_id: NodeId, engine: Arc<dyn MixnetEngine>) -> NodeMixWorker {
            NodeMixWorker::new(
                node_id,
                self.election.node_keys.len() as NodeId,
                self.election.node_keys[node_id as usize - 1].clone(),
                engine,
                Arc::new(self.election.signature_service(node_id)),
                ExactlyOnceProcessor::new(self.store.clone()),
                self.broker.clone(),
                ChannelNames::new(CHANNELS.0, CHANNELS.1),
            )
        }

        fn initial_state(&self, votes: &[&[u32]]) -> MixnetState {
            MixnetState::new(MixnetPayload::Initial(self.election.initial_payload(votes)), 3)
        }
    }

    fn shuffle(state: &MixnetState) -> &MixnetShufflePayload {
        match &state.payload {
            MixnetPayload::Shuffle(payload) => payload,
            other => panic!("expected a shuffle payload, got {other:?}"),
        }
    }

    #[rocket::async_test]
    async fn first_node_mixes_the_initial_payload() {
        let fixture = Fixture::new(3);
        let election = &fixture.election;
        let worker = fixture.worker(1, Arc::new(ElGamalEngine));

        let mixed = worker.mix(&fixture.initial_state(&[&[2], &[3, 5]])).await.unwrap();

        assert_eq!(mixed.node_to_visit, 2);
        assert_eq!(mixed.retry_count, 3);
        assert!(!mixed.has_error());
        let payload = shuffle(&mixed);
        assert_eq!(payload.node_id, Some(1));
        let node_pk = election.node_keys[0].public_key(&election.group);
        assert_eq!(payload.node_election_public_key.as_ref(), Some(&node_pk));
        assert_eq!(
            payload.remaining_election_public_key,
            Some(election.election_public_key.remove(&election.group, &node_pk))
        );
        assert_eq!(
            payload.previous_remaining_election_public_key.as_ref(),
            Some(&election.election_public_key)
        );
        let shuffled = &payload.verifiable_shuffle.as_ref().unwrap().shuffled_ciphertexts;
        assert!(verify_decryptions(
            &election.group,
            shuffled,
            payload.verifiable_decryptions.as_ref().unwrap(),
            &node_pk
        ));

        let verifier = election.signature_service(2);
        let signature = payload.signature.as_ref().unwrap();
        assert!(verifier.verify(&payload.signable_bytes().unwrap(), signature, 1).unwrap());
    }

    #[rocket::async_test]
    async fn chained_hops_hand_over_the_remaining_key() {
        let fixture = Fixture::new(3);
        let mut state = fixture.initial_state(&[&[2], &[17], &[3]]);
        for node_id in 1..=3 {
            state = fixture.worker(node_id, Arc::new(ElGamalEngine)).mix(&state).await.unwrap();
        }
        assert_eq!(state.node_to_visit, 4);
        let election = &fixture.election;
        assert_eq!(
            shuffle(&state).remaining_election_public_key,
            Some(election.board_key.public_key(&election.group))
        );
    }

    #[rocket::async_test]
    async fn misaddressed_state_is_rejected_without_computing() {
        let fixture = Fixture::new(3);
        let engine = Arc::new(CountingEngine::new());
        let worker = fixture.worker(2, engine.clone());

        let err = worker.mix(&fixture.initial_state(&[&[2]])).await.unwrap_err();

        assert_eq!(err, MixnetError::Misaddressed { expected: 1, actual: 2 });
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[rocket::async_test]
    async fn initial_payload_is_only_accepted_by_the_first_node() {
        let fixture = Fixture::new(3);
        let mut state = fixture.initial_state(&[&[2]]);
        state.node_to_visit = 2;
        let err = fixture.worker(2, Arc::new(ElGamalEngine)).mix(&state).await.unwrap_err();
        assert_eq!(err, MixnetError::UnexpectedInitialPayload(2));
    }

    #[rocket::async_test]
    async fn tampered_payload_fails_signature_check() {
        let fixture = Fixture::new(3);
        let mut state = fixture
            .worker(1, Arc::new(ElGamalEngine))
            .mix(&fixture.initial_state(&[&[2], &[3]]))
            .await
            .unwrap();
        if let MixnetPayload::Shuffle(payload) = &mut state.payload {
            let decryptions = payload.verifiable_decryptions.as_mut().unwrap();
            decryptions.ciphertexts.swap(0, 1);
        }

        let engine = Arc::new(CountingEngine::new());
        let err = fixture.worker(2, engine.clone()).mix(&state).await.unwrap_err();

        assert_eq!(err, MixnetError::InvalidSignature);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[rocket::async_test]
    async fn payload_skipping_a_node_is_out_of_order() {
        let fixture = Fixture::new(3);
        let mut state = fixture
            .worker(1, Arc::new(ElGamalEngine))
            .mix(&fixture.initial_state(&[&[2]]))
            .await
            .unwrap();
        state.node_to_visit = 3;
        let err = fixture.worker(3, Arc::new(ElGamalEngine)).mix(&state).await.unwrap_err();
        assert_eq!(err, MixnetError::OutOfOrder { expected: 2, actual: 1 });
    }

    #[rocket::async_test]
    async fn redelivered_request_replays_the_recorded_response() {
        let fixture = Fixture::new(3);
        let engine = Arc::new(CountingEngine::new());
        let worker = fixture.worker(1, engine.clone());
        let mut responses = fixture.broker.subscribe("response-1").unwrap();
        let message = Message {
            correlation_id: "corr-1".to_string(),
            body: fixture.initial_state(&[&[2], &[5]]).to_message_bytes().unwrap(),
        };

        worker.on_message(message.clone()).await.unwrap();
        worker.on_message(message).await.unwrap();

        let first = responses.recv().await.unwrap();
        let second = responses.recv().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.correlation_id, "corr-1");
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fixture.store.command_count(), 1);
        let state = MixnetState::from_message_bytes(&first.body).unwrap();
        assert_eq!(state.node_to_visit, 2);
    }

    #[rocket::async_test]
    async fn failed_hop_answers_with_the_error_and_keeps_no_record() {
        let fixture = Fixture::new(3);
        let worker = fixture.worker(1, Arc::new(CountingEngine::failing()));
        let mut responses = fixture.broker.subscribe("response-1").unwrap();
        let request = fixture.initial_state(&[&[2]]);

        worker
            .on_message(Message {
                correlation_id: "corr-2".to_string(),
                body: request.to_message_bytes().unwrap(),
            })
            .await
            .unwrap();

        let response = MixnetState::from_message_bytes(&responses.recv().await.unwrap().body).unwrap();
        assert!(response.has_error());
        assert_eq!(response.node_to_visit, 1);
        assert_eq!(response.payload, request.payload);
        assert_eq!(response.retry_count, request.retry_count);
        assert_eq!(fixture.store.command_count(), 0);
    }

    #[rocket::async_test]
    async fn conflicting_redelivery_is_terminal() {
        let fixture = Fixture::new(3);
        let worker = fixture.worker(1, Arc::new(ElGamalEngine));
        let mut responses = fixture.broker.subscribe("response-1").unwrap();
        let requests: [&[&[u32]]; 2] = [&[&[2]], &[&[3]]];
        for votes in requests {
            worker
                .on_message(Message {
                    correlation_id: "corr-3".to_string(),
                    body: fixture.initial_state(votes).to_message_bytes().unwrap(),
                })
                .await
                .unwrap();
        }

        let first = MixnetState::from_message_bytes(&responses.recv().await.unwrap().body).unwrap();
        let second = MixnetState::from_message_bytes(&responses.recv().await.unwrap().body).unwrap();
        assert!(!first.has_error());
        assert!(second.has_error());
        assert_eq!(second.retry_count, 0);
    }
}
