//! Wiring of stores, broker, node workers, orchestrator and finalizer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rocket::tokio;

use crate::broker::{ChannelBroker, ChannelNames};
use crate::crypto::{CertificateSignatureService, Keystore, MixnetEngine};
use crate::error::{Error, Result};
use crate::model::ids::NodeId;
use crate::node::NodeMixWorker;
use crate::offline::OfflineFinalizer;
use crate::orchestrator::Orchestrator;
use crate::processor::ExactlyOnceProcessor;
use crate::store::{BallotBoxSource, CommandStore, MixnetRepository};

/// Everything that shapes a running mix-net.
#[derive(Debug, Clone)]
pub struct MixnetSettings {
    pub tenant_id: String,
    pub node_count: NodeId,
    pub local_nodes: Vec<NodeId>,
    pub retry_count: u32,
    pub channels: ChannelNames,
    pub status_wait: Duration,
    pub output_dir: PathBuf,
    pub offline_reshuffle: bool,
}

/// The persistence the mix-net runs on.
#[derive(Clone)]
pub struct Stores {
    pub commands: Arc<dyn CommandStore>,
    pub repository: Arc<dyn MixnetRepository>,
    pub ballot_boxes: Arc<dyn BallotBoxSource>,
}

impl Stores {
    /// Use one value for every store.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: CommandStore + MixnetRepository + BallotBoxSource + 'static,
    {
        Self {
            commands: store.clone(),
            repository: store.clone(),
            ballot_boxes: store,
        }
    }
}

#[derive(Clone)]
pub struct Mixnet {
    pub orchestrator: Arc<Orchestrator>,
    pub finalizer: Arc<OfflineFinalizer>,
    pub broker: Arc<ChannelBroker>,
}

impl Mixnet {
    /// Start the workers of the local nodes and the orchestrator's response loops.
    ///
    /// Must be called from within the runtime.
    pub fn start(
        settings: &MixnetSettings,
        keystore: &Keystore,
        stores: Stores,
        engine: Arc<dyn MixnetEngine>,
        broker: Arc<ChannelBroker>,
    ) -> Result<Self> {
        let verifier = Arc::new(CertificateSignatureService::new(keystore.root_certificate().clone(), None)?);

        for &node_id in &settings.local_nodes {
            let keys = keystore
                .node(node_id)
                .ok_or_else(|| Error::not_found(format!("keys of node {node_id}")))?;
            let signatures = CertificateSignatureService::new(
                keystore.root_certificate().clone(),
                Some(keys.identity.clone()),
            )?;
            let worker = Arc::new(NodeMixWorker::new(
                node_id,
                settings.node_count,
                keys.key_share.clone(),
                engine.clone(),
                Arc::new(signatures),
                ExactlyOnceProcessor::new(stores.commands.clone()),
                broker.clone(),
                settings.channels.clone(),
            ));
            let requests = broker.subscribe(&settings.channels.request(node_id))?;
            tokio::spawn(worker.run(requests));
        }

        let orchestrator = Arc::new(Orchestrator::new(
            &settings.tenant_id,
            settings.node_count,
            settings.retry_count,
            settings.status_wait,
            stores.repository.clone(),
            stores.ballot_boxes.clone(),
            broker.clone(),
            settings.channels.clone(),
        ));
        for node_id in 1..=settings.node_count {
            let responses = broker.subscribe(&settings.channels.response(node_id))?;
            tokio::spawn(orchestrator.clone().run(responses));
        }

        let finalizer = Arc::new(OfflineFinalizer::new(
            settings.node_count,
            settings.output_dir.clone(),
            settings.offline_reshuffle,
            keystore.electoral_board_key().clone(),
            engine,
            verifier,
            stores.repository,
            stores.ballot_boxes,
        ));

        info!(
            "Mix-net started with {} nodes, {:?} running locally",
            settings.node_count, settings.local_nodes
        );
        Ok(Self {
            orchestrator,
            finalizer,
            broker,
        })
    }
}
