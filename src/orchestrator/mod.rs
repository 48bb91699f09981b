//! Admission, dispatch and hand-off of the online mix-net.

use std::sync::Arc;
use std::time::Duration;

use rocket::tokio::{self, sync::mpsc::UnboundedReceiver, time::Instant};

use crate::broker::{Broker, ChannelNames, Message};
use crate::error::{Error, Result};
use crate::model::{
    ballot::BallotBoxContext,
    ids::{BallotBoxId, EntityId, NodeId},
    payload::{MixDecryptOnlinePayload, MixnetPayload},
    state::MixnetState,
    status::{BallotBoxStatus, Hop, MixingStatus, OnlineStatus, StatusRecord},
};
use crate::store::{BallotBoxSource, MixnetRepository, Persisted};

mod initial;

pub use initial::{build_initial_payload, MIN_CIPHERTEXTS};

pub const ALREADY_STARTED: &str = "Ballot box mixing has already started";

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of a request to start mixing a ballot box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// A new run was started, or an empty ballot box was marked MIXED.
    Started(BallotBoxStatus),
    /// The ballot box is already mixed; nothing was restarted.
    AlreadyMixed(BallotBoxStatus),
    /// A run is in progress.
    Busy(BallotBoxStatus),
}

impl Admission {
    pub fn status(&self) -> &BallotBoxStatus {
        match self {
            Self::Started(status) | Self::AlreadyMixed(status) | Self::Busy(status) => status,
        }
    }

    pub fn into_status(self) -> BallotBoxStatus {
        match self {
            Self::Started(status) | Self::AlreadyMixed(status) | Self::Busy(status) => status,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}

pub struct Orchestrator {
    tenant_id: String,
    node_count: NodeId,
    retry_count: u32,
    status_wait: Duration,
    repository: Arc<dyn MixnetRepository>,
    ballot_boxes: Arc<dyn BallotBoxSource>,
    broker: Arc<dyn Broker>,
    channels: ChannelNames,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant_id: impl Into<String>,
        node_count: NodeId,
        retry_count: u32,
        status_wait: Duration,
        repository: Arc<dyn MixnetRepository>,
        ballot_boxes: Arc<dyn BallotBoxSource>,
        broker: Arc<dyn Broker>,
        channels: ChannelNames,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            node_count,
            retry_count,
            status_wait,
            repository,
            ballot_boxes,
            broker,
            channels,
        }
    }

    pub fn node_count(&self) -> NodeId {
        self.node_count
    }

    /// The full id of a ballot box of this tenant.
    pub fn ballot_box(&self, election_event_id: EntityId, ballot_box_id: EntityId) -> BallotBoxId {
        BallotBoxId::new(&self.tenant_id, election_event_id, ballot_box_id)
    }

    /// Start mixing `id` unless it is already mixed or being mixed.
    pub async fn start(&self, id: &BallotBoxId) -> Result<Admission> {
        if let Some(admission) = self.refuse(id).await? {
            return Ok(admission);
        }

        let context = self
            .ballot_boxes
            .ballot_box(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("ballot box {id}")))?;
        let previous = self.repository.find_status(id).await?;

        let correlation_id = uuid::Uuid::new_v4().to_string();
        let record = StatusRecord::new(id, correlation_id.clone(), MixingStatus::Processing)
            .with_in_flight(Hop::new(1, self.retry_count));
        if !self.repository.claim(record).await? {
            debug!("Lost the race to start mixing {id}");
            return Ok(self
                .refuse(id)
                .await?
                .unwrap_or_else(|| Admission::Busy(BallotBoxStatus::new(id, MixingStatus::Processing, None))));
        }
        info!("Started mixing {id} [correlationId: {correlation_id}]");

        let restart = previous.map_or(false, |p| p.status == MixingStatus::Error);
        match self.dispatch(id, &context, &correlation_id, restart).await {
            Ok(status) => Ok(Admission::Started(status)),
            Err(e) => {
                error!("Failed to start mixing {id}: {e}");
                // The claim is ours, so nobody else can release it.
                if let Err(marking) = self
                    .repository
                    .update_status(id, &correlation_id, MixingStatus::Error, Some(e.to_string()))
                    .await
                {
                    error!("Failed to mark {id} as ERROR: {marking}");
                }
                Err(e)
            }
        }
    }

    /// Build the initial payload of a claimed run and send it to node 1.
    async fn dispatch(
        &self,
        id: &BallotBoxId,
        context: &BallotBoxContext,
        correlation_id: &str,
        restart: bool,
    ) -> Result<BallotBoxStatus> {
        if restart {
            info!("Discarding node outputs of the failed run of {id}");
            self.repository.delete_shuffle_payloads(id).await?;
        }

        let votes = self.ballot_boxes.confirmed_votes(id).await?;
        if votes.is_empty() {
            info!("No confirmed votes in {id}, nothing to mix");
            self.repository
                .update_status(id, correlation_id, MixingStatus::Mixed, None)
                .await?;
            return Ok(BallotBoxStatus::new(id, MixingStatus::Mixed, None));
        }
        info!("Mixing {} confirmed votes of {id}", votes.len());

        let initial = build_initial_payload(context, votes);
        if self.repository.save_initial_payload(id, &initial).await? == Persisted::Duplicate {
            warn!("Initial payload of {id} was already persisted");
        }

        let state = MixnetState::new(MixnetPayload::Initial(initial), self.retry_count);
        self.send(correlation_id, &state).await?;
        Ok(BallotBoxStatus::new(id, MixingStatus::Processing, None))
    }

    /// The admission for a ballot box that must not be started, if any.
    async fn refuse(&self, id: &BallotBoxId) -> Result<Option<Admission>> {
        let current = self.repository.find_status(id).await?;
        Ok(match current.map(|record| record.status) {
            Some(MixingStatus::Mixed) => {
                warn!("{ALREADY_STARTED}. {id}");
                Some(Admission::AlreadyMixed(BallotBoxStatus::new(
                    id,
                    MixingStatus::Error,
                    Some(ALREADY_STARTED.to_string()),
                )))
            }
            Some(MixingStatus::Processing) => Some(Admission::Busy(BallotBoxStatus::new(
                id,
                MixingStatus::Processing,
                None,
            ))),
            _ => None,
        })
    }

    /// Start every ballot box of a batch, reporting one status per ballot box.
    pub async fn process_ballot_boxes(&self, ids: &[BallotBoxId]) -> Vec<BallotBoxStatus> {
        let mut statuses = Vec::with_capacity(ids.len());
        for id in ids {
            let status = match self.start(id).await {
                Ok(admission) => admission.into_status(),
                Err(Error::NotFound(_)) => BallotBoxStatus::not_found(id),
                Err(e) => {
                    error!("Failed to start mixing {id}: {e}");
                    BallotBoxStatus::new(id, MixingStatus::Error, Some(e.to_string()))
                }
            };
            statuses.push(status);
        }
        statuses
    }

    async fn send(&self, correlation_id: &str, state: &MixnetState) -> Result<()> {
        let channel = self.channels.request(state.node_to_visit);
        debug!("Sending state to {channel} [correlationId: {correlation_id}]");
        self.broker
            .publish(
                &channel,
                Message {
                    correlation_id: correlation_id.to_string(),
                    body: state.to_message_bytes()?,
                },
            )
            .await
    }

    /// Handle a state token a node sent back.
    pub async fn on_node_response(&self, message: Message) -> Result<()> {
        let state = MixnetState::from_message_bytes(&message.body)?;
        let (ee, bb) = match (state.payload.election_event_id(), state.payload.ballot_box_id()) {
            (Some(ee), Some(bb)) => (ee.clone(), bb.clone()),
            _ => {
                error!(
                    "Dropping response without ballot box ids [correlationId: {}]",
                    message.correlation_id
                );
                return Ok(());
            }
        };
        let id = self.ballot_box(ee, bb);

        let current = match self.repository.find_status(&id).await? {
            Some(record) => record,
            None => {
                warn!("Dropping response for unknown ballot box {id}");
                return Ok(());
            }
        };
        if current.correlation_id != message.correlation_id {
            info!(
                "Dropping response of an earlier run of {id} [correlationId: {}]",
                message.correlation_id
            );
            return Ok(());
        }
        if current.status != MixingStatus::Processing {
            debug!("Dropping late response for {id}, status is {:?}", current.status);
            return Ok(());
        }
        let Some(sent) = current.in_flight else {
            warn!("Dropping response for {id}, no token is in flight");
            return Ok(());
        };

        let answers_sent = match &state.mixnet_error {
            // A fatal answer comes back without retries.
            Some(_) => {
                state.node_to_visit == sent.node_to_visit
                    && (state.retry_count == sent.retry_count || state.retry_count == 0)
            }
            None => {
                sent.node_to_visit.checked_add(1) == Some(state.node_to_visit) && state.retry_count == sent.retry_count
            }
        };
        if !answers_sent {
            debug!(
                "Dropping response for {id} with nodeToVisit {} and retryCount {}, waiting on {sent:?}",
                state.node_to_visit, state.retry_count
            );
            return Ok(());
        }

        match &state.mixnet_error {
            Some(reason) => self.handle_failure(&id, &message.correlation_id, sent, state.clone(), reason).await,
            None => self.handle_success(&id, &message.correlation_id, sent, &state).await,
        }
    }

    async fn handle_failure(
        &self,
        id: &BallotBoxId,
        correlation_id: &str,
        sent: Hop,
        mut state: MixnetState,
        reason: &str,
    ) -> Result<()> {
        if state.retry_count == 0 || sent.retry_count == 0 {
            if self
                .repository
                .advance(id, correlation_id, sent, None, MixingStatus::Error, Some(reason.to_string()))
                .await?
            {
                error!("Mixing {id} failed at node {}: {reason}", sent.node_to_visit);
            }
            return Ok(());
        }

        let retry = Hop::new(sent.node_to_visit, sent.retry_count - 1);
        if !self
            .repository
            .advance(id, correlation_id, sent, Some(retry), MixingStatus::Processing, Some(reason.to_string()))
            .await?
        {
            debug!("Failure of node {} on {id} was already handled", sent.node_to_visit);
            return Ok(());
        }
        warn!(
            "Node {} failed on {id}: {reason}. Retrying, {} retries left",
            retry.node_to_visit, retry.retry_count
        );

        state.retry_count = retry.retry_count;
        state.mixnet_error = None;
        if let Err(e) = self.send(correlation_id, &state).await {
            error!("Failed to resend {id} to node {}: {e}", retry.node_to_visit);
            self.repository
                .update_status(id, correlation_id, MixingStatus::Error, Some(e.to_string()))
                .await?;
        }
        Ok(())
    }

    async fn handle_success(&self, id: &BallotBoxId, correlation_id: &str, sent: Hop, state: &MixnetState) -> Result<()> {
        let visited = sent.node_to_visit;
        let payload = match &state.payload {
            MixnetPayload::Shuffle(payload) if payload.node_id == Some(visited) => payload,
            MixnetPayload::Shuffle(payload) => {
                let reason = format!("node {visited} answered with the payload of node {:?}", payload.node_id);
                return self.fail(id, correlation_id, sent, reason).await;
            }
            MixnetPayload::Initial(_) => {
                return self
                    .fail(id, correlation_id, sent, "node answered without a shuffle payload".to_string())
                    .await;
            }
        };
        info!("Node {visited} mixed {id}");

        if self.repository.save_shuffle_payload(id, payload).await? == Persisted::Duplicate {
            warn!("Shuffle payload of node {visited} for {id} was already persisted");
        }

        if state.node_to_visit > self.node_count {
            if self
                .repository
                .advance(id, correlation_id, sent, None, MixingStatus::Mixed, None)
                .await?
            {
                info!("Online mixing of {id} is complete");
            }
            return Ok(());
        }

        let next = Hop::new(state.node_to_visit, state.retry_count);
        if !self
            .repository
            .advance(id, correlation_id, sent, Some(next), MixingStatus::Processing, None)
            .await?
        {
            debug!("Output of node {visited} for {id} was already forwarded");
            return Ok(());
        }
        if let Err(e) = self.send(correlation_id, state).await {
            error!("Failed to forward {id} to node {}: {e}", state.node_to_visit);
            self.repository
                .update_status(id, correlation_id, MixingStatus::Error, Some(e.to_string()))
                .await?;
        }
        Ok(())
    }

    /// End the run waiting on `sent` with ERROR.
    async fn fail(&self, id: &BallotBoxId, correlation_id: &str, sent: Hop, reason: String) -> Result<()> {
        error!("Mixing {id} failed: {reason}");
        self.repository
            .advance(id, correlation_id, sent, None, MixingStatus::Error, Some(reason))
            .await?;
        Ok(())
    }

    pub async fn status(&self, id: &BallotBoxId) -> Result<BallotBoxStatus> {
        Ok(self
            .repository
            .find_status(id)
            .await?
            .map_or_else(|| BallotBoxStatus::not_found(id), |record| record.to_status()))
    }

    pub async fn online_status(&self, id: &BallotBoxId) -> Result<OnlineStatus> {
        Ok(self.status(id).await?.status.into())
    }

    /// Everything the online nodes produced, once the ballot box is mixed.
    pub async fn download(&self, id: &BallotBoxId) -> Result<MixDecryptOnlinePayload> {
        let status = self.status(id).await?;
        if status.status != MixingStatus::Mixed {
            return Err(Error::not_found(format!("mixed ballot box {id}")));
        }
        let initial_payload = self.repository.find_initial_payload(id).await?;
        let shuffle_payloads = self.repository.find_shuffle_payloads(id).await?;
        if initial_payload.is_some() && shuffle_payloads.len() != self.node_count as usize {
            error!(
                "{id} is MIXED but has {} of {} shuffle payloads",
                shuffle_payloads.len(),
                self.node_count
            );
            return Err(Error::not_found(format!("complete shuffle payloads of {id}")));
        }
        Ok(MixDecryptOnlinePayload {
            election_event_id: id.election_event_id().clone(),
            ballot_box_id: id.ballot_box_id().clone(),
            initial_payload,
            shuffle_payloads,
        })
    }

    /// Poll until the ballot box is MIXED or ERROR, or the configured wait elapses.
    pub async fn wait_for_terminal(&self, id: &BallotBoxId) -> Result<BallotBoxStatus> {
        let deadline = Instant::now() + self.status_wait;
        loop {
            let status = self.status(id).await?;
            if matches!(status.status, MixingStatus::Mixed | MixingStatus::Error) || Instant::now() >= deadline {
                return Ok(status);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Consume one node's response channel until it closes.
    pub async fn run(self: Arc<Self>, mut responses: UnboundedReceiver<Message>) {
        while let Some(message) = responses.recv().await {
            let orchestrator = self.clone();
            tokio::spawn(async move {
                if let Err(e) = orchestrator.on_node_response(message).await {
                    error!("Failed to handle a node response: {e}");
                }
            });
        }
    }
}
