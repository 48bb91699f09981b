use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

use crate::error::Error;
use crate::model::command::{CommandRecord, RequestIdentity};
use crate::store::CommandStore;

#[derive(Debug, Error)]
pub enum ProcessError<E> {
    /// Same identity, different request bytes. Never reconciled automatically.
    #[error("Similar request previously treated but for different request payload: {0}")]
    Conflict(RequestIdentity),
    /// Another delivery of the same request holds the record and has not answered yet.
    #[error("Request {0} is currently being processed")]
    InProgress(RequestIdentity),
    #[error(transparent)]
    Store(#[from] Error),
    #[error("{0}")]
    Task(E),
}

/// Runs each logical request at most once and replays its recorded response.
#[derive(Clone)]
pub struct ExactlyOnceProcessor {
    store: Arc<dyn CommandStore>,
}

impl ExactlyOnceProcessor {
    pub fn new(store: Arc<dyn CommandStore>) -> Self {
        Self { store }
    }

    /// Process `request` under `identity`.
    ///
    /// The insert of the command record is the concurrency guard: whoever
    /// creates it runs `compute`, everybody else replays. If `compute` fails
    /// the record is removed again so that a later retry is not blocked.
    pub async fn process<F, Fut, E>(
        &self,
        identity: &RequestIdentity,
        request: &[u8],
        compute: F,
    ) -> Result<Vec<u8>, ProcessError<E>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Vec<u8>, E>> + Send,
    {
        if let Some(existing) = self.store.find_command(identity).await? {
            return replay(identity, request, existing);
        }

        let record = CommandRecord::new(identity.clone(), request.to_vec());
        if !self.store.insert_command(record).await? {
            debug!("Lost the race to create command {identity}");
            return match self.store.find_command(identity).await? {
                Some(existing) => replay(identity, request, existing),
                None => Err(ProcessError::InProgress(identity.clone())),
            };
        }

        match compute().await {
            Ok(response) => {
                if let Err(e) = self.store.save_response(identity, &response).await {
                    self.discard(identity).await;
                    return Err(e.into());
                }
                trace!("Recorded response of command {identity}");
                Ok(response)
            }
            Err(e) => {
                self.discard(identity).await;
                Err(ProcessError::Task(e))
            }
        }
    }

    async fn discard(&self, identity: &RequestIdentity) {
        if let Err(e) = self.store.delete_command(identity).await {
            error!("Failed to remove command {identity} after a failed computation: {e}");
        }
    }
}

fn replay<E>(identity: &RequestIdentity, request: &[u8], existing: CommandRecord) -> Result<Vec<u8>, ProcessError<E>> {
    if existing.request_payload != request {
        error!("Similar request previously treated but for different request payload. {identity}");
        return Err(ProcessError::Conflict(identity.clone()));
    }
    match existing.response_payload {
        Some(response) => {
            info!("Replaying recorded response of command {identity}");
            Ok(response)
        }
        None => Err(ProcessError::InProgress(identity.clone())),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::store::MemStore;

    fn identity() -> RequestIdentity {
        RequestIdentity::new("corr", "ee-bb", "MIXING_TALLY_MIX_DEC_ONLINE", 1)
    }

    fn setup() -> (Arc<MemStore>, ExactlyOnceProcessor) {
        let store = Arc::new(MemStore::new());
        let processor = ExactlyOnceProcessor::new(store.clone());
        (store, processor)
    }

    #[rocket::async_test]
    async fn repeated_requests_compute_once() {
        let (store, processor) = setup();
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        let mut responses = Vec::new();
        for _ in 0..5 {
            let response = processor
                .process(&identity(), b"request", move || async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(format!("response {n}").into_bytes())
                })
                .await
                .unwrap();
            responses.push(response);
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(responses.iter().all(|r| r == b"response 0"));
        assert_eq!(store.command_count(), 1);
    }

    #[rocket::async_test]
    async fn different_request_bytes_conflict() {
        for (first, second) in [(&b"a"[..], &b"b"[..]), (&b"b"[..], &b"a"[..])] {
            let (_store, processor) = setup();
            processor
                .process(&identity(), first, || async { Ok::<_, String>(b"ok".to_vec()) })
                .await
                .unwrap();
            let result = processor
                .process(&identity(), second, || async { Err::<Vec<u8>, _>("recomputed") })
                .await;
            assert!(matches!(result, Err(ProcessError::Conflict(_))));
        }
    }

    #[rocket::async_test]
    async fn failed_computation_can_be_retried() {
        let (store, processor) = setup();
        let result = processor
            .process(&identity(), b"request", || async { Err::<Vec<u8>, _>("engine rejected inputs") })
            .await;
        assert!(matches!(result, Err(ProcessError::Task("engine rejected inputs"))));
        assert_eq!(store.command_count(), 0);

        let response = processor
            .process(&identity(), b"request", || async { Ok::<_, &str>(b"second try".to_vec()) })
            .await
            .unwrap();
        assert_eq!(response, b"second try");
    }

    #[rocket::async_test]
    async fn unanswered_record_reports_in_progress() {
        let (store, processor) = setup();
        store
            .insert_command(CommandRecord::new(identity(), b"request".to_vec()))
            .await
            .unwrap();
        let result = processor
            .process(&identity(), b"request", || async { Ok::<_, String>(Vec::new()) })
            .await;
        assert!(matches!(result, Err(ProcessError::InProgress(_))));
    }

    #[rocket::async_test]
    async fn identities_differing_in_node_are_independent() {
        let (store, processor) = setup();
        let mut other = identity();
        other.node_id = 2;
        processor
            .process(&identity(), b"x", || async { Ok::<_, String>(b"1".to_vec()) })
            .await
            .unwrap();
        let response = processor
            .process(&other, b"y", || async { Ok::<_, String>(b"2".to_vec()) })
            .await
            .unwrap();
        assert_eq!(response, b"2");
        assert_eq!(store.command_count(), 2);
    }
}
