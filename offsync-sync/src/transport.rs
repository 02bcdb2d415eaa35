//! Transport layer abstraction.
//!
//! The engine talks to the reconciliation endpoint through [`SyncTransport`]
//! so it can run against HTTP, an in-process server, or a scripted mock.

use crate::error::TransportError;
use async_trait::async_trait;
use offsync_types::{ChangeSet, HybridTimestamp, Operation, OwnerId, SubmitResponse};

/// Connection to the remote reconciliation endpoint.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Submits one operation and returns the endpoint's answer. A conflict is
    /// a successful answer, not an error.
    async fn submit_operation(&self, op: &Operation) -> Result<SubmitResponse, TransportError>;

    /// Fetches records of `owner_id` changed after `since` (everything when
    /// `None`).
    async fn fetch_changes(
        &self,
        owner_id: &OwnerId,
        since: Option<HybridTimestamp>,
    ) -> Result<ChangeSet, TransportError>;

    /// Lightweight liveness check.
    async fn probe(&self) -> Result<(), TransportError>;
}

/// A scripted transport for testing.
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex, MutexGuard};
    use std::time::Duration;

    type SubmitHandler =
        dyn Fn(&Operation) -> Result<SubmitResponse, TransportError> + Send + Sync;

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// In-process transport with programmable answers.
    ///
    /// Without a handler every submission is applied: the returned record
    /// carries `base_version + 1` and the operation payload. Probes succeed
    /// unless [`set_probe`](Self::set_probe) says otherwise.
    #[derive(Clone, Default)]
    pub struct MockTransport {
        handler: Arc<Mutex<Option<Arc<SubmitHandler>>>>,
        scripted: Arc<Mutex<VecDeque<Result<SubmitResponse, TransportError>>>>,
        dispatched: Arc<Mutex<Vec<Operation>>>,
        changes: Arc<Mutex<VecDeque<Result<ChangeSet, TransportError>>>>,
        fetches: Arc<Mutex<Vec<Option<HybridTimestamp>>>>,
        probe_result: Arc<Mutex<Option<TransportError>>>,
        probe_delay: Arc<Mutex<Option<Duration>>>,
        submit_delay: Arc<Mutex<Option<Duration>>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Answers every submission with `handler` (after the scripted queue
        /// is drained).
        pub fn set_handler<F>(&self, handler: F)
        where
            F: Fn(&Operation) -> Result<SubmitResponse, TransportError> + Send + Sync + 'static,
        {
            *lock(&self.handler) = Some(Arc::new(handler));
        }

        /// Queues a one-shot answer for the next submission.
        pub fn push_response(&self, response: Result<SubmitResponse, TransportError>) {
            lock(&self.scripted).push_back(response);
        }

        /// Queues a one-shot answer for the next fetch.
        pub fn push_changes(&self, changes: Result<ChangeSet, TransportError>) {
            lock(&self.changes).push_back(changes);
        }

        /// Makes probes fail with `error`, or succeed with `None`.
        pub fn set_probe(&self, error: Option<TransportError>) {
            *lock(&self.probe_result) = error;
        }

        /// Delays every probe answer.
        pub fn set_probe_delay(&self, delay: Option<Duration>) {
            *lock(&self.probe_delay) = delay;
        }

        /// Delays every submission answer.
        pub fn set_submit_delay(&self, delay: Option<Duration>) {
            *lock(&self.submit_delay) = delay;
        }

        /// Operations submitted so far, in dispatch order.
        pub fn dispatched(&self) -> Vec<Operation> {
            lock(&self.dispatched).clone()
        }

        /// Checkpoints passed to `fetch_changes`, in call order.
        pub fn fetches(&self) -> Vec<Option<HybridTimestamp>> {
            lock(&self.fetches).clone()
        }

        fn default_answer(op: &Operation) -> SubmitResponse {
            match op.kind {
                offsync_types::OperationKind::Delete => SubmitResponse::Deleted {
                    entity_id: op.entity_id,
                },
                _ => {
                    let mut record = offsync_types::Record::new(
                        op.entity_id,
                        op.entity_type.clone(),
                        op.owner_id,
                        op.payload.clone(),
                        op.origin_timestamp.tick(),
                    );
                    record.version = op.base_version + 1;
                    record.last_synced_at = Some(record.updated_at);
                    SubmitResponse::Applied { record }
                }
            }
        }
    }

    #[async_trait]
    impl SyncTransport for MockTransport {
        async fn submit_operation(
            &self,
            op: &Operation,
        ) -> Result<SubmitResponse, TransportError> {
            lock(&self.dispatched).push(op.clone());
            let delay = *lock(&self.submit_delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let scripted = lock(&self.scripted).pop_front();
            if let Some(scripted) = scripted {
                return scripted;
            }
            let handler = lock(&self.handler).clone();
            match handler {
                Some(handler) => handler(op),
                None => Ok(Self::default_answer(op)),
            }
        }

        async fn fetch_changes(
            &self,
            _owner_id: &OwnerId,
            since: Option<HybridTimestamp>,
        ) -> Result<ChangeSet, TransportError> {
            lock(&self.fetches).push(since);
            lock(&self.changes).pop_front().unwrap_or_else(|| {
                Ok(ChangeSet {
                    checkpoint: since.unwrap_or(HybridTimestamp::ZERO),
                    ..ChangeSet::default()
                })
            })
        }

        async fn probe(&self) -> Result<(), TransportError> {
            let delay = *lock(&self.probe_delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let result = lock(&self.probe_result).clone();
            match result {
                Some(error) => Err(error),
                None => Ok(()),
            }
        }
    }
}
