//! FILENAME: core/query-backend/src/bridge.rs
//! Client side of the bridge protocol.
//!
//! Every call registers a one-shot slot under a fresh id before sending. A
//! dispatcher task routes each response to the slot with the same id. The
//! slot is removed when it resolves, when the call times out, or when the
//! caller drops the call future.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;
use pivot_engine::{
    log_debug, log_info, Aggregate, AggregateRequest, BackendError, DataRow, Filters,
    InitializationError, Selection,
};
use crate::config::BackendConfig;
use crate::protocol::{Request, RequestEnvelope, RequestId, Response, ResponseEnvelope};
use crate::worker::spawn_worker;

type PendingMap = Arc<Mutex<FxHashMap<RequestId, oneshot::Sender<Response>>>>;

fn lock_pending(pending: &PendingMap) -> MutexGuard<'_, FxHashMap<RequestId, oneshot::Sender<Response>>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

/// Removes the call's slot however the call ends.
struct PendingGuard<'a> {
    id: RequestId,
    pending: &'a PendingMap,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock_pending(self.pending).remove(&self.id);
    }
}

pub struct Bridge {
    session: Uuid,
    next_id: AtomicU64,
    requests: mpsc::Sender<RequestEnvelope>,
    pending: PendingMap,
    request_timeout: Option<Duration>,
}

impl Bridge {
    /// Start a worker thread and its dispatcher. Must run inside a tokio
    /// runtime.
    pub fn spawn(config: &BackendConfig, session: Uuid) -> Result<Self, InitializationError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| InitializationError::Unavailable(e.to_string()))?;

        let (request_tx, request_rx) = mpsc::channel(config.channel_capacity.max(1));
        let (response_tx, mut response_rx) = mpsc::unbounded_channel::<ResponseEnvelope>();

        spawn_worker(session, config.clone(), request_rx, response_tx)
            .map_err(|e| InitializationError::Unavailable(e.to_string()))?;

        let pending: PendingMap = Arc::new(Mutex::new(FxHashMap::default()));
        let routes = Arc::clone(&pending);
        runtime.spawn(async move {
            while let Some(envelope) = response_rx.recv().await {
                let slot = lock_pending(&routes).remove(&envelope.id);
                match slot {
                    Some(tx) => {
                        let _ = tx.send(envelope.response);
                    }
                    None => {
                        log_debug!(
                            "BRIDGE",
                            "[{}] dropping {} for abandoned request #{}",
                            session,
                            envelope.response.tag(),
                            envelope.id
                        );
                    }
                }
            }
            lock_pending(&routes).clear();
            log_debug!("BRIDGE", "[{}] dispatcher stopped", session);
        });

        log_info!("BRIDGE", "[{}] connected", session);
        Ok(Bridge {
            session,
            next_id: AtomicU64::new(0),
            requests: request_tx,
            pending,
            request_timeout: config.request_timeout(),
        })
    }

    pub fn session(&self) -> Uuid {
        self.session
    }

    /// Calls still waiting for a response.
    pub fn pending_count(&self) -> usize {
        lock_pending(&self.pending).len()
    }

    /// Send one request and wait for its response under the configured
    /// request timeout. Error responses become `BackendError::Fault`.
    pub async fn call(&self, request: Request) -> Result<Response, BackendError> {
        self.call_within(request, self.request_timeout).await
    }

    async fn call_within(&self, request: Request, limit: Option<Duration>) -> Result<Response, BackendError> {
        let operation = request.operation();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;

        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(id, tx);
        let _guard = PendingGuard {
            id,
            pending: &self.pending,
        };

        // One bound covers queueing behind a busy worker and the reply.
        let exchange = async {
            if self.requests.send(RequestEnvelope { id, request }).await.is_err() {
                return Err(BackendError::Disconnected);
            }
            rx.await.map_err(|_| BackendError::Disconnected)
        };

        let received = match limit {
            Some(timeout) => tokio::time::timeout(timeout, exchange)
                .await
                .map_err(|_| BackendError::TimedOut {
                    operation: operation.to_string(),
                    timeout,
                })?,
            None => exchange.await,
        };

        match received? {
            Response::Error { error } => Err(BackendError::Fault {
                operation: operation.to_string(),
                message: error,
            }),
            response => Ok(response),
        }
    }

    /// Bring up the store, bounded by `timeout`. Resolves exactly once.
    pub async fn init(&self, timeout: Duration) -> Result<(), InitializationError> {
        match self.call_within(Request::Init, Some(timeout)).await {
            Ok(Response::InitComplete) => Ok(()),
            Ok(other) => Err(InitializationError::Backend(format!(
                "unexpected '{}' response to init",
                other.tag()
            ))),
            Err(BackendError::TimedOut { .. }) => Err(InitializationError::TimedOut(timeout)),
            Err(BackendError::Fault { message, .. }) => Err(InitializationError::Backend(message)),
            Err(BackendError::Disconnected) => Err(InitializationError::Unavailable(
                "backend worker disconnected".to_string(),
            )),
            Err(e @ BackendError::UnexpectedResponse { .. }) => {
                Err(InitializationError::Backend(e.to_string()))
            }
        }
    }

    pub async fn load_data(&self, rows: Vec<DataRow>) -> Result<usize, BackendError> {
        match self.call(Request::LoadData { rows }).await? {
            Response::LoadComplete { rows } => Ok(rows),
            other => Err(unexpected("load_data", &other)),
        }
    }

    pub async fn query_data(
        &self,
        filters: Filters,
        dimensions: Option<Vec<String>>,
    ) -> Result<Vec<DataRow>, BackendError> {
        match self.call(Request::QueryData { filters, dimensions }).await? {
            Response::QueryComplete { rows } => Ok(rows),
            other => Err(unexpected("query_data", &other)),
        }
    }

    pub async fn get_dimension_values(
        &self,
        dimension: String,
        selection: Selection,
    ) -> Result<Vec<String>, BackendError> {
        match self
            .call(Request::GetDimensionValues { dimension, selection })
            .await?
        {
            Response::DimensionValuesComplete { values, .. } => Ok(values),
            other => Err(unexpected("get_dimension_values", &other)),
        }
    }

    pub async fn calculate_values(&self, request: AggregateRequest) -> Result<Aggregate, BackendError> {
        match self.call(Request::CalculateValues(request)).await? {
            Response::CalculateValuesComplete { values, total } => Ok(Aggregate { values, total }),
            other => Err(unexpected("calculate_values", &other)),
        }
    }
}

fn unexpected(operation: &str, response: &Response) -> BackendError {
    BackendError::UnexpectedResponse {
        operation: operation.to_string(),
        received: response.tag().to_string(),
    }
}
