//! FILENAME: core/query-backend/src/delegated.rs
//! Delegated data source: every call round-trips through the bridge.
//!
//! Lifecycle of a session:
//! - first use brings the backend up (worker + init + bulk load)
//! - callers arriving during bring-up await the same attempt
//! - a failed attempt is reported to all of them and retried on the next call
//! - reads hold the read side of the bridge lock for the whole round trip,
//!   bring-up and reload hold the write side
//! - the published dataset always matches what the store holds or will load

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{RwLock, RwLockReadGuard};
use uuid::Uuid;
use pivot_engine::error::Result;
use pivot_engine::{
    log_info, log_warn, Aggregate, AggregateRequest, BackendError, DataRow, DataSource, Dataset,
    DirectSource, Filters, InitializationError, Schema, Selection,
};
use crate::bridge::Bridge;
use crate::config::BackendConfig;

type InitFuture = Shared<BoxFuture<'static, std::result::Result<(), InitializationError>>>;

enum GateState {
    Idle,
    Pending(InitFuture),
    Ready,
}

/// A live bridge and the dataset its store currently holds.
struct Backend {
    bridge: Bridge,
    loaded: Arc<Dataset>,
}

struct Session {
    id: Uuid,
    config: BackendConfig,
    backend: RwLock<Option<Backend>>,
    dataset: Mutex<Arc<Dataset>>,
    gate: Mutex<GateState>,
    init_attempts: AtomicUsize,
}

impl Session {
    fn dataset(&self) -> Arc<Dataset> {
        Arc::clone(&self.dataset.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn publish(&self, dataset: Arc<Dataset>) {
        *self.dataset.lock().unwrap_or_else(|e| e.into_inner()) = dataset;
    }

    fn gate(&self) -> MutexGuard<'_, GateState> {
        self.gate.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn bring_up(self: Arc<Self>) -> std::result::Result<(), InitializationError> {
        let attempt = self.init_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        log_info!("SOURCE", "[{}] bringing up backend (attempt {})", self.id, attempt);

        let mut slot = self.backend.write().await;
        let bridge = Bridge::spawn(&self.config, self.id)?;
        bridge.init(self.config.init_timeout()).await?;

        let dataset = self.dataset();
        let count = bridge
            .load_data(dataset.rows().to_vec())
            .await
            .map_err(|e| InitializationError::Load(e.to_string()))?;

        log_info!("SOURCE", "[{}] backend ready with {} rows", self.id, count);
        *slot = Some(Backend {
            bridge,
            loaded: dataset,
        });
        Ok(())
    }
}

/// Data source backed by a background SQLite worker. Cloning shares the
/// session.
#[derive(Clone)]
pub struct DelegatedSource {
    session: Arc<Session>,
}

impl DelegatedSource {
    /// Lazy session: the backend comes up on first use.
    pub fn new(dataset: Arc<Dataset>, config: BackendConfig) -> Self {
        DelegatedSource {
            session: Arc::new(Session {
                id: Uuid::new_v4(),
                config,
                backend: RwLock::new(None),
                dataset: Mutex::new(dataset),
                gate: Mutex::new(GateState::Idle),
                init_attempts: AtomicUsize::new(0),
            }),
        }
    }

    /// Session brought up eagerly.
    pub async fn connect(
        dataset: Arc<Dataset>,
        config: BackendConfig,
    ) -> std::result::Result<Self, InitializationError> {
        let source = DelegatedSource::new(dataset, config);
        source.ensure_ready().await?;
        Ok(source)
    }

    pub fn session_id(&self) -> Uuid {
        self.session.id
    }

    /// Number of bring-up attempts started so far.
    pub fn init_attempts(&self) -> usize {
        self.session.init_attempts.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.session.gate(), GateState::Ready)
    }

    /// In-memory source over the same dataset.
    pub fn direct_fallback(&self) -> DirectSource {
        DirectSource::new(self.session.dataset())
    }

    /// Bring the backend up once. Concurrent callers share one attempt.
    pub async fn ensure_ready(&self) -> std::result::Result<(), InitializationError> {
        let attempt = {
            let mut gate = self.session.gate();
            match &*gate {
                GateState::Ready => return Ok(()),
                GateState::Pending(attempt) => attempt.clone(),
                GateState::Idle => {
                    let attempt = Arc::clone(&self.session).bring_up().boxed().shared();
                    *gate = GateState::Pending(attempt.clone());
                    attempt
                }
            }
        };

        let outcome = attempt.clone().await;

        let mut gate = self.session.gate();
        if let GateState::Pending(current) = &*gate {
            if current.ptr_eq(&attempt) {
                *gate = match outcome {
                    Ok(()) => GateState::Ready,
                    Err(_) => GateState::Idle,
                };
            }
        }
        if let Err(e) = &outcome {
            log_warn!("SOURCE", "[{}] backend bring-up failed: {}", self.session.id, e);
        }
        outcome
    }

    /// Replace the stored dataset. The new dataset becomes visible through
    /// `schema` and `direct_fallback` only once the store holds it.
    ///
    /// A load the worker rejects rolls back and keeps the previous dataset.
    /// A load that times out or loses the worker leaves the store in an
    /// unknown state, so the backend is dropped and rebuilt on next use.
    pub async fn reload(&self, dataset: Arc<Dataset>) -> Result<()> {
        {
            let mut slot = self.session.backend.write().await;
            let failure = match slot.as_mut() {
                // No store yet: the next bring-up loads what is published.
                None => None,
                Some(backend) if Arc::ptr_eq(&backend.loaded, &dataset) => None,
                Some(backend) => match backend.bridge.load_data(dataset.rows().to_vec()).await {
                    Ok(count) => {
                        backend.loaded = Arc::clone(&dataset);
                        log_info!("SOURCE", "[{}] reloaded {} rows", self.session.id, count);
                        None
                    }
                    Err(e) => Some(e),
                },
            };

            if let Some(e) = failure {
                log_warn!("SOURCE", "[{}] reload failed: {}", self.session.id, e);
                if !matches!(e, BackendError::Fault { .. }) {
                    *slot = None;
                    *self.session.gate() = GateState::Idle;
                }
                return Err(e.into());
            }
            self.session.publish(dataset);
        }

        self.ensure_ready().await?;
        Ok(())
    }

    async fn read_backend(&self) -> Result<RwLockReadGuard<'_, Option<Backend>>> {
        self.ensure_ready().await?;
        Ok(self.session.backend.read().await)
    }
}

fn connected(guard: &Option<Backend>) -> Result<&Bridge> {
    guard
        .as_ref()
        .map(|backend| &backend.bridge)
        .ok_or_else(|| InitializationError::Unavailable("backend not connected".to_string()).into())
}

impl DataSource for DelegatedSource {
    fn schema(&self) -> Arc<Schema> {
        Arc::clone(self.session.dataset().schema())
    }

    async fn filter_rows(&self, filters: &Filters) -> Result<Vec<DataRow>> {
        let guard = self.read_backend().await?;
        let bridge = connected(&guard)?;
        Ok(bridge.query_data(filters.clone(), None).await?)
    }

    async fn distinct_values(&self, dimension: &str, selection: &Selection) -> Result<Vec<String>> {
        let guard = self.read_backend().await?;
        let bridge = connected(&guard)?;
        Ok(bridge
            .get_dimension_values(dimension.to_string(), selection.clone())
            .await?)
    }

    async fn aggregate(&self, request: &AggregateRequest) -> Result<Aggregate> {
        let guard = self.read_backend().await?;
        let bridge = connected(&guard)?;
        Ok(bridge.calculate_values(request.clone()).await?)
    }
}

// ============================================================================
// STRATEGY SELECTION
// ============================================================================

/// Either strategy behind one concrete type.
#[derive(Clone)]
pub enum AnySource {
    Direct(DirectSource),
    Delegated(DelegatedSource),
}

impl AnySource {
    pub fn is_delegated(&self) -> bool {
        matches!(self, AnySource::Delegated(_))
    }
}

impl DataSource for AnySource {
    fn schema(&self) -> Arc<Schema> {
        match self {
            AnySource::Direct(source) => source.schema(),
            AnySource::Delegated(source) => source.schema(),
        }
    }

    async fn filter_rows(&self, filters: &Filters) -> Result<Vec<DataRow>> {
        match self {
            AnySource::Direct(source) => source.filter_rows(filters).await,
            AnySource::Delegated(source) => source.filter_rows(filters).await,
        }
    }

    async fn distinct_values(&self, dimension: &str, selection: &Selection) -> Result<Vec<String>> {
        match self {
            AnySource::Direct(source) => source.distinct_values(dimension, selection).await,
            AnySource::Delegated(source) => source.distinct_values(dimension, selection).await,
        }
    }

    async fn aggregate(&self, request: &AggregateRequest) -> Result<Aggregate> {
        match self {
            AnySource::Direct(source) => source.aggregate(request).await,
            AnySource::Delegated(source) => source.aggregate(request).await,
        }
    }
}

/// Delegated source when the backend comes up, otherwise the in-memory one.
pub async fn connect_or_fallback(dataset: Arc<Dataset>, config: BackendConfig) -> AnySource {
    match DelegatedSource::connect(Arc::clone(&dataset), config).await {
        Ok(source) => AnySource::Delegated(source),
        Err(e) => {
            log_warn!("SOURCE", "backend unavailable, using in-memory source: {}", e);
            AnySource::Direct(DirectSource::new(dataset))
        }
    }
}
