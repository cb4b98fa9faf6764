//! FILENAME: core/query-backend/src/worker.rs
//! Background worker thread owning the SQLite connection.
//!
//! Requests are handled strictly in arrival order. Every request gets exactly
//! one response carrying its id.

use std::thread::JoinHandle;
use tokio::sync::mpsc;
use uuid::Uuid;
use pivot_engine::{log_debug, log_info, log_warn};
use crate::config::BackendConfig;
use crate::protocol::{Request, RequestEnvelope, Response, ResponseEnvelope};
use crate::store::{DocumentStore, StoreError};

struct Worker {
    session: Uuid,
    config: BackendConfig,
    store: Option<DocumentStore>,
}

/// Start the worker on its own named thread.
pub fn spawn_worker(
    session: Uuid,
    config: BackendConfig,
    requests: mpsc::Receiver<RequestEnvelope>,
    responses: mpsc::UnboundedSender<ResponseEnvelope>,
) -> std::io::Result<JoinHandle<()>> {
    let name = format!("pivot-backend-{}", session.simple());
    std::thread::Builder::new().name(name).spawn(move || {
        let worker = Worker {
            session,
            config,
            store: None,
        };
        worker.run(requests, responses);
    })
}

impl Worker {
    fn run(
        mut self,
        mut requests: mpsc::Receiver<RequestEnvelope>,
        responses: mpsc::UnboundedSender<ResponseEnvelope>,
    ) {
        log_info!("WORKER", "[{}] started", self.session);

        while let Some(envelope) = requests.blocking_recv() {
            let id = envelope.id;
            let operation = envelope.request.operation();
            log_debug!("WORKER", "[{}] #{} {}", self.session, id, operation);

            let response = match self.handle(envelope.request) {
                Ok(response) => response,
                Err(e) => {
                    log_warn!("WORKER", "[{}] #{} {} failed: {}", self.session, id, operation, e);
                    Response::Error { error: e.to_string() }
                }
            };

            if responses.send(ResponseEnvelope { id, response }).is_err() {
                break;
            }
        }

        log_info!("WORKER", "[{}] stopped", self.session);
    }

    fn store(&self) -> Result<&DocumentStore, StoreError> {
        self.store.as_ref().ok_or(StoreError::NotInitialized)
    }

    fn handle(&mut self, request: Request) -> Result<Response, StoreError> {
        match request {
            Request::Init => {
                if self.store.is_none() {
                    self.store = Some(DocumentStore::open(&self.config)?);
                }
                Ok(Response::InitComplete)
            }
            Request::LoadData { rows } => {
                let store = self.store.as_mut().ok_or(StoreError::NotInitialized)?;
                let count = store.load(rows)?;
                log_info!("WORKER", "[{}] loaded {} rows", self.session, count);
                Ok(Response::LoadComplete { rows: count })
            }
            Request::QueryData { filters, dimensions } => {
                let rows = self.store()?.query_rows(&filters, dimensions.as_deref())?;
                Ok(Response::QueryComplete { rows })
            }
            Request::GetDimensionValues { dimension, selection } => {
                let values = self.store()?.distinct_values(&dimension, &selection)?;
                Ok(Response::DimensionValuesComplete { dimension, values })
            }
            Request::CalculateValues(request) => {
                let aggregate = self.store()?.aggregate(&request)?;
                Ok(Response::CalculateValuesComplete {
                    values: aggregate.values,
                    total: aggregate.total,
                })
            }
        }
    }
}
