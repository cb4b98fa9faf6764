//! FILENAME: core/query-backend/src/protocol.rs
//! Bridge messages between the data source and the backend worker.
//!
//! Requests travel as `{id, type, payload}`, responses as `{id, type, ...}`.
//! The id is a per-bridge monotonic counter; responses carry the id of the
//! request they answer, so several calls with the same tag can be in flight.

use serde::{Deserialize, Serialize};
use pivot_engine::{AggregateRequest, DataRow, Filters, GroupedValue, Selection};

pub type RequestId = u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Request {
    Init,
    LoadData {
        rows: Vec<DataRow>,
    },
    QueryData {
        #[serde(default)]
        filters: Filters,
        /// Projection. None returns whole rows.
        #[serde(default)]
        dimensions: Option<Vec<String>>,
    },
    GetDimensionValues {
        dimension: String,
        #[serde(default)]
        selection: Selection,
    },
    CalculateValues(AggregateRequest),
}

impl Request {
    pub fn operation(&self) -> &'static str {
        match self {
            Request::Init => "init",
            Request::LoadData { .. } => "load_data",
            Request::QueryData { .. } => "query_data",
            Request::GetDimensionValues { .. } => "get_dimension_values",
            Request::CalculateValues(_) => "calculate_values",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: RequestId,
    #[serde(flatten)]
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    InitComplete,
    LoadComplete {
        rows: usize,
    },
    QueryComplete {
        rows: Vec<DataRow>,
    },
    DimensionValuesComplete {
        dimension: String,
        values: Vec<String>,
    },
    CalculateValuesComplete {
        values: Vec<GroupedValue>,
        total: f64,
    },
    Error {
        error: String,
    },
}

impl Response {
    pub fn tag(&self) -> &'static str {
        match self {
            Response::InitComplete => "init_complete",
            Response::LoadComplete { .. } => "load_complete",
            Response::QueryComplete { .. } => "query_complete",
            Response::DimensionValuesComplete { .. } => "dimension_values_complete",
            Response::CalculateValuesComplete { .. } => "calculate_values_complete",
            Response::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: RequestId,
    #[serde(flatten)]
    pub response: Response,
}
