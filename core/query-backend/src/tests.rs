//! FILENAME: core/query-backend/src/tests.rs
//! PURPOSE: Consolidated unit tests for the query-backend crate.

use std::path::PathBuf;
use std::time::Duration;
use serde_json::json;
use pivot_engine::{FieldValue, Selection};
use crate::config::{BackendConfig, ConfigError, MAX_BATCH_SIZE};
use crate::protocol::{Request, RequestEnvelope, Response, ResponseEnvelope};

// ========================================
// CONFIG
// ========================================

#[test]
fn test_config_defaults() {
    let config = BackendConfig::default();
    assert_eq!(config.init_timeout(), Duration::from_secs(10));
    assert_eq!(config.request_timeout(), None);
    assert_eq!(config.batch_size, 1000);
    assert_eq!(config.query_row_limit, None);
    assert_eq!(config.database_path, None);
    assert_eq!(config.channel_capacity, 64);
    assert_eq!(config.busy_timeout(), Duration::from_secs(5));
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_from_partial_json() {
    let config = BackendConfig::from_json_str(
        r#"{"batchSize": 250, "requestTimeoutMs": 1500, "databasePath": "/tmp/pivot.db"}"#,
    )
    .unwrap();
    assert_eq!(config.batch_size, 250);
    assert_eq!(config.request_timeout(), Some(Duration::from_millis(1500)));
    assert_eq!(config.database_path, Some(PathBuf::from("/tmp/pivot.db")));
    assert_eq!(config.init_timeout_ms, 10_000);
}

#[test]
fn test_config_rejects_invalid_values() {
    assert!(matches!(
        BackendConfig::from_json_str(r#"{"batchSize": 0}"#),
        Err(ConfigError::Invalid(_))
    ));
    assert!(matches!(
        BackendConfig::from_json_str(r#"{"initTimeoutMs": 0}"#),
        Err(ConfigError::Invalid(_))
    ));
    assert!(matches!(
        BackendConfig::from_json_str("{not json"),
        Err(ConfigError::Json(_))
    ));
}

#[test]
fn test_batch_size_is_bounded_by_sql_variable_limit() {
    let at_limit = format!(r#"{{"batchSize": {}}}"#, MAX_BATCH_SIZE);
    assert_eq!(BackendConfig::from_json_str(&at_limit).unwrap().batch_size, MAX_BATCH_SIZE);

    let over = format!(r#"{{"batchSize": {}}}"#, MAX_BATCH_SIZE + 1);
    assert!(matches!(
        BackendConfig::from_json_str(&over),
        Err(ConfigError::Invalid(_))
    ));

    let unchecked = BackendConfig {
        batch_size: 300_000,
        ..BackendConfig::default()
    };
    assert_eq!(unchecked.effective_batch_size(), MAX_BATCH_SIZE);
    assert_eq!(BackendConfig::default().effective_batch_size(), 1000);
}

// ========================================
// PROTOCOL
// ========================================

#[test]
fn test_request_envelope_shape() {
    let init = RequestEnvelope { id: 7, request: Request::Init };
    assert_eq!(serde_json::to_value(&init).unwrap(), json!({"id": 7, "type": "init"}));

    let lookup = RequestEnvelope {
        id: 3,
        request: Request::GetDimensionValues {
            dimension: "region".to_string(),
            selection: Selection::all().with_constraint("year", "2023"),
        },
    };
    let value = serde_json::to_value(&lookup).unwrap();
    assert_eq!(value["id"], json!(3));
    assert_eq!(value["type"], json!("get_dimension_values"));
    assert_eq!(value["payload"]["dimension"], json!("region"));
    assert_eq!(value["payload"]["selection"]["constraints"], json!([["year", "2023"]]));
}

#[test]
fn test_request_parses_host_json() {
    let envelope: RequestEnvelope = serde_json::from_value(json!({
        "id": 5,
        "type": "calculate_values",
        "payload": {
            "rowPath": ["A"],
            "rowDimensions": ["region"],
            "filters": {"year": ["2023"]},
            "tableConfig": {"id": "t1", "colDimensions": ["year"], "valueDimension": "amt"}
        }
    }))
    .unwrap();

    assert_eq!(envelope.id, 5);
    assert_eq!(envelope.request.operation(), "calculate_values");
    match envelope.request {
        Request::CalculateValues(request) => {
            assert_eq!(request.row_path, vec!["A".to_string()]);
            assert_eq!(request.table.value_dimension, "amt");
            assert!(request.table.show_column_total);
        }
        other => panic!("unexpected request {:?}", other),
    }
}

#[test]
fn test_load_request_carries_rows() {
    let envelope: RequestEnvelope = serde_json::from_value(json!({
        "id": 1,
        "type": "load_data",
        "payload": {"rows": [{"region": "A", "amt": "1,250"}]}
    }))
    .unwrap();
    match envelope.request {
        Request::LoadData { rows } => {
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].get("amt"), Some(&FieldValue::Text("1,250".to_string())));
        }
        other => panic!("unexpected request {:?}", other),
    }
}

#[test]
fn test_response_envelope_shape() {
    let loaded = ResponseEnvelope {
        id: 2,
        response: Response::LoadComplete { rows: 3 },
    };
    assert_eq!(
        serde_json::to_value(&loaded).unwrap(),
        json!({"id": 2, "type": "load_complete", "rows": 3})
    );

    let failed = ResponseEnvelope {
        id: 9,
        response: Response::Error { error: "boom".to_string() },
    };
    assert_eq!(
        serde_json::to_value(&failed).unwrap(),
        json!({"id": 9, "type": "error", "error": "boom"})
    );
}

#[test]
fn test_response_parses_grouped_values() {
    let envelope: ResponseEnvelope = serde_json::from_value(json!({
        "id": 4,
        "type": "calculate_values_complete",
        "values": [{"dimensions": ["2023"], "value": 15.0}],
        "total": 35
    }))
    .unwrap();
    assert_eq!(envelope.id, 4);
    assert_eq!(envelope.response.tag(), "calculate_values_complete");
    match envelope.response {
        Response::CalculateValuesComplete { values, total } => {
            assert_eq!(values[0].dimensions, vec!["2023".to_string()]);
            assert_eq!(values[0].value, 15.0);
            assert_eq!(total, 35.0);
        }
        other => panic!("unexpected response {:?}", other),
    }
}
