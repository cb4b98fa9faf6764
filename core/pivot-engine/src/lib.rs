//! FILENAME: core/pivot-engine/src/lib.rs
//! Pivot aggregation engine.
//!
//! Groups schema-less rows by row and column dimensions and sums a numeric
//! field per cell. Data is reached through the `DataSource` contract, so the
//! same engine runs over in-memory rows or a background query backend.
//!
//! Layers:
//! - `definition`: Serializable configuration (what the pivot table IS)
//! - `record`: Rows, field values and the schema resolved from them
//! - `source`: Data access contract and the in-memory strategy
//! - `view`: Renderable output for the caller (WHAT we display)
//! - `engine`: Calculation engine (HOW we calculate)

pub mod logging;
pub mod error;
pub mod definition;
pub mod record;
pub mod format;
pub mod source;
pub mod view;
pub mod engine;


pub use definition::*;
pub use record::*;
pub use source::*;
pub use view::*;
pub use error::{BackendError, ConfigurationError, InitializationError, SourceError};
pub use format::format_value;
pub use engine::{ColumnCombination, PivotTable};
