//! GEP Metadata
//!
//! The publisher's metadata catalog and the machinery that reads it:
//! - A small tabular model ([`DataSet`], [`DataTable`], [`DataRow`]) with typed cells
//! - Metadata and active-measurement schemas ([`schema`])
//! - Typed device/measurement/phasor records and the catalog built from them ([`records`])
//! - The filter-expression engine used for subscriptions and metadata refresh ([`filter`])
//! - XML serialization of a catalog ([`xml`])
//! - The flattened active-measurements view ([`active`])

pub mod active;
pub mod error;
pub mod filter;
pub mod records;
pub mod schema;
pub mod table;
pub mod value;
pub mod xml;

pub use active::build_active_measurements;
pub use error::{FilterError, MetadataError, Result};
pub use filter::{ExpressionEngine, FilterEvaluator, TableSelection};
pub use records::{
    DeviceMetadata, MeasurementMetadata, PhasorMetadata, SignalKind, SignalReference,
};
pub use table::{DataColumn, DataRow, DataSet, DataTable};
pub use value::{DataType, Value};
