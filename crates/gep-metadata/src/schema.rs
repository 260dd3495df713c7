//! Catalog schemas
//!
//! The metadata catalog carries four tables (`DeviceDetail`, `MeasurementDetail`,
//! `PhasorDetail`, `SchemaVersion`); the active view carries one (`ActiveMeasurements`).

use crate::{DataSet, DataTable, DataType};

pub const DEVICE_DETAIL: &str = "DeviceDetail";
pub const MEASUREMENT_DETAIL: &str = "MeasurementDetail";
pub const PHASOR_DETAIL: &str = "PhasorDetail";
pub const SCHEMA_VERSION: &str = "SchemaVersion";
pub const ACTIVE_MEASUREMENTS: &str = "ActiveMeasurements";

/// Name of the data set element wrapping serialized metadata
pub const METADATA_DATASET_NAME: &str = "DataSet";

pub fn device_detail() -> DataTable {
    DataTable::new(DEVICE_DETAIL)
        .with_column("NodeID", DataType::Guid)
        .with_column("UniqueID", DataType::Guid)
        .with_column("OriginalSource", DataType::String)
        .with_column("IsConcentrator", DataType::Boolean)
        .with_column("Acronym", DataType::String)
        .with_column("Name", DataType::String)
        .with_column("AccessID", DataType::Int32)
        .with_column("ParentAcronym", DataType::String)
        .with_column("ProtocolName", DataType::String)
        .with_column("FramesPerSecond", DataType::Int32)
        .with_column("CompanyAcronym", DataType::String)
        .with_column("VendorAcronym", DataType::String)
        .with_column("VendorDeviceName", DataType::String)
        .with_column("Longitude", DataType::Decimal)
        .with_column("Latitude", DataType::Decimal)
        .with_column("Enabled", DataType::Boolean)
        .with_column("UpdatedOn", DataType::DateTime)
}

pub fn measurement_detail() -> DataTable {
    DataTable::new(MEASUREMENT_DETAIL)
        .with_column("DeviceAcronym", DataType::String)
        .with_column("ID", DataType::String)
        .with_column("SignalID", DataType::Guid)
        .with_column("PointTag", DataType::String)
        .with_column("SignalReference", DataType::String)
        .with_column("SignalAcronym", DataType::String)
        .with_column("PhasorSourceIndex", DataType::Int32)
        .with_column("Description", DataType::String)
        .with_column("Internal", DataType::Boolean)
        .with_column("Enabled", DataType::Boolean)
        .with_column("UpdatedOn", DataType::DateTime)
}

pub fn phasor_detail() -> DataTable {
    DataTable::new(PHASOR_DETAIL)
        .with_column("ID", DataType::Int32)
        .with_column("DeviceAcronym", DataType::String)
        .with_column("Label", DataType::String)
        .with_column("Type", DataType::String)
        .with_column("Phase", DataType::String)
        .with_column("SourceIndex", DataType::Int32)
        .with_column("UpdatedOn", DataType::DateTime)
}

pub fn schema_version() -> DataTable {
    DataTable::new(SCHEMA_VERSION).with_column("VersionNumber", DataType::Int32)
}

pub fn active_measurements() -> DataTable {
    DataTable::new(ACTIVE_MEASUREMENTS)
        .with_column("SourceNodeID", DataType::Guid)
        .with_column("ID", DataType::String)
        .with_column("SignalID", DataType::Guid)
        .with_column("PointTag", DataType::String)
        .with_column("SignalReference", DataType::String)
        .with_column("Internal", DataType::Boolean)
        .with_column("Subscribed", DataType::Boolean)
        .with_column("Device", DataType::String)
        .with_column("DeviceID", DataType::Int32)
        .with_column("FramesPerSecond", DataType::Int32)
        .with_column("Protocol", DataType::String)
        .with_column("ProtocolType", DataType::String)
        .with_column("SignalType", DataType::String)
        .with_column("EngineeringUnits", DataType::String)
        .with_column("PhasorID", DataType::Int32)
        .with_column("PhasorType", DataType::String)
        .with_column("Phase", DataType::String)
        .with_column("Adder", DataType::Double)
        .with_column("Multiplier", DataType::Double)
        .with_column("Company", DataType::String)
        .with_column("Longitude", DataType::Decimal)
        .with_column("Latitude", DataType::Decimal)
        .with_column("Description", DataType::String)
        .with_column("UpdatedOn", DataType::DateTime)
}

/// Empty metadata catalog with every metadata table defined
pub fn metadata_dataset() -> DataSet {
    let mut dataset = DataSet::new();
    dataset.add_or_update_table(device_detail());
    dataset.add_or_update_table(measurement_detail());
    dataset.add_or_update_table(phasor_detail());
    dataset.add_or_update_table(schema_version());
    dataset
}

/// Empty active-measurements view
pub fn active_dataset() -> DataSet {
    let mut dataset = DataSet::new();
    dataset.add_or_update_table(active_measurements());
    dataset
}
