//! Configuration file

use gep_metadata::{DeviceMetadata, MeasurementMetadata, PhasorMetadata};
use gep_publisher::PublisherConfig;
use serde::Deserialize;
use std::path::Path;

/// Contents of a publisher TOML file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub publisher: PublisherConfig,
    pub metadata_version: i32,
    pub devices: Vec<DeviceMetadata>,
    pub measurements: Vec<MeasurementMetadata>,
    pub phasors: Vec<PhasorMetadata>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn has_metadata(&self) -> bool {
        !(self.devices.is_empty() && self.measurements.is_empty() && self.phasors.is_empty())
    }
}
