//! Typed metadata records and the catalog built from them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

use crate::{schema, DataSet, MetadataError, Result, Value};

/// Kind of signal a measurement carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Angle,
    Magnitude,
    Frequency,
    DfDt,
    Status,
    Digital,
    Analog,
    Calculation,
    Statistic,
    Alarm,
    Quality,
    #[default]
    Unknown,
}

impl SignalKind {
    /// Two-letter abbreviation used in signal references
    pub fn abbreviation(self) -> &'static str {
        match self {
            SignalKind::Angle => "PA",
            SignalKind::Magnitude => "PM",
            SignalKind::Frequency => "FQ",
            SignalKind::DfDt => "DF",
            SignalKind::Status => "SF",
            SignalKind::Digital => "DV",
            SignalKind::Analog => "AV",
            SignalKind::Calculation => "CV",
            SignalKind::Statistic => "ST",
            SignalKind::Alarm => "AL",
            SignalKind::Quality => "QF",
            SignalKind::Unknown => "??",
        }
    }

    pub fn from_abbreviation(abbreviation: &str) -> SignalKind {
        match abbreviation.to_ascii_uppercase().as_str() {
            "PA" => SignalKind::Angle,
            "PM" => SignalKind::Magnitude,
            "FQ" => SignalKind::Frequency,
            "DF" => SignalKind::DfDt,
            "SF" => SignalKind::Status,
            "DV" => SignalKind::Digital,
            "AV" => SignalKind::Analog,
            "CV" => SignalKind::Calculation,
            "ST" => SignalKind::Statistic,
            "AL" => SignalKind::Alarm,
            "QF" => SignalKind::Quality,
            _ => SignalKind::Unknown,
        }
    }

    /// Signal type acronym; phasor kinds depend on whether the phasor is a voltage
    pub fn signal_type_acronym(self, phasor_type: char) -> &'static str {
        let voltage = phasor_type.eq_ignore_ascii_case(&'V');

        match self {
            SignalKind::Angle if voltage => "VPHA",
            SignalKind::Angle => "IPHA",
            SignalKind::Magnitude if voltage => "VPHM",
            SignalKind::Magnitude => "IPHM",
            SignalKind::Frequency => "FREQ",
            SignalKind::DfDt => "DFDT",
            SignalKind::Status => "FLAG",
            SignalKind::Digital => "DIGI",
            SignalKind::Analog => "ALOG",
            SignalKind::Calculation => "CALC",
            SignalKind::Statistic => "STAT",
            SignalKind::Alarm => "ALRM",
            SignalKind::Quality => "QUAL",
            SignalKind::Unknown => "NULL",
        }
    }
}

/// Signal reference such as `SHELBY-PA1` or `SHELBY-FQ`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SignalReference {
    pub acronym: String,
    pub kind: SignalKind,
    /// One-based position for indexed kinds; zero when the kind is not indexed
    pub index: u16,
}

impl SignalReference {
    pub fn new(acronym: impl Into<String>, kind: SignalKind, index: u16) -> Self {
        Self {
            acronym: acronym.into(),
            kind,
            index,
        }
    }
}

impl fmt::Display for SignalReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.index > 0 {
            write!(f, "{}-{}{}", self.acronym, self.kind.abbreviation(), self.index)
        } else {
            write!(f, "{}-{}", self.acronym, self.kind.abbreviation())
        }
    }
}

impl FromStr for SignalReference {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || MetadataError::InvalidSignalReference(s.to_string());
        let (acronym, suffix) = s.trim().rsplit_once('-').ok_or_else(invalid)?;

        if acronym.is_empty() || suffix.len() < 2 || !suffix.is_char_boundary(2) {
            return Err(invalid());
        }

        let (abbreviation, index) = suffix.split_at(2);
        let index = if index.is_empty() {
            0
        } else {
            index.parse::<u16>().map_err(|_| invalid())?
        };

        Ok(Self {
            acronym: acronym.to_string(),
            kind: SignalKind::from_abbreviation(abbreviation),
            index,
        })
    }
}

impl TryFrom<String> for SignalReference {
    type Error = MetadataError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SignalReference> for String {
    fn from(value: SignalReference) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceMetadata {
    pub acronym: String,
    pub name: String,
    pub unique_id: Uuid,
    pub access_id: i32,
    pub parent_acronym: String,
    pub protocol_name: String,
    pub frames_per_second: i32,
    pub company_acronym: String,
    pub vendor_acronym: String,
    pub vendor_device_name: String,
    pub longitude: f64,
    pub latitude: f64,
    pub updated_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementMetadata {
    pub device_acronym: String,
    /// Measurement key, `SOURCE:number`
    pub id: String,
    pub signal_id: Uuid,
    pub point_tag: String,
    pub reference: SignalReference,
    pub phasor_source_index: i32,
    pub description: String,
    pub enabled: bool,
    pub updated_on: Option<DateTime<Utc>>,
}

impl Default for MeasurementMetadata {
    fn default() -> Self {
        Self {
            device_acronym: String::new(),
            id: String::new(),
            signal_id: Uuid::nil(),
            point_tag: String::new(),
            reference: SignalReference::default(),
            phasor_source_index: 0,
            description: String::new(),
            enabled: true,
            updated_on: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PhasorMetadata {
    pub device_acronym: String,
    pub label: String,
    /// `V` for voltage, `I` for current
    #[serde(rename = "type")]
    pub phasor_type: String,
    pub phase: String,
    pub source_index: i32,
    pub updated_on: Option<DateTime<Utc>>,
}

/// Build the metadata catalog from typed records
pub fn build_metadata(
    devices: &[DeviceMetadata],
    measurements: &[MeasurementMetadata],
    phasors: &[PhasorMetadata],
    node_id: Uuid,
    version: i32,
) -> Result<DataSet> {
    let mut dataset = schema::metadata_dataset();

    {
        let table = dataset
            .table_mut(schema::DEVICE_DETAIL)
            .ok_or_else(|| MetadataError::TableNotFound(schema::DEVICE_DETAIL.to_string()))?;
        let c = |name: &str| table.column_index(name);
        let (node, unique, concentrator, acronym, name, access) = (
            c("NodeID")?,
            c("UniqueID")?,
            c("IsConcentrator")?,
            c("Acronym")?,
            c("Name")?,
            c("AccessID")?,
        );
        let (parent, protocol, fps, company, vendor, vendor_device) = (
            c("ParentAcronym")?,
            c("ProtocolName")?,
            c("FramesPerSecond")?,
            c("CompanyAcronym")?,
            c("VendorAcronym")?,
            c("VendorDeviceName")?,
        );
        let (longitude, latitude, enabled, updated) =
            (c("Longitude")?, c("Latitude")?, c("Enabled")?, c("UpdatedOn")?);

        for device in devices {
            let mut row = table.create_row();
            row.set_value(node, node_id);
            row.set_value(unique, device.unique_id);
            row.set_value(concentrator, device.parent_acronym.is_empty());
            row.set_value(acronym, device.acronym.as_str());
            row.set_value(name, device.name.as_str());
            row.set_value(access, device.access_id);
            row.set_value(parent, device.parent_acronym.as_str());
            row.set_value(protocol, device.protocol_name.as_str());
            row.set_value(fps, device.frames_per_second);
            row.set_value(company, device.company_acronym.as_str());
            row.set_value(vendor, device.vendor_acronym.as_str());
            row.set_value(vendor_device, device.vendor_device_name.as_str());
            row.set_value(longitude, Value::Decimal(device.longitude));
            row.set_value(latitude, Value::Decimal(device.latitude));
            row.set_value(enabled, true);
            row.set_value(updated, device.updated_on);
            table.add_row(row);
        }
    }

    // Device acronym -> phasor source index -> phasor type, for signal type derivation
    let mut phasor_types: HashMap<&str, HashMap<i32, char>> = HashMap::new();

    {
        let table = dataset
            .table_mut(schema::PHASOR_DETAIL)
            .ok_or_else(|| MetadataError::TableNotFound(schema::PHASOR_DETAIL.to_string()))?;
        let c = |name: &str| table.column_index(name);
        let (id, device, label, kind, phase, source_index, updated) = (
            c("ID")?,
            c("DeviceAcronym")?,
            c("Label")?,
            c("Type")?,
            c("Phase")?,
            c("SourceIndex")?,
            c("UpdatedOn")?,
        );

        for (i, phasor) in phasors.iter().enumerate() {
            let mut row = table.create_row();
            row.set_value(id, i as i32);
            row.set_value(device, phasor.device_acronym.as_str());
            row.set_value(label, phasor.label.as_str());
            row.set_value(kind, phasor.phasor_type.as_str());
            row.set_value(phase, phasor.phase.as_str());
            row.set_value(source_index, phasor.source_index);
            row.set_value(updated, phasor.updated_on);
            table.add_row(row);

            let phasor_type = phasor
                .phasor_type
                .chars()
                .next()
                .map(|c| c.to_ascii_uppercase())
                .unwrap_or('I');

            phasor_types
                .entry(phasor.device_acronym.as_str())
                .or_default()
                .insert(phasor.source_index, phasor_type);
        }
    }

    {
        let table = dataset.table_mut(schema::MEASUREMENT_DETAIL).ok_or_else(|| {
            MetadataError::TableNotFound(schema::MEASUREMENT_DETAIL.to_string())
        })?;
        let c = |name: &str| table.column_index(name);
        let (device, id, signal_id, point_tag, reference, acronym) = (
            c("DeviceAcronym")?,
            c("ID")?,
            c("SignalID")?,
            c("PointTag")?,
            c("SignalReference")?,
            c("SignalAcronym")?,
        );
        let (source_index, description, internal, enabled, updated) = (
            c("PhasorSourceIndex")?,
            c("Description")?,
            c("Internal")?,
            c("Enabled")?,
            c("UpdatedOn")?,
        );

        for measurement in measurements {
            let phasor_type = phasor_types
                .get(measurement.device_acronym.as_str())
                .and_then(|types| types.get(&measurement.phasor_source_index))
                .copied()
                .unwrap_or('I');

            let mut row = table.create_row();
            row.set_value(device, measurement.device_acronym.as_str());
            row.set_value(id, measurement.id.as_str());
            row.set_value(signal_id, measurement.signal_id);
            row.set_value(point_tag, measurement.point_tag.as_str());
            row.set_value(reference, measurement.reference.to_string());
            row.set_value(
                acronym,
                measurement.reference.kind.signal_type_acronym(phasor_type),
            );
            row.set_value(source_index, measurement.phasor_source_index);
            row.set_value(description, measurement.description.as_str());
            row.set_value(internal, true);
            row.set_value(enabled, measurement.enabled);
            row.set_value(updated, measurement.updated_on);
            table.add_row(row);
        }
    }

    if let Some(table) = dataset.table_mut(schema::SCHEMA_VERSION) {
        let mut row = table.create_row();
        row.set_value(0, version);
        table.add_row(row);
    }

    debug!(
        devices = devices.len(),
        measurements = measurements.len(),
        phasors = phasors.len(),
        "built metadata catalog"
    );

    Ok(dataset)
}
