//! Active measurements view
//!
//! A flattened, per-node table joining every enabled measurement with its device and
//! phasor context. Clients filter against this table when subscribing.

use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::{schema, DataSet, MetadataError, Result, Value};

/// Frames per second assumed for measurements without a device
pub const DEFAULT_FRAMES_PER_SECOND: i32 = 30;

struct DeviceData {
    device_id: i32,
    frames_per_second: Option<i32>,
    company: Option<String>,
    protocol: Option<String>,
    protocol_type: &'static str,
    longitude: Value,
    latitude: Value,
}

struct PhasorData {
    phasor_id: Option<i32>,
    phasor_type: Option<String>,
    phase: Option<String>,
}

/// `Measurement` for point-style protocols, `Frame` for everything else
pub fn protocol_type(protocol: &str) -> &'static str {
    let upper = protocol.to_ascii_uppercase();
    if upper.is_empty()
        || upper.starts_with("GATEWAY")
        || upper.starts_with("MODBUS")
        || upper.starts_with("DNP")
    {
        "Measurement"
    } else {
        "Frame"
    }
}

pub fn engineering_units(signal_type: &str) -> &'static str {
    match signal_type.to_ascii_uppercase().as_str() {
        "IPHM" => "Amps",
        "VPHM" => "Volts",
        "FREQ" => "Hz",
        s if s.ends_with("PHA") => "Degrees",
        _ => "",
    }
}

/// Derive the active measurements view from a metadata catalog
pub fn build_active_measurements(metadata: &DataSet, node_id: Uuid) -> Result<DataSet> {
    let devices = device_lookup(metadata)?;
    let phasors = phasor_lookup(metadata)?;

    let mut active = schema::active_dataset();
    let Some(measurements) = metadata.table(schema::MEASUREMENT_DETAIL) else {
        return Ok(active);
    };

    let table = active.table_mut(schema::ACTIVE_MEASUREMENTS).ok_or_else(|| {
        MetadataError::TableNotFound(schema::ACTIVE_MEASUREMENTS.to_string())
    })?;

    let md = |name: &str| measurements.column_index(name);
    let md_device = md("DeviceAcronym")?;
    let md_id = md("ID")?;
    let md_signal_id = md("SignalID")?;
    let md_point_tag = md("PointTag")?;
    let md_reference = md("SignalReference")?;
    let md_acronym = md("SignalAcronym")?;
    let md_source_index = md("PhasorSourceIndex")?;
    let md_description = md("Description")?;
    let md_internal = md("Internal")?;
    let md_enabled = md("Enabled")?;
    let md_updated = md("UpdatedOn")?;

    let am = |name: &str| table.column_index(name);
    let am_node = am("SourceNodeID")?;
    let am_id = am("ID")?;
    let am_signal_id = am("SignalID")?;
    let am_point_tag = am("PointTag")?;
    let am_reference = am("SignalReference")?;
    let am_internal = am("Internal")?;
    let am_subscribed = am("Subscribed")?;
    let am_device = am("Device")?;
    let am_device_id = am("DeviceID")?;
    let am_fps = am("FramesPerSecond")?;
    let am_protocol = am("Protocol")?;
    let am_protocol_type = am("ProtocolType")?;
    let am_signal_type = am("SignalType")?;
    let am_units = am("EngineeringUnits")?;
    let am_phasor_id = am("PhasorID")?;
    let am_phasor_type = am("PhasorType")?;
    let am_phase = am("Phase")?;
    let am_adder = am("Adder")?;
    let am_multiplier = am("Multiplier")?;
    let am_company = am("Company")?;
    let am_longitude = am("Longitude")?;
    let am_latitude = am("Latitude")?;
    let am_description = am("Description")?;
    let am_updated = am("UpdatedOn")?;

    let mut skipped = 0usize;

    for md_row in measurements.rows() {
        if !md_row.value_as_bool(md_enabled).unwrap_or(false) {
            skipped += 1;
            continue;
        }

        let mut row = table.create_row();
        row.set_value(am_node, node_id);
        row.set_value(am_id, md_row.value(md_id).clone());
        row.set_value(am_signal_id, md_row.value_as_guid(md_signal_id));
        row.set_value(am_point_tag, md_row.value(md_point_tag).clone());
        row.set_value(am_reference, md_row.value(md_reference).clone());
        row.set_value(am_internal, md_row.value_as_bool(md_internal));
        row.set_value(am_subscribed, false);
        row.set_value(am_description, md_row.value(md_description).clone());
        row.set_value(am_adder, 0.0);
        row.set_value(am_multiplier, 1.0);
        row.set_value(am_updated, md_row.value_as_date_time(md_updated));

        let signal_type = match md_row.value_as_string(md_acronym) {
            Some(s) if !s.is_empty() => s,
            _ => "CALC",
        };
        row.set_value(am_signal_type, signal_type);
        row.set_value(am_units, engineering_units(signal_type));

        match md_row.value_as_string(md_device).filter(|d| !d.is_empty()) {
            None => row.set_value(am_fps, DEFAULT_FRAMES_PER_SECOND),
            Some(device_name) => {
                row.set_value(am_device, device_name);

                if let Some(device) = devices.get(device_name) {
                    row.set_value(am_device_id, device.device_id);
                    row.set_value(am_fps, device.frames_per_second);
                    row.set_value(am_company, device.company.clone());
                    row.set_value(am_protocol, device.protocol.clone());
                    row.set_value(am_protocol_type, device.protocol_type);
                    row.set_value(am_longitude, device.longitude.clone());
                    row.set_value(am_latitude, device.latitude.clone());
                }

                let source_index = md_row.value_as_i32(md_source_index).unwrap_or(0);
                if let Some(phasor) = phasors
                    .get(device_name)
                    .and_then(|by_index| by_index.get(&source_index))
                {
                    row.set_value(am_phasor_id, phasor.phasor_id);
                    row.set_value(am_phasor_type, phasor.phasor_type.clone());
                    row.set_value(am_phase, phasor.phase.clone());
                }
            }
        }

        table.add_row(row);
    }

    debug!(
        active = table.row_count(),
        skipped, "rebuilt active measurements"
    );

    Ok(active)
}

/// Devices keyed by acronym and by name; the first device claiming a key wins
fn device_lookup(metadata: &DataSet) -> Result<HashMap<String, DeviceData>> {
    let mut lookup = HashMap::new();
    let Some(table) = metadata.table(schema::DEVICE_DETAIL) else {
        return Ok(lookup);
    };

    let acronym = table.column_index("Acronym")?;
    let name = table.column_index("Name")?;
    let protocol = table.column_index("ProtocolName")?;
    let fps = table.column_index("FramesPerSecond")?;
    let company = table.column_index("CompanyAcronym")?;
    let longitude = table.column_index("Longitude")?;
    let latitude = table.column_index("Latitude")?;

    for (i, row) in table.rows().iter().enumerate() {
        let keys = [row.value_as_string(acronym), row.value_as_string(name)];

        for key in keys.into_iter().flatten().filter(|k| !k.is_empty()) {
            if lookup.contains_key(key) {
                continue;
            }
            let protocol_name = row.value_as_string(protocol).map(str::to_string);
            lookup.insert(
                key.to_string(),
                DeviceData {
                    device_id: i as i32,
                    frames_per_second: row.value_as_i32(fps),
                    company: row.value_as_string(company).map(str::to_string),
                    protocol_type: protocol_type(protocol_name.as_deref().unwrap_or("")),
                    protocol: protocol_name,
                    longitude: row.value(longitude).clone(),
                    latitude: row.value(latitude).clone(),
                },
            );
        }
    }

    Ok(lookup)
}

fn phasor_lookup(metadata: &DataSet) -> Result<HashMap<String, HashMap<i32, PhasorData>>> {
    let mut lookup: HashMap<String, HashMap<i32, PhasorData>> = HashMap::new();
    let Some(table) = metadata.table(schema::PHASOR_DETAIL) else {
        return Ok(lookup);
    };

    let id = table.column_index("ID")?;
    let device = table.column_index("DeviceAcronym")?;
    let kind = table.column_index("Type")?;
    let phase = table.column_index("Phase")?;
    let source_index = table.column_index("SourceIndex")?;

    for row in table.rows() {
        let Some(device_name) = row.value_as_string(device).filter(|d| !d.is_empty()) else {
            continue;
        };

        lookup.entry(device_name.to_string()).or_default().insert(
            row.value_as_i32(source_index).unwrap_or(0),
            PhasorData {
                phasor_id: row.value_as_i32(id),
                phasor_type: row.value_as_string(kind).map(str::to_string),
                phase: row.value_as_string(phase).map(str::to_string),
            },
        );
    }

    Ok(lookup)
}
