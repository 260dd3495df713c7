//! Metadata catalog snapshot
//!
//! The publisher holds the catalog behind a single `Arc` that `define_metadata` swaps
//! wholesale. Handlers clone the `Arc` and only ever read from it, so a request sees either
//! the old or the new catalog in full.

use gep_core::{compression, MeasurementKey, OperationalModes, SignalIndexCache};
use gep_metadata::{schema, DataSet, FilterError, FilterEvaluator, TableSelection};
use tracing::debug;
use uuid::Uuid;

use crate::error::{PublisherError, Result};

/// Full metadata plus the active measurements derived from it
#[derive(Debug, Clone)]
pub struct Catalog {
    pub all: DataSet,
    pub active: DataSet,
}

impl Catalog {
    pub fn empty() -> Self {
        Self {
            all: schema::metadata_dataset(),
            active: schema::active_dataset(),
        }
    }
}

/// Build a subscription's signal index cache from the rows of `ActiveMeasurements`
/// matched by `expression`, assigning indices in match order. Every matched row gets an
/// index; a row without a `SignalID` is cached under the nil id.
pub fn build_signal_index_cache(
    filter: &dyn FilterEvaluator,
    active: &DataSet,
    subscriber_id: Uuid,
    expression: &str,
) -> Result<SignalIndexCache> {
    let rows = filter.select(active, schema::ACTIVE_MEASUREMENTS, expression)?;
    let mut cache = SignalIndexCache::new(subscriber_id);

    let Some(table) = active.table(schema::ACTIVE_MEASUREMENTS) else {
        return Ok(cache);
    };

    let column = |name: &str| {
        table
            .column_index(name)
            .map_err(|e| FilterError::evaluation(e.to_string()))
    };
    let (id_column, signal_id_column) = (column("ID")?, column("SignalID")?);

    for index in rows {
        let Some(row) = table.row(index) else {
            continue;
        };
        let signal_id = row.value_as_guid(signal_id_column).unwrap_or_else(|| {
            debug!("Active measurement row {} has no signal ID, using nil", index);
            Uuid::nil()
        });

        let (source, id) = MeasurementKey::parse_key(row.value_as_string(id_column).unwrap_or(""))?;
        cache.add_measurement_key(signal_id, source, id);
    }

    Ok(cache)
}

/// Per-client view of `all`: every table keeps its columns, and tables named by a selection
/// keep only the selected rows in match order.
pub fn filter_metadata(all: &DataSet, selections: Option<&[TableSelection]>) -> DataSet {
    let Some(selections) = selections else {
        return all.clone();
    };

    let mut filtered = DataSet::new();

    for table in all.tables() {
        let mut copy = table.clone_structure();
        let selected = selections
            .iter()
            .find(|s| s.table.eq_ignore_ascii_case(table.name()));

        match selected {
            Some(selection) => {
                for &index in &selection.rows {
                    if let Some(row) = table.row(index) {
                        copy.add_row(row.clone());
                    }
                }
            }
            None => {
                for row in table.rows() {
                    copy.add_row(row.clone());
                }
            }
        }

        filtered.add_or_update_table(copy);
    }

    filtered
}

/// Serialize a metadata view in the negotiated format
pub fn serialize_metadata(modes: OperationalModes, metadata: &DataSet) -> Result<Vec<u8>> {
    if !modes.use_common_serialization_format() {
        return Err(PublisherError::UnsupportedSerializationFormat);
    }

    let xml = metadata.write_xml();

    if modes.compress_metadata() && modes.uses_gzip() {
        return Ok(compression::gzip(&xml)?);
    }

    Ok(xml)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gep_core::compression_modes;
    use gep_metadata::{records::build_metadata, DataTable, DataType, ExpressionEngine, MeasurementMetadata};
    use std::sync::Arc;
    use std::thread;

    fn active_with(rows: &[(&str, u128, &str)]) -> DataSet {
        let mut dataset = schema::active_dataset();
        let table = dataset.table_mut(schema::ACTIVE_MEASUREMENTS).unwrap();
        let id = table.column_index("ID").unwrap();
        let signal_id = table.column_index("SignalID").unwrap();
        let point_tag = table.column_index("PointTag").unwrap();

        for (key, signal, tag) in rows {
            let mut row = table.create_row();
            row.set_value(id, *key);
            row.set_value(signal_id, Uuid::from_u128(*signal));
            row.set_value(point_tag, *tag);
            table.add_row(row);
        }

        dataset
    }

    #[test]
    fn test_cache_indices_follow_match_order() {
        let active = active_with(&[("PPA:1", 1, "A"), ("PPA:2", 2, "B"), ("PPA:3", 3, "C")]);
        let subscriber = Uuid::from_u128(99);

        let cache = build_signal_index_cache(
            &ExpressionEngine::new(),
            &active,
            subscriber,
            "FILTER ActiveMeasurements WHERE ID LIKE 'PPA:%' ORDER BY PointTag DESC",
        )
        .unwrap();

        assert_eq!(cache.subscriber_id(), subscriber);
        assert_eq!(cache.count(), 3);
        assert_eq!(cache.signal_index(&Uuid::from_u128(3)), Some(0));
        assert_eq!(cache.signal_index(&Uuid::from_u128(2)), Some(1));
        assert_eq!(cache.signal_index(&Uuid::from_u128(1)), Some(2));

        let record = cache.record(0).unwrap();
        assert_eq!(record.source, "PPA");
        assert_eq!(record.id, 3);
    }

    #[test]
    fn test_cache_build_failure_is_reported() {
        let active = active_with(&[("PPA:1", 1, "A")]);
        let err = build_signal_index_cache(
            &ExpressionEngine::new(),
            &active,
            Uuid::nil(),
            "FILTER ActiveMeasurements WHERE Missing = 1",
        )
        .unwrap_err();

        assert!(err.to_string().starts_with("ExpressionTree exception: "));
    }

    #[test]
    fn test_row_without_signal_id_keeps_its_index() {
        let mut active = active_with(&[("PPA:1", 1, "A"), ("PPA:3", 3, "C")]);
        let table = active.table_mut(schema::ACTIVE_MEASUREMENTS).unwrap();
        let id = table.column_index("ID").unwrap();
        let point_tag = table.column_index("PointTag").unwrap();
        let mut row = table.create_row();
        row.set_value(id, "PPA:2");
        row.set_value(point_tag, "B");
        table.add_row(row);

        let cache = build_signal_index_cache(
            &ExpressionEngine::new(),
            &active,
            Uuid::nil(),
            "FILTER ActiveMeasurements WHERE ID LIKE 'PPA:%' ORDER BY PointTag",
        )
        .unwrap();

        assert_eq!(cache.count(), 3);
        assert_eq!(cache.signal_id(1), Some(Uuid::nil()));
        assert_eq!(cache.record(1).unwrap().id, 2);
        assert_eq!(cache.signal_index(&Uuid::from_u128(3)), Some(2));
    }

    #[test]
    fn test_key_id_beyond_32_bits_fails_the_build() {
        let active = active_with(&[("PPA:4294967296", 1, "A")]);
        let result = build_signal_index_cache(
            &ExpressionEngine::new(),
            &active,
            Uuid::nil(),
            "FILTER ActiveMeasurements WHERE PointTag = 'A'",
        );

        assert!(result.is_err());
    }

    #[test]
    fn test_concurrent_filters_are_independent() {
        let measurements: Vec<MeasurementMetadata> = (1..=50u32)
            .map(|i| MeasurementMetadata {
                id: format!("PPA:{}", i),
                signal_id: Uuid::from_u128(u128::from(i)),
                point_tag: format!("TAG{}", i),
                ..Default::default()
            })
            .collect();
        let all = build_metadata(&[], &measurements, &[], Uuid::nil(), 1).unwrap();
        let catalog = Arc::new(Catalog {
            all,
            active: schema::active_dataset(),
        });
        let before = catalog.all.write_xml();
        let engine = ExpressionEngine::new();

        let refresh = |expression: &str| {
            let selections = engine
                .select_tables(&catalog.all, schema::MEASUREMENT_DETAIL, expression)
                .unwrap();
            let view = filter_metadata(&catalog.all, Some(selections.as_slice()));
            let table = view.table(schema::MEASUREMENT_DETAIL).unwrap();
            let column = table.column_index("ID").unwrap();
            table
                .rows()
                .iter()
                .map(|row| row.value_as_string(column).unwrap_or("").to_string())
                .collect::<Vec<_>>()
        };

        thread::scope(|scope| {
            let low = scope.spawn(|| {
                (0..20)
                    .map(|_| refresh("FILTER MeasurementDetail WHERE ID IN ('PPA:1', 'PPA:2')"))
                    .collect::<Vec<_>>()
            });
            let high = scope.spawn(|| {
                (0..20)
                    .map(|_| refresh("FILTER MeasurementDetail WHERE ID = 'PPA:50'"))
                    .collect::<Vec<_>>()
            });

            for ids in low.join().unwrap() {
                assert_eq!(ids, ["PPA:1", "PPA:2"]);
            }
            for ids in high.join().unwrap() {
                assert_eq!(ids, ["PPA:50"]);
            }
        });

        assert_eq!(catalog.all.table(schema::MEASUREMENT_DETAIL).unwrap().row_count(), 50);
        assert_eq!(catalog.all.write_xml(), before);
    }

    #[test]
    fn test_filter_metadata_without_selection_clones_everything() {
        let mut all = DataSet::new();
        let mut table = DataTable::new("Things").with_column("Name", DataType::String);
        for name in ["a", "b"] {
            let mut row = table.create_row();
            row.set_value(0, name);
            table.add_row(row);
        }
        all.add_or_update_table(table);

        let view = filter_metadata(&all, None);
        assert_eq!(view.total_rows(), 2);
    }

    #[test]
    fn test_filter_metadata_keeps_selection_order_and_leaves_source_alone() {
        let mut all = DataSet::new();
        let mut things = DataTable::new("Things").with_column("Name", DataType::String);
        for name in ["a", "b", "c"] {
            let mut row = things.create_row();
            row.set_value(0, name);
            things.add_row(row);
        }
        let mut others = DataTable::new("Others").with_column("Name", DataType::String);
        let mut row = others.create_row();
        row.set_value(0, "x");
        others.add_row(row);
        all.add_or_update_table(things);
        all.add_or_update_table(others);

        let selections = vec![TableSelection {
            table: "things".to_string(),
            rows: vec![2, 0],
        }];
        let view = filter_metadata(&all, Some(selections.as_slice()));

        let things = view.table("Things").unwrap();
        assert_eq!(things.row_count(), 2);
        assert_eq!(things.rows()[0].value_as_string(0), Some("c"));
        assert_eq!(things.rows()[1].value_as_string(0), Some("a"));
        assert_eq!(view.table("Others").unwrap().row_count(), 1);

        assert_eq!(all.table("Things").unwrap().row_count(), 3);
        assert_eq!(view.tables()[0].name(), "Things");
    }

    #[test]
    fn test_serialize_requires_common_format() {
        let err = serialize_metadata(OperationalModes(0), &DataSet::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "DataPublisher only supports common serialization format"
        );
    }

    #[test]
    fn test_serialize_compresses_when_negotiated() {
        let dataset = schema::metadata_dataset();
        let plain = serialize_metadata(
            OperationalModes(OperationalModes::USE_COMMON_SERIALIZATION_FORMAT),
            &dataset,
        )
        .unwrap();
        let compressed = serialize_metadata(
            OperationalModes(
                OperationalModes::USE_COMMON_SERIALIZATION_FORMAT
                    | OperationalModes::COMPRESS_METADATA
                    | compression_modes::GZIP,
            ),
            &dataset,
        )
        .unwrap();

        assert_eq!(compression::gunzip(&compressed).unwrap(), plain);
    }
}
