//! Property tests for flush bounds and snapshot naming.

use batchsync_core::{
    snapshot_directory_name, ChangeSchema, ChangeSelector, Column, MemoryDataSource, Row,
    RowSizeEstimator, SchemaTable, SelectionConfig, SourceRecord, SyncContext, SyncParameters,
    SyncWay, TableRef, Value,
};
use proptest::prelude::*;
use std::collections::BTreeMap;
use tempfile::tempdir;

struct SizeColumn;

impl RowSizeEstimator for SizeColumn {
    fn estimate(&self, table: &SchemaTable, row: &Row) -> u64 {
        table
            .column_index("Size")
            .and_then(|i| row.get(i))
            .and_then(Value::as_integer)
            .map_or(0, |n| n as u64)
    }
}

fn schema() -> ChangeSchema {
    ChangeSchema::new("src", false, None, "scope").with_table(
        SchemaTable::new("Item", None)
            .with_column(Column::new("Id", "int"))
            .with_column(Column::new("Size", "int")),
    )
}

fn threshold_and_sizes() -> impl Strategy<Value = (u64, Vec<u64>)> {
    (1u64..200).prop_flat_map(|threshold| {
        (
            Just(threshold),
            prop::collection::vec(1..=threshold, 0..60),
        )
    })
}

fn parameter_pairs() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map("[A-Za-z][A-Za-z0-9]{0,7}", "[A-Za-z0-9]{0,7}", 0..5)
}

fn to_parameters(pairs: &[(String, String)]) -> SyncParameters {
    pairs
        .iter()
        .fold(SyncParameters::new(), |params, (name, value)| {
            params.with(name.as_str(), value.as_str())
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn every_part_closes_just_past_threshold((threshold, sizes) in threshold_and_sizes()) {
        let dir = tempdir().unwrap();
        let item = TableRef::new("Item", None);
        let mut source = MemoryDataSource::new();
        for (i, size) in sizes.iter().enumerate() {
            source.upsert(
                item.clone(),
                i as u64 + 1,
                SourceRecord::new().with("Id", i as i64).with("Size", *size as i64),
            );
        }

        let selector = ChangeSelector::new(source).with_estimator(SizeColumn);
        let mut ctx = SyncContext::new(SyncWay::Download);
        let config = SelectionConfig::new()
            .batch_directory(dir.path())
            .batch_size(threshold);
        let schema = schema();
        let (batch, stats) = selector.select_changes(&mut ctx, &schema, &config).unwrap();

        let directory = batch.directory_full_path().unwrap();
        let parts = batch.parts();
        prop_assert!(!parts.is_empty());
        prop_assert_eq!(parts.iter().filter(|p| p.is_last()).count(), 1);

        let mut seen = Vec::new();
        for (position, part) in parts.iter().enumerate() {
            prop_assert_eq!(part.index() as usize, position);

            let loaded = part.load(batch.schema(), &directory).unwrap();
            let rows: Vec<(i64, u64)> = loaded
                .data()
                .tables()
                .iter()
                .flat_map(|t| {
                    t.rows().iter().map(|r| {
                        let id = r.get(0).and_then(Value::as_integer).unwrap();
                        let size = r.get(1).and_then(Value::as_integer).unwrap() as u64;
                        (id, size)
                    }).collect::<Vec<_>>()
                })
                .collect();
            loaded.release();

            let total: u64 = rows.iter().map(|(_, s)| s).sum();
            if part.is_last() {
                prop_assert!(total <= threshold);
            } else {
                let last = rows.last().map_or(0, |(_, s)| *s);
                prop_assert!(total > threshold);
                prop_assert!(total - last <= threshold);
            }
            seen.extend(rows.into_iter().map(|(id, _)| id));
        }

        let expected: Vec<i64> = (0..sizes.len() as i64).collect();
        prop_assert_eq!(seen, expected);
        prop_assert_eq!(stats.total_upserts(), sizes.len() as u64);
    }

    #[test]
    fn snapshot_name_ignores_parameter_order(
        pairs in parameter_pairs().prop_map(|m| m.into_iter().collect::<Vec<_>>()).prop_shuffle()
    ) {
        let mut sorted = pairs.clone();
        sorted.sort();
        prop_assert_eq!(
            snapshot_directory_name(&to_parameters(&pairs)),
            snapshot_directory_name(&to_parameters(&sorted))
        );
    }

    #[test]
    fn different_parameters_never_collide(a in parameter_pairs(), b in parameter_pairs()) {
        prop_assume!(a != b);
        let a: Vec<_> = a.into_iter().collect();
        let b: Vec<_> = b.into_iter().collect();
        prop_assert_ne!(
            snapshot_directory_name(&to_parameters(&a)),
            snapshot_directory_name(&to_parameters(&b))
        );
    }
}
