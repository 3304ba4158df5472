//! Dump command implementation.

use super::{read_manifest, read_part, CliError};
use batchsync_core::{RowState, Value};
use serde::Serialize;
use std::path::Path;

/// A row as printed by the dump command.
#[derive(Debug, Serialize)]
pub struct DumpedRow {
    /// Index of the part holding the row.
    pub part: u32,
    /// Qualified table name.
    pub table: String,
    /// Row state.
    pub state: RowState,
    /// Values in column order.
    pub values: Vec<Value>,
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    part: Option<u32>,
    table: Option<&str>,
    limit: Option<usize>,
    format: &str,
) -> Result<(), CliError> {
    let rows = collect(path, part, table, limit)?;

    match format {
        "json" => {
            for row in &rows {
                let json = serde_json::to_string(row).map_err(batchsync_core::CoreError::from)?;
                println!("{json}");
            }
        }
        _ => {
            for row in &rows {
                let marker = match row.state {
                    RowState::Modified => "+",
                    RowState::Deleted => "-",
                };
                let values: Vec<String> = row.values.iter().map(display_value).collect();
                println!(
                    "[{:03}] {marker} {}: {}",
                    row.part,
                    row.table,
                    values.join(" | ")
                );
            }
            println!();
            println!("{} row(s)", rows.len());
        }
    }

    Ok(())
}

/// Reads rows from the batch at `path` in part order.
///
/// `table` matches the qualified or bare table name, ignoring ASCII case.
pub fn collect(
    path: &Path,
    part: Option<u32>,
    table: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<DumpedRow>, CliError> {
    let manifest = read_manifest(path)?;

    let descriptors: Vec<_> = match part {
        Some(index) => {
            let descriptor = manifest
                .parts
                .iter()
                .find(|p| p.index == index)
                .ok_or(CliError::PartNotFound(index))?;
            vec![descriptor]
        }
        None => manifest.parts.iter().collect(),
    };

    let limit = limit.unwrap_or(usize::MAX);
    let mut rows = Vec::new();
    for descriptor in descriptors {
        let container = read_part(path, descriptor)?;
        for wire_table in container.tables {
            let name = wire_table.table_ref().to_string();
            if let Some(wanted) = table {
                if !name.eq_ignore_ascii_case(wanted)
                    && !wire_table.table_name.eq_ignore_ascii_case(wanted)
                {
                    continue;
                }
            }
            for row in wire_table.rows {
                if rows.len() == limit {
                    return Ok(rows);
                }
                rows.push(DumpedRow {
                    part: descriptor.index,
                    table: name.clone(),
                    state: row.state,
                    values: row.values,
                });
            }
        }
    }

    Ok(rows)
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Text(s) => format!("{s:?}"),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::sample_batch;
    use tempfile::tempdir;

    fn ids(rows: &[DumpedRow]) -> Vec<i64> {
        rows.iter()
            .map(|r| r.values[0].as_integer().unwrap())
            .collect()
    }

    #[test]
    fn dumps_all_rows_in_part_order() {
        let dir = tempdir().unwrap();
        let path = sample_batch(dir.path());

        let rows = collect(&path, None, None, None).unwrap();
        assert_eq!(ids(&rows), (1..=10).collect::<Vec<_>>());
        assert_eq!(rows[9].state, RowState::Deleted);
        assert_eq!(rows[9].part, 3);
        assert_eq!(rows[9].values[1], Value::Null);
    }

    #[test]
    fn selects_one_part() {
        let dir = tempdir().unwrap();
        let path = sample_batch(dir.path());

        let rows = collect(&path, Some(1), None, None).unwrap();
        assert_eq!(ids(&rows), vec![4, 5, 6]);

        let err = collect(&path, Some(7), None, None).unwrap_err();
        assert!(matches!(err, CliError::PartNotFound(7)));
    }

    #[test]
    fn filters_table_and_limits() {
        let dir = tempdir().unwrap();
        let path = sample_batch(dir.path());

        assert_eq!(collect(&path, None, Some("product"), Some(5)).unwrap().len(), 5);
        assert!(collect(&path, None, Some("Customer"), None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn nulls_and_text_display() {
        assert_eq!(display_value(&Value::Null), "NULL");
        assert_eq!(display_value(&Value::Text("a b".into())), "\"a b\"");
        assert_eq!(display_value(&Value::Integer(7)), "7");
    }
}
