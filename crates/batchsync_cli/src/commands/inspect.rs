//! Inspect command implementation.

use super::{read_manifest, read_part, CliError};
use serde::Serialize;
use std::path::Path;

/// Batch inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Batch directory path.
    pub path: String,
    /// Root recorded in the manifest.
    pub recorded_root: String,
    /// Source watermark of the batch.
    pub timestamp: u64,
    /// Number of parts.
    pub part_count: usize,
    /// Total size of the part files in bytes.
    pub total_size: u64,
    /// Total row count (if rows were counted).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    /// Per-part details.
    pub parts: Vec<PartStats>,
}

/// Statistics for a single part.
#[derive(Debug, Serialize)]
pub struct PartStats {
    /// Part index.
    pub index: u32,
    /// File name.
    pub file: String,
    /// Whether this is the final part.
    pub last: bool,
    /// File size in bytes, or 0 if the file is missing.
    pub size: u64,
    /// Tables listed for the part.
    pub tables: Vec<String>,
    /// Rows in the part (if counted).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
}

/// Runs the inspect command.
pub fn run(path: &Path, count_rows: bool, format: &str) -> Result<(), CliError> {
    let result = inspect(path, count_rows)?;

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&result)
                .map_err(batchsync_core::CoreError::from)?;
            println!("{json}");
        }
        _ => print_text_output(&result),
    }

    Ok(())
}

/// Collects statistics for the batch directory at `path`.
pub fn inspect(path: &Path, count_rows: bool) -> Result<InspectResult, CliError> {
    let manifest = read_manifest(path)?;

    let mut parts = Vec::with_capacity(manifest.parts.len());
    for descriptor in &manifest.parts {
        let size = std::fs::metadata(path.join(&descriptor.file)).map_or(0, |m| m.len());
        let rows = if count_rows {
            Some(read_part(path, descriptor)?.row_count())
        } else {
            None
        };
        parts.push(PartStats {
            index: descriptor.index,
            file: descriptor.file.clone(),
            last: descriptor.last,
            size,
            tables: descriptor.tables.iter().map(ToString::to_string).collect(),
            rows,
        });
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        recorded_root: manifest.directory_root.display().to_string(),
        timestamp: manifest.timestamp,
        part_count: parts.len(),
        total_size: parts.iter().map(|p| p.size).sum(),
        row_count: count_rows.then(|| parts.iter().filter_map(|p| p.rows).sum()),
        parts,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Batch Inspection");
    println!("================");
    println!();
    println!("Path:      {}", result.path);
    println!("Recorded:  {}", result.recorded_root);
    println!("Timestamp: {}", result.timestamp);
    println!();
    println!("Parts: {}", result.part_count);
    println!("  Total size: {}", format_size(result.total_size));
    if let Some(rows) = result.row_count {
        println!("  Total rows: {rows}");
    }
    println!();
    for part in &result.parts {
        let marker = if part.last { " (last)" } else { "" };
        let rows = part.rows.map(|r| format!(", {r} rows")).unwrap_or_default();
        println!(
            "  [{:03}] {}{marker}: {}{rows} [{}]",
            part.index,
            part.file,
            format_size(part.size),
            part.tables.join(", ")
        );
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} bytes")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
