use super::flatten::{FlatRecord, COLUMNS};
use crate::EtlError;
use std::path::Path;

/// Writes flattened rows as CSV under the fixed header
///
/// Nothing is written when `rows` is empty, so an earlier table is never replaced by an
/// empty one.
///
/// # Returns
///
/// The number of rows written
pub fn write_table(path: &Path, rows: &[FlatRecord]) -> Result<usize, EtlError> {
    if rows.is_empty() {
        tracing::warn!("No rows to write; leaving {} untouched", path.display());
        return Ok(0);
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    writer.write_record(COLUMNS)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    tracing::info!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(rows.len())
}

/// Reads a table written by `write_table`
pub fn read_table(path: &Path) -> Result<Vec<FlatRecord>, EtlError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_header_and_empty_cells() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("car_features.csv");

        let row = FlatRecord {
            ad_id: Some("111".to_string()),
            price: Some(99000),
            brand: Some("Volvo".to_string()),
            ..FlatRecord::default()
        };
        assert_eq!(write_table(&path, &[row.clone()]).unwrap(), 1);

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), COLUMNS.join(","));
        assert_eq!(lines.next().unwrap(), "111,99000,,Volvo,,,,,,,,,,,,,,,");

        assert_eq!(read_table(&path).unwrap(), vec![row]);
    }

    #[test]
    fn test_empty_rows_write_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("car_features.csv");

        assert_eq!(write_table(&path, &[]).unwrap(), 0);
        assert!(!path.exists());
    }
}
