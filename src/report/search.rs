use rayon::prelude::*;

use super::columns::Column;
use crate::record::Record;

/// Returns the indices of the records where any column contains `query`,
/// ignoring case, in their original order.
///
/// A blank query keeps every record.
pub fn search(records: &[Record], columns: &[Column], query: &str) -> Vec<usize> {
    if query.trim().is_empty() {
        return (0..records.len()).collect();
    }
    let needle = query.to_lowercase();
    records
        .par_iter()
        .enumerate()
        .filter(|(_, record)| row_matches(record, columns, &needle))
        .map(|(idx, _)| idx)
        .collect()
}

fn row_matches(record: &Record, columns: &[Column], needle: &str) -> bool {
    columns
        .iter()
        .any(|c| record.display(c.name()).to_lowercase().contains(needle))
}
