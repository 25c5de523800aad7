use std::fmt;

use rayon::prelude::*;

use crate::record::Record;

/// A field promoted to a rendered table column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Column {
    name: String,
}

impl Column {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Derives the columns worth rendering for a record set.
///
/// Candidates are the fields of the first record only, in its key order. Fields that
/// appear only in later records never become columns. A candidate is kept when at
/// least one record holds a meaningful value for it.
pub fn project(records: &[Record]) -> Vec<Column> {
    let Some(first) = records.first() else {
        return Vec::new();
    };
    let candidates: Vec<&str> = first.field_names().collect();

    // Each candidate is checked independently, order is kept by the indexed collect.
    let keep: Vec<bool> = candidates
        .par_iter()
        .map(|field| {
            records
                .iter()
                .any(|r| r.get(field).is_some_and(|v| v.is_meaningful()))
        })
        .collect();

    candidates
        .into_iter()
        .zip(keep)
        .filter(|(_, keep)| *keep)
        .map(|(field, _)| Column::new(field))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(v: serde_json::Value) -> Vec<Record> {
        serde_json::from_value(v).unwrap()
    }

    fn names(columns: &[Column]) -> Vec<&str> {
        columns.iter().map(Column::name).collect()
    }

    #[test]
    fn empty_record_set_has_no_columns() {
        assert!(project(&[]).is_empty());
    }

    #[test]
    fn drops_vacuous_fields() {
        let rs = records(json!([
            {"Title": "A", "Notes": "", "Tags": [], "Meta": {}, "Score": null},
            {"Title": "B", "Notes": null, "Tags": [], "Meta": {}, "Score": 3},
        ]));
        assert_eq!(names(&project(&rs)), vec!["Title", "Score"]);
    }

    #[test]
    fn keeps_field_meaningful_in_any_record() {
        let rs = records(json!([
            {"Title": "A", "Genres": []},
            {"Title": "B"},
            {"Title": "C", "Genres": ["RPG"]},
        ]));
        assert_eq!(names(&project(&rs)), vec!["Title", "Genres"]);
    }

    #[test]
    fn only_first_record_defines_candidates() {
        let rs = records(json!([
            {"Title": "A"},
            {"Title": "B", "Rating": 4.5},
        ]));
        assert_eq!(names(&project(&rs)), vec!["Title"]);
    }

    #[test]
    fn preserves_first_record_key_order() {
        let rs = records(json!([{"z": 1, "a": 2, "m": 3}]));
        assert_eq!(names(&project(&rs)), vec!["z", "a", "m"]);
    }
}
