use std::cmp::Ordering;

use crate::record::{Record, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn symbol(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "▲",
            SortDirection::Descending => "▼",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }
}

/// Orders row indices into `records` by one field. Without a key the input order
/// is returned as is.
pub fn sort(records: &[Record], rows: Vec<usize>, key: Option<&SortKey>) -> Vec<usize> {
    let Some(key) = key else {
        return rows;
    };
    let mut keyed: Vec<(usize, SortCell)> = rows
        .into_iter()
        .map(|idx| (idx, SortCell::new(records[idx].get(&key.field))))
        .collect();
    // sort_by is stable, ties keep their incoming order.
    keyed.sort_by(|(_, a), (_, b)| a.compare(b, key.direction));
    keyed.into_iter().map(|(idx, _)| idx).collect()
}

/// A field value prepared for comparison. The display text is rendered once per
/// row instead of once per comparison.
#[derive(Debug)]
enum SortCell {
    Null,
    Number(f64, String),
    Text(String),
}

impl SortCell {
    fn new(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => SortCell::Null,
            Some(Value::Number(n)) => SortCell::Number(*n, Value::Number(*n).display_string()),
            Some(other) => SortCell::Text(other.display_string()),
        }
    }

    fn text(&self) -> &str {
        match self {
            SortCell::Null => "",
            SortCell::Number(_, text) | SortCell::Text(text) => text,
        }
    }

    /// Type aware comparison. Nulls (and absent fields) go first when ascending,
    /// last when descending. Two numbers compare numerically, anything else by
    /// its display text.
    fn compare(&self, other: &SortCell, direction: SortDirection) -> Ordering {
        let ordering = match (self, other) {
            (SortCell::Null, SortCell::Null) => return Ordering::Equal,
            (SortCell::Null, _) => Ordering::Less,
            (_, SortCell::Null) => Ordering::Greater,
            (SortCell::Number(x, _), SortCell::Number(y, _)) => {
                x.partial_cmp(y).unwrap_or(Ordering::Equal)
            }
            (a, b) => collate(a.text(), b.text()),
        };

        match direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }
}

// Case folded comparison first, then lowercase before uppercase on ties.
fn collate(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
        .then_with(|| b.cmp(a))
}
