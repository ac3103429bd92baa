//! Column specs and sorting state for async tables.
//!
//! This module provides:
//! - Column specs with per-column sorting configuration
//! - The single active sorting state and its toggle rules
//! - Sort values and their comparison semantics (label vs numeric value)

#![forbid(unsafe_code)]

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn flip(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// How a column's values compare when sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortType {
    /// String comparison over entity labels.
    Label,
    /// Numeric comparison over derived metric values.
    Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSortingConfig {
    pub enabled: bool,
    pub sort_type: SortType,
    /// `true`: sort already-fetched rows client-side.
    /// `false`: re-query the backend with a sort-rewritten discovery expression.
    pub local: bool,
    /// Direction applied when this column becomes the active sort column.
    pub default_direction: SortDirection,
}

impl ColumnSortingConfig {
    pub fn local(sort_type: SortType) -> Self {
        Self { enabled: true, sort_type, local: true, default_direction: SortDirection::Asc }
    }

    pub fn remote(sort_type: SortType) -> Self {
        Self { enabled: true, sort_type, local: false, default_direction: SortDirection::Asc }
    }

    pub fn with_default_direction(mut self, direction: SortDirection) -> Self {
        self.default_direction = direction;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub id: &'static str,
    pub header: &'static str,
    pub sorting: Option<ColumnSortingConfig>,
}

pub fn col(id: &'static str, header: &'static str, sorting: Option<ColumnSortingConfig>) -> ColumnSpec {
    ColumnSpec { id, header, sorting }
}

pub fn find_column<'a>(columns: &'a [ColumnSpec], id: &str) -> Option<&'a ColumnSpec> {
    columns.iter().find(|c| c.id == id)
}

/// Exactly one active sort column at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortingState {
    pub column_id: String,
    pub direction: SortDirection,
}

impl SortingState {
    pub fn new(column_id: impl Into<String>, direction: SortDirection) -> Self {
        Self { column_id: column_id.into(), direction }
    }

    /// Next state after the user selects `column`: same column flips direction,
    /// a new column starts at the column's default direction.
    pub fn toggled(&self, column: &ColumnSpec) -> SortingState {
        if self.column_id == column.id {
            SortingState { column_id: self.column_id.clone(), direction: self.direction.flip() }
        } else {
            let direction = column.sorting.as_ref().map(|s| s.default_direction).unwrap_or_default();
            SortingState { column_id: column.id.to_string(), direction }
        }
    }
}

/// Value a row exposes for a sortable column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SortValue {
    Label(String),
    /// `None` is an unknown value; it sorts before every known value.
    Value(Option<f64>),
}

impl SortValue {
    pub fn compare(&self, other: &SortValue, sort_type: SortType) -> Ordering {
        match sort_type {
            SortType::Label => self.label_key().cmp(&other.label_key()),
            SortType::Value => match (self.numeric_key(), other.numeric_key()) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(a), Some(b)) => a.total_cmp(&b),
            },
        }
    }

    fn label_key(&self) -> String {
        match self {
            SortValue::Label(s) => s.clone(),
            SortValue::Value(Some(v)) => v.to_string(),
            SortValue::Value(None) => String::new(),
        }
    }

    fn numeric_key(&self) -> Option<f64> {
        match self {
            SortValue::Value(v) => *v,
            SortValue::Label(s) => s.parse::<f64>().ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<ColumnSpec> {
        vec![
            col("name", "NAME", Some(ColumnSortingConfig::local(SortType::Label))),
            col("replicas", "REPLICAS", Some(ColumnSortingConfig::remote(SortType::Value).with_default_direction(SortDirection::Desc))),
            col("age", "AGE", None),
        ]
    }

    #[test]
    fn toggle_same_column_flips_direction() {
        let cols = columns();
        let s = SortingState::new("name", SortDirection::Asc);
        let next = s.toggled(find_column(&cols, "name").unwrap());
        assert_eq!(next, SortingState::new("name", SortDirection::Desc));
        let back = next.toggled(find_column(&cols, "name").unwrap());
        assert_eq!(back, s);
    }

    #[test]
    fn toggle_new_column_uses_column_default_direction() {
        let cols = columns();
        let s = SortingState::new("name", SortDirection::Asc);
        let next = s.toggled(find_column(&cols, "replicas").unwrap());
        assert_eq!(next, SortingState::new("replicas", SortDirection::Desc));
        // columns without sorting config fall back to ascending
        let age = s.toggled(find_column(&cols, "age").unwrap());
        assert_eq!(age.direction, SortDirection::Asc);
    }

    #[test]
    fn unknown_values_sort_before_zero() {
        let unknown = SortValue::Value(None);
        let zero = SortValue::Value(Some(0.0));
        assert_eq!(unknown.compare(&zero, SortType::Value), Ordering::Less);
        assert_eq!(zero.compare(&SortValue::Value(Some(2.0)), SortType::Value), Ordering::Less);
        assert_eq!(unknown.compare(&SortValue::Value(None), SortType::Value), Ordering::Equal);
    }

    #[test]
    fn label_sort_is_lexicographic() {
        let a = SortValue::Label("ds-10".into());
        let b = SortValue::Label("ds-9".into());
        assert_eq!(a.compare(&b, SortType::Label), Ordering::Less);
    }
}
