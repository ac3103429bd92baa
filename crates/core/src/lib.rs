//! kubeview core types shared by the query builders, the table engine and hosts.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub mod columns;
pub mod series;
pub mod variables;

/// Stable identity of a table row, derived from immutable entity-key fields
/// (e.g. `"namespace/name"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(String);

impl RowId {
    pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

    /// Identity for namespaced entities: `namespace/name`.
    pub fn namespaced(namespace: &str, name: &str) -> Self { Self(format!("{}/{}", namespace, name)) }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl std::fmt::Display for RowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for RowId {
    fn from(v: &str) -> Self { Self(v.to_string()) }
}

impl From<String> for RowId {
    fn from(v: String) -> Self { Self(v) }
}

impl std::borrow::Borrow<str> for RowId {
    fn borrow(&self) -> &str { &self.0 }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoreError {
    #[error("variable {name} not found")]
    VariableNotFound { name: String },
}

pub type CoreResult<T> = Result<T, CoreError>;

pub mod prelude {
    pub use super::columns::{ColumnSortingConfig, ColumnSpec, SortDirection, SortType, SortValue, SortingState};
    pub use super::series::{get_series_value, count_matching_series, QueryResults, Series, SeriesMatcher};
    pub use super::variables::{resolve_variable, VariableScope, VariableValue};
    pub use super::{CoreError, CoreResult, RowId};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaced_row_id_joins_with_slash() {
        let id = RowId::namespaced("ns1", "ds-a");
        assert_eq!(id.as_str(), "ns1/ds-a");
        assert_eq!(id.to_string(), "ns1/ds-a");
        assert_eq!(id, RowId::from("ns1/ds-a"));
    }

    #[test]
    fn row_id_serializes_as_plain_string() {
        let id = RowId::from("ns/x");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"ns/x\"");
    }
}
