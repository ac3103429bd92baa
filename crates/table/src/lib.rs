//! kubeview async table engine.
//!
//! A table runs in two phases: a root query discovers the row set, then a
//! batch of row queries scoped to exactly those rows enriches them. The
//! [`AsyncTable`] state machine is synchronous and owns all mutable table
//! state; [`spawn_table`] drives it from a single tokio task and publishes
//! immutable [`TableSnapshot`]s.

#![forbid(unsafe_code)]

use std::sync::Arc;

use kubeview_api::{ApiError, QueryRequest};
use kubeview_core::columns::{ColumnSortingConfig, SortValue, SortingState};
use kubeview_core::series::{QueryResults, Series};
use kubeview_core::variables::VariableScope;
use kubeview_core::{CoreError, RowId};
use serde::{Deserialize, Serialize};

mod driver;
mod engine;

pub use driver::{spawn_table, TableCommand, TableHandle};
pub use engine::{AsyncTable, RowTicket, RootTicket, SortOutcome};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableError {
    #[error("variable {0} not found")]
    VariableNotFound(String),
    #[error("query {ref_id} failed: {message}")]
    QueryExecutionFailed { ref_id: String, message: String },
}

impl From<CoreError> for TableError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::VariableNotFound { name } => TableError::VariableNotFound(name),
        }
    }
}

impl TableError {
    pub fn query_failed(ref_id: &str, err: &ApiError) -> Self {
        TableError::QueryExecutionFailed { ref_id: ref_id.to_string(), message: err.to_string() }
    }
}

pub type TableResult<T> = Result<T, TableError>;

/// Builds the discovery query and the enrichment batch for one entity kind.
pub trait QueryBuilder: Send + Sync {
    type Row;

    /// Discovery query; `config` is the sorting config of the active column.
    /// Non-local configs rewrite the expression for backend-side ordering.
    fn root_query(
        &self,
        vars: &VariableScope,
        sorting: &SortingState,
        config: Option<&ColumnSortingConfig>,
    ) -> TableResult<QueryRequest>;

    /// One request per derived metric, each with a distinct `ref_id`.
    fn row_queries(&self, rows: &[Self::Row], vars: &VariableScope) -> TableResult<Vec<QueryRequest>>;
}

/// Caller-supplied row callbacks.
pub trait RowDelegate: Send + Sync {
    type Row;

    /// Row from one discovery series; `None` skips the series.
    fn parse_row(&self, series: &Series) -> Option<Self::Row>;

    fn create_row_id(&self, row: &Self::Row) -> RowId;

    /// Fold an enrichment batch into the row. Runs once per batch, after every
    /// query settled, over whatever result sets arrived.
    fn map_async_data(&self, row: &mut Self::Row, results: &QueryResults);

    fn build_expanded_row(&self, row: &Self::Row, vars: &VariableScope) -> TableResult<ExpandedRow>;

    fn sort_value(&self, row: &Self::Row, column_id: &str) -> SortValue;
}

/// Nested detail content of an expanded row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedRow {
    pub title: String,
    pub panels: Vec<DetailPanel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailPanel {
    pub title: String,
    pub request: QueryRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TableState {
    #[default]
    Idle,
    RootLoading,
    RootLoaded,
    RowLoading,
    Ready,
    Error,
}

impl TableState {
    /// No query of the current cycle is outstanding.
    pub fn is_settled(self) -> bool { matches!(self, TableState::Idle | TableState::Ready | TableState::Error) }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow<R> {
    pub id: RowId,
    pub data: R,
    pub expanded: bool,
    /// Built detail content; `None` while collapsed or not yet built.
    pub detail: Option<Arc<ExpandedRow>>,
}

/// Immutable view of a table published after each state change.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSnapshot<R> {
    pub epoch: u64,
    /// Generation of the most recently issued root query.
    pub generation: u64,
    pub state: TableState,
    pub sorting: SortingState,
    /// Display order.
    pub rows: Vec<SnapshotRow<R>>,
    /// Table-level error (discovery failure or query build failure).
    pub error: Option<TableError>,
    /// Enrichment failure; rows are still shown.
    pub row_error: Option<TableError>,
}

impl<R> Default for TableSnapshot<R> {
    fn default() -> Self {
        Self {
            epoch: 0,
            generation: 0,
            state: TableState::Idle,
            sorting: SortingState::new("", Default::default()),
            rows: Vec::new(),
            error: None,
            row_error: None,
        }
    }
}

impl<R> TableSnapshot<R> {
    pub fn row(&self, id: &str) -> Option<&SnapshotRow<R>> { self.rows.iter().find(|r| r.id.as_str() == id) }

    pub fn ids(&self) -> Vec<&str> { self.rows.iter().map(|r| r.id.as_str()).collect() }
}

pub mod prelude {
    pub use super::{
        spawn_table, AsyncTable, DetailPanel, ExpandedRow, QueryBuilder, RowDelegate, SnapshotRow, SortOutcome,
        TableCommand, TableError, TableHandle, TableResult, TableSnapshot, TableState,
    };
}
