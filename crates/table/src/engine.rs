//! Synchronous table state machine.
//!
//! Every issued query carries the generation it was issued under; results for
//! an older generation are dropped on arrival. Root and row phases have their
//! own counters and a new root query also invalidates any outstanding batch.

use std::sync::Arc;
use std::time::Instant;

use kubeview_api::{ApiResult, QueryRequest, QueryResponse};
use kubeview_core::columns::{find_column, ColumnSpec, SortDirection, SortingState};
use kubeview_core::series::QueryResults;
use kubeview_core::variables::{VariableScope, VariableValue};
use kubeview_core::RowId;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, warn};

use crate::{
    ExpandedRow, QueryBuilder, RowDelegate, SnapshotRow, TableError, TableResult, TableSnapshot, TableState,
};

/// Discovery query to run for generation `gen`.
#[derive(Debug, Clone, PartialEq)]
pub struct RootTicket {
    pub gen: u64,
    pub request: QueryRequest,
}

/// Enrichment batch to run for generation `gen`.
#[derive(Debug, Clone, PartialEq)]
pub struct RowTicket {
    pub gen: u64,
    pub requests: Vec<QueryRequest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOutcome {
    /// Rows were reordered in place.
    Local,
    /// The active column sorts on the backend; run a new root query.
    Requery,
    /// Unknown or non-sortable column.
    Ignored,
}

struct Row<R> {
    id: RowId,
    data: R,
}

pub struct AsyncTable<R> {
    columns: Vec<ColumnSpec>,
    builder: Arc<dyn QueryBuilder<Row = R>>,
    delegate: Arc<dyn RowDelegate<Row = R>>,
    vars: VariableScope,
    sorting: SortingState,
    state: TableState,
    root_gen: u64,
    row_gen: u64,
    root_ref_id: String,
    rows: Vec<Row<R>>,
    /// Expanded rows and their lazily built detail content.
    expanded: FxHashMap<RowId, Option<Arc<ExpandedRow>>>,
    error: Option<TableError>,
    row_error: Option<TableError>,
    epoch: u64,
    cycle_started: Option<Instant>,
}

impl<R: Clone> AsyncTable<R> {
    pub fn new(
        columns: Vec<ColumnSpec>,
        builder: Arc<dyn QueryBuilder<Row = R>>,
        delegate: Arc<dyn RowDelegate<Row = R>>,
        vars: VariableScope,
        sorting: SortingState,
    ) -> Self {
        Self {
            columns,
            builder,
            delegate,
            vars,
            sorting,
            state: TableState::Idle,
            root_gen: 0,
            row_gen: 0,
            root_ref_id: String::new(),
            rows: Vec::new(),
            expanded: FxHashMap::default(),
            error: None,
            row_error: None,
            epoch: 0,
            cycle_started: None,
        }
    }

    pub fn state(&self) -> TableState { self.state }
    pub fn sorting(&self) -> &SortingState { &self.sorting }
    pub fn columns(&self) -> &[ColumnSpec] { &self.columns }
    pub fn variables(&self) -> &VariableScope { &self.vars }
    pub fn generation(&self) -> u64 { self.root_gen }
    pub fn epoch(&self) -> u64 { self.epoch }
    pub fn error(&self) -> Option<&TableError> { self.error.as_ref() }
    pub fn row_error(&self) -> Option<&TableError> { self.row_error.as_ref() }
    pub fn row_ids(&self) -> Vec<RowId> { self.rows.iter().map(|r| r.id.clone()).collect() }
    pub fn row(&self, id: &str) -> Option<&R> { self.rows.iter().find(|r| r.id.as_str() == id).map(|r| &r.data) }
    pub fn is_expanded(&self, id: &str) -> bool { self.expanded.contains_key(id) }

    pub fn expanded_ids(&self) -> Vec<RowId> {
        let mut ids: Vec<RowId> = self.expanded.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn touch(&mut self) { self.epoch = self.epoch.saturating_add(1); }

    fn settle(&mut self, state: TableState) {
        self.state = state;
        if let Some(t0) = self.cycle_started.take() {
            metrics::histogram!("table_cycle_ms", t0.elapsed().as_secs_f64() * 1000.0);
        }
        self.touch();
    }

    fn fail(&mut self, err: TableError) {
        warn!(error = %err, gen = self.root_gen, "table: error");
        metrics::counter!("table_query_failures_total", 1u64);
        // No rows while in error. Expansion flags wait for the next discovery to prune them.
        self.rows.clear();
        self.row_error = None;
        self.error = Some(err);
        self.settle(TableState::Error);
    }

    /// Start a new root cycle. Supersedes every outstanding query.
    pub fn begin_root(&mut self) -> TableResult<RootTicket> {
        self.root_gen += 1;
        self.row_gen += 1;
        let config = find_column(&self.columns, &self.sorting.column_id).and_then(|c| c.sorting.as_ref());
        match self.builder.root_query(&self.vars, &self.sorting, config) {
            Ok(request) => {
                info!(gen = self.root_gen, ref_id = %request.ref_id, sort = %self.sorting.column_id, dir = self.sorting.direction.as_str(), "table: root query");
                metrics::counter!("table_root_queries_total", 1u64);
                self.root_ref_id = request.ref_id.clone();
                self.state = TableState::RootLoading;
                self.cycle_started = Some(Instant::now());
                self.error = None;
                self.touch();
                Ok(RootTicket { gen: self.root_gen, request })
            }
            Err(e) => {
                self.fail(e.clone());
                Err(e)
            }
        }
    }

    /// Apply a discovery result. Returns the enrichment batch to run, if any.
    pub fn complete_root(&mut self, gen: u64, result: ApiResult<QueryResponse>) -> Option<RowTicket> {
        if gen != self.root_gen {
            debug!(gen, current = self.root_gen, "table: stale root result dropped");
            metrics::counter!("table_stale_results_total", 1u64);
            return None;
        }
        let response = match result {
            Ok(r) => r,
            Err(e) => {
                let ref_id = self.root_ref_id.clone();
                self.fail(TableError::query_failed(&ref_id, &e));
                return None;
            }
        };

        self.state = TableState::RootLoaded;
        let mut seen = FxHashSet::default();
        let mut rows = Vec::with_capacity(response.series.len());
        for series in &response.series {
            let Some(data) = self.delegate.parse_row(series) else {
                warn!(labels = ?series.labels, "table: discovery series without entity key skipped");
                continue;
            };
            let id = self.delegate.create_row_id(&data);
            if seen.insert(id.clone()) {
                rows.push(Row { id, data });
            }
        }
        self.rows = rows;
        self.expanded.retain(|id, _| seen.contains(id));
        self.row_error = None;
        self.sort_local();
        info!(gen, rows = self.rows.len(), "table: root loaded");

        if self.rows.is_empty() {
            self.settle(TableState::Ready);
            return None;
        }

        let data: Vec<R> = self.rows.iter().map(|r| r.data.clone()).collect();
        match self.builder.row_queries(&data, &self.vars) {
            Ok(requests) => {
                self.row_gen += 1;
                self.state = TableState::RowLoading;
                metrics::counter!("table_row_batches_total", 1u64);
                debug!(gen = self.row_gen, queries = requests.len(), "table: row batch");
                self.touch();
                Some(RowTicket { gen: self.row_gen, requests })
            }
            Err(e) => {
                self.fail(e);
                None
            }
        }
    }

    /// Apply a settled enrichment batch: `(ref_id, result)` per request.
    pub fn complete_rows(&mut self, gen: u64, results: Vec<(String, ApiResult<QueryResponse>)>) {
        if gen != self.row_gen || self.state != TableState::RowLoading {
            debug!(gen, current = self.row_gen, "table: stale row batch dropped");
            metrics::counter!("table_stale_results_total", 1u64);
            return;
        }
        let mut merged = QueryResults::new();
        let mut failures = Vec::new();
        for (ref_id, result) in results {
            match result {
                Ok(resp) => merged.insert(ref_id, resp.series),
                Err(e) => failures.push(TableError::query_failed(&ref_id, &e)),
            }
        }
        for row in self.rows.iter_mut() {
            self.delegate.map_async_data(&mut row.data, &merged);
        }
        if let Some(first) = failures.into_iter().next() {
            warn!(error = %first, "table: enrichment incomplete");
            metrics::counter!("table_query_failures_total", 1u64);
            self.row_error = Some(first);
        }
        self.sort_local();
        info!(gen = self.root_gen, rows = self.rows.len(), "table: ready");
        self.settle(TableState::Ready);
    }

    /// Apply a new sorting state. Local columns reorder in place.
    pub fn set_sorting(&mut self, sorting: SortingState) -> SortOutcome {
        let Some(config) = find_column(&self.columns, &sorting.column_id).and_then(|c| c.sorting.clone()) else {
            return SortOutcome::Ignored;
        };
        if !config.enabled {
            return SortOutcome::Ignored;
        }
        self.sorting = sorting;
        self.touch();
        if config.local {
            self.sort_local();
            SortOutcome::Local
        } else {
            SortOutcome::Requery
        }
    }

    /// Same column flips direction; a new column starts at its default direction.
    pub fn toggle_sort(&mut self, column_id: &str) -> SortOutcome {
        let Some(column) = find_column(&self.columns, column_id) else { return SortOutcome::Ignored };
        let next = self.sorting.toggled(column);
        self.set_sorting(next)
    }

    /// Set a variable in the table's own scope. Cached detail content is rebuilt on demand.
    pub fn set_variable(&mut self, name: &str, value: VariableValue) {
        self.vars.set(name, value);
        for detail in self.expanded.values_mut() {
            *detail = None;
        }
        self.touch();
    }

    /// Flip a row's expansion flag. Unknown ids are ignored.
    pub fn toggle_expanded(&mut self, id: &RowId) -> bool {
        if self.expanded.remove(id).is_some() {
            self.touch();
            return false;
        }
        if !self.rows.iter().any(|r| &r.id == id) {
            return false;
        }
        self.expanded.insert(id.clone(), None);
        self.touch();
        true
    }

    /// Detail content of an expanded row, built on first access.
    pub fn expanded_row(&mut self, id: &RowId) -> Option<TableResult<Arc<ExpandedRow>>> {
        if let Some(Some(detail)) = self.expanded.get(id) {
            return Some(Ok(detail.clone()));
        }
        if !self.expanded.contains_key(id) {
            return None;
        }
        let row = self.rows.iter().find(|r| &r.id == id)?;
        let built = self.delegate.build_expanded_row(&row.data, &self.vars).map(Arc::new);
        if let Ok(detail) = &built {
            self.expanded.insert(id.clone(), Some(detail.clone()));
            self.touch();
        }
        Some(built)
    }

    fn sort_local(&mut self) {
        let Some(column) = find_column(&self.columns, &self.sorting.column_id) else { return };
        let Some(config) = column.sorting.as_ref().filter(|c| c.enabled && c.local) else { return };
        let sort_type = config.sort_type;
        let column_id = self.sorting.column_id.clone();
        let direction = self.sorting.direction;
        let delegate = self.delegate.clone();
        self.rows.sort_by(|a, b| {
            let ord = delegate
                .sort_value(&a.data, &column_id)
                .compare(&delegate.sort_value(&b.data, &column_id), sort_type)
                .then_with(|| a.id.cmp(&b.id));
            match direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });
    }

    pub fn snapshot(&self) -> TableSnapshot<R> {
        TableSnapshot {
            epoch: self.epoch,
            generation: self.root_gen,
            state: self.state,
            sorting: self.sorting.clone(),
            rows: self
                .rows
                .iter()
                .map(|r| {
                    let detail = self.expanded.get(&r.id);
                    SnapshotRow {
                        id: r.id.clone(),
                        data: r.data.clone(),
                        expanded: detail.is_some(),
                        detail: detail.cloned().flatten(),
                    }
                })
                .collect(),
            error: self.error.clone(),
            row_error: self.row_error.clone(),
        }
    }
}
