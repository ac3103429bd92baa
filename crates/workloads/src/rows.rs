//! Workload rows and the callbacks that build and enrich them.

use kubeview_core::columns::SortValue;
use kubeview_core::series::{count_matching_series, get_series_value, QueryResults, Series, SeriesMatcher};
use kubeview_core::variables::VariableScope;
use kubeview_core::RowId;
use kubeview_table::{ExpandedRow, RowDelegate, TableResult};
use serde::{Deserialize, Serialize};

use crate::columns::{ALERTS, NAME, NAMESPACE, REPLICAS};
use crate::queries::{REF_ALERTS, REF_REPLICAS, REF_REPLICAS_READY};
use crate::{detail, WorkloadKind};

/// `None` fields are unknown, which is distinct from `0`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Replicas {
    pub total: Option<f64>,
    pub ready: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadRow {
    pub namespace: String,
    pub name: String,
    pub replicas: Replicas,
    /// Firing alert series for this workload.
    pub alerts: Option<usize>,
}

impl WorkloadRow {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self { namespace: namespace.to_string(), name: name.to_string(), replicas: Replicas::default(), alerts: None }
    }
}

#[derive(Debug, Clone)]
pub struct WorkloadDelegate {
    kind: WorkloadKind,
}

impl WorkloadDelegate {
    pub fn new(kind: WorkloadKind) -> Self { Self { kind } }

    /// Matches series carrying this row's namespace and entity key.
    pub fn matcher(&self, row: &WorkloadRow) -> SeriesMatcher {
        SeriesMatcher::new().field("namespace", &row.namespace).field(self.kind.label(), &row.name)
    }
}

impl RowDelegate for WorkloadDelegate {
    type Row = WorkloadRow;

    fn parse_row(&self, series: &Series) -> Option<WorkloadRow> {
        Some(WorkloadRow::new(series.label("namespace")?, series.label(self.kind.label())?))
    }

    fn create_row_id(&self, row: &WorkloadRow) -> RowId { RowId::namespaced(&row.namespace, &row.name) }

    // Result sets that did not arrive leave the field as it was.
    fn map_async_data(&self, row: &mut WorkloadRow, results: &QueryResults) {
        let m = self.matcher(row);
        if results.contains(REF_REPLICAS) {
            row.replicas.total = get_series_value(results, REF_REPLICAS, &m);
        }
        if results.contains(REF_REPLICAS_READY) {
            row.replicas.ready = get_series_value(results, REF_REPLICAS_READY, &m);
        }
        if results.contains(REF_ALERTS) {
            row.alerts = count_matching_series(results, REF_ALERTS, &m);
        }
    }

    fn build_expanded_row(&self, row: &WorkloadRow, vars: &VariableScope) -> TableResult<ExpandedRow> {
        detail::expanded_row(self.kind, row, vars)
    }

    fn sort_value(&self, row: &WorkloadRow, column_id: &str) -> SortValue {
        match column_id {
            NAME => SortValue::Label(row.name.clone()),
            NAMESPACE => SortValue::Label(row.namespace.clone()),
            REPLICAS => SortValue::Value(row.replicas.total),
            ALERTS => SortValue::Value(row.alerts.map(|n| n as f64)),
            _ => SortValue::Value(None),
        }
    }
}
