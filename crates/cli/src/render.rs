//! Human and JSON rendering of table snapshots.

use kubeview_api::QueryResponse;
use kubeview_core::columns::SortingState;
use kubeview_core::RowId;
use kubeview_table::{TableError, TableSnapshot, TableState};
use kubeview_workloads::{Replicas, WorkloadKind, WorkloadRow};
use serde::Serialize;

fn num(v: Option<f64>) -> String {
    match v {
        Some(v) if v.fract() == 0.0 => format!("{}", v as i64),
        Some(v) => format!("{:.2}", v),
        None => "?".to_string(),
    }
}

/// `ready/total`, `?` for unknown parts.
pub fn replicas_cell(r: &Replicas) -> String { format!("{}/{}", num(r.ready), num(r.total)) }

pub fn alerts_cell(alerts: Option<usize>) -> String { alerts.map(|n| n.to_string()).unwrap_or_else(|| "?".into()) }

pub fn render_human(kind: WorkloadKind, snap: &TableSnapshot<WorkloadRow>) -> String {
    let mut out = String::new();
    if let Some(err) = &snap.error {
        out.push_str(&format!("error: {}\n", err));
        return out;
    }
    let name_w = snap.rows.iter().map(|r| r.data.name.len()).max().unwrap_or(0).max(kind.title().len()).max(4);
    let ns_w = snap.rows.iter().map(|r| r.data.namespace.len()).max().unwrap_or(0).max(9);
    out.push_str(&format!("{:<ns_w$}  {:<name_w$}  {:<9}  {}\n", "NAMESPACE", kind.title().to_uppercase(), "REPLICAS", "ALERTS"));
    if snap.rows.is_empty() && snap.state == TableState::Ready {
        out.push_str(&format!("(no {} found)\n", kind.plural()));
    }
    for row in &snap.rows {
        let marker = if row.expanded { "▾ " } else { "" };
        out.push_str(&format!(
            "{:<ns_w$}  {:<name_w$}  {:<9}  {}\n",
            row.data.namespace,
            format!("{}{}", marker, row.data.name),
            replicas_cell(&row.data.replicas),
            alerts_cell(row.data.alerts),
        ));
    }
    if let Some(err) = &snap.row_error {
        out.push_str(&format!("note: some values are unavailable ({})\n", err));
    }
    out
}

pub fn render_detail(title: &str, panels: &[(String, QueryResponse)]) -> String {
    let mut out = format!("\n{}\n", title);
    for (panel, resp) in panels {
        out.push_str(&format!("  {} [{}]\n", panel, resp.ref_id));
        if resp.series.is_empty() {
            out.push_str("    (no data)\n");
        }
        for s in &resp.series {
            let labels: Vec<String> = s.labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            out.push_str(&format!("    {{{}}} {}\n", labels.join(", "), num(s.value())));
        }
    }
    out
}

#[derive(Serialize)]
struct JsonRow<'a> {
    id: &'a RowId,
    namespace: &'a str,
    name: &'a str,
    replicas: Replicas,
    alerts: Option<usize>,
    expanded: bool,
}

#[derive(Serialize)]
struct JsonTable<'a> {
    kind: WorkloadKind,
    state: TableState,
    sorting: &'a SortingState,
    rows: Vec<JsonRow<'a>>,
    error: Option<&'a TableError>,
    row_error: Option<&'a TableError>,
}

pub fn render_json(kind: WorkloadKind, snap: &TableSnapshot<WorkloadRow>) -> serde_json::Result<String> {
    let table = JsonTable {
        kind,
        state: snap.state,
        sorting: &snap.sorting,
        rows: snap
            .rows
            .iter()
            .map(|r| JsonRow {
                id: &r.id,
                namespace: &r.data.namespace,
                name: &r.data.name,
                replicas: r.data.replicas,
                alerts: r.data.alerts,
                expanded: r.expanded,
            })
            .collect(),
        error: snap.error.as_ref(),
        row_error: snap.row_error.as_ref(),
    };
    serde_json::to_string_pretty(&table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubeview_table::SnapshotRow;

    fn snap(rows: Vec<WorkloadRow>) -> TableSnapshot<WorkloadRow> {
        TableSnapshot {
            state: TableState::Ready,
            rows: rows
                .into_iter()
                .map(|r| SnapshotRow { id: RowId::namespaced(&r.namespace, &r.name), data: r, expanded: false, detail: None })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn unknown_values_render_as_question_marks() {
        assert_eq!(replicas_cell(&Replicas { total: Some(3.0), ready: None }), "?/3");
        assert_eq!(replicas_cell(&Replicas { total: Some(0.0), ready: Some(0.0) }), "0/0");
        assert_eq!(alerts_cell(None), "?");
        assert_eq!(alerts_cell(Some(2)), "2");
    }

    #[test]
    fn discovery_error_replaces_the_body() {
        let mut s = snap(vec![WorkloadRow::new("ns1", "a")]);
        s.state = TableState::Error;
        s.error = Some(TableError::QueryExecutionFailed { ref_id: "daemonsets".into(), message: "transport: refused".into() });
        let out = render_human(WorkloadKind::DaemonSet, &s);
        assert_eq!(out, "error: query daemonsets failed: transport: refused\n");
    }

    #[test]
    fn enrichment_error_adds_footer() {
        let mut s = snap(vec![WorkloadRow::new("ns1", "a")]);
        s.row_error = Some(TableError::QueryExecutionFailed { ref_id: "alerts".into(), message: "x".into() });
        let out = render_human(WorkloadKind::StatefulSet, &s);
        assert!(out.starts_with("NAMESPACE"));
        assert!(out.contains("ns1"));
        assert!(out.contains("?/?"));
        assert!(out.trim_end().ends_with("(query alerts failed: x)"));
    }

    #[test]
    fn empty_table_says_so() {
        let out = render_human(WorkloadKind::Deployment, &snap(vec![]));
        assert!(out.contains("(no deployments found)"));
    }

    #[test]
    fn json_output_carries_ids_and_state() {
        let out = render_json(WorkloadKind::DaemonSet, &snap(vec![WorkloadRow::new("ns1", "a")])).unwrap();
        let v: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["kind"], "daemonset");
        assert_eq!(v["state"], "Ready");
        assert_eq!(v["rows"][0]["id"], "ns1/a");
        assert!(v["rows"][0]["alerts"].is_null());
    }
}
