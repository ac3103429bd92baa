//! Expanded-row detail panels.

use kubeview_api::{QueryRequest, TimeRange};
use kubeview_core::variables::{resolve_variable, VariableScope};
use kubeview_promql::{Expr, PromQl};
use kubeview_table::{DetailPanel, ExpandedRow, TableResult};

use crate::rows::WorkloadRow;
use crate::WorkloadKind;

/// Pods owned by the workload. Deployment pods are owned by their ReplicaSets,
/// which carry the deployment name as a prefix.
pub fn pods_query(kind: WorkloadKind, row: &WorkloadRow, cluster: &str) -> Expr {
    let selector = PromQl::metric("kube_pod_info").with_label_equals("cluster", cluster).with_label_equals("namespace", &row.namespace);
    let selector = match kind {
        WorkloadKind::Deployment => selector
            .with_label_equals("created_by_kind", "ReplicaSet")
            .with_label_matches("created_by_name", &format!("{}.*", row.name)),
        _ => selector.with_label_equals("created_by_kind", kind.title()).with_label_equals("created_by_name", &row.name),
    };
    PromQl::max(selector).by(&["namespace", "pod", "node", "pod_ip"])
}

fn deployment_history(row: &WorkloadRow, cluster: &str, range: TimeRange) -> Vec<DetailPanel> {
    [
        ("unavailable_replicas", "Unavailable", "kube_deployment_status_replicas_unavailable"),
        ("available_replicas", "Available", "kube_deployment_status_replicas_available"),
        ("replicas", "Replicas", "kube_deployment_status_replicas"),
    ]
    .into_iter()
    .map(|(ref_id, title, metric)| {
        let expr = PromQl::max(
            PromQl::metric(metric)
                .with_label_matches("deployment", &row.name)
                .with_label_equals("namespace", &row.namespace)
                .with_label_equals("cluster", cluster),
        )
        .by(&["deployment"]);
        DetailPanel { title: title.to_string(), request: QueryRequest::range(ref_id, expr.stringify(), range) }
    })
    .collect()
}

pub fn expanded_row(kind: WorkloadKind, row: &WorkloadRow, vars: &VariableScope) -> TableResult<ExpandedRow> {
    let cluster = resolve_variable(vars, "cluster")?.text();
    let mut panels = vec![DetailPanel {
        title: "Pods".to_string(),
        request: QueryRequest::instant_table("pods", pods_query(kind, row, &cluster).stringify()),
    }];
    if kind == WorkloadKind::Deployment {
        panels.extend(deployment_history(row, &cluster, TimeRange::default()));
    }
    Ok(ExpandedRow { title: format!("{} {}/{}", kind.title(), row.namespace, row.name), panels })
}
