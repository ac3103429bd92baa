use kubeview_core::columns::{col, ColumnSortingConfig, ColumnSpec, SortType};

use crate::WorkloadKind;

pub const NAME: &str = "name";
pub const NAMESPACE: &str = "namespace";
pub const REPLICAS: &str = "replicas";
pub const ALERTS: &str = "alerts";

pub fn columns_for(kind: WorkloadKind) -> Vec<ColumnSpec> {
    let metric = |t| if kind.remote_sort() { ColumnSortingConfig::remote(t) } else { ColumnSortingConfig::local(t) };
    vec![
        col(NAME, kind_header(kind), Some(ColumnSortingConfig::local(SortType::Label))),
        col(NAMESPACE, "NAMESPACE", Some(ColumnSortingConfig::local(SortType::Label))),
        col(REPLICAS, "REPLICAS", Some(metric(SortType::Value))),
        col(ALERTS, "ALERTS", Some(metric(SortType::Value))),
    ]
}

fn kind_header(kind: WorkloadKind) -> &'static str {
    match kind {
        WorkloadKind::DaemonSet => "DAEMONSET",
        WorkloadKind::Deployment => "DEPLOYMENT",
        WorkloadKind::StatefulSet => "STATEFULSET",
    }
}
