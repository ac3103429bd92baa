//! kubeview workload tables: DaemonSets, Deployments and StatefulSets over kube-state-metrics.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use kubeview_core::columns::{SortDirection, SortingState};
use kubeview_core::variables::VariableScope;
use kubeview_table::AsyncTable;
use serde::{Deserialize, Serialize};

pub mod columns;
pub mod detail;
pub mod queries;
pub mod rows;
pub mod variables;

pub use columns::columns_for;
pub use queries::WorkloadQueryBuilder;
pub use rows::{Replicas, WorkloadDelegate, WorkloadRow};
pub use variables::TopLevelVariableSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    DaemonSet,
    Deployment,
    StatefulSet,
}

impl WorkloadKind {
    pub const ALL: [WorkloadKind; 3] = [WorkloadKind::DaemonSet, WorkloadKind::Deployment, WorkloadKind::StatefulSet];

    /// Entity key label on kube-state-metrics series.
    pub fn label(self) -> &'static str {
        match self {
            WorkloadKind::DaemonSet => "daemonset",
            WorkloadKind::Deployment => "deployment",
            WorkloadKind::StatefulSet => "statefulset",
        }
    }

    /// `refId` of the discovery query.
    pub fn plural(self) -> &'static str {
        match self {
            WorkloadKind::DaemonSet => "daemonsets",
            WorkloadKind::Deployment => "deployments",
            WorkloadKind::StatefulSet => "statefulsets",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            WorkloadKind::DaemonSet => "DaemonSet",
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::StatefulSet => "StatefulSet",
        }
    }

    pub fn created_metric(self) -> &'static str {
        match self {
            WorkloadKind::DaemonSet => "kube_daemonset_created",
            WorkloadKind::Deployment => "kube_deployment_created",
            WorkloadKind::StatefulSet => "kube_statefulset_created",
        }
    }

    /// Desired/total replica count.
    pub fn replicas_metric(self) -> &'static str {
        match self {
            WorkloadKind::DaemonSet => "kube_daemonset_status_desired_number_scheduled",
            WorkloadKind::Deployment => "kube_deployment_status_replicas",
            WorkloadKind::StatefulSet => "kube_statefulset_status_replicas",
        }
    }

    pub fn ready_metric(self) -> &'static str {
        match self {
            WorkloadKind::DaemonSet => "kube_daemonset_status_number_ready",
            WorkloadKind::Deployment => "kube_deployment_status_replicas_ready",
            WorkloadKind::StatefulSet => "kube_statefulset_status_replicas_ready",
        }
    }

    /// Replica and alert columns sort on the backend.
    pub fn remote_sort(self) -> bool { matches!(self, WorkloadKind::StatefulSet) }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.label()) }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("unknown workload kind: {0} (expected daemonsets, deployments or statefulsets)")]
pub struct UnknownKind(pub String);

impl FromStr for WorkloadKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ds" | "daemonset" | "daemonsets" => Ok(WorkloadKind::DaemonSet),
            "deploy" | "deployment" | "deployments" => Ok(WorkloadKind::Deployment),
            "sts" | "statefulset" | "statefulsets" => Ok(WorkloadKind::StatefulSet),
            _ => Err(UnknownKind(s.to_string())),
        }
    }
}

/// Default sorting of every workload table: name ascending.
pub fn default_sorting() -> SortingState { SortingState::new(columns::NAME, SortDirection::Asc) }

/// Workload table with its own variable scope (`namespace`, `search`) under `top`.
pub fn workload_table(kind: WorkloadKind, top: Arc<VariableScope>) -> AsyncTable<WorkloadRow> {
    let builder: Arc<WorkloadQueryBuilder> = Arc::new(WorkloadQueryBuilder::new(kind));
    let delegate: Arc<WorkloadDelegate> = Arc::new(WorkloadDelegate::new(kind));
    AsyncTable::new(columns_for(kind), builder, delegate, variables::table_scope(top), default_sorting())
}

pub fn daemonsets_table(top: Arc<VariableScope>) -> AsyncTable<WorkloadRow> { workload_table(WorkloadKind::DaemonSet, top) }

pub fn deployments_table(top: Arc<VariableScope>) -> AsyncTable<WorkloadRow> { workload_table(WorkloadKind::Deployment, top) }

pub fn statefulsets_table(top: Arc<VariableScope>) -> AsyncTable<WorkloadRow> { workload_table(WorkloadKind::StatefulSet, top) }
