//! Discovery and enrichment queries for workload tables.

use kubeview_api::QueryRequest;
use kubeview_core::columns::{ColumnSortingConfig, SortingState};
use kubeview_core::variables::{resolve_variable, VariableScope};
use kubeview_promql::{Compose, Expr, LabelMatcher, PromQl, Selector};
use kubeview_table::{QueryBuilder, TableResult};
use tracing::debug;

use crate::columns::{ALERTS, REPLICAS};
use crate::rows::WorkloadRow;
use crate::WorkloadKind;

pub const REF_REPLICAS: &str = "replicas";
pub const REF_REPLICAS_READY: &str = "replicas_ready";
pub const REF_ALERTS: &str = "alerts";

/// `max(<replicas metric>{<extra>, cluster="<c>"}) by (<kind>, namespace)`
pub fn replicas_query(kind: WorkloadKind, cluster: &str, extra: Vec<LabelMatcher>) -> Expr {
    PromQl::max(PromQl::metric(kind.replicas_metric()).with_labels(extra).with_label_equals("cluster", cluster))
        .by(&[kind.label(), "namespace"])
}

pub fn replicas_ready_query(kind: WorkloadKind, cluster: &str, extra: Vec<LabelMatcher>) -> Expr {
    PromQl::max(PromQl::metric(kind.ready_metric()).with_labels(extra).with_label_equals("cluster", cluster))
        .by(&[kind.label(), "namespace"])
}

/// Firing alerts joined with their `ALERTS_FOR_STATE` series.
pub fn alerts_query(cluster: &str, extra: Vec<LabelMatcher>) -> Expr {
    let firing = PromQl::metric("ALERTS")
        .with_label_equals("alertstate", "firing")
        .with_labels(extra.clone())
        .with_label_equals("cluster", cluster);
    let for_state = PromQl::metric("ALERTS_FOR_STATE").with_labels(extra).with_label_equals("cluster", cluster);
    firing.multiply().ignoring(&["alertstate"]).group_right(&["alertstate"]).with_expression(for_state)
}

/// Pipe-joined alternation over row names. Names are not regex-escaped.
pub fn row_name_regex(rows: &[WorkloadRow]) -> String {
    rows.iter().map(|r| r.name.as_str()).collect::<Vec<_>>().join("|")
}

#[derive(Debug, Clone)]
pub struct WorkloadQueryBuilder {
    kind: WorkloadKind,
}

impl WorkloadQueryBuilder {
    pub fn new(kind: WorkloadKind) -> Self { Self { kind } }

    pub fn kind(&self) -> WorkloadKind { self.kind }

    /// `group(<created>{cluster, namespace=~, <kind>=~".*<search>.*"}) by (<kind>, namespace)`
    pub fn discovery(&self, vars: &VariableScope) -> TableResult<Expr> {
        let cluster = resolve_variable(vars, "cluster")?.text();
        let namespace = resolve_variable(vars, "namespace")?.regex();
        let search = resolve_variable(vars, "search")?.text();
        let selector: Selector = PromQl::metric(self.kind.created_metric())
            .with_label_equals("cluster", &cluster)
            .with_label_matches("namespace", &namespace)
            .with_label_matches(self.kind.label(), &format!(".*{}.*", search));
        Ok(PromQl::group(selector).by(&[self.kind.label(), "namespace"]))
    }

    /// Aggregate the backend ranks by for a remote sort column.
    fn sort_target(&self, column_id: &str, cluster: &str) -> Option<Expr> {
        match column_id {
            REPLICAS => Some(replicas_query(self.kind, cluster, Vec::new())),
            ALERTS => {
                let keyed = vec![LabelMatcher::not_equals(self.kind.label(), "")];
                Some(PromQl::count(alerts_query(cluster, keyed)).by(&["namespace", self.kind.label()]))
            }
            _ => None,
        }
    }
}

impl QueryBuilder for WorkloadQueryBuilder {
    type Row = WorkloadRow;

    fn root_query(
        &self,
        vars: &VariableScope,
        sorting: &SortingState,
        config: Option<&ColumnSortingConfig>,
    ) -> TableResult<QueryRequest> {
        let base = self.discovery(vars)?;
        let remote = config.map(|c| c.enabled && !c.local).unwrap_or(false);
        let expr = if remote {
            let cluster = resolve_variable(vars, "cluster")?.text();
            match self.sort_target(&sorting.column_id, &cluster) {
                // Entities missing from the target survive via the zero-filled copy of the base.
                Some(target) => PromQl::sort(
                    sorting.direction,
                    base.clone()
                        .multiply()
                        .on(&["namespace", self.kind.label()])
                        .group_right(&[])
                        .with_expression(target)
                        .or()
                        .with_expression(base.multiply().with_scalar(0.0)),
                ),
                None => base,
            }
        } else {
            base
        };
        debug!(kind = %self.kind, remote, "workloads: discovery query built");
        Ok(QueryRequest::instant_table(self.kind.plural(), expr.stringify()))
    }

    fn row_queries(&self, rows: &[WorkloadRow], vars: &VariableScope) -> TableResult<Vec<QueryRequest>> {
        let cluster = resolve_variable(vars, "cluster")?.text();
        let ids = row_name_regex(rows);
        let scoped = || {
            let mut m = vec![LabelMatcher::matches(self.kind.label(), ids.clone())];
            // `=~""` alone also selects series without the label.
            if rows.is_empty() {
                m.push(LabelMatcher::not_equals(self.kind.label(), ""));
            }
            m
        };
        Ok(vec![
            QueryRequest::instant_table(REF_REPLICAS, replicas_query(self.kind, &cluster, scoped()).stringify()),
            QueryRequest::instant_table(REF_REPLICAS_READY, replicas_ready_query(self.kind, &cluster, scoped()).stringify()),
            QueryRequest::instant_table(REF_ALERTS, alerts_query(&cluster, scoped()).stringify()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::table_scope;
    use kubeview_core::columns::{find_column, SortDirection};
    use kubeview_core::variables::{Variable, VariableValue};
    use std::sync::Arc;

    fn vars() -> VariableScope {
        let top = Arc::new(VariableScope::new().with("cluster", Variable::new("prod")));
        table_scope(top)
    }

    #[test]
    fn discovery_filters_by_cluster_namespace_and_search() {
        let b = WorkloadQueryBuilder::new(WorkloadKind::DaemonSet);
        let mut v = vars();
        v.set("search", "fluent");
        let q = b.root_query(&v, &crate::default_sorting(), None).unwrap();
        assert_eq!(q.ref_id, "daemonsets");
        assert_eq!(
            q.expr,
            r#"group(kube_daemonset_created{cluster="prod", namespace=~".*", daemonset=~".*fluent.*"}) by (daemonset, namespace)"#
        );
    }

    #[test]
    fn multi_namespace_selection_becomes_alternation() {
        let b = WorkloadQueryBuilder::new(WorkloadKind::Deployment);
        let mut v = vars();
        v.set("namespace", VariableValue::Multi(vec!["a".into(), "b".into()]));
        let q = b.root_query(&v, &crate::default_sorting(), None).unwrap();
        assert!(q.expr.contains(r#"namespace=~"a|b""#));
    }

    #[test]
    fn remote_replicas_sort_zero_fills_and_wraps_in_sort() {
        let b = WorkloadQueryBuilder::new(WorkloadKind::StatefulSet);
        let cols = crate::columns_for(WorkloadKind::StatefulSet);
        let sorting = SortingState::new(REPLICAS, SortDirection::Desc);
        let cfg = find_column(&cols, REPLICAS).and_then(|c| c.sorting.as_ref());
        let q = b.root_query(&vars(), &sorting, cfg).unwrap();
        let base = r#"group(kube_statefulset_created{cluster="prod", namespace=~".*", statefulset=~".*.*"}) by (statefulset, namespace)"#;
        let expected = format!(
            r#"sort_desc(({base} * on(namespace, statefulset) group_right() max(kube_statefulset_status_replicas{{cluster="prod"}}) by (statefulset, namespace)) or ({base} * 0))"#
        );
        assert_eq!(q.expr, expected);
    }

    #[test]
    fn remote_alerts_sort_counts_keyed_alerts() {
        let b = WorkloadQueryBuilder::new(WorkloadKind::StatefulSet);
        let cols = crate::columns_for(WorkloadKind::StatefulSet);
        let cfg = find_column(&cols, ALERTS).and_then(|c| c.sorting.as_ref());
        let q = b.root_query(&vars(), &SortingState::new(ALERTS, SortDirection::Asc), cfg).unwrap();
        assert!(q.expr.starts_with("sort(("));
        assert!(q.expr.contains(
            r#"count(ALERTS{alertstate="firing", statefulset!="", cluster="prod"} * ignoring(alertstate) group_right(alertstate) ALERTS_FOR_STATE{statefulset!="", cluster="prod"}) by (namespace, statefulset)"#
        ));
    }

    #[test]
    fn local_sort_config_leaves_discovery_unsorted() {
        let b = WorkloadQueryBuilder::new(WorkloadKind::DaemonSet);
        let cols = crate::columns_for(WorkloadKind::DaemonSet);
        let cfg = find_column(&cols, REPLICAS).and_then(|c| c.sorting.as_ref());
        let q = b.root_query(&vars(), &SortingState::new(REPLICAS, SortDirection::Desc), cfg).unwrap();
        assert!(q.expr.starts_with("group("));
    }

    #[test]
    fn enrichment_queries_are_scoped_to_rows() {
        let b = WorkloadQueryBuilder::new(WorkloadKind::StatefulSet);
        let rows = vec![WorkloadRow::new("ns1", "web"), WorkloadRow::new("ns2", "db")];
        let qs = b.row_queries(&rows, &vars()).unwrap();
        let ids: Vec<&str> = qs.iter().map(|q| q.ref_id.as_str()).collect();
        assert_eq!(ids, vec!["replicas", "replicas_ready", "alerts"]);
        assert_eq!(qs[0].expr, r#"max(kube_statefulset_status_replicas{statefulset=~"web|db", cluster="prod"}) by (statefulset, namespace)"#);
        assert_eq!(qs[1].expr, r#"max(kube_statefulset_status_replicas_ready{statefulset=~"web|db", cluster="prod"}) by (statefulset, namespace)"#);
        assert_eq!(
            qs[2].expr,
            r#"ALERTS{alertstate="firing", statefulset=~"web|db", cluster="prod"} * ignoring(alertstate) group_right(alertstate) ALERTS_FOR_STATE{statefulset=~"web|db", cluster="prod"}"#
        );
    }

    #[test]
    fn missing_cluster_is_variable_not_found() {
        let b = WorkloadQueryBuilder::new(WorkloadKind::DaemonSet);
        let v = table_scope(Arc::new(VariableScope::new()));
        let err = b.root_query(&v, &crate::default_sorting(), None).unwrap_err();
        assert_eq!(err, kubeview_table::TableError::VariableNotFound("cluster".into()));
        assert!(b.row_queries(&[], &v).is_err());
    }

    #[test]
    fn all_namespaces_use_all_value() {
        let mut v = vars();
        v.set("namespace", VariableValue::All);
        let q = WorkloadQueryBuilder::new(WorkloadKind::Deployment).discovery(&v).unwrap();
        assert!(q.stringify().contains(r#"namespace=~".*""#));
    }
}
