#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use kubeview_api::{ApiError, MockExecutor, QueryExecutor, QueryRequest};
use kubeview_core::columns::{col, ColumnSortingConfig, SortDirection, SortType, SortValue, SortingState};
use kubeview_core::series::{get_series_value, QueryResults, Series, SeriesMatcher};
use kubeview_core::variables::{resolve_variable, Variable, VariableScope, VariableValue};
use kubeview_core::RowId;
use kubeview_table::prelude::*;

#[derive(Debug, Clone, PartialEq)]
struct Pod {
    ns: String,
    name: String,
    restarts: Option<f64>,
}

struct Pods;

impl QueryBuilder for Pods {
    type Row = Pod;

    fn root_query(&self, vars: &VariableScope, sorting: &SortingState, config: Option<&ColumnSortingConfig>) -> TableResult<QueryRequest> {
        let ns = resolve_variable(vars, "namespace")?.regex();
        let base = format!("group(kube_pod_info{{namespace=~\"{}\"}}) by (namespace, pod)", ns);
        let expr = match config {
            Some(c) if !c.local => format!("sort_{}({})", sorting.direction.as_str(), base),
            _ => base,
        };
        Ok(QueryRequest::instant_table("pods", expr))
    }

    fn row_queries(&self, rows: &[Pod], _vars: &VariableScope) -> TableResult<Vec<QueryRequest>> {
        let ids: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        Ok(vec![QueryRequest::instant_table("restarts", format!("restarts{{pod=~\"{}\"}}", ids.join("|")))])
    }
}

impl RowDelegate for Pods {
    type Row = Pod;

    fn parse_row(&self, s: &Series) -> Option<Pod> {
        Some(Pod { ns: s.label("namespace")?.to_string(), name: s.label("pod")?.to_string(), restarts: None })
    }

    fn create_row_id(&self, row: &Pod) -> RowId { RowId::namespaced(&row.ns, &row.name) }

    fn map_async_data(&self, row: &mut Pod, results: &QueryResults) {
        row.restarts = get_series_value(results, "restarts", &SeriesMatcher::new().field("pod", &row.name));
    }

    fn build_expanded_row(&self, row: &Pod, _vars: &VariableScope) -> TableResult<ExpandedRow> {
        Ok(ExpandedRow {
            title: row.name.clone(),
            panels: vec![DetailPanel {
                title: "Containers".into(),
                request: QueryRequest::instant_table("containers", format!("kube_pod_container_info{{pod=\"{}\"}}", row.name)),
            }],
        })
    }

    fn sort_value(&self, row: &Pod, column_id: &str) -> SortValue {
        match column_id {
            "restarts" => SortValue::Value(row.restarts),
            _ => SortValue::Label(row.name.clone()),
        }
    }
}

fn pod(ns: &str, name: &str) -> Series { Series::new().with_label("namespace", ns).with_label("pod", name).with_value(1.0) }

fn spawn(mock: Arc<MockExecutor>) -> TableHandle<Pod> {
    let columns = vec![
        col("name", "Name", Some(ColumnSortingConfig::local(SortType::Label))),
        col("restarts", "Restarts", Some(ColumnSortingConfig::remote(SortType::Value).with_default_direction(SortDirection::Desc))),
    ];
    let vars = VariableScope::new().with("namespace", Variable::new(VariableValue::All));
    let pods = Arc::new(Pods);
    let table: AsyncTable<Pod> = AsyncTable::new(columns, pods.clone(), pods, vars, SortingState::new("name", SortDirection::Asc));
    let executor: Arc<dyn QueryExecutor> = mock;
    spawn_table(table, executor, 16)
}

async fn settled(handle: &TableHandle<Pod>, gen: u64) -> Arc<TableSnapshot<Pod>> {
    tokio::time::timeout(Duration::from_secs(2), handle.settled_after(gen)).await.expect("table settled").expect("loop alive")
}

async fn until_requests(mock: &MockExecutor, n: usize) {
    for _ in 0..200 {
        if mock.requests().len() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {} requests, saw {}", n, mock.requests().len());
}

#[tokio::test]
async fn refresh_runs_both_phases() {
    let mock = Arc::new(MockExecutor::new());
    mock.respond("pods", vec![pod("ns1", "b"), pod("ns1", "a")]);
    mock.respond("restarts", vec![Series::new().with_label("pod", "a").with_value(4.0)]);
    let handle = spawn(mock.clone());
    assert_eq!(handle.current().state, TableState::Idle);

    assert!(handle.refresh().await);
    let snap = settled(&handle, 1).await;
    assert_eq!(snap.state, TableState::Ready);
    assert_eq!(snap.ids(), vec!["ns1/a", "ns1/b"]);
    assert_eq!(snap.row("ns1/a").unwrap().data.restarts, Some(4.0));
    assert_eq!(snap.row("ns1/b").unwrap().data.restarts, None);

    let reqs = mock.requests();
    assert_eq!(reqs[0].expr, r#"group(kube_pod_info{namespace=~".*"}) by (namespace, pod)"#);
    assert_eq!(reqs[1].expr, r#"restarts{pod=~"a|b"}"#);
    assert!(*handle.subscribe_epoch().borrow() >= snap.epoch);
}

#[tokio::test]
async fn superseded_root_never_reaches_row_phase() {
    let mock = Arc::new(MockExecutor::new());
    let gate = mock.respond_gated("pods", vec![pod("ns1", "old")]);
    mock.respond("pods", vec![pod("ns2", "new")]);
    mock.respond("restarts", vec![]);
    let handle = spawn(mock.clone());

    handle.refresh().await;
    until_requests(&mock, 1).await;
    handle.send(TableCommand::SetVariable { name: "namespace".into(), value: VariableValue::from("ns2") }).await;
    let snap = settled(&handle, 2).await;
    assert_eq!(snap.ids(), vec!["ns2/new"]);

    gate.notify_one();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let after = handle.current();
    assert_eq!(after.ids(), vec!["ns2/new"]);
    assert_eq!(after.state, TableState::Ready);
    let restarts: Vec<_> = mock.requests().into_iter().filter(|r| r.ref_id == "restarts").collect();
    assert_eq!(restarts.len(), 1);
    assert_eq!(restarts[0].expr, r#"restarts{pod=~"new"}"#);
}

#[tokio::test]
async fn remote_sort_toggle_requeries_with_new_direction() {
    let mock = Arc::new(MockExecutor::new());
    mock.respond("pods", vec![pod("ns1", "a")]);
    mock.respond("restarts", vec![]);
    let handle = spawn(mock.clone());

    handle.refresh().await;
    settled(&handle, 1).await;
    handle.send(TableCommand::ToggleSort("restarts".into())).await;
    let snap = settled(&handle, 2).await;
    assert_eq!(snap.sorting, SortingState::new("restarts", SortDirection::Desc));
    handle.send(TableCommand::ToggleSort("restarts".into())).await;
    settled(&handle, 3).await;

    let roots: Vec<String> = mock.requests().into_iter().filter(|r| r.ref_id == "pods").map(|r| r.expr).collect();
    assert_eq!(roots.len(), 3);
    assert!(roots[1].starts_with("sort_desc("));
    assert!(roots[2].starts_with("sort_asc("));
    assert_eq!(roots[1].trim_start_matches("sort_desc"), roots[2].trim_start_matches("sort_asc"));
}

#[tokio::test]
async fn local_sort_does_not_requery() {
    let mock = Arc::new(MockExecutor::new());
    mock.respond("pods", vec![pod("ns1", "a"), pod("ns1", "b")]);
    mock.respond("restarts", vec![]);
    let handle = spawn(mock.clone());
    handle.refresh().await;
    let first = settled(&handle, 1).await;
    let before = mock.requests().len();

    handle.send(TableCommand::ToggleSort("name".into())).await;
    let snap = tokio::time::timeout(Duration::from_secs(2), handle.wait_for(|s| s.epoch > first.epoch))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snap.ids(), vec!["ns1/b", "ns1/a"]);
    assert_eq!(mock.requests().len(), before);
}

#[tokio::test]
async fn expansion_builds_detail_and_survives_refresh() {
    let mock = Arc::new(MockExecutor::new());
    mock.respond("pods", vec![pod("ns1", "a")]);
    mock.respond("restarts", vec![]);
    let handle = spawn(mock.clone());
    handle.refresh().await;
    settled(&handle, 1).await;

    handle.send(TableCommand::ToggleExpanded(RowId::from("ns1/a"))).await;
    let snap = tokio::time::timeout(Duration::from_secs(2), handle.wait_for(|s| s.rows.iter().any(|r| r.expanded)))
        .await
        .unwrap()
        .unwrap();
    let detail = snap.rows[0].detail.clone().expect("detail built");
    assert_eq!(detail.panels[0].request.ref_id, "containers");

    handle.refresh().await;
    let snap = settled(&handle, 2).await;
    assert!(snap.rows[0].expanded);
}

#[tokio::test]
async fn discovery_failure_surfaces_table_error() {
    let mock = Arc::new(MockExecutor::new());
    mock.fail("pods", ApiError::Backend { status: 500, message: "boom".into() });
    let handle = spawn(mock.clone());
    handle.refresh().await;
    let snap = settled(&handle, 1).await;
    assert_eq!(snap.state, TableState::Error);
    assert!(matches!(&snap.error, Some(TableError::QueryExecutionFailed { ref_id, .. }) if ref_id == "pods"));
    assert!(mock.requests().iter().all(|r| r.ref_id == "pods"));
}

#[tokio::test]
async fn shutdown_stops_the_loop() {
    let mock = Arc::new(MockExecutor::new());
    let handle = spawn(mock);
    assert!(handle.send(TableCommand::Shutdown).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!handle.refresh().await);
}
