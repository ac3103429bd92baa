//! Top-level (`datasource`, `cluster`) and per-table (`namespace`, `search`) variables.

use std::sync::Arc;

use kubeview_api::{ApiResult, QueryExecutor};
use kubeview_core::variables::{Variable, VariableScope, VariableValue, DEFAULT_ALL_VALUE};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const DEFAULT_CLUSTER_FILTER: &str = "kube_namespace_status_phase";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopLevelVariableSettings {
    pub datasource: String,
    pub default_datasource: String,
    pub default_cluster: Option<String>,
    /// Metric whose `cluster` label values populate the cluster selector.
    pub cluster_filter: Option<String>,
}

impl Default for TopLevelVariableSettings {
    fn default() -> Self {
        Self {
            datasource: "prometheus".into(),
            default_datasource: "prometheus".into(),
            default_cluster: None,
            cluster_filter: None,
        }
    }
}

impl TopLevelVariableSettings {
    pub fn cluster_filter(&self) -> &str { self.cluster_filter.as_deref().unwrap_or(DEFAULT_CLUSTER_FILTER) }
}

/// Scope with `datasource` and, when known, `cluster`.
pub fn top_level_scope(settings: &TopLevelVariableSettings, cluster: Option<&str>) -> VariableScope {
    let mut scope = VariableScope::new().with("datasource", Variable::new(settings.default_datasource.as_str()));
    if let Some(c) = cluster.or(settings.default_cluster.as_deref()) {
        scope.define("cluster", Variable::new(c));
    }
    scope
}

/// Per-table scope: all namespaces, empty search.
pub fn table_scope(parent: Arc<VariableScope>) -> VariableScope {
    VariableScope::with_parent(parent)
        .with("namespace", Variable::new(VariableValue::All).with_all_value(DEFAULT_ALL_VALUE))
        .with("search", Variable::new(""))
}

/// Options for the `cluster` selector.
pub async fn cluster_options(executor: &dyn QueryExecutor, settings: &TopLevelVariableSettings) -> ApiResult<Vec<String>> {
    executor.label_values(settings.cluster_filter(), "cluster").await
}

/// Options for the `namespace` selector within `cluster`.
pub async fn namespace_options(executor: &dyn QueryExecutor, cluster: &str) -> ApiResult<Vec<String>> {
    let matcher = format!("{}{{cluster=\"{}\"}}", DEFAULT_CLUSTER_FILTER, cluster);
    executor.label_values(&matcher, "namespace").await
}

/// Top-level scope, picking the first available cluster when no default is configured.
/// An unresolvable cluster leaves the variable undefined.
pub async fn load_top_level_scope(executor: &dyn QueryExecutor, settings: &TopLevelVariableSettings) -> VariableScope {
    if settings.default_cluster.is_some() {
        return top_level_scope(settings, None);
    }
    match cluster_options(executor, settings).await {
        Ok(options) => {
            let first = options.first().map(|s| s.as_str());
            info!(clusters = options.len(), selected = ?first, "variables: cluster options loaded");
            top_level_scope(settings, first)
        }
        Err(e) => {
            warn!(error = %e, "variables: cluster options unavailable");
            top_level_scope(settings, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubeview_api::MockExecutor;
    use kubeview_core::variables::resolve_variable;

    #[test]
    fn table_scope_defaults_and_parent_lookup() {
        let settings = TopLevelVariableSettings { default_cluster: Some("prod".into()), ..Default::default() };
        let scope = table_scope(Arc::new(top_level_scope(&settings, None)));
        assert_eq!(resolve_variable(&scope, "cluster").unwrap().text(), "prod");
        assert_eq!(resolve_variable(&scope, "datasource").unwrap().text(), "prometheus");
        assert_eq!(resolve_variable(&scope, "namespace").unwrap().regex(), ".*");
        assert_eq!(resolve_variable(&scope, "search").unwrap().text(), "");
    }

    #[test]
    fn tables_do_not_share_local_state() {
        let top = Arc::new(top_level_scope(&TopLevelVariableSettings::default(), Some("c")));
        let mut a = table_scope(top.clone());
        let b = table_scope(top);
        a.set("search", "x");
        assert_eq!(resolve_variable(&b, "search").unwrap().text(), "");
    }

    #[test]
    fn cluster_filter_defaults() {
        assert_eq!(TopLevelVariableSettings::default().cluster_filter(), "kube_namespace_status_phase");
        let s = TopLevelVariableSettings { cluster_filter: Some("up".into()), ..Default::default() };
        assert_eq!(s.cluster_filter(), "up");
    }

    #[tokio::test]
    async fn first_cluster_is_selected_without_default() {
        let mock = MockExecutor::new();
        mock.with_label_values("cluster", vec!["eu-1".into(), "us-2".into()]);
        let scope = load_top_level_scope(&mock, &TopLevelVariableSettings::default()).await;
        assert_eq!(resolve_variable(&scope, "cluster").unwrap().text(), "eu-1");
    }

    #[tokio::test]
    async fn unavailable_clusters_leave_variable_undefined() {
        let mock = MockExecutor::new();
        let scope = load_top_level_scope(&mock, &TopLevelVariableSettings::default()).await;
        assert!(resolve_variable(&scope, "cluster").is_err());
    }
}
