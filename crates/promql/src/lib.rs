//! kubeview PromQL builder: compositional construction of query expressions.
//!
//! Every builder call consumes its input and returns a new node, so a base
//! expression reused in several branches is cloned explicitly rather than aliased.
//!
//! ```
//! use kubeview_promql::PromQl;
//!
//! let q = PromQl::max(
//!     PromQl::metric("kube_statefulset_status_replicas").with_label_equals("cluster", "prod"),
//! )
//! .by(&["statefulset", "namespace"]);
//! assert_eq!(
//!     q.stringify(),
//!     r#"max(kube_statefulset_status_replicas{cluster="prod"}) by (statefulset, namespace)"#
//! );
//! ```

#![forbid(unsafe_code)]

mod expr;

pub use expr::{
    AggregateOp, Aggregation, BinaryBuilder, BinaryOp, Compose, Expr, GroupModifier, Grouping, LabelList,
    LabelMatcher, MatchOp, Matching, Selector, VectorMatching,
};

use kubeview_core::columns::SortDirection;

/// Entry points of the builder.
pub struct PromQl;

impl PromQl {
    pub fn metric(name: &str) -> Selector { Selector::new(name) }

    pub fn sum(expr: impl Into<Expr>) -> Aggregation { Self::aggregate(AggregateOp::Sum, expr) }
    pub fn max(expr: impl Into<Expr>) -> Aggregation { Self::aggregate(AggregateOp::Max, expr) }
    pub fn min(expr: impl Into<Expr>) -> Aggregation { Self::aggregate(AggregateOp::Min, expr) }
    pub fn avg(expr: impl Into<Expr>) -> Aggregation { Self::aggregate(AggregateOp::Avg, expr) }
    pub fn count(expr: impl Into<Expr>) -> Aggregation { Self::aggregate(AggregateOp::Count, expr) }
    pub fn group(expr: impl Into<Expr>) -> Aggregation { Self::aggregate(AggregateOp::Group, expr) }

    pub fn aggregate(op: AggregateOp, expr: impl Into<Expr>) -> Aggregation {
        Aggregation { op, expr: Box::new(expr.into()) }
    }

    /// `sort(...)` for ascending, `sort_desc(...)` for descending.
    pub fn sort(direction: SortDirection, expr: impl Into<Expr>) -> Expr {
        Expr::Sort { direction, expr: Box::new(expr.into()) }
    }

    pub fn scalar(v: f64) -> Expr { Expr::Scalar(v) }
}
