//! Immutable PromQL AST nodes and their string form.

use std::fmt;

use kubeview_core::columns::SortDirection;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub type LabelList = SmallVec<[String; 4]>;

fn label_list(labels: &[&str]) -> LabelList { labels.iter().map(|s| s.to_string()).collect() }

/// Label matcher types matching Prometheus semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOp {
    /// `=`
    Equals,
    /// `!=`
    NotEquals,
    /// `=~`
    Matches,
    /// `!~`
    NotMatches,
}

impl MatchOp {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchOp::Equals => "=",
            MatchOp::NotEquals => "!=",
            MatchOp::Matches => "=~",
            MatchOp::NotMatches => "!~",
        }
    }
}

/// `label <op> "value"`. Names and values are emitted verbatim, without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMatcher {
    pub label: String,
    pub op: MatchOp,
    pub value: String,
}

impl LabelMatcher {
    pub fn new(label: impl Into<String>, op: MatchOp, value: impl Into<String>) -> Self {
        Self { label: label.into(), op, value: value.into() }
    }
    pub fn equals(label: impl Into<String>, value: impl Into<String>) -> Self { Self::new(label, MatchOp::Equals, value) }
    pub fn not_equals(label: impl Into<String>, value: impl Into<String>) -> Self { Self::new(label, MatchOp::NotEquals, value) }
    pub fn matches(label: impl Into<String>, value: impl Into<String>) -> Self { Self::new(label, MatchOp::Matches, value) }
    pub fn not_matches(label: impl Into<String>, value: impl Into<String>) -> Self { Self::new(label, MatchOp::NotMatches, value) }
}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}\"{}\"", self.label, self.op.as_str(), self.value)
    }
}

/// Metric selector: name plus matchers in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selector {
    pub name: String,
    pub matchers: Vec<LabelMatcher>,
}

impl Selector {
    pub fn new(name: impl Into<String>) -> Self { Self { name: name.into(), matchers: Vec::new() } }

    pub fn with_matcher(mut self, m: LabelMatcher) -> Self {
        self.matchers.push(m);
        self
    }

    pub fn with_label_equals(self, label: &str, value: &str) -> Self { self.with_matcher(LabelMatcher::equals(label, value)) }

    pub fn with_label_not_equals(self, label: &str, value: &str) -> Self { self.with_matcher(LabelMatcher::not_equals(label, value)) }

    pub fn with_label_matches(self, label: &str, regex: &str) -> Self { self.with_matcher(LabelMatcher::matches(label, regex)) }

    pub fn with_label_not_matches(self, label: &str, regex: &str) -> Self { self.with_matcher(LabelMatcher::not_matches(label, regex)) }

    pub fn with_labels<I>(mut self, matchers: I) -> Self
    where
        I: IntoIterator<Item = LabelMatcher>,
    {
        self.matchers.extend(matchers);
        self
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.matchers.is_empty() { return Ok(()); }
        f.write_str("{")?;
        for (i, m) in self.matchers.iter().enumerate() {
            if i > 0 { f.write_str(", ")?; }
            write!(f, "{}", m)?;
        }
        f.write_str("}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateOp { Sum, Max, Min, Avg, Count, Group }

impl AggregateOp {
    pub fn as_str(self) -> &'static str {
        match self {
            AggregateOp::Sum => "sum",
            AggregateOp::Max => "max",
            AggregateOp::Min => "min",
            AggregateOp::Avg => "avg",
            AggregateOp::Count => "count",
            AggregateOp::Group => "group",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grouping {
    By(LabelList),
    Without(LabelList),
}

/// Aggregation awaiting its optional `by`/`without` clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub op: AggregateOp,
    pub expr: Box<Expr>,
}

impl Aggregation {
    pub fn by(self, labels: &[&str]) -> Expr {
        Expr::Aggregate { op: self.op, grouping: Some(Grouping::By(label_list(labels))), expr: self.expr }
    }

    pub fn without(self, labels: &[&str]) -> Expr {
        Expr::Aggregate { op: self.op, grouping: Some(Grouping::Without(label_list(labels))), expr: self.expr }
    }
}

impl From<Aggregation> for Expr {
    fn from(a: Aggregation) -> Self { Expr::Aggregate { op: a.op, grouping: None, expr: a.expr } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp { Mul, Div, Add, Sub, Or, And, Unless }

impl BinaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Unless => "unless",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Matching {
    On(LabelList),
    Ignoring(LabelList),
}

/// `group_left`/`group_right` with the labels injected from the "one" side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupModifier {
    Left(LabelList),
    Right(LabelList),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VectorMatching {
    pub matching: Option<Matching>,
    pub group: Option<GroupModifier>,
}

impl fmt::Display for VectorMatching {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.matching {
            Some(Matching::On(l)) => write!(f, " on({})", l.join(", "))?,
            Some(Matching::Ignoring(l)) => write!(f, " ignoring({})", l.join(", "))?,
            None => {}
        }
        match &self.group {
            Some(GroupModifier::Left(l)) => write!(f, " group_left({})", l.join(", ")),
            Some(GroupModifier::Right(l)) => write!(f, " group_right({})", l.join(", ")),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Selector(Selector),
    Aggregate { op: AggregateOp, grouping: Option<Grouping>, expr: Box<Expr> },
    Binary { op: BinaryOp, left: Box<Expr>, matching: VectorMatching, right: Box<Expr> },
    Scalar(f64),
    Sort { direction: SortDirection, expr: Box<Expr> },
}

impl Expr {
    pub fn is_binary(&self) -> bool { matches!(self, Expr::Binary { .. }) }

    /// Render the node and its subtree as a query string.
    pub fn stringify(&self) -> String { self.to_string() }
}

impl From<Selector> for Expr {
    fn from(s: Selector) -> Self { Expr::Selector(s) }
}

fn write_operand(f: &mut fmt::Formatter<'_>, e: &Expr) -> fmt::Result {
    if e.is_binary() { write!(f, "({})", e) } else { write!(f, "{}", e) }
}

fn write_scalar(f: &mut fmt::Formatter<'_>, v: f64) -> fmt::Result {
    if v.is_infinite() {
        f.write_str(if v > 0.0 { "+Inf" } else { "-Inf" })
    } else {
        write!(f, "{}", v)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Selector(s) => write!(f, "{}", s),
            Expr::Aggregate { op, grouping, expr } => {
                write!(f, "{}({})", op.as_str(), expr)?;
                match grouping {
                    Some(Grouping::By(l)) => write!(f, " by ({})", l.join(", ")),
                    Some(Grouping::Without(l)) => write!(f, " without ({})", l.join(", ")),
                    None => Ok(()),
                }
            }
            Expr::Binary { op, left, matching, right } => {
                write_operand(f, left)?;
                write!(f, " {}{} ", op.as_str(), matching)?;
                write_operand(f, right)
            }
            Expr::Scalar(v) => write_scalar(f, *v),
            Expr::Sort { direction, expr } => match direction {
                SortDirection::Asc => write!(f, "sort({})", expr),
                SortDirection::Desc => write!(f, "sort_desc({})", expr),
            },
        }
    }
}

/// Binary expression under construction: operator and left side fixed,
/// vector matching optional, right side attached last.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryBuilder {
    op: BinaryOp,
    left: Expr,
    matching: VectorMatching,
}

impl BinaryBuilder {
    pub fn new(left: Expr, op: BinaryOp) -> Self { Self { op, left, matching: VectorMatching::default() } }

    pub fn on(mut self, labels: &[&str]) -> Self {
        self.matching.matching = Some(Matching::On(label_list(labels)));
        self
    }

    pub fn ignoring(mut self, labels: &[&str]) -> Self {
        self.matching.matching = Some(Matching::Ignoring(label_list(labels)));
        self
    }

    pub fn group_left(mut self, labels: &[&str]) -> Self {
        self.matching.group = Some(GroupModifier::Left(label_list(labels)));
        self
    }

    pub fn group_right(mut self, labels: &[&str]) -> Self {
        self.matching.group = Some(GroupModifier::Right(label_list(labels)));
        self
    }

    pub fn with_expression(self, right: impl Into<Expr>) -> Expr {
        Expr::Binary { op: self.op, left: Box::new(self.left), matching: self.matching, right: Box::new(right.into()) }
    }

    pub fn with_scalar(self, v: f64) -> Expr { self.with_expression(Expr::Scalar(v)) }
}

/// Binary composition starters for every node that converts into an [`Expr`].
pub trait Compose: Into<Expr> + Sized {
    fn multiply(self) -> BinaryBuilder { BinaryBuilder::new(self.into(), BinaryOp::Mul) }
    fn divide(self) -> BinaryBuilder { BinaryBuilder::new(self.into(), BinaryOp::Div) }
    fn add(self) -> BinaryBuilder { BinaryBuilder::new(self.into(), BinaryOp::Add) }
    fn subtract(self) -> BinaryBuilder { BinaryBuilder::new(self.into(), BinaryOp::Sub) }
    fn or(self) -> BinaryBuilder { BinaryBuilder::new(self.into(), BinaryOp::Or) }
    fn and(self) -> BinaryBuilder { BinaryBuilder::new(self.into(), BinaryOp::And) }
    fn unless(self) -> BinaryBuilder { BinaryBuilder::new(self.into(), BinaryOp::Unless) }
}

impl Compose for Expr {}
impl Compose for Selector {}
impl Compose for Aggregation {}
