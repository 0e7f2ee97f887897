//! Query Abstract Syntax Tree
//!
//! Expression tree for the supported query subset: selectors, `rate`,
//! label aggregations and binary arithmetic/comparison.
//!
//! # Example Queries
//!
//! ```text
//! process_open_fds
//! sum(rate(galeb_http_requests_total[1m])) by (virtualhost)
//! jvm_memory_bytes_used{area="heap"} / jvm_memory_bytes_max >= 0
//! ```
//!
//! `Display` renders a canonical form that re-parses to the same tree.

use crate::storage::{MatchOp, Matcher, METRIC_NAME};
use std::fmt;

/// A parsed query expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Number literal
    Number(f64),
    /// Instant vector selector: `name{matchers}`
    Selector(VectorSelector),
    /// Range vector selector: `name{matchers}[5m]`
    Matrix(MatrixSelector),
    /// Function call: `rate(x[1m])`
    Call { func: String, args: Vec<Expr> },
    /// Label aggregation: `sum by (a) (x)`
    Aggregate {
        op: AggregateOp,
        grouping: Option<Grouping>,
        expr: Box<Expr>,
    },
    /// Binary operation
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        /// `bool` modifier on comparisons
        return_bool: bool,
    },
}

/// Static result type of an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Scalar,
    Vector,
    Matrix,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar => write!(f, "scalar"),
            Self::Vector => write!(f, "instant vector"),
            Self::Matrix => write!(f, "range vector"),
        }
    }
}

impl Expr {
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            return_bool: false,
        }
    }

    /// Visit every selector in the tree with the window it reads
    ///
    /// Vector selectors report `None` (they use the engine lookback).
    pub fn for_each_selector<F>(&self, f: &mut F)
    where
        F: FnMut(&VectorSelector, Option<i64>),
    {
        match self {
            Expr::Number(_) => {}
            Expr::Selector(sel) => f(sel, None),
            Expr::Matrix(ms) => f(&ms.selector, Some(ms.range_ms)),
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.for_each_selector(f);
                }
            }
            Expr::Aggregate { expr, .. } => expr.for_each_selector(f),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.for_each_selector(f);
                rhs.for_each_selector(f);
            }
        }
    }
}

/// Label matchers selecting a set of series
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSelector {
    pub matchers: Vec<Matcher>,
}

impl VectorSelector {
    pub fn new(matchers: Vec<Matcher>) -> Self {
        Self { matchers }
    }

    /// Selector for every series of one metric
    pub fn metric(name: impl Into<String>) -> Self {
        Self::new(vec![Matcher::metric_name(name)])
    }

    /// Metric name from an `__name__="..."` matcher
    pub fn metric_name(&self) -> Option<&str> {
        self.matchers
            .iter()
            .find(|m| m.name == METRIC_NAME && m.op == MatchOp::Equal)
            .map(|m| m.value.as_str())
    }
}

impl fmt::Display for VectorSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.metric_name();
        if let Some(name) = name {
            write!(f, "{}", name)?;
        }

        let rest: Vec<&Matcher> = self
            .matchers
            .iter()
            .filter(|m| !(name.is_some() && m.name == METRIC_NAME && m.op == MatchOp::Equal))
            .collect();

        if !rest.is_empty() || name.is_none() {
            write!(f, "{{")?;
            for (i, m) in rest.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", m)?;
            }
            write!(f, "}}")?;
        }
        Ok(())
    }
}

/// Selector reading a trailing window of points
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixSelector {
    pub selector: VectorSelector,
    pub range_ms: i64,
}

/// Aggregation operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    /// Sum of values
    Sum,
    /// Count of values
    Count,
    /// Average of values
    Avg,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
}

impl AggregateOp {
    /// Apply aggregation to a slice of values
    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }

        Some(match self {
            Self::Sum => values.iter().sum(),
            Self::Count => values.len() as f64,
            Self::Avg => values.iter().sum::<f64>() / values.len() as f64,
            Self::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
            Self::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        })
    }

    /// Parse from an identifier
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Some(Self::Sum),
            "count" => Some(Self::Count),
            "avg" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            _ => None,
        }
    }
}

impl fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sum => write!(f, "sum"),
            Self::Count => write!(f, "count"),
            Self::Avg => write!(f, "avg"),
            Self::Min => write!(f, "min"),
            Self::Max => write!(f, "max"),
        }
    }
}

/// `by (...)` or `without (...)` clause of an aggregation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grouping {
    By(Vec<String>),
    Without(Vec<String>),
}

impl fmt::Display for Grouping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (keyword, labels) = match self {
            Grouping::By(labels) => ("by", labels),
            Grouping::Without(labels) => ("without", labels),
        };
        write!(f, "{} ({})", keyword, labels.join(", "))
    }
}

/// Binary operators, highest precedence first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Pow,
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    And,
    Unless,
    Or,
}

impl BinaryOp {
    /// Binding strength; higher binds tighter
    pub fn precedence(&self) -> u8 {
        match self {
            Self::Pow => 6,
            Self::Mul | Self::Div | Self::Mod => 5,
            Self::Add | Self::Sub => 4,
            Self::Eq | Self::Ne | Self::Gt | Self::Lt | Self::Gte | Self::Lte => 3,
            Self::And | Self::Unless => 2,
            Self::Or => 1,
        }
    }

    pub fn is_comparison(&self) -> bool {
        self.precedence() == 3
    }

    /// Arithmetic result, `None` for non-arithmetic operators
    pub fn arithmetic(&self, a: f64, b: f64) -> Option<f64> {
        match self {
            Self::Add => Some(a + b),
            Self::Sub => Some(a - b),
            Self::Mul => Some(a * b),
            Self::Div => Some(a / b),
            Self::Mod => Some(a % b),
            Self::Pow => Some(a.powf(b)),
            _ => None,
        }
    }

    /// Compare two values. NaN never passes.
    pub fn compare(&self, a: f64, b: f64) -> bool {
        if a.is_nan() || b.is_nan() {
            return false;
        }
        match self {
            Self::Eq => a == b,
            Self::Ne => a != b,
            Self::Gt => a > b,
            Self::Lt => a < b,
            Self::Gte => a >= b,
            Self::Lte => a <= b,
            _ => false,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            Self::Pow => "^",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::And => "and",
            Self::Unless => "unless",
            Self::Or => "or",
        };
        write!(f, "{}", token)
    }
}

/// Render milliseconds as a compound duration (`1h30m`, `90s`, `250ms`)
pub fn format_duration(millis: i64) -> String {
    const UNITS: [(&str, i64); 7] = [
        ("y", 365 * 24 * 60 * 60 * 1000),
        ("w", 7 * 24 * 60 * 60 * 1000),
        ("d", 24 * 60 * 60 * 1000),
        ("h", 60 * 60 * 1000),
        ("m", 60 * 1000),
        ("s", 1000),
        ("ms", 1),
    ];

    if millis <= 0 {
        return "0s".to_string();
    }

    let mut rest = millis;
    let mut out = String::new();
    for (unit, size) in UNITS {
        if rest >= size {
            out.push_str(&format!("{}{}", rest / size, unit));
            rest %= size;
        }
    }
    out
}

fn write_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.is_nan() {
        write!(f, "NaN")
    } else if n == f64::INFINITY {
        write!(f, "+Inf")
    } else if n == f64::NEG_INFINITY {
        write!(f, "-Inf")
    } else {
        write!(f, "{}", n)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write_number(f, *n),
            Expr::Selector(sel) => write!(f, "{}", sel),
            Expr::Matrix(ms) => write!(f, "{}[{}]", ms.selector, format_duration(ms.range_ms)),
            Expr::Call { func, args } => {
                write!(f, "{}(", func)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expr::Aggregate { op, grouping, expr } => match grouping {
                Some(grouping) => write!(f, "{} {} ({})", op, grouping, expr),
                None => write!(f, "{}({})", op, expr),
            },
            Expr::Binary {
                op,
                lhs,
                rhs,
                return_bool,
            } => {
                write_operand(f, lhs)?;
                write!(f, " {} ", op)?;
                if *return_bool {
                    write!(f, "bool ")?;
                }
                write_operand(f, rhs)
            }
        }
    }
}

/// Nested binary expressions and negative literals are parenthesised
fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr) -> fmt::Result {
    match expr {
        Expr::Binary { .. } => write!(f, "({})", expr),
        Expr::Number(n) if *n < 0.0 => write!(f, "({})", expr),
        _ => write!(f, "{}", expr),
    }
}
