//! Expression AST.
//!
//! The fluent API constructs this closed sum type; the visitor in
//! `builder::visit` pattern-matches over it to render SQL. Column
//! references carry a [`TableRef`] so alias identity, not just the model
//! type, decides how they render.

use crate::schema::TableRef;
use crate::value::{SqlValue, ToSqlValue};

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// Addition (+), or string concatenation when a side is textual.
    Add,
    /// Subtraction (-).
    Sub,
    /// Multiplication (*).
    Mul,
    /// Division (/).
    Div,
    /// Modulo (%).
    Mod,
    /// Equality (=), rewritten to IS NULL against null.
    Eq,
    /// Inequality (!=), rewritten to IS NOT NULL against null.
    Ne,
    /// Less-than (<).
    Lt,
    /// Less-than-or-equal (<=).
    Le,
    /// Greater-than (>).
    Gt,
    /// Greater-than-or-equal (>=).
    Ge,
    /// Logical AND.
    And,
    /// Logical OR.
    Or,
    /// Null coalescing, rendered as COALESCE.
    Coalesce,
}

impl BinOp {
    /// Returns the SQL representation of the operator.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Coalesce => "COALESCE",
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    /// Logical NOT.
    Not,
    /// Arithmetic negation.
    Neg,
}

/// A column reference: a table reference plus a logical field name.
///
/// Resolution against model metadata happens at render time, so an
/// unknown field surfaces as a `BuilderError`, not a panic.
#[derive(Debug, Clone)]
pub struct ColumnRef {
    /// The table (and optional alias) the field belongs to.
    pub table: TableRef,
    /// Logical field name on the mapped type.
    pub field: String,
}

/// One item of a projection expression.
#[derive(Debug, Clone)]
pub struct ProjItem {
    /// Projection name; becomes a column alias when it disagrees with
    /// the underlying column, or when the item is a computed expression.
    pub name: Option<String>,
    /// The projected expression.
    pub expr: Expr,
}

/// SQL function and template calls.
#[derive(Debug, Clone)]
pub enum SqlFunc {
    /// COUNT(expr).
    Count(Expr),
    /// COUNT(DISTINCT expr).
    CountDistinct(Expr),
    /// SUM(expr).
    Sum(Expr),
    /// MIN(expr).
    Min(Expr),
    /// MAX(expr).
    Max(Expr),
    /// AVG(expr).
    Avg(Expr),
    /// Membership in a value list. Empty lists render always-false.
    In {
        /// The probed expression.
        expr: Expr,
        /// The candidate values, each parameterized.
        list: Vec<SqlValue>,
        /// NOT IN when set.
        negated: bool,
    },
    /// Membership in a sub-select. The sub-query's canonical SQL and
    /// parameters merge structurally into the parent.
    InQuery {
        /// The probed expression.
        expr: Expr,
        /// Canonical (un-numbered) sub-select text.
        sql: String,
        /// The sub-query's bound parameters, in placeholder order.
        params: Vec<SqlValue>,
        /// NOT IN when set.
        negated: bool,
    },
    /// BETWEEN low AND high.
    Between {
        /// The probed expression.
        expr: Expr,
        /// Lower bound.
        low: Box<Expr>,
        /// Upper bound.
        high: Box<Expr>,
        /// NOT BETWEEN when set.
        negated: bool,
    },
    /// LIKE with a needle anchored at the start (`needle%`).
    StartsWith(Expr, String),
    /// LIKE with a needle anchored at the end (`%needle`).
    EndsWith(Expr, String),
    /// LIKE with an unanchored needle (`%needle%`).
    ContainsStr(Expr, String),
    /// LIKE with a caller-supplied pattern (no wildcard escaping).
    Like(Expr, String),
    /// UPPER(expr).
    Upper(Expr),
    /// LOWER(expr).
    Lower(Expr),
    /// TRIM(expr).
    Trim(Expr),
    /// substr(expr, start[, len]); 1-based start.
    Substring {
        /// The string expression.
        expr: Expr,
        /// 1-based start position.
        start: Box<Expr>,
        /// Optional length.
        len: Option<Box<Expr>>,
    },
    /// Dialect CAST.
    Cast(Expr, String),
    /// COALESCE over two or more expressions.
    Coalesce(Vec<Expr>),
    /// Dialect string concatenation over two or more expressions.
    Concat(Vec<Expr>),
}

/// An expression tree node.
#[derive(Debug, Clone)]
pub enum Expr {
    /// A plain value; parameterized unless folded away.
    Value(SqlValue),
    /// A column reference.
    Column(ColumnRef),
    /// A whole-table reference, projecting every mapped column.
    Table(TableRef),
    /// A binary expression.
    Binary {
        /// Left operand.
        lhs: Box<Expr>,
        /// Operator.
        op: BinOp,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// A unary expression.
    Unary {
        /// Operator.
        op: UnOp,
        /// Operand.
        expr: Box<Expr>,
    },
    /// A function call.
    Func(Box<SqlFunc>),
    /// CASE WHEN test THEN then ELSE otherwise END. A test that folds
    /// to a constant boolean eliminates the dead branch.
    Case {
        /// The tested condition.
        test: Box<Expr>,
        /// Taken when the test holds.
        then: Box<Expr>,
        /// Taken otherwise.
        otherwise: Box<Expr>,
    },
    /// A multi-column projection (SELECT / GROUP BY lists).
    Projection(Vec<ProjItem>),
    /// Raw SQL text, trusted as-is.
    Raw(String),
}

#[allow(clippy::should_implement_trait)]
impl Expr {
    /// Wraps a value.
    #[must_use]
    pub fn val<V: ToSqlValue>(value: V) -> Self {
        Self::Value(value.to_sql_value())
    }

    /// The NULL literal.
    #[must_use]
    pub const fn null() -> Self {
        Self::Value(SqlValue::Null)
    }

    /// Raw SQL text.
    ///
    /// **Warning**: only use for fragments that don't contain user input.
    #[must_use]
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::Raw(sql.into())
    }

    fn binary(self, op: BinOp, rhs: impl Into<Expr>) -> Self {
        Self::Binary {
            lhs: Box::new(self),
            op,
            rhs: Box::new(rhs.into()),
        }
    }

    /// Equality; against `null()` renders IS NULL.
    #[must_use]
    pub fn eq(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinOp::Eq, rhs)
    }

    /// Inequality; against `null()` renders IS NOT NULL.
    #[must_use]
    pub fn ne(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinOp::Ne, rhs)
    }

    /// Less-than.
    #[must_use]
    pub fn lt(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinOp::Lt, rhs)
    }

    /// Less-than-or-equal.
    #[must_use]
    pub fn le(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinOp::Le, rhs)
    }

    /// Greater-than.
    #[must_use]
    pub fn gt(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinOp::Gt, rhs)
    }

    /// Greater-than-or-equal.
    #[must_use]
    pub fn ge(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinOp::Ge, rhs)
    }

    /// Logical AND.
    #[must_use]
    pub fn and(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinOp::And, rhs)
    }

    /// Logical OR.
    #[must_use]
    pub fn or(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinOp::Or, rhs)
    }

    /// Addition, or dialect concatenation when a side is textual.
    #[must_use]
    pub fn add(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinOp::Add, rhs)
    }

    /// Subtraction.
    #[must_use]
    pub fn sub(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinOp::Sub, rhs)
    }

    /// Multiplication.
    #[must_use]
    pub fn mul(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinOp::Mul, rhs)
    }

    /// Division.
    #[must_use]
    pub fn div(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinOp::Div, rhs)
    }

    /// Modulo.
    #[must_use]
    pub fn rem(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinOp::Mod, rhs)
    }

    /// COALESCE(self, rhs).
    #[must_use]
    pub fn coalesce(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinOp::Coalesce, rhs)
    }

    /// Logical NOT. On a bare boolean column renders `column = FALSE`.
    #[must_use]
    pub fn not(self) -> Self {
        Self::Unary {
            op: UnOp::Not,
            expr: Box::new(self),
        }
    }

    /// Arithmetic negation.
    #[must_use]
    pub fn neg(self) -> Self {
        Self::Unary {
            op: UnOp::Neg,
            expr: Box::new(self),
        }
    }

    /// IS NULL.
    #[must_use]
    pub fn is_null(self) -> Self {
        self.eq(Self::null())
    }

    /// IS NOT NULL.
    #[must_use]
    pub fn is_not_null(self) -> Self {
        self.ne(Self::null())
    }

    /// Membership in a value list. An empty list renders always-false.
    #[must_use]
    pub fn in_list<V: ToSqlValue>(self, values: Vec<V>) -> Self {
        Self::Func(Box::new(SqlFunc::In {
            expr: self,
            list: values.into_iter().map(ToSqlValue::to_sql_value).collect(),
            negated: false,
        }))
    }

    /// Negated membership in a value list.
    #[must_use]
    pub fn not_in_list<V: ToSqlValue>(self, values: Vec<V>) -> Self {
        Self::Func(Box::new(SqlFunc::In {
            expr: self,
            list: values.into_iter().map(ToSqlValue::to_sql_value).collect(),
            negated: true,
        }))
    }

    /// BETWEEN low AND high, both bounds parameterized.
    #[must_use]
    pub fn between(self, low: impl Into<Expr>, high: impl Into<Expr>) -> Self {
        Self::Func(Box::new(SqlFunc::Between {
            expr: self,
            low: Box::new(low.into()),
            high: Box::new(high.into()),
            negated: false,
        }))
    }

    /// NOT BETWEEN low AND high.
    #[must_use]
    pub fn not_between(self, low: impl Into<Expr>, high: impl Into<Expr>) -> Self {
        Self::Func(Box::new(SqlFunc::Between {
            expr: self,
            low: Box::new(low.into()),
            high: Box::new(high.into()),
            negated: true,
        }))
    }

    /// LIKE `needle%`, escaping wildcards in the needle.
    #[must_use]
    pub fn starts_with(self, needle: &str) -> Self {
        Self::Func(Box::new(SqlFunc::StartsWith(self, needle.to_string())))
    }

    /// LIKE `%needle`, escaping wildcards in the needle.
    #[must_use]
    pub fn ends_with(self, needle: &str) -> Self {
        Self::Func(Box::new(SqlFunc::EndsWith(self, needle.to_string())))
    }

    /// LIKE `%needle%`, escaping wildcards in the needle.
    #[must_use]
    pub fn contains(self, needle: &str) -> Self {
        Self::Func(Box::new(SqlFunc::ContainsStr(self, needle.to_string())))
    }

    /// LIKE with a caller-supplied pattern (wildcards pass through).
    #[must_use]
    pub fn like(self, pattern: &str) -> Self {
        Self::Func(Box::new(SqlFunc::Like(self, pattern.to_string())))
    }

    /// UPPER(self).
    #[must_use]
    pub fn upper(self) -> Self {
        Self::Func(Box::new(SqlFunc::Upper(self)))
    }

    /// LOWER(self).
    #[must_use]
    pub fn lower(self) -> Self {
        Self::Func(Box::new(SqlFunc::Lower(self)))
    }

    /// TRIM(self).
    #[must_use]
    pub fn trim(self) -> Self {
        Self::Func(Box::new(SqlFunc::Trim(self)))
    }

    /// substr(self, start[, len]); 1-based start.
    #[must_use]
    pub fn substring(self, start: impl Into<Expr>, len: Option<Expr>) -> Self {
        Self::Func(Box::new(SqlFunc::Substring {
            expr: self,
            start: Box::new(start.into()),
            len: len.map(Box::new),
        }))
    }

    /// CAST(self AS ty).
    #[must_use]
    pub fn cast(self, ty: &str) -> Self {
        Self::Func(Box::new(SqlFunc::Cast(self, ty.to_string())))
    }

    /// Dialect string concatenation.
    #[must_use]
    pub fn concat(self, rhs: impl Into<Expr>) -> Self {
        Self::Func(Box::new(SqlFunc::Concat(vec![self, rhs.into()])))
    }

    /// CASE WHEN test THEN then ELSE otherwise END.
    #[must_use]
    pub fn case_when(test: Expr, then: impl Into<Expr>, otherwise: impl Into<Expr>) -> Self {
        Self::Case {
            test: Box::new(test),
            then: Box::new(then.into()),
            otherwise: Box::new(otherwise.into()),
        }
    }
}

/// Builds a projection without aliases: `project(vec![a, b])`.
#[must_use]
pub fn project(items: Vec<Expr>) -> Expr {
    Expr::Projection(
        items
            .into_iter()
            .map(|expr| ProjItem { name: None, expr })
            .collect(),
    )
}

/// Builds a projection with names: `project_as(vec![("total", sum(col))])`.
///
/// A name becomes an `AS` alias only when it disagrees with the
/// underlying column name or the item is a computed expression.
#[must_use]
pub fn project_as(items: Vec<(&str, Expr)>) -> Expr {
    Expr::Projection(
        items
            .into_iter()
            .map(|(name, expr)| ProjItem {
                name: Some(name.to_string()),
                expr,
            })
            .collect(),
    )
}

/// COUNT(expr).
#[must_use]
pub fn count(expr: Expr) -> Expr {
    Expr::Func(Box::new(SqlFunc::Count(expr)))
}

/// COUNT(*).
#[must_use]
pub fn count_all() -> Expr {
    count(Expr::raw("*"))
}

/// COUNT(DISTINCT expr).
#[must_use]
pub fn count_distinct(expr: Expr) -> Expr {
    Expr::Func(Box::new(SqlFunc::CountDistinct(expr)))
}

/// SUM(expr).
#[must_use]
pub fn sum(expr: Expr) -> Expr {
    Expr::Func(Box::new(SqlFunc::Sum(expr)))
}

/// MIN(expr).
#[must_use]
pub fn min(expr: Expr) -> Expr {
    Expr::Func(Box::new(SqlFunc::Min(expr)))
}

/// MAX(expr).
#[must_use]
pub fn max(expr: Expr) -> Expr {
    Expr::Func(Box::new(SqlFunc::Max(expr)))
}

/// AVG(expr).
#[must_use]
pub fn avg(expr: Expr) -> Expr {
    Expr::Func(Box::new(SqlFunc::Avg(expr)))
}

/// COALESCE over any number of expressions.
#[must_use]
pub fn coalesce(items: Vec<Expr>) -> Expr {
    Expr::Func(Box::new(SqlFunc::Coalesce(items)))
}

impl From<SqlValue> for Expr {
    fn from(v: SqlValue) -> Self {
        Self::Value(v)
    }
}

impl From<bool> for Expr {
    fn from(v: bool) -> Self {
        Self::Value(SqlValue::Bool(v))
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        Self::Value(SqlValue::Int(v))
    }
}

impl From<i32> for Expr {
    fn from(v: i32) -> Self {
        Self::Value(SqlValue::Int(i64::from(v)))
    }
}

impl From<f64> for Expr {
    fn from(v: f64) -> Self {
        Self::Value(SqlValue::Float(v))
    }
}

impl From<&str> for Expr {
    fn from(v: &str) -> Self {
        Self::Value(SqlValue::Text(v.to_string()))
    }
}

impl From<String> for Expr {
    fn from(v: String) -> Self {
        Self::Value(SqlValue::Text(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binop_as_str() {
        assert_eq!(BinOp::Eq.as_str(), "=");
        assert_eq!(BinOp::Ne.as_str(), "!=");
        assert_eq!(BinOp::And.as_str(), "AND");
    }

    #[test]
    fn test_expr_chaining() {
        let expr = Expr::val(1).eq(1).and(Expr::val("a").ne("b"));
        assert!(matches!(
            expr,
            Expr::Binary {
                op: BinOp::And,
                ..
            }
        ));
    }

    #[test]
    fn test_is_null_sugar() {
        let expr = Expr::raw("x").is_null();
        match expr {
            Expr::Binary { op, rhs, .. } => {
                assert_eq!(op, BinOp::Eq);
                assert!(matches!(*rhs, Expr::Value(SqlValue::Null)));
            }
            other => panic!("unexpected expr: {other:?}"),
        }
    }
}
