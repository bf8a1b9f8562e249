//! The expression visitor.
//!
//! Walks an [`Expr`] tree and produces a [`Fragment`]: SQL text, a column
//! reference, a projection list, or a plain value that the caller must
//! parameterize. Subtrees built only from plain values are folded to a
//! single value here instead of being shipped to the database.

use crate::dialect::Dialect;
use crate::error::{BuilderError, Result};
use crate::expr::{BinOp, ColumnRef, Expr, SqlFunc, UnOp};
use crate::fragment::{Fragment, SelectItem, SelectList};
use crate::schema::{EnumRepr, TableRef};
use crate::value::SqlValue;

/// Renders expression trees against one dialect and one parameter list.
pub struct Visitor<'a> {
    dialect: &'a dyn Dialect,
    params: &'a mut Vec<SqlValue>,
    qualify: bool,
    join_mode: bool,
}

impl<'a> Visitor<'a> {
    /// Creates a visitor appending parameters to `params`.
    pub fn new(dialect: &'a dyn Dialect, params: &'a mut Vec<SqlValue>) -> Self {
        Self {
            dialect,
            params,
            qualify: false,
            join_mode: false,
        }
    }

    /// Prefixes column references with their (quoted) table name.
    #[must_use]
    pub fn qualify(mut self, on: bool) -> Self {
        self.qualify = on;
        self
    }

    /// Join-predicate mode: values render inline so the predicate stays
    /// plain column=column text instead of column=placeholder.
    #[must_use]
    pub fn join_mode(mut self) -> Self {
        self.join_mode = true;
        self
    }

    /// Renders an expression in condition position (WHERE/HAVING/ON).
    ///
    /// A bare boolean column becomes `column = TRUE`; a folded constant
    /// boolean becomes the dialect's always-true/always-false condition.
    pub fn predicate(&mut self, expr: &Expr) -> Result<String> {
        let frag = self.visit(expr)?;
        self.condition_sql(frag)
    }

    /// Renders an expression as a SELECT projection list.
    pub fn select_list(&mut self, expr: &Expr) -> Result<SelectList> {
        match self.visit(expr)? {
            Fragment::Select(list) => Ok(list),
            Fragment::Column { sql, .. } => Ok(SelectList {
                items: vec![SelectItem::Column { sql, alias: None }],
            }),
            Fragment::Sql(sql) => Ok(SelectList {
                items: vec![SelectItem::Expr { sql, alias: None }],
            }),
            Fragment::Value(v) => {
                let sql = self.param_sql(v);
                Ok(SelectList {
                    items: vec![SelectItem::Expr { sql, alias: None }],
                })
            }
        }
    }

    /// Visits one expression node.
    pub fn visit(&mut self, expr: &Expr) -> Result<Fragment> {
        match expr {
            Expr::Value(v) => Ok(Fragment::Value(v.clone())),
            Expr::Column(col) => self.column_fragment(col),
            Expr::Table(table) => self.table_fragment(table),
            Expr::Binary { lhs, op, rhs } => self.visit_binary(lhs, *op, rhs),
            Expr::Unary { op, expr } => self.visit_unary(*op, expr),
            Expr::Func(func) => self.visit_func(func),
            Expr::Case {
                test,
                then,
                otherwise,
            } => self.visit_case(test, then, otherwise),
            Expr::Projection(items) => self.visit_projection(items),
            Expr::Raw(sql) => Ok(Fragment::Sql(sql.clone())),
        }
    }

    fn column_fragment(&self, col: &ColumnRef) -> Result<Fragment> {
        let model = col.table.model;
        let field = model.field(&col.field).ok_or_else(|| BuilderError::UnknownField {
            model: model.name,
            field: col.field.clone(),
        })?;
        let sql = if let Some(custom) = field.custom_select {
            custom.to_string()
        } else if let Some(alias) = &col.table.alias {
            self.dialect
                .qualified_column(&self.dialect.quoted_name(alias), field.column)
        } else if self.qualify {
            self.dialect
                .qualified_column(&self.dialect.quoted_table_name(model), field.column)
        } else {
            self.dialect.quoted_column(field.column)
        };
        Ok(Fragment::Column {
            sql,
            enum_repr: field.enum_repr,
        })
    }

    fn table_fragment(&self, table: &TableRef) -> Result<Fragment> {
        let prefix = if let Some(alias) = &table.alias {
            Some(self.dialect.quoted_name(alias))
        } else if self.qualify {
            Some(self.dialect.quoted_table_name(table.model))
        } else {
            None
        };
        let items = table
            .model
            .fields
            .iter()
            .map(|f| match f.custom_select {
                Some(custom) => SelectItem::Expr {
                    sql: custom.to_string(),
                    alias: Some(f.column.to_string()),
                },
                None => SelectItem::Column {
                    sql: match &prefix {
                        Some(p) => self.dialect.qualified_column(p, f.column),
                        None => self.dialect.quoted_column(f.column),
                    },
                    alias: None,
                },
            })
            .collect();
        Ok(Fragment::Select(SelectList { items }))
    }

    fn visit_binary(&mut self, lhs: &Expr, op: BinOp, rhs: &Expr) -> Result<Fragment> {
        let l = self.visit(lhs)?;
        let r = self.visit(rhs)?;

        if let (Fragment::Value(a), Fragment::Value(b)) = (&l, &r) {
            if let Some(folded) = fold_binary(a, op, b) {
                return Ok(Fragment::Value(folded));
            }
        }

        match op {
            BinOp::Eq | BinOp::Ne => self.render_equality(l, op, r),
            BinOp::And | BinOp::Or => {
                let ls = self.condition_sql(l)?;
                let rs = self.condition_sql(r)?;
                Ok(Fragment::Sql(format!("({ls} {} {rs})", op.as_str())))
            }
            BinOp::Coalesce => {
                let ls = self.operand_sql(l)?;
                let rs = self.operand_sql(r)?;
                Ok(Fragment::Sql(format!("COALESCE({ls}, {rs})")))
            }
            BinOp::Add => {
                let textual = matches!(l, Fragment::Value(SqlValue::Text(_)))
                    || matches!(r, Fragment::Value(SqlValue::Text(_)));
                if textual {
                    let parts = vec![self.operand_sql(l)?, self.operand_sql(r)?];
                    Ok(Fragment::Sql(self.dialect.sql_concat(&parts)))
                } else {
                    self.render_comparison(l, op, r)
                }
            }
            _ => self.render_comparison(l, op, r),
        }
    }

    /// Eq/Ne with the null rewrite and the boolean-literal shorthand.
    fn render_equality(&mut self, l: Fragment, op: BinOp, r: Fragment) -> Result<Fragment> {
        let keyword = if op == BinOp::Eq { "IS" } else { "IS NOT" };
        if matches!(r, Fragment::Value(SqlValue::Null)) {
            let ls = self.operand_sql(l)?;
            return Ok(Fragment::Sql(format!("({ls} {keyword} NULL)")));
        }
        if matches!(l, Fragment::Value(SqlValue::Null)) {
            let rs = self.operand_sql(r)?;
            return Ok(Fragment::Sql(format!("({rs} {keyword} NULL)")));
        }

        let boolean = match (&l, &r) {
            (Fragment::Column { sql, .. }, Fragment::Value(SqlValue::Bool(b)))
            | (Fragment::Value(SqlValue::Bool(b)), Fragment::Column { sql, .. }) => {
                Some((sql.clone(), *b))
            }
            _ => None,
        };
        if let Some((col, b)) = boolean {
            let lit = self.dialect.boolean_literal(b);
            return Ok(Fragment::Sql(if op == BinOp::Eq {
                format!("({col} = {lit})")
            } else {
                format!("NOT ({col} = {lit})")
            }));
        }

        self.render_comparison(l, op, r)
    }

    /// The plain `(lhs op rhs)` form, coercing a value side to an enum
    /// column's storage representation before parameterizing it.
    fn render_comparison(&mut self, l: Fragment, op: BinOp, r: Fragment) -> Result<Fragment> {
        let repr = match (&l, &r) {
            (Fragment::Column { enum_repr, .. }, _) | (_, Fragment::Column { enum_repr, .. }) => {
                *enum_repr
            }
            _ => None,
        };
        let ls = self.coerced_sql(l, repr)?;
        let rs = self.coerced_sql(r, repr)?;
        Ok(Fragment::Sql(format!("({ls} {} {rs})", op.as_str())))
    }

    fn visit_unary(&mut self, op: UnOp, expr: &Expr) -> Result<Fragment> {
        let inner = self.visit(expr)?;
        match op {
            UnOp::Not => match inner {
                Fragment::Column { sql, .. } => {
                    let lit = self.dialect.boolean_literal(false);
                    Ok(Fragment::Sql(format!("({sql} = {lit})")))
                }
                Fragment::Value(SqlValue::Bool(b)) => Ok(Fragment::Value(SqlValue::Bool(!b))),
                // no parenthesis sniffing: "(a) OR (b)" both starts and
                // ends with one without being wrapped by it
                Fragment::Sql(s) => Ok(Fragment::Sql(format!("NOT ({s})"))),
                other => Err(BuilderError::NotSupported(format!(
                    "NOT applied to {other:?}"
                ))),
            },
            UnOp::Neg => match inner {
                Fragment::Value(SqlValue::Int(i)) => Ok(Fragment::Value(SqlValue::Int(-i))),
                Fragment::Value(SqlValue::Float(f)) => Ok(Fragment::Value(SqlValue::Float(-f))),
                other => {
                    let s = self.operand_sql(other)?;
                    Ok(Fragment::Sql(format!("-({s})")))
                }
            },
        }
    }

    #[allow(clippy::too_many_lines)]
    fn visit_func(&mut self, func: &SqlFunc) -> Result<Fragment> {
        match func {
            SqlFunc::Count(e) => self.aggregate("COUNT", e),
            SqlFunc::Sum(e) => self.aggregate("SUM", e),
            SqlFunc::Min(e) => self.aggregate("MIN", e),
            SqlFunc::Max(e) => self.aggregate("MAX", e),
            SqlFunc::Avg(e) => self.aggregate("AVG", e),
            SqlFunc::CountDistinct(e) => {
                let inner = self.visit_operand(e)?;
                Ok(Fragment::Sql(format!("COUNT(DISTINCT {inner})")))
            }
            SqlFunc::In {
                expr,
                list,
                negated,
            } => {
                if list.is_empty() {
                    // IN () is invalid SQL; an empty candidate set can
                    // never match.
                    return Ok(Fragment::Sql(
                        if *negated {
                            self.dialect.true_condition()
                        } else {
                            self.dialect.false_condition()
                        }
                        .to_string(),
                    ));
                }
                let target = self.visit_operand(expr)?;
                let repr = self.enum_repr_of(expr);
                let placeholders = list
                    .iter()
                    .map(|v| self.param_sql(coerce_enum(v.clone(), repr)))
                    .collect::<Vec<_>>()
                    .join(", ");
                let keyword = if *negated { "NOT IN" } else { "IN" };
                Ok(Fragment::Sql(format!("({target} {keyword} ({placeholders}))")))
            }
            SqlFunc::InQuery {
                expr,
                sql,
                params,
                negated,
            } => {
                let target = self.visit_operand(expr)?;
                self.params.extend(params.iter().cloned());
                let keyword = if *negated { "NOT IN" } else { "IN" };
                Ok(Fragment::Sql(format!("({target} {keyword} ({sql}))")))
            }
            SqlFunc::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let target = self.visit_operand(expr)?;
                let lo = self.visit_operand(low)?;
                let hi = self.visit_operand(high)?;
                let keyword = if *negated { "NOT BETWEEN" } else { "BETWEEN" };
                Ok(Fragment::Sql(format!("({target} {keyword} {lo} AND {hi})")))
            }
            SqlFunc::StartsWith(e, needle) => self.like_fragment(e, needle, false, true),
            SqlFunc::EndsWith(e, needle) => self.like_fragment(e, needle, true, false),
            SqlFunc::ContainsStr(e, needle) => self.like_fragment(e, needle, true, true),
            SqlFunc::Like(e, pattern) => {
                let target = self.visit_operand(e)?;
                let p = self.param_sql(SqlValue::Text(pattern.clone()));
                Ok(Fragment::Sql(format!("({target} LIKE {p})")))
            }
            SqlFunc::Upper(e) => self.aggregate("UPPER", e),
            SqlFunc::Lower(e) => self.aggregate("LOWER", e),
            SqlFunc::Trim(e) => self.aggregate("TRIM", e),
            SqlFunc::Substring { expr, start, len } => {
                let target = self.visit_operand(expr)?;
                let start = self.visit_operand(start)?;
                match len {
                    Some(len) => {
                        let len = self.visit_operand(len)?;
                        Ok(Fragment::Sql(format!("substr({target}, {start}, {len})")))
                    }
                    None => Ok(Fragment::Sql(format!("substr({target}, {start})"))),
                }
            }
            SqlFunc::Cast(e, ty) => {
                let inner = self.visit_operand(e)?;
                Ok(Fragment::Sql(self.dialect.sql_cast(&inner, ty)))
            }
            SqlFunc::Coalesce(items) => {
                let parts = items
                    .iter()
                    .map(|e| self.visit_operand(e))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Fragment::Sql(format!("COALESCE({})", parts.join(", "))))
            }
            SqlFunc::Concat(items) => {
                let parts = items
                    .iter()
                    .map(|e| self.visit_operand(e))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Fragment::Sql(self.dialect.sql_concat(&parts)))
            }
        }
    }

    fn visit_case(&mut self, test: &Expr, then: &Expr, otherwise: &Expr) -> Result<Fragment> {
        let test_frag = self.visit(test)?;
        // A test that folded to a constant selects its branch here.
        if let Fragment::Value(SqlValue::Bool(b)) = test_frag {
            return self.visit(if b { then } else { otherwise });
        }
        let test_sql = self.condition_sql(test_frag)?;
        let then_sql = self.branch_sql(then)?;
        let else_sql = self.branch_sql(otherwise)?;
        Ok(Fragment::Sql(format!(
            "CASE WHEN {test_sql} THEN {then_sql} ELSE {else_sql} END"
        )))
    }

    fn visit_projection(&mut self, items: &[crate::expr::ProjItem]) -> Result<Fragment> {
        let mut list = SelectList::default();
        for item in items {
            let select_item = match (&item.expr, self.visit(&item.expr)?) {
                (Expr::Column(col), Fragment::Column { sql, .. }) => {
                    // Alias only when the projection name disagrees with
                    // the source column.
                    let alias = item.name.as_ref().filter(|n| {
                        col.table
                            .model
                            .field(&col.field)
                            .is_some_and(|f| f.name != n.as_str() && f.column != n.as_str())
                    });
                    SelectItem::Column {
                        sql,
                        alias: alias.cloned(),
                    }
                }
                (_, Fragment::Select(_)) => {
                    return Err(BuilderError::NotSupported(
                        "nested projection list".to_string(),
                    ))
                }
                (_, frag) => SelectItem::Expr {
                    sql: self.operand_sql(frag)?,
                    alias: item.name.clone(),
                },
            };
            list.items.push(select_item);
        }
        Ok(Fragment::Select(list))
    }

    fn aggregate(&mut self, name: &str, arg: &Expr) -> Result<Fragment> {
        let inner = self.visit_operand(arg)?;
        Ok(Fragment::Sql(format!("{name}({inner})")))
    }

    fn like_fragment(
        &mut self,
        expr: &Expr,
        needle: &str,
        leading: bool,
        trailing: bool,
    ) -> Result<Fragment> {
        let target = self.visit_operand(expr)?;
        let esc = self.dialect.like_escape();
        let (escaped, had_wildcard) = escape_like(needle, esc);
        let mut pattern = String::new();
        if leading {
            pattern.push('%');
        }
        pattern.push_str(&escaped);
        if trailing {
            pattern.push('%');
        }
        let p = self.param_sql(SqlValue::Text(pattern));
        let escape_clause = if had_wildcard {
            format!(" ESCAPE '{esc}'")
        } else {
            String::new()
        };
        Ok(Fragment::Sql(format!("({target} LIKE {p}{escape_clause})")))
    }

    fn branch_sql(&mut self, expr: &Expr) -> Result<String> {
        match self.visit(expr)? {
            Fragment::Value(SqlValue::Bool(b)) => Ok(self.dialect.boolean_literal(b).to_string()),
            frag => self.operand_sql(frag),
        }
    }

    /// Renders a fragment in condition position.
    fn condition_sql(&mut self, frag: Fragment) -> Result<String> {
        match frag {
            Fragment::Sql(s) => Ok(s),
            Fragment::Column { sql, .. } => {
                let lit = self.dialect.boolean_literal(true);
                Ok(format!("({sql} = {lit})"))
            }
            Fragment::Value(SqlValue::Bool(b)) => Ok(if b {
                self.dialect.true_condition()
            } else {
                self.dialect.false_condition()
            }
            .to_string()),
            Fragment::Value(v) => Err(BuilderError::NotSupported(format!(
                "non-boolean value {v:?} in condition position"
            ))),
            Fragment::Select(_) => Err(BuilderError::NotSupported(
                "projection list in condition position".to_string(),
            )),
        }
    }

    /// Renders a fragment in operand position; plain values become
    /// parameters (or inline literals in join mode).
    fn operand_sql(&mut self, frag: Fragment) -> Result<String> {
        match frag {
            Fragment::Sql(s) | Fragment::Column { sql: s, .. } => Ok(s),
            Fragment::Value(v) => Ok(self.param_sql(v)),
            Fragment::Select(_) => Err(BuilderError::NotSupported(
                "projection list in operand position".to_string(),
            )),
        }
    }

    fn visit_operand(&mut self, expr: &Expr) -> Result<String> {
        let frag = self.visit(expr)?;
        self.operand_sql(frag)
    }

    fn coerced_sql(&mut self, frag: Fragment, repr: Option<EnumRepr>) -> Result<String> {
        match frag {
            Fragment::Value(v) => Ok(self.param_sql(coerce_enum(v, repr))),
            other => self.operand_sql(other),
        }
    }

    fn param_sql(&mut self, value: SqlValue) -> String {
        if self.join_mode {
            value.to_sql_inline()
        } else {
            self.params.push(value);
            String::from("?")
        }
    }

    fn enum_repr_of(&self, expr: &Expr) -> Option<EnumRepr> {
        match expr {
            Expr::Column(col) => col
                .table
                .model
                .field(&col.field)
                .and_then(|f| f.enum_repr),
            _ => None,
        }
    }
}

/// Coerces a plain value to an enum column's storage representation.
fn coerce_enum(value: SqlValue, repr: Option<EnumRepr>) -> SqlValue {
    match (repr, value) {
        (Some(EnumRepr::Integer), SqlValue::Text(s)) => match s.parse::<i64>() {
            Ok(i) => SqlValue::Int(i),
            Err(_) => SqlValue::Text(s),
        },
        (Some(EnumRepr::Text), SqlValue::Int(i)) => SqlValue::Text(i.to_string()),
        (_, v) => v,
    }
}

/// Escapes LIKE wildcards in a plain needle. Returns the escaped text and
/// whether any escaping happened (which requires an ESCAPE clause).
fn escape_like(needle: &str, esc: char) -> (String, bool) {
    let mut out = String::with_capacity(needle.len());
    let mut escaped = false;
    for ch in needle.chars() {
        if ch == '%' || ch == '_' || ch == esc {
            out.push(esc);
            escaped = true;
        }
        out.push(ch);
    }
    (out, escaped)
}

/// Evaluates a binary operation over two plain values, when possible.
#[allow(clippy::cast_precision_loss)]
fn fold_binary(a: &SqlValue, op: BinOp, b: &SqlValue) -> Option<SqlValue> {
    use SqlValue::{Bool, Float, Int, Null, Text};

    let as_float = |v: &SqlValue| match v {
        Int(i) => Some(*i as f64),
        Float(f) => Some(*f),
        _ => None,
    };

    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => match (a, b) {
            (Int(x), Int(y)) => {
                let r = match op {
                    BinOp::Add => x.checked_add(*y),
                    BinOp::Sub => x.checked_sub(*y),
                    BinOp::Mul => x.checked_mul(*y),
                    BinOp::Div => x.checked_div(*y),
                    BinOp::Mod => x.checked_rem(*y),
                    _ => unreachable!(),
                };
                r.map(Int)
            }
            (Text(x), Text(y)) if op == BinOp::Add => Some(Text(format!("{x}{y}"))),
            _ => {
                let (x, y) = (as_float(a)?, as_float(b)?);
                let r = match op {
                    BinOp::Add => x + y,
                    BinOp::Sub => x - y,
                    BinOp::Mul => x * y,
                    BinOp::Div => x / y,
                    BinOp::Mod => x % y,
                    _ => unreachable!(),
                };
                Some(Float(r))
            }
        },
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ord = match (a, b) {
                (Int(x), Int(y)) => x.partial_cmp(y),
                (Text(x), Text(y)) => x.partial_cmp(y),
                (Bool(x), Bool(y)) => x.partial_cmp(y),
                _ => as_float(a)?.partial_cmp(&as_float(b)?),
            }?;
            let r = match op {
                BinOp::Eq => ord.is_eq(),
                BinOp::Ne => ord.is_ne(),
                BinOp::Lt => ord.is_lt(),
                BinOp::Le => ord.is_le(),
                BinOp::Gt => ord.is_gt(),
                BinOp::Ge => ord.is_ge(),
                _ => unreachable!(),
            };
            Some(Bool(r))
        }
        BinOp::And | BinOp::Or => match (a, b) {
            (Bool(x), Bool(y)) => Some(Bool(if op == BinOp::And { *x && *y } else { *x || *y })),
            _ => None,
        },
        BinOp::Coalesce => Some(if matches!(a, Null) { b.clone() } else { a.clone() }),
    }
}
