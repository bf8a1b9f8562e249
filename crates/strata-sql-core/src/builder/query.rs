//! The fluent query state.
//!
//! [`Query`] holds the mutable builder state: SELECT/FROM/WHERE/GROUP BY/
//! HAVING/ORDER BY fragments, per-clause parameter lists, the joined-table
//! registry, paging bounds, and the UPDATE/INSERT field restrictions. Every
//! fluent call mutates in place; `clone()` produces a fully independent
//! copy so callers can derive sub-queries (a COUNT variant, a pk-only
//! DELETE probe) without disturbing the original.
//!
//! Parameters are kept per clause and concatenated in clause render order,
//! so canonical `?` placeholders always pair positionally with the list a
//! renderer reports, regardless of the order fluent calls were made in.

use std::marker::PhantomData;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::dialect::Dialect;
use crate::error::{BuilderError, Result};
use crate::expr::{Expr, SqlFunc};
use crate::schema::{ModelDef, Schema, TableRef};
use crate::value::SqlValue;

use super::visit::Visitor;

/// How the caller intends to materialize the result set.
///
/// The rendered SQL is identical for all three; the distinction matters to
/// the executing layer (row list, single row, single value).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    /// A list of rows.
    Select,
    /// Exactly one row.
    Single,
    /// One value from one row.
    Scalar,
}

/// A typed SQL query under construction.
pub struct Query<M: Schema> {
    dialect: Arc<dyn Dialect>,
    model: &'static ModelDef,
    pub(super) table_defs: Vec<&'static ModelDef>,
    table_alias: Option<Arc<str>>,
    select_expression: Option<String>,
    select_params: Vec<SqlValue>,
    distinct: bool,
    only_fields: Option<Vec<String>>,
    pub(super) joins: Vec<String>,
    ensure_expr: Option<String>,
    ensure_params: Vec<SqlValue>,
    where_body: Option<String>,
    pub(super) where_params: Vec<SqlValue>,
    group_by_expression: Option<String>,
    group_params: Vec<SqlValue>,
    having_expression: Option<String>,
    having_params: Vec<SqlValue>,
    order_by_columns: Vec<String>,
    order_params: Vec<SqlValue>,
    offset: Option<u64>,
    rows: Option<u64>,
    update_fields: Vec<String>,
    insert_fields: Vec<String>,
    pub(super) prefix_fields: bool,
    _marker: PhantomData<fn() -> M>,
}

impl<M: Schema> Clone for Query<M> {
    fn clone(&self) -> Self {
        Self {
            dialect: Arc::clone(&self.dialect),
            model: self.model,
            table_defs: self.table_defs.clone(),
            table_alias: self.table_alias.clone(),
            select_expression: self.select_expression.clone(),
            select_params: self.select_params.clone(),
            distinct: self.distinct,
            only_fields: self.only_fields.clone(),
            joins: self.joins.clone(),
            ensure_expr: self.ensure_expr.clone(),
            ensure_params: self.ensure_params.clone(),
            where_body: self.where_body.clone(),
            where_params: self.where_params.clone(),
            group_by_expression: self.group_by_expression.clone(),
            group_params: self.group_params.clone(),
            having_expression: self.having_expression.clone(),
            having_params: self.having_params.clone(),
            order_by_columns: self.order_by_columns.clone(),
            order_params: self.order_params.clone(),
            offset: self.offset,
            rows: self.rows,
            update_fields: self.update_fields.clone(),
            insert_fields: self.insert_fields.clone(),
            prefix_fields: self.prefix_fields,
            _marker: PhantomData,
        }
    }
}

impl<M: Schema> Query<M> {
    /// Creates an empty query for `M`'s table against the given dialect.
    #[must_use]
    pub fn new(dialect: Arc<dyn Dialect>) -> Self {
        let model = M::model_def();
        Self {
            dialect,
            model,
            table_defs: vec![model],
            table_alias: None,
            select_expression: None,
            select_params: Vec::new(),
            distinct: false,
            only_fields: None,
            joins: Vec::new(),
            ensure_expr: None,
            ensure_params: Vec::new(),
            where_body: None,
            where_params: Vec::new(),
            group_by_expression: None,
            group_params: Vec::new(),
            having_expression: None,
            having_params: Vec::new(),
            order_by_columns: Vec::new(),
            order_params: Vec::new(),
            offset: None,
            rows: None,
            update_fields: Vec::new(),
            insert_fields: Vec::new(),
            prefix_fields: false,
            _marker: PhantomData,
        }
    }

    /// The root model descriptor.
    #[must_use]
    pub fn model_def(&self) -> &'static ModelDef {
        self.model
    }

    /// The dialect this query renders against.
    #[must_use]
    pub fn dialect(&self) -> &dyn Dialect {
        &*self.dialect
    }

    /// Shares the dialect handle, for deriving sibling queries.
    #[must_use]
    pub fn dialect_handle(&self) -> Arc<dyn Dialect> {
        Arc::clone(&self.dialect)
    }

    /// A reference to the root table under the active alias.
    #[must_use]
    pub fn root(&self) -> TableRef {
        TableRef {
            model: self.model,
            alias: self.table_alias.clone(),
        }
    }

    /// Renders the root table under `alias` (for sub-queries against the
    /// same table). Column expressions must use an equally aliased
    /// [`TableRef`] to match.
    pub fn table_alias(&mut self, alias: &str) -> &mut Self {
        self.table_alias = Some(Arc::from(alias));
        self
    }

    /// Qualifies every column reference with its table name.
    pub fn prefix_fields(&mut self, on: bool) -> &mut Self {
        self.prefix_fields = on;
        self
    }

    // ---- SELECT ----------------------------------------------------

    /// Sets the projection from an expression (a single column, a
    /// function call, or a [`crate::expr::project`] list).
    pub fn select(&mut self, expr: impl Into<Expr>) -> Result<&mut Self> {
        self.select_params.clear();
        let expr = expr.into();
        let prefix = self.prefix_fields;
        let list = Visitor::new(&*self.dialect, &mut self.select_params)
            .qualify(prefix)
            .select_list(&expr)?;
        self.select_expression = Some(list.render(&*self.dialect));
        Ok(self)
    }

    /// Sets the projection from a raw fragment, after injection checks.
    pub fn select_raw(&mut self, fragment: &str) -> Result<&mut Self> {
        verify_fragment(fragment)?;
        self.select_params.clear();
        self.select_expression = Some(fragment.to_string());
        Ok(self)
    }

    /// Sets the projection from a raw fragment without any checks.
    ///
    /// The caller is responsible for the fragment's safety.
    pub fn unsafe_select_raw(&mut self, fragment: &str) -> &mut Self {
        self.select_params.clear();
        self.select_expression = Some(fragment.to_string());
        self
    }

    /// Sets the projection and marks the query DISTINCT.
    pub fn select_distinct(&mut self, expr: impl Into<Expr>) -> Result<&mut Self> {
        self.distinct = true;
        self.select(expr)
    }

    /// Marks the query DISTINCT without touching the projection.
    pub fn distinct(&mut self) -> &mut Self {
        self.distinct = true;
        self
    }

    /// Restricts the default projection to the named fields.
    pub fn select_only(&mut self, fields: &[&str]) -> Result<&mut Self> {
        for name in fields {
            if self.model.field(name).is_none() {
                return Err(BuilderError::UnknownField {
                    model: self.model.name,
                    field: (*name).to_string(),
                });
            }
        }
        self.only_fields = Some(fields.iter().map(|f| (*f).to_string()).collect());
        Ok(self)
    }

    /// Resets the projection to the default column list.
    pub fn clear_select(&mut self) -> &mut Self {
        self.select_expression = None;
        self.select_params.clear();
        self.only_fields = None;
        self.distinct = false;
        self
    }

    // ---- WHERE -----------------------------------------------------

    /// Adds a condition, ANDed with any existing ones.
    pub fn where_(&mut self, expr: impl Into<Expr>) -> Result<&mut Self> {
        self.append_where("AND", &expr.into())
    }

    /// Adds a condition, ANDed with any existing ones.
    pub fn and(&mut self, expr: impl Into<Expr>) -> Result<&mut Self> {
        self.append_where("AND", &expr.into())
    }

    /// Adds a condition, ORed with any existing ones.
    pub fn or(&mut self, expr: impl Into<Expr>) -> Result<&mut Self> {
        self.append_where("OR", &expr.into())
    }

    /// Adds a raw condition, after injection checks.
    pub fn where_raw(&mut self, fragment: &str) -> Result<&mut Self> {
        verify_fragment(fragment)?;
        self.append_where_sql("AND", fragment.to_string())
    }

    /// Adds a raw ORed condition, after injection checks.
    pub fn or_raw(&mut self, fragment: &str) -> Result<&mut Self> {
        verify_fragment(fragment)?;
        self.append_where_sql("OR", fragment.to_string())
    }

    /// Adds a mandatory condition that always ANDs in front of the rest
    /// of the WHERE clause, no matter how later conditions are ORed:
    /// `ensure(p1)` + `where_(p2)` + `or(p3)` renders
    /// `WHERE p1 AND (p2 OR p3)`.
    pub fn ensure(&mut self, expr: impl Into<Expr>) -> Result<&mut Self> {
        let expr = expr.into();
        let prefix = self.prefix_fields;
        let condition = Visitor::new(&*self.dialect, &mut self.ensure_params)
            .qualify(prefix)
            .predicate(&expr)?;
        self.append_ensure_sql(condition)
    }

    /// Raw-fragment form of [`Query::ensure`], after injection checks.
    pub fn ensure_raw(&mut self, fragment: &str) -> Result<&mut Self> {
        verify_fragment(fragment)?;
        self.append_ensure_sql(fragment.to_string())
    }

    /// ANDs an `EXISTS (sub-query)` condition.
    pub fn and_exists<T: Schema>(&mut self, sub: &Query<T>) -> Result<&mut Self> {
        let (sql, params) = sub.to_select_canonical(QueryType::Select)?;
        self.where_params.extend(params);
        self.append_where_sql("AND", format!("EXISTS ({sql})"))
    }

    /// ANDs a `NOT EXISTS (sub-query)` condition.
    pub fn and_not_exists<T: Schema>(&mut self, sub: &Query<T>) -> Result<&mut Self> {
        let (sql, params) = sub.to_select_canonical(QueryType::Select)?;
        self.where_params.extend(params);
        self.append_where_sql("AND", format!("NOT EXISTS ({sql})"))
    }

    /// Drops the WHERE clause, mandatory conditions included.
    pub fn clear_where(&mut self) -> &mut Self {
        self.ensure_expr = None;
        self.ensure_params.clear();
        self.where_body = None;
        self.where_params.clear();
        self
    }

    fn append_where(&mut self, op: &str, expr: &Expr) -> Result<&mut Self> {
        let prefix = self.prefix_fields;
        let condition = Visitor::new(&*self.dialect, &mut self.where_params)
            .qualify(prefix)
            .predicate(expr)?;
        self.append_where_sql(op, condition)
    }

    pub(super) fn append_where_sql(&mut self, op: &str, condition: String) -> Result<&mut Self> {
        if condition.trim().is_empty() {
            return Err(BuilderError::InvalidState(
                "empty WHERE condition".to_string(),
            ));
        }
        self.where_body = Some(match self.where_body.take() {
            None => condition,
            Some(body) => format!("{body} {op} {condition}"),
        });
        Ok(self)
    }

    fn append_ensure_sql(&mut self, condition: String) -> Result<&mut Self> {
        if condition.trim().is_empty() {
            return Err(BuilderError::InvalidState(
                "empty ensure condition".to_string(),
            ));
        }
        self.ensure_expr = Some(match self.ensure_expr.take() {
            None => condition,
            Some(prev) => format!("{prev} AND {condition}"),
        });
        Ok(self)
    }

    // ---- GROUP BY / HAVING ------------------------------------------

    /// Groups by the given expression (column or projection list).
    pub fn group_by(&mut self, expr: impl Into<Expr>) -> Result<&mut Self> {
        self.group_params.clear();
        let expr = expr.into();
        let prefix = self.prefix_fields;
        let list = Visitor::new(&*self.dialect, &mut self.group_params)
            .qualify(prefix)
            .select_list(&expr)?;
        self.group_by_expression = Some(list.render_unaliased());
        Ok(self)
    }

    /// Groups by a raw fragment, after injection checks.
    pub fn group_by_raw(&mut self, fragment: &str) -> Result<&mut Self> {
        verify_fragment(fragment)?;
        self.group_params.clear();
        self.group_by_expression = Some(fragment.to_string());
        Ok(self)
    }

    /// Sets the HAVING condition.
    pub fn having(&mut self, expr: impl Into<Expr>) -> Result<&mut Self> {
        self.having_params.clear();
        let expr = expr.into();
        let prefix = self.prefix_fields;
        let condition = Visitor::new(&*self.dialect, &mut self.having_params)
            .qualify(prefix)
            .predicate(&expr)?;
        self.having_expression = Some(condition);
        Ok(self)
    }

    /// Sets the HAVING condition from a raw fragment, after checks.
    pub fn having_raw(&mut self, fragment: &str) -> Result<&mut Self> {
        verify_fragment(fragment)?;
        self.having_params.clear();
        self.having_expression = Some(fragment.to_string());
        Ok(self)
    }

    // ---- ORDER BY ---------------------------------------------------

    /// Replaces the ordering with an ascending term.
    pub fn order_by(&mut self, expr: impl Into<Expr>) -> Result<&mut Self> {
        self.clear_order_by();
        self.append_order(&expr.into(), false)
    }

    /// Replaces the ordering with a descending term.
    pub fn order_by_desc(&mut self, expr: impl Into<Expr>) -> Result<&mut Self> {
        self.clear_order_by();
        self.append_order(&expr.into(), true)
    }

    /// Appends an ascending term to the ordering.
    pub fn then_by(&mut self, expr: impl Into<Expr>) -> Result<&mut Self> {
        self.append_order(&expr.into(), false)
    }

    /// Appends a descending term to the ordering.
    pub fn then_by_desc(&mut self, expr: impl Into<Expr>) -> Result<&mut Self> {
        self.append_order(&expr.into(), true)
    }

    /// Replaces the ordering from a comma-separated spec string where a
    /// leading `-` marks a descending field: `"-age,name"`.
    pub fn order_by_spec(&mut self, spec: &str) -> Result<&mut Self> {
        self.clear_order_by();
        for entry in spec.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                return Err(BuilderError::InvalidState(format!(
                    "malformed order-by spec '{spec}'"
                )));
            }
            let (name, desc) = match entry.strip_prefix('-') {
                Some(rest) => (rest, true),
                None => (entry, false),
            };
            let field = self.model.field(name).ok_or_else(|| BuilderError::UnknownField {
                model: self.model.name,
                field: name.to_string(),
            })?;
            let mut term = self.dialect.quoted_column(field.column);
            if desc {
                term.push_str(" DESC");
            }
            self.order_by_columns.push(term);
        }
        Ok(self)
    }

    /// Drops the ordering.
    pub fn clear_order_by(&mut self) -> &mut Self {
        self.order_by_columns.clear();
        self.order_params.clear();
        self
    }

    fn append_order(&mut self, expr: &Expr, desc: bool) -> Result<&mut Self> {
        let prefix = self.prefix_fields;
        let list = Visitor::new(&*self.dialect, &mut self.order_params)
            .qualify(prefix)
            .select_list(expr)?;
        for item in &list.items {
            let mut term = item.sql().to_string();
            if desc {
                term.push_str(" DESC");
            }
            self.order_by_columns.push(term);
        }
        Ok(self)
    }

    // ---- Paging ------------------------------------------------------

    /// Sets the row count.
    pub fn take(&mut self, rows: u64) -> &mut Self {
        self.rows = Some(rows);
        self
    }

    /// Sets the row offset.
    pub fn skip(&mut self, offset: u64) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    /// Sets both paging bounds.
    pub fn limit(&mut self, offset: u64, rows: u64) -> &mut Self {
        self.offset = Some(offset);
        self.rows = Some(rows);
        self
    }

    /// Resets both paging bounds.
    pub fn clear_limits(&mut self) -> &mut Self {
        self.offset = None;
        self.rows = None;
        self
    }

    /// The configured row count, if any.
    #[must_use]
    pub fn rows(&self) -> Option<u64> {
        self.rows
    }

    /// The configured row offset, if any.
    #[must_use]
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    // ---- UPDATE / INSERT field restrictions ---------------------------

    /// Restricts which fields an UPDATE statement sets. Empty = all.
    pub fn update_fields(&mut self, fields: &[&str]) -> &mut Self {
        self.update_fields = fields.iter().map(|f| (*f).to_string()).collect();
        self
    }

    /// Restricts which fields an INSERT statement writes. Empty = all.
    pub fn insert_fields(&mut self, fields: &[&str]) -> &mut Self {
        self.insert_fields = fields.iter().map(|f| (*f).to_string()).collect();
        self
    }

    // ---- Parameters ----------------------------------------------------

    /// All bound parameters, in placeholder order of the SELECT statement.
    #[must_use]
    pub fn params(&self) -> Vec<SqlValue> {
        let mut all = self.select_params.clone();
        all.extend(self.body_params());
        all.extend(self.order_params.iter().cloned());
        all
    }

    /// Parameters of the FROM/WHERE/GROUP BY/HAVING body only, in
    /// placeholder order; this is what COUNT and DELETE statements bind.
    #[must_use]
    pub fn body_params(&self) -> Vec<SqlValue> {
        let mut all = self.ensure_params.clone();
        all.extend(self.where_params.iter().cloned());
        all.extend(self.group_params.iter().cloned());
        all.extend(self.having_params.iter().cloned());
        all
    }

    // ---- Rendering -------------------------------------------------------

    /// Renders the full SELECT statement in the dialect's placeholder
    /// syntax, paired positionally with [`Query::params`].
    pub fn to_select_statement(&self, query_type: QueryType) -> Result<String> {
        let (sql, _) = self.to_select_canonical(query_type)?;
        Ok(self.dialect.bind_placeholders(&sql))
    }

    /// Renders `SELECT COUNT(*)` over the query body, ignoring the
    /// projection, ordering, and paging. Pairs with [`Query::body_params`].
    pub fn to_count_statement(&self) -> Result<String> {
        let mut sql = format!("SELECT COUNT(*) FROM {}", self.from_sql());
        push_clause(&mut sql, &self.where_clause());
        push_clause(&mut sql, &self.group_by_clause());
        push_clause(&mut sql, &self.having_clause());
        Ok(self.dialect.bind_placeholders(&sql))
    }

    /// Renders a DELETE for the rows this query matches. With joined
    /// tables the statement is rewritten to
    /// `DELETE FROM root WHERE pk IN (pk-only sub-select)` since most
    /// dialects forbid deleting through a join. Pairs with
    /// [`Query::body_params`].
    pub fn to_delete_row_statement(&self) -> Result<String> {
        let table = self.dialect.quoted_table_name(self.model);
        if self.table_defs.len() == 1 {
            let mut sql = format!("DELETE FROM {table}");
            push_clause(&mut sql, &self.where_clause());
            return Ok(self.dialect.bind_placeholders(&sql));
        }

        let pk = self.model.primary_key().ok_or_else(|| {
            BuilderError::InvalidState(format!(
                "DELETE with joins requires a primary key on '{}'",
                self.model.name
            ))
        })?;
        let pk_qualified = self
            .dialect
            .qualified_column(&table, pk.column);
        let mut probe = self.clone();
        probe.clear_order_by();
        probe.clear_limits();
        probe.distinct = false;
        probe.select_params.clear();
        probe.select_expression = Some(pk_qualified);
        let (sub_sql, _) = probe.to_select_canonical(QueryType::Select)?;
        let sql = format!(
            "DELETE FROM {table} WHERE {} IN ({sub_sql})",
            self.dialect.quoted_column(pk.column)
        );
        Ok(self.dialect.bind_placeholders(&sql))
    }

    /// Renders a SELECT projecting into `T`, matching `T`'s fields by
    /// name across all referenced tables (root first, joins in order).
    /// Fields with no source column are left out of the projection.
    pub fn select_into<T: Schema>(&self) -> Result<String> {
        let target = T::model_def();
        let mut items = Vec::new();
        for want in target.fields {
            if let Some(only) = &self.only_fields {
                if !only.iter().any(|f| f == want.name) {
                    continue;
                }
            }
            for def in &self.table_defs {
                if let Some(found) = def.field(want.name) {
                    // an aliased root table hides its real name
                    let table_sql = match &self.table_alias {
                        Some(alias) if def.same_as(self.model) => {
                            self.dialect.quoted_name(alias)
                        }
                        _ => self.dialect.quoted_table_name(def),
                    };
                    let mut sql = match found.custom_select {
                        Some(custom) => custom.to_string(),
                        None => self.dialect.qualified_column(&table_sql, found.column),
                    };
                    if found.column != want.column || found.custom_select.is_some() {
                        sql = format!("{sql} AS {}", self.dialect.quoted_name(want.column));
                    }
                    items.push(sql);
                    break;
                }
            }
        }
        if items.is_empty() {
            return Err(BuilderError::NoFields(target.name));
        }
        let mut derived = self.clone();
        derived.select_params.clear();
        derived.select_expression = Some(items.join(", "));
        derived.to_select_statement(QueryType::Select)
    }

    /// Renders the SELECT statement with every parameter inlined as a SQL
    /// literal, for diagnostics and logging only.
    pub fn to_merged_params_statement(&self) -> Result<String> {
        let (sql, params) = self.to_select_canonical(QueryType::Select)?;
        let mut out = String::with_capacity(sql.len() + 32);
        let mut values = params.iter();
        let mut in_string = false;
        for ch in sql.chars() {
            if ch == '\'' {
                in_string = !in_string;
                out.push(ch);
            } else if ch == '?' && !in_string {
                match values.next() {
                    Some(v) => out.push_str(&v.to_sql_inline()),
                    None => out.push(ch),
                }
            } else {
                out.push(ch);
            }
        }
        Ok(out)
    }

    /// Renders `UPDATE .. SET ..` over the query's WHERE clause.
    ///
    /// Row-version fields, `skip_update` fields, and fields outside the
    /// [`Query::update_fields`] restriction are skipped. Returns the
    /// statement and its full parameter list (SET values first, then the
    /// WHERE parameters).
    pub fn prepare_update_statement(
        &self,
        values: &[(&str, SqlValue)],
    ) -> Result<(String, Vec<SqlValue>)> {
        let mut set_parts = Vec::new();
        let mut set_params = Vec::new();
        for (name, value) in values {
            let field = self.model.field(name).ok_or_else(|| BuilderError::UnknownField {
                model: self.model.name,
                field: (*name).to_string(),
            })?;
            if field.row_version || field.skip_update {
                continue;
            }
            if !self.update_fields.is_empty()
                && !self.update_fields.iter().any(|f| f == name)
            {
                continue;
            }
            set_parts.push(format!("{} = ?", self.dialect.quoted_column(field.column)));
            set_params.push(value.clone());
        }
        if set_parts.is_empty() {
            return Err(BuilderError::NoFields(self.model.name));
        }
        let mut sql = format!(
            "UPDATE {} SET {}",
            self.dialect.quoted_table_name(self.model),
            set_parts.join(", ")
        );
        push_clause(&mut sql, &self.where_clause());
        set_params.extend(self.ensure_params.iter().cloned());
        set_params.extend(self.where_params.iter().cloned());
        Ok((self.dialect.bind_placeholders(&sql), set_params))
    }

    /// Renders `INSERT INTO .. VALUES ..` for the given field values.
    ///
    /// `skip_insert` fields and fields outside the
    /// [`Query::insert_fields`] restriction are skipped.
    pub fn prepare_insert_statement(
        &self,
        values: &[(&str, SqlValue)],
    ) -> Result<(String, Vec<SqlValue>)> {
        let mut columns = Vec::new();
        let mut params = Vec::new();
        for (name, value) in values {
            let field = self.model.field(name).ok_or_else(|| BuilderError::UnknownField {
                model: self.model.name,
                field: (*name).to_string(),
            })?;
            if field.skip_insert {
                continue;
            }
            if !self.insert_fields.is_empty()
                && !self.insert_fields.iter().any(|f| f == name)
            {
                continue;
            }
            columns.push(self.dialect.quoted_column(field.column));
            params.push(value.clone());
        }
        if columns.is_empty() {
            return Err(BuilderError::NoFields(self.model.name));
        }
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            self.dialect.quoted_table_name(self.model),
            columns.join(", ")
        );
        Ok((self.dialect.bind_placeholders(&sql), params))
    }

    /// A deterministic textual fingerprint of the builder state, for
    /// caching query shapes. `include_params` folds parameter values in.
    #[must_use]
    pub fn dump(&self, include_params: bool) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(out, "dialect: {}", self.dialect.name());
        let _ = writeln!(out, "model: {}", self.model.name);
        let _ = writeln!(
            out,
            "tables: {}",
            self.table_defs
                .iter()
                .map(|d| d.name)
                .collect::<Vec<_>>()
                .join(",")
        );
        let _ = writeln!(out, "alias: {:?}", self.table_alias.as_deref());
        let _ = writeln!(out, "select: {:?}", self.select_expression);
        let _ = writeln!(out, "distinct: {}", self.distinct);
        let _ = writeln!(out, "only_fields: {:?}", self.only_fields);
        let _ = writeln!(out, "joins: {:?}", self.joins);
        let _ = writeln!(out, "ensure: {:?}", self.ensure_expr);
        let _ = writeln!(out, "where: {:?}", self.where_body);
        let _ = writeln!(out, "group_by: {:?}", self.group_by_expression);
        let _ = writeln!(out, "having: {:?}", self.having_expression);
        let _ = writeln!(out, "order_by: {:?}", self.order_by_columns);
        let _ = writeln!(out, "offset: {:?} rows: {:?}", self.offset, self.rows);
        let _ = writeln!(out, "prefix_fields: {}", self.prefix_fields);
        let _ = writeln!(out, "update_fields: {:?}", self.update_fields);
        let _ = writeln!(out, "insert_fields: {:?}", self.insert_fields);
        if include_params {
            let inline = self
                .params()
                .iter()
                .map(SqlValue::to_sql_inline)
                .collect::<Vec<_>>();
            let _ = writeln!(out, "params: [{}]", inline.join(", "));
        }
        out
    }

    /// A Sha256 fingerprint of [`Query::dump`] with parameters included,
    /// usable as a cache key for identical query shapes.
    #[must_use]
    pub fn compute_hash(&self) -> String {
        let digest = Sha256::digest(self.dump(true).as_bytes());
        digest.iter().fold(String::with_capacity(64), |mut acc, b| {
            use std::fmt::Write;
            let _ = write!(acc, "{b:02x}");
            acc
        })
    }

    /// Canonical (`?`-placeholder) SELECT text plus its parameters.
    pub(crate) fn to_select_canonical(
        &self,
        query_type: QueryType,
    ) -> Result<(String, Vec<SqlValue>)> {
        // Select/Single/Scalar render identically; the intent matters to
        // the executing layer, not the text.
        let _ = query_type;
        let projection = match &self.select_expression {
            Some(custom) => custom.clone(),
            None => self.default_projection(),
        };
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&projection);
        sql.push_str(" FROM ");
        sql.push_str(&self.from_sql());
        push_clause(&mut sql, &self.where_clause());
        push_clause(&mut sql, &self.group_by_clause());
        push_clause(&mut sql, &self.having_clause());
        push_clause(&mut sql, &self.order_by_clause());
        push_clause(&mut sql, &self.dialect.limit_clause(self.offset, self.rows));
        Ok((sql, self.params()))
    }

    fn default_projection(&self) -> String {
        let table_sql = match &self.table_alias {
            Some(alias) => self.dialect.quoted_name(alias),
            None => self.dialect.quoted_table_name(self.model),
        };
        self.model
            .fields
            .iter()
            .filter(|f| match &self.only_fields {
                Some(only) => only.iter().any(|o| o == f.name),
                None => true,
            })
            .map(|f| match f.custom_select {
                Some(custom) => {
                    format!("{custom} AS {}", self.dialect.quoted_name(f.column))
                }
                None => {
                    if self.prefix_fields {
                        self.dialect.qualified_column(&table_sql, f.column)
                    } else {
                        self.dialect.quoted_column(f.column)
                    }
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn from_sql(&self) -> String {
        let mut from = self.dialect.quoted_table_name(self.model);
        if let Some(alias) = &self.table_alias {
            from.push_str(" AS ");
            from.push_str(&self.dialect.quoted_name(alias));
        }
        for join in &self.joins {
            from.push(' ');
            from.push_str(join);
        }
        from
    }

    fn where_clause(&self) -> String {
        match (&self.ensure_expr, &self.where_body) {
            (None, None) => String::new(),
            (None, Some(body)) => format!("WHERE {body}"),
            (Some(ensure), None) => {
                format!("WHERE {ensure} AND {}", self.dialect.true_condition())
            }
            (Some(ensure), Some(body)) => format!("WHERE {ensure} AND ({body})"),
        }
    }

    fn group_by_clause(&self) -> String {
        match &self.group_by_expression {
            Some(g) => format!("GROUP BY {g}"),
            None => String::new(),
        }
    }

    fn having_clause(&self) -> String {
        match &self.having_expression {
            Some(h) => format!("HAVING {h}"),
            None => String::new(),
        }
    }

    fn order_by_clause(&self) -> String {
        if self.order_by_columns.is_empty() {
            String::new()
        } else {
            format!("ORDER BY {}", self.order_by_columns.join(", "))
        }
    }
}

impl Expr {
    /// Membership in a sub-query: `col.in_query(&sub)?`. The sub-query's
    /// parameters merge into the parent structurally, in placeholder
    /// order.
    pub fn in_query<T: Schema>(self, sub: &Query<T>) -> Result<Self> {
        let (sql, params) = sub.to_select_canonical(QueryType::Select)?;
        Ok(Self::Func(Box::new(SqlFunc::InQuery {
            expr: self,
            sql,
            params,
            negated: false,
        })))
    }

    /// Negated membership in a sub-query.
    pub fn not_in_query<T: Schema>(self, sub: &Query<T>) -> Result<Self> {
        let (sql, params) = sub.to_select_canonical(QueryType::Select)?;
        Ok(Self::Func(Box::new(SqlFunc::InQuery {
            expr: self,
            sql,
            params,
            negated: true,
        })))
    }
}

fn push_clause(sql: &mut String, clause: &str) {
    if !clause.is_empty() {
        sql.push(' ');
        sql.push_str(clause);
    }
}

/// Rejects raw fragments carrying statement separators, comments, or
/// unbalanced string literals.
pub(super) fn verify_fragment(fragment: &str) -> Result<()> {
    let suspicious = fragment.contains(';')
        || fragment.contains("--")
        || fragment.contains("/*")
        || fragment.contains("*/")
        || fragment.matches('\'').count() % 2 == 1;
    if suspicious {
        return Err(BuilderError::UnsafeFragment(fragment.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{GenericDialect, PostgresDialect};
    use crate::expr::{count_all, project_as};
    use crate::model_def;
    use crate::schema::FieldDef;

    struct Person;
    model_def!(Person, "Person", "person", [
        FieldDef::new("id", "id").primary_key(),
        FieldDef::new("name", "name").nullable(),
        FieldDef::new("age", "age"),
        FieldDef::new("version", "version").row_version(),
    ]);

    struct OrderLine;
    model_def!(OrderLine, "OrderLine", "order_line", [
        FieldDef::new("id", "id").primary_key(),
        FieldDef::new("person_id", "person_id").references("Person"),
        FieldDef::new("total", "total"),
    ]);

    fn query() -> Query<Person> {
        Query::new(Arc::new(GenericDialect::new()))
    }

    fn person() -> TableRef {
        Person::table()
    }

    #[test]
    fn test_person_scenario() {
        let mut q = query();
        q.where_(person().col("age").gt(18)).unwrap();
        q.order_by_desc(person().col("age")).unwrap();
        q.take(10);
        assert_eq!(
            q.to_select_statement(QueryType::Select).unwrap(),
            "SELECT \"id\", \"name\", \"age\", \"version\" FROM \"person\" \
             WHERE (\"age\" > ?) ORDER BY \"age\" DESC LIMIT 10"
        );
        assert_eq!(q.params(), vec![SqlValue::Int(18)]);
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let mut q = query();
        q.where_(person().col("age").gt(18)).unwrap();
        let first = q.to_select_statement(QueryType::Select).unwrap();
        let second = q.to_select_statement(QueryType::Select).unwrap();
        assert_eq!(first, second);
        assert_eq!(q.params(), q.params());
    }

    #[test]
    fn test_ensure_ordering_invariant() {
        let mut q = query();
        q.ensure(person().col("id").eq(7)).unwrap();
        q.where_(person().col("name").eq("alice")).unwrap();
        q.or(person().col("name").eq("bob")).unwrap();
        let sql = q.to_select_statement(QueryType::Select).unwrap();
        assert!(
            sql.ends_with("WHERE (\"id\" = ?) AND ((\"name\" = ?) OR (\"name\" = ?))"),
            "unexpected SQL: {sql}"
        );
        // ensure params come first, matching placeholder order
        assert_eq!(
            q.params(),
            vec![
                SqlValue::Int(7),
                SqlValue::Text(String::from("alice")),
                SqlValue::Text(String::from("bob")),
            ]
        );
    }

    #[test]
    fn test_ensure_alone_keeps_sentinel() {
        let mut q = query();
        q.ensure(person().col("id").eq(7)).unwrap();
        let sql = q.to_select_statement(QueryType::Select).unwrap();
        assert!(sql.ends_with("WHERE (\"id\" = ?) AND (1=1)"), "{sql}");
    }

    #[test]
    fn test_ensure_after_where_still_leads() {
        let mut q = query();
        q.where_(person().col("name").eq("alice")).unwrap();
        q.ensure(person().col("id").eq(7)).unwrap();
        let sql = q.to_select_statement(QueryType::Select).unwrap();
        assert!(
            sql.ends_with("WHERE (\"id\" = ?) AND ((\"name\" = ?))"),
            "unexpected SQL: {sql}"
        );
        assert_eq!(
            q.params(),
            vec![SqlValue::Int(7), SqlValue::Text(String::from("alice"))]
        );
    }

    #[test]
    fn test_clone_independence() {
        let mut a = query();
        a.where_(person().col("age").gt(18)).unwrap();
        let before_sql = a.to_select_statement(QueryType::Select).unwrap();
        let before_params = a.params();

        let mut b = a.clone();
        b.and(person().col("name").eq("alice")).unwrap();
        b.take(5);

        assert_eq!(a.to_select_statement(QueryType::Select).unwrap(), before_sql);
        assert_eq!(a.params(), before_params);
        assert_ne!(
            b.to_select_statement(QueryType::Select).unwrap(),
            before_sql
        );
    }

    #[test]
    fn test_group_by_projection_scenario() {
        let mut q = query();
        q.select(project_as(vec![
            ("id", person().col("id")),
            ("count", count_all()),
        ]))
        .unwrap();
        q.group_by(person().col("id")).unwrap();
        assert_eq!(
            q.to_select_statement(QueryType::Select).unwrap(),
            "SELECT \"id\", COUNT(*) AS \"count\" FROM \"person\" GROUP BY \"id\""
        );
    }

    #[test]
    fn test_having_over_grouping() {
        let mut q = query();
        q.select(project_as(vec![
            ("name", person().col("name")),
            ("n", count_all()),
        ]))
        .unwrap();
        q.group_by(person().col("name")).unwrap();
        q.having(count_all().gt(2)).unwrap();
        let sql = q.to_select_statement(QueryType::Select).unwrap();
        assert!(sql.ends_with("GROUP BY \"name\" HAVING (COUNT(*) > ?)"), "{sql}");
        assert_eq!(q.params(), vec![SqlValue::Int(2)]);
    }

    #[test]
    fn test_count_statement_ignores_projection_and_paging() {
        let mut q = query();
        q.select(person().col("name")).unwrap();
        q.where_(person().col("age").gt(18)).unwrap();
        q.order_by(person().col("name")).unwrap();
        q.limit(5, 10);
        assert_eq!(
            q.to_count_statement().unwrap(),
            "SELECT COUNT(*) FROM \"person\" WHERE (\"age\" > ?)"
        );
        assert_eq!(q.body_params(), vec![SqlValue::Int(18)]);
    }

    #[test]
    fn test_select_distinct() {
        let mut q = query();
        q.select_distinct(person().col("name")).unwrap();
        assert_eq!(
            q.to_select_statement(QueryType::Select).unwrap(),
            "SELECT DISTINCT \"name\" FROM \"person\""
        );
    }

    #[test]
    fn test_select_only_restricts_default_projection() {
        let mut q = query();
        q.select_only(&["id", "name"]).unwrap();
        assert_eq!(
            q.to_select_statement(QueryType::Select).unwrap(),
            "SELECT \"id\", \"name\" FROM \"person\""
        );
        assert!(matches!(
            query().select_only(&["missing"]).err(),
            Some(BuilderError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_order_by_spec_parsing() {
        let mut q = query();
        q.order_by_spec("-age, name").unwrap();
        let sql = q.to_select_statement(QueryType::Select).unwrap();
        assert!(sql.ends_with("ORDER BY \"age\" DESC, \"name\""), "{sql}");

        assert!(matches!(
            query().order_by_spec("age,,name").err(),
            Some(BuilderError::InvalidState(_))
        ));
    }

    #[test]
    fn test_then_by_appends() {
        let mut q = query();
        q.order_by(person().col("name")).unwrap();
        q.then_by_desc(person().col("age")).unwrap();
        let sql = q.to_select_statement(QueryType::Select).unwrap();
        assert!(sql.ends_with("ORDER BY \"name\", \"age\" DESC"), "{sql}");
    }

    #[test]
    fn test_delete_single_table() {
        let mut q = query();
        q.where_(person().col("age").lt(0)).unwrap();
        assert_eq!(
            q.to_delete_row_statement().unwrap(),
            "DELETE FROM \"person\" WHERE (\"age\" < ?)"
        );
    }

    #[test]
    fn test_in_query_merges_sub_params() {
        let mut sub: Query<OrderLine> = Query::new(Arc::new(GenericDialect::new()));
        sub.select(OrderLine::table().col("person_id")).unwrap();
        sub.where_(OrderLine::table().col("total").gt(100)).unwrap();

        let mut q = query();
        q.where_(person().col("age").gt(18)).unwrap();
        let membership = person().col("id").in_query(&sub).unwrap();
        q.and(membership).unwrap();

        let sql = q.to_select_statement(QueryType::Select).unwrap();
        assert!(
            sql.contains(
                "(\"id\" IN (SELECT \"person_id\" FROM \"order_line\" WHERE (\"total\" > ?)))"
            ),
            "unexpected SQL: {sql}"
        );
        assert_eq!(q.params(), vec![SqlValue::Int(18), SqlValue::Int(100)]);
    }

    #[test]
    fn test_exists_sub_query() {
        let mut sub: Query<OrderLine> = Query::new(Arc::new(GenericDialect::new()));
        sub.where_(OrderLine::table().col("total").gt(100)).unwrap();

        let mut q = query();
        q.and_exists(&sub).unwrap();
        let sql = q.to_select_statement(QueryType::Select).unwrap();
        assert!(sql.contains("WHERE EXISTS (SELECT"), "{sql}");
        assert_eq!(q.params(), vec![SqlValue::Int(100)]);
    }

    #[test]
    fn test_not_exists_sub_query() {
        let mut q = query();
        let mut sub: Query<OrderLine> = Query::new(q.dialect_handle());
        sub.where_(OrderLine::table().col("total").gt(100)).unwrap();

        q.and_not_exists(&sub).unwrap();
        let sql = q.to_select_statement(QueryType::Select).unwrap();
        assert!(sql.contains("WHERE NOT EXISTS (SELECT"), "{sql}");
        assert_eq!(q.params(), vec![SqlValue::Int(100)]);
    }

    #[test]
    fn test_postgres_placeholder_numbering() {
        let mut q: Query<Person> = Query::new(Arc::new(PostgresDialect::new()));
        q.where_(person().col("age").gt(18)).unwrap();
        q.and(person().col("name").eq("alice")).unwrap();
        let sql = q.to_select_statement(QueryType::Select).unwrap();
        assert!(
            sql.ends_with("WHERE (\"age\" > $1) AND (\"name\" = $2)"),
            "unexpected SQL: {sql}"
        );
    }

    #[test]
    fn test_prepare_update_statement() {
        let mut q = query();
        q.where_(person().col("id").eq(7)).unwrap();
        let (sql, params) = q
            .prepare_update_statement(&[
                ("name", SqlValue::Text(String::from("alice"))),
                ("version", SqlValue::Int(2)),
            ])
            .unwrap();
        assert_eq!(
            sql,
            "UPDATE \"person\" SET \"name\" = ? WHERE (\"id\" = ?)"
        );
        assert_eq!(
            params,
            vec![SqlValue::Text(String::from("alice")), SqlValue::Int(7)]
        );
    }

    #[test]
    fn test_prepare_update_with_no_eligible_fields_fails() {
        let q = query();
        let err = q
            .prepare_update_statement(&[("version", SqlValue::Int(2))])
            .unwrap_err();
        assert!(matches!(err, BuilderError::NoFields("Person")));
    }

    #[test]
    fn test_prepare_insert_statement() {
        let mut q = query();
        q.insert_fields(&["name", "age"]);
        let (sql, params) = q
            .prepare_insert_statement(&[
                ("name", SqlValue::Text(String::from("alice"))),
                ("age", SqlValue::Int(30)),
                ("id", SqlValue::Int(1)),
            ])
            .unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"person\" (\"name\", \"age\") VALUES (?, ?)"
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_verify_fragment_rejects_dangerous_tokens() {
        assert!(query().where_raw("age > 18; DROP TABLE person").is_err());
        assert!(query().where_raw("age > 18 -- comment").is_err());
        assert!(query().where_raw("name = 'al").is_err());
        assert!(query().where_raw("age > 18").is_ok());
        // the unchecked variant takes anything
        let mut q = query();
        q.unsafe_select_raw("age; DROP TABLE person");
        assert!(q.to_select_statement(QueryType::Select).is_ok());
    }

    #[test]
    fn test_merged_params_statement_inlines_values() {
        let mut q = query();
        q.where_(person().col("name").eq("alice")).unwrap();
        let sql = q.to_merged_params_statement().unwrap();
        assert!(sql.ends_with("WHERE (\"name\" = 'alice')"), "{sql}");
    }

    #[test]
    fn test_compute_hash_tracks_state() {
        let mut a = query();
        a.where_(person().col("age").gt(18)).unwrap();
        let mut b = query();
        b.where_(person().col("age").gt(18)).unwrap();
        assert_eq!(a.compute_hash(), b.compute_hash());

        b.take(10);
        assert_ne!(a.compute_hash(), b.compute_hash());
    }

    #[test]
    fn test_table_alias_renders_from_clause() {
        let mut q = query();
        q.table_alias("p");
        let root = q.root();
        q.where_(root.col("age").gt(18)).unwrap();
        assert_eq!(
            q.to_select_statement(QueryType::Select).unwrap(),
            "SELECT \"id\", \"name\", \"age\", \"version\" FROM \"person\" AS \"p\" \
             WHERE (\"p\".\"age\" > ?)"
        );
    }

    #[test]
    fn test_select_into_qualifies_with_root_alias() {
        struct PersonName;
        model_def!(PersonName, "PersonName", "person_name", [
            FieldDef::new("name", "name"),
        ]);

        let mut q = query();
        q.table_alias("p");
        let sql = q.select_into::<PersonName>().unwrap();
        assert_eq!(sql, "SELECT \"p\".\"name\" FROM \"person\" AS \"p\"");
    }

    #[test]
    fn test_clear_operations_reset_state() {
        let mut q = query();
        q.select(person().col("name")).unwrap();
        q.where_(person().col("age").gt(18)).unwrap();
        q.order_by(person().col("name")).unwrap();
        q.limit(5, 10);

        q.clear_select();
        q.clear_where();
        q.clear_order_by();
        q.clear_limits();

        assert_eq!(
            q.to_select_statement(QueryType::Select).unwrap(),
            "SELECT \"id\", \"name\", \"age\", \"version\" FROM \"person\""
        );
        assert!(q.params().is_empty());
    }
}
