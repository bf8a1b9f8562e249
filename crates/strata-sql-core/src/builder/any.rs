//! Untyped façade over the typed builder.
//!
//! Plugin-style callers often only know the mapped type at runtime. The
//! object-safe [`AnyQuery`] trait covers the operations such callers need,
//! without mirroring the whole typed surface. Every [`Query`] implements
//! it; [`Query::as_any`] erases the type parameter.

use crate::error::Result;
use crate::expr::Expr;
use crate::schema::{ModelDef, Schema};
use crate::value::SqlValue;

use super::query::{Query, QueryType};

/// The type-erased query surface.
pub trait AnyQuery: Send {
    /// The root model descriptor.
    fn model_def(&self) -> &'static ModelDef;

    /// Adds a condition, ANDed with any existing ones.
    fn where_expr(&mut self, expr: Expr) -> Result<()>;

    /// Adds a condition, ORed with any existing ones.
    fn or_expr(&mut self, expr: Expr) -> Result<()>;

    /// Adds a mandatory leading condition (see [`Query::ensure`]).
    fn ensure_expr(&mut self, expr: Expr) -> Result<()>;

    /// Adds a raw condition, after injection checks.
    fn where_raw(&mut self, fragment: &str) -> Result<()>;

    /// Restricts the projection to the named fields.
    fn select_fields(&mut self, fields: &[&str]) -> Result<()>;

    /// Groups by a raw fragment, after injection checks.
    fn group_by_raw(&mut self, fragment: &str) -> Result<()>;

    /// Replaces the ordering from a `"-field,other"` spec string.
    fn order_by_spec(&mut self, spec: &str) -> Result<()>;

    /// Sets or clears both paging bounds.
    fn limit(&mut self, offset: Option<u64>, rows: Option<u64>);

    /// Renders the full SELECT statement.
    fn to_select_statement(&self, query_type: QueryType) -> Result<String>;

    /// Renders the COUNT statement over the query body.
    fn to_count_statement(&self) -> Result<String>;

    /// Renders the DELETE statement for the matched rows.
    fn to_delete_row_statement(&self) -> Result<String>;

    /// Parameters for the SELECT statement, in placeholder order.
    fn params(&self) -> Vec<SqlValue>;

    /// Parameters for the COUNT/DELETE body, in placeholder order.
    fn body_params(&self) -> Vec<SqlValue>;

    /// Deterministic state fingerprint (see [`Query::dump`]).
    fn dump(&self, include_params: bool) -> String;

    /// Sha256 cache key over the dumped state.
    fn compute_hash(&self) -> String;
}

impl<M: Schema> AnyQuery for Query<M> {
    fn model_def(&self) -> &'static ModelDef {
        Query::model_def(self)
    }

    fn where_expr(&mut self, expr: Expr) -> Result<()> {
        Query::where_(self, expr)?;
        Ok(())
    }

    fn or_expr(&mut self, expr: Expr) -> Result<()> {
        Query::or(self, expr)?;
        Ok(())
    }

    fn ensure_expr(&mut self, expr: Expr) -> Result<()> {
        Query::ensure(self, expr)?;
        Ok(())
    }

    fn where_raw(&mut self, fragment: &str) -> Result<()> {
        Query::where_raw(self, fragment)?;
        Ok(())
    }

    fn select_fields(&mut self, fields: &[&str]) -> Result<()> {
        Query::select_only(self, fields)?;
        Ok(())
    }

    fn group_by_raw(&mut self, fragment: &str) -> Result<()> {
        Query::group_by_raw(self, fragment)?;
        Ok(())
    }

    fn order_by_spec(&mut self, spec: &str) -> Result<()> {
        Query::order_by_spec(self, spec)?;
        Ok(())
    }

    fn limit(&mut self, offset: Option<u64>, rows: Option<u64>) {
        self.clear_limits();
        if let Some(o) = offset {
            self.skip(o);
        }
        if let Some(r) = rows {
            self.take(r);
        }
    }

    fn to_select_statement(&self, query_type: QueryType) -> Result<String> {
        Query::to_select_statement(self, query_type)
    }

    fn to_count_statement(&self) -> Result<String> {
        Query::to_count_statement(self)
    }

    fn to_delete_row_statement(&self) -> Result<String> {
        Query::to_delete_row_statement(self)
    }

    fn params(&self) -> Vec<SqlValue> {
        Query::params(self)
    }

    fn body_params(&self) -> Vec<SqlValue> {
        Query::body_params(self)
    }

    fn dump(&self, include_params: bool) -> String {
        Query::dump(self, include_params)
    }

    fn compute_hash(&self) -> String {
        Query::compute_hash(self)
    }
}

impl<M: Schema> Query<M> {
    /// A type-erased view of this query.
    pub fn as_any(&mut self) -> &mut dyn AnyQuery {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::dialect::GenericDialect;
    use crate::model_def;
    use crate::schema::{col, FieldDef};
    use crate::value::SqlValue;

    struct Person;
    model_def!(Person, "Person", "person", [
        FieldDef::new("id", "id").primary_key(),
        FieldDef::new("name", "name"),
        FieldDef::new("age", "age"),
    ]);

    #[test]
    fn test_erased_query_matches_typed_rendering() {
        let mut typed: Query<Person> = Query::new(Arc::new(GenericDialect::new()));
        typed.where_(col::<Person>("age").gt(18)).unwrap();
        typed.order_by_spec("-age").unwrap();
        typed.take(10);
        let expected = typed.to_select_statement(QueryType::Select).unwrap();

        let mut other: Query<Person> = Query::new(Arc::new(GenericDialect::new()));
        let erased: &mut dyn AnyQuery = other.as_any();
        erased.where_expr(col::<Person>("age").gt(18)).unwrap();
        erased.order_by_spec("-age").unwrap();
        erased.limit(None, Some(10));

        assert_eq!(erased.to_select_statement(QueryType::Select).unwrap(), expected);
        assert_eq!(erased.params(), vec![SqlValue::Int(18)]);
        assert_eq!(erased.model_def().name, "Person");
    }

    #[test]
    fn test_erased_limit_replaces_both_bounds() {
        let mut q: Query<Person> = Query::new(Arc::new(GenericDialect::new()));
        let erased = q.as_any();
        erased.limit(Some(5), Some(10));
        erased.limit(Some(3), None);
        assert_eq!(q.offset(), Some(3));
        assert_eq!(q.rows(), None);

        q.as_any().limit(None, None);
        assert_eq!(q.offset(), None);
        assert_eq!(q.rows(), None);
    }

    #[test]
    fn test_erased_raw_fragments_are_verified() {
        let mut q: Query<Person> = Query::new(Arc::new(GenericDialect::new()));
        let erased = q.as_any();
        assert!(erased.where_raw("age > 18; DROP TABLE person").is_err());
        assert!(erased.where_raw("age > 18").is_ok());
    }
}
