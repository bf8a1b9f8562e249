//! SQL dialect support.
//!
//! Different databases have slightly different SQL syntax. The query
//! builder is dialect-agnostic: identifier quoting, parameter
//! placeholders, boolean literals, concatenation, casts, and paging all
//! indirect through the [`Dialect`] trait.
//!
//! Internally every fragment uses the canonical `?` placeholder paired
//! positionally with the builder's parameter list. Dialects with numbered
//! placeholders substitute them in one final pass over the statement
//! ([`Dialect::bind_placeholders`]), so merging sub-query parameters is a
//! list concatenation and never a textual renumbering.

mod generic;
mod postgres;
mod sqlite;

pub use generic::GenericDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use crate::schema::ModelDef;

/// Trait for SQL dialect-specific behavior.
pub trait Dialect: Send + Sync {
    /// Returns the name of the dialect.
    fn name(&self) -> &'static str;

    /// Returns the identifier quote character.
    fn identifier_quote(&self) -> char {
        '"'
    }

    /// Quotes an identifier.
    fn quoted_name(&self, name: &str) -> String {
        let quote = self.identifier_quote();
        format!("{quote}{name}{quote}")
    }

    /// Quotes a model's table name.
    fn quoted_table_name(&self, def: &ModelDef) -> String {
        self.quoted_name(def.table)
    }

    /// Quotes a column name.
    fn quoted_column(&self, column: &str) -> String {
        self.quoted_name(column)
    }

    /// Renders a table-qualified column. `table_sql` is already quoted.
    fn qualified_column(&self, table_sql: &str, column: &str) -> String {
        format!("{table_sql}.{}", self.quoted_name(column))
    }

    /// Placeholder text for the parameter at 0-based `index`.
    fn param(&self, index: usize) -> String {
        let _ = index;
        String::from("?")
    }

    /// Boolean literal rendering.
    fn boolean_literal(&self, value: bool) -> &'static str {
        if value {
            "TRUE"
        } else {
            "FALSE"
        }
    }

    /// An always-true condition, used as the Ensure-clause sentinel.
    fn true_condition(&self) -> &'static str {
        "(1=1)"
    }

    /// An always-false condition, used for empty IN lists.
    fn false_condition(&self) -> &'static str {
        "(1=0)"
    }

    /// String concatenation of already-rendered operands.
    fn sql_concat(&self, parts: &[String]) -> String {
        parts.join(" || ")
    }

    /// CAST rendering.
    fn sql_cast(&self, expr: &str, ty: &str) -> String {
        format!("CAST({expr} AS {ty})")
    }

    /// The escape character used for LIKE wildcard escaping.
    fn like_escape(&self) -> char {
        '\\'
    }

    /// Renders the paging clause, empty when no bounds are set.
    fn limit_clause(&self, offset: Option<u64>, rows: Option<u64>) -> String {
        match (rows, offset) {
            (Some(r), Some(o)) => format!("LIMIT {r} OFFSET {o}"),
            (Some(r), None) => format!("LIMIT {r}"),
            (None, Some(o)) => format!("LIMIT {} OFFSET {o}", i64::MAX),
            (None, None) => String::new(),
        }
    }

    /// Replaces canonical `?` placeholders with this dialect's
    /// positional placeholders, left to right, skipping quoted spans.
    fn bind_placeholders(&self, sql: &str) -> String {
        let mut out = String::with_capacity(sql.len() + 16);
        let mut index = 0;
        let mut in_string = false;
        for ch in sql.chars() {
            if ch == '\'' {
                in_string = !in_string;
                out.push(ch);
            } else if ch == '?' && !in_string {
                out.push_str(&self.param(index));
                index += 1;
            } else {
                out.push(ch);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_placeholders_are_identity() {
        let d = GenericDialect::new();
        assert_eq!(
            d.bind_placeholders("SELECT * FROM t WHERE a = ? AND b = ?"),
            "SELECT * FROM t WHERE a = ? AND b = ?"
        );
    }

    #[test]
    fn test_postgres_placeholders_are_numbered() {
        let d = PostgresDialect::new();
        assert_eq!(
            d.bind_placeholders("WHERE a = ? AND b = ?"),
            "WHERE a = $1 AND b = $2"
        );
    }

    #[test]
    fn test_placeholders_skip_quoted_spans() {
        let d = PostgresDialect::new();
        assert_eq!(
            d.bind_placeholders("WHERE a = '?' AND b = ?"),
            "WHERE a = '?' AND b = $1"
        );
    }

    #[test]
    fn test_limit_clause() {
        let d = GenericDialect::new();
        assert_eq!(d.limit_clause(None, Some(10)), "LIMIT 10");
        assert_eq!(d.limit_clause(Some(20), Some(10)), "LIMIT 10 OFFSET 20");
        assert_eq!(d.limit_clause(None, None), "");
    }
}
