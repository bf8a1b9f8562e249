//! Rendered SQL fragments.
//!
//! Everything the expression visitor returns is a [`Fragment`]: either
//! text that is already valid SQL, or a plain value that must be
//! parameterized before it may be concatenated into a statement.

use crate::dialect::Dialect;
use crate::schema::EnumRepr;
use crate::value::SqlValue;

/// The output of visiting one expression node.
#[derive(Debug, Clone)]
pub enum Fragment {
    /// Already-valid SQL text.
    Sql(String),
    /// A quoted column reference, carrying enum metadata so comparisons
    /// can coerce the literal side to the column's representation.
    Column {
        /// Rendered, quoted (and possibly qualified) column text.
        sql: String,
        /// Set when the column stores an enum.
        enum_repr: Option<EnumRepr>,
    },
    /// A plain value that must become a bound parameter.
    Value(SqlValue),
    /// A multi-column projection.
    Select(SelectList),
}

/// One item of a SELECT projection list.
#[derive(Debug, Clone)]
pub enum SelectItem {
    /// A plain column reference.
    Column {
        /// Rendered column text.
        sql: String,
        /// Alias, emitted as `AS "alias"` when set.
        alias: Option<String>,
    },
    /// A computed expression.
    Expr {
        /// Rendered expression text.
        sql: String,
        /// Alias, emitted as `AS "alias"` when set.
        alias: Option<String>,
    },
}

impl SelectItem {
    fn render(&self, dialect: &dyn Dialect) -> String {
        let (sql, alias) = match self {
            Self::Column { sql, alias } | Self::Expr { sql, alias } => (sql, alias),
        };
        match alias {
            Some(a) => format!("{sql} AS {}", dialect.quoted_name(a)),
            None => sql.clone(),
        }
    }

    /// The rendered text without any alias, for GROUP BY / ORDER BY use.
    #[must_use]
    pub fn sql(&self) -> &str {
        match self {
            Self::Column { sql, .. } | Self::Expr { sql, .. } => sql,
        }
    }
}

/// An ordered projection list.
#[derive(Debug, Clone, Default)]
pub struct SelectList {
    /// The projection items, in declaration order.
    pub items: Vec<SelectItem>,
}

impl SelectList {
    /// Renders the comma-separated projection, with aliases.
    #[must_use]
    pub fn render(&self, dialect: &dyn Dialect) -> String {
        self.items
            .iter()
            .map(|i| i.render(dialect))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Renders the comma-separated column texts, without aliases.
    #[must_use]
    pub fn render_unaliased(&self) -> String {
        self.items
            .iter()
            .map(|i| i.sql().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::GenericDialect;

    #[test]
    fn test_select_list_render() {
        let list = SelectList {
            items: vec![
                SelectItem::Column {
                    sql: String::from("\"id\""),
                    alias: None,
                },
                SelectItem::Expr {
                    sql: String::from("COUNT(*)"),
                    alias: Some(String::from("count")),
                },
            ],
        };
        let d = GenericDialect::new();
        assert_eq!(list.render(&d), "\"id\", COUNT(*) AS \"count\"");
        assert_eq!(list.render_unaliased(), "\"id\", COUNT(*)");
    }
}
