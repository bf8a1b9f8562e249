//! SQLite dialect.

use super::Dialect;

/// The SQLite dialect.
///
/// SQLite accepts the ANSI defaults for quoting and placeholders; only
/// paging without a row bound differs (`LIMIT -1`).
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn limit_clause(&self, offset: Option<u64>, rows: Option<u64>) -> String {
        match (rows, offset) {
            (Some(r), Some(o)) => format!("LIMIT {r} OFFSET {o}"),
            (Some(r), None) => format!("LIMIT {r}"),
            (None, Some(o)) => format!("LIMIT -1 OFFSET {o}"),
            (None, None) => String::new(),
        }
    }
}
