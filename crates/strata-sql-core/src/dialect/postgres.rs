//! PostgreSQL dialect.

use super::Dialect;

/// The PostgreSQL dialect: numbered `$n` placeholders and `LIMIT ALL`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Creates a new PostgreSQL dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn param(&self, index: usize) -> String {
        format!("${}", index + 1)
    }

    fn limit_clause(&self, offset: Option<u64>, rows: Option<u64>) -> String {
        match (rows, offset) {
            (Some(r), Some(o)) => format!("LIMIT {r} OFFSET {o}"),
            (Some(r), None) => format!("LIMIT {r}"),
            (None, Some(o)) => format!("LIMIT ALL OFFSET {o}"),
            (None, None) => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbered_params() {
        let d = PostgresDialect::new();
        assert_eq!(d.param(0), "$1");
        assert_eq!(d.param(9), "$10");
    }

    #[test]
    fn test_limit_all() {
        let d = PostgresDialect::new();
        assert_eq!(d.limit_clause(Some(7), None), "LIMIT ALL OFFSET 7");
    }
}
