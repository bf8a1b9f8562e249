//! Generic SQL dialect.

use super::Dialect;

/// A generic dialect using ANSI SQL conventions.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericDialect;

impl GenericDialect {
    /// Creates a new generic dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dialect for GenericDialect {
    fn name(&self) -> &'static str {
        "generic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_dialect() {
        let dialect = GenericDialect::new();
        assert_eq!(dialect.name(), "generic");
        assert_eq!(dialect.identifier_quote(), '"');
        assert_eq!(dialect.param(3), "?");
        assert_eq!(dialect.quoted_name("age"), "\"age\"");
        assert_eq!(dialect.boolean_literal(true), "TRUE");
    }
}
