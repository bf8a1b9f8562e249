//! Join composition.
//!
//! Extends [`Query`] with INNER/LEFT/RIGHT/FULL/CROSS joins. When no
//! predicate is given the relationship is inferred from foreign-key
//! metadata, checked in both directions. Aliased joins render predicates
//! against the alias; because column expressions carry their own
//! [`crate::schema::TableRef`], an alias can never leak into clauses built
//! later.

use crate::dialect::Dialect;
use crate::error::{BuilderError, Result};
use crate::expr::Expr;
use crate::schema::{ModelDef, Schema};

use super::query::{verify_fragment, Query};
use super::visit::Visitor;

/// The join flavors the FROM clause supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    /// INNER JOIN.
    Inner,
    /// LEFT JOIN.
    Left,
    /// RIGHT JOIN.
    Right,
    /// FULL JOIN.
    Full,
    /// CROSS JOIN; an explicit predicate moves to the WHERE clause.
    Cross,
}

impl JoinType {
    /// The SQL keyword for this join.
    #[must_use]
    pub const fn sql(&self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
            Self::Full => "FULL JOIN",
            Self::Cross => "CROSS JOIN",
        }
    }
}

/// A delegate producing custom join SQL from the dialect, the joined
/// table's metadata, and the rendered predicate.
pub type JoinFormat = Box<dyn Fn(&dyn Dialect, &ModelDef, &str) -> String + Send + Sync>;

/// Per-join rendering options.
#[derive(Default)]
pub struct TableOptions {
    /// Renders the joined table (and its predicate columns) under this
    /// alias, enabling multiple joins against the same table.
    pub alias: Option<String>,
    /// Overrides the standard `<JOIN> <table> ON <predicate>` rendering.
    pub join_format: Option<JoinFormat>,
}

impl TableOptions {
    /// Options that alias the joined table.
    #[must_use]
    pub fn aliased(alias: &str) -> Self {
        Self {
            alias: Some(alias.to_string()),
            join_format: None,
        }
    }

    /// Options with a custom join formatter.
    #[must_use]
    pub fn formatted(join_format: JoinFormat) -> Self {
        Self {
            alias: None,
            join_format: Some(join_format),
        }
    }
}

impl<M: Schema> Query<M> {
    /// INNER JOINs `T`, inferring the predicate from foreign-key
    /// metadata when none is given.
    pub fn join<T: Schema>(&mut self, on: Option<Expr>) -> Result<&mut Self> {
        self.add_join(JoinType::Inner, M::model_def(), T::model_def(), on, TableOptions::default())
    }

    /// LEFT JOINs `T`.
    pub fn left_join<T: Schema>(&mut self, on: Option<Expr>) -> Result<&mut Self> {
        self.add_join(JoinType::Left, M::model_def(), T::model_def(), on, TableOptions::default())
    }

    /// RIGHT JOINs `T`.
    pub fn right_join<T: Schema>(&mut self, on: Option<Expr>) -> Result<&mut Self> {
        self.add_join(JoinType::Right, M::model_def(), T::model_def(), on, TableOptions::default())
    }

    /// FULL JOINs `T`.
    pub fn full_join<T: Schema>(&mut self, on: Option<Expr>) -> Result<&mut Self> {
        self.add_join(JoinType::Full, M::model_def(), T::model_def(), on, TableOptions::default())
    }

    /// CROSS JOINs `T`. An explicit predicate renders in the WHERE
    /// clause; with neither predicate nor inferable relationship the join
    /// is unconditional.
    pub fn cross_join<T: Schema>(&mut self, on: Option<Expr>) -> Result<&mut Self> {
        self.add_join(JoinType::Cross, M::model_def(), T::model_def(), on, TableOptions::default())
    }

    /// Joins `T` with explicit [`TableOptions`] (alias or custom format).
    pub fn join_with_options<T: Schema>(
        &mut self,
        join_type: JoinType,
        on: Option<Expr>,
        options: TableOptions,
    ) -> Result<&mut Self> {
        self.add_join(join_type, M::model_def(), T::model_def(), on, options)
    }

    /// Joins two tables that may both differ from the root.
    pub fn join_between<S: Schema, T: Schema>(
        &mut self,
        join_type: JoinType,
        on: Option<Expr>,
    ) -> Result<&mut Self> {
        self.add_join(join_type, S::model_def(), T::model_def(), on, TableOptions::default())
    }

    /// Appends caller-formatted join SQL, after injection checks.
    pub fn custom_join(&mut self, fragment: &str) -> Result<&mut Self> {
        verify_fragment(fragment)?;
        self.prefix_fields = true;
        self.joins.push(fragment.to_string());
        Ok(self)
    }

    /// Whether `def`'s table is already referenced by this query.
    #[must_use]
    pub fn is_joined(&self, def: &ModelDef) -> bool {
        self.table_defs.iter().any(|d| d.same_as(def))
    }

    fn add_join(
        &mut self,
        join_type: JoinType,
        source: &'static ModelDef,
        target: &'static ModelDef,
        on: Option<Expr>,
        options: TableOptions,
    ) -> Result<&mut Self> {
        self.register_table(source);
        self.register_table(target);
        self.prefix_fields = true;

        let predicate = match on {
            Some(expr) => {
                // Join predicates stay plain column=column text.
                let mut scratch = Vec::new();
                Some(
                    Visitor::new(self.dialect(), &mut scratch)
                        .qualify(true)
                        .join_mode()
                        .predicate(&expr)?,
                )
            }
            None => self.infer_predicate(
                source,
                target,
                options.alias.as_deref(),
                join_type == JoinType::Cross,
            )?,
        };

        let target_sql = {
            let d = self.dialect();
            match &options.alias {
                Some(alias) => format!(
                    "{} AS {}",
                    d.quoted_table_name(target),
                    d.quoted_name(alias)
                ),
                None => d.quoted_table_name(target),
            }
        };

        if let Some(format) = options.join_format {
            let sql = format(self.dialect(), target, predicate.as_deref().unwrap_or(""));
            self.joins.push(sql);
            return Ok(self);
        }

        match (join_type, predicate) {
            (JoinType::Cross, Some(p)) => {
                self.joins.push(format!("CROSS JOIN {target_sql}"));
                self.append_where_sql("AND", p)?;
            }
            (JoinType::Cross, None) => {
                self.joins.push(format!("CROSS JOIN {target_sql}"));
            }
            (jt, Some(p)) => {
                self.joins.push(format!("{} {target_sql} ON {p}", jt.sql()));
            }
            (jt, None) => {
                // infer_predicate only returns None for CROSS joins
                return Err(BuilderError::InvalidState(format!(
                    "{} without predicate",
                    jt.sql()
                )));
            }
        }
        Ok(self)
    }

    fn register_table(&mut self, def: &'static ModelDef) {
        if !self.is_joined(def) {
            self.table_defs.push(def);
        }
    }

    /// Finds the foreign-key relationship between `source` and `target`,
    /// in either direction.
    fn infer_predicate(
        &self,
        source: &'static ModelDef,
        target: &'static ModelDef,
        target_alias: Option<&str>,
        is_cross: bool,
    ) -> Result<Option<String>> {
        let d = self.dialect();
        let source_sql = d.quoted_table_name(source);
        let target_sql = match target_alias {
            Some(alias) => d.quoted_name(alias),
            None => d.quoted_table_name(target),
        };

        if let Some(fk) = source.ref_field_to(target) {
            let pk = target.primary_key().ok_or_else(|| {
                BuilderError::InvalidState(format!("no primary key on '{}'", target.name))
            })?;
            return Ok(Some(format!(
                "({} = {})",
                d.qualified_column(&source_sql, fk.column),
                d.qualified_column(&target_sql, pk.column)
            )));
        }
        if let Some(fk) = target.ref_field_to(source) {
            let pk = source.primary_key().ok_or_else(|| {
                BuilderError::InvalidState(format!("no primary key on '{}'", source.name))
            })?;
            return Ok(Some(format!(
                "({} = {})",
                d.qualified_column(&source_sql, pk.column),
                d.qualified_column(&target_sql, fk.column)
            )));
        }
        if is_cross {
            return Ok(None);
        }
        Err(BuilderError::NoRelationship {
            from: source.name,
            to: target.name,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::builder::QueryType;
    use crate::dialect::GenericDialect;
    use crate::model_def;
    use crate::schema::FieldDef;
    use crate::value::SqlValue;

    struct Person;
    model_def!(Person, "Person", "person", [
        FieldDef::new("id", "id").primary_key(),
        FieldDef::new("name", "name"),
        FieldDef::new("age", "age"),
    ]);

    struct OrderLine;
    model_def!(OrderLine, "OrderLine", "order_line", [
        FieldDef::new("id", "id").primary_key(),
        FieldDef::new("person_id", "person_id").references("Person"),
        FieldDef::new("total", "total"),
    ]);

    struct Audit;
    model_def!(Audit, "Audit", "audit", [
        FieldDef::new("id", "id").primary_key(),
        FieldDef::new("note", "note"),
    ]);

    fn query() -> Query<Person> {
        Query::new(Arc::new(GenericDialect::new()))
    }

    #[test]
    fn test_inferred_join_uses_reverse_foreign_key() {
        let mut q = query();
        q.join::<OrderLine>(None).unwrap();
        let sql = q.to_select_statement(QueryType::Select).unwrap();
        assert_eq!(
            sql,
            "SELECT \"person\".\"id\", \"person\".\"name\", \"person\".\"age\" \
             FROM \"person\" INNER JOIN \"order_line\" \
             ON (\"person\".\"id\" = \"order_line\".\"person_id\")"
        );
    }

    #[test]
    fn test_inferred_join_uses_forward_foreign_key() {
        let mut q: Query<OrderLine> = Query::new(Arc::new(GenericDialect::new()));
        q.left_join::<Person>(None).unwrap();
        let sql = q.to_select_statement(QueryType::Select).unwrap();
        assert!(
            sql.contains(
                "LEFT JOIN \"person\" ON (\"order_line\".\"person_id\" = \"person\".\"id\")"
            ),
            "unexpected SQL: {sql}"
        );
    }

    #[test]
    fn test_join_without_relationship_fails() {
        let mut q = query();
        let err = q.join::<Audit>(None).err().unwrap();
        assert_eq!(
            err.to_string(),
            "could not infer relationship between Person and Audit"
        );
        assert!(matches!(
            err,
            BuilderError::NoRelationship {
                from: "Person",
                to: "Audit"
            }
        ));
    }

    #[test]
    fn test_cross_join_without_relationship_is_unconditional() {
        let mut q = query();
        q.cross_join::<Audit>(None).unwrap();
        let sql = q.to_select_statement(QueryType::Select).unwrap();
        assert!(sql.contains("CROSS JOIN \"audit\""), "{sql}");
        assert!(!sql.contains("WHERE"), "{sql}");
    }

    #[test]
    fn test_cross_join_predicate_moves_to_where() {
        let mut q = query();
        q.cross_join::<Audit>(Some(
            Person::table().col("id").eq(Audit::table().col("id")),
        ))
        .unwrap();
        let sql = q.to_select_statement(QueryType::Select).unwrap();
        assert!(sql.contains("CROSS JOIN \"audit\""), "{sql}");
        assert!(
            sql.contains("WHERE (\"person\".\"id\" = \"audit\".\"id\")"),
            "{sql}"
        );
    }

    #[test]
    fn test_explicit_predicate_stays_unparameterized() {
        let mut q = query();
        q.join::<OrderLine>(Some(
            Person::table()
                .col("id")
                .eq(OrderLine::table().col("person_id"))
                .and(OrderLine::table().col("total").gt(100)),
        ))
        .unwrap();
        let sql = q.to_select_statement(QueryType::Select).unwrap();
        assert!(
            sql.contains(
                "ON ((\"person\".\"id\" = \"order_line\".\"person_id\") \
                 AND (\"order_line\".\"total\" > 100))"
            ),
            "unexpected SQL: {sql}"
        );
        assert!(q.params().is_empty());
    }

    #[test]
    fn test_aliased_join_and_scoping() {
        let mut q = query();
        q.join_with_options::<OrderLine>(
            JoinType::Inner,
            Some(
                Person::table()
                    .col("id")
                    .eq(OrderLine::table().aliased("o2").col("person_id")),
            ),
            TableOptions::aliased("o2"),
        )
        .unwrap();
        // a later root-table condition never picks up the join alias
        q.where_(Person::table().col("age").gt(18)).unwrap();
        let sql = q.to_select_statement(QueryType::Select).unwrap();
        assert!(
            sql.contains(
                "INNER JOIN \"order_line\" AS \"o2\" \
                 ON (\"person\".\"id\" = \"o2\".\"person_id\")"
            ),
            "unexpected SQL: {sql}"
        );
        assert!(sql.contains("WHERE (\"person\".\"age\" > ?)"), "{sql}");
        assert_eq!(q.params(), vec![SqlValue::Int(18)]);
    }

    #[test]
    fn test_later_join_does_not_inherit_alias() {
        let mut q = query();
        q.join_with_options::<OrderLine>(
            JoinType::Inner,
            Some(
                Person::table()
                    .col("id")
                    .eq(OrderLine::table().aliased("o1").col("person_id")),
            ),
            TableOptions::aliased("o1"),
        )
        .unwrap();
        q.cross_join::<Audit>(None).unwrap();
        let sql = q.to_select_statement(QueryType::Select).unwrap();
        assert!(sql.contains("CROSS JOIN \"audit\""), "{sql}");
        assert!(!sql.contains("\"o1\" CROSS"), "{sql}");
    }

    #[test]
    fn test_custom_join_fragment() {
        let mut q = query();
        q.custom_join("LEFT JOIN \"audit\" ON \"audit\".\"id\" = \"person\".\"id\"")
            .unwrap();
        let sql = q.to_select_statement(QueryType::Select).unwrap();
        assert!(
            sql.contains("LEFT JOIN \"audit\" ON \"audit\".\"id\" = \"person\".\"id\""),
            "{sql}"
        );
    }

    #[test]
    fn test_join_format_delegate() {
        let mut q = query();
        q.join_with_options::<OrderLine>(
            JoinType::Inner,
            None,
            TableOptions::formatted(Box::new(|d, def, predicate| {
                format!("STRAIGHT_JOIN {} ON {predicate}", d.quoted_table_name(def))
            })),
        )
        .unwrap();
        let sql = q.to_select_statement(QueryType::Select).unwrap();
        assert!(
            sql.contains(
                "STRAIGHT_JOIN \"order_line\" \
                 ON (\"person\".\"id\" = \"order_line\".\"person_id\")"
            ),
            "unexpected SQL: {sql}"
        );
    }

    #[test]
    fn test_delete_with_join_rewrites_to_pk_probe() {
        let mut q = query();
        q.join::<OrderLine>(None).unwrap();
        q.where_(OrderLine::table().col("total").gt(100)).unwrap();
        let sql = q.to_delete_row_statement().unwrap();
        assert_eq!(
            sql,
            "DELETE FROM \"person\" WHERE \"id\" IN (\
             SELECT \"person\".\"id\" FROM \"person\" \
             INNER JOIN \"order_line\" \
             ON (\"person\".\"id\" = \"order_line\".\"person_id\") \
             WHERE (\"order_line\".\"total\" > ?))"
        );
        assert_eq!(q.body_params(), vec![SqlValue::Int(100)]);
    }

    #[test]
    fn test_select_into_matches_fields_across_tables() {
        struct PersonTotal;
        model_def!(PersonTotal, "PersonTotal", "person_total", [
            FieldDef::new("name", "name"),
            FieldDef::new("total", "total"),
        ]);

        let mut q = query();
        q.join::<OrderLine>(None).unwrap();
        let sql = q.select_into::<PersonTotal>().unwrap();
        assert!(
            sql.starts_with("SELECT \"person\".\"name\", \"order_line\".\"total\" FROM"),
            "unexpected SQL: {sql}"
        );
    }
}
