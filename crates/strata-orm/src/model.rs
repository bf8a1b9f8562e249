//! Model trait tying schema metadata to row materialization.

use strata_sql_core::{FieldDef, Schema, ToSqlValue};

/// A mapped type that can be loaded from and written to the database.
///
/// Extends [`Schema`] with the primary-key accessors the execution layer
/// needs for lookups and deletes.
///
/// # Example
///
/// ```ignore
/// #[derive(sqlx::FromRow)]
/// struct Person {
///     id: i64,
///     name: String,
///     age: i64,
/// }
///
/// model_def!(Person, "Person", "person", [
///     FieldDef::new("id", "id").primary_key(),
///     FieldDef::new("name", "name"),
///     FieldDef::new("age", "age"),
/// ]);
///
/// impl Model for Person {
///     type PrimaryKey = i64;
///     fn pk(&self) -> i64 {
///         self.id
///     }
/// }
/// ```
pub trait Model: Schema + Send + Sync + Sized {
    /// The primary key type.
    type PrimaryKey: ToSqlValue + Clone + Send + Sync;

    /// Returns the primary key value for this instance.
    fn pk(&self) -> Self::PrimaryKey;

    /// Returns the primary key field descriptor, if one is declared.
    #[must_use]
    fn pk_field() -> Option<&'static FieldDef> {
        Self::model_def().primary_key()
    }
}
