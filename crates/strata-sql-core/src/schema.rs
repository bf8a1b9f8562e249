//! Model metadata: runtime descriptors mapping Rust types to tables.
//!
//! The query builder never reflects over Rust types. Every mapped type
//! declares a `ModelDef` (usually through the [`model_def!`] macro) and the
//! visitor resolves column references against it: table name, column
//! aliases, primary key, foreign keys, and per-field rendering flags.

use std::sync::Arc;

use crate::expr::{ColumnRef, Expr};

/// Storage representation of an enum-typed column.
///
/// Comparisons against an enum column coerce the plain value side to this
/// representation before parameterization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumRepr {
    /// Stored as the variant name.
    Text,
    /// Stored as the discriminant.
    Integer,
}

/// Metadata for a single mapped column.
#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    /// Logical field name on the Rust type.
    pub name: &'static str,
    /// SQL column name (may differ from `name` when aliased).
    pub column: &'static str,
    /// Whether this column is the primary key.
    pub primary_key: bool,
    /// Whether the column is nullable.
    pub nullable: bool,
    /// Row-version marker columns are excluded from UPDATE set lists.
    pub row_version: bool,
    /// Excluded from UPDATE set lists.
    pub skip_update: bool,
    /// Excluded from INSERT column lists.
    pub skip_insert: bool,
    /// Name of the model this field references (foreign key).
    pub references: Option<&'static str>,
    /// Custom SELECT fragment overriding the plain column reference.
    pub custom_select: Option<&'static str>,
    /// Enum storage representation, when the column holds an enum.
    pub enum_repr: Option<EnumRepr>,
}

impl FieldDef {
    /// Creates a field mapping `name` to column `column`.
    #[must_use]
    pub const fn new(name: &'static str, column: &'static str) -> Self {
        Self {
            name,
            column,
            primary_key: false,
            nullable: false,
            row_version: false,
            skip_update: false,
            skip_insert: false,
            references: None,
            custom_select: None,
            enum_repr: None,
        }
    }

    /// Marks this field as the primary key.
    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Marks this field as nullable.
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Marks this field as a row-version column.
    #[must_use]
    pub const fn row_version(mut self) -> Self {
        self.row_version = true;
        self
    }

    /// Excludes this field from UPDATE set lists.
    #[must_use]
    pub const fn skip_update(mut self) -> Self {
        self.skip_update = true;
        self
    }

    /// Excludes this field from INSERT column lists.
    #[must_use]
    pub const fn skip_insert(mut self) -> Self {
        self.skip_insert = true;
        self
    }

    /// Declares a foreign key referencing `model`'s primary key.
    #[must_use]
    pub const fn references(mut self, model: &'static str) -> Self {
        self.references = Some(model);
        self
    }

    /// Overrides the SELECT fragment rendered for this field.
    #[must_use]
    pub const fn custom_select(mut self, sql: &'static str) -> Self {
        self.custom_select = Some(sql);
        self
    }

    /// Declares the column an enum with the given storage representation.
    #[must_use]
    pub const fn enum_repr(mut self, repr: EnumRepr) -> Self {
        self.enum_repr = Some(repr);
        self
    }
}

/// Metadata for a mapped type: table name, columns, primary key.
#[derive(Debug)]
pub struct ModelDef {
    /// Model name (used for FK lookup and diagnostics).
    pub name: &'static str,
    /// SQL table name.
    pub table: &'static str,
    /// All mapped fields, in declaration order.
    pub fields: &'static [FieldDef],
}

impl ModelDef {
    /// Creates a model descriptor.
    #[must_use]
    pub const fn new(
        name: &'static str,
        table: &'static str,
        fields: &'static [FieldDef],
    ) -> Self {
        Self { name, table, fields }
    }

    /// Looks up a field by logical name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns the primary key field, if declared.
    #[must_use]
    pub fn primary_key(&self) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.primary_key)
    }

    /// Returns the field on `self` referencing `other`'s primary key.
    #[must_use]
    pub fn ref_field_to(&self, other: &ModelDef) -> Option<&FieldDef> {
        self.fields
            .iter()
            .find(|f| f.references == Some(other.name))
    }

    /// Identity comparison for registered table descriptors.
    #[must_use]
    pub fn same_as(&self, other: &ModelDef) -> bool {
        std::ptr::eq(self, other)
    }
}

/// A mapped type with an associated `ModelDef`.
pub trait Schema: 'static {
    /// Returns the model descriptor for this type.
    fn model_def() -> &'static ModelDef;

    /// Returns a table reference for building column expressions.
    #[must_use]
    fn table() -> TableRef
    where
        Self: Sized,
    {
        TableRef::new(Self::model_def())
    }
}

/// A reference to a mapped table inside an expression.
///
/// Carries an optional alias. Alias identity, not just the model type,
/// determines how column references render, which is what makes
/// self-joins against the same mapped type unambiguous.
#[derive(Debug, Clone)]
pub struct TableRef {
    /// The referenced model.
    pub model: &'static ModelDef,
    /// Rendering alias, when set by the caller.
    pub alias: Option<Arc<str>>,
}

impl TableRef {
    /// Creates an unaliased reference.
    #[must_use]
    pub const fn new(model: &'static ModelDef) -> Self {
        Self { model, alias: None }
    }

    /// Returns a copy of this reference rendered under `alias`.
    #[must_use]
    pub fn aliased(&self, alias: &str) -> Self {
        Self {
            model: self.model,
            alias: Some(Arc::from(alias)),
        }
    }

    /// Builds a column expression against this table.
    #[must_use]
    pub fn col(&self, field: &str) -> Expr {
        Expr::Column(ColumnRef {
            table: self.clone(),
            field: field.to_string(),
        })
    }
}

/// Builds a column expression against the model's default table reference.
#[must_use]
pub fn col<M: Schema>(field: &str) -> Expr {
    M::table().col(field)
}

/// Implements [`Schema`] for a type from a static field list.
///
/// ```ignore
/// struct Person {
///     id: i64,
///     name: String,
///     age: i32,
/// }
///
/// model_def!(Person, "Person", "person", [
///     FieldDef::new("id", "id").primary_key(),
///     FieldDef::new("name", "name"),
///     FieldDef::new("age", "age"),
/// ]);
/// ```
#[macro_export]
macro_rules! model_def {
    ($ty:ty, $name:literal, $table:literal, [$($field:expr),* $(,)?]) => {
        impl $crate::schema::Schema for $ty {
            fn model_def() -> &'static $crate::schema::ModelDef {
                static FIELDS: &[$crate::schema::FieldDef] = &[$($field),*];
                static DEF: $crate::schema::ModelDef =
                    $crate::schema::ModelDef::new($name, $table, FIELDS);
                &DEF
            }
        }
    };
}
