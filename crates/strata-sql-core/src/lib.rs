//! # strata-sql-core
//!
//! A typed expression-to-SQL query builder with dialect-aware rendering.
//!
//! This crate provides:
//! - An expression AST constructed by a fluent API and rendered by a
//!   pattern-matched visitor
//! - A mutable query state (SELECT/WHERE/GROUP BY/HAVING/ORDER BY,
//!   paging, joins) that renders deterministic SQL with positional
//!   parameters
//! - Join composition with foreign-key inference and table aliasing
//! - Protection against SQL injection through parameterized values and
//!   raw-fragment verification
//!
//! ## Building a query
//!
//! ```rust
//! use std::sync::Arc;
//! use strata_sql_core::{col, model_def, FieldDef, GenericDialect, Query, QueryType, Schema};
//!
//! struct Person;
//! model_def!(Person, "Person", "person", [
//!     FieldDef::new("id", "id").primary_key(),
//!     FieldDef::new("name", "name"),
//!     FieldDef::new("age", "age"),
//! ]);
//!
//! let mut q: Query<Person> = Query::new(Arc::new(GenericDialect::new()));
//! q.where_(col::<Person>("age").gt(18)).unwrap();
//! q.order_by_desc(col::<Person>("age")).unwrap();
//! q.take(10);
//!
//! assert_eq!(
//!     q.to_select_statement(QueryType::Select).unwrap(),
//!     "SELECT \"id\", \"name\", \"age\" FROM \"person\" \
//!      WHERE (\"age\" > ?) ORDER BY \"age\" DESC LIMIT 10"
//! );
//! ```
//!
//! ## SQL injection prevention
//!
//! Plain values always become bound parameters, and raw string fragments
//! pass a verification pass unless the `unsafe_` variant is used:
//!
//! ```rust
//! use std::sync::Arc;
//! use strata_sql_core::{col, GenericDialect, Query};
//! # use strata_sql_core::{model_def, FieldDef, Schema};
//! # struct Person;
//! # model_def!(Person, "Person", "person", [FieldDef::new("name", "name")]);
//!
//! let user_input = "'; DROP TABLE person; --";
//! let mut q: Query<Person> = Query::new(Arc::new(GenericDialect::new()));
//! q.where_(col::<Person>("name").eq(user_input)).unwrap();
//! // renders WHERE ("name" = ?) with the input bound as a parameter
//! assert!(q.where_raw(user_input).is_err());
//! ```

pub mod builder;
pub mod dialect;
pub mod error;
pub mod expr;
pub mod fragment;
pub mod schema;
pub mod value;

pub use builder::{AnyQuery, JoinFormat, JoinType, Query, QueryType, TableOptions, Visitor};
pub use dialect::{Dialect, GenericDialect, PostgresDialect, SqliteDialect};
pub use error::{BuilderError, Result};
pub use expr::{BinOp, ColumnRef, Expr, ProjItem, SqlFunc, UnOp};
pub use fragment::{Fragment, SelectItem, SelectList};
pub use schema::{col, EnumRepr, FieldDef, ModelDef, Schema, TableRef};
pub use value::{SqlValue, ToSqlValue};
