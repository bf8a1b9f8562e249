//! # strata-orm
//!
//! Async execution of `strata-sql-core` queries against SQLite.
//!
//! The query builder renders SQL text and positional parameters; this
//! crate is the external command boundary that binds those parameters and
//! materializes rows.
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use sqlx::SqlitePool;
//! use strata_orm::{ExecuteQuery, Model};
//! use strata_sql_core::{col, model_def, FieldDef, Query, SqliteDialect};
//!
//! #[derive(sqlx::FromRow)]
//! struct Person {
//!     id: i64,
//!     name: String,
//!     age: i64,
//! }
//!
//! model_def!(Person, "Person", "person", [
//!     FieldDef::new("id", "id").primary_key(),
//!     FieldDef::new("name", "name"),
//!     FieldDef::new("age", "age"),
//! ]);
//!
//! impl Model for Person {
//!     type PrimaryKey = i64;
//!     fn pk(&self) -> i64 {
//!         self.id
//!     }
//! }
//!
//! async fn adults(pool: &SqlitePool) -> strata_orm::Result<Vec<Person>> {
//!     let mut q: Query<Person> = Query::new(Arc::new(SqliteDialect::new()));
//!     q.where_(col::<Person>("age").ge(18))?;
//!     q.order_by_desc(col::<Person>("age"))?;
//!     q.fetch(pool).await
//! }
//! ```

pub mod error;
pub mod exec;
pub mod model;

pub use error::{OrmError, Result};
pub use exec::ExecuteQuery;
pub use model::Model;
