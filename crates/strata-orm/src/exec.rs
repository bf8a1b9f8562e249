//! Async execution of built queries against a SQLite pool.
//!
//! The builder only renders text; this module is the command-executor
//! boundary. Each operation renders the statement, binds the query's
//! parameters positionally, and materializes rows through `sqlx`.

use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{FromRow, Row, SqlitePool};
use tracing::debug;

use strata_sql_core::{Query, QueryType, Schema, SqlValue, ToSqlValue};

use crate::error::{OrmError, Result};
use crate::model::Model;

/// Async database operations over a built [`Query`].
pub trait ExecuteQuery<M>
where
    M: Model + for<'r> FromRow<'r, SqliteRow> + Unpin,
{
    /// Fetches all matching rows.
    async fn fetch(&self, pool: &SqlitePool) -> Result<Vec<M>>;

    /// Fetches the first matching row, if any.
    async fn first(&self, pool: &SqlitePool) -> Result<Option<M>>;

    /// Fetches exactly one row; zero rows is [`OrmError::NotFound`] and
    /// more than one is [`OrmError::MultipleObjectsReturned`].
    async fn single(&self, pool: &SqlitePool) -> Result<M>;

    /// Fetches the row with the given primary key, ignoring any WHERE
    /// conditions already on the query.
    async fn get(&self, pool: &SqlitePool, key: M::PrimaryKey) -> Result<M>;

    /// Counts the matching rows, ignoring projection and paging.
    async fn count(&self, pool: &SqlitePool) -> Result<i64>;

    /// Whether any row matches.
    async fn exists(&self, pool: &SqlitePool) -> Result<bool>;

    /// Deletes the matching rows, returning how many were removed.
    async fn delete(&self, pool: &SqlitePool) -> Result<u64>;

    /// Reads one value from the first column of the first matching row.
    async fn scalar<T>(&self, pool: &SqlitePool) -> Result<T>
    where
        T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite> + Send + Unpin;
}

impl<M> ExecuteQuery<M> for Query<M>
where
    M: Model + for<'r> FromRow<'r, SqliteRow> + Unpin,
{
    async fn fetch(&self, pool: &SqlitePool) -> Result<Vec<M>> {
        let sql = self.to_select_statement(QueryType::Select)?;
        debug!(sql = %sql, model = M::model_def().name, "executing select");
        let mut query = sqlx::query_as::<_, M>(&sql);
        for value in self.params() {
            query = bind_row_value(query, value);
        }
        Ok(query.fetch_all(pool).await?)
    }

    async fn first(&self, pool: &SqlitePool) -> Result<Option<M>> {
        let mut limited = self.clone();
        limited.take(1);
        let sql = limited.to_select_statement(QueryType::Single)?;
        debug!(sql = %sql, model = M::model_def().name, "executing select first");
        let mut query = sqlx::query_as::<_, M>(&sql);
        for value in limited.params() {
            query = bind_row_value(query, value);
        }
        Ok(query.fetch_optional(pool).await?)
    }

    async fn single(&self, pool: &SqlitePool) -> Result<M> {
        // two rows are enough to detect ambiguity
        let mut limited = self.clone();
        limited.take(2);
        let sql = limited.to_select_statement(QueryType::Single)?;
        debug!(sql = %sql, model = M::model_def().name, "executing select single");
        let mut query = sqlx::query_as::<_, M>(&sql);
        for value in limited.params() {
            query = bind_row_value(query, value);
        }
        let mut rows = query.fetch_all(pool).await?;
        if rows.len() > 1 {
            return Err(OrmError::MultipleObjectsReturned);
        }
        rows.pop().ok_or(OrmError::NotFound)
    }

    async fn get(&self, pool: &SqlitePool, key: M::PrimaryKey) -> Result<M> {
        let pk = M::pk_field().ok_or_else(|| {
            OrmError::InvalidModel(format!("no primary key on '{}'", M::model_def().name))
        })?;
        let mut lookup = self.clone();
        lookup.clear_where();
        lookup.where_(M::table().col(pk.name).eq(key.to_sql_value()))?;
        lookup.single(pool).await
    }

    async fn count(&self, pool: &SqlitePool) -> Result<i64> {
        let sql = self.to_count_statement()?;
        debug!(sql = %sql, model = M::model_def().name, "executing count");
        let mut query = sqlx::query(&sql);
        for value in self.body_params() {
            query = bind_value(query, value);
        }
        let row = query.fetch_one(pool).await?;
        Ok(row.try_get(0)?)
    }

    async fn exists(&self, pool: &SqlitePool) -> Result<bool> {
        Ok(self.count(pool).await? > 0)
    }

    async fn delete(&self, pool: &SqlitePool) -> Result<u64> {
        let sql = self.to_delete_row_statement()?;
        debug!(sql = %sql, model = M::model_def().name, "executing delete");
        let mut query = sqlx::query(&sql);
        for value in self.body_params() {
            query = bind_value(query, value);
        }
        let result = query.execute(pool).await?;
        Ok(result.rows_affected())
    }

    async fn scalar<T>(&self, pool: &SqlitePool) -> Result<T>
    where
        T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite> + Send + Unpin,
    {
        let sql = self.to_select_statement(QueryType::Scalar)?;
        debug!(sql = %sql, model = M::model_def().name, "executing scalar");
        let mut query = sqlx::query(&sql);
        for value in self.params() {
            query = bind_value(query, value);
        }
        let row = query.fetch_one(pool).await?;
        Ok(row.try_get(0)?)
    }
}

/// Binds one value onto a plain query.
fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>,
    value: SqlValue,
) -> sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(Option::<i64>::None),
        SqlValue::Bool(b) => query.bind(b),
        SqlValue::Int(i) => query.bind(i),
        SqlValue::Float(f) => query.bind(f),
        SqlValue::Text(s) => query.bind(s),
        SqlValue::Blob(b) => query.bind(b),
    }
}

/// Binds one value onto a row-mapped query.
fn bind_row_value<'q, M>(
    query: sqlx::query::QueryAs<'q, sqlx::Sqlite, M, SqliteArguments<'q>>,
    value: SqlValue,
) -> sqlx::query::QueryAs<'q, sqlx::Sqlite, M, SqliteArguments<'q>>
where
    M: for<'r> FromRow<'r, SqliteRow>,
{
    match value {
        SqlValue::Null => query.bind(Option::<i64>::None),
        SqlValue::Bool(b) => query.bind(b),
        SqlValue::Int(i) => query.bind(i),
        SqlValue::Float(f) => query.bind(f),
        SqlValue::Text(s) => query.bind(s),
        SqlValue::Blob(b) => query.bind(b),
    }
}
