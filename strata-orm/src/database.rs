//! # Database Module
//!
//! This module provides the core database connection and management
//! functionality for Strata ORM. It handles connection pooling, driver
//! detection and raw query execution across PostgreSQL and SQLite.

// ============================================================================
// External Crate Imports
// ============================================================================

use futures::future::BoxFuture;
use sqlx::{any::AnyArguments, Arguments};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Once,
};

// ============================================================================
// Internal Crate Imports
// ============================================================================

use crate::Error;

static INSTALL_DRIVERS: Once = Once::new();

// ============================================================================
// Database Driver Enum
// ============================================================================

/// Supported database drivers for Strata ORM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drivers {
    /// PostgreSQL driver
    Postgres,
    /// SQLite driver
    SQLite,
}

// ============================================================================
// Database Struct
// ============================================================================

/// The main entry point for database operations.
///
/// `Database` manages a connection pool and executes compiled statements on
/// behalf of the query builders. It is designed to be thread-safe and easily
/// shared across an application (internally uses an `Arc` for the connection
/// pool).
///
/// Every statement that reaches the driver increments a shared counter,
/// exposed via [`Database::queries_executed`], so callers can probe query
/// fan-out (e.g. to verify population caching) without attaching a logger.
#[derive(Debug, Clone)]
pub struct Database {
    /// The underlying SQLx connection pool
    pub(crate) pool: sqlx::AnyPool,
    /// The detected database driver
    pub(crate) driver: Drivers,
    /// Statements executed through this pool since connection
    pub(crate) executed: Arc<AtomicU64>,
}

impl Database {
    /// Creates a new DatabaseBuilder for configuring the connection.
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    /// Connects to a database using the provided connection string.
    pub async fn connect(url: &str) -> Result<Self, Error> {
        DatabaseBuilder::new().connect(url).await
    }

    /// The active driver dialect.
    pub fn driver(&self) -> Drivers {
        self.driver
    }

    /// Total number of statements executed through this pool.
    pub fn queries_executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    /// Creates a raw SQL query builder.
    ///
    /// This is the escape hatch for statements the builders do not model,
    /// such as schema setup in tests.
    pub fn raw<'a>(&self, sql: &'a str) -> RawQuery<'a, Self> {
        RawQuery::new(self.clone(), sql)
    }

    fn count_one(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
    }
}

// ============================================================================
// DatabaseBuilder Struct
// ============================================================================

pub struct DatabaseBuilder {
    max_connections: u32,
}

impl DatabaseBuilder {
    pub fn new() -> Self {
        Self { max_connections: 5 }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub async fn connect(self, url: &str) -> Result<Database, Error> {
        INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);

        let pool = sqlx::any::AnyPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(url)
            .await?;
        let driver = if url.starts_with("postgres") {
            Drivers::Postgres
        } else {
            Drivers::SQLite
        };

        log::debug!("connected to {:?} pool at {}", driver, url);

        Ok(Database {
            pool,
            driver,
            executed: Arc::new(AtomicU64::new(0)),
        })
    }
}

impl Default for DatabaseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Connection Trait
// ============================================================================

/// Abstraction over anything that can execute a compiled statement.
///
/// The query builders only ever talk to this trait, which keeps them
/// testable against wrappers that intercept or count statements.
pub trait Connection: Send + Sync {
    fn execute<'a, 'q: 'a>(
        &'a self,
        sql: &'q str,
        args: AnyArguments<'q>,
    ) -> BoxFuture<'a, Result<sqlx::any::AnyQueryResult, sqlx::Error>>;

    fn fetch_all<'a, 'q: 'a>(
        &'a self,
        sql: &'q str,
        args: AnyArguments<'q>,
    ) -> BoxFuture<'a, Result<Vec<sqlx::any::AnyRow>, sqlx::Error>>;

    fn fetch_one<'a, 'q: 'a>(
        &'a self,
        sql: &'q str,
        args: AnyArguments<'q>,
    ) -> BoxFuture<'a, Result<sqlx::any::AnyRow, sqlx::Error>>;

    fn fetch_optional<'a, 'q: 'a>(
        &'a self,
        sql: &'q str,
        args: AnyArguments<'q>,
    ) -> BoxFuture<'a, Result<Option<sqlx::any::AnyRow>, sqlx::Error>>;
}

impl Connection for Database {
    fn execute<'a, 'q: 'a>(
        &'a self,
        sql: &'q str,
        args: AnyArguments<'q>,
    ) -> BoxFuture<'a, Result<sqlx::any::AnyQueryResult, sqlx::Error>> {
        self.count_one();
        Box::pin(async move { sqlx::query_with(sql, args).execute(&self.pool).await })
    }

    fn fetch_all<'a, 'q: 'a>(
        &'a self,
        sql: &'q str,
        args: AnyArguments<'q>,
    ) -> BoxFuture<'a, Result<Vec<sqlx::any::AnyRow>, sqlx::Error>> {
        self.count_one();
        Box::pin(async move { sqlx::query_with(sql, args).fetch_all(&self.pool).await })
    }

    fn fetch_one<'a, 'q: 'a>(
        &'a self,
        sql: &'q str,
        args: AnyArguments<'q>,
    ) -> BoxFuture<'a, Result<sqlx::any::AnyRow, sqlx::Error>> {
        self.count_one();
        Box::pin(async move { sqlx::query_with(sql, args).fetch_one(&self.pool).await })
    }

    fn fetch_optional<'a, 'q: 'a>(
        &'a self,
        sql: &'q str,
        args: AnyArguments<'q>,
    ) -> BoxFuture<'a, Result<Option<sqlx::any::AnyRow>, sqlx::Error>> {
        self.count_one();
        Box::pin(async move { sqlx::query_with(sql, args).fetch_optional(&self.pool).await })
    }
}

// ============================================================================
// Raw SQL Query Builder
// ============================================================================

pub struct RawQuery<'a, C> {
    conn: C,
    sql: &'a str,
    args: AnyArguments<'a>,
}

impl<'a, C> RawQuery<'a, C>
where
    C: Connection,
{
    pub(crate) fn new(conn: C, sql: &'a str) -> Self {
        Self {
            conn,
            sql,
            args: AnyArguments::default(),
        }
    }

    pub fn bind<T>(mut self, value: T) -> Self
    where
        T: 'a + sqlx::Encode<'a, sqlx::Any> + sqlx::Type<sqlx::Any> + Send + Sync,
    {
        let _ = self.args.add(value);
        self
    }

    pub async fn fetch_all<T>(self) -> Result<Vec<T>, Error>
    where
        T: for<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> + Send + Unpin,
    {
        let rows = self.conn.fetch_all(self.sql, self.args).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(T::from_row(row)?);
        }
        Ok(out)
    }

    pub async fn fetch_one<T>(self) -> Result<T, Error>
    where
        T: for<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> + Send + Unpin,
    {
        let row = self.conn.fetch_one(self.sql, self.args).await?;
        Ok(T::from_row(&row)?)
    }

    pub async fn fetch_optional<T>(self) -> Result<Option<T>, Error>
    where
        T: for<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> + Send + Unpin,
    {
        let row = self.conn.fetch_optional(self.sql, self.args).await?;
        match row {
            Some(row) => Ok(Some(T::from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn execute(self) -> Result<u64, Error> {
        let result = self.conn.execute(self.sql, self.args).await?;
        Ok(result.rows_affected())
    }
}
