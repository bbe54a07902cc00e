//! # Strata ORM
//!
//! A registry-driven query layer for content collections over PostgreSQL
//! and SQLite. Collections are declared at runtime as named fields with
//! sanitizers, validators and relation populators; the four statement
//! builders compile condition trees per driver, run every write through the
//! sanitization and validation pipeline, resolve relations in batches and
//! report through a serializable outcome envelope instead of raising.
//!
//! ```no_run
//! use strata_orm::{
//!     Collection, Database, Field, Op, Orm, Registry,
//! };
//!
//! # async fn demo() -> Result<(), strata_orm::Error> {
//! let db = Database::builder().connect("sqlite::memory:").await?;
//! let registry = Registry::builder()
//!     .collection(
//!         Collection::builder("products")
//!             .field("name", Field::text().required())
//!             .field("price", Field::float())
//!             .build(),
//!     )
//!     .build();
//! let orm = Orm::new(db, registry);
//!
//! let cheap = orm
//!     .select_from("products")
//!     .where_("price", Op::Lt, 10.0)
//!     .all()
//!     .await;
//! # let _ = cheap;
//! # Ok(())
//! # }
//! ```

pub mod condition;
pub mod context;
pub mod database;
pub mod delete;
pub mod error;
pub mod guard;
pub mod insert;
pub mod orm;
pub mod outcome;
pub mod pagination;
pub mod pipeline;
pub mod populate;
pub mod query_string;
pub mod schema;
pub mod select;
pub mod sql;
pub mod update;

pub use condition::{Condition, ConditionGroup, GroupKind, Op, OrGroup, RecordsMode};
pub use context::{QueryContext, Translator};
pub use database::{Connection, Database, DatabaseBuilder, Drivers, RawQuery};
pub use delete::DeleteQueryBuilder;
pub use error::Error;
pub use guard::Guard;
pub use insert::InsertQueryBuilder;
pub use orm::Orm;
pub use outcome::{assert_query, InputErrors, QueryError, QueryOutcome};
pub use pagination::Paginated;
pub use pipeline::{Operation, OperationScope, Sanitizer, Validator, ValidatorCtx};
pub use populate::{
    CustomPopulator, PopulateSpec, PopulationCache, PopulationContext, Populator,
};
pub use query_string::ApplyOptions;
pub use schema::{
    ApiFlags, Collection, CollectionBuilder, Field, FieldKind, FieldStorage, Hook, HookPhase,
    Record, Registry, RegistryBuilder, SortDirection,
};
pub use select::SelectQueryBuilder;
pub use update::UpdateQueryBuilder;
