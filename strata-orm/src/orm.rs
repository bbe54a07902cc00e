//! # Orm Module
//!
//! The entry point tying a connected [`Database`] to a collection
//! [`Registry`]. All four builders are created here; a name that does not
//! resolve to a registered collection still hands back a builder, whose
//! terminal reports the problem through the outcome envelope.

use std::sync::Arc;

use crate::{
    database::Database,
    delete::DeleteQueryBuilder,
    insert::InsertQueryBuilder,
    schema::Registry,
    select::SelectQueryBuilder,
    update::UpdateQueryBuilder,
};

/// A database handle paired with the collections it serves. Cheap to clone.
#[derive(Clone)]
pub struct Orm {
    db: Database,
    registry: Arc<Registry>,
}

impl Orm {
    pub fn new(db: Database, registry: Registry) -> Self {
        Self {
            db,
            registry: Arc::new(registry),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Starts a read against the named collection.
    pub fn select_from(&self, collection: &str) -> SelectQueryBuilder {
        SelectQueryBuilder::new(self.db.clone(), self.registry.clone(), collection)
    }

    /// Starts an insert of one or more rows into the named collection.
    pub fn insert_into(&self, collection: &str) -> InsertQueryBuilder {
        InsertQueryBuilder::new(self.db.clone(), self.registry.clone(), collection)
    }

    /// Starts an update against the named collection.
    pub fn update(&self, collection: &str) -> UpdateQueryBuilder {
        UpdateQueryBuilder::new(self.db.clone(), self.registry.clone(), collection)
    }

    /// Starts a delete against the named collection.
    pub fn delete_from(&self, collection: &str) -> DeleteQueryBuilder {
        DeleteQueryBuilder::new(self.db.clone(), self.registry.clone(), collection)
    }
}
