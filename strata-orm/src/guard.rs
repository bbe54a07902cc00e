//! # Guard Module
//!
//! Reusable condition sets prepended to every query they scope. Guards
//! compose ahead of caller conditions, so a guard on `author_id` cannot be
//! widened by anything the caller (or a bound query string) adds later.

use serde_json::Value;

use crate::{
    condition::{ConditionGroup, Op, OrGroup, RecordsMode},
    delete::DeleteQueryBuilder,
    orm::Orm,
    select::SelectQueryBuilder,
    update::UpdateQueryBuilder,
};

/// A named bundle of conditions applied ahead of caller filters.
#[derive(Debug, Clone)]
pub struct Guard {
    root: ConditionGroup,
}

impl Default for Guard {
    fn default() -> Self {
        Self::new()
    }
}

impl Guard {
    pub fn new() -> Self {
        Self {
            root: ConditionGroup::and(),
        }
    }

    pub fn where_(mut self, column: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        self.root = self.root.where_(column, op, value);
        self
    }

    pub fn where_opt(
        mut self,
        column: impl Into<String>,
        op: Op,
        value: Option<impl Into<Value>>,
    ) -> Self {
        self.root = self.root.where_opt(column, op, value);
        self
    }

    pub fn or_group(mut self, f: impl FnOnce(OrGroup) -> OrGroup) -> Self {
        self.root = self.root.or_group(f);
        self
    }

    pub fn where_records_in(
        mut self,
        column: impl Into<String>,
        ids: Vec<i64>,
        mode: RecordsMode,
    ) -> Self {
        self.root = self.root.where_records_in(column, ids, mode);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub(crate) fn conditions(&self) -> ConditionGroup {
        self.root.clone()
    }
}

impl Orm {
    /// A read scoped by the guard's conditions.
    pub fn guarded_select_from(&self, collection: &str, guard: &Guard) -> SelectQueryBuilder {
        let mut builder = self.select_from(collection);
        builder.prepend_conditions(guard.conditions());
        builder
    }

    /// An update that can only ever touch rows the guard matches.
    pub fn guarded_update(&self, collection: &str, guard: &Guard) -> UpdateQueryBuilder {
        let mut builder = self.update(collection);
        builder.prepend_conditions(guard.conditions());
        builder
    }

    /// A delete that can only ever touch rows the guard matches.
    pub fn guarded_delete_from(&self, collection: &str, guard: &Guard) -> DeleteQueryBuilder {
        let mut builder = self.delete_from(collection);
        builder.prepend_conditions(guard.conditions());
        builder
    }
}
