//! # Delete Builder Module
//!
//! Scoped deletes. The deleted rows come back by default so the caller can
//! distinguish a no-op delete (empty data) from a failure; `returning`
//! narrows the columns.

use serde_json::Value;
use std::sync::Arc;

use crate::{
    condition::{compile_group, with_language_scope, ConditionGroup, Op, OrGroup, RecordsMode},
    context::QueryContext,
    database::{Connection, Database},
    outcome::QueryOutcome,
    pipeline::sanitize_read,
    schema::{Collection, HookPhase, Record, Registry},
    select::log_statement,
    sql::{bind_params, storage_name, SqlWriter},
    Error,
};

// ============================================================================
// DeleteQueryBuilder
// ============================================================================

/// Builds and executes `DELETE` statements against one collection.
pub struct DeleteQueryBuilder {
    db: Database,
    collection: Option<Arc<Collection>>,
    fault: Option<String>,
    pub(crate) root: ConditionGroup,
    returning: Option<Vec<String>>,
    ctx: QueryContext,
}

impl DeleteQueryBuilder {
    pub(crate) fn new(db: Database, registry: Arc<Registry>, collection: &str) -> Self {
        let resolved = registry.get(collection);
        let fault = match &resolved {
            None => Some(format!("unknown collection '{collection}'")),
            Some(target) if !target.api.delete => {
                Some(format!("delete operations are disabled for '{collection}'"))
            }
            _ => None,
        };
        Self {
            db,
            collection: resolved,
            fault,
            root: ConditionGroup::and(),
            returning: None,
            ctx: QueryContext::default(),
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

    /// Narrows the returned columns; every field comes back by default.
    pub fn returning(mut self, columns: &[&str]) -> Self {
        self.returning = Some(if columns.iter().any(|c| *c == "*") {
            Vec::new()
        } else {
            columns.iter().map(|c| c.to_string()).collect()
        });
        self
    }

    pub fn with_context(mut self, ctx: QueryContext) -> Self {
        self.ctx = ctx;
        self
    }

    pub(crate) fn prepend_conditions(&mut self, conditions: ConditionGroup) {
        self.root.prepend(conditions.children);
    }

    // ------------------------------------------------------------------
    // Terminal
    // ------------------------------------------------------------------

    /// Deletes every matching row and returns them.
    pub async fn run(self) -> QueryOutcome<Vec<Record>> {
        match self.run_inner().await {
            Ok(rows) => QueryOutcome::Data(rows),
            Err(error) => QueryOutcome::from_runtime(error),
        }
    }

    async fn run_inner(self) -> Result<Vec<Record>, Error> {
        if let Some(fault) = &self.fault {
            return Err(Error::query(fault.clone()));
        }
        let collection = self
            .collection
            .clone()
            .ok_or_else(|| Error::query("no collection bound"))?;

        collection
            .run_hooks(HookPhase::BeforeDelete, Vec::new(), &self.ctx)
            .await?;

        let mut writer = SqlWriter::new(self.db.driver());
        writer.push("DELETE FROM ");
        writer.push_ident(&collection.table);

        let conditions =
            with_language_scope(&self.root, &collection, self.ctx.language.as_deref());
        if !conditions.is_empty() {
            writer.push(" WHERE ");
            compile_group(&conditions, &collection, &mut writer)?;
        }

        let returning = match &self.returning {
            Some(columns) if !columns.is_empty() => columns.clone(),
            _ => collection.field_names(),
        };
        writer.push(" RETURNING ");
        for (index, column) in returning.iter().enumerate() {
            if index > 0 {
                writer.push(", ");
            }
            writer.push_ident(&storage_name(column));
        }

        let (sql, params) = writer.finish();
        log_statement(&sql, &params);

        let shape = collection.shape_of(&returning)?;
        let raw = self.db.fetch_all(&sql, bind_params(&params)?).await?;
        let mut rows = Vec::with_capacity(raw.len());
        for row in &raw {
            let mut record = crate::sql::decode_row(row, &shape)?;
            sanitize_read(&collection, &mut record);
            rows.push(record);
        }

        let rows = collection
            .run_hooks(HookPhase::AfterDelete, rows, &self.ctx)
            .await?;

        Ok(rows)
    }
}
