//! # Update Builder Module
//!
//! Scoped updates with the update pipeline in front, plus the
//! validate-without-persist terminal used by `/validate`-style routes.
//! Updates return the affected rows; an id-scoped update matching nothing
//! returns empty data, which the HTTP layer may decide means 404.

use serde_json::Value;
use std::sync::{Arc, Mutex};

use crate::{
    condition::{compile_group, with_language_scope, ConditionGroup, Op, OrGroup, RecordsMode},
    context::QueryContext,
    database::{Connection, Database},
    outcome::{InputErrors, QueryOutcome},
    pipeline::{run_pipeline, sanitize_read, Operation, PipelineInput},
    populate::{populate_rows, PopulateSpec, PopulationCache},
    schema::{Collection, HookPhase, Record, Registry},
    select::log_statement,
    sql::{bind_params, storage_name, SqlWriter},
    Error,
};

// ============================================================================
// UpdateQueryBuilder
// ============================================================================

/// Builds and executes `UPDATE` statements against one collection.
pub struct UpdateQueryBuilder {
    db: Database,
    registry: Arc<Registry>,
    collection: Option<Arc<Collection>>,
    fault: Option<String>,
    patch: Record,
    pub(crate) root: ConditionGroup,
    returning: Option<Vec<String>>,
    populate: PopulateSpec,
    ctx: QueryContext,
}

impl UpdateQueryBuilder {
    pub(crate) fn new(db: Database, registry: Arc<Registry>, collection: &str) -> Self {
        let resolved = registry.get(collection);
        let fault = match &resolved {
            None => Some(format!("unknown collection '{collection}'")),
            Some(target) if !target.api.update => {
                Some(format!("update operations are disabled for '{collection}'"))
            }
            _ => None,
        };
        Self {
            db,
            registry,
            collection: resolved,
            fault,
            patch: Record::new(),
            root: ConditionGroup::and(),
            returning: None,
            populate: PopulateSpec::default(),
            ctx: QueryContext::default(),
        }
    }

    /// Merges fields into the patch. Only fields present in the patch run
    /// through the pipeline and reach the statement.
    pub fn set(mut self, patch: Record) -> Self {
        for (key, value) in patch {
            self.patch.insert(key, value);
        }
        self
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

    pub fn populate(mut self, paths: &[&str]) -> Self {
        for path in paths {
            self.populate.add_path(path);
        }
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
    // Terminals
    // ------------------------------------------------------------------

    /// Runs the update pipeline and returns the envelope without executing
    /// any SQL. Lets callers pre-check input.
    pub async fn validate(self) -> QueryOutcome<(), InputErrors> {
        match self.validate_inner().await {
            Ok(Ok(_)) => QueryOutcome::Data(()),
            Ok(Err(errors)) => QueryOutcome::InputErrors(errors),
            Err(error) => QueryOutcome::RuntimeError(error.to_string()),
        }
    }

    /// Applies the patch to every matching row and returns them.
    pub async fn run(self) -> QueryOutcome<Vec<Record>, InputErrors> {
        match self.run_inner().await {
            Ok(Ok(rows)) => QueryOutcome::Data(rows),
            Ok(Err(errors)) => QueryOutcome::InputErrors(errors),
            Err(error) => QueryOutcome::RuntimeError(error.to_string()),
        }
    }

    fn collection(&self) -> Result<Arc<Collection>, Error> {
        if let Some(fault) = &self.fault {
            return Err(Error::query(fault.clone()));
        }
        self.collection
            .clone()
            .ok_or_else(|| Error::query("no collection bound"))
    }

    async fn validate_inner(&self) -> Result<Result<Record, InputErrors>, Error> {
        let collection = self.collection()?;
        if self.patch.is_empty() {
            return Err(Error::query("no fields to update"));
        }

        let input = PipelineInput {
            db: &self.db,
            collection: &collection,
            operation: Operation::Update,
            ctx: &self.ctx,
            exclude_id: self.root.pinned_id(),
        };
        run_pipeline(&input, &self.patch).await
    }

    async fn run_inner(self) -> Result<Result<Vec<Record>, InputErrors>, Error> {
        let collection = self.collection()?;

        let mut patches = collection
            .run_hooks(HookPhase::BeforeUpdate, vec![self.patch.clone()], &self.ctx)
            .await?;
        let patch = patches.pop().unwrap_or_default();
        if patch.is_empty() {
            return Err(Error::query("no fields to update"));
        }

        let input = PipelineInput {
            db: &self.db,
            collection: &collection,
            operation: Operation::Update,
            ctx: &self.ctx,
            exclude_id: self.root.pinned_id(),
        };
        let sanitized = match run_pipeline(&input, &patch).await? {
            Ok(sanitized) => sanitized,
            Err(errors) => return Ok(Err(errors)),
        };
        // The update pipeline echoes only patched fields.
        let assignments: Vec<(String, Value)> = collection
            .field_names()
            .into_iter()
            .filter(|name| name != "id")
            .filter_map(|name| sanitized.get(&name).map(|v| (name.clone(), v.clone())))
            .filter(|(name, _)| patch.contains_key(name))
            .collect();
        if assignments.is_empty() {
            return Err(Error::query("no fields to update"));
        }

        let mut writer = SqlWriter::new(self.db.driver());
        writer.push("UPDATE ");
        writer.push_ident(&collection.table);
        writer.push(" SET ");
        for (index, (column, value)) in assignments.iter().enumerate() {
            if index > 0 {
                writer.push(", ");
            }
            writer.push_ident(&storage_name(column));
            writer.push(" = ");
            writer.bind(value.clone());
        }

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

        if !self.populate.is_empty() && !rows.is_empty() {
            let cache = self
                .ctx
                .shared_cache
                .clone()
                .unwrap_or_else(|| Arc::new(Mutex::new(PopulationCache::default())));
            populate_rows(
                &self.db,
                &self.registry,
                &collection,
                &mut rows,
                &self.populate,
                &self.ctx,
                cache,
            )
            .await?;
        }

        let rows = collection
            .run_hooks(HookPhase::AfterUpdate, rows, &self.ctx)
            .await?;

        Ok(Ok(rows))
    }
}
