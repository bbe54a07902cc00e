//! # Insert Builder Module
//!
//! Single and bulk inserts. Every row runs the create pipeline before any
//! SQL is compiled; if any row fails, the whole batch fails with per-row
//! error maps and nothing is persisted. Bulk rows are written by one
//! multi-row `INSERT`, so once execution starts the database's own
//! atomicity applies.

use serde_json::Value;
use std::sync::{Arc, Mutex};

use crate::{
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
// InsertQueryBuilder
// ============================================================================

/// Builds and executes `INSERT` statements against one collection.
pub struct InsertQueryBuilder {
    db: Database,
    registry: Arc<Registry>,
    collection: Option<Arc<Collection>>,
    fault: Option<String>,
    rows: Vec<Record>,
    returning: Option<Vec<String>>,
    populate: PopulateSpec,
    ctx: QueryContext,
}

impl InsertQueryBuilder {
    pub(crate) fn new(db: Database, registry: Arc<Registry>, collection: &str) -> Self {
        let resolved = registry.get(collection);
        let fault = match &resolved {
            None => Some(format!("unknown collection '{collection}'")),
            Some(target) if !target.api.create => {
                Some(format!("create operations are disabled for '{collection}'"))
            }
            _ => None,
        };
        Self {
            db,
            registry,
            collection: resolved,
            fault,
            rows: Vec::new(),
            returning: None,
            populate: PopulateSpec::default(),
            ctx: QueryContext::default(),
        }
    }

    /// Queues a single row.
    pub fn value(mut self, row: Record) -> Self {
        self.rows.push(row);
        self
    }

    /// Queues a batch of rows.
    pub fn values(mut self, rows: Vec<Record>) -> Self {
        self.rows.extend(rows);
        self
    }

    /// Requests the inserted rows back. `"*"` returns every field.
    pub fn returning(mut self, columns: &[&str]) -> Self {
        self.returning = Some(if columns.iter().any(|c| *c == "*") {
            Vec::new()
        } else {
            columns.iter().map(|c| c.to_string()).collect()
        });
        self
    }

    /// Populates the returned rows (requires [`Self::returning`]).
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

    // ------------------------------------------------------------------
    // Terminals
    // ------------------------------------------------------------------

    /// Inserts every queued row. On validation failure the error list is
    /// aligned by row index, with empty maps for rows that passed.
    pub async fn run(self) -> QueryOutcome<Vec<Record>, Vec<InputErrors>> {
        match self.run_inner().await {
            Ok(Ok(rows)) => QueryOutcome::Data(rows),
            Ok(Err(errors)) => QueryOutcome::InputErrors(errors),
            Err(error) => QueryOutcome::RuntimeError(error.to_string()),
        }
    }

    /// Convenience terminal for a single queued row.
    pub async fn run_one(self) -> QueryOutcome<Option<Record>, InputErrors> {
        if self.rows.len() > 1 {
            return QueryOutcome::RuntimeError(
                "run_one called with more than one queued row".to_string(),
            );
        }
        match self.run_inner().await {
            Ok(Ok(mut rows)) => QueryOutcome::Data(rows.pop()),
            Ok(Err(mut errors)) => {
                QueryOutcome::InputErrors(errors.pop().unwrap_or_default())
            }
            Err(error) => QueryOutcome::RuntimeError(error.to_string()),
        }
    }

    async fn run_inner(self) -> Result<Result<Vec<Record>, Vec<InputErrors>>, Error> {
        if let Some(fault) = &self.fault {
            return Err(Error::query(fault.clone()));
        }
        let collection = self
            .collection
            .clone()
            .ok_or_else(|| Error::query("no collection bound"))?;
        if self.rows.is_empty() {
            return Err(Error::query("no rows to insert"));
        }

        let rows = collection
            .run_hooks(HookPhase::BeforeCreate, self.rows.clone(), &self.ctx)
            .await?;

        // Validate everything before compiling anything. All rows are
        // attempted so the caller sees every error at once.
        let input = PipelineInput {
            db: &self.db,
            collection: &collection,
            operation: Operation::Create,
            ctx: &self.ctx,
            exclude_id: None,
        };
        let mut sanitized = Vec::with_capacity(rows.len());
        let mut errors = Vec::with_capacity(rows.len());
        let mut failed = false;
        for row in &rows {
            match run_pipeline(&input, row).await? {
                Ok(clean) => {
                    sanitized.push(clean);
                    errors.push(InputErrors::new());
                }
                Err(row_errors) => {
                    sanitized.push(Record::new());
                    errors.push(row_errors);
                    failed = true;
                }
            }
        }
        if failed {
            return Ok(Err(errors));
        }

        let with_id = sanitized.iter().filter(|row| row.contains_key("id")).count();
        if with_id != 0 && with_id != sanitized.len() {
            return Err(Error::query(
                "either every inserted row or none may carry an explicit id",
            ));
        }

        let mut columns: Vec<String> = collection
            .field_names()
            .into_iter()
            .filter(|name| name != "id")
            .collect();
        if with_id == sanitized.len() {
            columns.insert(0, "id".to_string());
        }

        let mut writer = SqlWriter::new(self.db.driver());
        writer.push("INSERT INTO ");
        writer.push_ident(&collection.table);
        writer.push(" (");
        for (index, column) in columns.iter().enumerate() {
            if index > 0 {
                writer.push(", ");
            }
            writer.push_ident(&storage_name(column));
        }
        writer.push(") VALUES ");
        for (row_index, row) in sanitized.iter().enumerate() {
            if row_index > 0 {
                writer.push(", ");
            }
            writer.push("(");
            for (index, column) in columns.iter().enumerate() {
                if index > 0 {
                    writer.push(", ");
                }
                writer.bind(row.get(column).cloned().unwrap_or(Value::Null));
            }
            writer.push(")");
        }

        let returning = self.returning.as_ref().map(|columns| {
            if columns.is_empty() {
                collection.field_names()
            } else {
                columns.clone()
            }
        });
        if let Some(returning) = &returning {
            writer.push(" RETURNING ");
            for (index, column) in returning.iter().enumerate() {
                if index > 0 {
                    writer.push(", ");
                }
                writer.push_ident(&storage_name(column));
            }
        }

        let (sql, params) = writer.finish();
        log_statement(&sql, &params);

        let mut inserted = match &returning {
            Some(columns) => {
                let shape = collection.shape_of(columns)?;
                let raw = self.db.fetch_all(&sql, bind_params(&params)?).await?;
                let mut records = Vec::with_capacity(raw.len());
                for row in &raw {
                    let mut record = crate::sql::decode_row(row, &shape)?;
                    sanitize_read(&collection, &mut record);
                    records.push(record);
                }
                records
            }
            None => {
                self.db.execute(&sql, bind_params(&params)?).await?;
                Vec::new()
            }
        };

        if !self.populate.is_empty() && !inserted.is_empty() {
            let cache = self
                .ctx
                .shared_cache
                .clone()
                .unwrap_or_else(|| Arc::new(Mutex::new(PopulationCache::default())));
            populate_rows(
                &self.db,
                &self.registry,
                &collection,
                &mut inserted,
                &self.populate,
                &self.ctx,
                cache,
            )
            .await?;
        }

        let inserted = collection
            .run_hooks(HookPhase::AfterCreate, inserted, &self.ctx)
            .await?;

        Ok(Ok(inserted))
    }
}
