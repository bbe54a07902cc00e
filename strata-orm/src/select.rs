//! # Select Builder Module
//!
//! Fluent accumulation of a read statement: column selection, condition
//! tree, ordering, pagination and population. Terminal methods consume the
//! builder, compile the statement for the active driver, execute it and
//! return the [`QueryOutcome`] envelope; a not-found `first()` is a success
//! carrying `None`, never a failure.

use serde_json::Value;
use std::sync::{Arc, Mutex};

use crate::{
    condition::{compile_group, with_language_scope, ConditionGroup, Op, OrGroup, RecordsMode},
    context::QueryContext,
    database::{Connection, Database},
    outcome::QueryOutcome,
    pagination::{last_page, Paginated},
    pipeline::sanitize_read,
    populate::{populate_rows, PopulateSpec, PopulationCache},
    schema::{Collection, FieldStorage, HookPhase, Record, Registry, SortDirection},
    sql::{bind_params, decode_row, literal, storage_name, SqlWriter},
    Error,
};

enum Projection {
    Columns,
    Count,
    Exists,
}

// ============================================================================
// SelectQueryBuilder
// ============================================================================

/// Builds and executes `SELECT` statements against one collection.
pub struct SelectQueryBuilder {
    pub(crate) db: Database,
    pub(crate) registry: Arc<Registry>,
    pub(crate) collection: Option<Arc<Collection>>,
    pub(crate) fault: Option<String>,
    pub(crate) columns: Option<Vec<String>>,
    pub(crate) root: ConditionGroup,
    pub(crate) order: Vec<(String, SortDirection)>,
    pub(crate) limit: Option<usize>,
    pub(crate) offset: Option<usize>,
    pub(crate) populate: PopulateSpec,
    pub(crate) ctx: QueryContext,
    /// Page/perPage carried over from a bound query string, consumed by
    /// `paginate(None, None)`.
    pub(crate) qs_page: Option<usize>,
    pub(crate) qs_per_page: Option<usize>,
    language_filter: bool,
    cache_override: Option<Arc<Mutex<PopulationCache>>>,
}

impl SelectQueryBuilder {
    pub(crate) fn new(db: Database, registry: Arc<Registry>, collection: &str) -> Self {
        let resolved = registry.get(collection);
        let fault = if resolved.is_none() {
            Some(format!("unknown collection '{collection}'"))
        } else {
            None
        };
        Self {
            db,
            registry,
            collection: resolved,
            fault,
            columns: None,
            root: ConditionGroup::and(),
            order: Vec::new(),
            limit: None,
            offset: None,
            populate: PopulateSpec::default(),
            ctx: QueryContext::default(),
            qs_page: None,
            qs_per_page: None,
            language_filter: true,
            cache_override: None,
        }
    }

    // ------------------------------------------------------------------
    // Fluent state
    // ------------------------------------------------------------------

    /// Restricts the selected columns. `"*"` selects every field.
    pub fn select(mut self, columns: &[&str]) -> Self {
        if columns.iter().any(|c| *c == "*") {
            self.columns = None;
        } else {
            self.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        }
        self
    }

    pub(crate) fn select_owned(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }

    /// ANDs a comparison into the accumulated conditions.
    pub fn where_(mut self, column: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        self.root = self.root.where_(column, op, value);
        self
    }

    /// Like [`Self::where_`] but a `None` value is a no-op filter.
    pub fn where_opt(
        mut self,
        column: impl Into<String>,
        op: Op,
        value: Option<impl Into<Value>>,
    ) -> Self {
        self.root = self.root.where_opt(column, op, value);
        self
    }

    /// ANDs an OR group of branches: `.or_group(|or| or.branch(..).branch(..))`.
    pub fn or_group(mut self, f: impl FnOnce(OrGroup) -> OrGroup) -> Self {
        self.root = self.root.or_group(f);
        self
    }

    /// ANDs a containment test against a JSON id-array column.
    pub fn where_records_in(
        mut self,
        column: impl Into<String>,
        ids: Vec<i64>,
        mode: RecordsMode,
    ) -> Self {
        self.root = self.root.where_records_in(column, ids, mode);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.order.push((column.into(), direction));
        self
    }

    /// Appends the collection's declared default ordering.
    pub fn order_by_default(mut self) -> Self {
        if let Some(collection) = &self.collection {
            for (column, direction) in &collection.default_order {
                self.order.push((column.clone(), *direction));
            }
        }
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Requests population of the given dot paths (`author`,
    /// `author.avatar`). Unrequested fields keep their raw stored value.
    pub fn populate(mut self, paths: &[&str]) -> Self {
        for path in paths {
            self.populate.add_path(path);
        }
        self
    }

    pub(crate) fn populate_with(mut self, spec: PopulateSpec) -> Self {
        self.populate = spec;
        self
    }

    pub fn with_context(mut self, ctx: QueryContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// Population lookups by explicit id must see every language.
    pub(crate) fn set_language_filter(&mut self, enabled: bool) {
        self.language_filter = enabled;
    }

    pub(crate) fn set_cache(&mut self, cache: Arc<Mutex<PopulationCache>>) {
        self.cache_override = Some(cache);
    }

    pub(crate) fn prepend_conditions(&mut self, conditions: ConditionGroup) {
        self.root.prepend(conditions.children);
    }

    // ------------------------------------------------------------------
    // Compilation
    // ------------------------------------------------------------------

    fn collection(&self) -> Result<Arc<Collection>, Error> {
        if let Some(fault) = &self.fault {
            return Err(Error::query(fault.clone()));
        }
        self.collection
            .clone()
            .ok_or_else(|| Error::query("no collection bound"))
    }

    /// Checked by the public terminals only; population and translation
    /// lookups go through `fetch_rows` directly and are exempt.
    fn check_read_access(&self) -> Result<(), Error> {
        if let Some(collection) = &self.collection {
            if !collection.api.read {
                return Err(Error::query(format!(
                    "read operations are disabled for '{}'",
                    collection.name
                )));
            }
        }
        Ok(())
    }

    fn effective_conditions(&self, collection: &Collection) -> ConditionGroup {
        let language = if self.language_filter {
            self.ctx.language.as_deref()
        } else {
            None
        };
        with_language_scope(&self.root, collection, language)
    }

    fn compile(
        &self,
        projection: Projection,
    ) -> Result<(String, Vec<Value>, Vec<(String, FieldStorage)>), Error> {
        let collection = self.collection()?;

        let columns = match &self.columns {
            Some(columns) => columns.clone(),
            None => collection.field_names(),
        };
        let shape = collection.shape_of(&columns)?;

        let mut writer = SqlWriter::new(self.db.driver());
        match projection {
            Projection::Columns => {
                writer.push("SELECT ");
                for (index, column) in columns.iter().enumerate() {
                    if index > 0 {
                        writer.push(", ");
                    }
                    writer.push_ident(&storage_name(column));
                }
            }
            Projection::Count => writer.push("SELECT COUNT(*)"),
            Projection::Exists => writer.push("SELECT 1"),
        }
        writer.push(" FROM ");
        writer.push_ident(&collection.table);

        let conditions = self.effective_conditions(&collection);
        if !conditions.is_empty() {
            writer.push(" WHERE ");
            compile_group(&conditions, &collection, &mut writer)?;
        }

        match projection {
            Projection::Columns => {
                if !self.order.is_empty() {
                    writer.push(" ORDER BY ");
                    for (index, (column, direction)) in self.order.iter().enumerate() {
                        if collection.field(column).is_none() {
                            return Err(Error::UnknownColumn {
                                collection: collection.name.clone(),
                                column: column.clone(),
                            });
                        }
                        if index > 0 {
                            writer.push(", ");
                        }
                        writer.push_ident(&storage_name(column));
                        writer.push(" ");
                        writer.push(direction.as_sql());
                    }
                }
                match (self.limit, self.offset) {
                    (Some(limit), offset) => {
                        writer.push(&format!(" LIMIT {limit}"));
                        if let Some(offset) = offset {
                            writer.push(&format!(" OFFSET {offset}"));
                        }
                    }
                    (None, Some(offset)) => {
                        // SQLite requires a LIMIT clause before OFFSET.
                        match self.db.driver() {
                            crate::database::Drivers::SQLite => {
                                writer.push(&format!(" LIMIT -1 OFFSET {offset}"));
                            }
                            crate::database::Drivers::Postgres => {
                                writer.push(&format!(" OFFSET {offset}"));
                            }
                        }
                    }
                    (None, None) => {}
                }
            }
            Projection::Count => {}
            Projection::Exists => writer.push(" LIMIT 1"),
        }

        let (sql, params) = writer.finish();
        Ok((sql, params, shape))
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Runs the read path without the envelope: compile, execute, decode,
    /// read-sanitize, hooks, populate. Shared with the population engine.
    pub(crate) async fn fetch_rows(self) -> Result<Vec<Record>, Error> {
        let collection = self.collection()?;

        collection
            .run_hooks(HookPhase::BeforeQueryPreparation, Vec::new(), &self.ctx)
            .await?;

        let (sql, params, shape) = self.compile(Projection::Columns)?;
        log_statement(&sql, &params);

        let raw_rows = self.db.fetch_all(&sql, bind_params(&params)?).await?;
        let mut rows = Vec::with_capacity(raw_rows.len());
        for raw in &raw_rows {
            let mut record = decode_row(raw, &shape)?;
            sanitize_read(&collection, &mut record);
            rows.push(record);
        }

        let mut rows = collection
            .run_hooks(HookPhase::AfterFetch, rows, &self.ctx)
            .await?;

        if !self.populate.is_empty() {
            let cache = self
                .cache_override
                .clone()
                .or_else(|| self.ctx.shared_cache.clone())
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

        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Terminals
    // ------------------------------------------------------------------

    /// At most one row. Zero rows is a success carrying `None`.
    pub async fn first(mut self) -> QueryOutcome<Option<Record>> {
        self.limit = Some(1);
        if let Err(error) = self.check_read_access() {
            return QueryOutcome::from_runtime(error);
        }
        match self.fetch_rows().await {
            Ok(mut rows) => QueryOutcome::Data(rows.pop()),
            Err(error) => QueryOutcome::from_runtime(error),
        }
    }

    /// Every matching row.
    pub async fn all(self) -> QueryOutcome<Vec<Record>> {
        if let Err(error) = self.check_read_access() {
            return QueryOutcome::from_runtime(error);
        }
        match self.fetch_rows().await {
            Ok(rows) => QueryOutcome::Data(rows),
            Err(error) => QueryOutcome::from_runtime(error),
        }
    }

    /// A 1-based page of rows plus totals. The count query shares the WHERE
    /// clause but drops ordering and limit/offset.
    pub async fn paginate(
        self,
        page: Option<usize>,
        per_page: Option<usize>,
    ) -> QueryOutcome<Paginated<Record>> {
        match self.paginate_inner(page, per_page).await {
            Ok(paginated) => QueryOutcome::Data(paginated),
            Err(error) => QueryOutcome::from_runtime(error),
        }
    }

    async fn paginate_inner(
        mut self,
        page: Option<usize>,
        per_page: Option<usize>,
    ) -> Result<Paginated<Record>, Error> {
        let collection = self.collection()?;
        self.check_read_access()?;

        let page = page.or(self.qs_page).unwrap_or(1);
        if page == 0 {
            return Err(Error::query("page numbers are 1-based"));
        }
        let per_page = per_page
            .or(self.qs_per_page)
            .unwrap_or(collection.per_page_default);
        if per_page == 0 {
            return Err(Error::query("perPage must be at least 1"));
        }
        if per_page > collection.per_page_cap {
            // Exceeding the cap is an error rather than silent clamping.
            return Err(Error::query(format!(
                "perPage {} exceeds the cap of {} on '{}'",
                per_page, collection.per_page_cap, collection.name
            )));
        }

        collection
            .run_hooks(HookPhase::BeforeQueryPreparation, Vec::new(), &self.ctx)
            .await?;

        let (count_sql, count_params, _) = self.compile(Projection::Count)?;
        log_statement(&count_sql, &count_params);
        let count_row = self.db.fetch_one(&count_sql, bind_params(&count_params)?).await?;
        let total: i64 = sqlx::Row::try_get(&count_row, 0)?;

        self.limit = Some(per_page);
        self.offset = Some(
            (page - 1)
                .checked_mul(per_page)
                .ok_or_else(|| Error::query("page is out of range"))?,
        );
        let records = self.fetch_rows().await?;

        Ok(Paginated {
            records,
            current_page: page,
            last_page: last_page(total, per_page),
            per_page,
            total,
        })
    }

    /// The bare number of matching rows.
    pub async fn count(self) -> QueryOutcome<i64> {
        let result: Result<i64, Error> = async {
            let collection = self.collection()?;
            self.check_read_access()?;
            collection
                .run_hooks(HookPhase::BeforeQueryPreparation, Vec::new(), &self.ctx)
                .await?;
            let (sql, params, _) = self.compile(Projection::Count)?;
            log_statement(&sql, &params);
            let row = self.db.fetch_one(&sql, bind_params(&params)?).await?;
            Ok(sqlx::Row::try_get(&row, 0)?)
        }
        .await;
        match result {
            Ok(count) => QueryOutcome::Data(count),
            Err(error) => QueryOutcome::from_runtime(error),
        }
    }

    /// Whether any row matches, via an existence-optimized statement.
    pub async fn exists(self) -> QueryOutcome<bool> {
        let result: Result<bool, Error> = async {
            let collection = self.collection()?;
            self.check_read_access()?;
            collection
                .run_hooks(HookPhase::BeforeQueryPreparation, Vec::new(), &self.ctx)
                .await?;
            let (sql, params, _) = self.compile(Projection::Exists)?;
            log_statement(&sql, &params);
            let row = self.db.fetch_optional(&sql, bind_params(&params)?).await?;
            Ok(row.is_some())
        }
        .await;
        match result {
            Ok(exists) => QueryOutcome::Data(exists),
            Err(error) => QueryOutcome::from_runtime(error),
        }
    }
}

pub(crate) fn log_statement(sql: &str, params: &[Value]) {
    if log::log_enabled!(log::Level::Debug) {
        let rendered: Vec<String> = params.iter().map(literal).collect();
        log::debug!("{sql} -- [{}]", rendered.join(", "));
    }
}
