//! # Population Module
//!
//! Expansion of fields that reference other collections into their resolved
//! values. Only fields the caller actually requested are expanded;
//! everything else returns its raw stored representation. Lookups within
//! one population pass are deduplicated through a per-pass cache keyed by
//! (collection, id, field selection) and batched per field, so two sibling
//! rows referencing the same related record cost a single round trip.

use async_trait::async_trait;
use futures::future::{try_join_all, BoxFuture};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::{
    condition::Op,
    context::QueryContext,
    database::Database,
    schema::{Collection, Record, Registry},
    select::SelectQueryBuilder,
    Error,
};

// ============================================================================
// Populators
// ============================================================================

/// How a field's stored value expands into its populated value.
#[derive(Clone)]
pub enum Populator {
    /// A foreign id resolved into the referenced record.
    Record {
        collection: String,
        /// Fields selected from the target; empty means all.
        fields: Vec<String>,
    },
    /// A JSON array of ids resolved into an array of records.
    Records {
        collection: String,
        fields: Vec<String>,
    },
    /// A translation group key resolved into a `{language: id}` map over
    /// the rows sharing it.
    Translations,
    /// A caller-supplied async expansion.
    Custom(Arc<dyn CustomPopulator>),
}

/// Extension seam for field types whose expansion the core does not model.
#[async_trait]
pub trait CustomPopulator: Send + Sync {
    async fn populate(
        &self,
        raw: Value,
        ctx: &PopulationContext<'_>,
    ) -> Result<Value, String>;
}

// ============================================================================
// Population Context & Cache
// ============================================================================

/// Completed lookups within one population pass.
///
/// Keys encode collection, id and the requested field selection, so two
/// parents asking for the same record with different selections do not
/// collide. Never reused across requests.
#[derive(Debug, Default)]
pub struct PopulationCache {
    entries: HashMap<String, Value>,
}

impl PopulationCache {
    pub(crate) fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).cloned()
    }

    pub(crate) fn insert(&mut self, key: String, value: Value) {
        self.entries.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Scratch state handed to custom populators.
pub struct PopulationContext<'a> {
    pub db: &'a Database,
    pub registry: &'a Registry,
    pub language: Option<String>,
    pub custom: &'a serde_json::Map<String, Value>,
    pub(crate) cache: Arc<Mutex<PopulationCache>>,
}

impl PopulationContext<'_> {
    /// Reads a finished lookup from the pass cache.
    pub fn cached(&self, key: &str) -> Option<Value> {
        self.cache.lock().expect("population cache poisoned").get(key)
    }

    /// Stores a finished lookup in the pass cache.
    pub fn store(&self, key: String, value: Value) {
        self.cache
            .lock()
            .expect("population cache poisoned")
            .insert(key, value);
    }
}

// ============================================================================
// Populate Spec
// ============================================================================

/// Which fields to populate, as a tree of dot paths
/// (`author`, `author.avatar`).
#[derive(Debug, Clone, Default)]
pub struct PopulateSpec {
    pub(crate) children: BTreeMap<String, PopulateSpec>,
}

impl PopulateSpec {
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut spec = Self::default();
        for path in paths {
            spec.add_path(path.as_ref());
        }
        spec
    }

    pub fn add_path(&mut self, path: &str) {
        let mut node = self;
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            node = node.children.entry(segment.to_string()).or_default();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Flattens the tree back into dot paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (name, child) in &self.children {
            if child.is_empty() {
                out.push(name.clone());
            } else {
                for sub in child.paths() {
                    out.push(format!("{name}.{sub}"));
                }
            }
        }
        out
    }

    fn signature(&self) -> String {
        self.paths().join(",")
    }
}

// ============================================================================
// Engine
// ============================================================================

enum FetchPlan {
    RecordBatch {
        field: String,
        target: String,
        select: Vec<String>,
        signature: String,
        ids: Vec<i64>,
        child: PopulateSpec,
        many: bool,
    },
    TranslationsBatch {
        field: String,
        group_ids: Vec<i64>,
    },
}

/// Expands every requested field across the given rows.
///
/// Boxed because nested populate specs recurse through the select builder.
pub(crate) fn populate_rows<'a>(
    db: &'a Database,
    registry: &'a Arc<Registry>,
    collection: &'a Collection,
    rows: &'a mut Vec<Record>,
    spec: &'a PopulateSpec,
    ctx: &'a QueryContext,
    cache: Arc<Mutex<PopulationCache>>,
) -> BoxFuture<'a, Result<(), Error>> {
    Box::pin(async move {
        if spec.is_empty() || rows.is_empty() {
            return Ok(());
        }

        let mut plans = Vec::new();
        let mut custom_fields = Vec::new();

        for (field_name, child) in &spec.children {
            let Some(field) = collection.field(field_name) else {
                continue;
            };
            let Some(populator) = field.populator_ref() else {
                continue;
            };

            match populator {
                Populator::Record { collection: target, fields } => {
                    plans.push(plan_record_batch(
                        field_name, target, fields, child, rows, &cache, false,
                    ));
                }
                Populator::Records { collection: target, fields } => {
                    plans.push(plan_record_batch(
                        field_name, target, fields, child, rows, &cache, true,
                    ));
                }
                Populator::Translations => {
                    let mut group_ids = HashSet::new();
                    for row in rows.iter() {
                        if let Some(id) = row.get(field_name).and_then(Value::as_i64) {
                            let key = translations_key(&collection.name, id);
                            if cache_miss(&cache, &key) {
                                group_ids.insert(id);
                            }
                        }
                    }
                    let mut group_ids: Vec<i64> = group_ids.into_iter().collect();
                    group_ids.sort_unstable();
                    plans.push(FetchPlan::TranslationsBatch {
                        field: field_name.clone(),
                        group_ids,
                    });
                }
                Populator::Custom(custom) => {
                    custom_fields.push((field_name.clone(), custom.clone()));
                }
            }
        }

        // Phase A: every pending lookup runs concurrently; results land in
        // the pass cache.
        let fetches = plans
            .iter()
            .map(|plan| run_plan(plan, db, registry, collection, ctx, &cache));
        let fetched = try_join_all(fetches).await?;
        {
            let mut cache = cache.lock().expect("population cache poisoned");
            for entries in fetched {
                for (key, value) in entries {
                    cache.insert(key, value);
                }
            }
        }

        // Phase B: assign resolved values back onto the rows.
        for plan in &plans {
            match plan {
                FetchPlan::RecordBatch { field, signature, many, .. } => {
                    for row in rows.iter_mut() {
                        let Some(raw) = row.get(field).cloned() else { continue };
                        let resolved = if *many {
                            let ids = raw
                                .as_array()
                                .map(|items| {
                                    items.iter().filter_map(Value::as_i64).collect::<Vec<_>>()
                                })
                                .unwrap_or_default();
                            let cache = cache.lock().expect("population cache poisoned");
                            Value::Array(
                                ids.iter()
                                    .filter_map(|id| {
                                        cache.get(&record_key(signature, *id))
                                    })
                                    .collect(),
                            )
                        } else {
                            match raw.as_i64() {
                                Some(id) => cache
                                    .lock()
                                    .expect("population cache poisoned")
                                    .get(&record_key(signature, id))
                                    .unwrap_or(Value::Null),
                                None => Value::Null,
                            }
                        };
                        row.insert(field.clone(), resolved);
                    }
                }
                FetchPlan::TranslationsBatch { field, .. } => {
                    for row in rows.iter_mut() {
                        let resolved = match row.get(field).and_then(Value::as_i64) {
                            Some(id) => cache
                                .lock()
                                .expect("population cache poisoned")
                                .get(&translations_key(&collection.name, id))
                                .unwrap_or(Value::Null),
                            None => Value::Null,
                        };
                        row.insert(field.clone(), resolved);
                    }
                }
            }
        }

        // Custom populators run per row, concurrently.
        for (field, custom) in custom_fields {
            let pctx = PopulationContext {
                db,
                registry,
                language: ctx.language.clone(),
                custom: &ctx.custom,
                cache: cache.clone(),
            };
            let futures = rows.iter().map(|row| {
                let raw = row.get(&field).cloned().unwrap_or(Value::Null);
                custom.populate(raw, &pctx)
            });
            let resolved = try_join_all(futures)
                .await
                .map_err(Error::Query)?;
            for (row, value) in rows.iter_mut().zip(resolved) {
                row.insert(field.clone(), value);
            }
        }

        Ok(())
    })
}

fn plan_record_batch(
    field_name: &str,
    target: &str,
    fields: &[String],
    child: &PopulateSpec,
    rows: &[Record],
    cache: &Arc<Mutex<PopulationCache>>,
    many: bool,
) -> FetchPlan {
    let signature = batch_signature(target, fields, child);
    let mut ids = HashSet::new();
    for row in rows {
        match row.get(field_name) {
            Some(Value::Array(items)) if many => {
                for id in items.iter().filter_map(Value::as_i64) {
                    if cache_miss(cache, &record_key(&signature, id)) {
                        ids.insert(id);
                    }
                }
            }
            Some(value) if !many => {
                if let Some(id) = value.as_i64() {
                    if cache_miss(cache, &record_key(&signature, id)) {
                        ids.insert(id);
                    }
                }
            }
            _ => {}
        }
    }
    let mut ids: Vec<i64> = ids.into_iter().collect();
    ids.sort_unstable();

    FetchPlan::RecordBatch {
        field: field_name.to_string(),
        target: target.to_string(),
        select: fields.to_vec(),
        signature,
        ids,
        child: child.clone(),
        many,
    }
}

async fn run_plan(
    plan: &FetchPlan,
    db: &Database,
    registry: &Arc<Registry>,
    collection: &Collection,
    ctx: &QueryContext,
    cache: &Arc<Mutex<PopulationCache>>,
) -> Result<Vec<(String, Value)>, Error> {
    match plan {
        FetchPlan::RecordBatch { target, select, signature, ids, child, .. } => {
            if ids.is_empty() {
                return Ok(Vec::new());
            }

            let mut builder = SelectQueryBuilder::new(db.clone(), registry.clone(), target)
                .with_context(ctx.clone())
                .where_(
                    "id",
                    Op::In,
                    Value::Array(ids.iter().map(|id| Value::from(*id)).collect()),
                );
            if !select.is_empty() {
                let mut columns = select.clone();
                // The id keys the cache entry even when not selected.
                if !columns.iter().any(|c| c == "id") {
                    columns.push("id".to_string());
                }
                builder = builder.select_owned(columns);
            }
            builder = builder.populate_with(child.clone());
            // Lookups by explicit id must not be narrowed to one language.
            builder.set_language_filter(false);
            builder.set_cache(cache.clone());

            let records = builder.fetch_rows().await?;
            let mut entries = Vec::with_capacity(records.len());
            for record in records {
                if let Some(id) = record.get("id").and_then(Value::as_i64) {
                    entries.push((record_key(signature, id), Value::Object(record)));
                }
            }
            Ok(entries)
        }
        FetchPlan::TranslationsBatch { group_ids, .. } => {
            if group_ids.is_empty() {
                return Ok(Vec::new());
            }

            let mut builder =
                SelectQueryBuilder::new(db.clone(), registry.clone(), &collection.name)
                    .with_context(ctx.clone())
                    .select_owned(vec![
                        "id".to_string(),
                        "language".to_string(),
                        "translationId".to_string(),
                    ])
                    .where_(
                        "translationId",
                        Op::In,
                        Value::Array(group_ids.iter().map(|id| Value::from(*id)).collect()),
                    );
            builder.set_language_filter(false);
            builder.set_cache(cache.clone());

            let siblings = builder.fetch_rows().await?;
            let mut maps: HashMap<i64, serde_json::Map<String, Value>> = HashMap::new();
            for sibling in siblings {
                let Some(group) = sibling.get("translationId").and_then(Value::as_i64) else {
                    continue;
                };
                let Some(language) = sibling.get("language").and_then(Value::as_str) else {
                    continue;
                };
                let id = sibling.get("id").cloned().unwrap_or(Value::Null);
                maps.entry(group)
                    .or_default()
                    .insert(language.to_string(), id);
            }

            Ok(maps
                .into_iter()
                .map(|(group, map)| {
                    (translations_key(&collection.name, group), Value::Object(map))
                })
                .collect())
        }
    }
}

fn cache_miss(cache: &Arc<Mutex<PopulationCache>>, key: &str) -> bool {
    cache
        .lock()
        .expect("population cache poisoned")
        .get(key)
        .is_none()
}

fn batch_signature(target: &str, fields: &[String], child: &PopulateSpec) -> String {
    format!("{target}|{}|{}", fields.join(","), child.signature())
}

fn record_key(signature: &str, id: i64) -> String {
    format!("{signature}#{id}")
}

fn translations_key(collection: &str, group: i64) -> String {
    format!("{collection}|translations#{group}")
}
