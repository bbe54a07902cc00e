//! # Schema Module
//!
//! Collection and field descriptors plus the immutable registry the query
//! builders resolve names against. Definitions are plain data built once at
//! startup: a [`Registry`] maps collection names to [`Collection`]
//! descriptors, each carrying an ordered field map, lifecycle hooks and
//! query defaults. Nothing in here is mutated after `build()`.

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    context::QueryContext,
    pipeline::{OperationScope, Sanitizer, Validator},
    populate::Populator,
    sql::storage_name,
    Error,
};

/// A database row as seen by the builders: field name to JSON value.
pub type Record = serde_json::Map<String, Value>;

// ============================================================================
// Field Storage
// ============================================================================

/// The underlying storage model of a leaf field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldStorage {
    /// TEXT column
    Text,
    /// INTEGER column
    Integer,
    /// REAL / DOUBLE PRECISION column
    Float,
    /// INTEGER column holding 0/1 (Any-driver portable boolean)
    Boolean,
    /// TEXT column holding serialized JSON
    Json,
}

// ============================================================================
// Field
// ============================================================================

/// A typed attribute descriptor within a collection.
///
/// Fields are a recursive sum type: scalar leaves carry storage, sanitizers,
/// validators and an optional populator; repeaters hold an array of subfield
/// groups and structures a nested object of fields. The pipeline and the
/// population engine recurse generically over the variants.
#[derive(Clone)]
pub struct Field {
    pub kind: FieldKind,
}

#[derive(Clone)]
pub enum FieldKind {
    Leaf {
        storage: FieldStorage,
        nullable: bool,
        default: Option<Value>,
        sanitizers: Vec<Sanitizer>,
        validators: Vec<Validator>,
        populator: Option<Populator>,
    },
    /// An array of subfield groups, stored as JSON.
    Repeater { fields: Vec<(String, Field)> },
    /// A nested object of fields, stored as JSON.
    Structure { fields: Vec<(String, Field)> },
}

impl Field {
    fn leaf(storage: FieldStorage) -> Self {
        Self {
            kind: FieldKind::Leaf {
                storage,
                nullable: true,
                default: None,
                sanitizers: Vec::new(),
                validators: Vec::new(),
                populator: None,
            },
        }
    }

    pub fn text() -> Self {
        Self::leaf(FieldStorage::Text)
    }

    pub fn integer() -> Self {
        Self::leaf(FieldStorage::Integer)
    }

    pub fn float() -> Self {
        Self::leaf(FieldStorage::Float)
    }

    pub fn boolean() -> Self {
        Self::leaf(FieldStorage::Boolean)
    }

    pub fn json() -> Self {
        Self::leaf(FieldStorage::Json)
    }

    /// A foreign id referencing one row of another collection.
    pub fn record(collection: impl Into<String>) -> Self {
        let mut field = Self::leaf(FieldStorage::Integer);
        if let FieldKind::Leaf { populator, .. } = &mut field.kind {
            *populator = Some(Populator::Record {
                collection: collection.into(),
                fields: Vec::new(),
            });
        }
        field
    }

    /// A JSON array of ids referencing rows of another collection.
    pub fn records(collection: impl Into<String>) -> Self {
        let mut field = Self::leaf(FieldStorage::Json);
        if let FieldKind::Leaf { populator, .. } = &mut field.kind {
            *populator = Some(Populator::Records {
                collection: collection.into(),
                fields: Vec::new(),
            });
        }
        field
    }

    pub fn repeater(fields: Vec<(&str, Field)>) -> Self {
        Self {
            kind: FieldKind::Repeater {
                fields: fields.into_iter().map(|(n, f)| (n.to_string(), f)).collect(),
            },
        }
    }

    pub fn structure(fields: Vec<(&str, Field)>) -> Self {
        Self {
            kind: FieldKind::Structure {
                fields: fields.into_iter().map(|(n, f)| (n.to_string(), f)).collect(),
            },
        }
    }

    /// Marks the field as non-nullable.
    pub fn required(mut self) -> Self {
        if let FieldKind::Leaf { nullable, validators, .. } = &mut self.kind {
            *nullable = false;
            validators.insert(0, Validator::required(OperationScope::Create));
        }
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        if let FieldKind::Leaf { default, .. } = &mut self.kind {
            *default = Some(value.into());
        }
        self
    }

    /// Restricts the fields the populator selects from the target collection.
    /// An empty selection means every field.
    pub fn populate_fields(mut self, names: &[&str]) -> Self {
        if let FieldKind::Leaf { populator, .. } = &mut self.kind {
            match populator {
                Some(Populator::Record { fields, .. })
                | Some(Populator::Records { fields, .. }) => {
                    *fields = names.iter().map(|n| n.to_string()).collect();
                }
                _ => {}
            }
        }
        self
    }

    pub fn populator(mut self, value: Populator) -> Self {
        if let FieldKind::Leaf { populator, .. } = &mut self.kind {
            *populator = Some(value);
        }
        self
    }

    pub fn sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        if let FieldKind::Leaf { sanitizers, .. } = &mut self.kind {
            sanitizers.push(sanitizer);
        }
        self
    }

    pub fn validator(mut self, validator: Validator) -> Self {
        if let FieldKind::Leaf { validators, .. } = &mut self.kind {
            validators.push(validator);
        }
        self
    }

    /// Value must be unique across the collection.
    pub fn unique(self) -> Self {
        self.validator(Validator::unique(&[]))
    }

    /// Value must be unique among rows sharing the given discriminator
    /// fields (e.g. unique per `language`).
    pub fn unique_per(self, scoped_by: &[&str]) -> Self {
        self.validator(Validator::unique(scoped_by))
    }

    /// The storage model of the field's column. Composite fields ride on
    /// JSON storage.
    pub fn storage(&self) -> FieldStorage {
        match &self.kind {
            FieldKind::Leaf { storage, .. } => *storage,
            FieldKind::Repeater { .. } | FieldKind::Structure { .. } => FieldStorage::Json,
        }
    }

    pub(crate) fn populator_ref(&self) -> Option<&Populator> {
        match &self.kind {
            FieldKind::Leaf { populator, .. } => populator.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn is_nullable(&self) -> bool {
        match &self.kind {
            FieldKind::Leaf { nullable, .. } => *nullable,
            _ => true,
        }
    }

    pub(crate) fn default_ref(&self) -> Option<&Value> {
        match &self.kind {
            FieldKind::Leaf { default, .. } => default.as_ref(),
            _ => None,
        }
    }
}

// ============================================================================
// Hooks
// ============================================================================

/// Points at which a collection's hook lists are invoked by the builders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    /// Before a statement is compiled. Receives no rows.
    BeforeQueryPreparation,
    /// After rows are decoded from a read, before population.
    AfterFetch,
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
}

impl HookPhase {
    pub fn name(self) -> &'static str {
        match self {
            Self::BeforeQueryPreparation => "beforeQueryPreparation",
            Self::AfterFetch => "afterFetch",
            Self::BeforeCreate => "beforeCreate",
            Self::AfterCreate => "afterCreate",
            Self::BeforeUpdate => "beforeUpdate",
            Self::AfterUpdate => "afterUpdate",
            Self::BeforeDelete => "beforeDelete",
            Self::AfterDelete => "afterDelete",
        }
    }
}

/// An async lifecycle callback. Hooks take ownership of the rows (or input
/// values) in flight and hand them back, possibly transformed; returning an
/// error aborts the operation with a runtime error.
pub type Hook = Arc<
    dyn Fn(Vec<Record>, QueryContext) -> BoxFuture<'static, Result<Vec<Record>, String>>
        + Send
        + Sync,
>;

// ============================================================================
// Collection
// ============================================================================

/// Per-operation exposure flags, enforced by the statement builders. A
/// disabled operation surfaces as a runtime error at the terminal; internal
/// population lookups are not affected.
#[derive(Debug, Clone, Copy)]
pub struct ApiFlags {
    pub create: bool,
    pub read: bool,
    pub update: bool,
    pub delete: bool,
}

impl Default for ApiFlags {
    fn default() -> Self {
        Self { create: true, read: true, update: true, delete: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub(crate) fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// A named, schema-described, queryable entity.
///
/// Immutable once built; shared by reference through the [`Registry`].
pub struct Collection {
    pub name: String,
    pub table: String,
    pub fields: Vec<(String, Field)>,
    pub translatable: bool,
    pub searchable: Vec<String>,
    pub default_order: Vec<(String, SortDirection)>,
    pub per_page_default: usize,
    pub per_page_cap: usize,
    pub api: ApiFlags,
    pub(crate) hooks: Vec<(HookPhase, Hook)>,
}

impl Collection {
    pub fn builder(name: impl Into<String>) -> CollectionBuilder {
        CollectionBuilder::new(name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Resolves the storage shape for a selected column list, rejecting
    /// unknown columns.
    pub(crate) fn shape_of(&self, columns: &[String]) -> Result<Vec<(String, FieldStorage)>, Error> {
        let mut shape = Vec::with_capacity(columns.len());
        for column in columns {
            let field = self.field(column).ok_or_else(|| Error::UnknownColumn {
                collection: self.name.clone(),
                column: column.clone(),
            })?;
            shape.push((column.clone(), field.storage()));
        }
        Ok(shape)
    }

    /// Runs the hook list for a phase in declaration order.
    pub(crate) async fn run_hooks(
        &self,
        phase: HookPhase,
        mut rows: Vec<Record>,
        ctx: &QueryContext,
    ) -> Result<Vec<Record>, Error> {
        if ctx.bypass_hooks {
            return Ok(rows);
        }
        for (hook_phase, hook) in &self.hooks {
            if *hook_phase == phase {
                rows = hook(rows, ctx.clone()).await.map_err(|message| Error::Hook {
                    phase: phase.name(),
                    message,
                })?;
            }
        }
        Ok(rows)
    }
}

// ============================================================================
// CollectionBuilder
// ============================================================================

pub struct CollectionBuilder {
    name: String,
    fields: Vec<(String, Field)>,
    translatable: bool,
    searchable: Vec<String>,
    default_order: Vec<(String, SortDirection)>,
    per_page_default: usize,
    per_page_cap: usize,
    api: ApiFlags,
    hooks: Vec<(HookPhase, Hook)>,
}

impl CollectionBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            translatable: false,
            searchable: Vec::new(),
            default_order: Vec::new(),
            per_page_default: 50,
            per_page_cap: 500,
            api: ApiFlags::default(),
            hooks: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.push((name.into(), field));
        self
    }

    pub fn translatable(mut self) -> Self {
        self.translatable = true;
        self
    }

    pub fn searchable(mut self, fields: &[&str]) -> Self {
        self.searchable = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn default_order(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.default_order.push((field.into(), direction));
        self
    }

    pub fn per_page(mut self, default: usize, cap: usize) -> Self {
        self.per_page_default = default;
        self.per_page_cap = cap;
        self
    }

    pub fn api(mut self, flags: ApiFlags) -> Self {
        self.api = flags;
        self
    }

    pub fn hook(mut self, phase: HookPhase, hook: Hook) -> Self {
        self.hooks.push((phase, hook));
        self
    }

    /// Finalizes the descriptor. Injects the implicit `id` field and, for
    /// translatable collections, `language` and `translationId`.
    pub fn build(mut self) -> Collection {
        if !self.fields.iter().any(|(n, _)| n == "id") {
            self.fields.insert(0, ("id".to_string(), Field::integer()));
        }
        if self.translatable {
            if !self.fields.iter().any(|(n, _)| n == "language") {
                self.fields.push((
                    "language".to_string(),
                    Field::text().default_value("en"),
                ));
            }
            if !self.fields.iter().any(|(n, _)| n == "translationId") {
                self.fields.push((
                    "translationId".to_string(),
                    Field::integer().populator(Populator::Translations),
                ));
            }
        }

        Collection {
            table: storage_name(&self.name),
            name: self.name,
            fields: self.fields,
            translatable: self.translatable,
            searchable: self.searchable,
            default_order: self.default_order,
            per_page_default: self.per_page_default,
            per_page_cap: self.per_page_cap,
            api: self.api,
            hooks: self.hooks,
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// The immutable name → collection lookup shared by every builder.
///
/// Built once at startup and passed by reference; there is no global
/// mutable state anywhere in the crate.
pub struct Registry {
    collections: HashMap<String, Arc<Collection>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder { collections: Vec::new() }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections.get(name).cloned()
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.keys().cloned().collect();
        names.sort();
        names
    }
}

pub struct RegistryBuilder {
    collections: Vec<Collection>,
}

impl RegistryBuilder {
    pub fn collection(mut self, collection: Collection) -> Self {
        self.collections.push(collection);
        self
    }

    pub fn build(self) -> Registry {
        let mut collections = HashMap::new();
        for collection in self.collections {
            collections.insert(collection.name.clone(), Arc::new(collection));
        }
        Registry { collections }
    }
}
