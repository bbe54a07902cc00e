//! # Pipeline Module
//!
//! Per-field, per-operation sanitization and validation. Each leaf field
//! carries ordered sanitizer and validator lists, optionally scoped to one
//! operation; composite fields (repeater, structure) recurse with dot-path
//! error reporting so every leaf error is independently addressable
//! (`gallery.0.caption`). The unique validator issues a read against the
//! collection and therefore suspends; everything else is pure.

use serde_json::Value;
use std::sync::Arc;

use crate::{
    condition::{ConditionGroup, Op},
    context::QueryContext,
    database::{Connection, Database},
    outcome::InputErrors,
    schema::{Collection, Field, FieldKind, Record},
    sql::{bind_params, quote_ident, storage_name, SqlWriter},
    Error,
};

// ============================================================================
// Operations & Scoping
// ============================================================================

/// The operation a pipeline run is serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Read,
    Update,
}

/// Which operations a sanitizer or validator applies to. Unscoped entries
/// apply everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationScope {
    #[default]
    All,
    Create,
    Read,
    Update,
}

impl OperationScope {
    pub fn applies_to(self, operation: Operation) -> bool {
        match self {
            Self::All => true,
            Self::Create => operation == Operation::Create,
            Self::Read => operation == Operation::Read,
            Self::Update => operation == Operation::Update,
        }
    }
}

// ============================================================================
// Sanitizers
// ============================================================================

/// A pure value transform applied before validation.
#[derive(Clone)]
pub struct Sanitizer {
    scope: OperationScope,
    apply: Arc<dyn Fn(Value) -> Value + Send + Sync>,
}

impl Sanitizer {
    pub fn new(
        scope: OperationScope,
        apply: impl Fn(Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self { scope, apply: Arc::new(apply) }
    }

    /// Trims surrounding whitespace from string values.
    pub fn trim() -> Self {
        Self::new(OperationScope::All, |value| match value {
            Value::String(s) => Value::String(s.trim().to_string()),
            other => other,
        })
    }

    /// Casts numeric strings to numbers, leaving everything else untouched.
    pub fn numeric_cast() -> Self {
        Self::new(OperationScope::All, |value| match &value {
            Value::String(s) => {
                if let Ok(i) = s.parse::<i64>() {
                    Value::from(i)
                } else if let Ok(f) = s.parse::<f64>() {
                    Value::from(f)
                } else {
                    value
                }
            }
            _ => value,
        })
    }

    fn applies_to(&self, operation: Operation) -> bool {
        self.scope.applies_to(operation)
    }

    fn run(&self, value: Value) -> Value {
        (self.apply)(value)
    }
}

// ============================================================================
// Validators
// ============================================================================

/// Context handed to custom validators.
pub struct ValidatorCtx<'a> {
    pub language: Option<&'a str>,
    ctx: &'a QueryContext,
}

impl ValidatorCtx<'_> {
    /// Localizes a message through the context's translator.
    pub fn translate(&self, message: &str) -> String {
        self.ctx.translate(message)
    }
}

/// A side-effect-free check run against the sanitized value. The first
/// validator to fail stops the chain for its field.
#[derive(Clone)]
pub enum Validator {
    Custom {
        scope: OperationScope,
        check: Arc<dyn Fn(&Value, &ValidatorCtx) -> Result<(), String> + Send + Sync>,
    },
    /// Rejects null and missing values.
    Required { scope: OperationScope },
    /// No other row may share the value, optionally scoped by discriminator
    /// fields such as `language`. Runs a count query, so it suspends.
    Unique {
        scope: OperationScope,
        scoped_by: Vec<String>,
    },
    /// Value must be an integer representable as a millisecond timestamp.
    Timestamp { scope: OperationScope },
    /// Value must be an integer millisecond-of-day in `0..86_400_000`.
    Time { scope: OperationScope },
}

impl Validator {
    pub fn custom(
        scope: OperationScope,
        check: impl Fn(&Value, &ValidatorCtx) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        Self::Custom { scope, check: Arc::new(check) }
    }

    pub fn required(scope: OperationScope) -> Self {
        Self::Required { scope }
    }

    pub fn unique(scoped_by: &[&str]) -> Self {
        Self::Unique {
            scope: OperationScope::All,
            scoped_by: scoped_by.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn timestamp() -> Self {
        Self::Timestamp { scope: OperationScope::All }
    }

    pub fn time() -> Self {
        Self::Time { scope: OperationScope::All }
    }

    fn scope(&self) -> OperationScope {
        match self {
            Self::Custom { scope, .. }
            | Self::Required { scope }
            | Self::Unique { scope, .. }
            | Self::Timestamp { scope }
            | Self::Time { scope } => *scope,
        }
    }
}

// ============================================================================
// Pipeline Driver
// ============================================================================

/// Everything a pipeline run needs besides the input itself.
pub(crate) struct PipelineInput<'a> {
    pub db: &'a Database,
    pub collection: &'a Collection,
    pub operation: Operation,
    pub ctx: &'a QueryContext,
    /// For updates: the row being modified, excluded from uniqueness checks.
    pub exclude_id: Option<i64>,
}

struct UniqueCheck {
    path: String,
    column: String,
    value: Value,
    scoped_by: Vec<String>,
}

/// Runs the full create/update pipeline over one input row.
///
/// The outer `Result` is a runtime failure (e.g. the database rejecting a
/// uniqueness probe); the inner one separates a sanitized, storable record
/// from per-field input errors.
pub(crate) async fn run_pipeline(
    input: &PipelineInput<'_>,
    raw: &Record,
) -> Result<Result<Record, InputErrors>, Error> {
    let mut errors = InputErrors::new();
    let mut sanitized = Record::new();
    let mut unique_checks = Vec::new();

    // Unknown keys are caller mistakes, reported per key.
    for key in raw.keys() {
        if key == "id" {
            if input.operation == Operation::Update {
                errors.insert(key.clone(), input.ctx.translate("The id field cannot be updated"));
            }
            continue;
        }
        if input.collection.field(key).is_none() {
            errors.insert(key.clone(), input.ctx.translate("Unknown field"));
        }
    }

    for (name, field) in &input.collection.fields {
        if name == "id" {
            if input.operation == Operation::Create {
                if let Some(id) = raw.get("id") {
                    sanitized.insert("id".to_string(), id.clone());
                }
            }
            continue;
        }

        let value = match raw.get(name) {
            Some(value) => value.clone(),
            None => match input.operation {
                // Patches only touch the fields they carry.
                Operation::Update => continue,
                _ => resolve_default(input, name, field),
            },
        };

        let value = sanitize_value(field, value, input.operation);

        validate_value(
            name,
            name,
            field,
            &value,
            input,
            &mut errors,
            &mut unique_checks,
        );

        sanitized.insert(name.clone(), value);
    }

    for check in unique_checks {
        if errors.contains_key(&check.path) {
            continue;
        }
        if check.value.is_null() {
            continue;
        }
        if is_taken(input, &check, &sanitized).await? {
            errors.insert(
                check.path,
                input.ctx.translate("This value is already in use"),
            );
        }
    }

    if errors.is_empty() {
        Ok(Ok(sanitized))
    } else {
        Ok(Err(errors))
    }
}

/// Applies read-scoped sanitizers to a fetched record in place.
pub(crate) fn sanitize_read(collection: &Collection, record: &mut Record) {
    for (name, field) in &collection.fields {
        if let Some(value) = record.remove(name) {
            record.insert(name.clone(), sanitize_value(field, value, Operation::Read));
        }
    }
}

fn resolve_default(input: &PipelineInput<'_>, name: &str, field: &Field) -> Value {
    // The context's language wins over the field default for translatable
    // collections.
    if name == "language" && input.collection.translatable {
        if let Some(language) = &input.ctx.language {
            return Value::from(language.clone());
        }
    }
    field.default_ref().cloned().unwrap_or(Value::Null)
}

fn sanitize_value(field: &Field, value: Value, operation: Operation) -> Value {
    match &field.kind {
        FieldKind::Leaf { sanitizers, .. } => {
            let mut value = value;
            for sanitizer in sanitizers {
                if sanitizer.applies_to(operation) {
                    value = sanitizer.run(value);
                }
            }
            value
        }
        FieldKind::Repeater { fields } => match value {
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| sanitize_group(fields, item, operation))
                    .collect(),
            ),
            other => other,
        },
        FieldKind::Structure { fields } => sanitize_group(fields, value, operation),
    }
}

fn sanitize_group(fields: &[(String, Field)], value: Value, operation: Operation) -> Value {
    match value {
        Value::Object(mut object) => {
            for (name, field) in fields {
                if let Some(value) = object.remove(name) {
                    object.insert(name.clone(), sanitize_value(field, value, operation));
                }
            }
            Value::Object(object)
        }
        other => other,
    }
}

fn validate_value(
    path: &str,
    column: &str,
    field: &Field,
    value: &Value,
    input: &PipelineInput<'_>,
    errors: &mut InputErrors,
    unique_checks: &mut Vec<UniqueCheck>,
) {
    match &field.kind {
        FieldKind::Leaf { validators, nullable, .. } => {
            // Nullable fields accept null without running the chain.
            if value.is_null() && *nullable {
                return;
            }
            let vctx = ValidatorCtx {
                language: input.ctx.language.as_deref(),
                ctx: input.ctx,
            };
            for validator in validators {
                if !validator.scope().applies_to(input.operation) {
                    continue;
                }
                let result = match validator {
                    Validator::Custom { check, .. } => check(value, &vctx),
                    Validator::Required { .. } => {
                        if value.is_null() {
                            Err("This field is required".to_string())
                        } else {
                            Ok(())
                        }
                    }
                    Validator::Unique { scoped_by, .. } => {
                        // Only a top-level leaf maps onto a column; queue the
                        // check to run after the synchronous chain.
                        if path == column {
                            unique_checks.push(UniqueCheck {
                                path: path.to_string(),
                                column: column.to_string(),
                                value: value.clone(),
                                scoped_by: scoped_by.clone(),
                            });
                        } else {
                            log::debug!("unique validator ignored on nested field '{path}'");
                        }
                        Ok(())
                    }
                    Validator::Timestamp { .. } => validate_timestamp(value),
                    Validator::Time { .. } => validate_time(value),
                };
                if let Err(message) = result {
                    errors.insert(path.to_string(), input.ctx.translate(&message));
                    return;
                }
            }
        }
        FieldKind::Repeater { fields } => match value {
            Value::Null => {}
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    validate_group(
                        &format!("{path}.{index}"),
                        fields,
                        item,
                        input,
                        errors,
                        unique_checks,
                    );
                }
            }
            _ => {
                errors.insert(
                    path.to_string(),
                    input.ctx.translate("This field must be an array"),
                );
            }
        },
        FieldKind::Structure { fields } => match value {
            Value::Null => {}
            Value::Object(_) => {
                validate_group(path, fields, value, input, errors, unique_checks);
            }
            _ => {
                errors.insert(
                    path.to_string(),
                    input.ctx.translate("This field must be an object"),
                );
            }
        },
    }
}

fn validate_group(
    path: &str,
    fields: &[(String, Field)],
    value: &Value,
    input: &PipelineInput<'_>,
    errors: &mut InputErrors,
    unique_checks: &mut Vec<UniqueCheck>,
) {
    let Value::Object(object) = value else {
        errors.insert(
            path.to_string(),
            input.ctx.translate("This field must be an object"),
        );
        return;
    };

    for key in object.keys() {
        if !fields.iter().any(|(n, _)| n == key) {
            errors.insert(
                format!("{path}.{key}"),
                input.ctx.translate("Unknown field"),
            );
        }
    }

    for (name, field) in fields {
        let child = object.get(name).cloned().unwrap_or(Value::Null);
        validate_value(
            &format!("{path}.{name}"),
            name,
            field,
            &child,
            input,
            errors,
            unique_checks,
        );
    }
}

fn validate_timestamp(value: &Value) -> Result<(), String> {
    if value.is_null() {
        return Ok(());
    }
    let millis = value
        .as_i64()
        .ok_or_else(|| "This field must be a timestamp in milliseconds".to_string())?;
    if chrono::DateTime::from_timestamp_millis(millis).is_none() {
        return Err("This timestamp is out of range".to_string());
    }
    Ok(())
}

fn validate_time(value: &Value) -> Result<(), String> {
    if value.is_null() {
        return Ok(());
    }
    let millis = value
        .as_i64()
        .ok_or_else(|| "This field must be a time of day in milliseconds".to_string())?;
    if !(0..86_400_000).contains(&millis) {
        return Err("This time of day is out of range".to_string());
    }
    Ok(())
}

/// Issues the uniqueness probe for one queued check. Discriminator values
/// come from the sanitized row; for updates missing one, the current row is
/// read back.
async fn is_taken(
    input: &PipelineInput<'_>,
    check: &UniqueCheck,
    sanitized: &Record,
) -> Result<bool, Error> {
    let mut group = ConditionGroup::and().where_(check.column.clone(), Op::Eq, check.value.clone());

    for discriminator in &check.scoped_by {
        let value = match sanitized.get(discriminator) {
            Some(value) if !value.is_null() => Some(value.clone()),
            _ => match (input.operation, input.exclude_id) {
                (Operation::Update, Some(id)) => {
                    fetch_column(input, discriminator, id).await?
                }
                _ => None,
            },
        };
        if let Some(value) = value {
            group = group.where_(discriminator.clone(), Op::Eq, value);
        }
    }

    let mut writer = SqlWriter::new(input.db.driver());
    writer.push("SELECT COUNT(*) FROM ");
    writer.push(&quote_ident(&input.collection.table));
    writer.push(" WHERE ");
    crate::condition::compile_group(&group, input.collection, &mut writer)?;
    if let Some(id) = input.exclude_id {
        writer.push(" AND ");
        writer.push(&quote_ident("id"));
        writer.push(" != ");
        writer.bind(Value::from(id));
    }

    let (sql, params) = writer.finish();
    log::debug!("unique probe: {sql}");
    let row = input.db.fetch_one(&sql, bind_params(&params)?).await?;
    let count: i64 = sqlx::Row::try_get(&row, 0)?;
    Ok(count > 0)
}

async fn fetch_column(
    input: &PipelineInput<'_>,
    column: &str,
    id: i64,
) -> Result<Option<Value>, Error> {
    let field = match input.collection.field(column) {
        Some(field) => field,
        None => return Ok(None),
    };

    let mut writer = SqlWriter::new(input.db.driver());
    writer.push("SELECT ");
    writer.push(&quote_ident(&storage_name(column)));
    writer.push(" FROM ");
    writer.push(&quote_ident(&input.collection.table));
    writer.push(" WHERE ");
    writer.push(&quote_ident("id"));
    writer.push(" = ");
    writer.bind(Value::from(id));

    let (sql, params) = writer.finish();
    let row = input.db.fetch_optional(&sql, bind_params(&params)?).await?;
    match row {
        Some(row) => {
            let record =
                crate::sql::decode_row(&row, &[(column.to_string(), field.storage())])?;
            Ok(record.get(column).filter(|v| !v.is_null()).cloned())
        }
        None => Ok(None),
    }
}
