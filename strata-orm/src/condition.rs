//! # Condition Module
//!
//! The dialect-agnostic WHERE predicate representation: leaf comparisons,
//! AND/OR groups and the records-containment predicate for JSON id-array
//! columns. Trees are serializable, compose safely regardless of how many
//! conditions were actually added, and compile depth-first into
//! parenthesized SQL with parameters in traversal order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    database::Drivers,
    schema::Collection,
    sql::{storage_name, SqlWriter},
    Error,
};

// ============================================================================
// Operators
// ============================================================================

/// Comparison operators accepted by leaf conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    In,
    NotIn,
}

impl Op {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Like => "LIKE",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
        }
    }
}

/// Containment mode for records predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordsMode {
    /// The stored id array intersects the given set.
    Some,
    /// The stored id array is a superset of the given set.
    Every,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupKind {
    And,
    Or,
}

// ============================================================================
// Condition Tree
// ============================================================================

/// A node in the predicate tree. Leaf values must already be the
/// database-native representation (post-sanitization).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Condition {
    Leaf {
        column: String,
        op: Op,
        value: Value,
    },
    Group {
        kind: GroupKind,
        children: Vec<Condition>,
    },
    RecordsContain {
        column: String,
        ids: Vec<i64>,
        mode: RecordsMode,
    },
}

// ============================================================================
// ConditionGroup Builder
// ============================================================================

/// Fluent builder for one group of conditions.
///
/// Statement builders hold an AND-kinded root group; `or_group` branches
/// produce nested `(a AND b) OR (c AND d)` shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionGroup {
    pub(crate) kind: GroupKind,
    pub(crate) children: Vec<Condition>,
}

impl ConditionGroup {
    pub fn and() -> Self {
        Self { kind: GroupKind::And, children: Vec::new() }
    }

    pub fn or() -> Self {
        Self { kind: GroupKind::Or, children: Vec::new() }
    }

    /// Appends a leaf comparison.
    pub fn where_(mut self, column: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        self.children.push(Condition::Leaf {
            column: column.into(),
            op,
            value: value.into(),
        });
        self
    }

    /// Appends a leaf comparison only when a value is present. Passing
    /// `None` never changes the compiled SQL or parameter list.
    pub fn where_opt(
        self,
        column: impl Into<String>,
        op: Op,
        value: Option<impl Into<Value>>,
    ) -> Self {
        match value {
            Some(value) => self.where_(column, op, value),
            None => self,
        }
    }

    /// Appends an OR group whose branches are built by the given closure.
    pub fn or_group(mut self, f: impl FnOnce(OrGroup) -> OrGroup) -> Self {
        let or = f(OrGroup { children: Vec::new() });
        self.children.push(Condition::Group {
            kind: GroupKind::Or,
            children: or.children,
        });
        self
    }

    /// Appends a records-containment predicate against a JSON id-array
    /// column.
    pub fn where_records_in(
        mut self,
        column: impl Into<String>,
        ids: Vec<i64>,
        mode: RecordsMode,
    ) -> Self {
        self.children.push(Condition::RecordsContain {
            column: column.into(),
            ids,
            mode,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub(crate) fn into_condition(self) -> Condition {
        Condition::Group { kind: self.kind, children: self.children }
    }

    /// The id pinned by a top-level `id = n` leaf, if any. Used to exclude
    /// the row being updated from uniqueness checks.
    pub(crate) fn pinned_id(&self) -> Option<i64> {
        self.children.iter().find_map(|child| match child {
            Condition::Leaf { column, op: Op::Eq, value } if column == "id" => value.as_i64(),
            _ => None,
        })
    }

    /// Prepends conditions so that they compose via AND ahead of everything
    /// added later. Guards rely on this ordering.
    pub(crate) fn prepend(&mut self, conditions: Vec<Condition>) {
        let mut children = conditions;
        children.append(&mut self.children);
        self.children = children;
    }
}

/// Accumulates the branches of one OR group.
pub struct OrGroup {
    children: Vec<Condition>,
}

impl OrGroup {
    /// Adds one AND branch built by the closure.
    pub fn branch(mut self, f: impl FnOnce(ConditionGroup) -> ConditionGroup) -> Self {
        let group = f(ConditionGroup::and());
        self.children.push(group.into_condition());
        self
    }
}

/// Clones a condition group with the implicit language filter of a
/// translatable collection prepended, so it ANDs ahead of every caller
/// condition.
pub(crate) fn with_language_scope(
    root: &ConditionGroup,
    collection: &Collection,
    language: Option<&str>,
) -> ConditionGroup {
    let mut scoped = root.clone();
    if collection.translatable {
        if let Some(language) = language {
            scoped.prepend(vec![Condition::Leaf {
                column: "language".to_string(),
                op: Op::Eq,
                value: Value::from(language),
            }]);
        }
    }
    scoped
}

// ============================================================================
// Compilation
// ============================================================================

pub(crate) fn compile_group(
    group: &ConditionGroup,
    collection: &Collection,
    writer: &mut SqlWriter,
) -> Result<(), Error> {
    let condition = Condition::Group {
        kind: group.kind,
        children: group.children.clone(),
    };
    compile_condition(&condition, collection, writer)
}

fn compile_condition(
    condition: &Condition,
    collection: &Collection,
    writer: &mut SqlWriter,
) -> Result<(), Error> {
    match condition {
        Condition::Group { kind, children } => {
            if children.is_empty() {
                // Empty groups compile to their identity so composition is
                // always safe.
                writer.push(match kind {
                    GroupKind::And => "1=1",
                    GroupKind::Or => "1=0",
                });
                return Ok(());
            }
            writer.push("(");
            for (index, child) in children.iter().enumerate() {
                if index > 0 {
                    writer.push(match kind {
                        GroupKind::And => " AND ",
                        GroupKind::Or => " OR ",
                    });
                }
                compile_condition(child, collection, writer)?;
            }
            writer.push(")");
            Ok(())
        }
        Condition::Leaf { column, op, value } => {
            compile_leaf(column, *op, value, collection, writer)
        }
        Condition::RecordsContain { column, ids, mode } => {
            compile_records(column, ids, *mode, collection, writer)
        }
    }
}

fn check_column(collection: &Collection, column: &str) -> Result<String, Error> {
    if collection.field(column).is_none() {
        return Err(Error::UnknownColumn {
            collection: collection.name.clone(),
            column: column.to_string(),
        });
    }
    Ok(storage_name(column))
}

fn compile_leaf(
    column: &str,
    op: Op,
    value: &Value,
    collection: &Collection,
    writer: &mut SqlWriter,
) -> Result<(), Error> {
    let ident = check_column(collection, column)?;

    match op {
        Op::In | Op::NotIn => {
            let items = value.as_array().ok_or_else(|| {
                Error::query(format!("operator on '{column}' requires an array value"))
            })?;
            if items.is_empty() {
                // `IN ()` is invalid SQL in every dialect; an empty set
                // matches nothing (IN) or everything (NOT IN).
                writer.push(if op == Op::In { "1=0" } else { "1=1" });
                return Ok(());
            }
            writer.push_ident(&ident);
            writer.push(if op == Op::In { " IN (" } else { " NOT IN (" });
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    writer.push(", ");
                }
                writer.bind(item.clone());
            }
            writer.push(")");
        }
        Op::Eq if value.is_null() => {
            writer.push_ident(&ident);
            writer.push(" IS NULL");
        }
        Op::Ne if value.is_null() => {
            writer.push_ident(&ident);
            writer.push(" IS NOT NULL");
        }
        Op::Like => {
            writer.push_ident(&ident);
            writer.push(" LIKE ");
            writer.bind(value.clone());
            // SQLite has no default escape character; declaring one makes
            // backslash escaping work on both dialects.
            writer.push(" ESCAPE '\\'");
        }
        _ => {
            writer.push_ident(&ident);
            writer.push(" ");
            writer.push(op.as_sql());
            writer.push(" ");
            writer.bind(value.clone());
        }
    }

    Ok(())
}

/// Containment against a JSON array of ids is dialect-specific: SQLite
/// probes with `json_each`, PostgreSQL with `jsonb_array_elements_text`
/// (some) and `@>` containment (every).
fn compile_records(
    column: &str,
    ids: &[i64],
    mode: RecordsMode,
    collection: &Collection,
    writer: &mut SqlWriter,
) -> Result<(), Error> {
    let ident = check_column(collection, column)?;

    if ids.is_empty() {
        // Intersecting the empty set is vacuously false, containing it
        // vacuously true.
        writer.push(match mode {
            RecordsMode::Some => "1=0",
            RecordsMode::Every => "1=1",
        });
        return Ok(());
    }

    match (writer.driver(), mode) {
        (Drivers::SQLite, RecordsMode::Some) => {
            writer.push("EXISTS (SELECT 1 FROM json_each(");
            writer.push_ident(&ident);
            writer.push(") WHERE json_each.value IN (");
            for (index, id) in ids.iter().enumerate() {
                if index > 0 {
                    writer.push(", ");
                }
                writer.bind(Value::from(*id));
            }
            writer.push("))");
        }
        (Drivers::SQLite, RecordsMode::Every) => {
            writer.push("(");
            for (index, id) in ids.iter().enumerate() {
                if index > 0 {
                    writer.push(" AND ");
                }
                writer.push("EXISTS (SELECT 1 FROM json_each(");
                writer.push_ident(&ident);
                writer.push(") WHERE json_each.value = ");
                writer.bind(Value::from(*id));
                writer.push(")");
            }
            writer.push(")");
        }
        (Drivers::Postgres, RecordsMode::Some) => {
            writer.push("EXISTS (SELECT 1 FROM jsonb_array_elements_text(");
            writer.push_ident(&ident);
            writer.push("::jsonb) AS elem(value) WHERE elem.value IN (");
            for (index, id) in ids.iter().enumerate() {
                if index > 0 {
                    writer.push(", ");
                }
                writer.bind(Value::from(id.to_string()));
            }
            writer.push("))");
        }
        (Drivers::Postgres, RecordsMode::Every) => {
            writer.push("(");
            for (index, id) in ids.iter().enumerate() {
                if index > 0 {
                    writer.push(" AND ");
                }
                writer.push_ident(&ident);
                writer.push("::jsonb @> ");
                writer.bind(Value::from(id.to_string()));
                writer.push("::jsonb");
            }
            writer.push(")");
        }
    }

    Ok(())
}
