//! # Query String Module
//!
//! Deterministic mapping between URL query strings and builder calls, and
//! the inverse, so API clients and the dashboard can express read, update
//! and delete operations declaratively. Each parameter category can be
//! disabled when applying, so route-pinned scoping (e.g. an id from the
//! path) cannot be overridden by the client.
//!
//! Recognized parameters: `select`, per-field filters with operator
//! suffixes (`price[gte]=10`, `tags[some]=1,2`), `search`, `order`
//! (with the `:default` token), `limit`/`offset`/`page`/`perPage` and
//! `populate`.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde_json::Value;

use crate::{
    condition::{Condition, Op, RecordsMode},
    delete::DeleteQueryBuilder,
    schema::SortDirection,
    select::SelectQueryBuilder,
    update::UpdateQueryBuilder,
};

/// Characters escaped when serializing values back into a query string.
const QUERY_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'&')
    .add(b'=')
    .add(b'+')
    .add(b'#')
    .add(b'%');

// ============================================================================
// ApplyOptions
// ============================================================================

/// Which query-string categories to honor when binding to a builder.
#[derive(Debug, Clone, Copy)]
pub struct ApplyOptions {
    pub select: bool,
    pub filters: bool,
    pub search: bool,
    pub order: bool,
    pub pagination: bool,
    pub populate: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            select: true,
            filters: true,
            search: true,
            order: true,
            pagination: true,
            populate: true,
        }
    }
}

impl ApplyOptions {
    pub fn all() -> Self {
        Self::default()
    }

    /// Ignore client filters; used when the route already pins the rows.
    pub fn without_filters(mut self) -> Self {
        self.filters = false;
        self.search = false;
        self
    }

    pub fn without_pagination(mut self) -> Self {
        self.pagination = false;
        self
    }

    pub fn without_populate(mut self) -> Self {
        self.populate = false;
        self
    }
}

// ============================================================================
// Parsing
// ============================================================================

fn decode(component: &str) -> String {
    let plus_decoded = component.replace('+', " ");
    percent_decode_str(&plus_decoded)
        .decode_utf8_lossy()
        .into_owned()
}

fn pairs(query: &str) -> Vec<(String, String)> {
    query
        .trim_start_matches('?')
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((key, value)) => (decode(key), decode(value)),
            None => (decode(part), String::new()),
        })
        .collect()
}

/// Splits `price[gte]` into the field and its operator suffix.
fn split_key(key: &str) -> (&str, Option<&str>) {
    if let Some(open) = key.find('[') {
        if let Some(stripped) = key[open + 1..].strip_suffix(']') {
            return (&key[..open], Some(stripped));
        }
    }
    (key, None)
}

/// Types a scalar the way a JSON parser would; everything else stays a
/// string.
fn parse_scalar(raw: &str) -> Value {
    match raw {
        "null" => Value::Null,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if let Ok(i) = raw.parse::<i64>() {
                Value::from(i)
            } else if let Ok(f) = raw.parse::<f64>() {
                Value::from(f)
            } else {
                Value::from(raw)
            }
        }
    }
}

/// Escapes `LIKE` metacharacters so a search term only matches literally.
fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn parse_list(raw: &str) -> Vec<Value> {
    raw.split(',')
        .filter(|item| !item.is_empty())
        .map(parse_scalar)
        .collect()
}

fn parse_ids(raw: &str) -> Vec<i64> {
    raw.split(',')
        .filter_map(|item| item.trim().parse::<i64>().ok())
        .collect()
}

fn suffix_op(suffix: &str) -> Option<Op> {
    Some(match suffix {
        "ne" => Op::Ne,
        "gt" => Op::Gt,
        "gte" => Op::Gte,
        "lt" => Op::Lt,
        "lte" => Op::Lte,
        "like" => Op::Like,
        "in" => Op::In,
        "notIn" => Op::NotIn,
        _ => return None,
    })
}

fn op_suffix(op: Op) -> Option<&'static str> {
    Some(match op {
        Op::Eq => return None,
        Op::Ne => "ne",
        Op::Gt => "gt",
        Op::Gte => "gte",
        Op::Lt => "lt",
        Op::Lte => "lte",
        Op::Like => "like",
        Op::In => "in",
        Op::NotIn => "notIn",
    })
}

// ============================================================================
// Binding: Select
// ============================================================================

impl SelectQueryBuilder {
    /// Applies a URL query string to this builder. Categories disabled in
    /// `options` are silently skipped; malformed parameters latch a fault
    /// that the terminal reports as a runtime error.
    pub fn from_query_string(mut self, query: &str, options: &ApplyOptions) -> Self {
        for (key, raw) in pairs(query) {
            match key.as_str() {
                "select" if options.select => {
                    let columns: Vec<&str> = raw.split(',').filter(|c| !c.is_empty()).collect();
                    self = self.select(&columns);
                }
                "search" if options.search => {
                    let searchable = self
                        .collection
                        .as_ref()
                        .map(|c| c.searchable.clone())
                        .unwrap_or_default();
                    if searchable.is_empty() {
                        if self.fault.is_none() {
                            self.fault = Some(format!(
                                "collection does not declare searchable fields (search '{raw}')"
                            ));
                        }
                        continue;
                    }
                    let pattern = format!("%{}%", escape_like(&raw));
                    self = self.or_group(|mut or| {
                        for field in &searchable {
                            let field = field.clone();
                            let pattern = pattern.clone();
                            or = or.branch(|g| g.where_(field, Op::Like, pattern));
                        }
                        or
                    });
                }
                "order" if options.order => {
                    for token in raw.split(',').filter(|t| !t.is_empty()) {
                        if token == ":default" {
                            self = self.order_by_default();
                            continue;
                        }
                        let (field, direction) = match token.split_once(':') {
                            Some((field, "desc")) => (field, SortDirection::Desc),
                            Some((field, _)) => (field, SortDirection::Asc),
                            None => (token, SortDirection::Asc),
                        };
                        self = self.order_by(field, direction);
                    }
                }
                "limit" if options.pagination => {
                    if let Ok(limit) = raw.parse::<usize>() {
                        self = self.limit(limit);
                    }
                }
                "offset" if options.pagination => {
                    if let Ok(offset) = raw.parse::<usize>() {
                        self = self.offset(offset);
                    }
                }
                "page" if options.pagination => {
                    self.qs_page = raw.parse::<usize>().ok();
                }
                "perPage" if options.pagination => {
                    self.qs_per_page = raw.parse::<usize>().ok();
                }
                "populate" if options.populate => {
                    for path in raw.split(',').filter(|p| !p.is_empty()) {
                        self.populate.add_path(path);
                    }
                }
                "select" | "search" | "order" | "limit" | "offset" | "page" | "perPage"
                | "populate" => {
                    // Category disabled; drop the parameter.
                }
                _ if options.filters => {
                    let (field, suffix) = split_key(&key);
                    match suffix {
                        None => self = self.where_(field, Op::Eq, parse_scalar(&raw)),
                        Some("in") => {
                            self = self.where_(field, Op::In, Value::Array(parse_list(&raw)));
                        }
                        Some("notIn") => {
                            self = self.where_(field, Op::NotIn, Value::Array(parse_list(&raw)));
                        }
                        Some("some") => {
                            self = self.where_records_in(field, parse_ids(&raw), RecordsMode::Some);
                        }
                        Some("every") => {
                            self =
                                self.where_records_in(field, parse_ids(&raw), RecordsMode::Every);
                        }
                        Some(other) => match suffix_op(other) {
                            Some(op) => self = self.where_(field, op, parse_scalar(&raw)),
                            None => {
                                if self.fault.is_none() {
                                    self.fault =
                                        Some(format!("unknown filter operator '{other}'"));
                                }
                            }
                        },
                    }
                }
                _ => {}
            }
        }
        self
    }

    /// Serializes builder state back into a query string. Only top-level
    /// leaf conditions are representable; nested groups are omitted.
    pub fn to_query_string(&self) -> String {
        let mut parts = Vec::new();

        if let Some(columns) = &self.columns {
            parts.push(format!("select={}", columns.join(",")));
        }

        for condition in &self.root.children {
            match condition {
                Condition::Leaf { column, op, value } => match op {
                    Op::In | Op::NotIn => {
                        let items = value
                            .as_array()
                            .map(|items| {
                                items
                                    .iter()
                                    .map(render_scalar)
                                    .collect::<Vec<_>>()
                                    .join(",")
                            })
                            .unwrap_or_default();
                        let suffix = op_suffix(*op).unwrap_or("in");
                        parts.push(format!("{column}[{suffix}]={items}"));
                    }
                    _ => match op_suffix(*op) {
                        Some(suffix) => {
                            parts.push(format!("{column}[{suffix}]={}", render_scalar(value)));
                        }
                        None => parts.push(format!("{column}={}", render_scalar(value))),
                    },
                },
                Condition::RecordsContain { column, ids, mode } => {
                    let suffix = match mode {
                        RecordsMode::Some => "some",
                        RecordsMode::Every => "every",
                    };
                    let items = ids
                        .iter()
                        .map(|id| id.to_string())
                        .collect::<Vec<_>>()
                        .join(",");
                    parts.push(format!("{column}[{suffix}]={items}"));
                }
                // Nested groups have no flat representation.
                Condition::Group { .. } => {}
            }
        }

        if !self.order.is_empty() {
            let tokens: Vec<String> = self
                .order
                .iter()
                .map(|(field, direction)| match direction {
                    SortDirection::Asc => field.clone(),
                    SortDirection::Desc => format!("{field}:desc"),
                })
                .collect();
            parts.push(format!("order={}", tokens.join(",")));
        }

        if let Some(page) = self.qs_page {
            parts.push(format!("page={page}"));
        }
        if let Some(per_page) = self.qs_per_page {
            parts.push(format!("perPage={per_page}"));
        }
        if let Some(limit) = self.limit {
            parts.push(format!("limit={limit}"));
        }
        if let Some(offset) = self.offset {
            parts.push(format!("offset={offset}"));
        }

        let populate = self.populate.paths();
        if !populate.is_empty() {
            parts.push(format!("populate={}", populate.join(",")));
        }

        parts.join("&")
    }
}

fn render_scalar(value: &Value) -> String {
    let raw = match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    utf8_percent_encode(&raw, QUERY_ESCAPE).to_string()
}

// ============================================================================
// Binding: Update / Delete
// ============================================================================

impl UpdateQueryBuilder {
    /// Applies the filter categories of a query string to scope the update.
    pub fn from_query_string(mut self, query: &str, options: &ApplyOptions) -> Self {
        if !options.filters {
            return self;
        }
        for (key, raw) in pairs(query) {
            if is_reserved(&key) {
                continue;
            }
            let (field, suffix) = split_key(&key);
            self = apply_filter_update(self, field, suffix, &raw);
        }
        self
    }
}

impl DeleteQueryBuilder {
    /// Applies the filter categories of a query string to scope the delete.
    pub fn from_query_string(mut self, query: &str, options: &ApplyOptions) -> Self {
        if !options.filters {
            return self;
        }
        for (key, raw) in pairs(query) {
            if is_reserved(&key) {
                continue;
            }
            let (field, suffix) = split_key(&key);
            self = apply_filter_delete(self, field, suffix, &raw);
        }
        self
    }
}

fn is_reserved(key: &str) -> bool {
    matches!(
        key,
        "select" | "search" | "order" | "limit" | "offset" | "page" | "perPage" | "populate"
    )
}

fn apply_filter_update(
    builder: UpdateQueryBuilder,
    field: &str,
    suffix: Option<&str>,
    raw: &str,
) -> UpdateQueryBuilder {
    match suffix {
        None => builder.where_(field, Op::Eq, parse_scalar(raw)),
        Some("in") => builder.where_(field, Op::In, Value::Array(parse_list(raw))),
        Some("notIn") => builder.where_(field, Op::NotIn, Value::Array(parse_list(raw))),
        Some("some") => builder.where_records_in(field, parse_ids(raw), RecordsMode::Some),
        Some("every") => builder.where_records_in(field, parse_ids(raw), RecordsMode::Every),
        Some(other) => match suffix_op(other) {
            Some(op) => builder.where_(field, op, parse_scalar(raw)),
            None => builder,
        },
    }
}

fn apply_filter_delete(
    builder: DeleteQueryBuilder,
    field: &str,
    suffix: Option<&str>,
    raw: &str,
) -> DeleteQueryBuilder {
    match suffix {
        None => builder.where_(field, Op::Eq, parse_scalar(raw)),
        Some("in") => builder.where_(field, Op::In, Value::Array(parse_list(raw))),
        Some("notIn") => builder.where_(field, Op::NotIn, Value::Array(parse_list(raw))),
        Some("some") => builder.where_records_in(field, parse_ids(raw), RecordsMode::Some),
        Some("every") => builder.where_records_in(field, parse_ids(raw), RecordsMode::Every),
        Some(other) => match suffix_op(other) {
            Some(op) => builder.where_(field, op, parse_scalar(raw)),
            None => builder,
        },
    }
}
