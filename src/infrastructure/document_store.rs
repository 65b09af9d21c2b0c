// Document Store Interface - collection-oriented storage consumed by the feed services
// Backends implement get/query/commit; write semantics live here so every backend agrees on them.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};

use crate::error::{AppError, AppResult};

/// Milliseconds since the Unix epoch
pub type Timestamp = i64;

/// Schema-flexible record body
pub type Document = Map<String, Value>;

/// Upper bound on values accepted by a single membership predicate
pub const MAX_MEMBERSHIP_VALUES: usize = 10;

static FIELD_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("field name pattern is valid"));

pub fn current_time_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

pub fn validate_field_name(field: &str) -> AppResult<()> {
    if FIELD_NAME.is_match(field) {
        Ok(())
    } else {
        Err(AppError::InvalidArgument(format!("illegal field name '{}'", field)))
    }
}

/// Address of a single document: a collection path plus an id.
/// Sub-collections use slash-separated paths such as `users/{uid}/followers`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentRef {
    pub collection: String,
    pub id: String,
}

impl DocumentRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn path(&self) -> String {
        format!("{}/{}", self.collection, self.id)
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Last path segment of a collection, e.g. `following` for `users/u1/following`
pub fn collection_group(collection: &str) -> &str {
    collection.rsplit('/').next().unwrap_or(collection)
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub id: String,
    pub data: Document,
}

impl DocumentSnapshot {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    IdIn(Vec<String>),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::Eq {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn in_values<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In {
            field: field.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn id_in(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Filter::IdIn(ids.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, id: &str, data: &Document) -> bool {
        match self {
            Filter::Eq { field, value } => data
                .get(field)
                .map(|stored| values_equal(stored, value))
                .unwrap_or(false),
            Filter::In { field, values } => data
                .get(field)
                .map(|stored| values.iter().any(|value| values_equal(stored, value)))
                .unwrap_or(false),
            Filter::IdIn(ids) => ids.iter().any(|candidate| candidate == id),
        }
    }

    fn validate(&self) -> AppResult<()> {
        match self {
            Filter::Eq { field, value } => {
                validate_field_name(field)?;
                validate_scalar(value)
            }
            Filter::In { field, values } => {
                validate_field_name(field)?;
                validate_membership_size(values.len())?;
                values.iter().try_for_each(validate_scalar)
            }
            Filter::IdIn(ids) => validate_membership_size(ids.len()),
        }
    }
}

fn validate_membership_size(len: usize) -> AppResult<()> {
    if len == 0 {
        return Err(AppError::InvalidArgument(
            "membership predicate needs at least one value".to_string(),
        ));
    }
    if len > MAX_MEMBERSHIP_VALUES {
        return Err(AppError::InvalidArgument(format!(
            "membership predicate accepts at most {} values, got {}",
            MAX_MEMBERSHIP_VALUES, len
        )));
    }
    Ok(())
}

fn validate_scalar(value: &Value) -> AppResult<()> {
    match value {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => Ok(()),
        other => Err(AppError::InvalidArgument(format!(
            "predicate values must be scalars, got {}",
            other
        ))),
    }
}

/// Equality used by predicates: numbers compare numerically, everything else structurally.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over stored values used for `order_by`.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or_default()
            .partial_cmp(&y.as_f64().unwrap_or_default())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Compound-predicate query over one collection.
/// Ordering by a field excludes documents that lack it; ties fall back to document id.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<u32>,
}

impl Query {
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.collection.is_empty() {
            return Err(AppError::InvalidArgument("query needs a collection".to_string()));
        }
        for filter in &self.filters {
            filter.validate()?;
        }
        if let Some(order) = &self.order_by {
            validate_field_name(&order.field)?;
        }
        Ok(())
    }
}

/// A single write inside an atomic batch
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Upsert the whole document
    Set {
        target: DocumentRef,
        data: Document,
        server_timestamp: Option<String>,
    },
    /// Insert; fails with `AlreadyExists` when the document is present
    Create {
        target: DocumentRef,
        data: Document,
        server_timestamp: Option<String>,
    },
    /// Merge fields into an existing document
    Update { target: DocumentRef, fields: Document },
    /// Add `delta` to an integer field, clamped at zero
    Increment {
        target: DocumentRef,
        field: String,
        delta: i64,
    },
    ArrayUnion {
        target: DocumentRef,
        field: String,
        values: Vec<Value>,
    },
    ArrayRemove {
        target: DocumentRef,
        field: String,
        values: Vec<Value>,
    },
    Delete { target: DocumentRef, must_exist: bool },
}

impl WriteOp {
    pub fn target(&self) -> &DocumentRef {
        match self {
            WriteOp::Set { target, .. }
            | WriteOp::Create { target, .. }
            | WriteOp::Update { target, .. }
            | WriteOp::Increment { target, .. }
            | WriteOp::ArrayUnion { target, .. }
            | WriteOp::ArrayRemove { target, .. }
            | WriteOp::Delete { target, .. } => target,
        }
    }

    pub fn operation_type(&self) -> &'static str {
        match self {
            WriteOp::Set { .. } => "set",
            WriteOp::Create { .. } => "create",
            WriteOp::Update { .. } => "update",
            WriteOp::Increment { .. } => "increment",
            WriteOp::ArrayUnion { .. } => "array_union",
            WriteOp::ArrayRemove { .. } => "array_remove",
            WriteOp::Delete { .. } => "delete",
        }
    }

    fn validate(&self) -> AppResult<()> {
        let target = self.target();
        if target.collection.is_empty() || target.id.is_empty() || target.id.contains('/') {
            return Err(AppError::InvalidArgument(format!(
                "invalid document reference '{}'",
                target
            )));
        }
        match self {
            WriteOp::Set {
                server_timestamp: Some(field),
                ..
            }
            | WriteOp::Create {
                server_timestamp: Some(field),
                ..
            }
            | WriteOp::Increment { field, .. }
            | WriteOp::ArrayUnion { field, .. }
            | WriteOp::ArrayRemove { field, .. } => validate_field_name(field),
            _ => Ok(()),
        }
    }
}

/// Group of writes applied all-or-nothing by `DocumentStore::commit`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, target: DocumentRef, data: Document) -> &mut Self {
        self.ops.push(WriteOp::Set {
            target,
            data,
            server_timestamp: None,
        });
        self
    }

    pub fn set_stamped(&mut self, target: DocumentRef, data: Document, field: &str) -> &mut Self {
        self.ops.push(WriteOp::Set {
            target,
            data,
            server_timestamp: Some(field.to_string()),
        });
        self
    }

    pub fn create(&mut self, target: DocumentRef, data: Document) -> &mut Self {
        self.ops.push(WriteOp::Create {
            target,
            data,
            server_timestamp: None,
        });
        self
    }

    pub fn create_stamped(
        &mut self,
        target: DocumentRef,
        data: Document,
        field: &str,
    ) -> &mut Self {
        self.ops.push(WriteOp::Create {
            target,
            data,
            server_timestamp: Some(field.to_string()),
        });
        self
    }

    pub fn update(&mut self, target: DocumentRef, fields: Document) -> &mut Self {
        self.ops.push(WriteOp::Update { target, fields });
        self
    }

    pub fn increment(&mut self, target: DocumentRef, field: &str, delta: i64) -> &mut Self {
        self.ops.push(WriteOp::Increment {
            target,
            field: field.to_string(),
            delta,
        });
        self
    }

    pub fn array_union(&mut self, target: DocumentRef, field: &str, values: Vec<Value>) -> &mut Self {
        self.ops.push(WriteOp::ArrayUnion {
            target,
            field: field.to_string(),
            values,
        });
        self
    }

    pub fn array_remove(
        &mut self,
        target: DocumentRef,
        field: &str,
        values: Vec<Value>,
    ) -> &mut Self {
        self.ops.push(WriteOp::ArrayRemove {
            target,
            field: field.to_string(),
            values,
        });
        self
    }

    pub fn delete(&mut self, target: DocumentRef) -> &mut Self {
        self.ops.push(WriteOp::Delete {
            target,
            must_exist: false,
        });
        self
    }

    /// Delete that fails the whole batch with `PreconditionFailed` when the document is gone
    pub fn delete_existing(&mut self, target: DocumentRef) -> &mut Self {
        self.ops.push(WriteOp::Delete {
            target,
            must_exist: true,
        });
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.ops.is_empty() {
            return Err(AppError::InvalidArgument("empty write batch".to_string()));
        }
        self.ops.iter().try_for_each(WriteOp::validate)
    }
}

/// Apply one write to the current state of its target document.
/// Returns the new state; `None` means the document is absent afterwards.
pub fn apply_write(
    current: Option<Document>,
    op: &WriteOp,
    now: Timestamp,
) -> AppResult<Option<Document>> {
    match op {
        WriteOp::Set {
            data,
            server_timestamp,
            ..
        } => Ok(Some(stamp(data.clone(), server_timestamp.as_deref(), now))),
        WriteOp::Create {
            target,
            data,
            server_timestamp,
        } => {
            if current.is_some() {
                return Err(AppError::AlreadyExists(target.path()));
            }
            Ok(Some(stamp(data.clone(), server_timestamp.as_deref(), now)))
        }
        WriteOp::Update { target, fields } => {
            let mut doc = current.ok_or_else(|| AppError::NotFound(target.path()))?;
            for (key, value) in fields {
                doc.insert(key.clone(), value.clone());
            }
            Ok(Some(doc))
        }
        WriteOp::Increment {
            target,
            field,
            delta,
        } => {
            let mut doc = current.ok_or_else(|| AppError::NotFound(target.path()))?;
            let existing = match doc.get(field) {
                None | Some(Value::Null) => 0,
                Some(value) => value.as_i64().ok_or_else(|| {
                    AppError::MalformedDocument(format!(
                        "{} field '{}' is not an integer",
                        target, field
                    ))
                })?,
            };
            let next = existing.saturating_add(*delta).max(0);
            doc.insert(field.clone(), Value::from(next));
            Ok(Some(doc))
        }
        WriteOp::ArrayUnion {
            target,
            field,
            values,
        } => {
            let mut doc = current.ok_or_else(|| AppError::NotFound(target.path()))?;
            let mut items = take_array(&mut doc, target, field)?;
            for value in values {
                if !items.iter().any(|item| values_equal(item, value)) {
                    items.push(value.clone());
                }
            }
            doc.insert(field.clone(), Value::Array(items));
            Ok(Some(doc))
        }
        WriteOp::ArrayRemove {
            target,
            field,
            values,
        } => {
            let mut doc = current.ok_or_else(|| AppError::NotFound(target.path()))?;
            let mut items = take_array(&mut doc, target, field)?;
            items.retain(|item| !values.iter().any(|value| values_equal(item, value)));
            doc.insert(field.clone(), Value::Array(items));
            Ok(Some(doc))
        }
        WriteOp::Delete { target, must_exist } => {
            if *must_exist && current.is_none() {
                return Err(AppError::PreconditionFailed(format!(
                    "{} does not exist",
                    target
                )));
            }
            Ok(None)
        }
    }
}

fn stamp(mut data: Document, field: Option<&str>, now: Timestamp) -> Document {
    if let Some(field) = field {
        data.insert(field.to_string(), Value::from(now));
    }
    data
}

fn take_array(doc: &mut Document, target: &DocumentRef, field: &str) -> AppResult<Vec<Value>> {
    match doc.remove(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(AppError::MalformedDocument(format!(
            "{} field '{}' is not an array",
            target, field
        ))),
    }
}

/// Hands out strictly increasing commit timestamps, tracking the last one issued.
#[derive(Debug, Default)]
pub struct CommitClock {
    last: AtomicI64,
}

impl CommitClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> Timestamp {
        let now = current_time_millis();
        let mut last = self.last.load(AtomicOrdering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match self.last.compare_exchange_weak(
                last,
                candidate,
                AtomicOrdering::SeqCst,
                AtomicOrdering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(observed) => last = observed,
            }
        }
    }
}

/// Collection-oriented document store consumed by the feed services.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short backend name for logs and metrics
    fn backend_name(&self) -> &'static str;

    async fn get(&self, target: &DocumentRef) -> AppResult<Option<DocumentSnapshot>>;

    async fn query(&self, query: &Query) -> AppResult<Vec<DocumentSnapshot>>;

    /// Apply every write in the batch or none of them. Returns the commit timestamp
    /// written into server-timestamp fields.
    async fn commit(&self, batch: WriteBatch) -> AppResult<Timestamp>;
}

/// Convert a `json!` object literal into a `Document`
pub fn into_document(value: Value) -> AppResult<Document> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(AppError::SerializationError(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}
