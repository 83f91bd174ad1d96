//! Document store abstractions.
//!
//! A document store keeps JSON documents in named collections. Every stored
//! document carries an opaque generation that changes on each write;
//! conditional writes present the generation they read and are rejected
//! with [`Error::OutOfDate`] when it no longer matches.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A document together with its current generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub generation: String,
    pub value: Value,
}

/// Produce a fresh generation token.
pub fn new_generation() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// One page of query results.
#[derive(Debug, Clone)]
pub struct QueryPage<T> {
    pub items: Vec<T>,
    /// Token to fetch the next page, `None` when exhausted.
    pub continuation: Option<String>,
}

impl<T> Default for QueryPage<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            continuation: None,
        }
    }
}

impl<T> QueryPage<T> {
    /// Convert the items of this page.
    pub fn try_map<U>(self, f: impl FnMut(T) -> Result<U>) -> Result<QueryPage<U>> {
        Ok(QueryPage {
            items: self.items.into_iter().map(f).collect::<Result<Vec<_>>>()?,
            continuation: self.continuation,
        })
    }
}

/// Comparison applied by a [`FieldCondition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    EqIgnoreCase,
    Ne,
    Lt,
    Gt,
}

/// A condition on one field, addressed by a dotted path (`state.visibility`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCondition {
    pub path: String,
    pub op: FilterOp,
    pub value: Value,
}

impl FieldCondition {
    /// Evaluate this condition against a document.
    pub fn matches(&self, document: &Value) -> bool {
        let actual = lookup(document, &self.path);
        match self.op {
            FilterOp::Eq => actual == Some(&self.value),
            FilterOp::Ne => actual != Some(&self.value),
            FilterOp::EqIgnoreCase => match (actual, &self.value) {
                (Some(Value::String(a)), Value::String(b)) => fold_case(a) == fold_case(b),
                (Some(a), b) => a == b,
                (None, _) => false,
            },
            FilterOp::Lt => {
                actual.and_then(|a| compare(a, &self.value)) == Some(Ordering::Less)
            }
            FilterOp::Gt => {
                actual.and_then(|a| compare(a, &self.value)) == Some(Ordering::Greater)
            }
        }
    }
}

/// Conjunction of field conditions. An empty filter matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentFilter {
    pub conditions: Vec<FieldCondition>,
}

impl DocumentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    fn with(mut self, path: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.conditions.push(FieldCondition {
            path: path.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn eq(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(path, FilterOp::Eq, value)
    }

    pub fn eq_ignore_case(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(path, FilterOp::EqIgnoreCase, value)
    }

    pub fn ne(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(path, FilterOp::Ne, value)
    }

    pub fn lt(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(path, FilterOp::Lt, value)
    }

    pub fn gt(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(path, FilterOp::Gt, value)
    }

    /// Append all conditions of another filter.
    pub fn and(mut self, other: DocumentFilter) -> Self {
        self.conditions.extend(other.conditions);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Paths referenced by this filter.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.conditions.iter().map(|c| c.path.as_str())
    }

    /// Whether every condition holds for the document.
    pub fn matches(&self, document: &Value) -> bool {
        self.conditions.iter().all(|c| c.matches(document))
    }
}

/// Case folding shared with identity comparison of uris.
pub fn fold_case(s: &str) -> String {
    s.to_lowercase()
}

fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = document;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Reject empty pages.
pub fn check_page_size(page_size: usize) -> Result<()> {
    if page_size == 0 {
        return Err(Error::invalid_argument("page size must be greater than zero"));
    }
    Ok(())
}

/// Document store backend trait.
///
/// Implementations must make `replace` and `delete` atomic with respect to
/// the generation check.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new document. Fails with `Conflict` if the id exists.
    async fn add(&self, collection: &str, id: &str, value: Value) -> Result<StoredDocument>;

    /// Read a document, `None` when absent.
    async fn find(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>>;

    /// Replace a document if its generation still matches.
    ///
    /// Fails with `OutOfDate` on mismatch and `NotFound` when absent.
    async fn replace(
        &self,
        collection: &str,
        id: &str,
        generation: &str,
        value: Value,
    ) -> Result<StoredDocument>;

    /// Delete a document if its generation still matches.
    async fn delete(&self, collection: &str, id: &str, generation: &str) -> Result<()>;

    /// Query documents in id order, starting after the continuation token.
    async fn query(
        &self,
        collection: &str,
        filter: &DocumentFilter,
        continuation: Option<&str>,
        page_size: usize,
    ) -> Result<QueryPage<StoredDocument>>;

    /// Check if this backend persists data across restarts.
    fn is_persistent(&self) -> bool;
}

/// Shared document store handle.
pub type SharedDocumentStore = Arc<dyn DocumentStore>;
