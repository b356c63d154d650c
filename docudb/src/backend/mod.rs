// Store boundary - the primitives an underlying document store must provide

mod sqlite;

pub use sqlite::{KeyStrategy, SqliteBackend};

use crate::error::Result;
use serde_json::{Map, Value};

/// Comparison operators supported natively by the store's query primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// Sort direction; ascending when unspecified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// One `(field, operator, value)` condition; conditions are conjunctive.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

/// One `(field, direction)` sort key.
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub field: String,
    pub direction: Direction,
}

/// A fully-accumulated query request handed to the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    pub filters: Vec<Filter>,
    pub order: Vec<SortKey>,
    pub limit: Option<usize>,
}

/// A document as the store sees it: the opaque key, the creation timestamp
/// in milliseconds, and the user field map. Table membership and identifier
/// branding live above this boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDocument {
    pub key: String,
    pub creation_time_ms: i64,
    pub fields: Map<String, Value>,
}

/// The operations an underlying document store must provide. The store is
/// assumed correct: it honors declared indexes, detects conflicting
/// concurrent writes, and never exposes a partially-committed unit of work.
pub trait StoreBackend {
    /// Point read by key. `None` when absent.
    fn read(&self, table: &str, key: &str) -> Result<Option<RawDocument>>;

    /// Point write by key: creates the document or replaces it wholesale.
    fn write(&self, table: &str, document: &RawDocument) -> Result<()>;

    /// Partial update by key: named fields overwrite, others are untouched.
    /// Returns `false` when no document exists at the key.
    fn patch(&self, table: &str, key: &str, fields: &Map<String, Value>) -> Result<bool>;

    /// Point delete by key. Returns `false` when no document existed.
    fn delete(&self, table: &str, key: &str) -> Result<bool>;

    /// Execute a filter/order/limit request, returning matching documents in
    /// the requested order (store-determined deterministic order when no sort
    /// keys are given).
    fn query(&self, table: &str, spec: &QuerySpec) -> Result<Vec<RawDocument>>;

    /// Mint a fresh opaque key. Keys never contain the identifier separator.
    fn generate_key(&self) -> String;

    /// Open one atomic unit of work. Every call until `commit_transaction`
    /// or `rollback_transaction` belongs to it. Precondition on alternative
    /// implementations: reads inside the unit of work must observe a
    /// consistent snapshot, and whether they observe the unit's own earlier
    /// writes must be documented (the bundled SQLite backend does).
    fn begin_transaction(&self) -> Result<()>;

    /// Commit the open unit of work, making all of its writes visible.
    fn commit_transaction(&self) -> Result<()>;

    /// Discard the open unit of work; none of its writes become visible.
    fn rollback_transaction(&self) -> Result<()>;
}
