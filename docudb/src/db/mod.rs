use crate::backend::{QuerySpec, RawDocument, StoreBackend};
use crate::document::{is_system_field, Document};
use crate::error::{DocuDbError, Result};
use crate::ident::DocumentId;
use crate::query::Query;
use crate::schema::{Schema, TableDefinition};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::cell::Cell;

/// Read operations. Implemented by the direct reader and the transactional
/// writer alike.
pub trait DatabaseReader {
    /// Fetch one document by id. `Ok(None)` when absent; errors are reserved
    /// for malformed identifiers and store faults.
    fn get(&self, id: &DocumentId) -> Result<Option<Document>>;

    /// Start a query against a table. Building the query never touches the
    /// store; only its terminal operations execute.
    fn query(&self, table: &str) -> Result<Query<'_>>;
}

/// Write operations, a superset of [`DatabaseReader`].
pub trait DatabaseWriter: DatabaseReader {
    /// Validate `value` against the table schema, assign a fresh key and
    /// creation timestamp, and write the document. Returns its id.
    fn insert(&self, table: &str, value: Value) -> Result<DocumentId>;

    /// Apply a partial update. Only the named fields change; each is
    /// validated against its declared validator. System fields cannot be
    /// patched. Fails with `NotFound` when the document is absent.
    fn patch(&self, id: &DocumentId, partial: Value) -> Result<()>;

    /// Overwrite all user fields after full validation, preserving the
    /// original creation timestamp. Fails with `NotFound` when absent.
    fn replace(&self, id: &DocumentId, value: Value) -> Result<()>;

    /// Remove the document. Fails with `NotFound` when absent.
    fn delete(&self, id: &DocumentId) -> Result<()>;
}

/// Issues creation timestamps that never move backwards, even if the wall
/// clock does. Strictly increasing per database, so insertion order is
/// always recoverable from `_creationTime`.
struct MonotonicClock {
    last_ms: Cell<i64>,
}

impl MonotonicClock {
    fn new() -> Self {
        MonotonicClock {
            last_ms: Cell::new(0),
        }
    }

    fn now_ms(&self) -> i64 {
        let now = Utc::now()
            .timestamp_millis()
            .max(self.last_ms.get() + 1);
        self.last_ms.set(now);
        now
    }
}

/// The access layer over one schema and one store.
///
/// The schema is immutable and shared read-only by every handle; the store
/// is reached through the [`StoreBackend`] boundary. Handles come in two
/// flavors: [`reader`]/[`writer`] issue each call as its own round trip,
/// while [`begin_transaction`] yields a writer whose calls all belong to one
/// atomic unit of work.
///
/// [`reader`]: Database::reader
/// [`writer`]: Database::writer
/// [`begin_transaction`]: Database::begin_transaction
pub struct Database {
    schema: Schema,
    backend: Box<dyn StoreBackend>,
    clock: MonotonicClock,
    in_transaction: Cell<bool>,
}

impl Database {
    pub fn new(schema: Schema, backend: impl StoreBackend + 'static) -> Self {
        Database {
            schema,
            backend: Box::new(backend),
            clock: MonotonicClock::new(),
            in_transaction: Cell::new(false),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// A read-only handle issuing direct round trips.
    pub fn reader(&self) -> Reader<'_> {
        Reader { db: self }
    }

    /// A read-write handle issuing direct round trips.
    pub fn writer(&self) -> Writer<'_> {
        Writer { db: self }
    }

    /// Open one atomic unit of work. At most one may be open at a time;
    /// nesting fails with `TransactionAborted`.
    pub fn begin_transaction(&self) -> Result<Transaction<'_>> {
        if self.in_transaction.get() {
            return Err(DocuDbError::TransactionAborted(
                "a unit of work is already open on this database".into(),
            ));
        }
        self.backend.begin_transaction()?;
        self.in_transaction.set(true);
        Ok(Transaction {
            db: self,
            finished: Cell::new(false),
        })
    }

    pub(crate) fn execute_query(&self, table: &str, spec: &QuerySpec) -> Result<Vec<Document>> {
        let raw = self.backend.query(table, spec)?;
        raw.into_iter()
            .map(|document| self.materialize(table, document))
            .collect()
    }

    /// Validate a raw store document against the table schema and tag it
    /// with its identifier. Guards against store-level data drift.
    fn materialize(&self, table: &str, raw: RawDocument) -> Result<Document> {
        let definition = self.schema.expect_table(table)?;
        definition.validate_document(&Value::Object(raw.fields.clone()))?;
        Ok(Document {
            id: DocumentId::new(table, raw.key),
            creation_time: DateTime::from_timestamp_millis(raw.creation_time_ms)
                .unwrap_or_default(),
            fields: raw.fields,
        })
    }

    fn table_for_id(&self, id: &DocumentId) -> Result<&TableDefinition> {
        self.schema.table(id.table()).ok_or_else(|| {
            DocuDbError::InvalidIdentifier(format!(
                "id '{id}' names a table that is not in the schema"
            ))
        })
    }

    // ── Operations shared by the direct and transactional handles ──

    fn get_impl(&self, id: &DocumentId) -> Result<Option<Document>> {
        self.table_for_id(id)?;
        match self.backend.read(id.table(), id.key())? {
            Some(raw) => Ok(Some(self.materialize(id.table(), raw)?)),
            None => Ok(None),
        }
    }

    fn query_impl(&self, table: &str) -> Result<Query<'_>> {
        self.schema.expect_table(table)?;
        Ok(Query::new(self, table))
    }

    fn insert_impl(&self, table: &str, value: Value) -> Result<DocumentId> {
        let definition = self.schema.expect_table(table)?;
        definition.validate_document(&value)?;
        let fields = match value {
            Value::Object(fields) => fields,
            other => {
                return Err(DocuDbError::validation(
                    "$",
                    format!("expected object, got {other}"),
                ))
            }
        };

        let key = self.backend.generate_key();
        let raw = RawDocument {
            key: key.clone(),
            creation_time_ms: self.clock.now_ms(),
            fields,
        };
        self.backend.write(table, &raw)?;
        Ok(DocumentId::new(table, key))
    }

    fn patch_impl(&self, id: &DocumentId, partial: Value) -> Result<()> {
        let definition = self.table_for_id(id)?;
        let partial = match partial {
            Value::Object(fields) => fields,
            other => {
                return Err(DocuDbError::validation(
                    "$",
                    format!("expected object, got {other}"),
                ))
            }
        };

        for (name, value) in &partial {
            if is_system_field(name) {
                return Err(DocuDbError::validation(
                    format!("$.{name}"),
                    "system fields cannot be written",
                ));
            }
            match definition.field(name) {
                Some(validator) => validator.validate(value).map_err(|e| nest(e, name))?,
                None => {
                    return Err(DocuDbError::validation(
                        format!("$.{name}"),
                        "unexpected field",
                    ))
                }
            }
        }

        if self.backend.patch(id.table(), id.key(), &partial)? {
            Ok(())
        } else {
            Err(not_found(id))
        }
    }

    fn replace_impl(&self, id: &DocumentId, value: Value) -> Result<()> {
        let definition = self.table_for_id(id)?;
        definition.validate_document(&value)?;
        let fields = match value {
            Value::Object(fields) => fields,
            other => {
                return Err(DocuDbError::validation(
                    "$",
                    format!("expected object, got {other}"),
                ))
            }
        };

        // Creation time is read just-in-time so the write keeps it.
        let existing = self
            .backend
            .read(id.table(), id.key())?
            .ok_or_else(|| not_found(id))?;

        let raw = RawDocument {
            key: id.key().to_string(),
            creation_time_ms: existing.creation_time_ms,
            fields,
        };
        self.backend.write(id.table(), &raw)
    }

    fn delete_impl(&self, id: &DocumentId) -> Result<()> {
        self.table_for_id(id)?;
        if self.backend.delete(id.table(), id.key())? {
            Ok(())
        } else {
            Err(not_found(id))
        }
    }
}

fn not_found(id: &DocumentId) -> DocuDbError {
    DocuDbError::NotFound {
        table: id.table().to_string(),
        key: id.key().to_string(),
    }
}

/// Re-root a validation error produced for a bare field value under that
/// field's name.
fn nest(error: DocuDbError, field: &str) -> DocuDbError {
    match error {
        DocuDbError::Validation { path, message } => DocuDbError::Validation {
            path: format!("$.{field}{}", path.trim_start_matches('$')),
            message,
        },
        other => other,
    }
}

/// Direct read-only handle.
pub struct Reader<'a> {
    db: &'a Database,
}

impl DatabaseReader for Reader<'_> {
    fn get(&self, id: &DocumentId) -> Result<Option<Document>> {
        self.db.get_impl(id)
    }

    fn query(&self, table: &str) -> Result<Query<'_>> {
        self.db.query_impl(table)
    }
}

/// Direct read-write handle; each call commits on its own.
pub struct Writer<'a> {
    db: &'a Database,
}

impl DatabaseReader for Writer<'_> {
    fn get(&self, id: &DocumentId) -> Result<Option<Document>> {
        self.db.get_impl(id)
    }

    fn query(&self, table: &str) -> Result<Query<'_>> {
        self.db.query_impl(table)
    }
}

impl DatabaseWriter for Writer<'_> {
    fn insert(&self, table: &str, value: Value) -> Result<DocumentId> {
        self.db.insert_impl(table, value)
    }

    fn patch(&self, id: &DocumentId, partial: Value) -> Result<()> {
        self.db.patch_impl(id, partial)
    }

    fn replace(&self, id: &DocumentId, value: Value) -> Result<()> {
        self.db.replace_impl(id, value)
    }

    fn delete(&self, id: &DocumentId) -> Result<()> {
        self.db.delete_impl(id)
    }
}

/// A writer bound to one atomic unit of work.
///
/// All operations issued through it commit or roll back together. Reads
/// observe the unit of work's own earlier writes (a property of the bundled
/// SQLite backend, see [`StoreBackend::begin_transaction`]). Exclusively
/// owned by one invocation; dropping it without committing rolls back, so an
/// abandoned unit of work never becomes partially visible.
pub struct Transaction<'a> {
    db: &'a Database,
    finished: Cell<bool>,
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl Transaction<'_> {
    /// Commit the unit of work. A store-level commit failure rolls back and
    /// surfaces as `TransactionAborted`.
    pub fn commit(self) -> Result<()> {
        self.finished.set(true);
        self.db.in_transaction.set(false);
        self.db.backend.commit_transaction().map_err(|e| {
            let _ = self.db.backend.rollback_transaction();
            DocuDbError::TransactionAborted(e.to_string())
        })
    }

    /// Discard the unit of work.
    pub fn rollback(self) -> Result<()> {
        self.finished.set(true);
        self.db.in_transaction.set(false);
        self.db.backend.rollback_transaction()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished.get() {
            self.db.in_transaction.set(false);
            if let Err(e) = self.db.backend.rollback_transaction() {
                log::warn!("failed to roll back abandoned unit of work: {e}");
            }
        }
    }
}

impl DatabaseReader for Transaction<'_> {
    fn get(&self, id: &DocumentId) -> Result<Option<Document>> {
        self.db.get_impl(id)
    }

    fn query(&self, table: &str) -> Result<Query<'_>> {
        self.db.query_impl(table)
    }
}

impl DatabaseWriter for Transaction<'_> {
    fn insert(&self, table: &str, value: Value) -> Result<DocumentId> {
        self.db.insert_impl(table, value)
    }

    fn patch(&self, id: &DocumentId, partial: Value) -> Result<()> {
        self.db.patch_impl(id, partial)
    }

    fn replace(&self, id: &DocumentId, value: Value) -> Result<()> {
        self.db.replace_impl(id, value)
    }

    fn delete(&self, id: &DocumentId) -> Result<()> {
        self.db.delete_impl(id)
    }
}
