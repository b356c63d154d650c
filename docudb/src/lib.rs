pub mod error;
pub mod ident;
pub mod validate;
pub mod schema;
pub mod document;
pub mod backend;
pub mod query;
pub mod db;
pub mod runner;

pub use backend::{
    Direction, FilterOp, KeyStrategy, QuerySpec, RawDocument, SqliteBackend, StoreBackend,
};
pub use db::{Database, DatabaseReader, DatabaseWriter, Reader, Transaction, Writer};
pub use document::Document;
pub use error::{DocuDbError, Result};
pub use ident::DocumentId;
pub use query::Query;
pub use runner::{
    define_action, define_mutation, define_query, ActionContext, FunctionKind, FunctionRegistry,
    FunctionRunner, MutationContext, QueryContext, RegisteredFunction, Visibility,
};
pub use schema::{parse_schema, parse_schema_str, Schema, SchemaBuilder, TableDefinition};
pub use validate::Validator;
