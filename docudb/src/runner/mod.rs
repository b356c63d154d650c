// Function runner - registered handlers, per-kind contexts, atomicity

use crate::db::{Database, Reader, Transaction};
use crate::error::{DocuDbError, Result};
use crate::validate::Validator;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// What a registered function is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// Read-only; runs against the direct reader.
    Query,
    /// Read-write; the whole handler body runs in one atomic unit of work.
    Mutation,
    /// No direct database handle; composes other functions, each call with
    /// its own independent atomicity scope.
    Action,
}

/// Who may invoke a registered function through [`FunctionRunner::run`].
/// Internal functions are only reachable from action contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Internal,
}

pub type QueryHandler = Arc<dyn Fn(&QueryContext<'_>, &Value) -> Result<Value>>;
pub type MutationHandler = Arc<dyn Fn(&MutationContext<'_>, &Value) -> Result<Value>>;
pub type ActionHandler = Arc<dyn Fn(&ActionContext<'_>, &Value) -> Result<Value>>;

#[derive(Clone)]
enum Handler {
    Query(QueryHandler),
    Mutation(MutationHandler),
    Action(ActionHandler),
}

/// A handler plus its argument/return validators, kind, and visibility.
/// Created once via [`define_query`], [`define_mutation`] or
/// [`define_action`]; never mutated afterwards.
#[derive(Clone)]
pub struct RegisteredFunction {
    kind: FunctionKind,
    visibility: Visibility,
    args: Option<Validator>,
    returns: Option<Validator>,
    handler: Handler,
}

impl RegisteredFunction {
    pub fn kind(&self) -> FunctionKind {
        self.kind
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// Attach an argument validator, checked before the handler runs.
    pub fn args(mut self, validator: Validator) -> Self {
        self.args = Some(validator);
        self
    }

    /// Attach a return-value validator, checked before the result is
    /// surfaced (and, for mutations, before the unit of work commits).
    pub fn returns(mut self, validator: Validator) -> Self {
        self.returns = Some(validator);
        self
    }

    /// Restrict the function to action-context callers.
    pub fn internal(mut self) -> Self {
        self.visibility = Visibility::Internal;
        self
    }
}

/// Register a read-only function.
pub fn define_query(
    handler: impl Fn(&QueryContext<'_>, &Value) -> Result<Value> + 'static,
) -> RegisteredFunction {
    RegisteredFunction {
        kind: FunctionKind::Query,
        visibility: Visibility::Public,
        args: None,
        returns: None,
        handler: Handler::Query(Arc::new(handler)),
    }
}

/// Register a transactional read-write function.
pub fn define_mutation(
    handler: impl Fn(&MutationContext<'_>, &Value) -> Result<Value> + 'static,
) -> RegisteredFunction {
    RegisteredFunction {
        kind: FunctionKind::Mutation,
        visibility: Visibility::Public,
        args: None,
        returns: None,
        handler: Handler::Mutation(Arc::new(handler)),
    }
}

/// Register a composing function with no direct database handle.
pub fn define_action(
    handler: impl Fn(&ActionContext<'_>, &Value) -> Result<Value> + 'static,
) -> RegisteredFunction {
    RegisteredFunction {
        kind: FunctionKind::Action,
        visibility: Visibility::Public,
        args: None,
        returns: None,
        handler: Handler::Action(Arc::new(handler)),
    }
}

/// An explicit name-to-function map, built by the application and handed to
/// the runner at construction. Runners never share hidden global state, so
/// several can coexist in one process.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, RegisteredFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        FunctionRegistry::default()
    }

    pub fn register(mut self, name: impl Into<String>, function: RegisteredFunction) -> Self {
        self.functions.insert(name.into(), function);
        self
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredFunction> {
        self.functions.get(name)
    }
}

/// The context handed to query handlers: the direct reader, nothing else.
pub struct QueryContext<'a> {
    db: Reader<'a>,
}

impl<'a> QueryContext<'a> {
    pub fn db(&self) -> &Reader<'a> {
        &self.db
    }
}

/// The context handed to mutation handlers: a writer whose operations all
/// belong to the invocation's unit of work.
pub struct MutationContext<'a> {
    tx: Transaction<'a>,
}

impl<'a> MutationContext<'a> {
    pub fn db(&self) -> &Transaction<'a> {
        &self.tx
    }
}

/// The context handed to action handlers. Actions touch data only by
/// re-entering the runner; internal functions are reachable from here.
pub struct ActionContext<'a> {
    runner: &'a FunctionRunner,
}

impl ActionContext<'_> {
    pub fn run_query(&self, name: &str, args: &Value) -> Result<Value> {
        let def = self.runner.resolve(name, FunctionKind::Query)?;
        self.runner.run_query(&def, args)
    }

    /// Each mutation invoked from an action gets its own independent unit of
    /// work; two calls are not one joint transaction.
    pub fn run_mutation(&self, name: &str, args: &Value) -> Result<Value> {
        let def = self.runner.resolve(name, FunctionKind::Mutation)?;
        self.runner.run_mutation(&def, args)
    }

    pub fn run_action(&self, name: &str, args: &Value) -> Result<Value> {
        let def = self.runner.resolve(name, FunctionKind::Action)?;
        self.runner.run_action(&def, args)
    }
}

/// Validates arguments, builds the right context per function kind, invokes
/// the handler, and enforces commit-or-rollback for mutations.
pub struct FunctionRunner {
    db: Database,
    registry: FunctionRegistry,
}

impl FunctionRunner {
    pub fn new(db: Database, registry: FunctionRegistry) -> Self {
        FunctionRunner { db, registry }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// External entry point: resolve a public function by name and run it.
    pub fn run(&self, name: &str, args: &Value) -> Result<Value> {
        let def = self
            .registry
            .get(name)
            .ok_or_else(|| DocuDbError::Other(format!("function '{name}' is not registered")))?;
        if def.visibility() == Visibility::Internal {
            return Err(DocuDbError::Other(format!(
                "function '{name}' is internal and cannot be called directly"
            )));
        }
        let def = def.clone();
        match def.kind() {
            FunctionKind::Query => self.run_query(&def, args),
            FunctionKind::Mutation => self.run_mutation(&def, args),
            FunctionKind::Action => self.run_action(&def, args),
        }
    }

    /// Run a query definition against a read-only context.
    pub fn run_query(&self, def: &RegisteredFunction, args: &Value) -> Result<Value> {
        let handler = match &def.handler {
            Handler::Query(handler) => handler.clone(),
            _ => return Err(DocuDbError::Other("function is not a query".into())),
        };
        validate_args(def, args)?;

        let ctx = QueryContext {
            db: self.db.reader(),
        };
        let result = handler(&ctx, args)?;
        validate_returns(def, &result)?;
        Ok(result)
    }

    /// Run a mutation definition inside one atomic unit of work. The unit
    /// commits when the handler returns a valid result and rolls back on any
    /// error, which is re-thrown unchanged.
    pub fn run_mutation(&self, def: &RegisteredFunction, args: &Value) -> Result<Value> {
        let handler = match &def.handler {
            Handler::Mutation(handler) => handler.clone(),
            _ => return Err(DocuDbError::Other("function is not a mutation".into())),
        };
        validate_args(def, args)?;

        let ctx = MutationContext {
            tx: self.db.begin_transaction()?,
        };
        let outcome = handler(&ctx, args).and_then(|result| {
            validate_returns(def, &result)?;
            Ok(result)
        });

        match outcome {
            Ok(result) => {
                ctx.tx.commit()?;
                Ok(result)
            }
            Err(error) => {
                log::debug!("mutation failed, rolling back: {error}");
                if let Err(rollback_error) = ctx.tx.rollback() {
                    log::warn!("rollback failed after handler error: {rollback_error}");
                }
                Err(error)
            }
        }
    }

    /// Run an action definition. The context can only re-enter the runner.
    pub fn run_action(&self, def: &RegisteredFunction, args: &Value) -> Result<Value> {
        let handler = match &def.handler {
            Handler::Action(handler) => handler.clone(),
            _ => return Err(DocuDbError::Other("function is not an action".into())),
        };
        validate_args(def, args)?;

        let ctx = ActionContext { runner: self };
        let result = handler(&ctx, args)?;
        validate_returns(def, &result)?;
        Ok(result)
    }

    /// Resolve a function for an action callback. Internal functions are
    /// reachable here, unlike through [`run`].
    ///
    /// [`run`]: FunctionRunner::run
    fn resolve(&self, name: &str, kind: FunctionKind) -> Result<RegisteredFunction> {
        let def = self
            .registry
            .get(name)
            .ok_or_else(|| DocuDbError::Other(format!("function '{name}' is not registered")))?;
        if def.kind() != kind {
            return Err(DocuDbError::Other(format!(
                "function '{name}' is a {:?}, not a {kind:?}",
                def.kind()
            )));
        }
        Ok(def.clone())
    }
}

fn validate_args(def: &RegisteredFunction, args: &Value) -> Result<()> {
    if let Some(validator) = &def.args {
        validator.validate(args)?;
    }
    Ok(())
}

fn validate_returns(def: &RegisteredFunction, result: &Value) -> Result<()> {
    if let Some(validator) = &def.returns {
        validator.validate(result)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FilterOp, SqliteBackend};
    use crate::db::{DatabaseReader, DatabaseWriter};
    use crate::ident::DocumentId;
    use crate::schema::parse_schema_str;
    use serde_json::json;

    fn test_database() -> Database {
        let schema = parse_schema_str(
            r#"
tables:
  users:
    fields:
      name: { type: string }
      role: { type: string, enum: [admin, user] }

  accounts:
    fields:
      owner: { type: string }
      balance: { type: number }

  transfers:
    fields:
      from: { type: id, table: accounts }
      to: { type: id, table: accounts }
      amount: { type: number }
"#,
        )
        .unwrap();
        Database::new(schema, SqliteBackend::open_in_memory().unwrap())
    }

    fn transfer_registry() -> FunctionRegistry {
        let open_account = define_mutation(|ctx: &MutationContext, args: &Value| {
            let id = ctx.db().insert("accounts", args.clone())?;
            Ok(json!(id.to_string()))
        })
        .args(Validator::object([
            ("owner", Validator::string()),
            ("balance", Validator::number()),
        ]))
        .returns(Validator::string());

        let balance_of = define_query(|ctx: &QueryContext, args: &Value| {
            let id = DocumentId::parse(args["account"].as_str().unwrap_or_default())?;
            let doc = ctx.db().get(&id)?.ok_or_else(|| {
                DocuDbError::handler(format!("no such account: {id}"))
            })?;
            Ok(doc.get("balance").cloned().unwrap_or(Value::Null))
        });

        let transfer = define_mutation(|ctx: &MutationContext, args: &Value| {
            let from = DocumentId::parse(args["from"].as_str().unwrap_or_default())?;
            let to = DocumentId::parse(args["to"].as_str().unwrap_or_default())?;
            let amount = args["amount"].as_f64().unwrap_or_default();

            let db = ctx.db();
            let from_doc = db
                .get(&from)?
                .ok_or_else(|| DocuDbError::handler("unknown source account"))?;
            let to_doc = db
                .get(&to)?
                .ok_or_else(|| DocuDbError::handler("unknown destination account"))?;

            let from_balance = from_doc.get("balance").and_then(Value::as_f64).unwrap_or(0.0);
            let to_balance = to_doc.get("balance").and_then(Value::as_f64).unwrap_or(0.0);
            if from_balance < amount {
                return Err(DocuDbError::handler("Insufficient funds"));
            }

            db.patch(&from, json!({"balance": from_balance - amount}))?;
            db.patch(&to, json!({"balance": to_balance + amount}))?;
            db.insert(
                "transfers",
                json!({"from": from.to_string(), "to": to.to_string(), "amount": amount}),
            )?;
            Ok(Value::Null)
        })
        .args(Validator::object([
            ("from", Validator::id("accounts")),
            ("to", Validator::id("accounts")),
            ("amount", Validator::number()),
        ]));

        FunctionRegistry::new()
            .register("open_account", open_account)
            .register("balance_of", balance_of)
            .register("transfer", transfer)
    }

    fn account_with_balance(runner: &FunctionRunner, owner: &str, balance: f64) -> String {
        let id = runner
            .run("open_account", &json!({"owner": owner, "balance": balance}))
            .unwrap();
        id.as_str().unwrap().to_string()
    }

    fn balance(runner: &FunctionRunner, account: &str) -> f64 {
        runner
            .run("balance_of", &json!({"account": account}))
            .unwrap()
            .as_f64()
            .unwrap()
    }

    #[test]
    fn test_query_runs_against_reader() {
        let db = test_database();
        db.writer()
            .insert("users", json!({"name": "Alice", "role": "admin"}))
            .unwrap();

        let list_admins = define_query(|ctx: &QueryContext, _args: &Value| {
            let docs = ctx
                .db()
                .query("users")?
                .filter("role", FilterOp::Eq, "admin")
                .collect()?;
            Ok(json!(docs.len()))
        });

        let runner = FunctionRunner::new(db, FunctionRegistry::new().register("admins", list_admins));
        assert_eq!(runner.run("admins", &Value::Null).unwrap(), json!(1));
    }

    #[test]
    fn test_argument_validation_runs_first() {
        let runner = FunctionRunner::new(test_database(), transfer_registry());

        let err = runner
            .run("open_account", &json!({"owner": "Alice"}))
            .unwrap_err();
        assert!(matches!(err, DocuDbError::Validation { .. }));

        // Nothing was written.
        assert!(runner
            .database()
            .reader()
            .query("accounts")
            .unwrap()
            .collect()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_mutation_commit_visibility() {
        let runner = FunctionRunner::new(test_database(), transfer_registry());

        let id = account_with_balance(&runner, "Alice", 50.0);
        let parsed = DocumentId::parse(&id).unwrap();
        let doc = runner.database().reader().get(&parsed).unwrap().unwrap();
        assert_eq!(doc.get("balance"), Some(&json!(50.0)));
    }

    #[test]
    fn test_mutation_atomicity_on_handler_error() {
        let db = test_database();

        let doomed = define_mutation(|ctx: &MutationContext, _args: &Value| {
            ctx.db()
                .insert("users", json!({"name": "One", "role": "user"}))?;
            ctx.db()
                .insert("users", json!({"name": "Two", "role": "user"}))?;
            Err(DocuDbError::handler("boom"))
        });

        let runner = FunctionRunner::new(db, FunctionRegistry::new().register("doomed", doomed));

        let err = runner.run("doomed", &Value::Null).unwrap_err();
        // The handler's error comes back unchanged.
        match &err {
            DocuDbError::Handler(message) => assert_eq!(message, "boom"),
            other => panic!("unexpected error: {other}"),
        }

        // None of the writes are observable after the rollback.
        assert!(runner
            .database()
            .reader()
            .query("users")
            .unwrap()
            .collect()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_transfer_insufficient_funds_rolls_back() {
        let runner = FunctionRunner::new(test_database(), transfer_registry());

        let from = account_with_balance(&runner, "Alice", 30.0);
        let to = account_with_balance(&runner, "Bob", 5.0);

        let err = runner
            .run("transfer", &json!({"from": from, "to": to, "amount": 100.0}))
            .unwrap_err();
        match &err {
            DocuDbError::Handler(message) => assert_eq!(message, "Insufficient funds"),
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(balance(&runner, &from), 30.0);
        assert_eq!(balance(&runner, &to), 5.0);
        assert!(runner
            .database()
            .reader()
            .query("transfers")
            .unwrap()
            .collect()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_transfer_success_moves_exactly_amount() {
        let runner = FunctionRunner::new(test_database(), transfer_registry());

        let from = account_with_balance(&runner, "Alice", 30.0);
        let to = account_with_balance(&runner, "Bob", 5.0);

        runner
            .run("transfer", &json!({"from": from, "to": to, "amount": 12.5}))
            .unwrap();

        assert_eq!(balance(&runner, &from), 17.5);
        assert_eq!(balance(&runner, &to), 17.5);

        let transfers = runner
            .database()
            .reader()
            .query("transfers")
            .unwrap()
            .collect()
            .unwrap();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].get("amount"), Some(&json!(12.5)));
    }

    #[test]
    fn test_action_composes_independent_transactions() {
        let db = test_database();

        let add_user = define_mutation(|ctx: &MutationContext, args: &Value| {
            let id = ctx.db().insert("users", args.clone())?;
            Ok(json!(id.to_string()))
        })
        .internal();

        // Adds two users; the second call fails validation inside its own
        // unit of work, leaving the first committed.
        let onboard_pair = define_action(|ctx: &ActionContext, args: &Value| {
            ctx.run_mutation("add_user", &args["first"])?;
            ctx.run_mutation("add_user", &args["second"])?;
            Ok(Value::Null)
        });

        let runner = FunctionRunner::new(
            db,
            FunctionRegistry::new()
                .register("add_user", add_user)
                .register("onboard_pair", onboard_pair),
        );

        let err = runner
            .run(
                "onboard_pair",
                &json!({
                    "first": {"name": "Alice", "role": "admin"},
                    "second": {"name": "Bob", "role": "superuser"},
                }),
            )
            .unwrap_err();
        assert!(matches!(err, DocuDbError::Validation { .. }));

        // Partial completion across independent units of work is expected.
        let users = runner
            .database()
            .reader()
            .query("users")
            .unwrap()
            .collect()
            .unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].get("name"), Some(&json!("Alice")));
    }

    #[test]
    fn test_internal_functions_unreachable_directly() {
        let db = test_database();
        let add_user = define_mutation(|ctx: &MutationContext, args: &Value| {
            let id = ctx.db().insert("users", args.clone())?;
            Ok(json!(id.to_string()))
        })
        .internal();

        let runner =
            FunctionRunner::new(db, FunctionRegistry::new().register("add_user", add_user));

        let err = runner
            .run("add_user", &json!({"name": "Alice", "role": "admin"}))
            .unwrap_err();
        assert!(err.to_string().contains("internal"));
    }

    #[test]
    fn test_unknown_function_and_kind_mismatch() {
        let runner = FunctionRunner::new(test_database(), transfer_registry());

        assert!(runner.run("nope", &Value::Null).is_err());

        let ask_for_wrong_kind = define_action(|ctx: &ActionContext, _args: &Value| {
            ctx.run_query("transfer", &Value::Null)
        });
        let runner = FunctionRunner::new(
            test_database(),
            transfer_registry().register("wrong_kind", ask_for_wrong_kind),
        );
        let err = runner.run("wrong_kind", &Value::Null).unwrap_err();
        assert!(err.to_string().contains("not a"));
    }

    #[test]
    fn test_return_validation_failure_rolls_back() {
        let db = test_database();

        let bad_return = define_mutation(|ctx: &MutationContext, _args: &Value| {
            ctx.db()
                .insert("users", json!({"name": "Alice", "role": "user"}))?;
            Ok(json!("not a number"))
        })
        .returns(Validator::number());

        let runner =
            FunctionRunner::new(db, FunctionRegistry::new().register("bad_return", bad_return));

        let err = runner.run("bad_return", &Value::Null).unwrap_err();
        assert!(matches!(err, DocuDbError::Validation { .. }));
        assert!(runner
            .database()
            .reader()
            .query("users")
            .unwrap()
            .collect()
            .unwrap()
            .is_empty());
    }
}
