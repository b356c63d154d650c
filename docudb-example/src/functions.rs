use docudb::{
    define_action, define_mutation, define_query, ActionContext, DatabaseReader, DatabaseWriter,
    Direction, DocuDbError, DocumentId, FilterOp, FunctionRegistry, MutationContext, QueryContext,
    Validator,
};
use serde_json::{json, Value};

/// Build the registry of every function this application exposes.
pub fn registry() -> FunctionRegistry {
    FunctionRegistry::new()
        .register("create_user", create_user())
        .register("get_user", get_user())
        .register("list_by_role", list_by_role())
        .register("open_account", open_account())
        .register("transfer", transfer())
        .register("onboard", onboard())
}

/// Insert a user and return its id.
fn create_user() -> docudb::RegisteredFunction {
    define_mutation(|ctx: &MutationContext, args: &Value| {
        let id = ctx.db().insert("users", args.clone())?;
        Ok(json!(id.to_string()))
    })
    .args(Validator::object([
        ("name", Validator::string()),
        (
            "role",
            Validator::union(vec![
                Validator::literal("admin"),
                Validator::literal("member"),
            ]),
        ),
    ]))
    .returns(Validator::string())
}

/// Fetch one user by id; null when absent.
fn get_user() -> docudb::RegisteredFunction {
    define_query(|ctx: &QueryContext, args: &Value| {
        let id = DocumentId::parse(args["id"].as_str().unwrap_or_default())?;
        match ctx.db().get(&id)? {
            Some(doc) => Ok(doc.to_value()),
            None => Ok(Value::Null),
        }
    })
    .args(Validator::object([("id", Validator::id("users"))]))
}

/// List users with a given role, sorted by name.
fn list_by_role() -> docudb::RegisteredFunction {
    define_query(|ctx: &QueryContext, args: &Value| {
        let role = args["role"].as_str().unwrap_or_default();
        let docs = ctx
            .db()
            .query("users")?
            .filter("role", FilterOp::Eq, role)
            .order("name", Direction::Asc)
            .collect()?;
        Ok(Value::Array(docs.iter().map(|d| d.to_value()).collect()))
    })
    .args(Validator::object([("role", Validator::string())]))
}

/// Open an account for a user. Internal: only reachable from actions.
fn open_account() -> docudb::RegisteredFunction {
    define_mutation(|ctx: &MutationContext, args: &Value| {
        let id = ctx.db().insert("accounts", args.clone())?;
        Ok(json!(id.to_string()))
    })
    .args(Validator::object([
        ("owner", Validator::id("users")),
        ("balance", Validator::number()),
    ]))
    .returns(Validator::string())
    .internal()
}

/// Move money between two accounts, all-or-nothing.
fn transfer() -> docudb::RegisteredFunction {
    define_mutation(|ctx: &MutationContext, args: &Value| {
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

        let from_balance = from_doc
            .get("balance")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let to_balance = to_doc.get("balance").and_then(Value::as_f64).unwrap_or(0.0);

        if from_balance < amount {
            return Err(DocuDbError::handler("Insufficient funds"));
        }

        db.patch(&from, json!({"balance": from_balance - amount}))?;
        db.patch(&to, json!({"balance": to_balance + amount}))?;
        let receipt = db.insert(
            "transfers",
            json!({
                "from": from.to_string(),
                "to": to.to_string(),
                "amount": amount,
            }),
        )?;
        Ok(json!(receipt.to_string()))
    })
    .args(Validator::object([
        ("from", Validator::id("accounts")),
        ("to", Validator::id("accounts")),
        ("amount", Validator::number()),
    ]))
}

/// Create a user, then open their first account: two independent
/// transactions composed by an action.
fn onboard() -> docudb::RegisteredFunction {
    define_action(|ctx: &ActionContext, args: &Value| {
        let user_id = ctx.run_mutation(
            "create_user",
            &json!({"name": args["name"], "role": "member"}),
        )?;
        let account_id = ctx.run_mutation(
            "open_account",
            &json!({"owner": user_id, "balance": args["opening_balance"]}),
        )?;
        Ok(json!({"user": user_id, "account": account_id}))
    })
    .args(Validator::object([
        ("name", Validator::string()),
        ("opening_balance", Validator::number()),
    ]))
}
