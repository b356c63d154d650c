use docudb::{parse_schema_str, Database, DatabaseReader, DocumentId, FunctionRunner, SqliteBackend};
use serde::Deserialize;
use serde_json::json;

mod functions;

#[derive(Debug, Deserialize)]
struct Account {
    owner: DocumentId,
    balance: f64,
}

const SCHEMA: &str = r#"
tables:
  users:
    fields:
      name: { type: string }
      role: { type: string, enum: [admin, member] }
    indexes:
      - name: by_role
        fields: [role, name]

  accounts:
    fields:
      owner: { type: id, table: users }
      balance: { type: number }

  transfers:
    fields:
      from: { type: id, table: accounts }
      to: { type: id, table: accounts }
      amount: { type: number }
"#;

fn main() -> docudb::Result<()> {
    env_logger::init();
    log::info!("Starting docudb example");

    let backend = match std::env::var("DOCUDB_DATA") {
        Ok(path) => SqliteBackend::open(std::path::Path::new(&path))?,
        Err(_) => SqliteBackend::open_in_memory()?,
    };
    let db = Database::new(parse_schema_str(SCHEMA)?, backend);
    let runner = FunctionRunner::new(db, functions::registry());

    // Create two users directly, plus one via the onboarding action.
    let alice = runner.run("create_user", &json!({"name": "Alice", "role": "admin"}))?;
    let bob = runner.run("create_user", &json!({"name": "Bob", "role": "member"}))?;
    log::info!("created users {alice} and {bob}");

    let onboarded = runner.run("onboard", &json!({"name": "Cara", "opening_balance": 120.0}))?;
    println!("onboarded: {onboarded}");

    // Accounts are opened through the internal mutation, so reach it the
    // same way the onboarding action does: via another onboarding call.
    let second = runner.run("onboard", &json!({"name": "Dana", "opening_balance": 40.0}))?;

    let from = onboarded["account"].as_str().unwrap_or_default().to_string();
    let to = second["account"].as_str().unwrap_or_default().to_string();

    let receipt = runner.run(
        "transfer",
        &json!({"from": from, "to": to, "amount": 45.5}),
    )?;
    println!("transfer receipt: {receipt}");

    // An under-funded transfer fails and leaves every balance untouched.
    match runner.run("transfer", &json!({"from": from, "to": to, "amount": 1000.0})) {
        Ok(_) => println!("unexpected: transfer should have failed"),
        Err(e) => println!("rejected as expected: {e}"),
    }

    let members = runner.run("list_by_role", &json!({"role": "member"}))?;
    println!("members: {members}");

    let fetched = runner.run("get_user", &json!({"id": onboarded["user"]}))?;
    println!("onboarded user: {fetched}");

    // Documents also deserialize into typed structs.
    let source = DocumentId::parse(&from)?;
    let doc = runner
        .database()
        .reader()
        .get(&source)?
        .ok_or_else(|| docudb::DocuDbError::handler("source account vanished"))?;
    let account: Account = doc.deserialize_fields()?;
    println!("source account owned by {} now holds {}", account.owner, account.balance);

    Ok(())
}
