//! Shell command language
//!
//! One command per line, shared by the interactive shell and the `query`
//! subcommand. Row values are JSON; array values become vector literals.

use crate::{ColumnValue, Constraint, Database, FilterCondition, QueryOptions, ResultRow, RowId, Value, VirtualTable};
use anyhow::{anyhow, bail, Context};
use std::io::Write;

/// What the caller should do after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Exit,
}

/// Execute one command line against `db`, writing output to `out`
pub fn execute(db: &Database, line: &str, out: &mut dyn Write) -> anyhow::Result<Outcome> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let (command, args) = match parts.split_first() {
        Some((command, args)) => (*command, args),
        None => return Ok(Outcome::Continue),
    };

    match command {
        "help" => show_help(out)?,
        "exit" | "quit" => return Ok(Outcome::Exit),
        "tables" => list_tables(db, out)?,
        "create" => create(db, args, out)?,
        "drop" => drop_table(db, args, out)?,
        "insert" => insert(db, args, out)?,
        "update" => update(db, args, out)?,
        "delete" => delete(db, args, out)?,
        "get" => get(db, args, out)?,
        "knn" => knn(db, args, out)?,
        "scan" => scan(db, args, out)?,
        "explain" => explain(db, args, out)?,
        "stats" => stats(db, args, out)?,
        "vacuum" => {
            let table = table_arg(args, "vacuum <table>")?;
            db.vacuum(table)?;
            writeln!(out, "Vacuumed '{}'", table)?;
        }
        "verify" => {
            db.verify()?;
            writeln!(out, "OK")?;
        }
        "sync" => {
            db.sync()?;
            writeln!(out, "Database synced to disk")?;
        }
        _ => writeln!(
            out,
            "Unknown command: {}. Type 'help' for available commands.",
            command
        )?,
    }

    Ok(Outcome::Continue)
}

fn show_help(out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(out, "Available commands:")?;
    writeln!(out)?;
    writeln!(out, "  tables                                    - List all tables")?;
    writeln!(out, "  create <table> <columns>                  - Create a table")?;
    writeln!(out, "  drop <table>                              - Drop a table")?;
    writeln!(out, "  insert <table> [rowid] <json array>       - Insert a row")?;
    writeln!(out, "  update <table> <rowid> <json object>      - Update named columns")?;
    writeln!(out, "  delete <table> <rowid>                    - Delete a row")?;
    writeln!(out, "  get <table> <rowid>                       - Show one row")?;
    writeln!(out, "  knn <table> <column> <k> <vector> [where] - Nearest neighbours")?;
    writeln!(out, "  scan <table> [where]                      - Show matching rows")?;
    writeln!(out, "  explain <table> <column> <k> <vector>     - Show the query plan")?;
    writeln!(out, "  stats <table>                             - Show table statistics")?;
    writeln!(out, "  vacuum <table>                            - Compact a table")?;
    writeln!(out, "  verify                                    - Check storage consistency")?;
    writeln!(out, "  sync                                      - Sync database to disk")?;
    writeln!(out, "  exit/quit                                 - Exit the shell")?;
    writeln!(out)?;
    writeln!(out, "Filters: where <column> <op> <json> [and ...], op one of = != < <= > >= in")?;
    writeln!(out)?;
    writeln!(out, "Examples:")?;
    writeln!(out, "  create docs embedding float[3], category integer, +body text")?;
    writeln!(out, "  insert docs [[0.1, 0.2, 0.3], 1, \"hello\"]")?;
    writeln!(out, "  knn docs embedding 5 [0.1, 0.2, 0.3] where category = 1")?;
    Ok(())
}

fn list_tables(db: &Database, out: &mut dyn Write) -> anyhow::Result<()> {
    let tables = db.list_tables();
    if tables.is_empty() {
        writeln!(out, "No tables found")?;
        return Ok(());
    }
    writeln!(out, "Tables:")?;
    for (name, count) in tables {
        writeln!(out, "  {} ({} rows)", name, count)?;
    }
    Ok(())
}

fn create(db: &Database, args: &[&str], out: &mut dyn Write) -> anyhow::Result<()> {
    if args.len() < 2 {
        bail!("Usage: create <table> <columns>");
    }
    db.create_table(args[0], &args[1..].join(" "))?;
    writeln!(out, "Created table '{}'", args[0])?;
    Ok(())
}

fn drop_table(db: &Database, args: &[&str], out: &mut dyn Write) -> anyhow::Result<()> {
    let table = table_arg(args, "drop <table>")?;
    db.drop_table(table)?;
    writeln!(out, "Dropped table '{}'", table)?;
    Ok(())
}

fn insert(db: &Database, args: &[&str], out: &mut dyn Write) -> anyhow::Result<()> {
    if args.len() < 2 {
        bail!("Usage: insert <table> [rowid] <json array>");
    }
    let (rowid, rest) = match args[1].parse::<RowId>() {
        Ok(rowid) if args.len() > 2 => (Some(rowid), &args[2..]),
        _ => (None, &args[1..]),
    };
    let json: serde_json::Value =
        serde_json::from_str(&rest.join(" ")).context("row values must be a JSON array")?;
    let values = json
        .as_array()
        .ok_or_else(|| anyhow!("row values must be a JSON array"))?
        .iter()
        .map(Value::from_json)
        .collect();

    let rowid = db.insert(args[0], rowid, values)?;
    writeln!(out, "Inserted row {}", rowid)?;
    Ok(())
}

fn update(db: &Database, args: &[&str], out: &mut dyn Write) -> anyhow::Result<()> {
    if args.len() < 3 {
        bail!("Usage: update <table> <rowid> <json object>");
    }
    let rowid = parse_rowid(args[1])?;
    let json: serde_json::Value =
        serde_json::from_str(&args[2..].join(" ")).context("updates must be a JSON object")?;
    let object = json
        .as_object()
        .ok_or_else(|| anyhow!("updates must be a JSON object"))?;

    let names = db.with_table(args[0], |t| {
        t.schema()
            .columns
            .iter()
            .map(|c| c.name.clone())
            .collect::<Vec<_>>()
    })?;
    if let Some(unknown) = object
        .keys()
        .find(|k| !names.iter().any(|n| n.eq_ignore_ascii_case(k)))
    {
        bail!("no such column: {}", unknown);
    }
    let values = names
        .iter()
        .map(|name| {
            object
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| ColumnValue::Set(Value::from_json(v)))
                .unwrap_or(ColumnValue::Unchanged)
        })
        .collect();

    db.update(args[0], rowid, values)?;
    writeln!(out, "Updated row {}", rowid)?;
    Ok(())
}

fn delete(db: &Database, args: &[&str], out: &mut dyn Write) -> anyhow::Result<()> {
    if args.len() < 2 {
        bail!("Usage: delete <table> <rowid>");
    }
    let rowid = parse_rowid(args[1])?;
    db.delete(args[0], rowid)?;
    writeln!(out, "Deleted row {}", rowid)?;
    Ok(())
}

fn get(db: &Database, args: &[&str], out: &mut dyn Write) -> anyhow::Result<()> {
    if args.len() < 2 {
        bail!("Usage: get <table> <rowid>");
    }
    let row = db.get(args[0], parse_rowid(args[1])?)?;
    writeln!(out, "{}", serde_json::to_string_pretty(&row.to_json())?)?;
    Ok(())
}

fn knn(db: &Database, args: &[&str], out: &mut dyn Write) -> anyhow::Result<()> {
    let constraints = knn_constraints(args, "knn <table> <column> <k> <vector> [where ...]")?;
    let rows = db.query(args[0], &constraints, &QueryOptions::default())?;
    print_rows(&rows, out)
}

fn scan(db: &Database, args: &[&str], out: &mut dyn Write) -> anyhow::Result<()> {
    let table = table_arg(args, "scan <table> [where ...]")?;
    let constraints = match args[1..].split_first() {
        Some((&"where", clause)) => parse_filters(&clause.join(" "))?,
        Some(_) => bail!("Usage: scan <table> [where ...]"),
        None => Vec::new(),
    };
    let rows = db.query(table, &constraints, &QueryOptions::default())?;
    print_rows(&rows, out)
}

fn explain(db: &Database, args: &[&str], out: &mut dyn Write) -> anyhow::Result<()> {
    let constraints = knn_constraints(args, "explain <table> <column> <k> <vector> [where ...]")?;
    let info = db.with_table(args[0], |t| t.best_index(&constraints))??;
    writeln!(out, "Strategy: {:?}", info.plan.strategy)?;
    writeln!(out, "Filters:  {}", info.plan.filters.len())?;
    writeln!(out, "Cost:     {}", info.estimated_cost)?;
    Ok(())
}

fn stats(db: &Database, args: &[&str], out: &mut dyn Write) -> anyhow::Result<()> {
    let table = table_arg(args, "stats <table>")?;
    let stats = db.stats(table)?;
    writeln!(out, "Table: {}", stats.name)?;
    writeln!(out, "  Rows:           {}", stats.row_count)?;
    writeln!(out, "  Chunks:         {} x {} slots", stats.chunk_count, stats.chunk_size)?;
    writeln!(out, "  Vector columns: {}", stats.vector_columns)?;
    writeln!(out, "  Vector bytes:   {}", stats.vector_bytes)?;
    writeln!(
        out,
        "  Overflow:       {} records, {} live bytes, {} dead bytes",
        stats.overflow_records, stats.overflow_live_bytes, stats.overflow_dead_bytes
    )?;
    Ok(())
}

fn table_arg<'a>(args: &[&'a str], usage: &str) -> anyhow::Result<&'a str> {
    args.first()
        .copied()
        .ok_or_else(|| anyhow!("Usage: {}", usage))
}

fn parse_rowid(text: &str) -> anyhow::Result<RowId> {
    text.parse()
        .with_context(|| format!("invalid rowid: {}", text))
}

/// `<table> <column> <k> <vector> [where ...]` into MATCH, k and filters
fn knn_constraints(args: &[&str], usage: &str) -> anyhow::Result<Vec<Constraint>> {
    if args.len() < 4 {
        bail!("Usage: {}", usage);
    }
    let k: i64 = args[2]
        .parse()
        .with_context(|| format!("invalid k: {}", args[2]))?;
    let rest = args[3..].join(" ");
    let (vector, clause) = match rest.split_once(" where ") {
        Some((vector, clause)) => (vector, Some(clause)),
        None => (rest.as_str(), None),
    };

    let mut constraints = vec![Constraint::matches(args[1], vector.trim()), Constraint::k(k)];
    if let Some(clause) = clause {
        constraints.extend(parse_filters(clause)?);
    }
    Ok(constraints)
}

/// Parse `col op json [and col op json ...]`
fn parse_filters(clause: &str) -> anyhow::Result<Vec<Constraint>> {
    clause
        .split(" and ")
        .map(|term| {
            let tokens: Vec<&str> = term.split_whitespace().collect();
            if tokens.len() < 3 {
                bail!("malformed filter: {}", term.trim());
            }
            let operand = tokens[2..].join(" ");
            let condition = if tokens[1].eq_ignore_ascii_case("in") {
                let json: serde_json::Value = serde_json::from_str(&operand)
                    .with_context(|| format!("IN expects a JSON array: {}", operand))?;
                let items = json
                    .as_array()
                    .ok_or_else(|| anyhow!("IN expects a JSON array: {}", operand))?;
                FilterCondition::In(items.iter().map(Value::from_json).collect())
            } else {
                FilterCondition::from_op(tokens[1], parse_operand(&operand))
                    .ok_or_else(|| anyhow!("unknown operator: {}", tokens[1]))?
            };
            Ok(Constraint::filter(tokens[0], condition))
        })
        .collect()
}

/// JSON where possible, bare words as text
fn parse_operand(text: &str) -> Value {
    serde_json::from_str(text)
        .map(|json| Value::from_json(&json))
        .unwrap_or_else(|_| Value::Text(text.to_string()))
}

fn print_rows(rows: &[ResultRow], out: &mut dyn Write) -> anyhow::Result<()> {
    if rows.is_empty() {
        writeln!(out, "No rows found")?;
        return Ok(());
    }
    writeln!(out, "Found {} row(s):", rows.len())?;
    for row in rows {
        writeln!(out, "  {}", row.to_json())?;
    }
    Ok(())
}
