//! `maistro memory`: Print what the assistant remembers.

use maistro_core::memory::{Item, Namespace};
use maistro_core::record::INSTRUCTIONS_KEY;
use serde_json::Value;

use super::{Scope, load_config, open_store};

pub async fn todos(scope: Scope) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(scope)?;
    let store = open_store(&config.memory).await?;
    let namespace = Namespace::todo(&config.agent.todo_category, &config.agent.user_id);

    let items = store.search(&namespace).await?;
    println!("To-do list ({namespace})");
    println!();
    if items.is_empty() {
        println!("  (empty)");
    }
    for item in &items {
        println!("{}", render_todo(item));
    }
    Ok(())
}

pub async fn instructions(scope: Scope) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(scope)?;
    let store = open_store(&config.memory).await?;
    let namespace = Namespace::instructions(&config.agent.todo_category, &config.agent.user_id);

    let item = store.get(&namespace, INSTRUCTIONS_KEY).await?;
    println!("Instructions ({namespace})");
    println!();
    match item {
        Some(item) => println!("{}", render_instructions(&item.value)),
        None => println!("  (none)"),
    }
    Ok(())
}

/// One to-do as `  [status] task`, followed by its details.
fn render_todo(item: &Item) -> String {
    let value = &item.value;
    let task = value.get("task").and_then(Value::as_str).unwrap_or("(untitled)");
    let status = value.get("status").and_then(Value::as_str).unwrap_or("not started");

    let mut out = format!("  [{status}] {task}  ({})", item.key);
    if let Some(deadline) = value.get("deadline").and_then(Value::as_str) {
        out.push_str(&format!("\n      deadline: {deadline}"));
    }
    if let Some(minutes) = value.get("time_to_complete").and_then(Value::as_u64) {
        out.push_str(&format!("\n      estimate: {minutes} min"));
    }
    if let Some(solutions) = value.get("solutions").and_then(Value::as_array) {
        for solution in solutions.iter().filter_map(Value::as_str) {
            out.push_str(&format!("\n      - {solution}"));
        }
    }
    out
}

fn render_instructions(value: &Value) -> String {
    match value.get("memory").and_then(Value::as_str) {
        Some(text) => text.lines().map(|l| format!("  {l}")).collect::<Vec<_>>().join("\n"),
        None => format!("  {value}"),
    }
}
