//! `maistro tools`: List the tools offered by configured tool servers.

use maistro_tools::McpToolset;

use super::{Scope, load_config};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(Scope::default())?;

    println!("Tool servers");
    println!("============");

    if config.mcp_servers.is_empty() {
        println!("  No tool servers configured. Add one under [mcp_servers.<name>] in config.toml.");
        return Ok(());
    }

    let toolset = McpToolset::connect(&config.mcp_servers).await;
    let connected = toolset.server_names();

    for name in config.mcp_servers.keys() {
        if !connected.contains(&name.as_str()) {
            println!("\n  {name}: failed to start (run with --verbose for details)");
            continue;
        }

        println!("\n  {name}:");
        let mut any = false;
        for (_, info) in toolset.tools().filter(|(server, _)| *server == name.as_str()) {
            any = true;
            match &info.description {
                Some(description) => println!("    - {}: {}", info.name, first_line(description)),
                None => println!("    - {}", info.name),
            }
        }
        if !any {
            println!("    (no tools)");
        }
    }

    toolset.shutdown().await;
    Ok(())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}
