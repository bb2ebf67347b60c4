//! `maistro chat`: Interactive or single-message chat mode.

use std::io::Write;
use std::sync::Arc;

use maistro_agent::TurnLoop;
use maistro_config::AppConfig;
use maistro_core::event::EventBus;
use maistro_core::message::{Conversation, Message};
use maistro_core::tool::ToolRegistry;
use maistro_tools::McpToolset;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use super::{Scope, load_config, open_store};

pub async fn run(message: Option<String>, scope: Scope) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(scope)?;

    // Fail early with setup help when no key is configured
    if !has_credentials(&config) {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    MAISTRO_API_KEY     = 'sk-...'");
        eprintln!("    OPENAI_API_KEY      = 'sk-...'");
        eprintln!("    OPENROUTER_API_KEY  = 'sk-or-v1-...'");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let router = maistro_providers::build_from_config(&config);
    let provider = router.default().ok_or("No default provider configured")?;

    let store = open_store(&config.memory).await?;

    let toolset = McpToolset::connect(&config.mcp_servers).await;
    let mut registry = ToolRegistry::new();
    toolset.register_into(&mut registry);
    let tool_names = registry.names().join(", ");

    let event_bus = Arc::new(EventBus::default());
    spawn_event_logger(&event_bus);

    let agent = TurnLoop::new(
        provider,
        &config.default_model,
        store,
        Arc::new(registry),
        event_bus,
    )
    .configure(&config.agent)
    .with_temperature(config.default_temperature)
    .with_max_tokens(config.default_max_tokens);

    let result = match message {
        Some(msg) => single(&agent, &msg).await,
        None => {
            println!();
            println!("  maistro: Interactive Mode");
            println!();
            println!("  Provider:  {}", config.default_provider);
            println!("  Model:     {}", config.default_model);
            println!("  User:      {} ({})", config.agent.user_id, config.agent.todo_category);
            println!(
                "  Tools:     {}",
                if tool_names.is_empty() { "(none)" } else { tool_names.as_str() }
            );
            println!();
            println!("  Type your message and press Enter.");
            println!("  Type 'exit' or Ctrl+C to quit.");
            println!();
            interactive(&agent).await
        }
    };

    toolset.shutdown().await;
    result
}

fn has_credentials(config: &AppConfig) -> bool {
    config.has_api_key()
        || config.default_provider == "ollama"
        || config
            .providers
            .get(&config.default_provider)
            .is_some_and(|p| p.api_key.is_some())
}

/// Log domain events at debug level; visible with `--verbose`.
fn spawn_event_logger(bus: &EventBus) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            debug!(event = ?event, "Domain event");
        }
    });
}

async fn single(agent: &TurnLoop, msg: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut conversation = Conversation::new();
    conversation.push(Message::user(msg));

    eprint!("  Thinking...");
    let outcome = agent.run(conversation).await;
    eprint!("\r              \r");
    println!("{}", outcome?.reply);
    Ok(())
}

async fn interactive(agent: &TurnLoop) -> Result<(), Box<dyn std::error::Error>> {
    let mut conversation = Conversation::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if is_exit(line) {
            break;
        }

        conversation.push(Message::user(line));
        eprint!("  ...");

        match agent.run(conversation.clone()).await {
            Ok(outcome) => {
                eprint!("\r     \r");
                println!();
                for reply_line in outcome.reply.lines() {
                    println!("  Assistant > {reply_line}");
                }
                println!();
                conversation = outcome.conversation;
            }
            Err(e) => {
                eprint!("\r     \r");
                eprintln!("  [Error] {e}");
                println!();
                // Forget the message that failed so the transcript stays well formed
                conversation.messages.pop();
            }
        }
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

fn is_exit(line: &str) -> bool {
    matches!(line.to_ascii_lowercase().as_str(), "exit" | "quit")
}

#[cfg(test)]
mod tests {
    use super::*;
    use maistro_config::ProviderConfig;

    #[test]
    fn exit_words() {
        assert!(is_exit("exit"));
        assert!(is_exit("QUIT"));
        assert!(!is_exit("exit the list"));
    }

    #[test]
    fn credentials_from_any_source() {
        let mut config = AppConfig::default();
        assert!(!has_credentials(&config));

        config.providers.insert(
            "openai".into(),
            ProviderConfig {
                api_key: Some("sk-test".into()),
                api_url: None,
                default_model: None,
            },
        );
        assert!(has_credentials(&config));

        let mut local = AppConfig::default();
        local.default_provider = "ollama".into();
        assert!(has_credentials(&local));
    }
}
