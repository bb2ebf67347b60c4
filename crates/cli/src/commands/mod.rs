//! CLI subcommands and the wiring they share.

pub mod chat;
pub mod memory;
pub mod onboard;
pub mod tools;

use std::sync::Arc;

use maistro_config::{AppConfig, MemoryConfig};
use maistro_core::memory::MemoryStore;
use maistro_memory::InMemoryStore;

/// `--user` / `--category` overrides for the memory scope.
#[derive(Debug, Default, clap::Args)]
pub struct Scope {
    /// Whose memories to use (defaults to `agent.user_id`)
    #[arg(long)]
    pub user: Option<String>,

    /// To-do category (defaults to `agent.todo_category`)
    #[arg(long)]
    pub category: Option<String>,
}

impl Scope {
    /// Apply the overrides to a loaded config.
    pub fn apply(self, config: &mut AppConfig) {
        if let Some(user) = self.user {
            config.agent.user_id = user;
        }
        if let Some(category) = self.category {
            config.agent.todo_category = category;
        }
    }
}

pub(crate) fn load_config(scope: Scope) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    scope.apply(&mut config);
    Ok(config)
}

/// Open the configured memory backend.
pub(crate) async fn open_store(
    memory: &MemoryConfig,
) -> Result<Arc<dyn MemoryStore>, Box<dyn std::error::Error>> {
    match memory.backend.as_str() {
        "in_memory" => Ok(Arc::new(InMemoryStore::new())),
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let path = memory.resolved_path();
            let store = maistro_memory::SqliteStore::new(&path.to_string_lossy()).await?;
            Ok(Arc::new(store))
        }
        other => Err(format!("Memory backend '{other}' is not available in this build").into()),
    }
}
