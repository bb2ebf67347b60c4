//! `maistro onboard`: First-time setup.

use std::path::Path;

use maistro_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();

    println!("maistro: First-Time Setup");
    println!("==========================\n");

    if write_default_config(&config_dir)? {
        let config_path = config_dir.join("config.toml");
        println!("  Created config.toml at: {}", config_path.display());
        println!("\n  Next steps:");
        println!("   1. Edit {} and add your API key", config_path.display());
        println!("   2. Optionally add tool servers under [mcp_servers.<name>]");
        println!("   3. Run: maistro chat\n");
    } else {
        println!("  Config already exists at: {}", config_dir.join("config.toml").display());
        println!("  Edit it manually or delete and re-run onboard.\n");
    }

    Ok(())
}

/// Write `config.toml` with defaults into `dir`, creating `dir` as needed.
/// Returns `false` when a config is already there.
fn write_default_config(dir: &Path) -> std::io::Result<bool> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join("config.toml");
    if path.exists() {
        return Ok(false);
    }
    std::fs::write(&path, AppConfig::default_toml())?;
    Ok(true)
}
