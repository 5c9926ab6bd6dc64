//! `taskforge tools` — List the built-in tools.

use taskforge_config::AppConfig;
use taskforge_tools::{default_registry, ToolPolicy};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().unwrap_or_default();
    let policy = ToolPolicy {
        allowed_roots: config.tools.allowed_roots.clone(),
        forbidden_paths: config.tools.forbidden_paths.clone(),
    };
    let registry = default_registry(&policy)?;

    let mut definitions = registry.definitions();
    definitions.sort_by(|a, b| a.name.cmp(&b.name));

    println!("Built-in tools ({}):\n", definitions.len());
    for def in definitions {
        println!("  {}", def.name);
        println!("      {}", def.description);
    }
    println!();

    Ok(())
}
