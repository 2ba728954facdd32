//! `conclave init` — Write a default config file.

use conclave_config::AppConfig;
use std::path::Path;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(super::default_config_path);

    println!("🏛️  Conclave — Setup");
    println!("====================\n");

    if let Some(dir) = config_path.parent()
        && !dir.as_os_str().is_empty()
        && !dir.exists()
    {
        std::fs::create_dir_all(dir)?;
        println!("✅ Created config directory: {}", dir.display());
    }

    if config_path.exists() {
        println!("⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run init.\n");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("✅ Created config.toml at: {}", config_path.display());
    println!("\n📝 Next steps:");
    println!("   1. Add provider keys under [providers.<name>] or export OPENAI_API_KEY etc.");
    println!("   2. Add bearer tokens under [auth.static_tokens] or set auth.verify_url");
    println!("   3. Run: conclave migrate && conclave serve\n");

    Ok(())
}
