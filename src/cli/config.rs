use crate::config::generate::generate_starter_config;
use crate::config::{load_config, user_config_path};
use console::style;
use std::fs;
use std::path::PathBuf;

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_content = generate_starter_config();

    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    // Try ~/.config/hawkeye/config.yml first, then /etc/hawkeye/config.yml
    let config_path = match user_config_path() {
        Some(user_config) => match user_config.parent().map(fs::create_dir_all) {
            Some(Err(_)) => {
                eprintln!("Warning: Could not create directory for {}", user_config.display());
                eprintln!("Falling back to /etc/hawkeye/config.yml");
                PathBuf::from("/etc/hawkeye/config.yml")
            }
            _ => user_config,
        },
        None => PathBuf::from("/etc/hawkeye/config.yml"),
    };

    if config_path.exists() {
        return Err(format!(
            "config file already exists at {}; remove it first or use --stdout",
            config_path.display()
        )
        .into());
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&config_path, config_content)?;

    println!("Config file written to {}", style(config_path.display()).green());
    Ok(())
}

pub fn validate(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path.ok_or("No config file found. Use --config to specify a path.")?;

    println!("Validating config file: {}", path.display());
    let config = load_config(&path)?;

    let mut ids: Vec<&String> = config.sources.keys().collect();
    ids.sort();
    println!("{}", style("✓ Config is valid").green());
    println!("  sources: {}", ids.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", "));
    println!(
        "  context lines: {}, window: {:?}, scope: {:?}",
        config.context.lines,
        config.batching.window,
        config.batching.scope
    );
    Ok(())
}
