use crate::config::generate::generate_starter_config;
use crate::config::{load_config, user_config_path, SYSTEM_CONFIG_PATH};
use std::fs;
use std::path::{Path, PathBuf};

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let content = generate_starter_config();
    if stdout {
        print!("{}", content);
        return Ok(());
    }

    // Prefer the user config dir, fall back to the system path.
    let config_path = match user_config_path() {
        Some(user_config) => {
            let created = user_config.parent().map(fs::create_dir_all);
            match created {
                Some(Err(e)) => {
                    eprintln!("Warning: could not create {}: {}", user_config.display(), e);
                    eprintln!("Falling back to {}", SYSTEM_CONFIG_PATH);
                    PathBuf::from(SYSTEM_CONFIG_PATH)
                }
                _ => user_config,
            }
        }
        None => PathBuf::from(SYSTEM_CONFIG_PATH),
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
    fs::write(&config_path, content)?;

    println!("Config file written to {}", config_path.display());
    println!("Set agent.api_key before starting the agent.");
    Ok(())
}

/// Loads and validates `path`, printing a short summary.
pub fn validate(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(path)?;
    println!("{} is valid", path.display());
    println!("  agent:   {}", config.agent_id());
    println!("  listen:  {}", config.web.listen);
    println!("  storage: {}", config.storage.path.display());
    println!("  state:   {}", config.state.dir.display());
    println!("  watch:   {:?}", config.monitor.watch);
    Ok(())
}
