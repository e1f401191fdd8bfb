use crate::config::{Config, KEYS};
use crate::error::{MemoryError, Result};
use std::path::Path;

/// Run the config command
pub fn run_config(data_dir: &Path, key: Option<&str>, value: Option<&str>) -> Result<()> {
    let mut config = Config::load(data_dir)?;

    match (key, value) {
        (None, None) => {
            println!("Current configuration ({}):\n", data_dir.display());
            for k in KEYS {
                if let Some(v) = config.get(k) {
                    println!("  {:24} {}", k, v);
                }
            }
        }
        (Some(k), None) => {
            let v = config
                .get(k)
                .ok_or_else(|| MemoryError::Config(format!("unknown key '{}' (known: {})", k, KEYS.join(", "))))?;
            println!("{}: {}", k, v);
        }
        (Some(k), Some(v)) => {
            config.set(k, v)?;
            config.save(data_dir)?;
            println!("Set {} = {}", k, v);
            if k.starts_with("embedding.") {
                println!("\nRun 'memorypilot reembed' to embed existing memories with the new settings.");
            }
        }
        (None, Some(_)) => {
            return Err(MemoryError::Config("key required when setting a value".to_string()));
        }
    }

    Ok(())
}
