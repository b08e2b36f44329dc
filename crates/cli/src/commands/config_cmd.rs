//! `colloquy config`: configuration management commands.

use colloquy_config::{AppConfig, SessionBackend};

/// Print the effective configuration as TOML, with the API key masked.
pub fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&redacted(config))?;
    println!("{toml_str}");
    Ok(())
}

pub fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ok  Config parsed and validated");

            let mut warnings = Vec::new();
            if config.api_key.is_none() {
                warnings.push("No API key set (set COLLOQUY_API_KEY or OPENAI_API_KEY)");
            }
            if config.session.backend == SessionBackend::File && config.session.ttl().is_some() {
                warnings.push("session.ttl_secs only applies to the memory backend");
            }
            for w in &warnings {
                println!("   warn  {w}");
            }

            println!();
            println!("   Provider:  {}", config.provider);
            println!("   Endpoint:  {}", config.base_url);
            println!("   Model:     {}", config.model);
            println!("   Agent:     {}", config.agent.name);
            println!("   Sessions:  {:?}", config.session.backend);
        }
        Err(e) => {
            println!("   error  {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub fn path() {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
}

pub fn init() {
    print!("{}", AppConfig::default_toml());
}

fn redacted(mut config: AppConfig) -> AppConfig {
    if config.api_key.is_some() {
        config.api_key = Some("[REDACTED]".into());
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redaction_masks_key() {
        let config = AppConfig {
            api_key: Some("sk-live".into()),
            ..AppConfig::default()
        };
        let shown = toml::to_string_pretty(&redacted(config)).unwrap();
        assert!(!shown.contains("sk-live"));
        assert!(shown.contains("[REDACTED]"));
    }
}
