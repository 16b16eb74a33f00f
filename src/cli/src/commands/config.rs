//! Configuration management commands.
//!
//! Stores CLI configuration in `~/.portguard/config.toml`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::{Deserialize, Serialize};

use crate::output::{self, OutputFormat};

const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 300;

/// Keys accepted by `config set` / `config get`.
const KEYS: &[&str] = &["api-url", "poll-interval-ms", "wait-timeout-secs"];

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Set a configuration value
    Set {
        /// One of: api-url, poll-interval-ms, wait-timeout-secs
        key: String,
        /// Value to set
        value: String,
    },

    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// Show all configuration
    Show,

    /// Reset configuration to defaults
    Reset {
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

/// Persistent CLI settings stored on disk.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CliSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_timeout_secs: Option<u64>,
}

impl CliSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS).max(50))
    }

    pub fn wait_timeout(&self) -> u64 {
        self.wait_timeout_secs.unwrap_or(DEFAULT_WAIT_TIMEOUT_SECS)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "api-url" => {
                if !value.starts_with("http://") && !value.starts_with("https://") {
                    anyhow::bail!("api-url must start with http:// or https://");
                }
                self.api_url = Some(value.trim_end_matches('/').to_string());
            }
            "poll-interval-ms" => {
                self.poll_interval_ms = Some(value.parse().context("poll-interval-ms must be an integer")?)
            }
            "wait-timeout-secs" => {
                self.wait_timeout_secs = Some(value.parse().context("wait-timeout-secs must be an integer")?)
            }
            other => anyhow::bail!("Unknown key '{}'; expected one of {}", other, KEYS.join(", ")),
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(match key {
            "api-url" => self.api_url.clone(),
            "poll-interval-ms" => self.poll_interval_ms.map(|v| v.to_string()),
            "wait-timeout-secs" => self.wait_timeout_secs.map(|v| v.to_string()),
            other => anyhow::bail!("Unknown key '{}'; expected one of {}", other, KEYS.join(", ")),
        })
    }
}

/// Return the path to the configuration file (`~/.portguard/config.toml`).
fn config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".portguard").join("config.toml"))
}

fn load_from(path: &std::path::Path) -> Result<CliSettings> {
    if !path.exists() {
        return Ok(CliSettings::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn save_to(path: &std::path::Path, settings: &CliSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(settings).context("Failed to serialize config")?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

/// Settings from disk; defaults when the file is missing or unreadable.
pub fn load_settings() -> CliSettings {
    config_path()
        .and_then(|path| load_from(&path))
        .unwrap_or_default()
}

pub async fn execute(cmd: ConfigCommands, format: OutputFormat) -> Result<()> {
    let path = config_path()?;

    match cmd {
        ConfigCommands::Set { key, value } => {
            let mut settings = load_from(&path)?;
            settings.set(&key, &value)?;
            save_to(&path, &settings)?;

            match format {
                OutputFormat::Table => output::print_success(&format!("{} = {}", key, value)),
                _ => output::print_item(&serde_json::json!({ "key": key, "value": value }), format)?,
            }
        }

        ConfigCommands::Get { key } => {
            let settings = load_from(&path)?;
            match settings.get(&key)? {
                Some(value) => match format {
                    OutputFormat::Table => println!("{}", value),
                    _ => output::print_item(&serde_json::json!({ "key": key, "value": value }), format)?,
                },
                None => output::print_info(&format!("'{}' is not set", key)),
            }
        }

        ConfigCommands::Show => {
            let settings = load_from(&path)?;
            match format {
                OutputFormat::Table => {
                    output::print_header("Configuration");
                    output::print_detail("File", &path.display().to_string());
                    for key in KEYS {
                        let value = settings.get(key)?.unwrap_or_else(|| "(default)".to_string());
                        output::print_detail(key, &value);
                    }
                }
                _ => output::print_item(&settings, format)?,
            }
        }

        ConfigCommands::Reset { force } => {
            if !force {
                output::print_info("This will reset all CLI configuration. Use --force to confirm.");
                return Ok(());
            }
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
            output::print_success("Configuration reset to defaults");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut settings = CliSettings::default();
        settings.set("api-url", "http://127.0.0.1:7070/").unwrap();
        settings.set("poll-interval-ms", "250").unwrap();
        assert_eq!(settings.get("api-url").unwrap().as_deref(), Some("http://127.0.0.1:7070"));
        assert_eq!(settings.poll_interval(), Duration::from_millis(250));
        assert_eq!(settings.wait_timeout(), DEFAULT_WAIT_TIMEOUT_SECS);
    }

    #[test]
    fn test_rejects_unknown_key_and_bad_values() {
        let mut settings = CliSettings::default();
        assert!(settings.set("colour", "on").is_err());
        assert!(settings.set("api-url", "localhost:7070").is_err());
        assert!(settings.set("wait-timeout-secs", "soon").is_err());
        assert!(settings.get("colour").is_err());
    }

    #[test]
    fn test_persists_as_toml() {
        let dir = std::env::temp_dir().join(format!("portguard-cli-{}", std::process::id()));
        let path = dir.join("config.toml");
        let mut settings = CliSettings::default();
        settings.set("wait-timeout-secs", "60").unwrap();

        save_to(&path, &settings).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("wait-timeout-secs = 60"));
        assert_eq!(load_from(&path).unwrap(), settings);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
