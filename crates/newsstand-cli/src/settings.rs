// Settings module - local CLI configuration stored as JSON in ~/.newsstand/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

/// Persistent CLI settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    /// Account used when a command does not name one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<Uuid>,
    /// Administrator id sent with withdrawal reviews.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_id: Option<Uuid>,
}

/// Returns ~/.newsstand/config.json.
pub fn default_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(Path::new(&home).join(".newsstand").join("config.json"))
}

/// Loads settings, returning defaults when the file does not exist yet.
pub fn load(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read '{}'", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid settings file '{}'", path.display()))
}

pub fn save(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create '{}'", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write '{}'", path.display()))
}

impl Settings {
    /// Server URL: command-line override, then saved value, then the default.
    pub fn server_url(&self, cli_override: Option<&str>) -> String {
        cli_override
            .or(self.server_url.as_deref())
            .unwrap_or(DEFAULT_SERVER_URL)
            .trim_end_matches('/')
            .to_string()
    }

    pub fn account(&self, explicit: Option<Uuid>) -> Result<Uuid> {
        explicit.or(self.account_id).context(
            "No account given. Pass --account or run `newsstand config set --account <ID>`",
        )
    }

    pub fn admin(&self, explicit: Option<Uuid>) -> Result<Uuid> {
        explicit
            .or(self.admin_id)
            .context("No admin id given. Pass --admin or run `newsstand config set --admin <ID>`")
    }
}
