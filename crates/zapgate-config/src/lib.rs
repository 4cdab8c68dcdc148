//! Zapgate Configuration
//!
//! TOML configuration loading with validation

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,
    pub openshock: OpenShockConfig,
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoreConfig {
    pub data_dir: Option<String>,
    pub log_level: Option<String>,
}

impl CoreConfig {
    /// Resolve the runtime data directory, expanding a leading `~`.
    /// Defaults to `~/.zapgate`.
    pub fn data_dir(&self) -> anyhow::Result<PathBuf> {
        if let Some(data_dir) = &self.data_dir {
            if data_dir == "~" || data_dir.starts_with("~/") {
                let home =
                    dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Home directory not found"))?;
                if data_dir == "~" {
                    Ok(home)
                } else {
                    Ok(home.join(data_dir.trim_start_matches("~/")))
                }
            } else {
                Ok(PathBuf::from(data_dir))
            }
        } else {
            let home =
                dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Home directory not found"))?;
            Ok(home.join(".zapgate"))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenShockConfig {
    /// API token created in the OpenShock web UI.
    pub api_token: String,
    /// Shocker id targeted by every command.
    pub device_id: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Name shown in the OpenShock log for actions sent by this bot.
    #[serde(default = "default_custom_name")]
    pub custom_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

/// How the sender id list is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Everyone may issue commands except the listed ids.
    #[default]
    Blacklist,
    /// Only the listed ids may issue commands.
    Whitelist,
}

/// Sender ids, either as a TOML integer array or as a free-form string
/// with any separators ("123, -456; 789").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdList {
    Ids(Vec<i64>),
    Raw(String),
}

impl Default for IdList {
    fn default() -> Self {
        IdList::Ids(Vec::new())
    }
}

impl IdList {
    /// Ids in configured order. The free-form variant keeps every signed
    /// integer found in the string.
    pub fn resolve(&self) -> Vec<i64> {
        match self {
            IdList::Ids(ids) => ids.clone(),
            IdList::Raw(raw) => {
                let re = Regex::new(r"-?\d+").unwrap();
                re.find_iter(raw)
                    .filter_map(|m| m.as_str().parse().ok())
                    .collect()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AccessConfig {
    #[serde(default)]
    pub mode: AccessMode,
    #[serde(default)]
    pub ids: IdList,
    /// Chat that receives the startup notice. Falls back to the first
    /// whitelisted id when unset in whitelist mode.
    #[serde(default)]
    pub notify_chat_id: Option<i64>,
}

/// Bounds and pacing for one action kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLimits {
    pub strength_min: u8,
    pub strength_max: u8,
    pub duration_min_ms: u32,
    pub duration_max_ms: u32,
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_shock_limits")]
    pub shock: ActionLimits,
    #[serde(default = "default_vibrate_limits")]
    pub vibrate: ActionLimits,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            shock: default_shock_limits(),
            vibrate: default_vibrate_limits(),
        }
    }
}

fn default_api_base_url() -> String {
    "https://api.shocklink.net".to_string()
}

fn default_custom_name() -> String {
    "zapgate".to_string()
}

fn default_poll_timeout_secs() -> u64 {
    60
}

fn default_shock_limits() -> ActionLimits {
    ActionLimits {
        strength_min: 1,
        strength_max: 1,
        duration_min_ms: 300,
        duration_max_ms: 300,
        cooldown_secs: 60,
    }
}

fn default_vibrate_limits() -> ActionLimits {
    ActionLimits {
        strength_min: 25,
        strength_max: 100,
        duration_min_ms: 300,
        duration_max_ms: 1000,
        cooldown_secs: 10,
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("zapgate").join("config.toml"))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.openshock.api_token.trim().is_empty() {
            anyhow::bail!("openshock.api_token cannot be empty");
        }
        if self.openshock.device_id.trim().is_empty() {
            anyhow::bail!("openshock.device_id cannot be empty");
        }
        if self.openshock.api_base_url.trim().is_empty() {
            anyhow::bail!("openshock.api_base_url cannot be empty");
        }
        if self.openshock.custom_name.trim().is_empty() {
            anyhow::bail!("openshock.custom_name cannot be empty");
        }

        if self.telegram.bot_token.trim().is_empty() {
            anyhow::bail!("telegram.bot_token cannot be empty");
        }
        if self.telegram.poll_timeout_secs == 0 || self.telegram.poll_timeout_secs > 300 {
            anyhow::bail!("telegram.poll_timeout_secs must be in range 1..=300");
        }

        if self.access.mode == AccessMode::Whitelist && self.access.ids.resolve().is_empty() {
            anyhow::bail!("access.ids cannot be empty in whitelist mode");
        }

        validate_limits("limits.shock", &self.limits.shock)?;
        validate_limits("limits.vibrate", &self.limits.vibrate)?;

        Ok(())
    }
}

fn validate_limits(section: &str, limits: &ActionLimits) -> anyhow::Result<()> {
    if limits.strength_max > 100 {
        anyhow::bail!("{}.strength_max must be <= 100", section);
    }
    if limits.strength_min > limits.strength_max {
        anyhow::bail!("{}.strength_min must be <= strength_max", section);
    }
    if limits.duration_min_ms > limits.duration_max_ms {
        anyhow::bail!("{}.duration_min_ms must be <= duration_max_ms", section);
    }
    Ok(())
}
