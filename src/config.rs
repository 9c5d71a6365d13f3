//! Mibuntu configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::UserIdentity;
use crate::session::FREE_LIMIT;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Generative-AI provider configuration
    pub llm: LlmConfig,

    /// Planning session limits
    pub session: SessionConfig,

    /// Where local collaborators keep their files
    pub storage: StorageConfig,

    /// Local identity used by the terminal shell
    pub user: UserConfig,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before use
    ///
    /// A missing API key only disables AI turns, so callers usually warn
    /// rather than abort on this error.
    pub fn validate(&self) -> Result<()> {
        if self.llm.get_api_key().is_none() {
            return Err(eyre::eyre!(
                "LLM API key not found. Set the {} environment variable.",
                self.llm.api_key_env
            ));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .mibuntu.yml
        let local_config = PathBuf::from(".mibuntu.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/mibuntu/mibuntu.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("mibuntu").join("mibuntu.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Generative-AI provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name (currently only "gemini" supported)
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Upper bound on tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: "gemini-2.0-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            max_tokens: 8192,
            timeout_ms: 120_000,
        }
    }
}

impl LlmConfig {
    /// Read the API key from the configured environment variable
    pub fn get_api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.trim().is_empty())
    }
}

/// Planning session limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// AI turns allowed on the free tier
    #[serde(rename = "free-limit")]
    pub free_limit: u32,

    /// Characters kept per uploaded file in the prompt
    #[serde(rename = "file-char-limit")]
    pub file_char_limit: usize,

    /// Characters of curriculum text kept across all modules
    #[serde(rename = "curriculum-char-limit")]
    pub curriculum_char_limit: usize,

    /// Characters of earlier conversation replayed into each prompt
    #[serde(rename = "history-char-limit")]
    pub history_char_limit: usize,

    /// How long applying draft changes stays in the reconciling state
    #[serde(rename = "apply-delay-ms")]
    pub apply_delay_ms: u64,

    /// Max tokens requested per turn
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            free_limit: FREE_LIMIT,
            file_char_limit: 20_000,
            curriculum_char_limit: 30_000,
            history_char_limit: 40_000,
            apply_delay_ms: 600,
            max_tokens: 8192,
        }
    }
}

impl SessionConfig {
    pub fn apply_delay(&self) -> Duration {
        Duration::from_millis(self.apply_delay_ms)
    }
}

/// Storage configuration for the filesystem collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root data directory
    #[serde(rename = "data-dir")]
    pub data_dir: PathBuf,

    /// Curriculum module texts, one file per module id
    #[serde(rename = "curriculum-dir")]
    pub curriculum_dir: Option<PathBuf>,

    /// Where generated artifacts are written
    #[serde(rename = "export-dir")]
    pub export_dir: Option<PathBuf>,

    /// Saved conversations
    #[serde(rename = "conversations-dir")]
    pub conversations_dir: Option<PathBuf>,

    /// Program and arguments that turn PDF bytes on stdin into text on stdout
    #[serde(rename = "pdf-command")]
    pub pdf_command: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // Use XDG data directory (~/.local/share/mibuntu on Linux)
        let data_dir = dirs::data_dir()
            .map(|d| d.join("mibuntu"))
            .unwrap_or_else(|| PathBuf::from(".mibuntu"));

        Self {
            data_dir,
            curriculum_dir: None,
            export_dir: None,
            conversations_dir: None,
            pdf_command: vec!["pdftotext".to_string(), "-".to_string(), "-".to_string()],
        }
    }
}

impl StorageConfig {
    pub fn curriculum_dir(&self) -> PathBuf {
        self.curriculum_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("curriculum"))
    }

    pub fn export_dir(&self) -> PathBuf {
        self.export_dir.clone().unwrap_or_else(|| self.data_dir.join("exports"))
    }

    pub fn conversations_dir(&self) -> PathBuf {
        self.conversations_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("conversations"))
    }

    pub fn profile_path(&self) -> PathBuf {
        self.data_dir.join("profile.json")
    }
}

/// Local identity for the terminal shell
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub id: String,

    #[serde(rename = "display-name")]
    pub display_name: String,

    pub email: String,
}

impl Default for UserConfig {
    fn default() -> Self {
        let name = std::env::var("USER").unwrap_or_else(|_| "local".to_string());
        Self {
            id: name.clone(),
            display_name: name,
            email: String::new(),
        }
    }
}

impl UserConfig {
    pub fn identity(&self) -> UserIdentity {
        UserIdentity::new(&self.id, &self.display_name, &self.email)
    }
}
