use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{GmailError, Result};
use crate::models::LabelVisibility;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub label: LabelConfig,
    #[serde(default)]
    pub reply: ReplyConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelConfig {
    #[serde(default = "default_label_name")]
    pub name: String,
    #[serde(default = "default_label_list_visibility")]
    pub label_list_visibility: String,
    #[serde(default = "default_message_list_visibility")]
    pub message_list_visibility: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            name: default_label_name(),
            label_list_visibility: default_label_list_visibility(),
            message_list_visibility: default_message_list_visibility(),
        }
    }
}

impl LabelConfig {
    pub fn visibility(&self) -> LabelVisibility {
        LabelVisibility {
            label_list_visibility: self.label_list_visibility.clone(),
            message_list_visibility: self.message_list_visibility.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyConfig {
    #[serde(default = "default_reply_body")]
    pub body: String,
    /// Value of the reply's From header; "me" lets Gmail fill in the account
    #[serde(default = "default_reply_from")]
    pub from: String,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            body: default_reply_body(),
            from: default_reply_from(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,
    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,
    /// How long a stop request waits for an in-flight run before aborting it
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: default_min_interval_secs(),
            max_interval_secs: default_max_interval_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl ScheduleConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_label_name() -> String {
    "Vacation".to_string()
}

fn default_label_list_visibility() -> String {
    "labelShow".to_string()
}

fn default_message_list_visibility() -> String {
    "show".to_string()
}

fn default_reply_body() -> String {
    "Hi,\n\nI'm currently on vacation and will get back to you soon. \
     Sorry for the inconvenience.\n\nThanks & Regards"
        .to_string()
}

fn default_reply_from() -> String {
    "me".to_string()
}

fn default_min_interval_secs() -> u64 {
    45
}

fn default_max_interval_secs() -> u64 {
    120
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_max_retries() -> u32 {
    3
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config = Self::from_toml(&content)?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| GmailError::ConfigError(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    GmailError::ConfigError(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| GmailError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.label.name.trim().is_empty() {
            return Err(GmailError::ConfigError(
                "label.name cannot be empty".to_string(),
            ));
        }

        match self.label.label_list_visibility.as_str() {
            "labelShow" | "labelShowIfUnread" | "labelHide" => {}
            other => {
                return Err(GmailError::ConfigError(format!(
                    "Invalid label.label_list_visibility: '{}'. Must be 'labelShow', 'labelShowIfUnread', or 'labelHide'",
                    other
                )));
            }
        }

        match self.label.message_list_visibility.as_str() {
            "show" | "hide" => {}
            other => {
                return Err(GmailError::ConfigError(format!(
                    "Invalid label.message_list_visibility: '{}'. Must be 'show' or 'hide'",
                    other
                )));
            }
        }

        if self.reply.body.trim().is_empty() {
            return Err(GmailError::ConfigError(
                "reply.body cannot be empty".to_string(),
            ));
        }
        if self.reply.from.trim().is_empty() {
            return Err(GmailError::ConfigError(
                "reply.from cannot be empty".to_string(),
            ));
        }

        if self.schedule.min_interval_secs == 0 {
            return Err(GmailError::ConfigError(
                "schedule.min_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.schedule.min_interval_secs > self.schedule.max_interval_secs {
            return Err(GmailError::ConfigError(format!(
                "schedule.min_interval_secs ({}) cannot exceed schedule.max_interval_secs ({})",
                self.schedule.min_interval_secs, self.schedule.max_interval_secs
            )));
        }
        if self.schedule.shutdown_grace_secs == 0 {
            return Err(GmailError::ConfigError(
                "schedule.shutdown_grace_secs must be greater than 0".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(GmailError::ConfigError(
                "server.port must be greater than 0".to_string(),
            ));
        }

        if self.client.request_timeout_secs == 0 {
            return Err(GmailError::ConfigError(
                "client.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.label.name, "Vacation");
        assert_eq!(config.label.label_list_visibility, "labelShow");
        assert_eq!(config.label.message_list_visibility, "show");
        assert_eq!(config.reply.from, "me");
        assert!(config.reply.body.contains("vacation"));
        assert_eq!(config.schedule.min_interval_secs, 45);
        assert_eq!(config.schedule.max_interval_secs, 120);
        assert_eq!(config.schedule.shutdown_grace(), Duration::from_secs(30));
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.client.max_retries, 3);
    }

    #[test]
    fn test_config_validation_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_label() {
        let mut config = Config::default();
        config.label.name = "   ".to_string();
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("label.name"));
    }

    #[test]
    fn test_config_validation_invalid_visibility() {
        let mut config = Config::default();
        config.label.message_list_visibility = "messageListshow".to_string();
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("message_list_visibility"));

        let mut config = Config::default();
        config.label.label_list_visibility = "labelListShow".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_interval_bounds() {
        let mut config = Config::default();
        config.schedule.min_interval_secs = 0;
        assert!(config.validate().unwrap_err().to_string().contains("at least 1"));

        let mut config = Config::default();
        config.schedule.min_interval_secs = 200;
        config.schedule.max_interval_secs = 100;
        assert!(config.validate().unwrap_err().to_string().contains("cannot exceed"));

        let mut config = Config::default();
        config.schedule.min_interval_secs = 60;
        config.schedule.max_interval_secs = 60;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_body() {
        let mut config = Config::default();
        config.reply.body = String::new();
        assert!(config.validate().unwrap_err().to_string().contains("reply.body"));
    }

    #[test]
    fn test_config_validation_port_zero() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_toml(
            r#"
            [label]
            name = "Away"

            [schedule]
            min_interval_secs = 10
            max_interval_secs = 20
            "#,
        )
        .unwrap();

        assert_eq!(config.label.name, "Away");
        assert_eq!(config.label.message_list_visibility, "show");
        assert_eq!(config.schedule.min_interval_secs, 10);
        assert_eq!(config.schedule.shutdown_grace_secs, 30);
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let err = Config::from_toml("[schedule]\nmin_interval_secs = \"soon\"").unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let temp_file = NamedTempFile::new().unwrap();
        let mut config = Config::default();
        config.label.name = "OutOfOffice".to_string();
        config.server.port = 8081;

        config.save(temp_file.path()).await.unwrap();
        let loaded = Config::load(temp_file.path()).await.unwrap();

        assert_eq!(loaded.label.name, "OutOfOffice");
        assert_eq!(loaded.server.port, 8081);
    }

    #[tokio::test]
    async fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("missing.toml")).await.unwrap();
        assert_eq!(config.label.name, "Vacation");
    }
}
