use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application settings (from config file)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Relay server settings
    #[serde(default)]
    pub server: ServerSettings,

    /// Terminal client settings
    #[serde(default)]
    pub client: ClientSettings,
}

/// Relay server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Address to listen on
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Pending frames a client mailbox holds before broadcasters block
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// How long a broadcast waits on one full mailbox (milliseconds)
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_ms: u64,

    /// Longest accepted line on the wire, in bytes
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,

    /// Shortest accepted client name
    #[serde(default = "default_min_name_len")]
    pub min_name_len: usize,
}

fn default_bind() -> String {
    "127.0.0.1:12021".to_string()
}

fn default_mailbox_capacity() -> usize {
    100
}

fn default_delivery_timeout() -> u64 {
    500
}

fn default_max_frame_len() -> usize {
    64 * 1024
}

fn default_min_name_len() -> usize {
    3
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            mailbox_capacity: default_mailbox_capacity(),
            delivery_timeout_ms: default_delivery_timeout(),
            max_frame_len: default_max_frame_len(),
            min_name_len: default_min_name_len(),
        }
    }
}

impl ServerSettings {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

/// Terminal client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Relay address to connect to
    #[serde(default = "default_server")]
    pub server: String,

    /// Chat frames buffered locally before the connection stops reading
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,

    /// How long a call waits for its reply (milliseconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_server() -> String {
    "127.0.0.1:12021".to_string()
}

fn default_inbox_capacity() -> usize {
    100
}

fn default_request_timeout() -> u64 {
    5000
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server: default_server(),
            inbox_capacity: default_inbox_capacity(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Settings {
    /// Load settings from config file or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        // Try custom path first
        if let Some(p) = path {
            if p.exists() {
                return Self::read(p);
            }
            anyhow::bail!("Config file not found: {:?}", p);
        }

        // Try default config locations
        let default_paths = [
            dirs::config_dir().map(|p| p.join("relaychat/config.toml")),
            dirs::home_dir().map(|p| p.join(".config/relaychat/config.toml")),
            dirs::home_dir().map(|p| p.join(".relaychat.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                return Self::read(path);
            }
        }

        // Return defaults if no config file found
        Ok(Self::default())
    }

    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Validate and normalize settings values
    ///
    /// Zero capacities would make every delivery fail, so they are raised to 1.
    pub fn validate(&mut self) {
        const MIN_CAPACITY: usize = 1;
        const MIN_FRAME_LEN: usize = 256;

        if self.server.mailbox_capacity < MIN_CAPACITY {
            self.server.mailbox_capacity = MIN_CAPACITY;
        }
        if self.server.max_frame_len < MIN_FRAME_LEN {
            self.server.max_frame_len = MIN_FRAME_LEN;
        }
        if self.server.min_name_len < 1 {
            self.server.min_name_len = 1;
        }
        if self.client.inbox_capacity < MIN_CAPACITY {
            self.client.inbox_capacity = MIN_CAPACITY;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.bind, "127.0.0.1:12021");
        assert_eq!(settings.server.mailbox_capacity, 100);
        assert_eq!(settings.server.delivery_timeout(), Duration::from_millis(500));
        assert_eq!(settings.server.min_name_len, 3);
        assert_eq!(settings.client.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            [server]
            bind = "0.0.0.0:9000"
            mailbox_capacity = 8

            [client]
            server = "chat.example:9000"
        "#;

        let settings: Settings = toml::from_str(toml).expect("Should parse TOML");
        assert_eq!(settings.server.bind, "0.0.0.0:9000");
        assert_eq!(settings.server.mailbox_capacity, 8);
        assert_eq!(settings.server.delivery_timeout_ms, 500);
        assert_eq!(settings.client.server, "chat.example:9000");
        assert_eq!(settings.client.inbox_capacity, 100);
    }

    #[test]
    fn test_load_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\ndelivery_timeout_ms = 50").unwrap();

        let path = file.path().to_path_buf();
        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.server.delivery_timeout_ms, 50);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        assert!(Settings::load(Some(&path)).is_err());
    }

    #[test]
    fn test_validate_raises_zero_capacities() {
        let mut settings = Settings::default();
        settings.server.mailbox_capacity = 0;
        settings.server.max_frame_len = 0;
        settings.client.inbox_capacity = 0;
        settings.validate();
        assert_eq!(settings.server.mailbox_capacity, 1);
        assert_eq!(settings.server.max_frame_len, 256);
        assert_eq!(settings.client.inbox_capacity, 1);
    }
}
