use clap::{Parser, Subcommand};
use std::path::PathBuf;

use relaychat_core::config::Settings;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Group chat relay and terminal client")]
pub struct Config {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the relay server
    Serve {
        /// Address to listen on (host:port)
        #[arg(short, long)]
        bind: Option<String>,

        /// Frames buffered per client before delivery to it times out
        #[arg(long)]
        mailbox_capacity: Option<usize>,
    },
    /// Connect to a relay and chat
    Connect {
        /// Relay address (host:port)
        #[arg(short, long)]
        server: Option<String>,

        /// Name to register; prompted for when omitted
        #[arg(short, long)]
        name: Option<String>,
    },
}

impl Config {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Check if running the relay server
    pub fn is_serve_mode(&self) -> bool {
        matches!(self.command, Command::Serve { .. })
    }

    /// Name given with `connect --name`
    pub fn name(&self) -> Option<&str> {
        match &self.command {
            Command::Connect { name, .. } => name.as_deref(),
            Command::Serve { .. } => None,
        }
    }
}

/// CLI overrides for the file settings
pub trait MergeCli {
    fn merge_cli(&mut self, cli: &Config);
}

impl MergeCli for Settings {
    fn merge_cli(&mut self, cli: &Config) {
        match &cli.command {
            Command::Serve {
                bind,
                mailbox_capacity,
            } => {
                if let Some(bind) = bind {
                    self.server.bind = bind.clone();
                }
                if let Some(capacity) = mailbox_capacity {
                    self.server.mailbox_capacity = *capacity;
                }
            }
            Command::Connect { server, .. } => {
                if let Some(server) = server {
                    self.client.server = server.clone();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_serve_overrides() {
        let cli = Config::parse_from([
            "relaychat",
            "--debug",
            "serve",
            "--bind",
            "0.0.0.0:9000",
            "--mailbox-capacity",
            "8",
        ]);
        assert!(cli.debug);
        assert!(cli.is_serve_mode());

        let mut settings = Settings::default();
        settings.merge_cli(&cli);
        assert_eq!(settings.server.bind, "0.0.0.0:9000");
        assert_eq!(settings.server.mailbox_capacity, 8);
        assert_eq!(settings.client.server, "127.0.0.1:12021");
    }

    #[test]
    fn test_connect_overrides() {
        let cli = Config::parse_from([
            "relaychat",
            "connect",
            "-s",
            "10.0.0.2:12021",
            "-n",
            "alice",
            "-c",
            "/tmp/relay.toml",
        ]);
        assert!(!cli.is_serve_mode());
        assert_eq!(cli.name(), Some("alice"));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/relay.toml")));

        let mut settings = Settings::default();
        settings.merge_cli(&cli);
        assert_eq!(settings.client.server, "10.0.0.2:12021");
    }

    #[test]
    fn test_absent_flags_keep_file_values() {
        let cli = Config::parse_from(["relaychat", "serve"]);
        let mut settings = Settings::default();
        settings.server.bind = "127.0.0.1:4000".to_string();
        settings.merge_cli(&cli);
        assert_eq!(settings.server.bind, "127.0.0.1:4000");
    }
}
