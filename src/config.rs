use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, error};

/// Bridge configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Host the webview endpoint binds to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port of the webview endpoint
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // Backend GLSP server
    #[serde(default = "default_host")]
    pub glsp_server_host: String,
    #[serde(default = "default_glsp_server_port")]
    pub glsp_server_port: u16,

    /// Sent to the server on initialize
    #[serde(default = "default_application_id")]
    pub application_id: String,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,

    /// Root that relative document uris resolve against
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,

    /// Where SVG exports are written
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,

    /// Log every message passing the connector
    #[serde(default = "default_message_logging")]
    pub message_logging: bool,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        // Load from environment variables using envy
        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("Configuration loaded");
                Ok(config)
            }
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Address the webview endpoint listens on
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn glsp_server_address(&self) -> String {
        format!("{}:{}", self.glsp_server_host, self.glsp_server_port)
    }

    /// Default tracing filter when `RUST_LOG` is unset
    pub fn log_filter(&self) -> String {
        format!("glsp_bridge={0},tower_http={0},info", self.log_level)
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            glsp_server_host: default_host(),
            glsp_server_port: default_glsp_server_port(),
            application_id: default_application_id(),
            protocol_version: default_protocol_version(),
            workspace_root: default_workspace_root(),
            export_dir: default_export_dir(),
            message_logging: default_message_logging(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    EnvError(envy::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EnvError(e) => write!(f, "Environment variable error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_glsp_server_port() -> u16 {
    5007
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_application_id() -> String {
    "glsp-bridge".to_string()
}

fn default_protocol_version() -> String {
    "1.0.0".to_string()
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("exports")
}

fn default_message_logging() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server_address(), "127.0.0.1:8081");
        assert_eq!(config.glsp_server_address(), "127.0.0.1:5007");
        assert!(config.message_logging);
        assert!(config.is_development());
        assert_eq!(config.log_filter(), "glsp_bridge=info,tower_http=info,info");
    }

    #[test]
    fn test_from_env_pairs() {
        let vars = vec![
            ("GLSP_SERVER_PORT".to_string(), "6000".to_string()),
            ("MESSAGE_LOGGING".to_string(), "false".to_string()),
            ("WORKSPACE_ROOT".to_string(), "/srv/models".to_string()),
            ("LOG_LEVEL".to_string(), "trace".to_string()),
        ];
        let config: Config = envy::from_iter(vars).unwrap();

        assert_eq!(config.glsp_server_port, 6000);
        assert!(!config.message_logging);
        assert_eq!(config.workspace_root, PathBuf::from("/srv/models"));
        assert_eq!(config.port, 8081);
        assert_eq!(config.log_filter(), "glsp_bridge=trace,tower_http=trace,info");
    }
}
