/// Configuration management for stickyroute

use crate::core::{Endpoint, FetchMode};
use crate::error::ConfigError;
use crate::RouterConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main stickyroute configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The writable master
    pub primary: PrimaryConfig,
    /// Read-only slaves
    #[serde(default)]
    pub replicas: ReplicaConfig,
    /// Routing options
    #[serde(default)]
    pub router: RouterOptions,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Primary endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
}

/// Replica endpoints; anything left out is shared with the primary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Candidate replica hosts, one is picked per session
    #[serde(default)]
    pub hosts: Vec<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Routing options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterOptions {
    /// Row shape for results (assoc, num, both)
    pub fetch_mode: FetchMode,
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Seed for the per-session replica pick
    pub replica_seed: Option<u64>,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            fetch_mode: FetchMode::Assoc,
            connect_timeout_ms: 5000,
            replica_seed: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            primary: PrimaryConfig {
                host: "127.0.0.1".to_string(),
                port: 3306,
                database: "shop".to_string(),
                user: "shop".to_string(),
                password: String::new(),
            },
            replicas: ReplicaConfig::default(),
            router: RouterOptions::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.primary.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "primary host cannot be empty".to_string(),
            ));
        }

        if self.primary.port == 0 {
            return Err(ConfigError::ValidationError(
                "primary port must be greater than 0".to_string(),
            ));
        }

        if self.primary.database.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "primary database cannot be empty".to_string(),
            ));
        }

        // An empty replica list is a primary-only deployment
        if let Some(host) = self.replicas.hosts.iter().find(|h| h.trim().is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid replica host: {:?}",
                host
            )));
        }

        if self.replicas.port == Some(0) {
            return Err(ConfigError::ValidationError(
                "replica port must be greater than 0".to_string(),
            ));
        }

        if self.router.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log level: {}", self.logging.level)
            )),
        }

        Ok(())
    }

    /// Primary endpoint described by this configuration
    pub fn primary_endpoint(&self) -> Endpoint {
        let p = &self.primary;
        Endpoint::primary(&p.host, p.port, &p.database, &p.user, &p.password)
    }

    /// Replica endpoints, inheriting unset fields from the primary
    pub fn replica_endpoints(&self) -> Vec<Endpoint> {
        let primary = self.primary_endpoint();
        let r = &self.replicas;
        let template = Endpoint {
            port: r.port.unwrap_or(primary.port),
            database: r.database.clone().unwrap_or_else(|| primary.database.clone()),
            user: r.user.clone().unwrap_or_else(|| primary.user.clone()),
            password: r.password.clone().unwrap_or_else(|| primary.password.clone()),
            ..primary
        };
        r.hosts
            .iter()
            .map(|host| Endpoint::replica_of(&template, host))
            .collect()
    }

    /// Build the router configuration
    pub fn router_config(&self) -> Result<RouterConfig, ConfigError> {
        self.validate()?;
        let mut config = RouterConfig::new(self.primary_endpoint(), self.replica_endpoints())?
            .with_fetch_mode(self.router.fetch_mode)
            .with_connect_timeout(Duration::from_millis(self.router.connect_timeout_ms));
        config.replica_seed = self.router.replica_seed;
        Ok(config)
    }

    /// Create example configuration file
    pub fn create_example_config<P: AsRef<Path>>(path: P, layout: &str) -> Result<(), ConfigError> {
        let config = match layout {
            "primary-only" => Config {
                primary: PrimaryConfig {
                    host: "10.0.1.10".to_string(),
                    ..Config::default().primary
                },
                ..Default::default()
            },
            "replicated" => Config {
                primary: PrimaryConfig {
                    host: "10.0.1.10".to_string(),
                    ..Config::default().primary
                },
                replicas: ReplicaConfig {
                    hosts: vec![
                        "10.0.1.11".to_string(),
                        "10.0.1.12".to_string(),
                        "10.0.1.13".to_string(),
                    ],
                    ..Default::default()
                },
                ..Default::default()
            },
            _ => return Err(ConfigError::ValidationError(
                "Layout must be 'primary-only' or 'replicated'".to_string(),
            )),
        };

        config.save_to_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Role;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.replica_endpoints().is_empty());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.primary.port = 0;
        assert!(config.validate().is_err());

        config.primary.port = 3306;
        config.replicas.hosts = vec!["  ".to_string()];
        assert!(config.validate().is_err());

        config.replicas.hosts = vec!["10.0.0.2".to_string()];
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_replicas_inherit_primary_settings() {
        let toml_str = r#"
            [primary]
            host = "db-master"
            port = 3307
            database = "shop"
            user = "app"
            password = "secret"

            [replicas]
            hosts = ["db-slave-1", "db-slave-2"]
            user = "reader"

            [router]
            fetch_mode = "both"
            connect_timeout_ms = 250
            replica_seed = 9
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        let replicas = config.replica_endpoints();

        assert_eq!(replicas.len(), 2);
        assert_eq!(replicas[1].host, "db-slave-2");
        assert_eq!(replicas[1].role, Role::Replica);
        assert_eq!(replicas[1].port, 3307);
        assert_eq!(replicas[1].user, "reader");
        assert_eq!(replicas[1].password, "secret");

        let router = config.router_config().unwrap();
        assert_eq!(router.fetch_mode, FetchMode::Both);
        assert_eq!(router.connect_timeout, Duration::from_millis(250));
        assert_eq!(router.replica_seed, Some(9));
        assert_eq!(router.primary.host, "db-master");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed_config: Config = toml::from_str(&toml_str).unwrap();
        assert!(parsed_config.validate().is_ok());
    }

    #[test]
    fn test_config_file_operations() {
        let temp_file = NamedTempFile::new().unwrap();

        Config::create_example_config(temp_file.path(), "replicated").unwrap();
        let loaded_config = Config::load_from_file(temp_file.path()).unwrap();
        assert_eq!(loaded_config.replicas.hosts.len(), 3);

        assert!(Config::create_example_config(temp_file.path(), "sharded").is_err());
    }
}
