//! Configuration for the formflow server
//!
//! Everything is environment-driven; invalid values fall back to defaults
//! with a warning rather than refusing to start.

use std::env;
use std::time::Duration;

use formflow_engine::{EvaluatorDefaults, Neo4jConfig};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Host to bind to
    #[serde(default = "default_host")]
    pub bind_address: String,

    /// Neo4j connection URI
    #[serde(default = "default_neo4j_uri")]
    pub neo4j_uri: String,

    /// Neo4j user
    #[serde(default = "default_neo4j_user")]
    pub neo4j_username: String,

    /// Neo4j password
    #[serde(default)]
    pub neo4j_password: String,

    /// Optional Neo4j database name
    #[serde(default)]
    pub neo4j_database: Option<String>,

    /// Per-variable evaluation budget in milliseconds
    #[serde(default = "default_variable_timeout_ms")]
    pub variable_timeout_ms: u64,

    /// Budget for predicate/source-node evaluations in milliseconds
    #[serde(default = "default_adhoc_timeout_ms")]
    pub adhoc_timeout_ms: u64,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_port() -> u16 {
    8080
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_neo4j_uri() -> String {
    "neo4j://localhost:7687".to_string()
}

fn default_neo4j_user() -> String {
    "neo4j".to_string()
}

fn default_variable_timeout_ms() -> u64 {
    500
}

fn default_adhoc_timeout_ms() -> u64 {
    1500
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn load() -> ServerConfig {
        let mut config = Self::default();

        if let Ok(port) = env::var("SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                config.port = port;
            } else {
                warn!("Invalid SERVER_PORT value: {}", port);
            }
        }

        if let Ok(host) = env::var("SERVER_HOST") {
            config.bind_address = host;
        }

        if let Ok(uri) = env::var("NEO4J_URI") {
            config.neo4j_uri = uri;
        }

        if let Ok(user) = env::var("NEO4J_USER") {
            config.neo4j_username = user;
        }

        if let Ok(password) = env::var("NEO4J_PASSWORD") {
            config.neo4j_password = password;
        } else {
            warn!("No NEO4J_PASSWORD provided - using an empty password");
        }

        if let Ok(database) = env::var("NEO4J_DATABASE") {
            config.neo4j_database = Some(database);
        }

        if let Ok(timeout) = env::var("VARIABLE_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse::<u64>() {
                config.variable_timeout_ms = ms;
            } else {
                warn!("Invalid VARIABLE_TIMEOUT_MS value: {}", timeout);
            }
        }

        if let Ok(timeout) = env::var("EVALUATOR_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse::<u64>() {
                config.adhoc_timeout_ms = ms;
            } else {
                warn!("Invalid EVALUATOR_TIMEOUT_MS value: {}", timeout);
            }
        }

        if let Ok(level) = env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        info!("Loaded server configuration");
        config
    }

    /// The engine's evaluator limits derived from this configuration.
    pub fn evaluator_defaults(&self) -> EvaluatorDefaults {
        EvaluatorDefaults {
            variable_timeout: Duration::from_millis(self.variable_timeout_ms),
            adhoc_timeout: Duration::from_millis(self.adhoc_timeout_ms),
            ..EvaluatorDefaults::default()
        }
    }

    /// The Neo4j connection settings derived from this configuration.
    pub fn neo4j_config(&self) -> Neo4jConfig {
        Neo4jConfig {
            uri: self.neo4j_uri.clone(),
            username: self.neo4j_username.clone(),
            password: self.neo4j_password.clone(),
            database: self.neo4j_database.clone(),
            ..Neo4jConfig::default()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: default_port(),
            bind_address: default_host(),
            neo4j_uri: default_neo4j_uri(),
            neo4j_username: default_neo4j_user(),
            neo4j_password: String::new(),
            neo4j_database: None,
            variable_timeout_ms: default_variable_timeout_ms(),
            adhoc_timeout_ms: default_adhoc_timeout_ms(),
            log_level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.variable_timeout_ms, 500);
        assert_eq!(config.adhoc_timeout_ms, 1500);
        let defaults = config.evaluator_defaults();
        assert_eq!(defaults.variable_timeout, Duration::from_millis(500));
        assert_eq!(defaults.adhoc_timeout, Duration::from_millis(1500));
    }
}
