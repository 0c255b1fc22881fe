use crate::error::{IntakeError, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

/// Process-wide settings, read once at startup and shared by reference.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub smtp: SmtpConfig,
    pub access: AccessConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerConfig {
    pub listen_address: String,
    pub listen_port: u16,
    pub hostname: String,
    /// Upper bound on simultaneously running sessions
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SmtpConfig {
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AccessConfig {
    /// Peer IPs allowed to submit mail, compared textually
    pub whitelisted_ips: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StorageConfig {
    pub attachments_dir: PathBuf,
    #[serde(default)]
    pub on_collision: CollisionPolicy,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub log_file: PathBuf,
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// What the attachment store does when the target filename already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Keep both files, suffixing the new one (`report-1.txt`)
    #[default]
    Rename,
    /// Replace the existing file
    Overwrite,
    /// Drop the new attachment and log an error
    Reject,
}

fn default_max_connections() -> usize {
    64
}

fn default_max_message_size() -> usize {
    10 * 1024 * 1024 // 10MB
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                listen_address: "0.0.0.0".to_string(),
                listen_port: 2525,
                hostname: "localhost".to_string(),
                max_connections: default_max_connections(),
            },
            smtp: SmtpConfig {
                max_message_size: default_max_message_size(),
            },
            access: AccessConfig {
                whitelisted_ips: vec!["127.0.0.1".to_string()],
            },
            storage: StorageConfig {
                attachments_dir: PathBuf::from("attachments"),
                on_collision: CollisionPolicy::default(),
            },
            logging: LoggingConfig {
                log_file: PathBuf::from("log.txt"),
                level: default_log_level(),
            },
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| IntakeError::Config(e.to_string()))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| IntakeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default configuration to `path` for the operator to review.
    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let content = toml::to_string_pretty(&Config::default())
            .map_err(|e| IntakeError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;

        if self.storage.attachments_dir.as_os_str().is_empty() {
            return Err(IntakeError::Config(
                "storage.attachments_dir must not be empty".to_string(),
            ));
        }
        if self.server.max_connections == 0 {
            return Err(IntakeError::Config(
                "server.max_connections must be at least 1".to_string(),
            ));
        }
        if self.smtp.max_message_size == 0 {
            return Err(IntakeError::Config(
                "smtp.max_message_size must be at least 1".to_string(),
            ));
        }
        for ip in &self.access.whitelisted_ips {
            if ip.parse::<IpAddr>().is_err() {
                return Err(IntakeError::Config(format!(
                    "access.whitelisted_ips: {:?} is not an IP address",
                    ip
                )));
            }
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.server.listen_address.parse().map_err(|_| {
            IntakeError::Config(format!(
                "server.listen_address: {:?} is not an IP address",
                self.server.listen_address
            ))
        })?;
        Ok(SocketAddr::new(ip, self.server.listen_port))
    }
}
