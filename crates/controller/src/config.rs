//! Controller configuration. Deliberately narrower than the worker's:
//! spec.md §6 fixes exactly three fields.

use std::path::Path;

use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,

    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    #[serde(default)]
    pub password: String,
}

fn default_listen_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    8080
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_ip: default_listen_ip(),
            listen_port: default_listen_port(),
            password: String::new(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Ok(ip) = std::env::var("TTSFLEET_LISTEN_IP") {
            config.listen_ip = ip;
        }
        if let Ok(port) = std::env::var("TTSFLEET_LISTEN_PORT") {
            if let Ok(p) = port.parse() {
                config.listen_port = p;
            }
        }
        if let Ok(pw) = std::env::var("TTSFLEET_PASSWORD") {
            config.password = pw;
        }
        config
    }

    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        if let Some(p) = path {
            if p.as_ref().exists() {
                return Self::from_file(p);
            }
        }
        Ok(Self::from_env())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Parser)]
#[command(name = "ttsfleet-controller", about = "TTS fleet capacity registry")]
pub struct Cli {
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,

    #[arg(long, env = "TTSFLEET_LISTEN_IP")]
    pub listen_ip: Option<String>,

    #[arg(long, env = "TTSFLEET_LISTEN_PORT")]
    pub listen_port: Option<u16>,

    #[arg(long, env = "TTSFLEET_PASSWORD")]
    pub password: Option<String>,
}

impl Cli {
    pub fn apply(self, mut config: Config) -> Config {
        if let Some(v) = self.listen_ip {
            config.listen_ip = v;
        }
        if let Some(v) = self.listen_port {
            config.listen_port = v;
        }
        if let Some(v) = self.password {
            config.password = v;
        }
        config
    }
}
