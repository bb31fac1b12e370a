//! Worker configuration.
//!
//! Layering is CLI flag > environment variable > TOML file > built-in
//! default, mirroring [`Config::from_env`] overlaying [`Config::default`].

use std::path::Path;

use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,

    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// URL peers should use to reach this worker. Empty when the worker
    /// only ever serves local sessions and is never selected as a peer.
    #[serde(default)]
    pub advertise_url: String,

    /// Controller base URL. Absent (empty) means standalone mode.
    #[serde(default)]
    pub controller_url: Option<String>,

    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    #[serde(default = "default_input_timeout")]
    pub session_input_timeout: f64,

    #[serde(default = "default_output_timeout")]
    pub session_output_timeout: f64,

    /// Shared bearer token. Empty disables authentication.
    #[serde(default)]
    pub password: String,

    #[serde(default = "default_model_directory")]
    pub model_directory: String,
}

fn default_listen_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    8080
}

fn default_max_sessions() -> usize {
    10
}

fn default_input_timeout() -> f64 {
    2.0
}

fn default_output_timeout() -> f64 {
    3.0
}

fn default_model_directory() -> String {
    "./data/finetune-fp16".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_ip: default_listen_ip(),
            listen_port: default_listen_port(),
            advertise_url: String::new(),
            controller_url: None,
            max_sessions: default_max_sessions(),
            session_input_timeout: default_input_timeout(),
            session_output_timeout: default_output_timeout(),
            password: String::new(),
            model_directory: default_model_directory(),
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
        if let Ok(url) = std::env::var("TTSFLEET_ADVERTISE_URL") {
            config.advertise_url = url;
        }
        if let Ok(url) = std::env::var("TTSFLEET_CONTROLLER_URL") {
            config.controller_url = Some(url);
        }
        if let Ok(max) = std::env::var("TTSFLEET_MAX_SESSIONS") {
            if let Ok(m) = max.parse() {
                config.max_sessions = m;
            }
        }
        if let Ok(t) = std::env::var("TTSFLEET_SESSION_INPUT_TIMEOUT") {
            if let Ok(t) = t.parse() {
                config.session_input_timeout = t;
            }
        }
        if let Ok(t) = std::env::var("TTSFLEET_SESSION_OUTPUT_TIMEOUT") {
            if let Ok(t) = t.parse() {
                config.session_output_timeout = t;
            }
        }
        if let Ok(pw) = std::env::var("TTSFLEET_PASSWORD") {
            config.password = pw;
        }
        if let Ok(dir) = std::env::var("TTSFLEET_MODEL_DIRECTORY") {
            config.model_directory = dir;
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

    pub fn has_password(&self) -> bool {
        !self.password.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("parse error: {0}")]
    Parse(String),
}

/// CLI overlay. Every field is also settable via the `TTSFLEET_*`
/// environment variables read by [`Config::from_env`]; a value set on the
/// command line wins over both the environment and a `--config` file.
#[derive(Debug, Parser)]
#[command(name = "ttsfleet-worker", about = "Streaming TTS worker node")]
pub struct Cli {
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,

    #[arg(long, env = "TTSFLEET_LISTEN_IP")]
    pub listen_ip: Option<String>,

    #[arg(long, env = "TTSFLEET_LISTEN_PORT")]
    pub listen_port: Option<u16>,

    #[arg(long, env = "TTSFLEET_ADVERTISE_URL")]
    pub advertise_url: Option<String>,

    #[arg(long, env = "TTSFLEET_CONTROLLER_URL")]
    pub controller_url: Option<String>,

    #[arg(long, env = "TTSFLEET_MAX_SESSIONS")]
    pub max_sessions: Option<usize>,

    #[arg(long, env = "TTSFLEET_SESSION_INPUT_TIMEOUT")]
    pub session_input_timeout: Option<f64>,

    #[arg(long, env = "TTSFLEET_SESSION_OUTPUT_TIMEOUT")]
    pub session_output_timeout: Option<f64>,

    #[arg(long, env = "TTSFLEET_PASSWORD")]
    pub password: Option<String>,

    #[arg(long, env = "TTSFLEET_MODEL_DIRECTORY")]
    pub model_directory: Option<String>,
}

impl Cli {
    /// Apply CLI/env overrides on top of a file-or-env-loaded base config.
    pub fn apply(self, mut config: Config) -> Config {
        if let Some(v) = self.listen_ip {
            config.listen_ip = v;
        }
        if let Some(v) = self.listen_port {
            config.listen_port = v;
        }
        if let Some(v) = self.advertise_url {
            config.advertise_url = v;
        }
        if let Some(v) = self.controller_url {
            config.controller_url = Some(v);
        }
        if let Some(v) = self.max_sessions {
            config.max_sessions = v;
        }
        if let Some(v) = self.session_input_timeout {
            config.session_input_timeout = v;
        }
        if let Some(v) = self.session_output_timeout {
            config.session_output_timeout = v;
        }
        if let Some(v) = self.password {
            config.password = v;
        }
        if let Some(v) = self.model_directory {
            config.model_directory = v;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.listen_ip, "0.0.0.0");
        assert_eq!(config.listen_port, 8080);
        assert_eq!(config.max_sessions, 10);
        assert_eq!(config.session_input_timeout, 2.0);
        assert_eq!(config.session_output_timeout, 3.0);
        assert!(config.controller_url.is_none());
        assert!(!config.has_password());
    }

    #[test]
    fn parses_toml_overrides() {
        let toml = r#"
listen_ip = "127.0.0.1"
listen_port = 9090
max_sessions = 4
controller_url = "http://controller:8080"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.listen_ip, "127.0.0.1");
        assert_eq!(config.listen_port, 9090);
        assert_eq!(config.max_sessions, 4);
        assert_eq!(config.controller_url.as_deref(), Some("http://controller:8080"));
        // Fields absent from the TOML fall back to defaults.
        assert_eq!(config.session_input_timeout, 2.0);
    }

    #[test]
    fn load_falls_back_to_env_defaults_when_config_path_is_missing() {
        let config = Config::load(Some("/nonexistent/ttsfleet.toml")).unwrap();
        assert_eq!(config.max_sessions, default_max_sessions());
    }

    #[test]
    fn load_reads_an_existing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ttsfleet.toml");
        std::fs::write(&path, "listen_port = 9999\nmax_sessions = 3\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.listen_port, 9999);
        assert_eq!(config.max_sessions, 3);
    }
}
