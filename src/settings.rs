use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub server: Server,
    pub authz: Authz,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authz {
    /// Model definition (request/policy shape, effect algebra, matcher).
    /// Default: config/model.conf
    pub model_path: PathBuf,
    /// KDL file holding policy and grouping rules. Created on first write.
    /// Default: data/policy.kdl
    pub policy_path: PathBuf,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8180,
        }
    }
}

impl Default for Authz {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("config/model.conf"),
            policy_path: PathBuf::from("data/policy.kdl"),
        }
    }
}

impl Server {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("server.host", Server::default().host)
            .into_diagnostic()?
            .set_default("server.port", Server::default().port)
            .into_diagnostic()?
            .set_default(
                "authz.model_path",
                Authz::default().model_path.to_string_lossy().to_string(),
            )
            .into_diagnostic()?
            .set_default(
                "authz.policy_path",
                Authz::default().policy_path.to_string_lossy().to_string(),
            )
            .into_diagnostic()?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: WARDEN__SERVER__PORT=9090, etc.
        builder = builder.add_source(config::Environment::with_prefix("WARDEN").separator("__"));

        let cfg = builder.build().into_diagnostic()?;
        let mut s: Settings = cfg.try_deserialize().into_diagnostic()?;

        // Normalize paths to be relative to current dir
        if s.authz.model_path.is_relative() {
            s.authz.model_path = std::env::current_dir()
                .into_diagnostic()?
                .join(&s.authz.model_path);
        }
        if s.authz.policy_path.is_relative() {
            s.authz.policy_path = std::env::current_dir()
                .into_diagnostic()?
                .join(&s.authz.policy_path);
        }

        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    // Settings read process-wide env vars; keep tests that load them serial.
    static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

    #[test]
    fn test_settings_load_defaults() {
        let _env = ENV_LOCK.lock();
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("nonexistent.toml");

        let settings = Settings::load(config_path.to_str().unwrap())
            .expect("Failed to load settings");

        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 8180);
        assert!(settings.authz.model_path.ends_with("config/model.conf"));
        assert!(settings.authz.policy_path.ends_with("data/policy.kdl"));
    }

    #[test]
    fn test_settings_load_from_file() {
        let _env = ENV_LOCK.lock();
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("test_config.toml");

        let config_content = r#"
[server]
host = "127.0.0.1"
port = 9090

[authz]
model_path = "/etc/warden/model.conf"
policy_path = "/var/lib/warden/policy.kdl"
"#;
        fs::write(&config_path, config_content).expect("Failed to write config");

        let settings = Settings::load(config_path.to_str().unwrap())
            .expect("Failed to load settings");

        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.server.bind_addr(), "127.0.0.1:9090");
        assert_eq!(
            settings.authz.model_path,
            PathBuf::from("/etc/warden/model.conf")
        );
        assert_eq!(
            settings.authz.policy_path,
            PathBuf::from("/var/lib/warden/policy.kdl")
        );
    }

    #[test]
    fn test_settings_env_override() {
        let _env = ENV_LOCK.lock();
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("test_config.toml");

        let config_content = r#"
[server]
host = "127.0.0.1"
port = 8080
"#;
        fs::write(&config_path, config_content).expect("Failed to write config");

        env::set_var("WARDEN__SERVER__PORT", "9999");
        env::set_var("WARDEN__SERVER__HOST", "192.168.1.1");

        // Env should override file
        let settings = Settings::load(config_path.to_str().unwrap())
            .expect("Failed to load settings");

        assert_eq!(settings.server.host, "192.168.1.1");
        assert_eq!(settings.server.port, 9999);

        env::remove_var("WARDEN__SERVER__PORT");
        env::remove_var("WARDEN__SERVER__HOST");
    }

    #[test]
    fn test_settings_path_normalization() {
        let _env = ENV_LOCK.lock();
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("test_config.toml");

        let config_content = r#"
[authz]
model_path = "relative/model.conf"
policy_path = "relative/policy.kdl"
"#;
        fs::write(&config_path, config_content).expect("Failed to write config");

        let settings = Settings::load(config_path.to_str().unwrap())
            .expect("Failed to load settings");

        assert!(settings.authz.model_path.is_absolute());
        assert!(settings.authz.policy_path.is_absolute());
        assert!(settings.authz.model_path.ends_with("relative/model.conf"));
        assert!(settings.authz.policy_path.ends_with("relative/policy.kdl"));
    }
}
