//! Bootstrap configuration.
//!
//! Loaded from an optional TOML file, then overridden by
//! `SESSION_BOOTSTRAP__<SECTION>__<KEY>` environment variables. Every field
//! has a default, so an empty or missing file yields a working setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{BootstrapError, BootstrapResult};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/session-bootstrap/config.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "SESSION_BOOTSTRAP";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub identity: IdentityConfig,
    pub session: SessionConfig,
    pub display: DisplayConfig,
    pub server: ServerConfig,
    pub child_env: ChildEnvConfig,
    pub readiness: Readiness,
}

/// Where user and group records come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentitySource {
    /// Query NSS through `getent`.
    #[default]
    Getent,
    /// Parse passwd/group files directly.
    Files,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub source: IdentitySource,
    pub getent_path: PathBuf,
    pub passwd_path: PathBuf,
    pub group_path: PathBuf,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            source: IdentitySource::Getent,
            getent_path: PathBuf::from("getent"),
            passwd_path: PathBuf::from("/etc/passwd"),
            group_path: PathBuf::from("/etc/group"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Parent of the per-uid scratch directories.
    pub scratch_root: PathBuf,
    /// Process table query tool.
    pub pgrep_path: PathBuf,
    /// Process name that marks a running display session.
    pub process_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scratch_root: PathBuf::from("/var/tmp"),
            pgrep_path: PathBuf::from("pgrep"),
            process_name: "xinit".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub xinit_path: PathBuf,
    /// Client script run by xinit inside the new display.
    pub session_script: PathBuf,
    pub xvfb_path: PathBuf,
    /// Screen geometry passed as `-screen 0 <geometry>`.
    pub geometry: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            xinit_path: PathBuf::from("/usr/bin/xinit"),
            session_script: PathBuf::from("/usr/local/bin/run_x_env.sh"),
            xvfb_path: PathBuf::from("/usr/bin/Xvfb"),
            geometry: "4096x4096x24".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub binary: PathBuf,
    pub config_path: PathBuf,
    pub encoder: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("/usr/bin/sanzu_server"),
            config_path: PathBuf::from("/etc/sanzu.toml"),
            encoder: "libx264".to_string(),
        }
    }
}

/// Log level variable handed to every child for the streaming server's sake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChildEnvConfig {
    pub log_var: String,
    pub log_level: String,
}

impl Default for ChildEnvConfig {
    fn default() -> Self {
        Self {
            log_var: "RUST_LOG".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// How long to wait after launching the display before starting the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Readiness {
    /// Sleep a fixed interval.
    Fixed {
        #[serde(default = "default_settle_ms")]
        settle_ms: u64,
    },
    /// Poll for the screen-buffer file, giving up after `attempts` checks.
    Poll {
        #[serde(default = "default_poll_interval_ms")]
        interval_ms: u64,
        #[serde(default = "default_poll_attempts")]
        attempts: u32,
    },
}

fn default_settle_ms() -> u64 {
    500
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_poll_attempts() -> u32 {
    50
}

impl Default for Readiness {
    fn default() -> Self {
        Self::Fixed {
            settle_ms: default_settle_ms(),
        }
    }
}

impl Readiness {
    /// A fixed wait of the given length.
    pub fn fixed(settle: Duration) -> Self {
        Self::Fixed {
            settle_ms: settle.as_millis() as u64,
        }
    }
}

impl BootstrapConfig {
    /// Load configuration from `path` (optional) and the environment.
    pub fn load(path: &Path) -> BootstrapResult<Self> {
        Self::load_with_env_prefix(path, ENV_PREFIX)
    }

    fn load_with_env_prefix(path: &Path, prefix: &str) -> BootstrapResult<Self> {
        // Env values arrive as strings; numbers must be parsed here because
        // the tagged `readiness` enum does not coerce them later.
        let built = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = built.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would only fail later, after privileges are gone.
    pub fn validate(&self) -> BootstrapResult<()> {
        for (key, path) in [
            ("display.xinit_path", &self.display.xinit_path),
            ("server.binary", &self.server.binary),
        ] {
            if !path.is_absolute() {
                return Err(BootstrapError::Config(format!(
                    "{key} must be an absolute path, got {}",
                    path.display()
                )));
            }
        }

        if self.session.process_name.trim().is_empty() {
            return Err(BootstrapError::Config(
                "session.process_name must not be empty".to_string(),
            ));
        }

        if self.display.geometry.trim().is_empty() {
            return Err(BootstrapError::Config(
                "display.geometry must not be empty".to_string(),
            ));
        }

        if self.child_env.log_var.is_empty() || self.child_env.log_var.contains('=') {
            return Err(BootstrapError::Config(format!(
                "child_env.log_var {:?} is not a valid variable name",
                self.child_env.log_var
            )));
        }

        if let Readiness::Poll {
            interval_ms,
            attempts,
        } = self.readiness
        {
            if interval_ms == 0 || attempts == 0 {
                return Err(BootstrapError::Config(
                    "readiness poll needs a non-zero interval_ms and attempts".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> BootstrapResult<String> {
        toml::to_string_pretty(self).map_err(|e| BootstrapError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_stock_layout() {
        let config = BootstrapConfig::default();
        assert_eq!(config.session.scratch_root, PathBuf::from("/var/tmp"));
        assert_eq!(config.session.process_name, "xinit");
        assert_eq!(config.display.geometry, "4096x4096x24");
        assert_eq!(config.server.encoder, "libx264");
        assert_eq!(config.child_env.log_var, "RUST_LOG");
        assert_eq!(config.readiness, Readiness::Fixed { settle_ms: 500 });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = BootstrapConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.binary, PathBuf::from("/usr/bin/sanzu_server"));
        assert_eq!(config.identity.source, IdentitySource::Getent);
    }

    #[test]
    fn test_file_overrides_selected_keys() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[session]
scratch_root = "/run/displays"

[identity]
source = "files"

[readiness]
mode = "poll"
interval_ms = 20
"#
        )
        .unwrap();

        let config = BootstrapConfig::load(file.path()).unwrap();
        assert_eq!(config.session.scratch_root, PathBuf::from("/run/displays"));
        // Untouched keys in a partially specified section keep their defaults.
        assert_eq!(config.session.process_name, "xinit");
        assert_eq!(config.identity.source, IdentitySource::Files);
        assert_eq!(
            config.readiness,
            Readiness::Poll {
                interval_ms: 20,
                attempts: 50
            }
        );
    }

    #[test]
    fn test_relative_binary_rejected() {
        let mut config = BootstrapConfig::default();
        config.server.binary = PathBuf::from("sanzu_server");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("server.binary"));
    }

    #[test]
    fn test_zero_poll_attempts_rejected() {
        let config = BootstrapConfig {
            readiness: Readiness::Poll {
                interval_ms: 10,
                attempts: 0,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_dump_round_trips_through_loader() {
        let config = BootstrapConfig {
            readiness: Readiness::fixed(Duration::from_millis(250)),
            ..Default::default()
        };
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("mode = \"fixed\""));

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(rendered.as_bytes()).unwrap();
        let loaded = BootstrapConfig::load(file.path()).unwrap();
        assert_eq!(loaded.readiness, Readiness::Fixed { settle_ms: 250 });
    }

    #[test]
    fn test_env_overrides_numeric_readiness_fields() {
        const PREFIX: &str = "SESSION_BOOTSTRAP_ENV_TEST";
        let dir = tempfile::tempdir().unwrap();
        // SAFETY: these variable names are only read by this test.
        unsafe {
            std::env::set_var(format!("{PREFIX}__READINESS__MODE"), "poll");
            std::env::set_var(format!("{PREFIX}__READINESS__INTERVAL_MS"), "20");
            std::env::set_var(format!("{PREFIX}__DISPLAY__GEOMETRY"), "1920x1080x24");
        }

        let config =
            BootstrapConfig::load_with_env_prefix(&dir.path().join("absent.toml"), PREFIX)
                .unwrap();

        assert_eq!(
            config.readiness,
            Readiness::Poll {
                interval_ms: 20,
                attempts: 50
            }
        );
        assert_eq!(config.display.geometry, "1920x1080x24");
    }
}
