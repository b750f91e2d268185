//! Configuration file management for orbit.
//!
//! Provides a TOML-based config file at `$XDG_CONFIG_HOME/orbit/config.toml`
//! and a resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use orbit_db::config::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct DatabaseSection {
    pub url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrchestratorSection {
    pub metrics_port: Option<u16>,
    pub max_workers: Option<usize>,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            metrics_port: None,
            max_workers: None,
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the orbit config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/orbit` or `~/.config/orbit`.
/// We intentionally ignore the platform-specific `dirs::config_dir()`
/// (which returns `~/Library/Application Support` on macOS).
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("orbit");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("orbit")
}

/// Return the path to the orbit config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct OrbitConfig {
    pub db_config: DbConfig,
    pub metrics_port: u16,
    pub max_workers: usize,
}

pub const DEFAULT_METRICS_PORT: u16 = 9090;
pub const DEFAULT_MAX_WORKERS: usize = 100;

impl OrbitConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `cli_db_url` > `ORBIT_DATABASE_URL` env > `config_file.database.url` > `DbConfig::DEFAULT_URL`
    /// - Metrics port: `ORBIT_METRICS_PORT` env > `config_file.orchestrator.metrics_port` > `DEFAULT_METRICS_PORT`
    /// - Max workers: `ORBIT_MAX_WORKERS` env > `config_file.orchestrator.max_workers` > `DEFAULT_MAX_WORKERS`
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file_config = load_config().ok();

        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var("ORBIT_DATABASE_URL") {
            url
        } else if let Some(url) = file_config.as_ref().and_then(|c| c.database.url.clone()) {
            url
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };
        let db_config = DbConfig::new(db_url);

        let metrics_port = if let Ok(port) = std::env::var("ORBIT_METRICS_PORT") {
            port.parse().context("ORBIT_METRICS_PORT is not a valid port")?
        } else if let Some(port) = file_config.as_ref().and_then(|c| c.orchestrator.metrics_port) {
            port
        } else {
            DEFAULT_METRICS_PORT
        };

        let max_workers = if let Ok(n) = std::env::var("ORBIT_MAX_WORKERS") {
            n.parse().context("ORBIT_MAX_WORKERS is not a valid number")?
        } else if let Some(n) = file_config.as_ref().and_then(|c| c.orchestrator.max_workers) {
            n
        } else {
            DEFAULT_MAX_WORKERS
        };

        Ok(Self {
            db_config,
            metrics_port,
            max_workers,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    // Tests mutate process-wide env vars; serialize them against each other.
    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|e| e.into_inner())
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("orbit");
        let path = dir.join("config.toml");

        let original = ConfigFile {
            database: DatabaseSection {
                url: Some("postgresql://testhost:5432/testdb".to_string()),
            },
            orchestrator: OrchestratorSection {
                metrics_port: Some(9999),
                max_workers: Some(42),
            },
        };

        std::fs::create_dir_all(&dir).unwrap();
        let contents = toml::to_string_pretty(&original).unwrap();
        std::fs::write(&path, &contents).unwrap();

        let loaded_contents = std::fs::read_to_string(&path).unwrap();
        let loaded: ConfigFile = toml::from_str(&loaded_contents).unwrap();

        assert_eq!(loaded.database.url, original.database.url);
        assert_eq!(loaded.orchestrator.metrics_port, Some(9999));
        assert_eq!(loaded.orchestrator.max_workers, Some(42));
    }

    #[cfg(unix)]
    #[test]
    fn save_config_sets_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("test.toml");
        std::fs::write(&file, "test").unwrap();

        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&file, perms).unwrap();

        let meta = std::fs::metadata(&file).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn resolve_with_cli_flag_overrides_all() {
        let _lock = lock_env();

        unsafe { std::env::set_var("ORBIT_DATABASE_URL", "postgresql://env:5432/envdb") };

        let config = OrbitConfig::resolve(Some("postgresql://cli:5432/clidb")).unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://cli:5432/clidb");

        unsafe { std::env::remove_var("ORBIT_DATABASE_URL") };
    }

    #[test]
    fn resolve_with_env_var_overrides_config_file() {
        let _lock = lock_env();

        unsafe { std::env::set_var("ORBIT_DATABASE_URL", "postgresql://env:5432/envdb") };

        let config = OrbitConfig::resolve(None).unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://env:5432/envdb");

        unsafe { std::env::remove_var("ORBIT_DATABASE_URL") };
    }

    #[test]
    fn resolve_defaults_when_nothing_set() {
        let _lock = lock_env();

        unsafe { std::env::remove_var("ORBIT_DATABASE_URL") };
        unsafe { std::env::remove_var("ORBIT_METRICS_PORT") };
        unsafe { std::env::remove_var("ORBIT_MAX_WORKERS") };

        // Point HOME/XDG_CONFIG_HOME somewhere with no config file.
        let tmp = tempfile::TempDir::new().unwrap();
        let orig_xdg = std::env::var("XDG_CONFIG_HOME").ok();
        unsafe { std::env::set_var("XDG_CONFIG_HOME", tmp.path()) };

        let config = OrbitConfig::resolve(None).unwrap();
        assert_eq!(config.db_config.database_url, DbConfig::DEFAULT_URL);
        assert_eq!(config.metrics_port, DEFAULT_METRICS_PORT);
        assert_eq!(config.max_workers, DEFAULT_MAX_WORKERS);

        match orig_xdg {
            Some(x) => unsafe { std::env::set_var("XDG_CONFIG_HOME", x) },
            None => unsafe { std::env::remove_var("XDG_CONFIG_HOME") },
        }
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("orbit/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
