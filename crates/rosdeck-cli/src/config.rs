//! Operator config – reads/writes `~/.rosdeck/config.toml`.

use rosdeck_middleware::ConnectionSettings;
use rosdeck_middleware::connection::{DEFAULT_HOST, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted operator configuration stored in `~/.rosdeck/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Robot host or full bridge URL used by a bare `/connect`.
    #[serde(default = "default_robot_host")]
    pub robot_host: String,

    /// rosbridge port appended to bare hosts.
    #[serde(default = "default_robot_port")]
    pub robot_port: u16,

    /// Resolve topics and services under `/dummy`.
    #[serde(default)]
    pub simulated_topics: bool,

    /// Reject addresses that are neither an IPv4 host nor a ws/http URL.
    #[serde(default = "default_true")]
    pub validate_addresses: bool,

    /// Name the local simulator publishes as.
    #[serde(default = "default_robot_id")]
    pub robot_id: String,
}

fn default_robot_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_robot_port() -> u16 {
    DEFAULT_PORT
}
fn default_true() -> bool {
    true
}
fn default_robot_id() -> String {
    "go2".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            robot_host: default_robot_host(),
            robot_port: default_robot_port(),
            simulated_topics: false,
            validate_addresses: true,
            robot_id: default_robot_id(),
        }
    }
}

impl Config {
    /// Connection tunables for this config; lifecycle timings keep their
    /// defaults.
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            default_host: self.robot_host.clone(),
            default_port: self.robot_port,
            validate_addresses: self.validate_addresses,
            simulated: self.simulated_topics,
            ..ConnectionSettings::default()
        }
    }
}

/// Return the path to `~/.rosdeck/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".rosdeck").join("config.toml")
}

/// Load the config from disk. Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `ROSDECK_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ROSDECK_ROS_IP` | `robot_host` |
/// | `ROSDECK_ROS_PORT` | `robot_port` |
/// | `ROSDECK_SIMULATED_TOPICS` | `simulated_topics` (`true`/`1`) |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("ROSDECK_ROS_IP")
        && !v.trim().is_empty()
    {
        cfg.robot_host = v.trim().to_string();
    }
    if let Ok(v) = std::env::var("ROSDECK_ROS_PORT")
        && let Ok(port) = v.trim().parse::<u16>()
    {
        cfg.robot_port = port;
    }
    if let Ok(v) = std::env::var("ROSDECK_SIMULATED_TOPICS") {
        cfg.simulated_topics = matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1");
    }
}

/// Save the config to disk, creating `~/.rosdeck/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner-only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700, "config directory must have 0o700 permissions");
    }

    #[test]
    fn roundtrip_custom_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config {
            robot_host: "10.0.0.7".to_string(),
            robot_port: 9191,
            ..Config::default()
        };
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.robot_host, "10.0.0.7");
        assert_eq!(loaded.robot_port, 9191);
        assert!(loaded.validate_addresses);
        assert_eq!(loaded.robot_id, "go2");
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "robot_port = 9300\n").expect("write");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.robot_port, 9300);
        assert_eq!(loaded.robot_host, DEFAULT_HOST);
        assert!(!loaded.simulated_topics);
    }

    #[test]
    fn config_path_points_to_rosdeck_dir() {
        let p = config_path_for_home("/home/operator");
        assert!(p.to_string_lossy().contains(".rosdeck"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn connection_settings_carry_config_fields() {
        let cfg = Config {
            robot_host: "10.1.1.1".to_string(),
            simulated_topics: true,
            ..Config::default()
        };
        let settings = cfg.connection_settings();
        assert_eq!(settings.default_url(), "ws://10.1.1.1:9090");
        assert!(settings.simulated);
        assert_eq!(settings.connect_timeout, Duration::from_secs(10));
    }

    // Every env override is exercised in one test so parallel tests never
    // race on the same variables.
    #[test]
    fn apply_env_overrides_reads_rosdeck_variables() {
        // SAFETY: no other test in this crate touches ROSDECK_* variables.
        unsafe {
            std::env::set_var("ROSDECK_ROS_IP", "192.168.123.161");
            std::env::set_var("ROSDECK_ROS_PORT", "not-a-port");
            std::env::set_var("ROSDECK_SIMULATED_TOPICS", "TRUE");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.robot_host, "192.168.123.161");
        assert_eq!(cfg.robot_port, DEFAULT_PORT);
        assert!(cfg.simulated_topics);

        unsafe { std::env::set_var("ROSDECK_ROS_PORT", "9999") };
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.robot_port, 9999);

        unsafe {
            std::env::remove_var("ROSDECK_ROS_IP");
            std::env::remove_var("ROSDECK_ROS_PORT");
            std::env::remove_var("ROSDECK_SIMULATED_TOPICS");
        }
    }
}
