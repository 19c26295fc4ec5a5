use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    /// Path to the redb database file. Named `db` to keep the key names in
    /// sync with the original host/port/db configuration surface, even
    /// though the embedded backing store does not dial a network host.
    pub db: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 0,
            db: "gradekeep.redb".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    pub root: String,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            root: "./files".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxLimitsConfig {
    /// CPU time limit in seconds.
    pub cpu: u64,
    /// Address-space limit in bytes.
    pub mem: u64,
    pub procs: u64,
    pub fds: u64,
    /// Wall-clock timeout in seconds.
    pub wall: u64,
}

impl Default for SandboxLimitsConfig {
    fn default() -> Self {
        Self {
            cpu: 10,
            mem: 256 * 1024 * 1024,
            procs: 32,
            fds: 64,
            wall: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub count: usize,
    pub queue_depth: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            queue_depth: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterMoodleConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    pub service: String,
}

impl Default for ReporterMoodleConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            username: String::new(),
            password: String::new(),
            service: "moodle_mobile_app".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub files: FilesConfig,
    pub sandbox_limits: SandboxLimitsConfig,
    pub worker: WorkerConfig,
    pub reporter_moodle: ReporterMoodleConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(value) = env::var("GRADEKEEP_MOODLE_PASSWORD") {
            if !value.is_empty() {
                config.reporter_moodle.password = value;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = AppConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gradekeep.toml");
        config.save_to(&path).unwrap();
        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.worker.count, config.worker.count);
        assert_eq!(loaded.sandbox_limits.wall, config.sandbox_limits.wall);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_from("/nonexistent/path/gradekeep.toml").unwrap();
        assert_eq!(config.store.db, "gradekeep.redb");
    }

    #[test]
    fn env_var_overrides_moodle_password() {
        // SAFETY: test runs single-threaded w.r.t. this var; no other test reads it.
        unsafe { env::set_var("GRADEKEEP_MOODLE_PASSWORD", "secret123") };
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(dir.path().join("missing.toml")).unwrap();
        unsafe { env::remove_var("GRADEKEEP_MOODLE_PASSWORD") };
        assert_eq!(config.reporter_moodle.password, "secret123");
    }
}
