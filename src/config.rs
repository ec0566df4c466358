//! Application settings, separate from mapping profiles
//!
//! Read from `<config dir>/openremap/config.toml`. A missing file means
//! defaults; a malformed one is an error.

use crate::controller::ControllerSettings;
use crate::persistence::{default_profile_path, get_config_dir};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, Level, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::FmtSubscriber;

const CONFIG_DIR: &str = "openremap";
const CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Profile to load, the bundled example profile location if unset
    pub profile: Option<PathBuf>,
    /// Capacity of the controller event queue
    pub queue_capacity: usize,
    /// Capacity of the virtual output command channel
    pub output_capacity: usize,
    pub log_level: String,
    pub poll_interval_us: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: None,
            queue_capacity: 1000,
            output_capacity: 256,
            log_level: "info".to_string(),
            poll_interval_us: 100,
        }
    }
}

impl AppConfig {
    pub fn config_path() -> PathBuf {
        let mut path = get_config_dir();
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Loads `path` with `subscriber` as the thread default
    ///
    /// The configured log level is only known afterwards, so messages from
    /// loading go to this temporary subscriber instead of being dropped.
    pub async fn load_with<S>(path: &Path, subscriber: S) -> Result<Self>
    where
        S: Subscriber + Send + Sync + 'static,
    {
        let _guard = tracing::subscriber::set_default(subscriber);
        let config = Self::load_from(path).await?;
        info!(
            "Loaded config from {}: log level {}, queue capacity {}",
            path.display(),
            config.log_level,
            config.queue_capacity
        );
        Ok(config)
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config exists: {}", e))?
        {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config {}: {}", path.display(), e))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| eyre!("Failed to parse config {}: {}", path.display(), e))?;
        if config.queue_capacity == 0 || config.output_capacity == 0 {
            return Err(eyre!("Channel capacities must be greater than zero"));
        }
        Ok(config)
    }

    pub fn profile_path(&self) -> PathBuf {
        self.profile.clone().unwrap_or_else(default_profile_path)
    }

    /// Unknown names fall back to INFO
    pub fn level(&self) -> Level {
        self.log_level.parse().unwrap_or(Level::INFO)
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            poll_interval: Duration::from_micros(self.poll_interval_us),
        }
    }
}

/// Plain subscriber used until the configured one is installed
pub fn bootstrap_subscriber<W>(level: Level, writer: W) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_ansi(false)
        .with_writer(writer)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path() -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("openremap-config-{}", uuid::Uuid::new_v4()));
        path.push(CONFIG_FILE);
        path
    }

    #[tokio::test]
    async fn missing_file_gives_defaults() {
        assert_eq!(AppConfig::load_from(&scratch_path()).await.unwrap(), AppConfig::default());
    }

    #[tokio::test]
    async fn partial_file_keeps_other_defaults() {
        let path = scratch_path();
        let dir = path.parent().unwrap().to_path_buf();
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(&path, "log_level = \"debug\"\nprofile = \"/tmp/p.toml\"\n")
            .await
            .unwrap();

        let config = AppConfig::load_from(&path).await.unwrap();
        assert_eq!(config.level(), Level::DEBUG);
        assert_eq!(config.profile_path(), PathBuf::from("/tmp/p.toml"));
        assert_eq!(config.queue_capacity, 1000);

        tokio::fs::write(&path, "queue_capacity = 0\n").await.unwrap();
        assert!(AppConfig::load_from(&path).await.is_err());

        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[test]
    fn unknown_level_falls_back_to_info() {
        let config = AppConfig {
            log_level: "loud".to_string(),
            ..Default::default()
        };
        assert_eq!(config.level(), Level::INFO);
        assert_eq!(
            config.controller_settings().poll_interval,
            Duration::from_micros(100)
        );
    }

    #[derive(Clone, Default)]
    struct Capture(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn loading_is_logged_before_logging_is_configured() {
        let capture = Capture::default();
        let writer = {
            let capture = capture.clone();
            move || capture.clone()
        };
        let path = scratch_path();

        let config = AppConfig::load_with(&path, bootstrap_subscriber(Level::DEBUG, writer))
            .await
            .unwrap();
        assert_eq!(config, AppConfig::default());

        let output = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("No config at"), "{output}");
        assert!(output.contains("Loaded config from"), "{output}");
    }
}
