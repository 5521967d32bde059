use config::{Config, Environment, File};
use serde::Deserialize;
use std::{ops::Deref, sync::Arc};
use tagforge_error::TFResult;

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE_NAME: &str = "tagforge.toml";

#[derive(Debug, Clone)]
pub struct Settings(Arc<Inner>);

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self(Arc::new(Inner::default()))
    }
}

impl Settings {
    /// Load settings from an optional TOML file, overridden by `TF__*`
    /// environment variables (e.g. `TF__COORDINATOR__BACKLOG_THRESHOLD=20`).
    pub fn new(config_path: &str) -> TFResult<Self> {
        let builder = Config::builder()
            .add_source(File::with_name(config_path).required(false))
            .add_source(
                Environment::with_prefix("TF")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        let inner: Inner = builder.build()?.try_deserialize()?;
        Ok(Self(Arc::new(inner)))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub coordinator: CoordinatorSettings,
    #[serde(default)]
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorSettings {
    /// In-flight request count above which pending channel requests are
    /// discarded before the next submission.
    #[serde(default = "CoordinatorSettings::backlog_threshold_default")]
    pub backlog_threshold: usize,
    /// Rewrite attempts after a verification mismatch before the tag is
    /// recorded as failed.
    #[serde(default = "CoordinatorSettings::max_verify_retries_default")]
    pub max_verify_retries: u32,
    /// Random draws attempted before the uniqueness guarantor gives up.
    #[serde(default = "CoordinatorSettings::random_attempts_default")]
    pub random_attempts: u32,
    /// 14 hex characters used when a seed EPC carries a non-hex prefix.
    #[serde(default = "CoordinatorSettings::default_vendor_prefix_default")]
    pub default_vendor_prefix: String,
    /// Access password (8 hex characters) attached to every operation request.
    #[serde(default = "CoordinatorSettings::access_password_default")]
    pub access_password: String,
    /// Capacity of the coordinator's command queue.
    #[serde(default = "CoordinatorSettings::actor_queue_capacity_default")]
    pub actor_queue_capacity: usize,
    /// Ask the channel for BlockWrite instead of word-by-word writes.
    #[serde(default)]
    pub block_write: bool,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        CoordinatorSettings {
            backlog_threshold: CoordinatorSettings::backlog_threshold_default(),
            max_verify_retries: CoordinatorSettings::max_verify_retries_default(),
            random_attempts: CoordinatorSettings::random_attempts_default(),
            default_vendor_prefix: CoordinatorSettings::default_vendor_prefix_default(),
            access_password: CoordinatorSettings::access_password_default(),
            actor_queue_capacity: CoordinatorSettings::actor_queue_capacity_default(),
            block_write: false,
        }
    }
}

impl CoordinatorSettings {
    fn backlog_threshold_default() -> usize {
        50
    }

    fn max_verify_retries_default() -> u32 {
        3
    }

    fn random_attempts_default() -> u32 {
        100
    }

    fn default_vendor_prefix_default() -> String {
        "E2801160000000".into()
    }

    fn access_password_default() -> String {
        "00000000".into()
    }

    fn actor_queue_capacity_default() -> usize {
        1024
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    #[serde(default = "LogSettings::level_default")]
    pub level: String,
    #[serde(default = "LogSettings::dir_default")]
    pub dir: String,
    #[serde(default = "LogSettings::file_name_default")]
    pub file_name: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        LogSettings {
            level: LogSettings::level_default(),
            dir: LogSettings::dir_default(),
            file_name: LogSettings::file_name_default(),
        }
    }
}

impl LogSettings {
    fn level_default() -> String {
        "info".into()
    }

    fn dir_default() -> String {
        "logs".into()
    }

    fn file_name_default() -> String {
        "tagforge.log".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let settings = match Settings::new("/nonexistent/tagforge-settings") {
            Ok(s) => s,
            Err(e) => panic!("settings should load without a file: {e}"),
        };
        assert_eq!(settings.coordinator.backlog_threshold, 50);
        assert_eq!(settings.coordinator.random_attempts, 100);
        assert_eq!(settings.log.level, "info");
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "[coordinator]\nbacklog_threshold = 8\nmax_verify_retries = 5\n\n[log]\nlevel = \"debug\""
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let settings = Settings::new(&path).unwrap();
        assert_eq!(settings.coordinator.backlog_threshold, 8);
        assert_eq!(settings.coordinator.max_verify_retries, 5);
        assert_eq!(settings.coordinator.access_password, "00000000");
        assert!(!settings.coordinator.block_write);
        assert_eq!(settings.log.level, "debug");
    }
}
