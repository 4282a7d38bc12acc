use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

use crate::messages::engine_error::VelaError;

fn default_result_handler() -> String {
    "backtest-result-handler".to_string()
}

fn default_time_loop_maximum() -> f64 {
    10.0
}

fn default_forward_console_messages() -> bool {
    true
}

fn default_data_directory() -> PathBuf {
    PathBuf::from("data")
}

/// The configuration surface of the engine core. Keys follow the settings
/// file verbatim, handler values name registrations in the composition
/// registry. Loaded from a TOML file with environment overrides on top.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(rename = "data-queue-handler")]
    pub data_queue_handler: String,
    #[serde(rename = "data-feed-handler")]
    pub data_feed_handler: String,
    #[serde(rename = "result-handler")]
    pub result_handler: String,
    #[serde(rename = "real-time-handler")]
    pub real_time_handler: String,
    #[serde(rename = "setup-handler")]
    pub setup_handler: String,
    #[serde(rename = "transaction-handler")]
    pub transaction_handler: String,
    #[serde(rename = "history-provider")]
    pub history_provider: String,
    #[serde(rename = "command-queue-handler")]
    pub command_queue_handler: String,
    #[serde(rename = "map-file-provider")]
    pub map_file_provider: String,
    #[serde(rename = "factor-file-provider")]
    pub factor_file_provider: String,
    /// Minutes one algorithm iteration may take before the isolator aborts.
    #[serde(rename = "algorithm-manager-time-loop-maximum")]
    pub algorithm_manager_time_loop_maximum: f64,
    #[serde(rename = "forward-console-messages")]
    pub forward_console_messages: bool,
    #[serde(rename = "plugin-directory")]
    pub plugin_directory: String,
    #[serde(rename = "ignore-version-checks")]
    pub ignore_version_checks: bool,
    #[serde(rename = "quandl-auth-token")]
    pub quandl_auth_token: String,
    #[serde(rename = "data-directory")]
    pub data_directory: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            data_queue_handler: "live-data-queue".to_string(),
            data_feed_handler: "backtest-feed".to_string(),
            result_handler: default_result_handler(),
            real_time_handler: "backtest-real-time-handler".to_string(),
            setup_handler: "console-setup-handler".to_string(),
            transaction_handler: "backtest-transaction-handler".to_string(),
            history_provider: "subscription-history-provider".to_string(),
            command_queue_handler: "empty-command-queue".to_string(),
            map_file_provider: "local-map-file-provider".to_string(),
            factor_file_provider: "local-factor-file-provider".to_string(),
            algorithm_manager_time_loop_maximum: default_time_loop_maximum(),
            forward_console_messages: default_forward_console_messages(),
            plugin_directory: String::new(),
            ignore_version_checks: false,
            quandl_auth_token: String::new(),
            data_directory: default_data_directory(),
        }
    }
}

impl Settings {
    pub fn from_toml(contents: &str) -> Result<Self, VelaError> {
        let mut settings: Settings = toml::from_str(contents)
            .map_err(|e| VelaError::Configuration(format!("Settings file: {}", e)))?;
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, VelaError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| VelaError::Configuration(format!("Settings file {}: {}", path.display(), e)))?;
        Self::from_toml(&contents)
    }

    /// Environment variables win over the file: `VELA_RESULT_HANDLER`
    /// overrides `result-handler` and so on.
    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("VELA_RESULT_HANDLER") {
            self.result_handler = value;
        }
        if let Ok(value) = std::env::var("VELA_TRANSACTION_HANDLER") {
            self.transaction_handler = value;
        }
        if let Ok(value) = std::env::var("VELA_DATA_DIRECTORY") {
            self.data_directory = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("VELA_ALGORITHM_MANAGER_TIME_LOOP_MAXIMUM") {
            if let Ok(minutes) = value.parse::<f64>() {
                self.algorithm_manager_time_loop_maximum = minutes;
            }
        }
        if let Ok(value) = std::env::var("VELA_IGNORE_VERSION_CHECKS") {
            self.ignore_version_checks = value == "1" || value.eq_ignore_ascii_case("true");
        }
    }

    fn validate(&self) -> Result<(), VelaError> {
        if self.algorithm_manager_time_loop_maximum <= 0.0 {
            return Err(VelaError::Configuration(
                "algorithm-manager-time-loop-maximum must be positive".to_string(),
            ));
        }
        if self.result_handler.is_empty() || self.transaction_handler.is_empty() {
            return Err(VelaError::Configuration(
                "result-handler and transaction-handler are required".to_string(),
            ));
        }
        Ok(())
    }

    /// The per-iteration budget as a duration.
    pub fn time_loop_maximum(&self) -> Duration {
        Duration::from_secs_f64(self.algorithm_manager_time_loop_maximum * 60.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn defaults_fill_missing_keys() {
        let settings = Settings::from_toml("").unwrap();
        assert!(approx_eq!(f64, settings.algorithm_manager_time_loop_maximum, 10.0));
        assert!(settings.forward_console_messages);
        assert_eq!(settings.time_loop_maximum(), Duration::from_secs(600));
    }

    #[test]
    fn file_values_override_defaults() {
        let settings = Settings::from_toml(
            "\"result-handler\" = \"live-result-handler\"\n\"algorithm-manager-time-loop-maximum\" = 2.5\n",
        )
        .unwrap();
        assert_eq!(settings.result_handler, "live-result-handler");
        assert_eq!(settings.time_loop_maximum(), Duration::from_secs(150));
    }

    #[test]
    fn non_positive_time_budget_is_rejected() {
        let error = Settings::from_toml("\"algorithm-manager-time-loop-maximum\" = 0.0").unwrap_err();
        assert!(matches!(error, VelaError::Configuration(_)));
    }

    #[test]
    fn ignore_version_checks_flag_forces_comparisons_equal() {
        use crate::helpers::version::{compare, Version};
        use std::cmp::Ordering;

        let settings = Settings::from_toml("\"ignore-version-checks\" = true").unwrap();
        let local = Version::new(1, 2, 3, 4);
        let remote = Version::new(9, 0, 0, 0);
        assert_eq!(compare(&local, &remote, settings.ignore_version_checks), Ordering::Equal);
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(compare(&local, &remote, settings.ignore_version_checks), Ordering::Less);
    }
}
