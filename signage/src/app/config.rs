use clap::Args;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lib_signage::core::ControllerSettings;
use lib_signage::health::memory_guard::MIB;
use lib_signage::health::HealthSettings;
use lib_signage::startup::scheduler::DEFAULT_JOB_ID;
use lib_signage::startup::{JobRequest, LaunchTarget};
use lib_signage::sync::DEFAULT_SHEET_RANGE;

pub const CONFIG_FILE_NAME: &str = "signage.conf";
pub const DEFAULT_SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4/";
pub const DEFAULT_STATUS_PORT: u16 = 8765;
const DISPLAY_PROGRAM_NAME: &str = "signage_display";
const ENV_PREFIX: &str = "SIGNAGE_";

#[derive(Args, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[arg(long, env = "SIGNAGE_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[arg(long, env = "SIGNAGE_SHEETS_BASE_URL", help = "Base URL of the spreadsheet API.")]
    pub sheets_base_url: Option<String>,

    #[arg(long, env = "SIGNAGE_SPREADSHEET_ID", help = "Spreadsheet holding one tab per device.")]
    pub spreadsheet_id: Option<String>,

    #[arg(long, env = "SIGNAGE_API_KEY", hide_env_values = true, help = "API key for the spreadsheet API.")]
    pub api_key: Option<String>,

    #[arg(long, env = "SIGNAGE_SHEET_RANGE", help = "Cell range read from the device tab.")]
    pub sheet_range: Option<String>,

    #[arg(long, env = "SIGNAGE_SETTINGS_PATH", help = "Path to the persisted device settings.")]
    pub settings_path: Option<PathBuf>,

    #[arg(long, env = "SIGNAGE_STATE_DIR", help = "Directory for pid, marker and job files.")]
    pub state_dir: Option<PathBuf>,

    #[arg(long, env = "SIGNAGE_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "SIGNAGE_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[arg(long, env = "SIGNAGE_RETRY_DELAY_SECONDS", help = "Seconds between recovery attempts in the error state.")]
    pub retry_delay_seconds: Option<u64>,

    #[arg(long, env = "SIGNAGE_HEALTH_INTERVAL_SECONDS", help = "Seconds between memory checks.")]
    pub health_interval_seconds: Option<u64>,

    #[arg(long, env = "SIGNAGE_MEMORY_THRESHOLD_MB", help = "Memory ceiling in MB before a restart.")]
    pub memory_threshold_mb: Option<u64>,

    #[arg(long, env = "SIGNAGE_GC_SETTLE_SECONDS", help = "Seconds to wait after a GC hint before re-measuring.")]
    pub gc_settle_seconds: Option<u64>,

    #[arg(long, env = "SIGNAGE_STATUS_PORT", help = "Local port of the status API.")]
    pub status_port: Option<u16>,

    #[arg(long, env = "SIGNAGE_BROWSER_COMMAND", help = "Command rendering a page; {url} is substituted.")]
    pub browser_command: Option<String>,

    #[arg(long, env = "SIGNAGE_FOCUS_COMMAND", help = "Command raising the display window; {pid} is substituted.")]
    pub focus_command: Option<String>,

    #[arg(long, env = "SIGNAGE_DISPLAY_PROGRAM", help = "Path to the signage_display executable.")]
    pub display_program: Option<PathBuf>,

    #[arg(long, env = "SIGNAGE_BOOT_DELAY_SECONDS", help = "Delay of the second boot launch.")]
    pub boot_delay_seconds: Option<u64>,

    #[arg(long, env = "SIGNAGE_PRESENCE_INTERVAL_SECONDS", help = "Seconds between foreground presence checks.")]
    pub presence_interval_seconds: Option<u64>,

    #[arg(long, env = "SIGNAGE_JOB_MIN_LATENCY_SECONDS", help = "Earliest firing of the fallback job.")]
    pub job_min_latency_seconds: Option<u64>,

    #[arg(long, env = "SIGNAGE_JOB_DEADLINE_SECONDS", help = "Latest firing of the fallback job.")]
    pub job_deadline_seconds: Option<u64>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            sheets_base_url: other.sheets_base_url.or(self.sheets_base_url),
            spreadsheet_id: other.spreadsheet_id.or(self.spreadsheet_id),
            api_key: other.api_key.or(self.api_key),
            sheet_range: other.sheet_range.or(self.sheet_range),
            settings_path: other.settings_path.or(self.settings_path),
            state_dir: other.state_dir.or(self.state_dir),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            retry_delay_seconds: other.retry_delay_seconds.or(self.retry_delay_seconds),
            health_interval_seconds: other.health_interval_seconds.or(self.health_interval_seconds),
            memory_threshold_mb: other.memory_threshold_mb.or(self.memory_threshold_mb),
            gc_settle_seconds: other.gc_settle_seconds.or(self.gc_settle_seconds),
            status_port: other.status_port.or(self.status_port),
            browser_command: other.browser_command.or(self.browser_command),
            focus_command: other.focus_command.or(self.focus_command),
            display_program: other.display_program.or(self.display_program),
            boot_delay_seconds: other.boot_delay_seconds.or(self.boot_delay_seconds),
            presence_interval_seconds: other.presence_interval_seconds.or(self.presence_interval_seconds),
            job_min_latency_seconds: other.job_min_latency_seconds.or(self.job_min_latency_seconds),
            job_deadline_seconds: other.job_deadline_seconds.or(self.job_deadline_seconds),
        }
    }

    fn defaults() -> Config {
        Config {
            sheets_base_url: Some(DEFAULT_SHEETS_BASE_URL.to_string()),
            sheet_range: Some(DEFAULT_SHEET_RANGE.to_string()),
            log_level: Some("info".to_string()),
            retry_delay_seconds: Some(300),
            health_interval_seconds: Some(300),
            memory_threshold_mb: Some(150),
            gc_settle_seconds: Some(2),
            status_port: Some(DEFAULT_STATUS_PORT),
            boot_delay_seconds: Some(5),
            presence_interval_seconds: Some(30),
            job_min_latency_seconds: Some(60),
            job_deadline_seconds: Some(900),
            ..Default::default()
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| PathBuf::from("./state"))
    }

    pub fn settings_path(&self) -> PathBuf {
        self.settings_path
            .clone()
            .unwrap_or_else(|| self.state_dir().join("settings.json"))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| self.state_dir().join("logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn sheets_base_url(&self) -> &str {
        self.sheets_base_url.as_deref().unwrap_or(DEFAULT_SHEETS_BASE_URL)
    }

    pub fn sheet_range(&self) -> &str {
        self.sheet_range.as_deref().unwrap_or(DEFAULT_SHEET_RANGE)
    }

    pub fn status_port(&self) -> u16 {
        self.status_port.unwrap_or(DEFAULT_STATUS_PORT)
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        let mut settings = ControllerSettings::default();
        if let Some(secs) = self.retry_delay_seconds {
            settings.retry_delay = Duration::from_secs(secs);
        }
        settings
    }

    pub fn health_settings(&self) -> HealthSettings {
        let mut settings = HealthSettings::default();
        if let Some(secs) = self.health_interval_seconds {
            settings.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.gc_settle_seconds {
            settings.settle = Duration::from_secs(secs);
        }
        if let Some(mb) = self.memory_threshold_mb {
            settings.threshold_bytes = mb.saturating_mul(MIB);
        }
        settings
    }

    pub fn boot_delay(&self) -> Duration {
        Duration::from_secs(self.boot_delay_seconds.unwrap_or(5))
    }

    pub fn presence_interval(&self) -> Duration {
        Duration::from_secs(self.presence_interval_seconds.unwrap_or(30))
    }

    /// The persisted fallback job re-asserting the display.
    pub fn job_request(&self) -> JobRequest {
        JobRequest::persisted(
            DEFAULT_JOB_ID,
            Duration::from_secs(self.job_min_latency_seconds.unwrap_or(60)),
            Duration::from_secs(self.job_deadline_seconds.unwrap_or(900)),
        )
    }

    pub fn browser_argv(&self) -> Vec<String> {
        self.browser_command.as_deref().map(split_command).unwrap_or_default()
    }

    pub fn focus_argv(&self) -> Vec<String> {
        self.focus_command.as_deref().map(split_command).unwrap_or_default()
    }

    /// The display executable, defaulting to the sibling of the running binary.
    pub fn display_program(&self) -> PathBuf {
        if let Some(program) = &self.display_program {
            return program.clone();
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(DISPLAY_PROGRAM_NAME)))
            .unwrap_or_else(|| PathBuf::from(DISPLAY_PROGRAM_NAME))
    }

    /// Every set value as the `SIGNAGE_*` variable its flag reads, so a child
    /// process loads the same effective configuration.
    pub fn to_env(&self) -> Vec<(String, String)> {
        let fields = match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(fields)) => fields,
            Ok(_) => return Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "Config not forwardable to the display process");
                return Vec::new();
            }
        };
        fields
            .into_iter()
            .filter_map(|(name, value)| {
                let value = match value {
                    serde_json::Value::Null => return None,
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                Some((env_key(&name), value))
            })
            .collect()
    }

    /// The display executable carrying this configuration in its environment.
    pub fn display_target(&self) -> LaunchTarget {
        self.to_env()
            .into_iter()
            .fold(LaunchTarget::new(self.display_program()), |target, (key, value)| {
                target.env(key, value)
            })
    }
}

/// `spreadsheetId` becomes `SIGNAGE_SPREADSHEET_ID`.
fn env_key(field: &str) -> String {
    let mut key = String::from(ENV_PREFIX);
    for c in field.chars() {
        if c.is_ascii_uppercase() {
            key.push('_');
        }
        key.push(c.to_ascii_uppercase());
    }
    key
}

/// Splits a configured command line on whitespace. No shell quoting.
pub fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

fn read_config_file(path: &Path) -> Option<Config> {
    if !path.exists() {
        tracing::info!(
            path = %path.display(),
            "Config file not found. Using defaults and environment/CLI variables."
        );
        return None;
    }
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read config file. Falling back to other sources.");
            return None;
        }
    };
    match serde_json::from_str::<Config>(&raw) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to parse config file. Falling back to other sources.");
            None
        }
    }
}

/// Layers defaults, the config file and the parsed env/CLI values, in that order.
pub fn load_config(cli: Config) -> Config {
    // 1. Load defaults
    let mut current_config = Config::defaults();

    // 2. Config file, optionally relocated by --config-path
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    if let Some(file_config) = read_config_file(&config_file_path) {
        current_config = current_config.merge(file_config);
    }

    // 3. Environment variables and CLI arguments, already folded together by clap
    current_config = current_config.merge(cli);

    // 4. Platform state directory when nothing else chose one
    if current_config.state_dir.is_none() {
        match dirs::data_local_dir() {
            Some(dir) => current_config.state_dir = Some(dir.join("signage")),
            None => tracing::warn!("Could not determine local data directory, using ./state"),
        }
    }

    current_config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn later_layers_override_earlier_ones() {
        let base = Config {
            status_port: Some(1),
            log_level: Some("info".into()),
            ..Default::default()
        };
        let top = Config {
            status_port: Some(2),
            ..Default::default()
        };
        let merged = base.merge(top);
        assert_eq!(merged.status_port, Some(2));
        assert_eq!(merged.log_level.as_deref(), Some("info"));
    }

    #[test]
    fn file_then_cli_precedence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("signage.conf");
        fs::write(
            &path,
            r#"{"spreadsheetId":"sheet-1","statusPort":9000,"memoryThresholdMb":200,"stateDir":"/tmp/s"}"#,
        )
        .unwrap();

        let cli = Config {
            config_path: Some(path),
            status_port: Some(9100),
            ..Default::default()
        };
        let config = load_config(cli);

        assert_eq!(config.spreadsheet_id.as_deref(), Some("sheet-1"));
        assert_eq!(config.status_port(), 9100);
        assert_eq!(config.health_settings().threshold_bytes, 200 * MIB);
        assert_eq!(config.retry_delay_seconds, Some(300));
        assert_eq!(config.sheet_range(), "A1:C200");
        assert_eq!(config.settings_path(), PathBuf::from("/tmp/s/settings.json"));
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.conf");
        fs::write(&path, "{ not json").unwrap();

        let config = load_config(Config {
            config_path: Some(path),
            ..Default::default()
        });
        assert_eq!(config.status_port(), DEFAULT_STATUS_PORT);
        assert_eq!(config.sheets_base_url(), DEFAULT_SHEETS_BASE_URL);
    }

    #[test]
    fn derived_settings() {
        let config = Config {
            retry_delay_seconds: Some(10),
            job_min_latency_seconds: Some(30),
            job_deadline_seconds: Some(120),
            browser_command: Some("chromium --kiosk {url}".into()),
            ..Config::defaults()
        };
        assert_eq!(config.controller_settings().retry_delay, Duration::from_secs(10));
        let job = config.job_request();
        assert_eq!(job.job_id, DEFAULT_JOB_ID);
        assert!(job.persisted);
        assert_eq!(job.override_deadline, Duration::from_secs(120));
        assert_eq!(config.browser_argv(), vec!["chromium", "--kiosk", "{url}"]);
        assert!(config.focus_argv().is_empty());
    }

    #[test]
    fn display_target_carries_the_effective_config() {
        let config = Config {
            spreadsheet_id: Some("sheet-1".into()),
            api_key: Some("k-123".into()),
            state_dir: Some(PathBuf::from("/tmp/s")),
            display_program: Some(PathBuf::from("/opt/signage/signage_display")),
            ..Config::defaults()
        };
        let target = config.display_target();
        let env = |key: &str| {
            target
                .env
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(target.program, PathBuf::from("/opt/signage/signage_display"));
        assert!(target.args.is_empty());
        assert_eq!(env("SIGNAGE_SPREADSHEET_ID"), Some("sheet-1"));
        assert_eq!(env("SIGNAGE_API_KEY"), Some("k-123"));
        assert_eq!(env("SIGNAGE_STATE_DIR"), Some("/tmp/s"));
        assert_eq!(env("SIGNAGE_STATUS_PORT"), Some("8765"));
        assert_eq!(env("SIGNAGE_CONFIG_PATH"), None);
    }

    #[test]
    fn forwarded_keys_are_the_ones_the_flags_read() {
        let command = Config::augment_args(clap::Command::new("signage"));
        let known: Vec<String> = command
            .get_arguments()
            .filter_map(|arg| arg.get_env())
            .map(|env| env.to_string_lossy().into_owned())
            .collect();

        let everything = Config {
            config_path: Some(PathBuf::from("/etc/signage.conf")),
            api_key: Some("k".into()),
            spreadsheet_id: Some("s".into()),
            settings_path: Some(PathBuf::from("/tmp/settings.json")),
            state_dir: Some(PathBuf::from("/tmp/s")),
            log_dir: Some(PathBuf::from("/tmp/logs")),
            browser_command: Some("chromium {url}".into()),
            focus_command: Some("wmctrl {pid}".into()),
            display_program: Some(PathBuf::from("/opt/signage_display")),
            ..Config::defaults()
        };
        let forwarded = everything.to_env();
        assert_eq!(forwarded.len(), known.len());
        for (key, _) in &forwarded {
            assert!(known.contains(key), "{key} is not read by any flag");
        }
    }
}
