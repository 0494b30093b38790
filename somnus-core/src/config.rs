use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::SomnusError;

#[derive(Debug, Deserialize, Clone)]
pub struct SomnusConfig {
    pub service: ServiceConfig,
    pub bot: BotConfig,
    pub polling: PollingConfig,
    pub store: StoreConfig,
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub socket_path: String,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    pub prefix: String,
    /// Identity of the bot on the chat platform. Events authored by it are ignored.
    pub self_id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    /// Ordered quality scale, worst first. Doubles as the poll's reaction options.
    pub emojis: Vec<String>,
    #[serde(default = "default_scale_start")]
    pub scale_start: i32,
    pub daemon_interval_minutes: f64,
    pub sleep_period_minutes: f64,
    #[serde(default = "default_greeting")]
    pub greeting: String,
    #[serde(default = "default_prompt")]
    pub prompt: String,
}

fn default_scale_start() -> i32 {
    1
}

fn default_greeting() -> String {
    "Good morning!".to_string()
}

fn default_prompt() -> String {
    "React to how you feel rn (1 is bad, 5 is good)".to_string()
}

/// Upper bound for the polling intervals: one year.
pub const MAX_PERIOD_MINUTES: f64 = 525_600.0;

impl PollingConfig {
    /// Quality score for an emoji. First match in the scale wins.
    pub fn quality_for(&self, emoji: &str) -> Option<i32> {
        self.emojis
            .iter()
            .position(|e| e == emoji)
            .map(|idx| self.scale_start + idx as i32)
    }

    pub fn max_quality(&self) -> Option<i32> {
        match self.emojis.len() {
            0 => None,
            n => Some(self.scale_start + n as i32 - 1),
        }
    }

    /// Only meaningful on a validated config.
    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.daemon_interval_minutes * 60.0)
    }

    /// Minimum age before a pending session becomes poll-eligible.
    pub fn sleep_threshold(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.sleep_period_minutes * 60_000.0) as i64)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CancelPolicy {
    /// Cancel only while no poll has been sent for the session.
    #[default]
    BeforePoll,
    /// Cancel any time the session is still pending.
    WhilePending,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExportScope {
    #[default]
    All,
    Channel,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub datafile: String,
    #[serde(default)]
    pub cancel_policy: CancelPolicy,
    #[serde(default)]
    pub export_scope: ExportScope,
}

impl StoreConfig {
    pub fn datafile_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.datafile).into_owned())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifierConfig {
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_timeout_seconds() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8767,
        }
    }
}

impl SomnusConfig {
    /// Load from a TOML file, with `SOMNUS__SECTION__KEY` environment overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("SOMNUS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        s.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), SomnusError> {
        let polling = &self.polling;
        if polling.emojis.is_empty() {
            return Err(SomnusError::InvalidConfig(
                "polling.emojis must contain at least one emoji".into(),
            ));
        }
        for (i, emoji) in polling.emojis.iter().enumerate() {
            if polling.emojis[..i].contains(emoji) {
                return Err(SomnusError::InvalidConfig(format!(
                    "polling.emojis contains {emoji} more than once"
                )));
            }
        }
        let interval = polling.daemon_interval_minutes;
        if !interval.is_finite() || interval <= 0.0 || interval > MAX_PERIOD_MINUTES {
            return Err(SomnusError::InvalidConfig(format!(
                "polling.daemon_interval_minutes must be positive and at most {MAX_PERIOD_MINUTES}"
            )));
        }
        let period = polling.sleep_period_minutes;
        if !period.is_finite() || period < 0.0 || period > MAX_PERIOD_MINUTES {
            return Err(SomnusError::InvalidConfig(format!(
                "polling.sleep_period_minutes must be between 0 and {MAX_PERIOD_MINUTES}"
            )));
        }
        if self.bot.prefix.is_empty() {
            return Err(SomnusError::InvalidConfig("bot.prefix must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[service]
socket_path = "/tmp/somnus.sock"
log_level = "info"

[bot]
prefix = "zz!"
self_id = "bot-1"

[polling]
emojis = ["😫", "🙁", "😐", "🙂", "😄"]
daemon_interval_minutes = 1.0
sleep_period_minutes = 240.0

[store]
datafile = "~/somnus/data.json"
cancel_policy = "while_pending"

[notifier]
base_url = "http://127.0.0.1:9000"
"#;

    fn write_sample(dir: &tempfile::TempDir, body: &str) -> String {
        let path = dir.path().join("somnus.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn loads_sample_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(&dir, SAMPLE);
        let config = SomnusConfig::load(&path).expect("sample config should load");

        assert_eq!(config.bot.prefix, "zz!");
        assert_eq!(config.polling.scale_start, 1);
        assert_eq!(config.polling.greeting, "Good morning!");
        assert_eq!(config.store.cancel_policy, CancelPolicy::WhilePending);
        assert_eq!(config.store.export_scope, ExportScope::All);
        assert_eq!(config.notifier.max_retries, 3);
        assert!(config.http.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn quality_maps_by_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(&dir, SAMPLE);
        let polling = SomnusConfig::load(&path).unwrap().polling;

        assert_eq!(polling.quality_for("😫"), Some(1));
        assert_eq!(polling.quality_for("😄"), Some(5));
        assert_eq!(polling.quality_for("🦀"), None);
        assert_eq!(polling.max_quality(), Some(5));
        assert_eq!(polling.sleep_threshold(), chrono::Duration::minutes(240));
        assert_eq!(polling.tick_interval(), std::time::Duration::from_secs(60));
    }

    #[test]
    fn datafile_tilde_is_expanded() {
        let store = StoreConfig {
            datafile: "~/somnus/data.json".into(),
            cancel_policy: CancelPolicy::default(),
            export_scope: ExportScope::default(),
        };
        assert!(store.datafile_path().ends_with("somnus/data.json"));

        let absolute = StoreConfig {
            datafile: "/var/lib/somnus/data.json".into(),
            ..store
        };
        assert_eq!(
            absolute.datafile_path(),
            PathBuf::from("/var/lib/somnus/data.json")
        );
    }

    #[test]
    fn validate_rejects_duplicate_emojis() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(&dir, SAMPLE);
        let mut config = SomnusConfig::load(&path).unwrap();
        config.polling.emojis = vec!["🙂".into(), "🙂".into()];
        assert!(matches!(config.validate(), Err(SomnusError::InvalidConfig(_))));
    }

    #[test]
    fn validate_rejects_unbounded_periods() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(&dir, SAMPLE);
        let base = SomnusConfig::load(&path).unwrap();

        for bad in [f64::INFINITY, f64::NAN, MAX_PERIOD_MINUTES * 2.0, 1e300] {
            let mut config = base.clone();
            config.polling.daemon_interval_minutes = bad;
            assert!(
                matches!(config.validate(), Err(SomnusError::InvalidConfig(_))),
                "interval {bad} should be rejected"
            );

            let mut config = base.clone();
            config.polling.sleep_period_minutes = bad;
            assert!(
                matches!(config.validate(), Err(SomnusError::InvalidConfig(_))),
                "sleep period {bad} should be rejected"
            );
        }

        let mut edge = base.clone();
        edge.polling.daemon_interval_minutes = MAX_PERIOD_MINUTES;
        edge.polling.sleep_period_minutes = MAX_PERIOD_MINUTES;
        assert!(edge.validate().is_ok());
        assert_eq!(
            edge.polling.tick_interval(),
            std::time::Duration::from_secs(525_600 * 60)
        );
        assert_eq!(edge.polling.sleep_threshold(), chrono::Duration::days(365));
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(&dir, SAMPLE);
        let mut config = SomnusConfig::load(&path).unwrap();
        config.polling.daemon_interval_minutes = 0.0;
        assert!(config.validate().is_err());
    }
}
