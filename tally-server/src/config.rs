use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid duration {0:?}")]
    InvalidDuration(String),

    #[error("Negative duration {0:?}")]
    NegativeDuration(String),
}

/// Main server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: Server,
    pub logging: LoggingConfig,
    pub usage_statistics: UsageStatisticsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8317,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `text` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Usage statistics persistence settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageStatisticsConfig {
    /// Target file; empty disables persistence. `~` is expanded.
    pub persist_file: String,
    /// Go-style duration such as `30s` or `1h30m`; empty or `0` disables
    /// periodic saving.
    pub save_interval: String,
    pub restore_on_start: bool,
}

impl UsageStatisticsConfig {
    pub fn persist_enabled(&self) -> bool {
        !self.persist_file.trim().is_empty()
    }

    /// Parsed save interval, `Duration::ZERO` when periodic saving is off.
    ///
    /// Logs a warning when a value was given but does not describe a
    /// positive duration.
    pub fn save_interval(&self) -> Duration {
        let raw = self.save_interval.trim();
        match parse_duration(raw) {
            Ok(interval) if !interval.is_zero() => interval,
            _ => {
                if !raw.is_empty() && raw != "0" {
                    warn!("Invalid save_interval {:?}, disabling periodic save", raw);
                }
                Duration::ZERO
            }
        }
    }
}

impl ServerConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Get server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Parse a duration string made of `<number><unit>` segments.
///
/// Units: `ns`, `us`/`µs`, `ms`, `s`, `m`, `h`. Numbers may carry a
/// fraction (`1.5h`). A bare `0` is accepted without a unit.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(input.to_string());

    let s = input.trim();
    let (negative, mut rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total_nanos = 0f64;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        if !number.bytes().any(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let value: f64 = number.parse().map_err(|_| invalid())?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let scale = match unit {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(invalid()),
        };

        total_nanos += value * scale;
        rest = tail;
    }

    if total_nanos > u64::MAX as f64 {
        return Err(invalid());
    }
    if negative && total_nanos > 0.0 {
        return Err(ConfigError::NegativeDuration(input.to_string()));
    }

    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("10us").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_duration("10µs").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_duration("7ns").unwrap(), Duration::from_nanos(7));
    }

    #[test]
    fn test_parse_duration_compound_and_fractional() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("+2m3s").unwrap(), Duration::from_secs(123));
    }

    #[test]
    fn test_parse_duration_zero() {
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("-0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        for input in ["", "abc", "10", "5 minutes", "1x", ".s", "s"] {
            assert!(
                matches!(parse_duration(input), Err(ConfigError::InvalidDuration(_))),
                "{input:?} should be invalid"
            );
        }
        assert!(matches!(
            parse_duration("-5s"),
            Err(ConfigError::NegativeDuration(_))
        ));
    }

    #[test]
    fn test_save_interval_disables_on_bad_values() {
        let mut config = UsageStatisticsConfig::default();
        assert_eq!(config.save_interval(), Duration::ZERO);

        for raw in ["0", "0s", "-1m", "soon"] {
            config.save_interval = raw.to_string();
            assert_eq!(config.save_interval(), Duration::ZERO, "{raw:?}");
        }

        config.save_interval = " 90s ".to_string();
        assert_eq!(config.save_interval(), Duration::from_secs(90));
    }

    #[test]
    fn test_persist_enabled_follows_file_path() {
        let mut config = UsageStatisticsConfig::default();
        assert!(!config.persist_enabled());
        config.persist_file = "   ".to_string();
        assert!(!config.persist_enabled());
        config.persist_file = "~/.tally/usage.json".to_string();
        assert!(config.persist_enabled());
    }

    #[test]
    fn test_from_yaml_with_defaults() {
        let config = ServerConfig::from_yaml(
            r#"
server:
  port: 9000
usage_statistics:
  persist_file: "~/.tally/usage.json"
  save_interval: "5m"
  restore_on_start: true
"#,
        )
        .unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server_addr(), "127.0.0.1:9000");
        assert_eq!(config.logging.level, "info");
        assert!(config.usage_statistics.persist_enabled());
        assert!(config.usage_statistics.restore_on_start);
        assert_eq!(
            config.usage_statistics.save_interval(),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn test_from_file_missing() {
        let err = ServerConfig::from_file("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
