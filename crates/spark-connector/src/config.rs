use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Deserializer};

use crate::error::{ConnectorError, Result};

/// 连接器可调参数。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 缓冲区大小、读超时、退避节奏等参数在不同设备上差异很大，集中到一个可由 TOML
///   描述的结构中，宿主只需在启动时解析一次，再通过 [`crate::ConnectorContext`] 传递。
///
/// ## 契约 (What)
/// - TOML 中的时长字段以毫秒整数表示，键名带 `_ms` 后缀；
/// - `read_timeout` 仅在调用方打开连接时请求超时（`want_timeouts = true`）才生效；
/// - `ca_file` 指向 PEM 证书包，由 TLS 信任库在首次使用时加载。
///
/// ## 注意事项 (Trade-offs)
/// - 缺省字段取 [`Default`] 值，未知字段被拒绝，避免拼写错误悄悄失效。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectorConfig {
    pub read_buffer_capacity: usize,
    #[serde(rename = "read_timeout_ms", deserialize_with = "optional_millis")]
    pub read_timeout: Option<Duration>,
    #[serde(rename = "connect_timeout_ms", deserialize_with = "optional_millis")]
    pub connect_timeout: Option<Duration>,
    pub retry_yield_threshold: u32,
    #[serde(rename = "retry_backoff_unit_ms", deserialize_with = "millis")]
    pub retry_backoff_unit: Duration,
    #[serde(rename = "retry_backoff_max_ms", deserialize_with = "millis")]
    pub retry_backoff_max: Duration,
    pub listen_backlog: i32,
    pub ca_file: Option<PathBuf>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            read_buffer_capacity: 2048,
            read_timeout: None,
            connect_timeout: None,
            retry_yield_threshold: 3,
            retry_backoff_unit: Duration::from_millis(5),
            retry_backoff_max: Duration::from_millis(100),
            listen_backlog: 128,
            ca_file: None,
        }
    }
}

impl ConnectorConfig {
    /// 解析 TOML 文档并校验取值。
    pub fn from_toml_str(document: &str) -> Result<Self> {
        let config: Self = toml::from_str(document).map_err(|err| {
            ConnectorError::invalid_argument(format!("connector config: {}", err.message()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 校验跨字段约束。
    pub fn validate(&self) -> Result<()> {
        if self.read_buffer_capacity == 0 {
            return Err(ConnectorError::invalid_argument(
                "read_buffer_capacity must be positive",
            ));
        }
        if self.listen_backlog <= 0 {
            return Err(ConnectorError::invalid_argument(
                "listen_backlog must be positive",
            ));
        }
        if self.retry_backoff_max < self.retry_backoff_unit {
            return Err(ConnectorError::invalid_argument(
                "retry_backoff_max_ms must not be smaller than retry_backoff_unit_ms",
            ));
        }
        Ok(())
    }

    pub fn with_read_buffer_capacity(mut self, capacity: usize) -> Self {
        self.read_buffer_capacity = capacity;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_retry_backoff(mut self, threshold: u32, unit: Duration, max: Duration) -> Self {
        self.retry_yield_threshold = threshold;
        self.retry_backoff_unit = unit;
        self.retry_backoff_max = max;
        self
    }

    pub fn with_listen_backlog(mut self, backlog: i32) -> Self {
        self.listen_backlog = backlog;
        self
    }

    pub fn with_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }
}

fn millis<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

fn optional_millis<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<u64>::deserialize(deserializer).map(|value| value.map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = ConnectorConfig::from_toml_str("").expect("empty config");
        assert_eq!(config, ConnectorConfig::default());
        assert_eq!(config.read_buffer_capacity, 2048);
    }

    #[test]
    fn millisecond_fields_become_durations() {
        let config = ConnectorConfig::from_toml_str(
            r#"
            read_buffer_capacity = 512
            read_timeout_ms = 1500
            retry_backoff_unit_ms = 2
            retry_backoff_max_ms = 40
            ca_file = "/etc/spark/roots.pem"
            "#,
        )
        .expect("valid config");
        assert_eq!(config.read_buffer_capacity, 512);
        assert_eq!(config.read_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.connect_timeout, None);
        assert_eq!(config.retry_backoff_max, Duration::from_millis(40));
        assert_eq!(config.ca_file, Some(PathBuf::from("/etc/spark/roots.pem")));
    }

    #[test]
    fn unknown_keys_and_bad_values_are_rejected() {
        assert!(ConnectorConfig::from_toml_str("read_buffer = 1").is_err());
        assert!(matches!(
            ConnectorConfig::from_toml_str("read_buffer_capacity = 0"),
            Err(ConnectorError::InvalidArgument { .. })
        ));
        assert!(
            ConnectorConfig::from_toml_str("retry_backoff_unit_ms = 50\nretry_backoff_max_ms = 10")
                .is_err()
        );
    }
}
