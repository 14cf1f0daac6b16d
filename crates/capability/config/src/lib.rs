//! 报表客户端配置加载。

use std::env;
use std::time::Duration;

/// 服务地址默认值。
pub const DEFAULT_SERVICE_URL: &str = "localhost:50051";
/// 历史查询默认分页大小。
pub const DEFAULT_PAGE_SIZE: u32 = 1000;
/// 每个实时订阅者的默认缓冲批次数。
pub const DEFAULT_STREAM_BUFFER: usize = 64;
/// 每个实时订阅者缓冲批次数的上限。
pub const MAX_STREAM_BUFFER: usize = 1 << 20;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 报表客户端配置。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportingConfig {
    pub service_url: String,
    pub page_size: u32,
    pub stream_buffer: usize,
    /// 为 true 时断开缓冲区满的订阅者，否则对网络读取施加背压。
    pub drop_lagging_consumers: bool,
    pub request_timeout: Option<Duration>,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            service_url: DEFAULT_SERVICE_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            stream_buffer: DEFAULT_STREAM_BUFFER,
            drop_lagging_consumers: false,
            request_timeout: None,
        }
    }
}

impl ReportingConfig {
    /// 先加载 `.env`（若存在），再读取环境变量。
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let service_url =
            read_optional("REPORTING_SERVICE_URL").unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string());
        let page_size = read_u64_with_default("REPORTING_PAGE_SIZE", DEFAULT_PAGE_SIZE as u64)?;
        let page_size = u32::try_from(page_size).map_err(|_| {
            ConfigError::Invalid("REPORTING_PAGE_SIZE".to_string(), page_size.to_string())
        })?;
        let stream_buffer =
            read_u64_with_default("REPORTING_STREAM_BUFFER", DEFAULT_STREAM_BUFFER as u64)?;
        let stream_buffer = usize::try_from(stream_buffer)
            .ok()
            .filter(|value| *value <= MAX_STREAM_BUFFER)
            .ok_or_else(|| {
                ConfigError::Invalid("REPORTING_STREAM_BUFFER".to_string(), stream_buffer.to_string())
            })?;
        let drop_lagging_consumers =
            read_bool_with_default("REPORTING_DROP_LAGGING_CONSUMERS", false);
        let request_timeout = read_optional_u64("REPORTING_REQUEST_TIMEOUT_MS")?
            .filter(|value| *value > 0)
            .map(Duration::from_millis);

        Ok(Self {
            service_url,
            page_size,
            stream_buffer,
            drop_lagging_consumers,
            request_timeout,
        }
        .sanitized())
    }

    /// 0 值回落为默认值，缓冲区截断到 [`MAX_STREAM_BUFFER`]。
    pub fn sanitized(mut self) -> Self {
        if self.page_size == 0 {
            self.page_size = DEFAULT_PAGE_SIZE;
        }
        if self.stream_buffer == 0 {
            self.stream_buffer = DEFAULT_STREAM_BUFFER;
        }
        self.stream_buffer = self.stream_buffer.min(MAX_STREAM_BUFFER);
        self
    }
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_optional_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match env::var(key) {
        Ok(value) if value.is_empty() => Ok(None),
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(key.to_string(), value)),
        Err(_) => Ok(None),
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}
