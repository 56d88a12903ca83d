//! 配置与日志
//! 配置从 `SHUATI_*` 环境变量读取，缺失或非法时使用默认值

use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use log::{info, warn, LevelFilter};

use crate::services::backoff::BackoffPolicy;
use crate::services::database::DEFAULT_DB_PATH;
use crate::services::judge::JudgeConfig;

/// 默认题库文件
pub const DEFAULT_CATALOG_PATH: &str = "data/catalog.json";

/// 判题流水线配置
#[derive(Debug, Clone)]
pub struct GraderConfig {
    pub judge_base_url: String,
    pub judge_api_key: Option<String>,
    pub judge_api_host: Option<String>,
    pub http_timeout: Duration,       // 单个 HTTP 请求
    pub case_deadline: Duration,      // 单个测试用例（派发 + 轮询）
    pub poll_initial_delay: Duration,
    pub poll_max_delay: Duration,
    pub poll_backoff_factor: f64,
    pub poll_jitter: f64,
    pub max_parallel_cases: usize,
    pub ledger_max_retries: u32,
    pub ledger_retry_delay: Duration, // 写入冲突后的首次重试间隔
    pub database_path: PathBuf,
    pub catalog_path: PathBuf,
    pub log_level: LevelFilter,
    pub log_file: Option<PathBuf>,
}

impl Default for GraderConfig {
    fn default() -> Self {
        let judge = JudgeConfig::default();
        let poll = BackoffPolicy::default();
        Self {
            judge_base_url: judge.base_url,
            judge_api_key: None,
            judge_api_host: judge.api_host,
            http_timeout: judge.request_timeout,
            case_deadline: poll.deadline,
            poll_initial_delay: poll.initial_delay,
            poll_max_delay: poll.max_delay,
            poll_backoff_factor: poll.backoff_factor,
            poll_jitter: poll.jitter_percent,
            max_parallel_cases: 4,
            ledger_max_retries: 5,
            ledger_retry_delay: BackoffPolicy::conflict_retry().initial_delay,
            database_path: PathBuf::from(DEFAULT_DB_PATH),
            catalog_path: PathBuf::from(DEFAULT_CATALOG_PATH),
            log_level: LevelFilter::Info,
            log_file: None,
        }
    }
}

impl GraderConfig {
    /// 从进程环境变量读取
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 从任意键值来源读取，便于测试
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let ms = |key: &str, default: Duration| {
            Duration::from_millis(try_load(&lookup, key, default.as_millis() as u64))
        };

        Self {
            judge_base_url: lookup("SHUATI_JUDGE_URL").unwrap_or(defaults.judge_base_url),
            judge_api_key: lookup("SHUATI_JUDGE_API_KEY").filter(|s| !s.is_empty()),
            judge_api_host: lookup("SHUATI_JUDGE_API_HOST").or(defaults.judge_api_host),
            http_timeout: ms("SHUATI_HTTP_TIMEOUT_MS", defaults.http_timeout),
            case_deadline: ms("SHUATI_CASE_DEADLINE_MS", defaults.case_deadline),
            poll_initial_delay: ms("SHUATI_POLL_INITIAL_MS", defaults.poll_initial_delay),
            poll_max_delay: ms("SHUATI_POLL_MAX_MS", defaults.poll_max_delay),
            poll_backoff_factor: try_load(&lookup, "SHUATI_POLL_BACKOFF_FACTOR", defaults.poll_backoff_factor),
            poll_jitter: try_load(&lookup, "SHUATI_POLL_JITTER", defaults.poll_jitter),
            max_parallel_cases: try_load(&lookup, "SHUATI_MAX_PARALLEL_CASES", defaults.max_parallel_cases),
            ledger_max_retries: try_load(&lookup, "SHUATI_LEDGER_MAX_RETRIES", defaults.ledger_max_retries),
            ledger_retry_delay: ms("SHUATI_LEDGER_RETRY_MS", defaults.ledger_retry_delay),
            database_path: lookup("SHUATI_DB_PATH").map(PathBuf::from).unwrap_or(defaults.database_path),
            catalog_path: lookup("SHUATI_CATALOG_PATH").map(PathBuf::from).unwrap_or(defaults.catalog_path),
            log_level: try_load(&lookup, "SHUATI_LOG_LEVEL", defaults.log_level),
            log_file: lookup("SHUATI_LOG_FILE").map(PathBuf::from),
        }
    }

    /// 校验取值范围
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.judge_base_url.starts_with("http://") || self.judge_base_url.starts_with("https://"),
            "judge url must be http(s): {}",
            self.judge_base_url
        );
        ensure!(!self.case_deadline.is_zero(), "case deadline must be positive");
        ensure!(!self.http_timeout.is_zero(), "http timeout must be positive");
        ensure!(!self.poll_initial_delay.is_zero(), "poll initial delay must be positive");
        ensure!(!self.ledger_retry_delay.is_zero(), "ledger retry delay must be positive");
        ensure!(self.max_parallel_cases >= 1, "max parallel cases must be at least 1");
        ensure!(self.poll_backoff_factor >= 1.0, "poll backoff factor must be >= 1.0");
        ensure!(
            (0.0..=1.0).contains(&self.poll_jitter),
            "poll jitter must be within 0.0..=1.0"
        );
        ensure!(
            self.poll_initial_delay <= self.poll_max_delay,
            "poll initial delay exceeds max delay"
        );
        Ok(())
    }

    pub fn judge_config(&self) -> JudgeConfig {
        JudgeConfig {
            base_url: self.judge_base_url.trim_end_matches('/').to_string(),
            api_key: self.judge_api_key.clone(),
            api_host: self.judge_api_host.clone(),
            request_timeout: self.http_timeout,
        }
    }

    pub fn poll_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.poll_initial_delay,
            self.poll_max_delay,
            self.poll_backoff_factor,
            self.poll_jitter,
            self.case_deadline,
        )
    }

    /// 进度写入冲突的重试策略
    pub fn ledger_backoff(&self) -> BackoffPolicy {
        let preset = BackoffPolicy::conflict_retry();
        BackoffPolicy::new(
            self.ledger_retry_delay,
            preset.max_delay.max(self.ledger_retry_delay),
            preset.backoff_factor,
            preset.jitter_percent,
            preset.deadline,
        )
    }
}

fn try_load<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
            default
        }),
    }
}

/// 初始化日志：带时间戳，输出到 stderr，可选同时写入文件
pub fn init_logging(config: &GraderConfig) -> Result<()> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(config.log_level)
        .level_for("hyper", LevelFilter::Warn)
        .level_for("hyper_util", LevelFilter::Warn)
        .level_for("reqwest", LevelFilter::Warn)
        .level_for("rustls", LevelFilter::Warn)
        .chain(std::io::stderr());

    if let Some(path) = &config.log_file {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log dir {}", parent.display()))?;
        }
        let file = fern::log_file(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        dispatch = dispatch.chain(file);
    }

    dispatch.apply().context("Failed to install logger")?;
    info!("Logging initialized at {}", config.log_level);
    Ok(())
}
