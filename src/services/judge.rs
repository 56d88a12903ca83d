//! 判题服务客户端
//! 负责向外部判题服务（Judge0 兼容接口）派发提交，并把松散的 JSON 响应
//! 在边界处解析为显式的状态枚举

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{StatusKind, TerminalResult};

/// 支持的语言及其判题服务编号
pub const LANGUAGES: &[(&str, u32)] = &[
    ("python", 71),
    ("javascript", 63),
    ("java", 62),
    ("cpp", 54),
    ("c", 50),
];

/// 按语言名查找判题服务语言编号
pub fn judge_language_id(language: &str) -> Option<u32> {
    let language = language.trim().to_ascii_lowercase();
    LANGUAGES
        .iter()
        .find(|(name, _)| *name == language)
        .map(|(_, id)| *id)
}

/// 提交令牌（判题服务返回的不透明标识）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token(String);

impl Token {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 传输层错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("judge network error: {0}")]
    Network(String),

    #[error("malformed judge response: {0}")]
    MalformedResponse(String),
}

/// 判题状态（边界处校验后的结果）
#[derive(Debug, Clone, PartialEq)]
pub enum JudgeStatus {
    Queued,
    Processing,
    Terminal(TerminalResult),
}

/// 判题服务接口
#[async_trait]
pub trait JudgeClient: Send + Sync {
    /// 派发一次执行，每次调用都会在远端创建一个任务
    async fn submit(
        &self,
        source_code: &str,
        language_id: u32,
        stdin: &str,
    ) -> Result<Token, DispatchError>;

    /// 查询一次提交的当前状态
    async fn fetch(&self, token: &Token) -> Result<JudgeStatus, DispatchError>;
}

/// 判题客户端配置
#[derive(Debug, Clone)]
pub struct JudgeConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_host: Option<String>,
    pub request_timeout: Duration,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://judge0-ce.p.rapidapi.com".to_string(),
            api_key: None,
            api_host: Some("judge0-ce.p.rapidapi.com".to_string()),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// 提交请求
#[derive(Debug, Serialize)]
struct SubmissionRequest<'a> {
    source_code: &'a str,
    language_id: u32,
    stdin: &'a str,
}

/// 提交响应
#[derive(Debug, Deserialize)]
struct SubmissionResponse {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    id: Option<u32>,
    description: Option<String>,
}

/// 查询响应
#[derive(Debug, Deserialize)]
struct SubmissionDetails {
    status: Option<StatusBody>,
    stdout: Option<String>,
    stderr: Option<String>,
    compile_output: Option<String>,
    message: Option<String>,
    time: Option<serde_json::Value>,
    memory: Option<serde_json::Value>,
}

/// 状态阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Queued,
    Processing,
    Terminal(StatusKind),
}

/// 状态分类：优先使用 status.id，缺失时退回到 description
fn classify_status(id: Option<u32>, description: &str) -> Phase {
    match id {
        Some(1) => Phase::Queued,
        Some(2) => Phase::Processing,
        Some(3) => Phase::Terminal(StatusKind::Accepted),
        Some(4) => Phase::Terminal(StatusKind::WrongAnswer),
        Some(5) => Phase::Terminal(StatusKind::TimeLimitExceeded),
        Some(6) => Phase::Terminal(StatusKind::CompileError),
        Some(7..=12) => Phase::Terminal(StatusKind::RuntimeError),
        Some(_) => Phase::Terminal(StatusKind::InternalError),
        None => match description {
            "In Queue" => Phase::Queued,
            "Processing" => Phase::Processing,
            "Accepted" => Phase::Terminal(StatusKind::Accepted),
            "Wrong Answer" => Phase::Terminal(StatusKind::WrongAnswer),
            "Time Limit Exceeded" => Phase::Terminal(StatusKind::TimeLimitExceeded),
            "Compilation Error" => Phase::Terminal(StatusKind::CompileError),
            d if d.starts_with("Runtime Error") => Phase::Terminal(StatusKind::RuntimeError),
            _ => Phase::Terminal(StatusKind::InternalError),
        },
    }
}

/// 数值字段可能是数字也可能是字符串（如 "0.002"）
fn lenient_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_u64(value: &serde_json::Value) -> Option<u64> {
    lenient_f64(value).filter(|v| *v >= 0.0).map(|v| v as u64)
}

/// 解析提交响应
pub fn parse_submit_response(body: &str) -> Result<Token, DispatchError> {
    let response: SubmissionResponse = serde_json::from_str(body)
        .map_err(|e| DispatchError::MalformedResponse(format!("invalid submit body: {}", e)))?;

    match response.token {
        Some(token) if !token.trim().is_empty() => Ok(Token::new(token.trim())),
        _ => Err(DispatchError::MalformedResponse(
            "submit response has no token".to_string(),
        )),
    }
}

/// 解析查询响应
pub fn parse_status_response(body: &str) -> Result<JudgeStatus, DispatchError> {
    let details: SubmissionDetails = serde_json::from_str(body)
        .map_err(|e| DispatchError::MalformedResponse(format!("invalid status body: {}", e)))?;

    let status = details.status.ok_or_else(|| {
        DispatchError::MalformedResponse("status response has no status".to_string())
    })?;

    if status.id.is_none() && status.description.is_none() {
        return Err(DispatchError::MalformedResponse(
            "status has neither id nor description".to_string(),
        ));
    }

    let description = status.description.unwrap_or_default();

    match classify_status(status.id, &description) {
        Phase::Queued => Ok(JudgeStatus::Queued),
        Phase::Processing => Ok(JudgeStatus::Processing),
        Phase::Terminal(kind) => {
            let stderr = match (details.stderr, details.message) {
                (Some(stderr), _) if !stderr.is_empty() => stderr,
                (_, Some(message)) => message,
                (stderr, None) => stderr.unwrap_or_default(),
            };

            Ok(JudgeStatus::Terminal(TerminalResult {
                status: kind,
                description: if description.is_empty() {
                    kind.as_str().to_string()
                } else {
                    description
                },
                stdout: details.stdout.unwrap_or_default(),
                stderr,
                compile_output: details.compile_output,
                time_seconds: details.time.as_ref().and_then(lenient_f64),
                memory_kb: details.memory.as_ref().and_then(lenient_u64),
            }))
        }
    }
}

/// 截断过长的响应体，用于错误信息
fn snippet(body: &str) -> String {
    const MAX: usize = 200;
    if body.chars().count() <= MAX {
        body.to_string()
    } else {
        let cut: String = body.chars().take(MAX).collect();
        format!("{}...", cut)
    }
}

/// Judge0 HTTP 客户端
#[derive(Clone)]
pub struct Judge0Client {
    http_client: reqwest::Client,
    config: JudgeConfig,
}

impl Judge0Client {
    pub fn new(config: JudgeConfig) -> Result<Self, DispatchError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DispatchError::Network(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            http_client,
            config,
        })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// 附加 API 认证头
    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut request = request;
        if let Some(key) = &self.config.api_key {
            request = request.header("X-RapidAPI-Key", key);
            if let Some(host) = &self.config.api_host {
                request = request.header("X-RapidAPI-Host", host);
            }
        }
        request
    }

    /// 发送请求并读取响应体，非 2xx 视为网络错误
    async fn read_body(&self, request: reqwest::RequestBuilder) -> Result<String, DispatchError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| DispatchError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DispatchError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(DispatchError::Network(format!(
                "judge returned HTTP {}: {}",
                status,
                snippet(&body)
            )));
        }

        Ok(body)
    }
}

#[async_trait]
impl JudgeClient for Judge0Client {
    async fn submit(
        &self,
        source_code: &str,
        language_id: u32,
        stdin: &str,
    ) -> Result<Token, DispatchError> {
        let url = format!(
            "{}/submissions?base64_encoded=false&wait=false",
            self.base_url()
        );
        let request = SubmissionRequest {
            source_code,
            language_id,
            stdin,
        };

        let body = self
            .read_body(self.http_client.post(&url).json(&request))
            .await?;
        let token = parse_submit_response(&body)?;

        debug!("Submitted language {} as token {}", language_id, token);
        Ok(token)
    }

    async fn fetch(&self, token: &Token) -> Result<JudgeStatus, DispatchError> {
        let url = format!(
            "{}/submissions/{}?base64_encoded=false",
            self.base_url(),
            token
        );

        let body = self.read_body(self.http_client.get(&url)).await?;
        parse_status_response(&body)
    }
}
