//! 判题命令模块
//! 提供提交判题与自定义运行的命令接口

use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::progress::UserProgressDto;
use crate::models::{TerminalResult, TestResult};
use crate::services::{
    CancelToken, CompletionPoller, ContentCatalog, GradeOutcome, GradingService, Judge0Client,
    JudgeClient, ProgressLedger, ProgressStore, SqliteProgressStore, TestCaseEvaluator,
};
use crate::utils::GraderConfig;

/// 应用状态
pub struct AppState {
    pub grader: Arc<GradingService>,
    pub config: GraderConfig,
}

impl AppState {
    /// 按配置加载题库、打开数据库并创建判题客户端
    pub fn from_config(config: GraderConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let catalog = ContentCatalog::load(&config.catalog_path)?;
        let store = SqliteProgressStore::open(&config.database_path)
            .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;
        let judge = Judge0Client::new(config.judge_config())?;

        Ok(Self::from_parts(
            config,
            Arc::new(catalog),
            Arc::new(judge),
            Arc::new(store),
        ))
    }

    pub fn from_parts(
        config: GraderConfig,
        catalog: Arc<ContentCatalog>,
        judge: Arc<dyn JudgeClient>,
        store: Arc<dyn ProgressStore>,
    ) -> Self {
        let poller = CompletionPoller::new(judge.clone(), config.poll_policy());
        let evaluator =
            TestCaseEvaluator::new(judge, poller, config.case_deadline, config.max_parallel_cases);
        let ledger = ProgressLedger::new(store, catalog.clone())
            .with_max_retries(config.ledger_max_retries)
            .with_backoff(config.ledger_backoff());

        Self {
            grader: Arc::new(GradingService::new(catalog, evaluator, Arc::new(ledger))),
            config,
        }
    }
}

/// 判题结果传输对象
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeOutcomeDto {
    pub request_id: String,
    pub question_id: String,
    pub passed: bool,
    pub passed_count: usize,
    pub total: usize,
    pub results: Vec<TestResult>,
    pub message: String,
    pub newly_solved: bool,
    pub points_awarded: u32,
    pub progress: Option<UserProgressDto>,
    pub progress_error: Option<String>,
    /// 进度保存失败时，稍后重新提交是否可能成功
    pub retryable: bool,
}

impl From<GradeOutcome> for GradeOutcomeDto {
    fn from(outcome: GradeOutcome) -> Self {
        let passed = outcome.passed();
        let points_awarded = outcome.progress.as_ref().map_or(0, |p| p.points_awarded);

        let message = match (&outcome.progress, &outcome.progress_error) {
            _ if !passed => "Some test cases failed. See details below.".to_string(),
            (_, Some(e)) => format!("All test cases passed, but progress was not saved: {}", e),
            _ if points_awarded > 0 => format!("All test cases passed! +{} points", points_awarded),
            _ => "All test cases passed!".to_string(),
        };

        Self {
            request_id: outcome.request_id.to_string(),
            question_id: outcome.question_id,
            passed,
            passed_count: outcome.verdict.passed_count(),
            total: outcome.verdict.total(),
            results: outcome.verdict.results,
            message,
            newly_solved: outcome.progress.as_ref().is_some_and(|p| p.newly_solved),
            points_awarded,
            progress: outcome.progress.map(|p| UserProgressDto::from(&p.progress)),
            retryable: outcome.progress_error.as_ref().is_some_and(|e| e.is_retryable()),
            progress_error: outcome.progress_error.map(|e| e.to_string()),
        }
    }
}

/// 自定义运行结果传输对象
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResultDto {
    pub status: String,
    pub output: String,
    pub stdout: String,
    pub stderr: String,
    pub compile_output: Option<String>,
    pub time_seconds: Option<f64>,
    pub memory_kb: Option<u64>,
}

impl From<TerminalResult> for RunResultDto {
    fn from(result: TerminalResult) -> Self {
        Self {
            status: result.description.clone(),
            output: result.display_output().to_string(),
            stdout: result.stdout,
            stderr: result.stderr,
            compile_output: result.compile_output,
            time_seconds: result.time_seconds,
            memory_kb: result.memory_kb,
        }
    }
}

/// 提交判题
pub async fn grade_submission(
    state: &AppState,
    user_id: String,
    question_id: String,
    source_code: String,
    cancel: Option<CancelToken>,
) -> Result<GradeOutcomeDto, String> {
    if user_id.trim().is_empty() {
        return Err("user id must not be empty".to_string());
    }

    let cancel = cancel.unwrap_or_default();
    let outcome = state
        .grader
        .grade_submission_with_cancel(&user_id, &question_id, &source_code, &cancel)
        .await
        .map_err(|e| e.to_string())?;

    Ok(outcome.into())
}

/// 自定义输入运行
pub async fn run_code(
    state: &AppState,
    source_code: String,
    language: String,
    stdin: String,
    cancel: Option<CancelToken>,
) -> Result<RunResultDto, String> {
    let cancel = cancel.unwrap_or_default();
    let result = state
        .grader
        .run_code(&source_code, &language, &stdin, &cancel)
        .await
        .map_err(|e| e.to_string())?;

    Ok(result.into())
}
