//! 测试用例评测
//! 对每个测试用例执行一次"派发 + 轮询"，比较输出并汇总为判定结果

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt, TryStreamExt};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::time::Instant;

use super::judge::{judge_language_id, DispatchError, JudgeClient};
use super::poller::{CancelToken, CompletionPoller, PollError};
use crate::models::{Question, TerminalResult, TestCase, TestResult, Verdict};

/// 单次执行失败
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RunError {
    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("{0}")]
    Poll(PollError),

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("execution cancelled")]
    Cancelled,
}

impl From<PollError> for RunError {
    fn from(e: PollError) -> Self {
        match e {
            PollError::Cancelled => Self::Cancelled,
            other => Self::Poll(other),
        }
    }
}

/// 评测被取消，不会产出部分判定
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("evaluation cancelled")]
pub struct EvaluationCancelled;

/// 测试用例评测器
#[derive(Clone)]
pub struct TestCaseEvaluator {
    judge: Arc<dyn JudgeClient>,
    poller: CompletionPoller,
    case_deadline: Duration,
    max_parallel: usize,
}

impl TestCaseEvaluator {
    pub fn new(
        judge: Arc<dyn JudgeClient>,
        poller: CompletionPoller,
        case_deadline: Duration,
        max_parallel: usize,
    ) -> Self {
        Self {
            judge,
            poller,
            case_deadline,
            max_parallel: max_parallel.max(1),
        }
    }

    /// 评测全部测试用例
    ///
    /// 单个用例的派发或轮询失败只记为该用例失败，不会中断其余用例。
    pub async fn evaluate(&self, question: &Question, source_code: &str) -> Verdict {
        // 未取消的令牌，不会返回 Err
        self.evaluate_with_cancel(question, source_code, &CancelToken::new())
            .await
            .unwrap_or_default()
    }

    /// 可取消的评测，取消后返回 `EvaluationCancelled`
    pub async fn evaluate_with_cancel(
        &self,
        question: &Question,
        source_code: &str,
        cancel: &CancelToken,
    ) -> Result<Verdict, EvaluationCancelled> {
        info!(
            "Evaluating question {} ({} test cases, up to {} in parallel)",
            question.id,
            question.test_cases.len(),
            self.max_parallel
        );

        let results: Vec<TestResult> = stream::iter(question.test_cases.iter().enumerate())
            .map(|(index, case)| self.run_case(index, case, source_code, question.language_id, cancel))
            .buffered(self.max_parallel)
            .try_collect()
            .await?;

        let verdict = Verdict::new(results);
        info!(
            "Question {} evaluated: {}/{} passed",
            question.id,
            verdict.passed_count(),
            verdict.total()
        );
        Ok(verdict)
    }

    /// 自定义输入运行一次（在线编译器）
    pub async fn run_once(
        &self,
        source_code: &str,
        language: &str,
        stdin: &str,
        cancel: &CancelToken,
    ) -> Result<TerminalResult, RunError> {
        let language_id = judge_language_id(language)
            .ok_or_else(|| RunError::UnsupportedLanguage(language.to_string()))?;
        self.execute(source_code, language_id, stdin, cancel).await
    }

    async fn run_case(
        &self,
        index: usize,
        case: &TestCase,
        source_code: &str,
        language_id: u32,
        cancel: &CancelToken,
    ) -> Result<TestResult, EvaluationCancelled> {
        match self.execute(source_code, language_id, &case.input, cancel).await {
            Ok(terminal) => {
                let result = TestResult::from_terminal(index, case, terminal);
                debug!("Case {} finished, passed: {}", index, result.passed);
                Ok(result)
            }
            Err(RunError::Cancelled) => Err(EvaluationCancelled),
            Err(e) => {
                warn!("Case {} failed: {}", index, e);
                Ok(TestResult::errored(index, case, e.to_string()))
            }
        }
    }

    /// 派发 + 轮询，整体受单用例截止时间约束
    async fn execute(
        &self,
        source_code: &str,
        language_id: u32,
        stdin: &str,
        cancel: &CancelToken,
    ) -> Result<TerminalResult, RunError> {
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        let started = Instant::now();
        let submitted = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RunError::Cancelled),
            submitted = tokio::time::timeout(
                self.case_deadline,
                self.judge.submit(source_code, language_id, stdin),
            ) => submitted,
        };

        let token = match submitted {
            Ok(token) => token?,
            Err(_) => {
                return Err(RunError::Dispatch(DispatchError::Network(format!(
                    "submission not accepted within {:?}",
                    self.case_deadline
                ))))
            }
        };

        let remaining = self.case_deadline.saturating_sub(started.elapsed());
        Ok(self.poller.await_result(&token, remaining, cancel).await?)
    }
}
