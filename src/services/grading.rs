//! 判题编排
//! 评测通过后记账；记账失败不会掩盖评测结果

use std::sync::Arc;

use log::{error, info, warn};
use thiserror::Error;
use uuid::Uuid;

use super::catalog::ContentCatalog;
use super::evaluator::{RunError, TestCaseEvaluator};
use super::ledger::{LedgerError, ProgressLedger, UpdatedProgress};
use super::poller::CancelToken;
use crate::models::{Question, TerminalResult, Verdict};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GradeError {
    #[error("unknown question: {0}")]
    UnknownQuestion(String),

    #[error("grading cancelled")]
    Cancelled,
}

/// 一次判题的完整结果
#[derive(Debug, Clone)]
pub struct GradeOutcome {
    pub request_id: Uuid,
    pub question_id: String,
    pub verdict: Verdict,
    /// 评测通过且记账成功时存在
    pub progress: Option<UpdatedProgress>,
    /// 评测通过但记账失败时存在
    pub progress_error: Option<LedgerError>,
}

impl GradeOutcome {
    pub fn passed(&self) -> bool {
        self.verdict.overall()
    }
}

/// 判题服务，所有入口共用
pub struct GradingService {
    catalog: Arc<ContentCatalog>,
    evaluator: TestCaseEvaluator,
    ledger: Arc<ProgressLedger>,
}

impl GradingService {
    pub fn new(
        catalog: Arc<ContentCatalog>,
        evaluator: TestCaseEvaluator,
        ledger: Arc<ProgressLedger>,
    ) -> Self {
        Self {
            catalog,
            evaluator,
            ledger,
        }
    }

    pub fn catalog(&self) -> &ContentCatalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &ProgressLedger {
        &self.ledger
    }

    pub async fn grade_submission(
        &self,
        user_id: &str,
        question_id: &str,
        source_code: &str,
    ) -> Result<GradeOutcome, GradeError> {
        self.grade_submission_with_cancel(user_id, question_id, source_code, &CancelToken::new())
            .await
    }

    pub async fn grade_submission_with_cancel(
        &self,
        user_id: &str,
        question_id: &str,
        source_code: &str,
        cancel: &CancelToken,
    ) -> Result<GradeOutcome, GradeError> {
        let question = self
            .catalog
            .question(question_id)
            .ok_or_else(|| GradeError::UnknownQuestion(question_id.to_string()))?;
        self.grade_question(user_id, question, source_code, cancel).await
    }

    /// 对给定题目评测并在通过时记账
    pub async fn grade_question(
        &self,
        user_id: &str,
        question: &Question,
        source_code: &str,
        cancel: &CancelToken,
    ) -> Result<GradeOutcome, GradeError> {
        let request_id = Uuid::new_v4();
        info!(
            "[{}] Grading {} for user {} ({} bytes of {})",
            request_id,
            question.id,
            user_id,
            source_code.len(),
            question.language
        );

        let verdict = self
            .evaluator
            .evaluate_with_cancel(question, source_code, cancel)
            .await
            .map_err(|_| {
                warn!("[{}] Grading cancelled", request_id);
                GradeError::Cancelled
            })?;

        let mut outcome = GradeOutcome {
            request_id,
            question_id: question.id.clone(),
            verdict,
            progress: None,
            progress_error: None,
        };

        if !outcome.verdict.overall() {
            info!(
                "[{}] {}/{} test cases passed, progress unchanged",
                request_id,
                outcome.verdict.passed_count(),
                outcome.verdict.total()
            );
            return Ok(outcome);
        }

        match self
            .ledger
            .record_solve(user_id, &question.topic_id, &question.id)
            .await
        {
            Ok(updated) => {
                info!(
                    "[{}] All test cases passed, +{} points",
                    request_id, updated.points_awarded
                );
                outcome.progress = Some(updated);
            }
            Err(e) => {
                error!("[{}] Verdict passed but progress was not saved: {}", request_id, e);
                outcome.progress_error = Some(e);
            }
        }

        Ok(outcome)
    }

    /// 自定义输入运行，不涉及进度
    pub async fn run_code(
        &self,
        source_code: &str,
        language: &str,
        stdin: &str,
        cancel: &CancelToken,
    ) -> Result<TerminalResult, RunError> {
        self.evaluator.run_once(source_code, language, stdin, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BadgeLevel, BadgeThresholds, Difficulty, TestCase, Topic};
    use crate::services::backoff::BackoffPolicy;
    use crate::services::database::{ProgressStore, SqliteProgressStore, StoreError, Versioned};
    use crate::services::poller::CompletionPoller;
    use crate::services::testing::{FakeJudge, Script};
    use crate::models::UserProgress;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    fn catalog() -> Arc<ContentCatalog> {
        let sum = Question {
            id: "sum".to_string(),
            title: "Sum".to_string(),
            difficulty: Difficulty::Beginner,
            tags: Vec::new(),
            topic_id: "basics".to_string(),
            language: "python".to_string(),
            language_id: 71,
            starter_code: HashMap::new(),
            solution_code: HashMap::from([("python".to_string(), "SUM".to_string())]),
            test_cases: vec![
                TestCase {
                    input: "1 2".to_string(),
                    expected_output: "3".to_string(),
                },
                TestCase {
                    input: "5 5".to_string(),
                    expected_output: "10".to_string(),
                },
            ],
        };
        let basics = Topic {
            id: "basics".to_string(),
            name: "Basics".to_string(),
            question_ids: vec!["sum".to_string(), "other".to_string()],
            badge_thresholds: BadgeThresholds::default(),
        };
        let mut other = sum.clone();
        other.id = "other".to_string();

        Arc::new(ContentCatalog::from_parts(vec![basics], vec![sum, other]).unwrap())
    }

    fn service(judge: Arc<FakeJudge>, store: Arc<dyn ProgressStore>) -> GradingService {
        let catalog = catalog();
        let deadline = Duration::from_secs(5);
        let policy = BackoffPolicy::new(
            Duration::from_millis(100),
            Duration::from_millis(500),
            2.0,
            0.0,
            deadline,
        );
        let poller = CompletionPoller::new(judge.clone(), policy);
        let evaluator = TestCaseEvaluator::new(judge, poller, deadline, 2);
        let ledger = Arc::new(ProgressLedger::new(store, catalog.clone()));
        GradingService::new(catalog, evaluator, ledger)
    }

    #[tokio::test(start_paused = true)]
    async fn test_passing_submission_records_progress() {
        let store = Arc::new(SqliteProgressStore::in_memory().unwrap());
        let svc = service(Arc::new(FakeJudge::interpreter()), store.clone());
        let solution = svc.catalog().question("sum").unwrap().solution_for("python").unwrap().to_string();

        let outcome = svc.grade_submission("alice", "sum", &solution).await.unwrap();

        assert!(outcome.passed());
        let progress = outcome.progress.unwrap();
        assert!(progress.newly_solved);
        assert_eq!(progress.points_awarded, 10);
        let basics = progress.progress.topic("basics").unwrap();
        assert_eq!(basics.percentage, 50);
        assert_eq!(basics.badge_level, BadgeLevel::Silver);
        assert!(outcome.progress_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_submission_leaves_progress_alone() {
        let store = Arc::new(SqliteProgressStore::in_memory().unwrap());
        let svc = service(Arc::new(FakeJudge::interpreter()), store.clone());

        let outcome = svc.grade_submission("bob", "sum", "ECHO").await.unwrap();

        assert!(!outcome.passed());
        assert!(outcome.progress.is_none());
        assert!(outcome.progress_error.is_none());
        assert!(store.get("bob").await.unwrap().is_none());
    }

    struct DownStore;

    #[async_trait]
    impl ProgressStore for DownStore {
        async fn get(&self, _user_id: &str) -> Result<Option<Versioned<UserProgress>>, StoreError> {
            Err(StoreError::Unavailable("disk full".to_string()))
        }

        async fn compare_and_swap(
            &self,
            _user_id: &str,
            _progress: &UserProgress,
            _expected_version: Option<u64>,
        ) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("disk full".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ledger_failure_keeps_verdict() {
        let svc = service(Arc::new(FakeJudge::interpreter()), Arc::new(DownStore));

        let outcome = svc.grade_submission("carol", "sum", "SUM").await.unwrap();

        assert!(outcome.passed());
        assert_eq!(outcome.verdict.total(), 2);
        assert!(outcome.progress.is_none());
        assert!(matches!(outcome.progress_error, Some(LedgerError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_unknown_question() {
        let store = Arc::new(SqliteProgressStore::in_memory().unwrap());
        let svc = service(Arc::new(FakeJudge::interpreter()), store);

        let err = svc.grade_submission("dave", "missing", "SUM").await.unwrap_err();
        assert_eq!(err, GradeError::UnknownQuestion("missing".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_grading_never_touches_ledger() {
        let store = Arc::new(SqliteProgressStore::in_memory().unwrap());
        let judge = Arc::new(FakeJudge::new(|_, _| Script::Stuck));
        let svc = service(judge, store.clone());
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = svc
            .grade_submission_with_cancel("erin", "sum", "SUM", &cancel)
            .await
            .unwrap_err();

        assert_eq!(err, GradeError::Cancelled);
        assert!(store.get("erin").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_code() {
        let store = Arc::new(SqliteProgressStore::in_memory().unwrap());
        let svc = service(Arc::new(FakeJudge::interpreter()), store);

        let result = svc
            .run_code("ECHO", "python", "hi there", &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(result.stdout, "hi there\n");
    }
}
