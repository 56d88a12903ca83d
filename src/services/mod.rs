// 服务模块
// 判题流水线的核心服务：派发、轮询、评测、记账与编排

pub mod backoff;
pub mod catalog;
pub mod database;
pub mod evaluator;
pub mod grading;
pub mod judge;
pub mod ledger;
pub mod poller;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::BackoffPolicy;

pub use catalog::{ContentCatalog, CatalogError};

pub use database::{
    ProgressStore,
    SqliteProgressStore,
    StoreError,
    Versioned,
    DEFAULT_DB_PATH,
};

pub use evaluator::{EvaluationCancelled, RunError, TestCaseEvaluator};

pub use grading::{GradeError, GradeOutcome, GradingService};

pub use judge::{
    DispatchError,
    Judge0Client,
    JudgeClient,
    JudgeConfig,
    JudgeStatus,
    Token,
    judge_language_id,
    LANGUAGES,
};

pub use ledger::{
    Clock,
    LedgerError,
    NextBadge,
    ProgressLedger,
    SystemClock,
    TopicStanding,
    TopicSummary,
    UpdatedProgress,
    compute_topic_progress,
    next_badge,
};

pub use poller::{CancelToken, CompletionPoller, PollError, PollState};
