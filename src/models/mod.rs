use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// 题目难度
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Difficulty {
    Beginner,
    Easy,
    Medium,
    Hard,
    Expert,
}

/// 测试用例
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
}

/// 编程题（题库只读数据）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub title: String,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub tags: Vec<String>,
    pub topic_id: String,
    pub language: String,          // "python", "cpp", ...
    pub language_id: u32,          // 判题服务的语言编号
    #[serde(default)]
    pub starter_code: HashMap<String, String>,
    #[serde(default)]
    pub solution_code: HashMap<String, String>,
    pub test_cases: Vec<TestCase>,
}

impl Question {
    pub fn solution_for(&self, language: &str) -> Option<&str> {
        self.solution_code.get(language).map(String::as_str)
    }
}

/// 徽章阈值（按解题百分比）
///
/// `gold` 和 `silver` 为"达到即获得"，`bronze` 为"严格超过即获得"，
/// 默认值对应 100% 金、50% 银、大于 0% 铜。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BadgeThresholds {
    pub bronze: u32,
    pub silver: u32,
    pub gold: u32,
}

impl Default for BadgeThresholds {
    fn default() -> Self {
        Self {
            bronze: 0,
            silver: 50,
            gold: 100,
        }
    }
}

/// 专题
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: String,
    pub name: String,
    pub question_ids: Vec<String>,
    #[serde(default)]
    pub badge_thresholds: BadgeThresholds,
}

impl Topic {
    pub fn contains(&self, question_id: &str) -> bool {
        self.question_ids.iter().any(|id| id == question_id)
    }
}

/// 徽章等级
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum BadgeLevel {
    None,
    Bronze,
    Silver,
    Gold,
}

impl BadgeLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bronze => "bronze",
            Self::Silver => "silver",
            Self::Gold => "gold",
        }
    }
}

impl std::fmt::Display for BadgeLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 判题终态分类
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    CompileError,
    RuntimeError,
    InternalError,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::WrongAnswer => "Wrong Answer",
            Self::TimeLimitExceeded => "Time Limit Exceeded",
            Self::CompileError => "Compilation Error",
            Self::RuntimeError => "Runtime Error",
            Self::InternalError => "Internal Error",
        }
    }

    /// 程序是否正常运行结束（输出才有比对意义）
    pub fn ran_to_completion(&self) -> bool {
        matches!(self, Self::Accepted | Self::WrongAnswer)
    }
}

/// 判题服务返回的终态结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TerminalResult {
    pub status: StatusKind,
    pub description: String,
    pub stdout: String,
    pub stderr: String,
    pub compile_output: Option<String>,
    pub time_seconds: Option<f64>,
    pub memory_kb: Option<u64>,
}

impl TerminalResult {
    /// 面向展示的输出：stdout 优先，其次 stderr / 编译输出
    pub fn display_output(&self) -> &str {
        [
            self.stdout.as_str(),
            self.stderr.as_str(),
            self.compile_output.as_deref().unwrap_or(""),
        ]
        .into_iter()
        .find(|s| !s.trim().is_empty())
        .unwrap_or("No output")
    }
}

/// 输出比较：两侧都去掉首尾空白
pub fn outputs_match(actual: &str, expected: &str) -> bool {
    actual.trim() == expected.trim()
}

/// 单个测试用例的结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub case_index: usize,
    pub input: String,
    pub expected: String,
    pub actual: String,
    pub passed: bool,
    pub error: Option<String>,
    pub status: Option<StatusKind>,
    pub stderr: Option<String>,
    pub time_seconds: Option<f64>,
    pub memory_kb: Option<u64>,
}

impl TestResult {
    pub fn from_terminal(case_index: usize, case: &TestCase, terminal: TerminalResult) -> Self {
        // 编译错误、超时等情况即使输出碰巧相同也不算通过
        let passed = terminal.status.ran_to_completion()
            && outputs_match(&terminal.stdout, &case.expected_output);
        let stderr = if terminal.stderr.is_empty() {
            terminal.compile_output.filter(|s| !s.is_empty())
        } else {
            Some(terminal.stderr)
        };

        Self {
            case_index,
            input: case.input.clone(),
            expected: case.expected_output.clone(),
            actual: terminal.stdout,
            passed,
            error: None,
            status: Some(terminal.status),
            stderr,
            time_seconds: terminal.time_seconds,
            memory_kb: terminal.memory_kb,
        }
    }

    /// 派发或轮询失败时记录的失败结果
    pub fn errored(case_index: usize, case: &TestCase, error: impl Into<String>) -> Self {
        Self {
            case_index,
            input: case.input.clone(),
            expected: case.expected_output.clone(),
            actual: String::new(),
            passed: false,
            error: Some(error.into()),
            status: None,
            stderr: None,
            time_seconds: None,
            memory_kb: None,
        }
    }
}

/// 一次提交的整体判定
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Verdict {
    pub results: Vec<TestResult>,
}

impl Verdict {
    pub fn new(results: Vec<TestResult>) -> Self {
        Self { results }
    }

    /// 全部通过且至少有一个用例
    pub fn overall(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.passed)
    }

    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }
}

/// 专题进度（由已解题集合推导，不是独立的事实来源）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TopicProgress {
    pub topic_id: String,
    pub solved_questions: Vec<String>,
    pub points: u32,
    pub percentage: u32,
    pub badge_level: BadgeLevel,
    pub last_updated: DateTime<Utc>,
}

/// 连续打卡
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Streak {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_active_date: Option<NaiveDate>,
    pub calendar: BTreeMap<String, u32>, // "YYYY-MM-DD" -> 当天解题数
}

/// 用户进度文档
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProgress {
    pub user_id: String,
    pub solved_questions: BTreeSet<String>,
    pub topic_progress: Vec<TopicProgress>,
    pub streak: Streak,
    pub xp: u32,
    pub level: u32,
    pub total_solved: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProgress {
    pub fn new(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            solved_questions: BTreeSet::new(),
            topic_progress: Vec::new(),
            streak: Streak::default(),
            xp: 0,
            level: 1,
            total_solved: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_solved(&self, question_id: &str) -> bool {
        self.solved_questions.contains(question_id)
    }

    pub fn topic(&self, topic_id: &str) -> Option<&TopicProgress> {
        self.topic_progress.iter().find(|tp| tp.topic_id == topic_id)
    }
}
