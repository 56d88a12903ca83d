//! 进度账本
//!
//! 通过评测的提交在这里记入用户进度：已解题集合、专题积分/百分比/徽章、
//! 连续打卡与经验值。所有派生字段都由 [`compute_topic_progress`] 从已解题集合重新计算，
//! 写入以"读取-修改-比较并交换"的方式完成，版本冲突时用最新数据重试。

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::backoff::BackoffPolicy;
use super::catalog::ContentCatalog;
use super::database::{ProgressStore, StoreError};
use crate::models::{BadgeLevel, BadgeThresholds, Streak, Topic, TopicProgress, UserProgress};

/// 每道新解出的题目在所属专题中计的分
pub const POINTS_PER_SOLVE: u32 = 10;
pub const XP_PER_SOLVE: u32 = 10;
pub const XP_PER_LEVEL: u32 = 100;

/// 默认冲突重试次数
pub const DEFAULT_MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("progress update for {user_id} kept conflicting after {attempts} attempts")]
    Conflict { user_id: String, attempts: u32 },

    #[error("progress store unavailable: {0}")]
    Unavailable(String),

    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("unknown question: {0}")]
    UnknownQuestion(String),

    #[error("question {question} does not belong to topic {topic}")]
    TopicMismatch { topic: String, question: String },
}

impl LedgerError {
    /// 调用方稍后重试是否可能成功
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Unavailable(_))
    }
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict { user_id, .. } => Self::Conflict { user_id, attempts: 1 },
            other => Self::Unavailable(other.to_string()),
        }
    }
}

/// 时间来源
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// 用户所在地的日历日期，用于连续打卡
    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

// ==================== 派生计算 ====================

/// 某专题的派生进度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicStanding {
    pub solved: u32,
    pub total: u32,
    pub points: u32,
    pub percentage: u32,
    pub badge_level: BadgeLevel,
}

/// 下一档徽章
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextBadge {
    pub level: BadgeLevel,
    pub remaining: u32,
}

/// 按整数比较判定徽章，避免百分比取整带来的边界误差
pub fn badge_for(solved: u32, total: u32, thresholds: &BadgeThresholds) -> BadgeLevel {
    if total == 0 {
        return BadgeLevel::None;
    }
    let scaled = u64::from(solved) * 100;
    let total = u64::from(total);

    if scaled >= u64::from(thresholds.gold) * total {
        BadgeLevel::Gold
    } else if scaled >= u64::from(thresholds.silver) * total {
        BadgeLevel::Silver
    } else if scaled > u64::from(thresholds.bronze) * total {
        BadgeLevel::Bronze
    } else {
        BadgeLevel::None
    }
}

/// 四舍五入的百分比
fn percentage(solved: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    let (solved, total) = (u64::from(solved), u64::from(total));
    ((solved * 200 + total) / (2 * total)) as u32
}

/// 由已解题集合计算专题进度，所有展示面共用这一个函数
pub fn compute_topic_progress(topic: &Topic, solved_questions: &BTreeSet<String>) -> TopicStanding {
    let total = topic.question_ids.len() as u32;
    let solved = topic
        .question_ids
        .iter()
        .filter(|id| solved_questions.contains(id.as_str()))
        .count() as u32;

    TopicStanding {
        solved,
        total,
        points: solved * POINTS_PER_SOLVE,
        percentage: percentage(solved, total),
        badge_level: badge_for(solved, total, &topic.badge_thresholds),
    }
}

/// 距离下一档徽章还需解出的题数；已是最高档或无法再升级时返回 `None`
pub fn next_badge(topic: &Topic, solved_questions: &BTreeSet<String>) -> Option<NextBadge> {
    let standing = compute_topic_progress(topic, solved_questions);
    let thresholds = &topic.badge_thresholds;

    (standing.solved..=standing.total)
        .map(|count| (count, badge_for(count, standing.total, thresholds)))
        .find(|(_, level)| *level > standing.badge_level)
        .map(|(count, level)| NextBadge {
            level,
            remaining: count - standing.solved,
        })
}

/// 记一次当天的解题
pub fn advance_streak(streak: &mut Streak, today: NaiveDate) {
    match streak.last_active_date {
        Some(last) if last >= today => {
            // 同一天（或时钟回拨）不改变连续天数
            streak.current_streak = streak.current_streak.max(1);
        }
        Some(last) if last.succ_opt() == Some(today) => {
            streak.current_streak += 1;
            streak.last_active_date = Some(today);
        }
        _ => {
            streak.current_streak = 1;
            streak.last_active_date = Some(today);
        }
    }

    streak.longest_streak = streak.longest_streak.max(streak.current_streak);
    *streak
        .calendar
        .entry(today.format("%Y-%m-%d").to_string())
        .or_insert(0) += 1;
}

/// 一次解题对进度文档的修改结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolveEffect {
    pub newly_solved: bool,
    pub changed: bool,
}

/// 把一次解题应用到进度文档上（纯函数，不做 I/O）
pub fn apply_solve(
    progress: &mut UserProgress,
    topics: &[&Topic],
    question_id: &str,
    now: DateTime<Utc>,
    today: NaiveDate,
) -> SolveEffect {
    let newly_solved = progress.solved_questions.insert(question_id.to_string());
    let mut changed = newly_solved;

    if newly_solved {
        progress.xp += XP_PER_SOLVE;
        advance_streak(&mut progress.streak, today);
    }
    progress.level = 1 + progress.xp / XP_PER_LEVEL;
    progress.total_solved = progress.solved_questions.len() as u32;

    for topic in topics {
        changed |= refresh_topic(progress, topic, now);
    }

    if changed {
        progress.updated_at = now;
    }
    SolveEffect {
        newly_solved,
        changed,
    }
}

/// 重新计算单个专题，返回是否有变化
fn refresh_topic(progress: &mut UserProgress, topic: &Topic, now: DateTime<Utc>) -> bool {
    let standing = compute_topic_progress(topic, &progress.solved_questions);
    let solved: Vec<String> = topic
        .question_ids
        .iter()
        .filter(|id| progress.solved_questions.contains(id.as_str()))
        .cloned()
        .collect();

    let fresh = TopicProgress {
        topic_id: topic.id.clone(),
        solved_questions: solved,
        points: standing.points,
        percentage: standing.percentage,
        badge_level: standing.badge_level,
        last_updated: now,
    };

    match progress
        .topic_progress
        .iter_mut()
        .find(|tp| tp.topic_id == topic.id)
    {
        Some(existing) => {
            let same = existing.solved_questions == fresh.solved_questions
                && existing.points == fresh.points
                && existing.percentage == fresh.percentage
                && existing.badge_level == fresh.badge_level;
            if !same {
                *existing = fresh;
            }
            !same
        }
        None => {
            progress.topic_progress.push(fresh);
            true
        }
    }
}

// ==================== 账本服务 ====================

/// 一次记账的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedProgress {
    pub progress: UserProgress,
    pub version: u64,
    pub newly_solved: bool,
    pub points_awarded: u32,
}

/// 专题进度汇总（读取面）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSummary {
    pub topic_id: String,
    pub name: String,
    pub standing: TopicStanding,
    pub next_badge: Option<NextBadge>,
}

pub struct ProgressLedger {
    store: Arc<dyn ProgressStore>,
    catalog: Arc<ContentCatalog>,
    clock: Arc<dyn Clock>,
    max_retries: u32,
    backoff: BackoffPolicy,
}

impl ProgressLedger {
    pub fn new(store: Arc<dyn ProgressStore>, catalog: Arc<ContentCatalog>) -> Self {
        Self {
            store,
            catalog,
            clock: Arc::new(SystemClock),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: BackoffPolicy::conflict_retry(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn catalog(&self) -> &ContentCatalog {
        &self.catalog
    }

    /// 记录一次通过的提交
    ///
    /// 调用前提是判定已通过。已解过的题目不再加分，但会重新计算相关专题。
    pub async fn record_solve(
        &self,
        user_id: &str,
        topic_id: &str,
        question_id: &str,
    ) -> Result<UpdatedProgress, LedgerError> {
        let topic = self
            .catalog
            .topic(topic_id)
            .ok_or_else(|| LedgerError::UnknownTopic(topic_id.to_string()))?;
        if self.catalog.question(question_id).is_none() {
            return Err(LedgerError::UnknownQuestion(question_id.to_string()));
        }
        if !topic.contains(question_id) {
            return Err(LedgerError::TopicMismatch {
                topic: topic_id.to_string(),
                question: question_id.to_string(),
            });
        }

        let topics = self.catalog.topics_for_question(question_id);

        let mut attempt = 0u32;
        loop {
            let now = self.clock.now();
            let current = self.store.get(user_id).await?;
            let (mut progress, expected_version) = match current {
                Some(versioned) => (versioned.value, Some(versioned.version)),
                None => (UserProgress::new(user_id, now), None),
            };

            let effect = apply_solve(&mut progress, &topics, question_id, now, self.clock.today());
            if !effect.changed {
                debug!("{} already solved {}, nothing to write", user_id, question_id);
                return Ok(UpdatedProgress {
                    progress,
                    version: expected_version.unwrap_or(0),
                    newly_solved: false,
                    points_awarded: 0,
                });
            }

            match self
                .store
                .compare_and_swap(user_id, &progress, expected_version)
                .await
            {
                Ok(version) => {
                    info!(
                        "Recorded {} for {} (new: {}, xp: {}, version: {})",
                        question_id, user_id, effect.newly_solved, progress.xp, version
                    );
                    return Ok(UpdatedProgress {
                        progress,
                        version,
                        newly_solved: effect.newly_solved,
                        points_awarded: if effect.newly_solved { POINTS_PER_SOLVE } else { 0 },
                    });
                }
                Err(StoreError::Conflict { .. }) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        warn!(
                            "Giving up on progress update for {} after {} attempts",
                            user_id, attempt
                        );
                        return Err(LedgerError::Conflict {
                            user_id: user_id.to_string(),
                            attempts: attempt,
                        });
                    }
                    let delay = self.backoff.delay_for_attempt(attempt - 1);
                    debug!(
                        "Progress for {} changed concurrently, retry {} in {:?}",
                        user_id, attempt, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// 读取用户进度，从未通过任何题目时返回 `None`
    pub async fn progress(&self, user_id: &str) -> Result<Option<UserProgress>, LedgerError> {
        Ok(self.store.get(user_id).await?.map(|v| v.value))
    }

    /// 按当前题库重新推导某专题的进度
    pub async fn topic_summary(
        &self,
        user_id: &str,
        topic_id: &str,
    ) -> Result<TopicSummary, LedgerError> {
        let topic = self
            .catalog
            .topic(topic_id)
            .ok_or_else(|| LedgerError::UnknownTopic(topic_id.to_string()))?;

        let solved = self
            .progress(user_id)
            .await?
            .map(|p| p.solved_questions)
            .unwrap_or_default();

        Ok(TopicSummary {
            topic_id: topic.id.clone(),
            name: topic.name.clone(),
            standing: compute_topic_progress(topic, &solved),
            next_badge: next_badge(topic, &solved),
        })
    }
}
