//! 进度命令模块
//! 提供用户进度与专题徽章的查询命令

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::grading::AppState;
use crate::models::{TopicProgress, UserProgress};
use crate::services::TopicSummary;

/// 专题进度传输对象
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicProgressDto {
    pub topic_id: String,
    pub solved_count: usize,
    pub points: u32,
    pub percentage: u32,
    pub badge_level: String,
    pub last_updated: String,
}

impl From<&TopicProgress> for TopicProgressDto {
    fn from(tp: &TopicProgress) -> Self {
        Self {
            topic_id: tp.topic_id.clone(),
            solved_count: tp.solved_questions.len(),
            points: tp.points,
            percentage: tp.percentage,
            badge_level: tp.badge_level.to_string(),
            last_updated: tp.last_updated.to_rfc3339(),
        }
    }
}

/// 用户进度传输对象
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProgressDto {
    pub user_id: String,
    pub solved_questions: Vec<String>,
    pub xp: u32,
    pub level: u32,
    pub total_solved: u32,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_active_date: Option<String>,
    pub calendar: BTreeMap<String, u32>,
    pub topics: Vec<TopicProgressDto>,
    pub updated_at: String,
}

impl From<&UserProgress> for UserProgressDto {
    fn from(p: &UserProgress) -> Self {
        Self {
            user_id: p.user_id.clone(),
            solved_questions: p.solved_questions.iter().cloned().collect(),
            xp: p.xp,
            level: p.level,
            total_solved: p.total_solved,
            current_streak: p.streak.current_streak,
            longest_streak: p.streak.longest_streak,
            last_active_date: p.streak.last_active_date.map(|d| d.to_string()),
            calendar: p.streak.calendar.clone(),
            topics: p.topic_progress.iter().map(TopicProgressDto::from).collect(),
            updated_at: p.updated_at.to_rfc3339(),
        }
    }
}

/// 专题徽章汇总传输对象
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSummaryDto {
    pub topic_id: String,
    pub name: String,
    pub solved: u32,
    pub total: u32,
    pub points: u32,
    pub percentage: u32,
    pub badge_level: String,
    pub next_badge: Option<String>,
    pub remaining_for_next: Option<u32>,
}

impl From<TopicSummary> for TopicSummaryDto {
    fn from(summary: TopicSummary) -> Self {
        Self {
            topic_id: summary.topic_id,
            name: summary.name,
            solved: summary.standing.solved,
            total: summary.standing.total,
            points: summary.standing.points,
            percentage: summary.standing.percentage,
            badge_level: summary.standing.badge_level.to_string(),
            next_badge: summary.next_badge.map(|n| n.level.to_string()),
            remaining_for_next: summary.next_badge.map(|n| n.remaining),
        }
    }
}

/// 获取用户进度，尚无记录时返回 None
pub async fn get_user_progress(
    state: &AppState,
    user_id: String,
) -> Result<Option<UserProgressDto>, String> {
    let progress = state
        .grader
        .ledger()
        .progress(&user_id)
        .await
        .map_err(|e| e.to_string())?;

    Ok(progress.as_ref().map(UserProgressDto::from))
}

/// 获取某专题的进度与下一档徽章
pub async fn get_topic_progress(
    state: &AppState,
    user_id: String,
    topic_id: String,
) -> Result<TopicSummaryDto, String> {
    let summary = state
        .grader
        .ledger()
        .topic_summary(&user_id, &topic_id)
        .await
        .map_err(|e| e.to_string())?;

    Ok(summary.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{grade_submission, test_state};

    #[tokio::test]
    async fn test_progress_for_new_user() {
        let state = test_state();
        assert!(get_user_progress(&state, "nobody".into()).await.unwrap().is_none());

        let summary = get_topic_progress(&state, "nobody".into(), "basics".into())
            .await
            .unwrap();
        assert_eq!(summary.badge_level, "none");
        assert_eq!(summary.next_badge.as_deref(), Some("bronze"));
        assert_eq!(summary.remaining_for_next, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_after_solves() {
        let state = test_state();
        for (question, source) in [("sum", "SUM"), ("echo", "ECHO")] {
            let dto = grade_submission(&state, "alice".into(), question.into(), source.into(), None)
                .await
                .unwrap();
            assert!(dto.passed, "{} should pass", question);
        }

        let progress = get_user_progress(&state, "alice".into()).await.unwrap().unwrap();
        assert_eq!(progress.total_solved, 2);
        assert_eq!(progress.xp, 20);
        assert_eq!(progress.current_streak, 1);
        assert_eq!(progress.topics[0].badge_level, "gold");

        let summary = get_topic_progress(&state, "alice".into(), "basics".into())
            .await
            .unwrap();
        assert_eq!(summary.percentage, 100);
        assert_eq!(summary.points, 20);
        assert!(summary.next_badge.is_none());
    }

    #[tokio::test]
    async fn test_unknown_topic() {
        let state = test_state();
        let err = get_topic_progress(&state, "alice".into(), "graphs".into())
            .await
            .unwrap_err();
        assert_eq!(err, "unknown topic: graphs");
    }
}
