// 命令模块
// 提供供调用方（CLI 或上层服务）使用的命令接口

pub mod grading;
pub mod progress;

pub use grading::{
    grade_submission,
    run_code,
    AppState,
    GradeOutcomeDto,
    RunResultDto,
};

pub use progress::{
    get_topic_progress,
    get_user_progress,
    TopicProgressDto,
    TopicSummaryDto,
    UserProgressDto,
};

#[cfg(test)]
const TEST_CATALOG: &str = r#"{
    "topics": [
        {"id": "basics", "name": "Basics", "questionIds": ["sum", "echo"]}
    ],
    "questions": [
        {"id": "sum", "title": "Sum", "difficulty": "Easy", "topicId": "basics",
         "language": "python", "languageId": 71,
         "testCases": [{"input": "1 2", "expectedOutput": "3"},
                       {"input": "2 2", "expectedOutput": "4"}]},
        {"id": "echo", "title": "Echo", "difficulty": "Beginner", "topicId": "basics",
         "language": "python", "languageId": 71,
         "testCases": [{"input": "hi", "expectedOutput": "hi"}]}
    ]
}"#;

/// 测试用状态：脚本化判题服务 + 内存数据库
#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    use std::sync::Arc;

    use crate::services::testing::FakeJudge;
    use crate::services::{ContentCatalog, SqliteProgressStore};
    use crate::utils::GraderConfig;

    let mut config = GraderConfig::default();
    config.case_deadline = std::time::Duration::from_secs(5);
    AppState::from_parts(
        config,
        Arc::new(ContentCatalog::from_json(TEST_CATALOG).unwrap()),
        Arc::new(FakeJudge::interpreter()),
        Arc::new(SqliteProgressStore::in_memory().unwrap()),
    )
}
