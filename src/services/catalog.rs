//! 题库目录
//! 启动时从 JSON 文件加载一次，之后只读

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::Deserialize;
use thiserror::Error;

use crate::models::{Question, Topic};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate question id: {0}")]
    DuplicateQuestion(String),

    #[error("duplicate topic id: {0}")]
    DuplicateTopic(String),

    #[error("topic {topic} references unknown question {question}")]
    UnknownQuestion { topic: String, question: String },

    #[error("question {question} references unknown topic {topic}")]
    UnknownTopic { question: String, topic: String },

    #[error("topic {topic} does not list its question {question}")]
    UnlistedQuestion { question: String, topic: String },
}

/// 目录文件格式
#[derive(Debug, Deserialize)]
struct CatalogFile {
    topics: Vec<Topic>,
    questions: Vec<Question>,
}

/// 题目与专题的只读索引
#[derive(Debug, Clone, Default)]
pub struct ContentCatalog {
    questions: HashMap<String, Question>,
    topics: Vec<Topic>,
}

impl ContentCatalog {
    /// 从文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_json(&content)?;
        info!(
            "Loaded catalog from {}: {} questions, {} topics",
            path.display(),
            catalog.questions.len(),
            catalog.topics.len()
        );
        Ok(catalog)
    }

    pub fn from_json(content: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(content)?;
        Self::from_parts(file.topics, file.questions)
    }

    /// 校验引用关系后建立索引
    pub fn from_parts(topics: Vec<Topic>, questions: Vec<Question>) -> Result<Self, CatalogError> {
        let mut by_id = HashMap::with_capacity(questions.len());
        for question in questions {
            if by_id.contains_key(&question.id) {
                return Err(CatalogError::DuplicateQuestion(question.id));
            }
            by_id.insert(question.id.clone(), question);
        }

        let mut seen = std::collections::HashSet::new();
        for topic in &topics {
            if !seen.insert(topic.id.as_str()) {
                return Err(CatalogError::DuplicateTopic(topic.id.clone()));
            }
            if let Some(missing) = topic.question_ids.iter().find(|id| !by_id.contains_key(*id)) {
                return Err(CatalogError::UnknownQuestion {
                    topic: topic.id.clone(),
                    question: missing.clone(),
                });
            }
        }

        for question in by_id.values() {
            let Some(home) = topics.iter().find(|t| t.id == question.topic_id) else {
                return Err(CatalogError::UnknownTopic {
                    question: question.id.clone(),
                    topic: question.topic_id.clone(),
                });
            };
            // 判题通过后按题目自身的专题记分，两边必须一致
            if !home.contains(&question.id) {
                return Err(CatalogError::UnlistedQuestion {
                    question: question.id.clone(),
                    topic: home.id.clone(),
                });
            }
        }

        Ok(Self {
            questions: by_id,
            topics,
        })
    }

    pub fn question(&self, id: &str) -> Option<&Question> {
        self.questions.get(id)
    }

    pub fn topic(&self, id: &str) -> Option<&Topic> {
        self.topics.iter().find(|t| t.id == id)
    }

    /// 包含该题目的全部专题（一道题可属于多个专题）
    pub fn topics_for_question(&self, question_id: &str) -> Vec<&Topic> {
        self.topics.iter().filter(|t| t.contains(question_id)).collect()
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn question_count(&self) -> usize {
        self.questions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CATALOG: &str = r#"{
        "topics": [
            {"id": "python-basics", "name": "Python Basics", "questionIds": ["py-1", "py-2"]},
            {"id": "arrays", "name": "Arrays", "questionIds": ["py-2"],
             "badgeThresholds": {"bronze": 0, "silver": 60, "gold": 100}}
        ],
        "questions": [
            {"id": "py-1", "title": "Hello", "difficulty": "Beginner", "topicId": "python-basics",
             "language": "python", "languageId": 71,
             "testCases": [{"input": "", "expectedOutput": "Hello"}]},
            {"id": "py-2", "title": "Max", "difficulty": "Easy", "topicId": "arrays",
             "language": "python", "languageId": 71,
             "testCases": [{"input": "1 5 3", "expectedOutput": "5"}]}
        ]
    }"#;

    #[test]
    fn test_lookup() {
        let catalog = ContentCatalog::from_json(CATALOG).unwrap();
        assert_eq!(catalog.question_count(), 2);
        assert_eq!(catalog.question("py-1").unwrap().title, "Hello");
        assert!(catalog.question("nope").is_none());
        assert_eq!(catalog.topic("arrays").unwrap().badge_thresholds.silver, 60);
        assert_eq!(catalog.topic("python-basics").unwrap().badge_thresholds.silver, 50);
    }

    #[test]
    fn test_question_in_several_topics() {
        let catalog = ContentCatalog::from_json(CATALOG).unwrap();
        let ids: Vec<&str> = catalog
            .topics_for_question("py-2")
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(ids, vec!["python-basics", "arrays"]);
        assert_eq!(catalog.topics_for_question("py-1").len(), 1);
    }

    #[test]
    fn test_rejects_dangling_references() {
        let bad = CATALOG.replace(r#"["py-2"]"#, r#"["py-9"]"#);
        assert!(matches!(
            ContentCatalog::from_json(&bad),
            Err(CatalogError::UnknownQuestion { .. })
        ));

        let bad = CATALOG.replace(r#""topicId": "arrays""#, r#""topicId": "graphs""#);
        assert!(matches!(
            ContentCatalog::from_json(&bad),
            Err(CatalogError::UnknownTopic { .. })
        ));

        let bad = CATALOG.replace(r#""topicId": "arrays""#, r#""topicId": "python-basics""#)
            .replace(r#"["py-1", "py-2"]"#, r#"["py-1"]"#);
        assert!(matches!(
            ContentCatalog::from_json(&bad),
            Err(CatalogError::UnlistedQuestion { question, topic })
                if question == "py-2" && topic == "python-basics"
        ));
    }

    #[test]
    fn test_rejects_duplicates() {
        let bad = CATALOG.replace(r#""id": "py-2""#, r#""id": "py-1""#);
        assert!(matches!(
            ContentCatalog::from_json(&bad),
            Err(CatalogError::DuplicateQuestion(id)) if id == "py-1"
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CATALOG.as_bytes()).unwrap();

        let catalog = ContentCatalog::load(file.path()).unwrap();
        assert_eq!(catalog.topics().len(), 2);

        let missing = ContentCatalog::load("/definitely/not/here.json");
        assert!(matches!(missing, Err(CatalogError::Io { .. })));
    }
}
