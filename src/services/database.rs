// 进度存储模块
// 以 JSON 文档 + 版本号的形式持久化用户进度，写入使用乐观并发控制

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::models::UserProgress;

/// 默认数据库路径
pub const DEFAULT_DB_PATH: &str = "data/shuati.db";

/// 带版本号的文档
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// 版本号不匹配，说明有并发写入
    #[error("version conflict for user {user_id} (expected {expected:?})")]
    Conflict {
        user_id: String,
        expected: Option<u64>,
    },

    #[error("progress store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt progress document for user {user_id}: {source}")]
    Corrupt {
        user_id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}

/// 进度存储
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<Versioned<UserProgress>>, StoreError>;

    /// 仅当当前版本等于 `expected_version` 时写入（`None` 表示记录尚不存在），返回新版本号
    async fn compare_and_swap(
        &self,
        user_id: &str,
        progress: &UserProgress,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError>;
}

/// SQLite 进度存储
#[derive(Clone)]
pub struct SqliteProgressStore {
    pool: Arc<Mutex<Connection>>,
    db_path: Option<PathBuf>,
}

impl SqliteProgressStore {
    /// 打开（必要时创建）数据库文件
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref().to_path_buf();

        // 确保数据目录存在
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Unavailable(format!("Failed to create data dir: {}", e))
                })?;
            }
        }

        let conn = Connection::open(&db_path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        let store = Self {
            pool: Arc::new(Mutex::new(conn)),
            db_path: Some(db_path),
        };
        store.initialize()?;
        Ok(store)
    }

    /// 内存数据库，主要用于测试
    pub fn in_memory() -> Result<Self, StoreError> {
        let store = Self {
            pool: Arc::new(Mutex::new(Connection::open_in_memory()?)),
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// 初始化表结构
    fn initialize(&self) -> Result<(), StoreError> {
        let conn = lock(&self.pool)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS user_progress (
                user_id TEXT PRIMARY KEY,
                document TEXT NOT NULL,
                version INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );
        ",
        )?;
        Ok(())
    }

    /// 在阻塞线程池上执行数据库操作
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock(&pool)?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {}", e)))?
    }
}

fn lock(pool: &Mutex<Connection>) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
    pool.lock()
        .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))
}

#[async_trait]
impl ProgressStore for SqliteProgressStore {
    async fn get(&self, user_id: &str) -> Result<Option<Versioned<UserProgress>>, StoreError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let row: Option<(String, i64)> = conn
                .query_row(
                    "SELECT document, version FROM user_progress WHERE user_id = ?1",
                    params![user_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match row {
                None => Ok(None),
                Some((document, version)) => {
                    let value = serde_json::from_str(&document)
                        .map_err(|source| StoreError::Corrupt { user_id, source })?;
                    Ok(Some(Versioned {
                        value,
                        version: version as u64,
                    }))
                }
            }
        })
        .await
    }

    async fn compare_and_swap(
        &self,
        user_id: &str,
        progress: &UserProgress,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError> {
        let user_id = user_id.to_string();
        let document = serde_json::to_string(progress).map_err(|source| StoreError::Corrupt {
            user_id: user_id.clone(),
            source,
        })?;

        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            let (changed, new_version) = match expected_version {
                None => {
                    let changed = conn.execute(
                        "INSERT INTO user_progress (user_id, document, version, updated_at)
                         VALUES (?1, ?2, 1, ?3)
                         ON CONFLICT(user_id) DO NOTHING",
                        params![user_id, document, now],
                    )?;
                    (changed, 1)
                }
                Some(expected) => {
                    let changed = conn.execute(
                        "UPDATE user_progress
                         SET document = ?2, version = version + 1, updated_at = ?3
                         WHERE user_id = ?1 AND version = ?4",
                        params![user_id, document, now, expected as i64],
                    )?;
                    (changed, expected + 1)
                }
            };

            if changed == 0 {
                return Err(StoreError::Conflict {
                    user_id,
                    expected: expected_version,
                });
            }
            Ok(new_version)
        })
        .await
    }
}
