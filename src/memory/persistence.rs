//! 对话持久化
//!
//! ConversationStore：按 thread_id 加载 / 追加 / 按 id 删除 Turn；删除必须幂等。
//! 提供内存实现（默认）与 SQLite 实现（rusqlite，阻塞调用放入 spawn_blocking）。

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::memory::{Turn, TurnId};

/// 持久化层错误
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Turn encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Persistence worker failed: {0}")]
    Worker(String),
}

/// 单线程对话的持久化接口
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// 加载线程的全部 Turn；线程不存在时返回 None
    async fn load(&self, thread_id: &str) -> Result<Option<Vec<Turn>>, PersistenceError>;

    async fn append(&self, thread_id: &str, turns: &[Turn]) -> Result<(), PersistenceError>;

    /// 删除指定 id；已不存在的 id 忽略
    async fn remove_by_ids(&self, thread_id: &str, ids: &[TurnId]) -> Result<(), PersistenceError>;
}

/// 进程内存储
#[derive(Debug, Default)]
pub struct InMemoryStore {
    threads: RwLock<HashMap<String, Vec<Turn>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn load(&self, thread_id: &str) -> Result<Option<Vec<Turn>>, PersistenceError> {
        Ok(self.threads.read().await.get(thread_id).cloned())
    }

    async fn append(&self, thread_id: &str, turns: &[Turn]) -> Result<(), PersistenceError> {
        self.threads
            .write()
            .await
            .entry(thread_id.to_string())
            .or_default()
            .extend_from_slice(turns);
        Ok(())
    }

    async fn remove_by_ids(&self, thread_id: &str, ids: &[TurnId]) -> Result<(), PersistenceError> {
        if let Some(turns) = self.threads.write().await.get_mut(thread_id) {
            turns.retain(|t| !ids.contains(&t.id));
        }
        Ok(())
    }
}

/// SQLite 存储：每条 Turn 以 JSON 存一行，seq 保证顺序
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// 打开（或创建）数据库文件；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PersistenceError::Worker(format!("create dir failed: {e}")))?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS turns (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                thread_id TEXT NOT NULL,
                turn_id TEXT NOT NULL UNIQUE,
                role TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_turns_thread ON turns(thread_id, seq);",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 在阻塞线程池中持锁执行
    async fn with_conn<T, F>(&self, f: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, PersistenceError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| PersistenceError::Worker("connection mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| PersistenceError::Worker(e.to_string()))?
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn load(&self, thread_id: &str) -> Result<Option<Vec<Turn>>, PersistenceError> {
        let thread_id = thread_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT body FROM turns WHERE thread_id = ?1 ORDER BY seq")?;
            let bodies = stmt
                .query_map(params![thread_id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            if bodies.is_empty() {
                return Ok(None);
            }
            let turns = bodies
                .iter()
                .map(|b| serde_json::from_str::<Turn>(b))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(turns))
        })
        .await
    }

    async fn append(&self, thread_id: &str, turns: &[Turn]) -> Result<(), PersistenceError> {
        let thread_id = thread_id.to_string();
        let rows = turns
            .iter()
            .map(|t| {
                Ok((
                    t.id.to_string(),
                    t.role().as_str(),
                    serde_json::to_string(t)?,
                    t.created_at,
                ))
            })
            .collect::<Result<Vec<_>, PersistenceError>>()?;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO turns (thread_id, turn_id, role, body, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for (turn_id, role, body, created_at) in &rows {
                    stmt.execute(params![thread_id, turn_id, role, body, created_at])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn remove_by_ids(&self, thread_id: &str, ids: &[TurnId]) -> Result<(), PersistenceError> {
        let thread_id = thread_id.to_string();
        let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt =
                    tx.prepare("DELETE FROM turns WHERE thread_id = ?1 AND turn_id = ?2")?;
                for id in &ids {
                    stmt.execute(params![thread_id, id])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ToolCall;

    fn sample_turns() -> Vec<Turn> {
        vec![
            Turn::user("list the data directory"),
            Turn::assistant_with_calls(
                "",
                vec![ToolCall::new("call_1", "list_directory", serde_json::json!({"path": "data"}))],
            ),
            Turn::tool_result("call_1", "list_directory", "train.csv"),
        ]
    }

    #[tokio::test]
    async fn test_in_memory_store_roundtrip() {
        let store = InMemoryStore::new();
        assert!(store.load("t").await.unwrap().is_none());

        let turns = sample_turns();
        store.append("t", &turns).await.unwrap();
        store.remove_by_ids("t", &[turns[2].id]).await.unwrap();
        store.remove_by_ids("t", &[turns[2].id]).await.unwrap();

        let loaded = store.load("t").await.unwrap().unwrap();
        assert_eq!(loaded, turns[..2].to_vec());
    }

    #[tokio::test]
    async fn test_sqlite_store_keeps_order_and_threads_apart() {
        let store = SqliteStore::open_in_memory().unwrap();
        let turns = sample_turns();
        store.append("a", &turns[..1]).await.unwrap();
        store.append("a", &turns[1..]).await.unwrap();
        store.append("b", &[Turn::user("other thread")]).await.unwrap();

        let loaded = store.load("a").await.unwrap().unwrap();
        assert_eq!(loaded, turns);
        assert_eq!(store.load("b").await.unwrap().unwrap().len(), 1);
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_remove_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let turns = sample_turns();
        store.append("a", &turns).await.unwrap();

        let ids: Vec<TurnId> = turns.iter().skip(1).map(|t| t.id).collect();
        store.remove_by_ids("a", &ids).await.unwrap();
        store.remove_by_ids("a", &ids).await.unwrap();

        let loaded = store.load("a").await.unwrap().unwrap();
        assert_eq!(loaded, vec![turns[0].clone()]);
    }
}
