//! 未读状态数据访问层（DAO）
//!
//! 将未读会话集合与未读计数镜像到本地 SQLite 的键值表，页面重载后可恢复。
//! 写入是尽力而为的副作用，失败不影响会话内行为。

use anyhow::{Context, Result};
use sqlx::{Pool, Row, Sqlite};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// 未读集合的存储键后缀
const UNREAD_SET_KEY: &str = "unreadConversations";
/// 未读计数的存储键后缀
const UNREAD_COUNTS_KEY: &str = "unreadCounts";

/// 未读状态 DAO（基于 sqlx 的键值表）
pub struct UnreadStateDao {
    db: Pool<Sqlite>,
    /// 键命名空间（工作区 ID），完整键形如 `{workspace}:unreadConversations`
    namespace: String,
}

impl UnreadStateDao {
    /// 创建新的未读状态 DAO
    pub fn new(db: Pool<Sqlite>, namespace: String) -> Self {
        Self { db, namespace }
    }

    /// 初始化数据库表结构
    pub async fn init_db(&self) -> Result<()> {
        Self::init_db_with_connection(&self.db).await
    }

    /// 使用共享连接初始化数据库表结构（静态方法）
    pub async fn init_db_with_connection(db: &Pool<Sqlite>) -> Result<()> {
        info!("[UnreadDAO/DB] 初始化本地键值表结构");

        let sql = r#"
            CREATE TABLE IF NOT EXISTS local_kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL DEFAULT ''
            )
        "#;
        sqlx::query(sql)
            .execute(db)
            .await
            .context("创建键值表失败")?;

        info!("[UnreadDAO/DB] 数据库表初始化完成");
        Ok(())
    }

    /// 读取一个键（不存在返回 None）
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT value FROM local_kv WHERE key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.db)
        .await
        .context("查询键值失败")?;

        Ok(row.map(|row| row.get::<String, _>("value")))
    }

    /// 写入一个键（存在则覆盖）
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO local_kv (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.db)
        .await
        .context("写入键值失败")?;
        Ok(())
    }

    fn unread_set_key(&self) -> String {
        format!("{}:{}", self.namespace, UNREAD_SET_KEY)
    }

    fn unread_counts_key(&self) -> String {
        format!("{}:{}", self.namespace, UNREAD_COUNTS_KEY)
    }

    /// 从数据库恢复未读状态（集合 + 计数）
    ///
    /// 键不存在或内容损坏时返回空状态，不作为错误处理
    pub async fn load_unread_state(&self) -> Result<(HashSet<String>, HashMap<String, i32>)> {
        let set: HashSet<String> = match self.get(&self.unread_set_key()).await? {
            Some(json) => serde_json::from_str(&json).unwrap_or_default(),
            None => HashSet::new(),
        };
        let counts: HashMap<String, i32> = match self.get(&self.unread_counts_key()).await? {
            Some(json) => serde_json::from_str(&json).unwrap_or_default(),
            None => HashMap::new(),
        };

        debug!(
            "[UnreadDAO] 恢复未读状态，未读会话数: {}, 计数条目: {}",
            set.len(),
            counts.len()
        );
        Ok((set, counts))
    }

    /// 将未读状态镜像到数据库（每次变更后调用）
    pub async fn save_unread_state(
        &self,
        set: &HashSet<String>,
        counts: &HashMap<String, i32>,
    ) -> Result<()> {
        let set_json = serde_json::to_string(set).context("序列化未读集合失败")?;
        let counts_json = serde_json::to_string(counts).context("序列化未读计数失败")?;

        self.set(&self.unread_set_key(), &set_json).await?;
        self.set(&self.unread_counts_key(), &counts_json).await?;

        debug!(
            "[UnreadDAO] 已镜像未读状态，未读会话数: {}, 计数条目: {}",
            set.len(),
            counts.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> Pool<Sqlite> {
        // 内存库的每个连接是独立数据库，测试里固定单连接
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("创建内存数据库失败")
    }

    #[tokio::test]
    async fn kv_get_set_roundtrip() {
        let pool = memory_pool().await;
        UnreadStateDao::init_db_with_connection(&pool)
            .await
            .expect("初始化表失败");
        let dao = UnreadStateDao::new(pool, "ws1".to_string());

        assert_eq!(dao.get("ws1:missing").await.unwrap(), None);

        dao.set("ws1:k", "v1").await.unwrap();
        assert_eq!(dao.get("ws1:k").await.unwrap().as_deref(), Some("v1"));

        // 覆盖写
        dao.set("ws1:k", "v2").await.unwrap();
        assert_eq!(dao.get("ws1:k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn unread_state_persists_and_restores() {
        let pool = memory_pool().await;
        UnreadStateDao::init_db_with_connection(&pool)
            .await
            .expect("初始化表失败");
        let dao = UnreadStateDao::new(pool.clone(), "ws1".to_string());

        let mut set = HashSet::new();
        set.insert("c1".to_string());
        set.insert("c2".to_string());
        let mut counts = HashMap::new();
        counts.insert("c1".to_string(), 3);
        counts.insert("c2".to_string(), 1);

        dao.save_unread_state(&set, &counts).await.unwrap();

        // 用同一个池重建 DAO，模拟重载
        let dao2 = UnreadStateDao::new(pool, "ws1".to_string());
        let (restored_set, restored_counts) = dao2.load_unread_state().await.unwrap();
        assert_eq!(restored_set, set);
        assert_eq!(restored_counts, counts);
    }

    #[tokio::test]
    async fn empty_state_when_keys_absent() {
        let pool = memory_pool().await;
        UnreadStateDao::init_db_with_connection(&pool)
            .await
            .expect("初始化表失败");
        let dao = UnreadStateDao::new(pool, "ws-empty".to_string());

        let (set, counts) = dao.load_unread_state().await.unwrap();
        assert!(set.is_empty());
        assert!(counts.is_empty());
    }
}
