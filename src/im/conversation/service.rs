//! 会话调和服务层
//!
//! 将实时消息事件流调和到内存中的会话摘要列表：重复投递去重、
//! 列表按最近更新排序、未读集合与计数维护、未读状态镜像到本地存储。

use crate::im::conversation::api::ConversationApi;
use crate::im::conversation::dao::UnreadStateDao;
use crate::im::conversation::listener::{ConversationListener, EmptyConversationListener};
use crate::im::conversation::models::ReconcilerConfig;
use crate::im::subscription::MessageEventHandler;
use crate::im::types::{ConversationSummary, MessageEvent};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// 已处理事件日志的容量上限
const PROCESSED_LOG_CAP: usize = 1000;
/// 超过上限后保留的最近条目数
const PROCESSED_LOG_TRIM: usize = 500;

/// 已处理事件日志（有界 FIFO 集合）
///
/// 防止订阅通道重连重放导致的重复投递。超过 1000 条时裁剪到最近 500 条，
/// 被裁剪掉的 ID 不再受重复保护（已知并接受的限制）。
struct ProcessedEventLog {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl ProcessedEventLog {
    fn new() -> Self {
        Self {
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    fn contains(&self, event_id: &str) -> bool {
        self.seen.contains(event_id)
    }

    fn record(&mut self, event_id: &str) {
        if !self.seen.insert(event_id.to_string()) {
            return;
        }
        self.order.push_back(event_id.to_string());

        if self.order.len() > PROCESSED_LOG_CAP {
            // FIFO 裁剪：丢弃最旧条目直到只剩最近 PROCESSED_LOG_TRIM 条
            while self.order.len() > PROCESSED_LOG_TRIM {
                if let Some(old) = self.order.pop_front() {
                    self.seen.remove(&old);
                }
            }
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// 调和器内部状态（单一事件处理路径下互斥访问，锁不跨 await 持有）
struct ReconcilerState {
    /// 会话列表，始终保持最近更新在前
    conversations: Vec<ConversationSummary>,
    /// 未读会话集合
    unread: HashSet<String>,
    /// 每会话未读计数
    unread_counts: HashMap<String, i32>,
    /// 当前在 UI 中打开的会话（其事件不计未读）
    active_conversation: Option<String>,
    /// 已处理事件日志
    processed: ProcessedEventLog,
}

/// 会话调和器
pub struct ConversationReconciler {
    state: Mutex<ReconcilerState>,
    /// 未读状态 DAO（本地镜像，尽力而为）
    dao: UnreadStateDao,
    /// 会话 API 客户端（自建连接时持有，用于 refresh）
    api: Option<ConversationApi>,
    /// 会话监听器
    listener: Arc<dyn ConversationListener>,
}

impl ConversationReconciler {
    /// 创建新的会话调和器（使用默认空监听器）
    pub async fn new(config: ReconcilerConfig) -> Result<Self> {
        Self::with_listener(config, Arc::new(EmptyConversationListener)).await
    }

    /// 创建新的会话调和器（带自定义监听器）
    pub async fn with_listener(
        config: ReconcilerConfig,
        listener: Arc<dyn ConversationListener>,
    ) -> Result<Self> {
        let db_url = config.db_path.clone();
        info!(
            "[Reconciler] 创建会话调和器，工作区ID: {}, SQLite数据库: {}",
            config.workspace_id, db_url
        );
        let db = SqlitePoolOptions::new()
            .connect(&db_url)
            .await
            .context(format!("连接SQLite数据库失败: {}", db_url))?;

        UnreadStateDao::init_db_with_connection(&db).await?;

        // 自建 HTTP 客户端（token 通过 default_headers 自动添加）
        let http_client = reqwest::ClientBuilder::new()
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::HeaderName::from_static("token"),
                    reqwest::header::HeaderValue::from_str(&config.token)
                        .context("无效的 token")?,
                );
                headers
            })
            .build()
            .context("创建 HTTP 客户端失败")?;
        let api = ConversationApi::new(
            http_client,
            config.api_base_url.clone(),
            config.workspace_id.clone(),
        );

        let mut reconciler = Self::with_listener_and_db(&config.workspace_id, listener, db).await?;
        reconciler.api = Some(api);
        Ok(reconciler)
    }

    /// 创建新的会话调和器（使用共享数据库连接）
    ///
    /// 数据库表初始化由调用方负责（client 中统一完成）
    pub async fn with_listener_and_db(
        workspace_id: &str,
        listener: Arc<dyn ConversationListener>,
        db: Pool<Sqlite>,
    ) -> Result<Self> {
        let dao = UnreadStateDao::new(db, workspace_id.to_string());

        // 恢复上次镜像的未读状态（页面重载后继续生效）
        let (unread, unread_counts) = dao.load_unread_state().await.unwrap_or_else(|e| {
            warn!("[Reconciler] ⚠️ 恢复未读状态失败，使用空状态: {}", e);
            (HashSet::new(), HashMap::new())
        });
        info!(
            "[Reconciler] 已恢复未读状态，未读会话数: {}",
            unread.len()
        );

        Ok(Self {
            state: Mutex::new(ReconcilerState {
                conversations: Vec::new(),
                unread,
                unread_counts,
                active_conversation: None,
                processed: ProcessedEventLog::new(),
            }),
            dao,
            api: None,
            listener,
        })
    }

    /// 重新拉取全量会话列表并填充（订阅通道重连后调用）
    ///
    /// 仅在通过 [`Self::new`] / [`Self::with_listener`] 自建连接时可用
    pub async fn refresh(&self) -> Result<()> {
        let api = self
            .api
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("未配置会话 API，无法刷新"))?;
        let conversations = api.get_all_conversations().await?;
        self.hydrate(conversations);
        Ok(())
    }

    /// 批量填充会话列表（来自服务器的全量拉取）
    ///
    /// 重新按 updatedAt 降序排列；后续顺序由事件调和以"移到头部"的方式维护
    pub fn hydrate(&self, mut conversations: Vec<ConversationSummary>) {
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        // 不变量：每个会话 ID 至多出现一次
        let mut seen = HashSet::new();
        conversations.retain(|c| seen.insert(c.conversation_id.clone()));

        let mut state = self.state.lock().unwrap();
        info!(
            "[Reconciler] 填充会话列表，会话数: {}",
            conversations.len()
        );
        state.conversations = conversations;
    }

    /// 应用一条实时消息事件（核心函数）
    ///
    /// 重复事件静默吸收；新会话由事件字段合成并插入头部；已有会话更新
    /// 最新消息与联系人字段后移到头部；非活跃会话计入未读。
    pub async fn apply_message_event(&self, event: MessageEvent) -> Result<()> {
        let conv_id = event.conversation_id.clone();

        // 在锁内完成全部状态变更，收集回调所需快照后释放锁
        let (is_new, conv_json, unread_changed, total_unread, persist_snapshot) = {
            let mut state = self.state.lock().unwrap();

            // 1. 重复投递去重
            if let Some(id) = &event.id {
                if state.processed.contains(id) {
                    debug!(
                        "[Reconciler] 重复事件，忽略: id={}, conversationID={}",
                        id, conv_id
                    );
                    return Ok(());
                }
                state.processed.record(id);
            }

            // 2. 定位并更新 / 合成会话摘要
            let existing_pos = state
                .conversations
                .iter()
                .position(|c| c.conversation_id == conv_id);

            let (is_new, summary) = match existing_pos {
                Some(pos) => {
                    let mut conv = state.conversations.remove(pos);
                    conv.last_message = Some(event.to_last_message());
                    conv.updated_at = event.created_at;
                    // 联系人字段优先取事件值，事件缺省时保留原值
                    if !event.contact_name.is_empty() {
                        conv.contact_name = event.contact_name.clone();
                    }
                    if !event.contact_phone.is_empty() {
                        conv.contact_phone = event.contact_phone.clone();
                    }
                    if !event.contact_id.is_empty() {
                        conv.contact_id = event.contact_id.clone();
                    }
                    if !event.channel_name.is_empty() {
                        conv.channel_name = event.channel_name.clone();
                    }
                    (false, conv)
                }
                None => {
                    // 新会话：由事件的冗余字段合成
                    let conv = ConversationSummary {
                        conversation_id: conv_id.clone(),
                        contact_id: event.contact_id.clone(),
                        contact_name: event.contact_name.clone(),
                        contact_phone: event.contact_phone.clone(),
                        channel_name: event.channel_name.clone(),
                        last_message: Some(event.to_last_message()),
                        updated_at: event.created_at,
                        created_at: event.created_at,
                    };
                    (true, conv)
                }
            };

            // 3. 插入头部，维持最近更新在前的排序不变量
            state.conversations.insert(0, summary.clone());

            // 4. 未读记账：只看"该会话是否正在 UI 中打开"，与发送方无关
            let is_active = state.active_conversation.as_deref() == Some(conv_id.as_str());
            let unread_changed = if is_active {
                false
            } else {
                state.unread.insert(conv_id.clone());
                *state.unread_counts.entry(conv_id.clone()).or_insert(0) += 1;
                true
            };

            let total_unread: i32 = state.unread_counts.values().sum();
            let conv_json =
                serde_json::to_string(&vec![summary]).unwrap_or_else(|_| "[]".to_string());
            let persist_snapshot = if unread_changed {
                Some((state.unread.clone(), state.unread_counts.clone()))
            } else {
                None
            };

            (is_new, conv_json, unread_changed, total_unread, persist_snapshot)
        };

        // 5. 镜像未读状态（尽力而为，失败仅告警）
        if let Some((set, counts)) = persist_snapshot {
            if let Err(e) = self.dao.save_unread_state(&set, &counts).await {
                warn!("[Reconciler] ⚠️ 镜像未读状态失败: {}", e);
            }
        }

        // 6. 触发回调
        if is_new {
            self.listener.on_new_conversation(conv_json).await;
        } else {
            self.listener.on_conversation_changed(conv_json).await;
        }
        if unread_changed {
            self.listener
                .on_total_unread_message_count_changed(total_unread)
                .await;
        }

        Ok(())
    }

    /// 将会话标记为已读（幂等）
    pub async fn mark_read(&self, conversation_id: &str) -> Result<()> {
        let snapshot = {
            let mut state = self.state.lock().unwrap();
            let removed = state.unread.remove(conversation_id);
            let cleared = state.unread_counts.remove(conversation_id).is_some();
            if !removed && !cleared {
                return Ok(());
            }
            let total: i32 = state.unread_counts.values().sum();
            (state.unread.clone(), state.unread_counts.clone(), total)
        };

        debug!("[Reconciler] 标记已读: conversationID={}", conversation_id);
        let (set, counts, total) = snapshot;
        if let Err(e) = self.dao.save_unread_state(&set, &counts).await {
            warn!("[Reconciler] ⚠️ 镜像未读状态失败: {}", e);
        }
        self.listener
            .on_total_unread_message_count_changed(total)
            .await;
        Ok(())
    }

    /// 设置当前活跃会话（None 表示没有打开的会话）
    ///
    /// 只影响后续事件的未读豁免，不清除该会话已有的未读状态
    pub fn set_active_conversation(&self, conversation_id: Option<String>) {
        let mut state = self.state.lock().unwrap();
        debug!(
            "[Reconciler] 设置活跃会话: {:?} -> {:?}",
            state.active_conversation, conversation_id
        );
        state.active_conversation = conversation_id;
    }

    /// 获取当前会话列表快照（最近更新在前）
    pub fn get_conversation_list(&self) -> Vec<ConversationSummary> {
        self.state.lock().unwrap().conversations.clone()
    }

    /// 会话是否未读
    pub fn is_unread(&self, conversation_id: &str) -> bool {
        self.state.lock().unwrap().unread.contains(conversation_id)
    }

    /// 单个会话的未读计数（无记录返回 0）
    pub fn get_unread_count(&self, conversation_id: &str) -> i32 {
        self.state
            .lock()
            .unwrap()
            .unread_counts
            .get(conversation_id)
            .copied()
            .unwrap_or(0)
    }

    /// 总未读消息数
    pub fn get_total_unread_count(&self) -> i32 {
        self.state.lock().unwrap().unread_counts.values().sum()
    }

    #[cfg(test)]
    fn processed_log_len(&self) -> usize {
        self.state.lock().unwrap().processed.len()
    }
}

#[async_trait]
impl MessageEventHandler for ConversationReconciler {
    async fn on_message_event(&self, event: MessageEvent) {
        if let Err(e) = self.apply_message_event(event).await {
            warn!("[Reconciler] ⚠️ 应用消息事件失败: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Once;

    static INIT_LOGGER: Once = Once::new();

    fn init_test_logger() {
        INIT_LOGGER.call_once(|| {
            use tracing_subscriber::prelude::*;
            use tracing_subscriber::EnvFilter;

            let filter_layer =
                EnvFilter::new("info,shopchat_sdk_core_rust=debug,sqlx=info");

            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(false)
                .with_test_writer();

            tracing_subscriber::registry()
                .with(filter_layer)
                .with(fmt_layer)
                .try_init()
                .ok();
        });
    }

    async fn memory_pool() -> Pool<Sqlite> {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("创建内存数据库失败")
    }

    async fn test_reconciler(pool: Pool<Sqlite>) -> ConversationReconciler {
        UnreadStateDao::init_db_with_connection(&pool)
            .await
            .expect("初始化表失败");
        ConversationReconciler::with_listener_and_db(
            "ws-test",
            Arc::new(EmptyConversationListener),
            pool,
        )
        .await
        .expect("创建调和器失败")
    }

    fn ev(id: &str, conv: &str, content: &str, created_at: i64) -> MessageEvent {
        MessageEvent {
            id: Some(id.to_string()),
            conversation_id: conv.to_string(),
            content: content.to_string(),
            is_from_customer: true,
            created_at,
            contact_id: String::new(),
            contact_name: String::new(),
            contact_phone: String::new(),
            channel_name: String::new(),
            media_url: String::new(),
            media_type: String::new(),
        }
    }

    #[tokio::test]
    async fn synthesizes_new_conversation_from_event() {
        init_test_logger();
        let r = test_reconciler(memory_pool().await).await;

        let mut event = ev("e1", "c1", "hi", 1000);
        event.contact_name = "李四".to_string();
        event.channel_name = "主渠道".to_string();
        r.apply_message_event(event).await.unwrap();

        let list = r.get_conversation_list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].conversation_id, "c1");
        assert_eq!(list[0].contact_name, "李四");
        assert_eq!(list[0].channel_name, "主渠道");
        assert_eq!(list[0].last_message.as_ref().unwrap().message, "hi");
        assert!(r.is_unread("c1"));
        assert_eq!(r.get_unread_count("c1"), 1);
    }

    #[tokio::test]
    async fn duplicate_event_is_absorbed() {
        init_test_logger();
        let r = test_reconciler(memory_pool().await).await;

        let event = ev("e1", "c1", "hi", 1000);
        r.apply_message_event(event.clone()).await.unwrap();
        r.apply_message_event(event).await.unwrap();

        assert_eq!(r.get_conversation_list().len(), 1);
        // 同一 id 应用两次，计数仍为 1（而不是 2）
        assert_eq!(r.get_unread_count("c1"), 1);
        assert_eq!(r.get_total_unread_count(), 1);
    }

    #[tokio::test]
    async fn list_ordered_most_recent_first() {
        init_test_logger();
        let r = test_reconciler(memory_pool().await).await;

        r.apply_message_event(ev("e1", "a", "1", 1000)).await.unwrap();
        r.apply_message_event(ev("e2", "b", "2", 1001)).await.unwrap();
        r.apply_message_event(ev("e3", "c", "3", 1002)).await.unwrap();

        let ids: Vec<_> = r
            .get_conversation_list()
            .into_iter()
            .map(|c| c.conversation_id)
            .collect();
        assert_eq!(ids, vec!["c", "b", "a"]);

        // 再次触达 a，应回到头部
        r.apply_message_event(ev("e4", "a", "4", 1003)).await.unwrap();
        let ids: Vec<_> = r
            .get_conversation_list()
            .into_iter()
            .map(|c| c.conversation_id)
            .collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
        assert_eq!(r.get_conversation_list().len(), 3);
    }

    #[tokio::test]
    async fn active_conversation_exempt_from_unread() {
        init_test_logger();
        let r = test_reconciler(memory_pool().await).await;

        r.set_active_conversation(Some("c1".to_string()));
        r.apply_message_event(ev("e1", "c1", "hi", 1000)).await.unwrap();

        assert!(!r.is_unread("c1"));
        assert_eq!(r.get_unread_count("c1"), 0);

        // 商家侧自己另一台设备发出的消息（isFromCustomer=false）同样只看活跃会话
        let mut seller_event = ev("e2", "c2", "ok", 1001);
        seller_event.is_from_customer = false;
        r.apply_message_event(seller_event).await.unwrap();
        assert!(r.is_unread("c2"));
        assert_eq!(r.get_unread_count("c2"), 1);
    }

    #[tokio::test]
    async fn unread_accumulates_per_distinct_event() {
        init_test_logger();
        let r = test_reconciler(memory_pool().await).await;

        for i in 0..5 {
            r.apply_message_event(ev(&format!("e{}", i), "c1", "m", 1000 + i))
                .await
                .unwrap();
        }
        assert_eq!(r.get_unread_count("c1"), 5);
        assert_eq!(r.get_total_unread_count(), 5);
        assert_eq!(r.get_conversation_list().len(), 1);
    }

    #[tokio::test]
    async fn mark_read_clears_state_and_is_idempotent() {
        init_test_logger();
        let r = test_reconciler(memory_pool().await).await;

        r.apply_message_event(ev("e1", "c1", "m", 1000)).await.unwrap();
        r.apply_message_event(ev("e2", "c1", "m", 1001)).await.unwrap();
        assert_eq!(r.get_unread_count("c1"), 2);

        r.mark_read("c1").await.unwrap();
        assert!(!r.is_unread("c1"));
        assert_eq!(r.get_unread_count("c1"), 0);
        assert_eq!(r.get_total_unread_count(), 0);

        // 幂等
        r.mark_read("c1").await.unwrap();
        assert_eq!(r.get_unread_count("c1"), 0);
    }

    #[tokio::test]
    async fn set_active_does_not_clear_existing_unread() {
        init_test_logger();
        let r = test_reconciler(memory_pool().await).await;

        r.apply_message_event(ev("e1", "c1", "m", 1000)).await.unwrap();
        assert!(r.is_unread("c1"));

        r.set_active_conversation(Some("c1".to_string()));
        // 已有未读保留，只豁免后续事件
        assert!(r.is_unread("c1"));
        assert_eq!(r.get_unread_count("c1"), 1);

        r.apply_message_event(ev("e2", "c1", "m", 1001)).await.unwrap();
        assert_eq!(r.get_unread_count("c1"), 1);
    }

    #[tokio::test]
    async fn contact_fields_prefer_event_fall_back_existing() {
        init_test_logger();
        let r = test_reconciler(memory_pool().await).await;

        let mut first = ev("e1", "c1", "m", 1000);
        first.contact_name = "旧名字".to_string();
        first.contact_phone = "+5511999".to_string();
        r.apply_message_event(first).await.unwrap();

        // 事件未带联系人名时保留原值
        r.apply_message_event(ev("e2", "c1", "m", 1001)).await.unwrap();
        let list = r.get_conversation_list();
        assert_eq!(list[0].contact_name, "旧名字");
        assert_eq!(list[0].contact_phone, "+5511999");

        // 事件带新名字时覆盖
        let mut renamed = ev("e3", "c1", "m", 1002);
        renamed.contact_name = "新名字".to_string();
        r.apply_message_event(renamed).await.unwrap();
        assert_eq!(r.get_conversation_list()[0].contact_name, "新名字");
    }

    #[tokio::test]
    async fn processed_log_is_bounded() {
        init_test_logger();
        let r = test_reconciler(memory_pool().await).await;

        for i in 0..1001 {
            r.apply_message_event(ev(&format!("e{}", i), "c1", "m", i))
                .await
                .unwrap();
            // 任意时刻日志大小不超过上限
            assert!(r.processed_log_len() <= PROCESSED_LOG_CAP);
        }
        // 超限后裁剪到最近 500 条
        assert_eq!(r.processed_log_len(), PROCESSED_LOG_TRIM);

        // 被裁剪的 id 不再受重复保护：e0 可以再次应用并计入未读
        let before = r.get_unread_count("c1");
        r.apply_message_event(ev("e0", "c1", "m", 2000)).await.unwrap();
        assert_eq!(r.get_unread_count("c1"), before + 1);
    }

    #[tokio::test]
    async fn unread_state_survives_reconstruction() {
        init_test_logger();
        let pool = memory_pool().await;
        let r = test_reconciler(pool.clone()).await;

        r.apply_message_event(ev("e1", "c1", "m", 1000)).await.unwrap();
        r.apply_message_event(ev("e2", "c2", "m", 1001)).await.unwrap();
        r.apply_message_event(ev("e3", "c2", "m", 1002)).await.unwrap();

        // 同一数据库重建调和器，模拟页面重载
        let r2 = ConversationReconciler::with_listener_and_db(
            "ws-test",
            Arc::new(EmptyConversationListener),
            pool,
        )
        .await
        .unwrap();
        assert!(r2.is_unread("c1"));
        assert!(r2.is_unread("c2"));
        assert_eq!(r2.get_unread_count("c2"), 2);
        assert_eq!(r2.get_total_unread_count(), 3);
    }

    #[tokio::test]
    async fn hydrate_sorts_and_dedups() {
        init_test_logger();
        let r = test_reconciler(memory_pool().await).await;

        let conv = |id: &str, updated_at: i64| ConversationSummary {
            conversation_id: id.to_string(),
            contact_id: String::new(),
            contact_name: String::new(),
            contact_phone: String::new(),
            channel_name: String::new(),
            last_message: None,
            updated_at,
            created_at: updated_at,
        };

        r.hydrate(vec![conv("a", 100), conv("b", 300), conv("a", 100), conv("c", 200)]);
        let ids: Vec<_> = r
            .get_conversation_list()
            .into_iter()
            .map(|c| c.conversation_id)
            .collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }
}
