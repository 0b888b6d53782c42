//! ShopChat 客户端核心实现模块
//!
//! 负责各子系统的装配与生命周期：共享数据库连接、带认证的 HTTP 客户端、
//! 会话调和器、事件泵与批量发送进度跟踪。实时传输（WebSocket 连接管理、
//! 重连）由宿主负责，宿主通过 `event_sender` 把原始事件灌入事件泵。

use crate::im::bulk::{
    BulkJobScope, BulkSendApi, BulkSendListener, BulkSendProgressTracker, BulkSendTrackerConfig,
    EmptyBulkSendListener,
};
use crate::im::conversation::{
    ConversationApi, ConversationListener, ConversationReconciler, EmptyConversationListener,
    UnreadStateDao,
};
use crate::im::subscription::{spawn_event_pump, EventDispatcher};
use crate::im::types::ConversationSummary;
use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// 事件泵的通道容量
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// 在事件分发器中注册调和器使用的名字
const RECONCILER_LISTENER_NAME: &str = "conversation-reconciler";

/// 客户端配置
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// 工作区 ID（多租户隔离）
    pub workspace_id: String,
    /// 认证 token
    pub token: String,
    /// HTTP API 基础地址
    pub api_base_url: String,
    /// 本地 SQLite 数据库 URL
    ///
    /// 例如：`sqlite://shopchat.db?mode=rwc`
    pub db_url: String,
    /// 批量任务进度轮询间隔（毫秒）
    pub bulk_poll_interval_ms: u64,
}

impl ClientConfig {
    /// 创建默认配置
    pub fn new(workspace_id: String, token: String) -> Self {
        Self {
            workspace_id,
            token,
            api_base_url: "http://localhost:10002".to_string(),
            db_url: "sqlite://shopchat.db?mode=rwc".to_string(),
            bulk_poll_interval_ms: 2000,
        }
    }
}

/// ShopChat 客户端
///
/// 核心装配逻辑实现
pub struct ShopChatClient {
    pub(crate) config: ClientConfig,
    // 会话调和器（connect 后可用）
    pub(crate) reconciler: Option<Arc<ConversationReconciler>>,
    // 事件分发器
    dispatcher: Arc<EventDispatcher>,
    // 事件泵任务句柄（disconnect 时 abort）
    event_pump: Option<JoinHandle<()>>,
    // 宿主向事件泵灌入原始事件的发送端
    event_tx: Option<mpsc::Sender<serde_json::Value>>,
    // 带认证拦截器的 HTTP 客户端
    http_client: Option<reqwest::Client>,
    // 共享数据库连接
    db: Option<Pool<Sqlite>>,
    // 会话监听器（可由调用方注册，需在 connect 前设置）
    conversation_listener: Arc<dyn ConversationListener>,
    // 批量发送进度监听器（可由调用方注册）
    bulk_listener: Arc<dyn BulkSendListener>,
}

impl ShopChatClient {
    /// 创建新的客户端
    /// - `config`: 客户端配置
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            reconciler: None,
            dispatcher: Arc::new(EventDispatcher::new()),
            event_pump: None,
            event_tx: None,
            http_client: None,
            db: None,
            conversation_listener: Arc::new(EmptyConversationListener),
            bulk_listener: Arc::new(EmptyBulkSendListener),
        }
    }

    /// 注册会话监听器（需在 connect 前调用）
    pub fn set_conversation_listener(&mut self, listener: Arc<dyn ConversationListener>) {
        self.conversation_listener = listener;
    }

    /// 注册批量发送进度监听器（需在 track_bulk_send 前调用）
    pub fn set_bulk_send_listener(&mut self, listener: Arc<dyn BulkSendListener>) {
        self.bulk_listener = listener;
    }

    /// 连接：装配数据库、HTTP 客户端、会话调和器与事件泵
    pub async fn connect(&mut self) -> Result<()> {
        info!(
            "[Client] 🔗 初始化 ShopChat SDK (workspace={})",
            self.config.workspace_id
        );

        // 创建共享数据库连接
        info!("[Client] 🔗 创建共享数据库连接: {}", self.config.db_url);
        let db = SqlitePoolOptions::new()
            .connect(&self.config.db_url)
            .await
            .context(format!("连接SQLite数据库失败: {}", self.config.db_url))?;
        self.db = Some(db.clone());

        // 初始化数据库表结构
        info!("[Client] 📋 初始化数据库表结构");
        UnreadStateDao::init_db_with_connection(&db).await?;

        // 创建带认证拦截器的 HTTP 客户端（token 通过 default_headers 自动添加）
        let http_client = reqwest::ClientBuilder::new()
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::HeaderName::from_static("token"),
                    reqwest::header::HeaderValue::from_str(&self.config.token)
                        .context("无效的 token")?,
                );
                headers
            })
            .build()
            .context("创建 HTTP 客户端失败")?;
        self.http_client = Some(http_client.clone());

        // 创建会话调和器并恢复本地未读状态
        let reconciler = Arc::new(
            ConversationReconciler::with_listener_and_db(
                &self.config.workspace_id,
                self.conversation_listener.clone(),
                db,
            )
            .await?,
        );
        self.reconciler = Some(reconciler.clone());

        // 启动会话列表初始拉取任务
        let api = ConversationApi::new(
            http_client,
            self.config.api_base_url.clone(),
            self.config.workspace_id.clone(),
        );
        let hydrate_target = reconciler.clone();
        tokio::spawn(async move {
            info!("[Client] 🔄 启动会话列表拉取任务");
            match api.get_all_conversations().await {
                Ok(conversations) => {
                    hydrate_target.hydrate(conversations);
                    info!("[Client] ✅ 会话列表拉取完成");
                }
                Err(e) => error!("[Client] ❌ 会话列表拉取失败: {e}"),
            }
        });

        // 注册调和器并启动事件泵
        self.dispatcher
            .add_listener(RECONCILER_LISTENER_NAME, reconciler);
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.event_tx = Some(tx);
        self.event_pump = Some(spawn_event_pump(rx, self.dispatcher.clone()));

        info!("[Client] ✅ 初始化完成，开始接收实时事件");
        Ok(())
    }

    /// 断开：确定性地拆除事件泵与监听器（幂等）
    pub fn disconnect(&mut self) {
        if let Some(pump) = self.event_pump.take() {
            pump.abort();
            info!("[Client] 🛑 事件泵已停止");
        }
        self.event_tx = None;
        self.dispatcher.remove_listener(RECONCILER_LISTENER_NAME);
        self.reconciler = None;
    }

    /// 宿主向事件泵灌入原始事件的发送端
    pub fn event_sender(&self) -> Option<mpsc::Sender<serde_json::Value>> {
        self.event_tx.clone()
    }

    fn reconciler(&self) -> Result<&Arc<ConversationReconciler>> {
        self.reconciler
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("客户端尚未连接"))
    }

    /// 获取会话列表快照（最近更新在前）
    pub fn get_conversation_list(&self) -> Result<Vec<ConversationSummary>> {
        Ok(self.reconciler()?.get_conversation_list())
    }

    /// 总未读消息数
    pub fn get_total_unread_count(&self) -> Result<i32> {
        Ok(self.reconciler()?.get_total_unread_count())
    }

    /// 单个会话的未读计数
    pub fn get_unread_count(&self, conversation_id: &str) -> Result<i32> {
        Ok(self.reconciler()?.get_unread_count(conversation_id))
    }

    /// 将会话标记为已读
    pub async fn mark_conversation_as_read(&self, conversation_id: &str) -> Result<()> {
        self.reconciler()?.mark_read(conversation_id).await
    }

    /// 设置当前在 UI 中打开的会话
    pub fn set_active_conversation(&self, conversation_id: Option<String>) -> Result<()> {
        self.reconciler()?.set_active_conversation(conversation_id);
        Ok(())
    }

    /// 开始跟踪一个批量发送任务的进度
    ///
    /// 返回的跟踪器由调用方持有，作用域结束时 drop 即取消轮询
    pub fn track_bulk_send(
        &self,
        scope: BulkJobScope,
        job_id: &str,
    ) -> Result<Arc<BulkSendProgressTracker>> {
        let http_client = self
            .http_client
            .clone()
            .ok_or_else(|| anyhow::anyhow!("客户端尚未连接"))?;

        let api = Arc::new(BulkSendApi::new(
            http_client,
            self.config.api_base_url.clone(),
        ));
        let tracker = Arc::new(BulkSendProgressTracker::with_listener(
            BulkSendTrackerConfig {
                poll_interval_ms: self.config.bulk_poll_interval_ms,
                auto_stop: true,
            },
            scope,
            api,
            self.bulk_listener.clone(),
        ));
        tracker.start(job_id);
        Ok(tracker)
    }
}

impl Drop for ShopChatClient {
    fn drop(&mut self) {
        if let Some(pump) = self.event_pump.take() {
            pump.abort();
        }
    }
}
