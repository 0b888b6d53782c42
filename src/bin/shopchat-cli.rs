//! ShopChat CLI 客户端（测试版）
//!
//! 非交互式 CLI，用于测试和展示 SDK 功能
//! 启动时通过命令行参数指定工作区，自动连接，打印会话列表与收到的事件，
//! 可选跟踪一个批量发送任务直到终止

use anyhow::Result;
use chrono::TimeZone;
use clap::Parser;
use shopchat_sdk_core_rust::im::bulk::{BulkJobScope, BulkSendListener};
use shopchat_sdk_core_rust::im::client::{ClientConfig, ShopChatClient};
use shopchat_sdk_core_rust::im::conversation::ConversationListener;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

/// ShopChat CLI 客户端
#[derive(Parser, Debug)]
#[command(name = "shopchat-cli")]
#[command(about = "ShopChat CLI 客户端 - 用于测试和展示 SDK 功能", long_about = None)]
struct Args {
    /// 工作区 ID
    #[arg(short, long)]
    workspace: String,

    /// 认证 token
    #[arg(short, long)]
    token: String,

    /// HTTP API 基础地址
    #[arg(long, default_value = "http://localhost:10002")]
    api_url: String,

    /// 要跟踪的批量发送任务 ID（可选）
    #[arg(long)]
    job_id: Option<String>,

    /// 批量任务所属坐席 ID（跟踪任务时必填）
    #[arg(long)]
    agent_id: Option<String>,

    /// 批量任务所属渠道 ID
    #[arg(long, default_value = "")]
    channel_id: String,

    /// 批量任务使用的模板 ID
    #[arg(long, default_value = "")]
    template_id: String,

    /// 运行时长（秒），0 表示持续运行
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// 日志级别（默认: info,shopchat_sdk_core_rust=debug）
    #[arg(long, default_value = "info,shopchat_sdk_core_rust=debug")]
    log_level: String,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // 创建日志文件（追加模式）
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .expect("无法创建日志文件 debug.log");

    // 输出到 stdout（控制台），保留 ANSI 颜色代码用于终端显示
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    // 输出到文件，禁用 ANSI 颜色代码（文件不需要颜色）
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 日志已同时输出到控制台和文件: debug.log");
}

/// 设置监听器（输出所有接收到的信息）
fn setup_listeners(client: &mut ShopChatClient) {
    // 会话监听器
    struct CliConversationListener;
    #[async_trait::async_trait]
    impl ConversationListener for CliConversationListener {
        async fn on_new_conversation(&self, conversation_list: String) {
            info!("[CLI/Conversation] 🆕 新会话: {}", conversation_list);
        }

        async fn on_conversation_changed(&self, conversation_list: String) {
            info!("[CLI/Conversation] 🔄 会话变更: {}", conversation_list);
        }

        async fn on_total_unread_message_count_changed(&self, total_unread_count: i32) {
            info!("[CLI/Conversation] 📬 总未读数: {}", total_unread_count);
        }
    }
    client.set_conversation_listener(Arc::new(CliConversationListener));

    // 批量发送进度监听器
    struct CliBulkSendListener;
    #[async_trait::async_trait]
    impl BulkSendListener for CliBulkSendListener {
        async fn on_progress(&self, progress: String) {
            info!("[CLI/Bulk] 📊 任务进度: {}", progress);
        }

        async fn on_finished(&self, progress: String) {
            info!("[CLI/Bulk] ✅ 任务终止: {}", progress);
        }

        async fn on_error(&self, message: String) {
            error!("[CLI/Bulk] ❌ 任务查询失败: {}", message);
        }
    }
    client.set_bulk_send_listener(Arc::new(CliBulkSendListener));
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    init_logger(&args.log_level);

    info!("[CLI] 🚀 ShopChat CLI 客户端（测试模式）");
    info!("[CLI] 🏢 工作区: {}", args.workspace);
    info!("[CLI] ⏱️  运行时长: {} 秒（0=持续运行）", args.duration);

    // 创建客户端
    let mut config = ClientConfig::new(args.workspace.clone(), args.token.clone());
    config.api_base_url = args.api_url.clone();
    let mut client = ShopChatClient::new(config);

    // 设置监听器
    setup_listeners(&mut client);

    // 连接
    info!("[CLI] 🔗 正在初始化...");
    client
        .connect()
        .await
        .map_err(|e| anyhow::anyhow!("初始化失败: {}", e))?;
    info!("[CLI] ✅ 初始化成功！");

    // 等待初始拉取后显示会话列表
    sleep(Duration::from_secs(2)).await;
    if let Ok(conversations) = client.get_conversation_list() {
        info!("[CLI] 📋 会话列表（共 {} 个）:", conversations.len());
        for conv in conversations.iter().take(5) {
            let latest = conv
                .last_message
                .as_ref()
                .map(|m| m.message.clone())
                .unwrap_or_default();
            // updatedAt 为毫秒时间戳
            let updated = chrono::Local
                .timestamp_millis_opt(conv.updated_at)
                .single()
                .map(|t| t.format("%m-%d %H:%M").to_string())
                .unwrap_or_default();
            info!(
                "[CLI]   - {} | 渠道: {} | 未读: {} | {} | 最新: {}",
                conv.contact_name,
                conv.channel_name,
                client.get_unread_count(&conv.conversation_id).unwrap_or(0),
                updated,
                latest.chars().take(30).collect::<String>()
            );
        }
    }
    if let Ok(unread) = client.get_total_unread_count() {
        info!("[CLI] 📬 总未读数: {}", unread);
    }

    // 可选：跟踪批量发送任务
    let mut _tracker = None;
    if let Some(job_id) = &args.job_id {
        info!("[CLI] 📡 开始跟踪批量发送任务: {}", job_id);
        let scope = BulkJobScope {
            agent_id: args.agent_id.clone(),
            department_id: None,
            channel_id: args.channel_id.clone(),
            template_id: args.template_id.clone(),
        };
        match client.track_bulk_send(scope, job_id) {
            Ok(tracker) => _tracker = Some(tracker),
            Err(e) => error!("[CLI] ❌ 跟踪任务失败: {}", e),
        }
    }

    info!("[CLI] 📥 开始监听事件...");
    if args.duration > 0 {
        info!("[CLI] ⏰ {} 秒后自动退出", args.duration);
        sleep(Duration::from_secs(args.duration)).await;
        info!("[CLI] 👋 程序退出");
    } else {
        info!("[CLI] ⏰ 持续运行中，按 Ctrl+C 退出");
        // 持续运行直到被中断
        loop {
            sleep(Duration::from_secs(3600)).await;
        }
    }

    client.disconnect();
    Ok(())
}
