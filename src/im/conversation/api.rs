//! 会话 HTTP API 客户端
//!
//! 负责会话列表的初始拉取（实时更新走订阅通道，不经过这里）

use crate::im::conversation::types::ConversationListResp;
use crate::im::types::{handle_http_response, ConversationSummary};
use anyhow::{Context, Result};
use tracing::{debug, info};
use uuid::Uuid;

/// 会话相关的 HTTP API 客户端
pub struct ConversationApi {
    client: reqwest::Client,
    api_base_url: String,
    workspace_id: String,
}

impl ConversationApi {
    /// 创建新的会话 API 客户端
    ///
    /// `client` 应该已经在外部配置好认证拦截器
    pub fn new(client: reqwest::Client, api_base_url: String, workspace_id: String) -> Self {
        Self {
            client,
            api_base_url,
            workspace_id,
        }
    }

    /// 从服务器获取全量会话列表（用于首次填充会话调和器）
    pub async fn get_all_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!("{}/conversation/list", self.api_base_url);

        info!("[ConvAPI] 📡 请求全量会话列表");
        debug!("[ConvAPI]   请求URL: {}", url);
        debug!(
            "[ConvAPI]   工作区ID: {}, 操作ID: {}",
            self.workspace_id, operation_id
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .json(&serde_json::json!({
                "workspaceID": self.workspace_id,
            }))
            .send()
            .await
            .context("请求失败")?;

        // 直接反序列化为业务逻辑层结构体
        let api_resp = handle_http_response::<ConversationListResp>(response, "会话列表").await?;
        let resp = api_resp
            .data
            .ok_or_else(|| anyhow::anyhow!("响应中缺少 data 字段"))?;

        info!(
            "[ConvAPI] ✅ 会话列表响应，会话数: {}",
            resp.conversations.len()
        );
        debug!(
            "[ConvAPI]   会话详情: {:?}",
            resp.conversations
                .iter()
                .map(|c| &c.conversation_id)
                .collect::<Vec<_>>()
        );

        Ok(resp.conversations)
    }
}
