//! 会话接口响应类型

use crate::im::types::ConversationSummary;
use serde::Deserialize;

/// 全量会话列表响应（业务逻辑层结构体，可直接从 API 响应反序列化）
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationListResp {
    pub conversations: Vec<ConversationSummary>,
}
