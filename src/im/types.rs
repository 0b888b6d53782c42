use serde::{Deserialize, Serialize};
use tracing::warn;

/// 统一的 API 响应包装结构体（包含 errCode、errMsg、data）
/// data 字段可能为 null 或缺失，因此使用 Option<T>
/// serde 会自动将缺失或 null 的字段反序列化为 None
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(rename = "errCode")]
    pub err_code: i32,
    #[serde(rename = "errMsg")]
    pub err_msg: String,
    pub data: Option<T>,
}

/// 通用 HTTP 响应处理函数：直接反序列化为统一的响应结构体
/// 返回 `ApiResponse<T>`，调用方可以根据需要处理 `data` 字段（可能为 None）
/// 所有 API 都可以共用此方法
pub async fn handle_http_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> anyhow::Result<ApiResponse<T>> {
    use anyhow::Context;
    use tracing::{debug, error};

    let status = response.status();

    // 读取 body bytes（只能读取一次）
    let body_bytes = response.bytes().await.context("读取响应 body 失败")?;
    let body_str = String::from_utf8_lossy(&body_bytes);

    if !status.is_success() {
        error!(
            "[HTTP] {}请求失败，HTTP状态: {}, 响应: {}",
            operation_name, status, body_str
        );
        return Err(anyhow::anyhow!("HTTP 错误 {}: {}", status, body_str));
    }
    debug!("[HTTP] {}请求成功，HTTP状态: {}", operation_name, status);

    // 从 bytes 反序列化（因为 body 已经被消费了）
    let api_resp: ApiResponse<T> = serde_json::from_slice(&body_bytes).map_err(|e| {
        error!(
            "[HTTP] {}反序列化失败: {:?}\n原始响应: {}",
            operation_name, e, body_str
        );
        anyhow::anyhow!("反序列化响应失败: {:?}", e)
    })?;

    // 检查错误码
    if api_resp.err_code != 0 {
        error!(
            "[HTTP] {}服务器错误，错误码: {}, 错误信息: {}",
            operation_name, api_resp.err_code, api_resp.err_msg
        );
        return Err(anyhow::anyhow!(
            "服务器错误 {}: {}",
            api_resp.err_code,
            api_resp.err_msg
        ));
    }

    Ok(api_resp)
}

// ========== 会话相关结构体 ==========

/// 最新消息快照（展示用）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    /// 消息正文
    #[serde(default)]
    pub message: String,
    /// 媒体 URL（图片/音频等，可能为空）
    #[serde(default)]
    pub media_url: String,
    /// 媒体类型，例如 "image"、"audio"，文本消息为空
    #[serde(default)]
    pub media_type: String,
    /// 是否来自客户（false 表示商家侧发送，含其他设备）
    #[serde(default)]
    pub is_from_customer: bool,
    /// 消息时间（毫秒时间戳）
    #[serde(default)]
    pub created_at: i64,
}

/// 会话摘要数据结构
/// 可以直接从服务器返回的 JSON 反序列化，缺失的字段使用默认值
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    /// 会话 ID（列表中的稳定主键，至多出现一次）
    #[serde(rename = "conversationID")]
    pub conversation_id: String,
    /// 联系人 ID
    #[serde(rename = "contactID", default)]
    pub contact_id: String,
    /// 联系人名称（服务器可能不返回，需要从联系人信息获取）
    #[serde(default)]
    pub contact_name: String,
    /// 联系人电话
    #[serde(default)]
    pub contact_phone: String,
    /// 渠道名称（WhatsApp 号码所属渠道）
    #[serde(default)]
    pub channel_name: String,
    /// 最新消息快照
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    /// 最近更新时间（毫秒时间戳），驱动列表排序
    #[serde(default)]
    pub updated_at: i64,
    /// 创建时间（毫秒时间戳）
    #[serde(default)]
    pub created_at: i64,
}

// ========== 实时消息事件 ==========

/// 实时消息事件
///
/// 由实时订阅通道推送的单条消息，字段与服务器推送的 JSON 对应。
/// `id` 可能缺失（旧版服务器），缺失时无法做重复投递保护。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    /// 事件 ID（用于重复投递去重，可能缺失）
    #[serde(default)]
    pub id: Option<String>,
    /// 会话 ID
    #[serde(rename = "conversationID")]
    pub conversation_id: String,
    /// 消息正文
    pub content: String,
    /// 是否来自客户
    #[serde(default)]
    pub is_from_customer: bool,
    /// 消息时间（毫秒时间戳）
    pub created_at: i64,
    /// 联系人 ID（新会话时用于合成会话摘要）
    #[serde(rename = "contactID", default)]
    pub contact_id: String,
    /// 联系人名称
    #[serde(default)]
    pub contact_name: String,
    /// 联系人电话
    #[serde(default)]
    pub contact_phone: String,
    /// 渠道名称
    #[serde(default)]
    pub channel_name: String,
    /// 媒体 URL
    #[serde(default)]
    pub media_url: String,
    /// 媒体类型
    #[serde(default)]
    pub media_type: String,
}

impl MessageEvent {
    /// 从订阅通道推送的原始 JSON 解析消息事件
    ///
    /// 缺少必要字段（conversationID / content / createdAt）的事件在这里被拒绝，
    /// 返回 None 并打印 warn 日志，不会进入会话调和流程。
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let has_required = value
            .get("conversationID")
            .and_then(|v| v.as_str())
            .is_some()
            && value.get("content").and_then(|v| v.as_str()).is_some()
            && value.get("createdAt").and_then(|v| v.as_i64()).is_some();
        if !has_required {
            warn!("[Event] ⚠️ 丢弃缺少必要字段的消息事件: {}", value);
            return None;
        }

        match serde_json::from_value::<MessageEvent>(value.clone()) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("[Event] ⚠️ 消息事件解析失败: {}, 原始数据: {}", e, value);
                None
            }
        }
    }

    /// 由事件合成消息快照（新会话插入 / 已有会话更新时共用）
    pub fn to_last_message(&self) -> LastMessage {
        LastMessage {
            message: self.content.clone(),
            media_url: self.media_url.clone(),
            media_type: self.media_type.clone(),
            is_from_customer: self.is_from_customer,
            created_at: self.created_at,
        }
    }
}
