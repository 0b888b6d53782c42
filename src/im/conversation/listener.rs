//! 会话监听器回调接口

use async_trait::async_trait;

/// 会话监听器回调接口
///
/// 回调参数统一为 JSON 字符串，方便跨语言宿主（Flutter/JS）直接透传
#[async_trait]
pub trait ConversationListener: Send + Sync {
    /// 新会话（列表中原本不存在，由实时事件合成插入）
    async fn on_new_conversation(&self, conversation_list: String);

    /// 会话变更（最新消息 / 联系人字段 / 排序位置更新）
    async fn on_conversation_changed(&self, conversation_list: String);

    /// 总未读消息数变更
    async fn on_total_unread_message_count_changed(&self, total_unread_count: i32);
}

/// 空实现（默认监听器）
pub struct EmptyConversationListener;

#[async_trait]
impl ConversationListener for EmptyConversationListener {
    async fn on_new_conversation(&self, _conversation_list: String) {}
    async fn on_conversation_changed(&self, _conversation_list: String) {}
    async fn on_total_unread_message_count_changed(&self, _total_unread_count: i32) {}
}
