//! 批量发送进度监听器回调接口

use async_trait::async_trait;

/// 批量发送进度监听器回调接口
#[async_trait]
pub trait BulkSendListener: Send + Sync {
    /// 收到新的进度快照（每次成功轮询都会触发）
    async fn on_progress(&self, progress: String);

    /// 任务到达终止状态（completed / failed）
    async fn on_finished(&self, progress: String);

    /// 查询失败（轮询随之停止，不自动重试）
    async fn on_error(&self, message: String);
}

/// 空实现（默认监听器）
pub struct EmptyBulkSendListener;

#[async_trait]
impl BulkSendListener for EmptyBulkSendListener {
    async fn on_progress(&self, _progress: String) {}
    async fn on_finished(&self, _progress: String) {}
    async fn on_error(&self, _message: String) {}
}
