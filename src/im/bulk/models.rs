//! 批量发送进度跟踪配置

/// 任务归属定位（查询任务状态时的路径参数）
///
/// `agent_id` 与 `department_id` 二选一：按坐席发起的任务走坐席路径，
/// 按部门发起的任务走部门路径
#[derive(Debug, Clone)]
pub struct BulkJobScope {
    /// 坐席 ID
    pub agent_id: Option<String>,
    /// 部门 ID
    pub department_id: Option<String>,
    /// 渠道 ID
    pub channel_id: String,
    /// 消息模板 ID
    pub template_id: String,
}

/// 进度跟踪器配置
#[derive(Debug, Clone)]
pub struct BulkSendTrackerConfig {
    /// 轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 观察到终止状态后自动停止轮询
    pub auto_stop: bool,
}

impl Default for BulkSendTrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            auto_stop: true,
        }
    }
}
