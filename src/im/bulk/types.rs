//! 批量发送任务相关类型

use serde::{Deserialize, Serialize};

/// 任务状态
///
/// `Completed` / `Failed` 为终止状态，之后服务器不再变更任务
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// 是否为终止状态
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// 任务进度快照
///
/// 每次轮询整体替换，除 `status` 外的字段对核心逻辑不透明，
/// 仅透传给上层展示。服务器新增字段落入 `extra` 原样保留。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    /// 任务 ID
    #[serde(rename = "jobID")]
    pub job_id: String,
    /// 任务状态
    pub status: JobStatus,
    /// 已发送条数（服务器可能不返回）
    #[serde(default)]
    pub sent: Option<i64>,
    /// 发送失败条数
    #[serde(default)]
    pub failed: Option<i64>,
    /// 总条数
    #[serde(default)]
    pub total: Option<i64>,
    /// 其余服务器字段（透传）
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
