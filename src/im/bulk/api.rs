//! 批量发送任务 HTTP API 客户端
//!
//! 负责任务状态查询；发起批量发送本身由后台页面走别的接口，不在此处

use crate::im::bulk::models::BulkJobScope;
use crate::im::bulk::types::JobProgress;
use crate::im::types::handle_http_response;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

/// 任务状态查询接口（传输无关）
///
/// 进度跟踪器通过这个接口轮询，测试中可用脚本化实现替代 HTTP
#[async_trait]
pub trait JobStatusQuery: Send + Sync {
    /// 查询一次任务进度快照
    async fn fetch_job_progress(&self, scope: &BulkJobScope, job_id: &str) -> Result<JobProgress>;
}

/// 批量发送任务的 HTTP API 客户端
pub struct BulkSendApi {
    client: reqwest::Client,
    api_base_url: String,
}

impl BulkSendApi {
    /// 创建新的批量任务 API 客户端
    ///
    /// `client` 应该已经在外部配置好认证拦截器
    pub fn new(client: reqwest::Client, api_base_url: String) -> Self {
        Self {
            client,
            api_base_url,
        }
    }

    /// 按任务归属构建状态查询 URL
    fn build_job_url(&self, scope: &BulkJobScope, job_id: &str) -> String {
        let owner = match (&scope.agent_id, &scope.department_id) {
            (Some(agent_id), _) => format!("agent/{}", agent_id),
            (None, Some(department_id)) => format!("department/{}", department_id),
            // 两者都缺省时退回坐席路径，由服务器返回业务错误
            (None, None) => "agent/".to_string(),
        };
        format!(
            "{}/{}/channel/{}/template/{}/bulk_send_job/{}",
            self.api_base_url, owner, scope.channel_id, scope.template_id, job_id
        )
    }
}

#[async_trait]
impl JobStatusQuery for BulkSendApi {
    async fn fetch_job_progress(&self, scope: &BulkJobScope, job_id: &str) -> Result<JobProgress> {
        let operation_id = Uuid::new_v4().to_string();
        let url = self.build_job_url(scope, job_id);

        info!("[BulkAPI] 📡 查询批量任务进度: jobID={}", job_id);
        debug!("[BulkAPI]   请求URL: {}, 操作ID: {}", url, operation_id);

        let response = self
            .client
            .get(&url)
            .header("operationID", &operation_id)
            .send()
            .await
            .context("请求失败")?;

        // 直接反序列化为业务逻辑层结构体
        let api_resp = handle_http_response::<JobProgress>(response, "批量任务进度").await?;
        let progress = api_resp
            .data
            .ok_or_else(|| anyhow::anyhow!("响应中缺少 data 字段"))?;

        info!(
            "[BulkAPI] ✅ 任务进度响应: jobID={}, status={:?}",
            progress.job_id, progress.status
        );
        Ok(progress)
    }
}
