//! 批量发送进度跟踪服务层
//!
//! 按固定间隔轮询任务状态直到终止：`idle → polling → {finished | errored}`。
//! 终止对某个任务 ID 是永久的，换新任务 ID 才会回到 idle。
//! 查询失败即停（fail-stop），不做自动重试。

use crate::im::bulk::api::JobStatusQuery;
use crate::im::bulk::listener::{BulkSendListener, EmptyBulkSendListener};
use crate::im::bulk::models::{BulkJobScope, BulkSendTrackerConfig};
use crate::im::bulk::types::JobProgress;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// 跟踪器内部状态
struct TrackerState {
    /// 当前跟踪的任务 ID
    job_id: Option<String>,
    /// 最近一次进度快照（每次轮询整体替换）
    progress: Option<JobProgress>,
    /// 查询失败时的展示错误（终止本轮轮询）
    error: Option<String>,
    /// 是否正在轮询
    polling: bool,
    /// 本实例内已终止（完成 / 失败 / 出错）的任务 ID，
    /// 对这些 ID 再次 start 不会恢复轮询
    finished_jobs: HashSet<String>,
}

/// 批量发送进度跟踪器
pub struct BulkSendProgressTracker {
    config: BulkSendTrackerConfig,
    scope: BulkJobScope,
    /// 任务状态查询来源
    source: Arc<dyn JobStatusQuery>,
    /// 进度监听器
    listener: Arc<dyn BulkSendListener>,
    state: Arc<Mutex<TrackerState>>,
    /// 轮询任务句柄（stop / Drop 时 abort，保证没有悬挂回调）
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl BulkSendProgressTracker {
    /// 创建新的进度跟踪器（使用默认空监听器）
    pub fn new(
        config: BulkSendTrackerConfig,
        scope: BulkJobScope,
        source: Arc<dyn JobStatusQuery>,
    ) -> Self {
        Self::with_listener(config, scope, source, Arc::new(EmptyBulkSendListener))
    }

    /// 创建新的进度跟踪器（带自定义监听器）
    pub fn with_listener(
        config: BulkSendTrackerConfig,
        scope: BulkJobScope,
        source: Arc<dyn JobStatusQuery>,
        listener: Arc<dyn BulkSendListener>,
    ) -> Self {
        Self {
            config,
            scope,
            source,
            listener,
            state: Arc::new(Mutex::new(TrackerState {
                job_id: None,
                progress: None,
                error: None,
                polling: false,
                finished_jobs: HashSet::new(),
            })),
            poll_task: Mutex::new(None),
        }
    }

    /// 开始轮询任务状态
    ///
    /// 已在轮询或该任务 ID 已终止时为空操作。先立即查询一次，
    /// 之后按配置的间隔重复查询，直到终止状态或查询失败。
    pub fn start(&self, job_id: &str) {
        {
            let mut state = self.state.lock().unwrap();
            if state.polling {
                warn!("[BulkTrack] 已在轮询中，忽略 start: jobID={}", job_id);
                return;
            }
            if state.finished_jobs.contains(job_id) {
                info!(
                    "[BulkTrack] 任务已终止，不再恢复轮询: jobID={}",
                    job_id
                );
                return;
            }
            // 新任务 ID：重置为 idle 后进入 polling
            state.job_id = Some(job_id.to_string());
            state.progress = None;
            state.error = None;
            state.polling = true;
        }

        info!(
            "[BulkTrack] 🔄 开始轮询任务进度: jobID={}, 间隔: {}ms",
            job_id, self.config.poll_interval_ms
        );

        let scope = self.scope.clone();
        let source = self.source.clone();
        let listener = self.listener.clone();
        let state = self.state.clone();
        let job = job_id.to_string();
        let poll_interval = self.config.poll_interval_ms;
        let auto_stop = self.config.auto_stop;

        let handle = tokio::spawn(async move {
            // 首次 tick 立即完成，即"先查一次再定时"
            let mut ticker = interval(Duration::from_millis(poll_interval));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let done =
                    Self::query_once(&scope, &source, &listener, &state, &job, auto_stop).await;
                if done {
                    break;
                }
            }
            debug!("[BulkTrack] 轮询任务退出: jobID={}", job);
        });

        // 同一时刻只有一个逻辑定时器
        if let Some(old) = self.poll_task.lock().unwrap().replace(handle) {
            old.abort();
        }
    }

    /// 停止轮询（幂等）
    pub fn stop(&self) {
        if let Some(handle) = self.poll_task.lock().unwrap().take() {
            handle.abort();
            info!("[BulkTrack] 🛑 轮询已停止");
        }
        let mut state = self.state.lock().unwrap();
        state.polling = false;
    }

    /// 手动触发一次状态查询（与轮询同一条处理路径）
    ///
    /// 任务已终止时为空操作
    pub async fn query_now(&self) {
        let job = {
            let state = self.state.lock().unwrap();
            match &state.job_id {
                Some(job) if !state.finished_jobs.contains(job) => job.clone(),
                _ => return,
            }
        };
        Self::query_once(
            &self.scope,
            &self.source,
            &self.listener,
            &self.state,
            &job,
            self.config.auto_stop,
        )
        .await;
    }

    /// 执行一次状态查询，返回是否应结束轮询
    async fn query_once(
        scope: &BulkJobScope,
        source: &Arc<dyn JobStatusQuery>,
        listener: &Arc<dyn BulkSendListener>,
        state: &Arc<Mutex<TrackerState>>,
        job_id: &str,
        auto_stop: bool,
    ) -> bool {
        // 作用域已切换任务或已销毁时不再查询
        {
            let state = state.lock().unwrap();
            if state.job_id.as_deref() != Some(job_id) {
                return true;
            }
        }

        let result = source.fetch_job_progress(scope, job_id).await;

        // 查询期间任务可能被切换或停止，写回前再校验一次
        let outcome = {
            let mut state = state.lock().unwrap();
            if state.job_id.as_deref() != Some(job_id) {
                return true;
            }
            match result {
                Ok(progress) => {
                    let terminal = progress.status.is_terminal();
                    state.progress = Some(progress.clone());
                    if terminal && auto_stop {
                        state.polling = false;
                        state.finished_jobs.insert(job_id.to_string());
                    }
                    Ok((progress, terminal && auto_stop))
                }
                Err(e) => {
                    let message = format!("查询任务进度失败: {}", e);
                    state.error = Some(message.clone());
                    state.polling = false;
                    // 出错对该任务 ID 同样是终止态
                    state.finished_jobs.insert(job_id.to_string());
                    Err(message)
                }
            }
        };

        match outcome {
            Ok((progress, done)) => {
                let json = serde_json::to_string(&progress).unwrap_or_else(|_| "{}".to_string());
                listener.on_progress(json.clone()).await;
                if done {
                    info!(
                        "[BulkTrack] ✅ 任务到达终止状态: jobID={}, status={:?}",
                        job_id, progress.status
                    );
                    listener.on_finished(json).await;
                }
                done
            }
            Err(message) => {
                error!("[BulkTrack] ❌ {}", message);
                listener.on_error(message).await;
                true
            }
        }
    }

    /// 是否正在轮询
    pub fn is_polling(&self) -> bool {
        self.state.lock().unwrap().polling
    }

    /// 最近一次进度快照
    pub fn get_progress(&self) -> Option<JobProgress> {
        self.state.lock().unwrap().progress.clone()
    }

    /// 查询失败时的展示错误
    pub fn get_error(&self) -> Option<String> {
        self.state.lock().unwrap().error.clone()
    }

    /// 当前跟踪的任务 ID
    pub fn current_job_id(&self) -> Option<String> {
        self.state.lock().unwrap().job_id.clone()
    }
}

impl Drop for BulkSendProgressTracker {
    fn drop(&mut self) {
        // 作用域结束必须确定性地取消定时器，不留悬挂回调
        if let Some(handle) = self.poll_task.lock().unwrap().take() {
            handle.abort();
        }
    }
}
